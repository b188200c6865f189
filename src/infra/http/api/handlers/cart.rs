//! Cart and checkout handlers

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use storefront_api_types::{
    CartCountResponse, CartItemAddRequest, CartItemUpdateRequest, CheckoutRequest,
};
use tracing::info;
use uuid::Uuid;

use crate::application::dto;

use super::{cart_to_api, checkout_to_api, json_body, path_id};
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::owner::Owner;
use crate::infra::http::api::state::ApiState;

pub async fn get_cart(
    State(state): State<ApiState>,
    Owner(owner): Owner,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state.carts.view(&owner).await.map_err(cart_to_api)?;
    Ok(Json(cart))
}

pub async fn cart_count(
    State(state): State<ApiState>,
    Owner(owner): Owner,
) -> Result<impl IntoResponse, ApiError> {
    let count = state.carts.count(&owner).await.map_err(cart_to_api)?;
    Ok(Json(CartCountResponse { count }))
}

pub async fn add_cart_item(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    payload: Result<Json<CartItemAddRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = json_body(payload)?;
    let cart = state
        .carts
        .add_item(&owner, request.product_id, request.quantity)
        .await
        .map_err(cart_to_api)?;
    Ok((StatusCode::CREATED, Json(cart)))
}

pub async fn update_cart_item(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    product_id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<CartItemUpdateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let product_id = path_id(product_id)?;
    let request = json_body(payload)?;
    let cart = state
        .carts
        .update_item(&owner, product_id, request.quantity)
        .await
        .map_err(cart_to_api)?;
    Ok(Json(cart))
}

pub async fn remove_cart_item(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    product_id: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let product_id = path_id(product_id)?;
    let cart = state
        .carts
        .remove_item(&owner, product_id)
        .await
        .map_err(cart_to_api)?;
    Ok(Json(cart))
}

pub async fn clear_cart(
    State(state): State<ApiState>,
    Owner(owner): Owner,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state.carts.clear(&owner).await.map_err(cart_to_api)?;
    Ok(Json(cart))
}

/// 201 with a freshly paid order, 200 when the cart was already checked out.
pub async fn checkout(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = json_body(payload)?;
    let outcome = state
        .checkout
        .checkout(&owner, request.cart_id)
        .await
        .map_err(checkout_to_api)?;

    let status = if outcome.created {
        info!(
            target = "storefront::http::checkout",
            order_number = %outcome.order.order_number,
            "order placed"
        );
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(dto::order_response(&outcome.order))))
}
