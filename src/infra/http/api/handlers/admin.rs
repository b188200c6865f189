//! Admin product and order handlers

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use storefront_api_types::{
    OrderStatusRequest, ProductCreateRequest, ProductDeleteOutcome, ProductDeleteResponse,
    ProductUpdateRequest,
};
use uuid::Uuid;

use crate::application::admin::products::{CreateProductCommand, UpdateProductCommand};
use crate::application::dto;
use crate::application::repos::ProductRemoval;

use super::{admin_product_to_api, json_body, order_to_api, path_id};
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::state::ApiState;

pub async fn create_product(
    State(state): State<ApiState>,
    payload: Result<Json<ProductCreateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = json_body(payload)?;
    let command = CreateProductCommand {
        name: request.name,
        slug: request.slug,
        description: request.description,
        short_description: request.short_description,
        price: request.price,
        sale_price: request.sale_price,
        stock_quantity: request.stock_quantity,
        category_slug: request.category_slug,
        tag_slugs: request.tag_slugs,
        is_active: request.is_active,
        is_featured: request.is_featured,
    };

    let product = state
        .admin_products
        .create_product(command)
        .await
        .map_err(admin_product_to_api)?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_product(
    State(state): State<ApiState>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ProductUpdateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = path_id(id)?;
    let request = json_body(payload)?;
    let command = UpdateProductCommand {
        id,
        name: request.name,
        description: request.description,
        short_description: request.short_description,
        price: request.price,
        sale_price: request.sale_price,
        stock_quantity: request.stock_quantity,
        category_slug: request.category_slug,
        is_active: request.is_active,
        is_featured: request.is_featured,
        tag_slugs: request.tag_slugs,
    };

    let product = state
        .admin_products
        .update_product(command)
        .await
        .map_err(admin_product_to_api)?;
    Ok(Json(product))
}

pub async fn delete_product(
    State(state): State<ApiState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = path_id(id)?;
    let removal = state
        .admin_products
        .delete_product(id)
        .await
        .map_err(admin_product_to_api)?;
    let outcome = match removal {
        ProductRemoval::Deleted => ProductDeleteOutcome::Deleted,
        ProductRemoval::Deactivated => ProductDeleteOutcome::Deactivated,
    };
    Ok(Json(ProductDeleteResponse { id, outcome }))
}

pub async fn update_order_status(
    State(state): State<ApiState>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<OrderStatusRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = path_id(id)?;
    let request = json_body(payload)?;
    let order = state
        .orders
        .transition_order(id, dto::order_status_from_api(request.status))
        .await
        .map_err(order_to_api)?;
    Ok(Json(dto::order_response(&order)))
}
