//! Order handlers

use axum::Json;
use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use storefront_api_types::OrderResponse;
use uuid::Uuid;

use crate::application::dto;

use super::{order_to_api, path_id};
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::owner::Owner;
use crate::infra::http::api::state::ApiState;

pub async fn list_orders(
    State(state): State<ApiState>,
    Owner(owner): Owner,
) -> Result<impl IntoResponse, ApiError> {
    let orders = state
        .orders
        .list_orders(&owner)
        .await
        .map_err(order_to_api)?;
    let body: Vec<OrderResponse> = orders.iter().map(dto::order_response).collect();
    Ok(Json(body))
}

pub async fn get_order(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = path_id(id)?;
    let order = state
        .orders
        .get_order(&owner, id)
        .await
        .map_err(order_to_api)?;
    Ok(Json(dto::order_response(&order)))
}
