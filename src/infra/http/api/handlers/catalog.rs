//! Catalog handlers

use std::str::FromStr;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::application::catalog::{CatalogPayload, ProductListRequest};
use crate::domain::types::ProductSort;

use super::{catalog_to_api, query_params};
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::state::ApiState;

pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Prices arrive as strings so an empty `min_price=` reads as unset.
#[derive(Debug, Default, Deserialize)]
pub struct ProductListQuery {
    pub category: Option<String>,
    pub tag: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub in_stock: Option<bool>,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ProductListQuery {
    fn into_request(self) -> Result<ProductListRequest, ApiError> {
        let sort = match self.sort.as_deref().map(str::trim) {
            None | Some("") => ProductSort::default(),
            Some(raw) => ProductSort::parse(raw)
                .map_err(|err| ApiError::invalid_input("Invalid sort", Some(err.to_string())))?,
        };
        Ok(ProductListRequest {
            category: self.category,
            tag: self.tag,
            min_price: parse_price(self.min_price.as_deref(), "min_price")?,
            max_price: parse_price(self.max_price.as_deref(), "max_price")?,
            search: self.search,
            in_stock: self.in_stock,
            include_inactive: self.include_inactive,
            sort,
            page: self.page,
            page_size: self.page_size,
        })
    }
}

fn parse_price(raw: Option<&str>, field: &str) -> Result<Option<Decimal>, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => Decimal::from_str(value).map(Some).map_err(|_| {
            ApiError::invalid_input("Invalid price", Some(format!("`{field}` must be a decimal")))
        }),
    }
}

fn payload_response(payload: CatalogPayload) -> Response {
    let mut response = payload.body.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        CACHE_STATUS_HEADER,
        HeaderValue::from_static(payload.cache.as_str()),
    );
    response
}

pub async fn list_products(
    State(state): State<ApiState>,
    query: Result<Query<ProductListQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let request = query_params(query)?.into_request()?;
    let payload = state
        .catalog
        .list_products(request)
        .await
        .map_err(catalog_to_api)?;
    Ok(payload_response(payload))
}

pub async fn get_product(
    State(state): State<ApiState>,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    let payload = state
        .catalog
        .product_detail(&slug)
        .await
        .map_err(catalog_to_api)?;
    Ok(payload_response(payload))
}

pub async fn list_categories(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let payload = state
        .catalog
        .list_categories()
        .await
        .map_err(catalog_to_api)?;
    Ok(payload_response(payload))
}

pub async fn get_category(
    State(state): State<ApiState>,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    let payload = state
        .catalog
        .category_detail(&slug)
        .await
        .map_err(catalog_to_api)?;
    Ok(payload_response(payload))
}

pub async fn list_category_products(
    State(state): State<ApiState>,
    Path(slug): Path<String>,
    query: Result<Query<ProductListQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let request = query_params(query)?.into_request()?;
    let payload = state
        .catalog
        .category_products(&slug, request)
        .await
        .map_err(catalog_to_api)?;
    Ok(payload_response(payload))
}

pub async fn list_tags(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let payload = state.catalog.list_tags().await.map_err(catalog_to_api)?;
    Ok(payload_response(payload))
}

pub async fn get_tag(
    State(state): State<ApiState>,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    let payload = state
        .catalog
        .tag_detail(&slug)
        .await
        .map_err(catalog_to_api)?;
    Ok(payload_response(payload))
}

pub async fn list_tag_products(
    State(state): State<ApiState>,
    Path(slug): Path<String>,
    query: Result<Query<ProductListQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let request = query_params(query)?.into_request()?;
    let payload = state
        .catalog
        .tag_products(&slug, request)
        .await
        .map_err(catalog_to_api)?;
    Ok(payload_response(payload))
}

pub async fn list_product_reviews(
    State(state): State<ApiState>,
    Path(slug): Path<String>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let PageQuery { page, page_size } = query_params(query)?;
    let payload = state
        .catalog
        .product_reviews(&slug, page, page_size)
        .await
        .map_err(catalog_to_api)?;
    Ok(payload_response(payload))
}
