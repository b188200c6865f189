//! API handlers grouped by resource.
//!
//! Error conversions shared by the submodules live here.

mod admin;
mod cart;
mod catalog;
mod orders;

pub use admin::*;
pub use cart::*;
pub use catalog::*;
pub use orders::*;

use axum::Json;
use axum::extract::Path;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::Query;
use axum::http::StatusCode;
use uuid::Uuid;

use crate::application::admin::products::AdminProductError;
use crate::application::cart::CartError;
use crate::application::catalog::CatalogError;
use crate::application::checkout::CheckoutError;
use crate::application::orders::OrderError;
use crate::application::repos::RepoError;

use super::error::{ApiError, codes};

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        ApiError::invalid_input("Invalid request body", Some(rejection.body_text()))
    })
}

fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query.map(|Query(params)| params).map_err(|rejection| {
        ApiError::invalid_input("Invalid query string", Some(rejection.body_text()))
    })
}

fn path_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|rejection| ApiError::invalid_input("Invalid id", Some(rejection.body_text())))
}

fn repo_to_api(err: RepoError) -> ApiError {
    match err {
        RepoError::Duplicate { constraint } => ApiError::new(
            StatusCode::CONFLICT,
            codes::DUPLICATE,
            "Duplicate record",
            Some(constraint),
        ),
        RepoError::NotFound => ApiError::not_found("resource not found"),
        RepoError::InvalidInput { message } => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_INPUT,
            "Invalid input",
            Some(message),
        ),
        RepoError::Integrity { message } => ApiError::new(
            StatusCode::CONFLICT,
            codes::INTEGRITY,
            "Integrity constraint violated",
            Some(message),
        ),
        RepoError::Timeout => ApiError::store_unavailable().with_detail("database timeout"),
        RepoError::Persistence(msg) => ApiError::store_unavailable().with_detail(msg),
    }
}

fn not_found(entity: &'static str) -> ApiError {
    match entity {
        "product" => ApiError::not_found("product not found"),
        "cart" => ApiError::not_found("cart not found"),
        "cart item" => ApiError::not_found("cart item not found"),
        "category" => ApiError::not_found("category not found"),
        "tag" => ApiError::not_found("tag not found"),
        _ => ApiError::not_found("resource not found"),
    }
}

fn out_of_stock(slug: &str, requested: u64, available: u32) -> ApiError {
    ApiError::new(
        StatusCode::CONFLICT,
        codes::OUT_OF_STOCK,
        "Not enough stock",
        Some(format!("{slug}: {requested} requested, {available} available")),
    )
}

fn catalog_to_api(err: CatalogError) -> ApiError {
    match err {
        CatalogError::OutOfRange { field, reason } => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::OUT_OF_RANGE,
            "Parameter out of range",
            Some(format!("{field}: {reason}")),
        ),
        CatalogError::NotFound { entity } => not_found(entity),
        CatalogError::StoreUnavailable(source) => {
            ApiError::store_unavailable().with_source(&source)
        }
        CatalogError::Encode(source) => ApiError::internal().with_source(&source),
    }
}

fn cart_to_api(err: CartError) -> ApiError {
    match err {
        CartError::OutOfRange(reason) => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::OUT_OF_RANGE,
            "Quantity out of range",
            Some(reason),
        ),
        CartError::NotFound { entity } => not_found(entity),
        CartError::OutOfStock {
            slug,
            requested,
            available,
        } => out_of_stock(&slug, requested, available),
        CartError::Repo(repo) => repo_to_api(repo),
    }
}

fn checkout_to_api(err: CheckoutError) -> ApiError {
    match err {
        CheckoutError::NotFound { entity } => not_found(entity),
        CheckoutError::EmptyCart => ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            codes::CART_EMPTY,
            "Cart is empty",
            None,
        ),
        CheckoutError::OutOfStock {
            slug,
            requested,
            available,
        } => out_of_stock(&slug, u64::from(requested), available),
        CheckoutError::PaymentDeclined { reason } => ApiError::new(
            StatusCode::PAYMENT_REQUIRED,
            codes::PAYMENT_DECLINED,
            "Payment declined",
            Some(reason),
        ),
        CheckoutError::PaymentUnavailable(source) => ApiError::new(
            StatusCode::BAD_GATEWAY,
            codes::PAYMENT_UNAVAILABLE,
            "Payment provider unavailable",
            Some("the order is pending; retry the checkout".to_string()),
        )
        .with_source(&source),
        CheckoutError::Repo(repo) => repo_to_api(repo),
    }
}

fn order_to_api(err: OrderError) -> ApiError {
    match err {
        OrderError::NotFound => ApiError::not_found("order not found"),
        OrderError::InvalidTransition { from, to } => ApiError::new(
            StatusCode::CONFLICT,
            codes::INVALID_TRANSITION,
            "Invalid status transition",
            Some(format!("{from} -> {to}")),
        ),
        OrderError::Repo(repo) => repo_to_api(repo),
    }
}

fn admin_product_to_api(err: AdminProductError) -> ApiError {
    match err {
        AdminProductError::ConstraintViolation(field) => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_INPUT,
            "Invalid product",
            Some(field.to_string()),
        ),
        AdminProductError::NotFound { entity } => not_found(entity),
        AdminProductError::Repo(repo) => repo_to_api(repo),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_are_unavailable() {
        let err = repo_to_api(RepoError::Timeout);
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), codes::STORE_UNAVAILABLE);

        let err = catalog_to_api(CatalogError::StoreUnavailable(RepoError::Persistence(
            "connection refused".to_string(),
        )));
        assert_eq!(err.code(), codes::STORE_UNAVAILABLE);
    }

    #[test]
    fn checkout_errors_map_to_codes() {
        assert_eq!(
            checkout_to_api(CheckoutError::EmptyCart).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        let declined = checkout_to_api(CheckoutError::PaymentDeclined {
            reason: "insufficient funds".to_string(),
        });
        assert_eq!(declined.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(declined.code(), codes::PAYMENT_DECLINED);
    }

    #[test]
    fn out_of_range_is_bad_request() {
        let err = catalog_to_api(CatalogError::OutOfRange {
            field: "page_size",
            reason: "must be at least 1".to_string(),
        });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), codes::OUT_OF_RANGE);
    }
}
