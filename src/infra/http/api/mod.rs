pub mod error;
pub mod handlers;
pub mod middleware;
pub mod owner;
pub mod state;

pub use middleware::AdminToken;
pub use state::ApiState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, patch, post, put},
};

pub fn build_api_router(state: ApiState) -> Router<ApiState> {
    let admin = Router::new()
        .route("/api/admin/products/", post(handlers::create_product))
        .route(
            "/api/admin/products/{id}/",
            patch(handlers::update_product).delete(handlers::delete_product),
        )
        .route(
            "/api/admin/orders/{id}/status/",
            post(handlers::update_order_status),
        )
        .layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_admin,
        ));

    Router::new()
        .route("/api/products/", get(handlers::list_products))
        .route("/api/products/{slug}/", get(handlers::get_product))
        .route(
            "/api/products/{slug}/reviews/",
            get(handlers::list_product_reviews),
        )
        .route("/api/categories/", get(handlers::list_categories))
        .route("/api/categories/{slug}/", get(handlers::get_category))
        .route(
            "/api/categories/{slug}/products/",
            get(handlers::list_category_products),
        )
        .route("/api/tags/", get(handlers::list_tags))
        .route("/api/tags/{slug}/", get(handlers::get_tag))
        .route("/api/tags/{slug}/products/", get(handlers::list_tag_products))
        .route(
            "/api/cart/",
            get(handlers::get_cart).delete(handlers::clear_cart),
        )
        .route("/api/cart/count/", get(handlers::cart_count))
        .route("/api/cart/items/", post(handlers::add_cart_item))
        .route(
            "/api/cart/items/{product_id}/",
            put(handlers::update_cart_item).delete(handlers::remove_cart_item),
        )
        .route("/api/checkout/", post(handlers::checkout))
        .route("/api/orders/", get(handlers::list_orders))
        .route("/api/orders/{id}/", get(handlers::get_order))
        .merge(admin)
}
