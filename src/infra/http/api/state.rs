use std::sync::Arc;

use crate::application::admin::AdminProductService;
use crate::application::cart::CartService;
use crate::application::catalog::CatalogService;
use crate::application::checkout::CheckoutService;
use crate::application::health::HealthService;
use crate::application::orders::OrderService;

use super::middleware::AdminToken;

#[derive(Clone)]
pub struct ApiState {
    pub catalog: Arc<CatalogService>,
    pub carts: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub admin_products: Arc<AdminProductService>,
    pub health: Arc<HealthService>,
    /// `None` disables the admin routes.
    pub admin_token: Option<Arc<AdminToken>>,
}
