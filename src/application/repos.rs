//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::entities::{
    CartItemRecord, CartRecord, CategoryRecord, CategoryWithCount, OrderLineRecord, OrderRecord,
    ProductRecord, ReviewRecord, ReviewStats, TagRecord, TagWithCount,
};
use crate::domain::types::{CartOwner, OrderStatus, ProductSort};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    /// Whether the store itself failed, as opposed to rejecting the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RepoError::Persistence(_) | RepoError::Timeout)
    }
}

/// Normalized product filter. Empty strings never reach this type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub tag: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    /// Matches name, descriptions, category name and tag names.
    pub search: Option<String>,
    pub in_stock: Option<bool>,
    pub include_inactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductQuery {
    pub filter: ProductFilter,
    pub sort: ProductSort,
    pub offset: u64,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSlice {
    pub items: Vec<ProductRecord>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewSlice {
    pub items: Vec<ReviewRecord>,
    pub total: u64,
}

#[async_trait]
pub trait CatalogRepo: Send + Sync {
    async fn list_products(&self, query: &ProductQuery) -> Result<ProductSlice, RepoError>;

    async fn find_product_by_slug(&self, slug: &str) -> Result<Option<ProductRecord>, RepoError>;

    async fn find_product_by_id(&self, id: Uuid) -> Result<Option<ProductRecord>, RepoError>;

    async fn tags_for_product(&self, product_id: Uuid) -> Result<Vec<TagRecord>, RepoError>;

    /// Approved reviews only.
    async fn review_stats(&self, product_id: Uuid) -> Result<ReviewStats, RepoError>;

    /// Approved reviews, newest first.
    async fn list_reviews(
        &self,
        product_id: Uuid,
        offset: u64,
        limit: u32,
    ) -> Result<ReviewSlice, RepoError>;

    async fn list_categories_with_counts(&self) -> Result<Vec<CategoryWithCount>, RepoError>;

    /// Active categories only.
    async fn find_category_with_count(
        &self,
        slug: &str,
    ) -> Result<Option<CategoryWithCount>, RepoError>;

    /// Tags carried by at least one active product, most used first.
    async fn list_tags_with_counts(&self) -> Result<Vec<TagWithCount>, RepoError>;

    async fn find_tag_with_count(&self, slug: &str) -> Result<Option<TagWithCount>, RepoError>;
}

#[derive(Debug, Clone)]
pub struct CreateProductParams {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub short_description: String,
    pub price: Decimal,
    pub sale_price: Option<Decimal>,
    pub stock_quantity: u32,
    pub category_id: Uuid,
    pub tag_slugs: Vec<String>,
    pub is_active: bool,
    pub is_featured: bool,
}

/// Full replacement of the mutable product columns.
#[derive(Debug, Clone)]
pub struct UpdateProductParams {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub short_description: String,
    pub price: Decimal,
    pub sale_price: Option<Decimal>,
    pub stock_quantity: u32,
    pub category_id: Uuid,
    pub is_active: bool,
    pub is_featured: bool,
    /// `None` keeps the current tags; `Some` replaces them.
    pub tag_slugs: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductRemoval {
    Deleted,
    /// Order lines still reference the product, so it was only deactivated.
    Deactivated,
}

#[async_trait]
pub trait CatalogWriteRepo: Send + Sync {
    async fn find_category_by_slug(&self, slug: &str)
    -> Result<Option<CategoryRecord>, RepoError>;

    async fn product_slug_exists(&self, slug: &str) -> Result<bool, RepoError>;

    async fn create_product(&self, params: CreateProductParams)
    -> Result<ProductRecord, RepoError>;

    async fn update_product(&self, params: UpdateProductParams)
    -> Result<ProductRecord, RepoError>;

    async fn remove_product(&self, id: Uuid) -> Result<ProductRemoval, RepoError>;
}

#[async_trait]
pub trait CartsRepo: Send + Sync {
    async fn find_open_cart(&self, owner: &CartOwner) -> Result<Option<CartRecord>, RepoError>;

    /// Return the owner's open cart, creating it when none exists.
    async fn open_cart(&self, owner: &CartOwner) -> Result<CartRecord, RepoError>;

    async fn find_cart(&self, id: Uuid) -> Result<Option<CartRecord>, RepoError>;

    async fn list_items(&self, cart_id: Uuid) -> Result<Vec<CartItemRecord>, RepoError>;

    /// Insert a line or add to the existing quantity. Returns the new quantity.
    async fn add_item(
        &self,
        cart_id: Uuid,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<u32, RepoError>;

    /// Returns `false` when the cart has no line for the product.
    async fn set_item_quantity(
        &self,
        cart_id: Uuid,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<bool, RepoError>;

    async fn remove_item(&self, cart_id: Uuid, product_id: Uuid) -> Result<bool, RepoError>;

    async fn clear_items(&self, cart_id: Uuid) -> Result<u64, RepoError>;
}

#[derive(Debug, Clone)]
pub struct PendingOrderParams {
    pub id: Uuid,
    pub order_number: String,
    pub owner: CartOwner,
    pub cart_id: Uuid,
    pub subtotal: Decimal,
    pub shipping_amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub lines: Vec<OrderLineRecord>,
}

/// A line the store could not reserve stock for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockShortfall {
    pub slug: String,
    pub requested: u32,
    pub available: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// The pending order now holds stock for every line.
    Reserved(OrderRecord),
    /// Nothing was written; an earlier reservation for the cart is left as it was.
    Short(StockShortfall),
}

#[derive(Debug, Clone)]
pub struct FinalizeOrderParams {
    pub order_id: Uuid,
    pub cart_id: Uuid,
    pub payment_reference: String,
}

#[async_trait]
pub trait OrdersRepo: Send + Sync {
    async fn find_order(&self, id: Uuid) -> Result<Option<OrderRecord>, RepoError>;

    async fn find_order_by_cart(&self, cart_id: Uuid) -> Result<Option<OrderRecord>, RepoError>;

    /// Newest first.
    async fn list_orders_for_owner(&self, owner: &CartOwner)
    -> Result<Vec<OrderRecord>, RepoError>;

    /// In one transaction: record the pending order for a cart and take its lines out
    /// of stock. A pending order that already exists for the cart keeps its id and
    /// number, gives back whatever it held, and has its lines and totals replaced.
    async fn reserve_pending_order(
        &self,
        params: PendingOrderParams,
    ) -> Result<Reservation, RepoError>;

    /// Return a pending order's reserved stock after a declined charge and move it to
    /// the next payment attempt.
    async fn release_pending_order(&self, order_id: Uuid) -> Result<OrderRecord, RepoError>;

    /// In one transaction: mark the order paid, check the cart out and empty it. The
    /// stock was taken when the order was reserved.
    async fn finalize_paid_order(
        &self,
        params: FinalizeOrderParams,
    ) -> Result<OrderRecord, RepoError>;

    /// Compare-and-set on the status column. `None` when the order is no longer in `from`.
    /// Cancelling a pending order gives its reserved stock back.
    async fn update_order_status(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<OrderRecord>, RepoError>;
}

#[async_trait]
pub trait StoreHealthRepo: Send + Sync {
    async fn ping(&self) -> Result<(), RepoError>;
}
