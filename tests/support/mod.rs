//! In-memory doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify, watch};
use uuid::Uuid;

use storefront::application::admin::AdminProductService;
use storefront::application::cart::CartService;
use storefront::application::catalog::{CatalogInvalidator, CatalogPolicy, CatalogService};
use storefront::application::checkout::CheckoutService;
use storefront::application::health::{HealthPolicy, HealthService, ProbeError, SystemProbe};
use storefront::application::locks::KeyedLocks;
use storefront::application::orders::OrderService;
use storefront::application::payments::{
    ChargeOutcome, ChargeRequest, PaymentError, PaymentGateway,
};
use storefront::application::repos::{
    CartsRepo, CatalogRepo, CatalogWriteRepo, CreateProductParams, FinalizeOrderParams,
    OrdersRepo, PendingOrderParams, ProductQuery, ProductRemoval, ProductSlice, RepoError,
    Reservation, ReviewSlice, StockShortfall, StoreHealthRepo, UpdateProductParams,
};
use storefront::cache::{CacheConfig, CacheError, CacheStore, Invalidation, MemoryCacheStore};
use storefront::domain::entities::{
    CartItemRecord, CartRecord, CategoryRecord, CategoryWithCount, OrderLineRecord, OrderRecord,
    ProductRecord, ReviewRecord, ReviewStats, TagRecord, TagWithCount,
};
use storefront::domain::pricing::PricingPolicy;
use storefront::domain::types::{CartOwner, CartState, OrderStatus, SortDirection, SortField};
use storefront::infra::http::{AdminToken, ApiState};

pub const ADMIN_TOKEN: &str = "test-admin-token";

pub fn money(value: &str) -> Decimal {
    value.parse().expect("valid decimal literal")
}

#[derive(Debug, Clone)]
struct CartLine {
    product_id: Uuid,
    quantity: u32,
    added_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
struct StoredReview {
    review: ReviewRecord,
    approved: bool,
}

#[derive(Default)]
struct StoreState {
    categories: Vec<CategoryRecord>,
    products: Vec<ProductRecord>,
    known_tags: Vec<TagRecord>,
    tags: HashMap<Uuid, Vec<TagRecord>>,
    reviews: Vec<StoredReview>,
    carts: HashMap<Uuid, CartRecord>,
    lines: HashMap<Uuid, Vec<CartLine>>,
    orders: HashMap<Uuid, OrderRecord>,
    /// Pending orders currently holding stock.
    reserved: HashSet<Uuid>,
}

impl StoreState {
    fn active_count(&self, include: impl Fn(&ProductRecord) -> bool) -> u64 {
        self.products
            .iter()
            .filter(|product| product.is_active && include(product))
            .count() as u64
    }

    fn tag_count(&self, tag: &TagRecord) -> u64 {
        self.active_count(|product| {
            self.tags
                .get(&product.id)
                .is_some_and(|tags| tags.iter().any(|candidate| candidate.slug == tag.slug))
        })
    }

    fn category_count(&self, category: &CategoryRecord) -> u64 {
        self.active_count(|product| product.category_id == category.id)
    }

    fn resolve_tags(&self, slugs: &[String]) -> Result<Vec<TagRecord>, RepoError> {
        slugs
            .iter()
            .map(|slug| {
                self.known_tags
                    .iter()
                    .find(|tag| &tag.slug == slug)
                    .cloned()
                    .ok_or_else(|| RepoError::InvalidInput {
                        message: "unknown tag slug".to_string(),
                    })
            })
            .collect()
    }

    fn adjust_stock(&mut self, lines: &[OrderLineRecord], give_back: bool) {
        for line in lines {
            if let Some(product) = self.products.iter_mut().find(|p| p.id == line.product_id) {
                if give_back {
                    product.stock_quantity += line.quantity;
                } else {
                    product.stock_quantity -= line.quantity;
                }
            }
        }
    }

    /// Give back whatever `order_id` holds. Returns whether it held anything.
    fn release(&mut self, order_id: Uuid) -> bool {
        if !self.reserved.remove(&order_id) {
            return false;
        }
        let lines = self
            .orders
            .get(&order_id)
            .map(|order| order.lines.clone())
            .unwrap_or_default();
        self.adjust_stock(&lines, true);
        true
    }
}

/// Store double implementing every repository trait.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    down: AtomicBool,
    list_queries: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent call fail like a lost connection.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Number of listing queries that reached the store.
    pub fn list_queries(&self) -> usize {
        self.list_queries.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), RepoError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(RepoError::Persistence("connection refused".to_string()));
        }
        Ok(())
    }

    pub async fn seed_category(&self, name: &str, slug: &str) -> CategoryRecord {
        let category = CategoryRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slug.to_string(),
            description: String::new(),
            is_active: true,
            created_at: OffsetDateTime::now_utc(),
        };
        self.state.lock().await.categories.push(category.clone());
        category
    }

    pub async fn seed_product(
        &self,
        category: &CategoryRecord,
        name: &str,
        price: &str,
        sale_price: Option<&str>,
        stock: u32,
    ) -> ProductRecord {
        let mut state = self.state.lock().await;
        let now = OffsetDateTime::now_utc();
        let product = ProductRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slug::slugify(name),
            description: format!("{name} description"),
            short_description: String::new(),
            price: money(price),
            sale_price: sale_price.map(money),
            stock_quantity: stock,
            category_id: category.id,
            category_name: category.name.clone(),
            category_slug: category.slug.clone(),
            is_active: true,
            is_featured: false,
            // Distinct timestamps keep the default newest-first order deterministic.
            created_at: now + time::Duration::milliseconds(state.products.len() as i64),
            updated_at: now,
        };
        state.products.push(product.clone());
        product
    }

    /// Register a tag without attaching it to anything.
    pub async fn create_tag(&self, name: &str) -> TagRecord {
        let mut state = self.state.lock().await;
        let slug = slug::slugify(name);
        if let Some(tag) = state.known_tags.iter().find(|tag| tag.slug == slug) {
            return tag.clone();
        }
        let tag = TagRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug,
        };
        state.known_tags.push(tag.clone());
        tag
    }

    pub async fn seed_tag(&self, product_id: Uuid, name: &str) {
        let tag = self.create_tag(name).await;
        self.state
            .lock()
            .await
            .tags
            .entry(product_id)
            .or_default()
            .push(tag);
    }

    /// Reviews are seeded oldest first, a minute apart.
    pub async fn seed_review(&self, product_id: Uuid, rating: u8, title: &str, approved: bool) {
        let mut state = self.state.lock().await;
        let created_at = OffsetDateTime::now_utc()
            + time::Duration::minutes(state.reviews.len() as i64);
        state.reviews.push(StoredReview {
            review: ReviewRecord {
                id: Uuid::new_v4(),
                product_id,
                user_id: Uuid::new_v4(),
                rating,
                title: title.to_string(),
                comment: String::new(),
                created_at,
            },
            approved,
        });
    }

    pub async fn set_stock(&self, product_id: Uuid, stock: u32) {
        let mut state = self.state.lock().await;
        if let Some(product) = state.products.iter_mut().find(|p| p.id == product_id) {
            product.stock_quantity = stock;
        }
    }

    pub async fn product(&self, id: Uuid) -> ProductRecord {
        self.state
            .lock()
            .await
            .products
            .iter()
            .find(|product| product.id == id)
            .cloned()
            .expect("seeded product")
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    fn cart_item(product: &ProductRecord, line: &CartLine) -> CartItemRecord {
        CartItemRecord {
            product_id: product.id,
            product_name: product.name.clone(),
            product_slug: product.slug.clone(),
            category_slug: product.category_slug.clone(),
            price: product.price,
            sale_price: product.sale_price,
            stock_quantity: product.stock_quantity,
            is_active: product.is_active,
            quantity: line.quantity,
            added_at: line.added_at,
        }
    }
}

fn matches_filter(product: &ProductRecord, tags: &[TagRecord], query: &ProductQuery) -> bool {
    let filter = &query.filter;
    if !filter.include_inactive && !product.is_active {
        return false;
    }
    if let Some(category) = filter.category.as_deref()
        && product.category_slug != category
    {
        return false;
    }
    if let Some(tag) = filter.tag.as_deref()
        && !tags.iter().any(|candidate| candidate.slug == tag)
    {
        return false;
    }
    if let Some(min) = filter.min_price
        && product.price < min
    {
        return false;
    }
    if let Some(max) = filter.max_price
        && product.price > max
    {
        return false;
    }
    if let Some(in_stock) = filter.in_stock
        && product.in_stock() != in_stock
    {
        return false;
    }
    if let Some(search) = filter.search.as_deref() {
        let needle = search.to_lowercase();
        let matches = |text: &str| text.to_lowercase().contains(&needle);
        if !matches(&product.name)
            && !matches(&product.description)
            && !matches(&product.short_description)
            && !matches(&product.category_name)
            && !tags.iter().any(|tag| matches(&tag.name))
        {
            return false;
        }
    }
    true
}

#[async_trait]
impl CatalogRepo for MemoryStore {
    async fn list_products(&self, query: &ProductQuery) -> Result<ProductSlice, RepoError> {
        self.check()?;
        self.list_queries.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().await;
        let mut items: Vec<ProductRecord> = state
            .products
            .iter()
            .filter(|product| {
                let tags = state.tags.get(&product.id).map_or(&[][..], Vec::as_slice);
                matches_filter(product, tags, query)
            })
            .cloned()
            .collect();

        items.sort_by(|a, b| {
            let primary = match query.sort.field {
                SortField::Name => a.name.cmp(&b.name),
                SortField::Price => a.price.cmp(&b.price),
                SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            };
            let primary = match query.sort.direction {
                SortDirection::Asc => primary,
                SortDirection::Desc => primary.reverse(),
            };
            primary.then_with(|| a.id.cmp(&b.id))
        });

        let total = items.len() as u64;
        let items = items
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect();
        Ok(ProductSlice { items, total })
    }

    async fn find_product_by_slug(&self, slug: &str) -> Result<Option<ProductRecord>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.products.iter().find(|p| p.slug == slug).cloned())
    }

    async fn find_product_by_id(&self, id: Uuid) -> Result<Option<ProductRecord>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.products.iter().find(|p| p.id == id).cloned())
    }

    async fn tags_for_product(&self, product_id: Uuid) -> Result<Vec<TagRecord>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.tags.get(&product_id).cloned().unwrap_or_default())
    }

    async fn review_stats(&self, product_id: Uuid) -> Result<ReviewStats, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        let ratings: Vec<u8> = state
            .reviews
            .iter()
            .filter(|stored| stored.approved && stored.review.product_id == product_id)
            .map(|stored| stored.review.rating)
            .collect();
        if ratings.is_empty() {
            return Ok(ReviewStats::default());
        }
        let sum: Decimal = ratings.iter().map(|rating| Decimal::from(*rating)).sum();
        Ok(ReviewStats {
            count: ratings.len() as u64,
            average_rating: Some((sum / Decimal::from(ratings.len())).round_dp(2)),
        })
    }

    async fn list_reviews(
        &self,
        product_id: Uuid,
        offset: u64,
        limit: u32,
    ) -> Result<ReviewSlice, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        let mut reviews: Vec<ReviewRecord> = state
            .reviews
            .iter()
            .filter(|stored| stored.approved && stored.review.product_id == product_id)
            .map(|stored| stored.review.clone())
            .collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        let total = reviews.len() as u64;
        let items = reviews
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(ReviewSlice { items, total })
    }

    async fn list_categories_with_counts(&self) -> Result<Vec<CategoryWithCount>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        let mut categories: Vec<CategoryWithCount> = state
            .categories
            .iter()
            .filter(|category| category.is_active)
            .map(|category| CategoryWithCount {
                category: category.clone(),
                product_count: state.category_count(category),
            })
            .collect();
        categories.sort_by(|a, b| a.category.name.cmp(&b.category.name));
        Ok(categories)
    }

    async fn find_category_with_count(
        &self,
        slug: &str,
    ) -> Result<Option<CategoryWithCount>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .categories
            .iter()
            .find(|category| category.is_active && category.slug == slug)
            .map(|category| CategoryWithCount {
                category: category.clone(),
                product_count: state.category_count(category),
            }))
    }

    async fn list_tags_with_counts(&self) -> Result<Vec<TagWithCount>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        let mut tags: Vec<TagWithCount> = state
            .known_tags
            .iter()
            .map(|tag| TagWithCount {
                tag: tag.clone(),
                product_count: state.tag_count(tag),
            })
            .filter(|entry| entry.product_count > 0)
            .collect();
        tags.sort_by(|a, b| {
            b.product_count
                .cmp(&a.product_count)
                .then_with(|| a.tag.name.cmp(&b.tag.name))
        });
        Ok(tags)
    }

    async fn find_tag_with_count(&self, slug: &str) -> Result<Option<TagWithCount>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .known_tags
            .iter()
            .find(|tag| tag.slug == slug)
            .map(|tag| TagWithCount {
                tag: tag.clone(),
                product_count: state.tag_count(tag),
            })
            .filter(|entry| entry.product_count > 0))
    }
}

#[async_trait]
impl CatalogWriteRepo for MemoryStore {
    async fn find_category_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<CategoryRecord>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.categories.iter().find(|c| c.slug == slug).cloned())
    }

    async fn product_slug_exists(&self, slug: &str) -> Result<bool, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.products.iter().any(|p| p.slug == slug))
    }

    async fn create_product(
        &self,
        params: CreateProductParams,
    ) -> Result<ProductRecord, RepoError> {
        self.check()?;
        let mut state = self.state.lock().await;
        if state.products.iter().any(|p| p.slug == params.slug) {
            return Err(RepoError::Duplicate {
                constraint: "products_slug_key".to_string(),
            });
        }
        let category = state
            .categories
            .iter()
            .find(|c| c.id == params.category_id)
            .cloned()
            .ok_or(RepoError::NotFound)?;
        let now = OffsetDateTime::now_utc();
        let product = ProductRecord {
            id: Uuid::new_v4(),
            name: params.name,
            slug: params.slug,
            description: params.description,
            short_description: params.short_description,
            price: params.price,
            sale_price: params.sale_price,
            stock_quantity: params.stock_quantity,
            category_id: category.id,
            category_name: category.name,
            category_slug: category.slug,
            is_active: params.is_active,
            is_featured: params.is_featured,
            created_at: now,
            updated_at: now,
        };
        let tags = state.resolve_tags(&params.tag_slugs)?;
        state.tags.insert(product.id, tags);
        state.products.push(product.clone());
        Ok(product)
    }

    async fn update_product(
        &self,
        params: UpdateProductParams,
    ) -> Result<ProductRecord, RepoError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let category = state
            .categories
            .iter()
            .find(|c| c.id == params.category_id)
            .cloned()
            .ok_or(RepoError::NotFound)?;
        let tags = params
            .tag_slugs
            .as_deref()
            .map(|slugs| state.resolve_tags(slugs))
            .transpose()?;
        let product = state
            .products
            .iter_mut()
            .find(|p| p.id == params.id)
            .ok_or(RepoError::NotFound)?;
        product.name = params.name;
        product.description = params.description;
        product.short_description = params.short_description;
        product.price = params.price;
        product.sale_price = params.sale_price;
        product.stock_quantity = params.stock_quantity;
        product.category_id = category.id;
        product.category_name = category.name;
        product.category_slug = category.slug;
        product.is_active = params.is_active;
        product.is_featured = params.is_featured;
        product.updated_at = OffsetDateTime::now_utc();
        let product = product.clone();
        if let Some(tags) = tags {
            state.tags.insert(product.id, tags);
        }
        Ok(product)
    }

    async fn remove_product(&self, id: Uuid) -> Result<ProductRemoval, RepoError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let referenced = state
            .orders
            .values()
            .any(|order| order.lines.iter().any(|line| line.product_id == id));
        if referenced {
            let product = state
                .products
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or(RepoError::NotFound)?;
            product.is_active = false;
            return Ok(ProductRemoval::Deactivated);
        }
        let before = state.products.len();
        state.products.retain(|p| p.id != id);
        if state.products.len() == before {
            return Err(RepoError::NotFound);
        }
        for lines in state.lines.values_mut() {
            lines.retain(|line| line.product_id != id);
        }
        Ok(ProductRemoval::Deleted)
    }
}

#[async_trait]
impl CartsRepo for MemoryStore {
    async fn find_open_cart(&self, owner: &CartOwner) -> Result<Option<CartRecord>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .carts
            .values()
            .find(|cart| &cart.owner == owner && cart.state == CartState::Open)
            .cloned())
    }

    async fn open_cart(&self, owner: &CartOwner) -> Result<CartRecord, RepoError> {
        self.check()?;
        let mut state = self.state.lock().await;
        if let Some(cart) = state
            .carts
            .values()
            .find(|cart| &cart.owner == owner && cart.state == CartState::Open)
        {
            return Ok(cart.clone());
        }
        let now = OffsetDateTime::now_utc();
        let cart = CartRecord {
            id: Uuid::new_v4(),
            owner: owner.clone(),
            state: CartState::Open,
            created_at: now,
            updated_at: now,
        };
        state.carts.insert(cart.id, cart.clone());
        Ok(cart)
    }

    async fn find_cart(&self, id: Uuid) -> Result<Option<CartRecord>, RepoError> {
        self.check()?;
        Ok(self.state.lock().await.carts.get(&id).cloned())
    }

    async fn list_items(&self, cart_id: Uuid) -> Result<Vec<CartItemRecord>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        let lines = state.lines.get(&cart_id).cloned().unwrap_or_default();
        lines
            .iter()
            .map(|line| {
                state
                    .products
                    .iter()
                    .find(|p| p.id == line.product_id)
                    .map(|product| Self::cart_item(product, line))
                    .ok_or(RepoError::Integrity {
                        message: "cart line without product".to_string(),
                    })
            })
            .collect()
    }

    async fn add_item(
        &self,
        cart_id: Uuid,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<u32, RepoError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let lines = state.lines.entry(cart_id).or_default();
        if let Some(line) = lines.iter_mut().find(|line| line.product_id == product_id) {
            line.quantity += quantity;
            return Ok(line.quantity);
        }
        lines.push(CartLine {
            product_id,
            quantity,
            added_at: OffsetDateTime::now_utc(),
        });
        Ok(quantity)
    }

    async fn set_item_quantity(
        &self,
        cart_id: Uuid,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<bool, RepoError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let line = state
            .lines
            .get_mut(&cart_id)
            .and_then(|lines| lines.iter_mut().find(|line| line.product_id == product_id));
        match line {
            Some(line) => {
                line.quantity = quantity;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_item(&self, cart_id: Uuid, product_id: Uuid) -> Result<bool, RepoError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let Some(lines) = state.lines.get_mut(&cart_id) else {
            return Ok(false);
        };
        let before = lines.len();
        lines.retain(|line| line.product_id != product_id);
        Ok(lines.len() < before)
    }

    async fn clear_items(&self, cart_id: Uuid) -> Result<u64, RepoError> {
        self.check()?;
        let mut state = self.state.lock().await;
        Ok(state
            .lines
            .remove(&cart_id)
            .map_or(0, |lines| lines.len() as u64))
    }
}

#[async_trait]
impl OrdersRepo for MemoryStore {
    async fn find_order(&self, id: Uuid) -> Result<Option<OrderRecord>, RepoError> {
        self.check()?;
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn find_order_by_cart(&self, cart_id: Uuid) -> Result<Option<OrderRecord>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .find(|order| order.cart_id == cart_id)
            .cloned())
    }

    async fn list_orders_for_owner(
        &self,
        owner: &CartOwner,
    ) -> Result<Vec<OrderRecord>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        let mut orders: Vec<OrderRecord> = state
            .orders
            .values()
            .filter(|order| &order.owner == owner)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(orders)
    }

    async fn reserve_pending_order(
        &self,
        params: PendingOrderParams,
    ) -> Result<Reservation, RepoError> {
        self.check()?;
        let mut state = self.state.lock().await;
        match state.carts.get(&params.cart_id) {
            Some(cart) if cart.state == CartState::Open => {}
            Some(_) => {
                return Err(RepoError::Integrity {
                    message: "cart is already checked out".to_string(),
                });
            }
            None => return Err(RepoError::NotFound),
        }

        let existing = state
            .orders
            .values()
            .find(|order| order.cart_id == params.cart_id)
            .cloned();
        if let Some(order) = &existing
            && order.status != OrderStatus::Pending
        {
            return Err(RepoError::Integrity {
                message: "order is already settled".to_string(),
            });
        }

        // Work on a copy so a shortfall leaves the old reservation untouched.
        let mut stock: HashMap<Uuid, u32> = state
            .products
            .iter()
            .map(|product| (product.id, product.stock_quantity))
            .collect();
        if let Some(order) = &existing
            && state.reserved.contains(&order.id)
        {
            for line in &order.lines {
                *stock.entry(line.product_id).or_default() += line.quantity;
            }
        }
        for line in &params.lines {
            let available = stock.get(&line.product_id).copied().unwrap_or(0);
            if available < line.quantity {
                return Ok(Reservation::Short(StockShortfall {
                    slug: line.product_slug.clone(),
                    requested: line.quantity,
                    available,
                }));
            }
            stock.insert(line.product_id, available - line.quantity);
        }
        for product in state.products.iter_mut() {
            if let Some(left) = stock.get(&product.id) {
                product.stock_quantity = *left;
            }
        }

        let now = OffsetDateTime::now_utc();
        let order = match existing {
            Some(mut order) => {
                if order.total_amount != params.total_amount {
                    order.payment_attempt += 1;
                }
                order.subtotal = params.subtotal;
                order.shipping_amount = params.shipping_amount;
                order.tax_amount = params.tax_amount;
                order.total_amount = params.total_amount;
                order.lines = params.lines;
                order.updated_at = now;
                order
            }
            None => OrderRecord {
                id: params.id,
                order_number: params.order_number,
                owner: params.owner,
                cart_id: params.cart_id,
                status: OrderStatus::Pending,
                subtotal: params.subtotal,
                shipping_amount: params.shipping_amount,
                tax_amount: params.tax_amount,
                total_amount: params.total_amount,
                payment_reference: None,
                payment_attempt: 1,
                lines: params.lines,
                created_at: now,
                updated_at: now,
            },
        };
        state.reserved.insert(order.id);
        state.orders.insert(order.id, order.clone());
        Ok(Reservation::Reserved(order))
    }

    async fn release_pending_order(&self, order_id: Uuid) -> Result<OrderRecord, RepoError> {
        self.check()?;
        let mut state = self.state.lock().await;
        match state.orders.get(&order_id) {
            Some(order) if order.status == OrderStatus::Pending => {}
            Some(_) => {
                return Err(RepoError::Integrity {
                    message: "order is not pending".to_string(),
                });
            }
            None => return Err(RepoError::NotFound),
        }
        state.release(order_id);
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(RepoError::NotFound)?;
        order.payment_attempt += 1;
        order.updated_at = OffsetDateTime::now_utc();
        Ok(order.clone())
    }

    async fn finalize_paid_order(
        &self,
        params: FinalizeOrderParams,
    ) -> Result<OrderRecord, RepoError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let pending = state
            .orders
            .get(&params.order_id)
            .is_some_and(|order| order.status == OrderStatus::Pending);
        if !pending || !state.reserved.remove(&params.order_id) {
            return Err(RepoError::Integrity {
                message: "order holds no reservation".to_string(),
            });
        }
        if let Some(cart) = state.carts.get_mut(&params.cart_id) {
            cart.state = CartState::CheckedOut;
        }
        state.lines.remove(&params.cart_id);

        let paid = state
            .orders
            .get_mut(&params.order_id)
            .ok_or(RepoError::NotFound)?;
        paid.status = OrderStatus::Paid;
        paid.payment_reference = Some(params.payment_reference);
        Ok(paid.clone())
    }

    async fn update_order_status(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<OrderRecord>, RepoError> {
        self.check()?;
        let mut state = self.state.lock().await;
        if state.orders.get(&id).is_none_or(|order| order.status != from) {
            return Ok(None);
        }
        if from == OrderStatus::Pending {
            if to == OrderStatus::Cancelled {
                state.release(id);
            } else {
                state.reserved.remove(&id);
            }
        }
        Ok(state.orders.get_mut(&id).map(|order| {
            order.status = to;
            order.clone()
        }))
    }
}

#[async_trait]
impl StoreHealthRepo for MemoryStore {
    async fn ping(&self) -> Result<(), RepoError> {
        self.check()
    }
}

/// Cache whose every operation fails.
#[derive(Debug, Default)]
pub struct FailingCache;

#[async_trait]
impl CacheStore for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>, CacheError> {
        Err(CacheError::Unavailable("connection reset".to_string()))
    }

    async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection reset".to_string()))
    }

    async fn invalidate(&self, _target: &Invalidation) -> Result<u64, CacheError> {
        Err(CacheError::Unavailable("connection reset".to_string()))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection reset".to_string()))
    }
}

/// Gateway that replays queued outcomes, approving once the queue is empty.
///
/// `hold` parks every charge until `open`, which lets a test act while a
/// checkout is mid-charge.
pub struct ScriptedGateway {
    script: std::sync::Mutex<VecDeque<Result<ChargeOutcome, PaymentError>>>,
    charges: std::sync::Mutex<Vec<ChargeRequest>>,
    gate: watch::Sender<bool>,
    entered: Notify,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(true);
        Arc::new(Self {
            script: std::sync::Mutex::default(),
            charges: std::sync::Mutex::default(),
            gate,
            entered: Notify::new(),
        })
    }

    pub fn push(&self, outcome: Result<ChargeOutcome, PaymentError>) {
        self.script
            .lock()
            .expect("script lock")
            .push_back(outcome);
    }

    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().expect("charges lock").clone()
    }

    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    /// Resolves once a charge has reached the gateway.
    pub async fn charge_started(&self) {
        self.entered.notified().await;
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, PaymentError> {
        self.charges
            .lock()
            .expect("charges lock")
            .push(request.clone());
        self.entered.notify_one();
        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open).await.expect("gate sender");
        let next = self.script.lock().expect("script lock").pop_front();
        next.unwrap_or_else(|| {
            Ok(ChargeOutcome::Approved {
                reference: format!("pay-{}", request.idempotency_key),
            })
        })
    }
}

/// Host probe with fixed readings.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe {
    pub disk_percent: f64,
    pub memory_mb: u64,
}

impl Default for FixedProbe {
    fn default() -> Self {
        Self {
            disk_percent: 40.0,
            memory_mb: 4096,
        }
    }
}

#[async_trait]
impl SystemProbe for FixedProbe {
    async fn disk_usage_percent(&self, _path: &Path) -> Result<f64, ProbeError> {
        Ok(self.disk_percent)
    }

    async fn available_memory_mb(&self) -> Result<u64, ProbeError> {
        Ok(self.memory_mb)
    }
}

pub fn memory_cache() -> Arc<dyn CacheStore> {
    Arc::new(MemoryCacheStore::new(&CacheConfig::default()))
}

/// Everything a test needs to drive the services or the router.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub cache: Arc<dyn CacheStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub state: ApiState,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_cache(memory_cache())
    }

    pub fn with_cache(cache: Arc<dyn CacheStore>) -> Self {
        Self::build(cache, FixedProbe::default(), Some(ADMIN_TOKEN))
    }

    pub fn build(
        cache: Arc<dyn CacheStore>,
        probe: FixedProbe,
        admin_token: Option<&str>,
    ) -> Self {
        let store = MemoryStore::new();
        let gateway = ScriptedGateway::new();
        let policy = CatalogPolicy::default();
        let invalidator = CatalogInvalidator::new(cache.clone(), policy.cache_timeout);
        let locks = Arc::new(KeyedLocks::new());

        let state = ApiState {
            catalog: Arc::new(CatalogService::new(store.clone(), cache.clone(), policy)),
            carts: Arc::new(CartService::new(store.clone(), store.clone(), locks.clone())),
            checkout: Arc::new(CheckoutService::new(
                store.clone(),
                store.clone(),
                gateway.clone(),
                locks,
                invalidator.clone(),
                PricingPolicy::default(),
                "USD",
            )),
            orders: Arc::new(OrderService::new(store.clone(), invalidator.clone())),
            admin_products: Arc::new(AdminProductService::new(
                store.clone(),
                store.clone(),
                invalidator,
            )),
            health: Arc::new(HealthService::new(
                store.clone(),
                cache.clone(),
                Arc::new(probe),
                HealthPolicy::default(),
            )),
            admin_token: admin_token.map(|token| Arc::new(AdminToken::new(token))),
        };

        Self {
            store,
            cache,
            gateway,
            state,
        }
    }
}
