//! Shopping cart operations.

use std::sync::Arc;

use storefront_api_types::CartResponse;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::application::dto;
use crate::application::locks::KeyedLocks;
use crate::application::repos::{CartsRepo, CatalogRepo, RepoError};
use crate::domain::entities::{CartRecord, ProductRecord};
use crate::domain::types::{CartOwner, CartState};

/// Largest quantity a single cart line may hold.
pub const MAX_LINE_QUANTITY: u32 = 10_000;

const OPEN_CART_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum CartError {
    #[error("`quantity` is out of range: {0}")]
    OutOfRange(String),
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("only {available} of `{slug}` in stock, {requested} requested")]
    OutOfStock {
        slug: String,
        requested: u64,
        available: u32,
    },
    #[error(transparent)]
    Repo(#[from] RepoError),
}

pub struct CartService {
    carts: Arc<dyn CartsRepo>,
    catalog: Arc<dyn CatalogRepo>,
    locks: Arc<KeyedLocks>,
}

impl CartService {
    pub fn new(
        carts: Arc<dyn CartsRepo>,
        catalog: Arc<dyn CatalogRepo>,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            carts,
            catalog,
            locks,
        }
    }

    pub async fn view(&self, owner: &CartOwner) -> Result<CartResponse, CartError> {
        match self.carts.find_open_cart(owner).await? {
            Some(cart) => self.render(&cart).await,
            None => Ok(dto::cart_response(None, &[])),
        }
    }

    /// Add `quantity` of a product, merging into an existing line.
    pub async fn add_item(
        &self,
        owner: &CartOwner,
        product_id: Uuid,
        quantity: i64,
    ) -> Result<CartResponse, CartError> {
        let quantity = line_quantity(quantity, 1)?;
        let product = self.active_product(product_id).await?;
        let (cart, _guard) = self.lock_open_cart(owner).await?;

        let existing = self
            .carts
            .list_items(cart.id)
            .await?
            .iter()
            .find(|item| item.product_id == product_id)
            .map_or(0, |item| item.quantity);
        let merged = u64::from(existing) + u64::from(quantity);
        ensure_stock(&product, merged)?;
        if merged > u64::from(MAX_LINE_QUANTITY) {
            return Err(CartError::OutOfRange(format!(
                "a line may hold at most {MAX_LINE_QUANTITY} units"
            )));
        }

        self.carts.add_item(cart.id, product_id, quantity).await?;
        self.render(&cart).await
    }

    /// Set a line's quantity; zero removes the line.
    pub async fn update_item(
        &self,
        owner: &CartOwner,
        product_id: Uuid,
        quantity: i64,
    ) -> Result<CartResponse, CartError> {
        let quantity = line_quantity(quantity, 0)?;
        if quantity == 0 {
            return self.remove_item(owner, product_id).await;
        }

        let product = self.active_product(product_id).await?;
        let (cart, _guard) = self.lock_existing_cart(owner).await?;
        ensure_stock(&product, u64::from(quantity))?;
        if !self
            .carts
            .set_item_quantity(cart.id, product_id, quantity)
            .await?
        {
            return Err(CartError::NotFound {
                entity: "cart item",
            });
        }
        self.render(&cart).await
    }

    pub async fn remove_item(
        &self,
        owner: &CartOwner,
        product_id: Uuid,
    ) -> Result<CartResponse, CartError> {
        let (cart, _guard) = self.lock_existing_cart(owner).await?;
        if !self.carts.remove_item(cart.id, product_id).await? {
            return Err(CartError::NotFound {
                entity: "cart item",
            });
        }
        self.render(&cart).await
    }

    /// Units across all lines of the open cart; zero without one.
    pub async fn count(&self, owner: &CartOwner) -> Result<u64, CartError> {
        let Some(cart) = self.carts.find_open_cart(owner).await? else {
            return Ok(0);
        };
        let items = self.carts.list_items(cart.id).await?;
        Ok(items.iter().map(|item| u64::from(item.quantity)).sum())
    }

    /// Empty the open cart. Owners without one, including those whose cart was
    /// checked out while waiting for the lock, get an empty view.
    pub async fn clear(&self, owner: &CartOwner) -> Result<CartResponse, CartError> {
        let (cart, _guard) = match self.lock_existing_cart(owner).await {
            Ok(locked) => locked,
            Err(CartError::NotFound { entity: "cart" }) => {
                return Ok(dto::cart_response(None, &[]));
            }
            Err(err) => return Err(err),
        };
        self.carts.clear_items(cart.id).await?;
        self.render(&cart).await
    }

    async fn render(&self, cart: &CartRecord) -> Result<CartResponse, CartError> {
        let items = self.carts.list_items(cart.id).await?;
        Ok(dto::cart_response(Some(cart), &items))
    }

    async fn active_product(&self, product_id: Uuid) -> Result<ProductRecord, CartError> {
        self.catalog
            .find_product_by_id(product_id)
            .await?
            .filter(|product| product.is_active)
            .ok_or(CartError::NotFound { entity: "product" })
    }

    /// Open (or create) the owner's cart and hold its lock.
    ///
    /// A checkout can close the cart between lookup and locking; the lookup is
    /// retried so the caller always ends up holding an open cart.
    async fn lock_open_cart(
        &self,
        owner: &CartOwner,
    ) -> Result<(CartRecord, OwnedMutexGuard<()>), CartError> {
        for _ in 0..OPEN_CART_ATTEMPTS {
            let cart = self.carts.open_cart(owner).await?;
            let guard = self.locks.lock(cart.id).await;
            if self.still_open(cart.id).await? {
                return Ok((cart, guard));
            }
        }
        Err(CartError::Repo(RepoError::Integrity {
            message: "cart kept closing while being opened".to_string(),
        }))
    }

    async fn lock_existing_cart(
        &self,
        owner: &CartOwner,
    ) -> Result<(CartRecord, OwnedMutexGuard<()>), CartError> {
        let cart = self
            .carts
            .find_open_cart(owner)
            .await?
            .ok_or(CartError::NotFound { entity: "cart" })?;
        let guard = self.locks.lock(cart.id).await;
        if !self.still_open(cart.id).await? {
            return Err(CartError::NotFound { entity: "cart" });
        }
        Ok((cart, guard))
    }

    async fn still_open(&self, cart_id: Uuid) -> Result<bool, CartError> {
        Ok(matches!(
            self.carts.find_cart(cart_id).await?,
            Some(CartRecord {
                state: CartState::Open,
                ..
            })
        ))
    }
}

fn line_quantity(raw: i64, min: u32) -> Result<u32, CartError> {
    if raw < i64::from(min) {
        return Err(CartError::OutOfRange(format!("must be at least {min}")));
    }
    u32::try_from(raw)
        .ok()
        .filter(|quantity| *quantity <= MAX_LINE_QUANTITY)
        .ok_or_else(|| CartError::OutOfRange(format!("must be at most {MAX_LINE_QUANTITY}")))
}

fn ensure_stock(product: &ProductRecord, requested: u64) -> Result<(), CartError> {
    if requested > u64::from(product.stock_quantity) {
        return Err(CartError::OutOfStock {
            slug: product.slug.clone(),
            requested,
            available: product.stock_quantity,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_bounds() {
        assert!(matches!(line_quantity(0, 1), Err(CartError::OutOfRange(_))));
        assert!(matches!(line_quantity(-3, 0), Err(CartError::OutOfRange(_))));
        assert_eq!(line_quantity(0, 0).expect("zero allowed"), 0);
        assert_eq!(line_quantity(5, 1).expect("in range"), 5);
        assert!(matches!(
            line_quantity(i64::from(MAX_LINE_QUANTITY) + 1, 1),
            Err(CartError::OutOfRange(_))
        ));
    }
}
