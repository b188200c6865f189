use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Executor, Postgres};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{CartsRepo, RepoError},
    domain::{
        entities::{CartItemRecord, CartRecord},
        types::{CartOwner, CartState},
    },
};

use super::{
    PostgresRepositories, map_sqlx_error,
    util::{quantity_from_db, quantity_to_db},
};

const CART_COLUMNS: &str = "id, owner_user_id, owner_session_key, state, created_at, updated_at";

#[derive(sqlx::FromRow)]
pub(super) struct CartRow {
    id: Uuid,
    owner_user_id: Option<Uuid>,
    owner_session_key: Option<String>,
    state: CartState,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<CartRow> for CartRecord {
    type Error = RepoError;

    fn try_from(row: CartRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            owner: CartOwner::from_columns(row.owner_user_id, row.owner_session_key).map_err(
                |err| RepoError::Integrity {
                    message: err.to_string(),
                },
            )?,
            state: row.state,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct CartItemRow {
    product_id: Uuid,
    product_name: String,
    product_slug: String,
    category_slug: String,
    price: Decimal,
    sale_price: Option<Decimal>,
    stock_quantity: i32,
    is_active: bool,
    quantity: i32,
    added_at: OffsetDateTime,
}

impl TryFrom<CartItemRow> for CartItemRecord {
    type Error = RepoError;

    fn try_from(row: CartItemRow) -> Result<Self, Self::Error> {
        Ok(Self {
            product_id: row.product_id,
            product_name: row.product_name,
            product_slug: row.product_slug,
            category_slug: row.category_slug,
            price: row.price,
            sale_price: row.sale_price,
            stock_quantity: quantity_from_db(row.stock_quantity)?,
            is_active: row.is_active,
            quantity: quantity_from_db(row.quantity)?,
            added_at: row.added_at,
        })
    }
}

/// Owner predicate on a table carrying the two owner columns.
pub(super) fn owner_clause(owner: &CartOwner) -> &'static str {
    match owner {
        CartOwner::User(_) => "owner_user_id = $1",
        CartOwner::Session(_) => "owner_session_key = $1",
    }
}

impl PostgresRepositories {
    pub(super) async fn load_cart_items<'e, E>(
        executor: E,
        cart_id: Uuid,
    ) -> Result<Vec<CartItemRecord>, RepoError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let rows = sqlx::query_as::<_, CartItemRow>(
            r#"
            SELECT
                ci.product_id,
                p.name AS product_name,
                p.slug AS product_slug,
                c.slug AS category_slug,
                p.price,
                p.sale_price,
                p.stock_quantity,
                p.is_active,
                ci.quantity,
                ci.added_at
            FROM cart_items ci
            INNER JOIN products p ON p.id = ci.product_id
            INNER JOIN categories c ON c.id = p.category_id
            WHERE ci.cart_id = $1
            ORDER BY ci.added_at ASC, ci.product_id ASC
            "#,
        )
        .bind(cart_id)
        .fetch_all(executor)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(CartItemRecord::try_from).collect()
    }

    async fn touch_cart(&self, cart_id: Uuid) -> Result<(), RepoError> {
        sqlx::query("UPDATE carts SET updated_at = now() WHERE id = $1")
            .bind(cart_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl CartsRepo for PostgresRepositories {
    async fn find_open_cart(&self, owner: &CartOwner) -> Result<Option<CartRecord>, RepoError> {
        let sql = format!(
            "SELECT {CART_COLUMNS} FROM carts WHERE state = 'open' AND {}",
            owner_clause(owner)
        );
        let query = sqlx::query_as::<_, CartRow>(&sql);
        let query = match owner {
            CartOwner::User(id) => query.bind(*id),
            CartOwner::Session(key) => query.bind(key.as_str()),
        };
        let row = query
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        row.map(CartRecord::try_from).transpose()
    }

    async fn open_cart(&self, owner: &CartOwner) -> Result<CartRecord, RepoError> {
        // The partial unique indexes allow one open cart per owner; a concurrent
        // insert makes ours a no-op and the existing cart is read back instead.
        for _ in 0..2 {
            let inserted = sqlx::query_as::<_, CartRow>(&format!(
                "INSERT INTO carts (owner_user_id, owner_session_key) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING RETURNING {CART_COLUMNS}"
            ))
            .bind(owner.user_id())
            .bind(owner.session_key())
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
            if let Some(row) = inserted {
                return row.try_into();
            }
            if let Some(cart) = self.find_open_cart(owner).await? {
                return Ok(cart);
            }
        }
        Err(RepoError::Integrity {
            message: format!("could not open a cart for {}", owner.label()),
        })
    }

    async fn find_cart(&self, id: Uuid) -> Result<Option<CartRecord>, RepoError> {
        let row = sqlx::query_as::<_, CartRow>(&format!(
            "SELECT {CART_COLUMNS} FROM carts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        row.map(CartRecord::try_from).transpose()
    }

    async fn list_items(&self, cart_id: Uuid) -> Result<Vec<CartItemRecord>, RepoError> {
        Self::load_cart_items(self.pool(), cart_id).await
    }

    async fn add_item(
        &self,
        cart_id: Uuid,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<u32, RepoError> {
        let merged: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO cart_items (cart_id, product_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (cart_id, product_id)
            DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
            RETURNING quantity
            "#,
        )
        .bind(cart_id)
        .bind(product_id)
        .bind(quantity_to_db(quantity)?)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        self.touch_cart(cart_id).await?;
        quantity_from_db(merged)
    }

    async fn set_item_quantity(
        &self,
        cart_id: Uuid,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE cart_items SET quantity = $3 WHERE cart_id = $1 AND product_id = $2",
        )
        .bind(cart_id)
        .bind(product_id)
        .bind(quantity_to_db(quantity)?)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let updated = result.rows_affected() > 0;
        if updated {
            self.touch_cart(cart_id).await?;
        }
        Ok(updated)
    }

    async fn remove_item(&self, cart_id: Uuid, product_id: Uuid) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1 AND product_id = $2")
            .bind(cart_id)
            .bind(product_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let removed = result.rows_affected() > 0;
        if removed {
            self.touch_cart(cart_id).await?;
        }
        Ok(removed)
    }

    async fn clear_items(&self, cart_id: Uuid) -> Result<u64, RepoError> {
        let result = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        self.touch_cart(cart_id).await?;
        Ok(result.rows_affected())
    }
}
