use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Executor, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{
        FinalizeOrderParams, OrdersRepo, PendingOrderParams, RepoError, Reservation,
        StockShortfall,
    },
    domain::{
        entities::{OrderLineRecord, OrderRecord},
        types::{CartOwner, CartState, OrderStatus},
    },
};

use super::{
    PostgresRepositories,
    carts::owner_clause,
    map_sqlx_error,
    util::{quantity_from_db, quantity_to_db},
};

const ORDER_COLUMNS: &str = "id, order_number, owner_user_id, owner_session_key, cart_id, status, \
    subtotal, shipping_amount, tax_amount, total_amount, payment_reference, payment_attempt, \
    created_at, updated_at";

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    owner_user_id: Option<Uuid>,
    owner_session_key: Option<String>,
    cart_id: Uuid,
    status: OrderStatus,
    subtotal: Decimal,
    shipping_amount: Decimal,
    tax_amount: Decimal,
    total_amount: Decimal,
    payment_reference: Option<String>,
    payment_attempt: i32,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

#[derive(sqlx::FromRow)]
struct OrderLineRow {
    order_id: Uuid,
    product_id: Uuid,
    product_name: String,
    product_slug: String,
    unit_price: Decimal,
    quantity: i32,
    line_total: Decimal,
}

fn integrity(message: impl Into<String>) -> RepoError {
    RepoError::Integrity {
        message: message.into(),
    }
}

impl PostgresRepositories {
    /// Attach lines to order rows, preserving row order.
    async fn hydrate_orders<'e, E>(
        executor: E,
        rows: Vec<OrderRow>,
    ) -> Result<Vec<OrderRecord>, RepoError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let line_rows = sqlx::query_as::<_, OrderLineRow>(
            r#"
            SELECT order_id, product_id, product_name, product_slug, unit_price, quantity, line_total
            FROM order_lines
            WHERE order_id = ANY($1)
            ORDER BY order_id, position
            "#,
        )
        .bind(&ids)
        .fetch_all(executor)
        .await
        .map_err(map_sqlx_error)?;

        let mut lines: HashMap<Uuid, Vec<OrderLineRecord>> = HashMap::new();
        for line in line_rows {
            lines.entry(line.order_id).or_default().push(OrderLineRecord {
                product_id: line.product_id,
                product_name: line.product_name,
                product_slug: line.product_slug,
                unit_price: line.unit_price,
                quantity: quantity_from_db(line.quantity)?,
                line_total: line.line_total,
            });
        }

        rows.into_iter()
            .map(|row| {
                Ok(OrderRecord {
                    id: row.id,
                    order_number: row.order_number,
                    owner: CartOwner::from_columns(row.owner_user_id, row.owner_session_key)
                        .map_err(|err| integrity(err.to_string()))?,
                    cart_id: row.cart_id,
                    status: row.status,
                    subtotal: row.subtotal,
                    shipping_amount: row.shipping_amount,
                    tax_amount: row.tax_amount,
                    total_amount: row.total_amount,
                    payment_reference: row.payment_reference,
                    payment_attempt: quantity_from_db(row.payment_attempt)?,
                    lines: lines.remove(&row.id).unwrap_or_default(),
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                })
            })
            .collect()
    }

    async fn fetch_order_where(
        &self,
        predicate: &str,
        value: Uuid,
    ) -> Result<Option<OrderRecord>, RepoError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE {predicate}"
        ))
        .bind(value)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Self::hydrate_orders(self.pool(), vec![row]).await?.pop())
    }

    async fn lock_open_cart_row(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        cart_id: Uuid,
    ) -> Result<(), RepoError> {
        let state: CartState =
            sqlx::query_scalar("SELECT state FROM carts WHERE id = $1 FOR UPDATE")
                .bind(cart_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_sqlx_error)?
                .ok_or(RepoError::NotFound)?;
        if state != CartState::Open {
            return Err(integrity(format!("cart {cart_id} is already checked out")));
        }
        Ok(())
    }

    /// Status and reservation flag of an order, locked for the transaction.
    async fn lock_order_row(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        predicate: &str,
        value: Uuid,
    ) -> Result<Option<(Uuid, OrderStatus, bool)>, RepoError> {
        sqlx::query_as(&format!(
            "SELECT id, status, stock_reserved FROM orders WHERE {predicate} FOR UPDATE"
        ))
        .bind(value)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_error)
    }

    /// Lock product rows in id order so concurrent checkouts cannot deadlock.
    async fn lock_stock(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        product_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, (String, u32)>, RepoError> {
        let rows: Vec<(Uuid, String, i32)> = sqlx::query_as(
            "SELECT id, slug, stock_quantity FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(product_ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter()
            .map(|(id, slug, stock)| Ok((id, (slug, quantity_from_db(stock)?))))
            .collect()
    }

    async fn reserved_lines(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        order_id: Uuid,
    ) -> Result<Vec<(Uuid, u32)>, RepoError> {
        let rows: Vec<(Uuid, i32)> =
            sqlx::query_as("SELECT product_id, quantity FROM order_lines WHERE order_id = $1")
                .bind(order_id)
                .fetch_all(&mut **tx)
                .await
                .map_err(map_sqlx_error)?;
        rows.into_iter()
            .map(|(id, quantity)| Ok((id, quantity_from_db(quantity)?)))
            .collect()
    }

    async fn write_stock(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        stock: &HashMap<Uuid, u32>,
    ) -> Result<(), RepoError> {
        let mut ids = Vec::with_capacity(stock.len());
        let mut levels = Vec::with_capacity(stock.len());
        for (id, level) in stock {
            ids.push(*id);
            levels.push(quantity_to_db(*level)?);
        }
        sqlx::query(
            r#"
            UPDATE products p
            SET stock_quantity = v.stock, updated_at = now()
            FROM UNNEST($1::uuid[], $2::int4[]) AS v(id, stock)
            WHERE p.id = v.id AND p.stock_quantity <> v.stock
            "#,
        )
        .bind(&ids)
        .bind(&levels)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Put a reserved order's lines back on the shelf.
    async fn give_back_stock(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        order_id: Uuid,
    ) -> Result<(), RepoError> {
        let lines = Self::reserved_lines(tx, order_id).await?;
        let ids: Vec<Uuid> = lines.iter().map(|(id, _)| *id).collect();
        let mut stock: HashMap<Uuid, u32> = Self::lock_stock(tx, &ids)
            .await?
            .into_iter()
            .map(|(id, (_, level))| (id, level))
            .collect();
        for (id, quantity) in lines {
            let level = stock.entry(id).or_default();
            *level = level.saturating_add(quantity);
        }
        Self::write_stock(tx, &stock).await
    }

    async fn replace_order_lines(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        order_id: Uuid,
        lines: &[OrderLineRecord],
    ) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM order_lines WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;

        let mut values = Vec::with_capacity(lines.len());
        for (position, line) in lines.iter().enumerate() {
            let position = i32::try_from(position).map_err(|_| RepoError::InvalidInput {
                message: "too many order lines".to_string(),
            })?;
            values.push((position, line, quantity_to_db(line.quantity)?));
        }
        if values.is_empty() {
            return Ok(());
        }
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO order_lines (order_id, position, product_id, product_name, \
             product_slug, unit_price, quantity, line_total) ",
        );
        qb.push_values(values, |mut row, (position, line, quantity)| {
            row.push_bind(order_id)
                .push_bind(position)
                .push_bind(line.product_id)
                .push_bind(line.product_name.clone())
                .push_bind(line.product_slug.clone())
                .push_bind(line.unit_price)
                .push_bind(quantity)
                .push_bind(line.line_total);
        });
        qb.build()
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl OrdersRepo for PostgresRepositories {
    async fn find_order(&self, id: Uuid) -> Result<Option<OrderRecord>, RepoError> {
        self.fetch_order_where("id = $1", id).await
    }

    async fn find_order_by_cart(&self, cart_id: Uuid) -> Result<Option<OrderRecord>, RepoError> {
        self.fetch_order_where("cart_id = $1", cart_id).await
    }

    async fn list_orders_for_owner(
        &self,
        owner: &CartOwner,
    ) -> Result<Vec<OrderRecord>, RepoError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE {} ORDER BY created_at DESC, id ASC",
            owner_clause(owner)
        );
        let query = sqlx::query_as::<_, OrderRow>(&sql);
        let query = match owner {
            CartOwner::User(id) => query.bind(*id),
            CartOwner::Session(key) => query.bind(key.as_str()),
        };
        let rows = query.fetch_all(self.pool()).await.map_err(map_sqlx_error)?;
        Self::hydrate_orders(self.pool(), rows).await
    }

    async fn reserve_pending_order(
        &self,
        params: PendingOrderParams,
    ) -> Result<Reservation, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        Self::lock_open_cart_row(&mut tx, params.cart_id).await?;

        let existing = Self::lock_order_row(&mut tx, "cart_id = $1", params.cart_id).await?;
        let mut held = Vec::new();
        if let Some((order_id, status, reserved)) = existing {
            if status != OrderStatus::Pending {
                return Err(integrity(format!(
                    "order for cart {} is already settled",
                    params.cart_id
                )));
            }
            if reserved {
                held = Self::reserved_lines(&mut tx, order_id).await?;
            }
        }

        let mut ids: Vec<Uuid> = params.lines.iter().map(|line| line.product_id).collect();
        ids.extend(held.iter().map(|(id, _)| *id));
        ids.sort();
        ids.dedup();
        let locked = Self::lock_stock(&mut tx, &ids).await?;
        let mut stock: HashMap<Uuid, u32> = locked
            .iter()
            .map(|(id, (_, level))| (*id, *level))
            .collect();
        for (id, quantity) in held {
            let level = stock.entry(id).or_default();
            *level = level.saturating_add(quantity);
        }
        for line in &params.lines {
            let available = stock.get(&line.product_id).copied().unwrap_or(0);
            if available < line.quantity {
                tx.rollback().await.map_err(map_sqlx_error)?;
                let slug = locked
                    .get(&line.product_id)
                    .map(|(slug, _)| slug.clone())
                    .unwrap_or_else(|| line.product_slug.clone());
                return Ok(Reservation::Short(StockShortfall {
                    slug,
                    requested: line.quantity,
                    available,
                }));
            }
            stock.insert(line.product_id, available - line.quantity);
        }
        Self::write_stock(&mut tx, &stock).await?;

        // A pending order already recorded for the cart keeps its id and number. A new
        // total starts a new payment attempt.
        let order_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO orders (
                id, order_number, owner_user_id, owner_session_key, cart_id, status,
                subtotal, shipping_amount, tax_amount, total_amount, stock_reserved
            )
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8, $9, TRUE)
            ON CONFLICT (cart_id) DO UPDATE
            SET subtotal = EXCLUDED.subtotal,
                shipping_amount = EXCLUDED.shipping_amount,
                tax_amount = EXCLUDED.tax_amount,
                total_amount = EXCLUDED.total_amount,
                payment_attempt = orders.payment_attempt
                    + CASE WHEN orders.total_amount <> EXCLUDED.total_amount THEN 1 ELSE 0 END,
                stock_reserved = TRUE,
                updated_at = now()
            WHERE orders.status = 'pending'
            RETURNING id
            "#,
        )
        .bind(params.id)
        .bind(&params.order_number)
        .bind(params.owner.user_id())
        .bind(params.owner.session_key())
        .bind(params.cart_id)
        .bind(params.subtotal)
        .bind(params.shipping_amount)
        .bind(params.tax_amount)
        .bind(params.total_amount)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| integrity(format!("order for cart {} is already settled", params.cart_id)))?;

        Self::replace_order_lines(&mut tx, order_id, &params.lines).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        let order = self.find_order(order_id).await?.ok_or(RepoError::NotFound)?;
        Ok(Reservation::Reserved(order))
    }

    async fn release_pending_order(&self, order_id: Uuid) -> Result<OrderRecord, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let (_, status, reserved) = Self::lock_order_row(&mut tx, "id = $1", order_id)
            .await?
            .ok_or(RepoError::NotFound)?;
        if status != OrderStatus::Pending {
            return Err(integrity(format!(
                "order {order_id} is {status}, expected pending"
            )));
        }
        if reserved {
            Self::give_back_stock(&mut tx, order_id).await?;
        }
        sqlx::query(
            "UPDATE orders SET stock_reserved = FALSE, payment_attempt = payment_attempt + 1, \
             updated_at = now() WHERE id = $1",
        )
        .bind(order_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        self.find_order(order_id).await?.ok_or(RepoError::NotFound)
    }

    async fn finalize_paid_order(
        &self,
        params: FinalizeOrderParams,
    ) -> Result<OrderRecord, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        Self::lock_open_cart_row(&mut tx, params.cart_id).await?;

        let (_, status, reserved) = Self::lock_order_row(&mut tx, "id = $1", params.order_id)
            .await?
            .ok_or(RepoError::NotFound)?;
        if status != OrderStatus::Pending {
            return Err(integrity(format!(
                "order {} is {status}, expected pending",
                params.order_id
            )));
        }
        if !reserved {
            return Err(integrity(format!(
                "order {} holds no stock reservation",
                params.order_id
            )));
        }

        sqlx::query(
            "UPDATE orders SET status = 'paid', payment_reference = $2, stock_reserved = FALSE, \
             updated_at = now() WHERE id = $1",
        )
        .bind(params.order_id)
        .bind(&params.payment_reference)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query("UPDATE carts SET state = 'checked_out', updated_at = now() WHERE id = $1")
            .bind(params.cart_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(params.cart_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        self.find_order(params.order_id)
            .await?
            .ok_or(RepoError::NotFound)
    }

    async fn update_order_status(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<OrderRecord>, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let Some((_, status, reserved)) = Self::lock_order_row(&mut tx, "id = $1", id).await?
        else {
            return Ok(None);
        };
        if status != from {
            return Ok(None);
        }
        if reserved && to == OrderStatus::Cancelled {
            Self::give_back_stock(&mut tx, id).await?;
        }
        sqlx::query(
            "UPDATE orders SET status = $2, stock_reserved = FALSE, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(to)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        self.find_order(id).await
    }
}
