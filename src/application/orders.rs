//! Order lookup and status transitions.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::application::catalog::CatalogInvalidator;
use crate::application::repos::{OrdersRepo, RepoError};
use crate::domain::entities::OrderRecord;
use crate::domain::error::DomainError;
use crate::domain::types::{CartOwner, OrderStatus};

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order not found")]
    NotFound,
    #[error("order cannot move from `{from}` to `{to}`")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<DomainError> for OrderError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidTransition { from, to } => OrderError::InvalidTransition { from, to },
            DomainError::Validation { message } => {
                OrderError::Repo(RepoError::InvalidInput { message })
            }
        }
    }
}

pub struct OrderService {
    orders: Arc<dyn OrdersRepo>,
    invalidator: CatalogInvalidator,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrdersRepo>, invalidator: CatalogInvalidator) -> Self {
        Self {
            orders,
            invalidator,
        }
    }

    /// Orders owned by someone else read as missing.
    pub async fn get_order(&self, owner: &CartOwner, id: Uuid) -> Result<OrderRecord, OrderError> {
        self.orders
            .find_order(id)
            .await?
            .filter(|order| &order.owner == owner)
            .ok_or(OrderError::NotFound)
    }

    pub async fn list_orders(&self, owner: &CartOwner) -> Result<Vec<OrderRecord>, OrderError> {
        Ok(self.orders.list_orders_for_owner(owner).await?)
    }

    /// Move an order to `to`.
    ///
    /// Cancelling a pending order gives back the stock it reserved; cancelling a
    /// paid one does not restock.
    pub async fn transition_order(
        &self,
        id: Uuid,
        to: OrderStatus,
    ) -> Result<OrderRecord, OrderError> {
        let order = self
            .orders
            .find_order(id)
            .await?
            .ok_or(OrderError::NotFound)?;
        let from = order.status;
        from.transition_to(to)?;

        match self.orders.update_order_status(id, from, to).await? {
            Some(updated) => {
                info!(
                    target = "storefront::orders",
                    order_number = %updated.order_number,
                    from = %from,
                    to = %to,
                    "order status changed"
                );
                if from == OrderStatus::Pending && to == OrderStatus::Cancelled {
                    let slugs: Vec<&str> = updated
                        .lines
                        .iter()
                        .map(|line| line.product_slug.as_str())
                        .collect();
                    self.invalidator.stock_changed(&slugs).await;
                }
                Ok(updated)
            }
            None => {
                // Lost a race with another transition; report against the current status.
                let current = self
                    .orders
                    .find_order(id)
                    .await?
                    .ok_or(OrderError::NotFound)?;
                Err(OrderError::InvalidTransition {
                    from: current.status,
                    to,
                })
            }
        }
    }
}
