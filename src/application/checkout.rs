//! Checkout: cart snapshot, stock reservation, payment, and the paid-order commit.

use std::sync::Arc;

use metrics::counter;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::catalog::CatalogInvalidator;
use crate::application::locks::KeyedLocks;
use crate::application::payments::{ChargeOutcome, ChargeRequest, PaymentError, PaymentGateway};
use crate::application::repos::{
    CartsRepo, FinalizeOrderParams, OrdersRepo, PendingOrderParams, RepoError, Reservation,
};
use crate::domain::entities::{OrderLineRecord, OrderRecord, generate_order_number};
use crate::domain::pricing::PricingPolicy;
use crate::domain::types::{CartOwner, CartState};

pub const METRIC_CHECKOUT: &str = "storefront_checkout_total";

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("cart has no items")]
    EmptyCart,
    #[error("only {available} of `{slug}` in stock, {requested} requested")]
    OutOfStock {
        slug: String,
        requested: u32,
        available: u32,
    },
    #[error("payment declined: {reason}")]
    PaymentDeclined { reason: String },
    #[error("payment gateway unavailable")]
    PaymentUnavailable(#[source] PaymentError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub order: OrderRecord,
    /// `false` when the cart was already checked out and its order is returned as is.
    pub created: bool,
}

pub struct CheckoutService {
    carts: Arc<dyn CartsRepo>,
    orders: Arc<dyn OrdersRepo>,
    gateway: Arc<dyn PaymentGateway>,
    locks: Arc<KeyedLocks>,
    invalidator: CatalogInvalidator,
    pricing: PricingPolicy,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        carts: Arc<dyn CartsRepo>,
        orders: Arc<dyn OrdersRepo>,
        gateway: Arc<dyn PaymentGateway>,
        locks: Arc<KeyedLocks>,
        invalidator: CatalogInvalidator,
        pricing: PricingPolicy,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            carts,
            orders,
            gateway,
            locks,
            invalidator,
            pricing,
            currency: currency.into(),
        }
    }

    /// Check out `cart_id` for `owner`.
    ///
    /// Stock is reserved with the pending order before the gateway is charged, so an
    /// approved charge always settles. A declined charge gives the stock back; a
    /// gateway failure keeps it, because the charge may still have gone through and
    /// a retry replays it under the same idempotency key.
    pub async fn checkout(
        &self,
        owner: &CartOwner,
        cart_id: Uuid,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        let _guard = self.locks.lock(cart_id).await;

        let cart = self
            .carts
            .find_cart(cart_id)
            .await?
            .filter(|cart| &cart.owner == owner)
            .ok_or(CheckoutError::NotFound { entity: "cart" })?;

        if cart.state == CartState::CheckedOut {
            let order = self.orders.find_order_by_cart(cart_id).await?.ok_or_else(|| {
                RepoError::Integrity {
                    message: format!("checked-out cart {cart_id} has no order"),
                }
            })?;
            counter!(METRIC_CHECKOUT, "outcome" => "replayed").increment(1);
            return Ok(CheckoutOutcome {
                order,
                created: false,
            });
        }

        let items = self.carts.list_items(cart_id).await?;
        if items.is_empty() {
            counter!(METRIC_CHECKOUT, "outcome" => "empty").increment(1);
            return Err(CheckoutError::EmptyCart);
        }
        if items.iter().any(|item| !item.is_active) {
            return Err(CheckoutError::NotFound { entity: "product" });
        }

        let lines: Vec<OrderLineRecord> = items.iter().map(OrderLineRecord::from).collect();
        let subtotal: Decimal = lines.iter().map(|line| line.line_total).sum();
        let totals = self.pricing.totals(subtotal);
        let reservation = self
            .orders
            .reserve_pending_order(PendingOrderParams {
                id: Uuid::new_v4(),
                order_number: generate_order_number(),
                owner: owner.clone(),
                cart_id,
                subtotal: totals.subtotal,
                shipping_amount: totals.shipping,
                tax_amount: totals.tax,
                total_amount: totals.total,
                lines,
            })
            .await?;
        let pending = match reservation {
            Reservation::Reserved(order) => order,
            Reservation::Short(shortfall) => {
                counter!(METRIC_CHECKOUT, "outcome" => "out_of_stock").increment(1);
                return Err(CheckoutError::OutOfStock {
                    slug: shortfall.slug,
                    requested: shortfall.requested,
                    available: shortfall.available,
                });
            }
        };

        // Every outcome past this point has moved stock, so cached entries get purged.
        let slugs: Vec<&str> = items.iter().map(|item| item.product_slug.as_str()).collect();
        let categories: Vec<&str> = items
            .iter()
            .map(|item| item.category_slug.as_str())
            .collect();

        let charge = ChargeRequest {
            idempotency_key: pending.payment_key(),
            order_number: pending.order_number.clone(),
            amount: pending.total_amount,
            currency: self.currency.clone(),
        };
        let reference = match self.gateway.charge(&charge).await {
            Ok(ChargeOutcome::Approved { reference }) => reference,
            Ok(ChargeOutcome::Declined { reason }) => {
                counter!(METRIC_CHECKOUT, "outcome" => "declined").increment(1);
                info!(
                    target = "storefront::checkout",
                    order_number = %pending.order_number,
                    attempt = pending.payment_attempt,
                    reason = %reason,
                    "payment declined"
                );
                self.orders.release_pending_order(pending.id).await?;
                self.invalidator.products_changed(&slugs, &categories).await;
                return Err(CheckoutError::PaymentDeclined { reason });
            }
            Err(err) => {
                counter!(METRIC_CHECKOUT, "outcome" => "failed").increment(1);
                warn!(
                    target = "storefront::checkout",
                    order_number = %pending.order_number,
                    attempt = pending.payment_attempt,
                    error = %err,
                    "payment gateway failed; stock stays reserved"
                );
                self.invalidator.products_changed(&slugs, &categories).await;
                return Err(CheckoutError::PaymentUnavailable(err));
            }
        };

        let order = self
            .orders
            .finalize_paid_order(FinalizeOrderParams {
                order_id: pending.id,
                cart_id,
                payment_reference: reference,
            })
            .await?;
        counter!(METRIC_CHECKOUT, "outcome" => "paid").increment(1);
        info!(
            target = "storefront::checkout",
            order_number = %order.order_number,
            total = %order.total_amount,
            owner = %owner.label(),
            "order paid"
        );

        self.invalidator.products_changed(&slugs, &categories).await;

        Ok(CheckoutOutcome {
            order,
            created: true,
        })
    }
}
