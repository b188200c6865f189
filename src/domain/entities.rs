//! Domain entities mirrored from persistent storage.

use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

use super::pricing;
use super::types::{CartOwner, CartState, OrderStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRecord {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryWithCount {
    pub category: CategoryRecord,
    /// Active products only.
    pub product_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagWithCount {
    pub tag: TagRecord,
    /// Active products only.
    pub product_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub short_description: String,
    pub price: Decimal,
    pub sale_price: Option<Decimal>,
    pub stock_quantity: u32,
    pub category_id: Uuid,
    pub category_name: String,
    pub category_slug: String,
    pub is_active: bool,
    pub is_featured: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ProductRecord {
    pub fn display_price(&self) -> Decimal {
        pricing::display_price(self.price, self.sale_price)
    }

    pub fn is_on_sale(&self) -> bool {
        pricing::is_on_sale(self.price, self.sale_price)
    }

    pub fn discount_percent(&self) -> Decimal {
        pricing::discount_percent(self.price, self.sale_price)
    }

    pub fn in_stock(&self) -> bool {
        self.stock_quantity > 0
    }
}

/// An approved review as shown to shoppers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRecord {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub rating: u8,
    pub title: String,
    pub comment: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReviewStats {
    pub count: u64,
    pub average_rating: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartRecord {
    pub id: Uuid,
    pub owner: CartOwner,
    pub state: CartState,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A cart line joined with the product fields checkout needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartItemRecord {
    pub product_id: Uuid,
    pub product_name: String,
    pub product_slug: String,
    pub category_slug: String,
    pub price: Decimal,
    pub sale_price: Option<Decimal>,
    pub stock_quantity: u32,
    pub is_active: bool,
    pub quantity: u32,
    pub added_at: OffsetDateTime,
}

impl CartItemRecord {
    pub fn unit_price(&self) -> Decimal {
        pricing::display_price(self.price, self.sale_price)
    }

    pub fn line_total(&self) -> Decimal {
        pricing::line_total(self.unit_price(), self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLineRecord {
    pub product_id: Uuid,
    pub product_name: String,
    pub product_slug: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub line_total: Decimal,
}

impl From<&CartItemRecord> for OrderLineRecord {
    fn from(item: &CartItemRecord) -> Self {
        Self {
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            product_slug: item.product_slug.clone(),
            unit_price: item.unit_price(),
            quantity: item.quantity,
            line_total: item.line_total(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
    pub id: Uuid,
    pub order_number: String,
    pub owner: CartOwner,
    pub cart_id: Uuid,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub shipping_amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub payment_reference: Option<String>,
    /// Bumped after every declined charge and whenever the total changes.
    pub payment_attempt: u32,
    pub lines: Vec<OrderLineRecord>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl OrderRecord {
    /// Gateway idempotency key for the current payment attempt.
    ///
    /// Retries after a transport failure reuse the key; a declined charge or a
    /// changed total moves the order to a fresh one.
    pub fn payment_key(&self) -> String {
        format!("{}:{}", self.id, self.payment_attempt)
    }
}

/// `ORD-` followed by eight upper-case hex digits.
pub fn generate_order_number() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("ORD-{}", simple[..8].to_ascii_uppercase())
}
