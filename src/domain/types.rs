//! Shared domain enumerations aligned with persisted database enums.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "cart_state", rename_all = "snake_case")]
pub enum CartState {
    Open,
    CheckedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Orders only move forward; cancellation is possible until shipment.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Paid)
                | (OrderStatus::Paid, OrderStatus::Shipped)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Paid, OrderStatus::Cancelled)
        )
    }

    pub fn transition_to(self, next: OrderStatus) -> Result<OrderStatus, DomainError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whoever a cart or order belongs to: a signed-in user or an anonymous session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CartOwner {
    User(Uuid),
    Session(String),
}

impl CartOwner {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            CartOwner::User(id) => Some(*id),
            CartOwner::Session(_) => None,
        }
    }

    pub fn session_key(&self) -> Option<&str> {
        match self {
            CartOwner::User(_) => None,
            CartOwner::Session(key) => Some(key.as_str()),
        }
    }

    /// Rebuild an owner from the two nullable owner columns.
    pub fn from_columns(
        user_id: Option<Uuid>,
        session_key: Option<String>,
    ) -> Result<Self, DomainError> {
        match (user_id, session_key) {
            (Some(id), None) => Ok(CartOwner::User(id)),
            (None, Some(key)) => Ok(CartOwner::Session(key)),
            _ => Err(DomainError::validation(
                "exactly one of owner user id or session key must be set",
            )),
        }
    }

    pub fn label(&self) -> String {
        match self {
            CartOwner::User(id) => format!("user:{id}"),
            CartOwner::Session(key) => format!("session:{key}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortField {
    Name,
    Price,
    CreatedAt,
}

impl SortField {
    pub fn as_str(self) -> &'static str {
        match self {
            SortField::Name => "name",
            SortField::Price => "price",
            SortField::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Listing order. Ties are always broken by product id ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProductSort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for ProductSort {
    fn default() -> Self {
        Self {
            field: SortField::CreatedAt,
            direction: SortDirection::Desc,
        }
    }
}

impl ProductSort {
    /// Parse the query-string form: `price` ascending, `-price` descending.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let raw = raw.trim();
        let (direction, name) = match raw.strip_prefix('-') {
            Some(rest) => (SortDirection::Desc, rest),
            None => (SortDirection::Asc, raw),
        };
        let field = match name {
            "name" => SortField::Name,
            "price" => SortField::Price,
            "created_at" => SortField::CreatedAt,
            other => {
                return Err(DomainError::validation(format!(
                    "unsupported sort field `{other}`"
                )));
            }
        };
        Ok(Self { field, direction })
    }

    pub fn as_query(&self) -> String {
        match self.direction {
            SortDirection::Asc => self.field.as_str().to_string(),
            SortDirection::Desc => format!("-{}", self.field.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_only() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Shipped));
        assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Shipped));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Pending));
    }

    #[test]
    fn cancellation_stops_at_shipment() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Cancelled));
        assert_eq!(
            OrderStatus::Shipped.transition_to(OrderStatus::Cancelled),
            Err(DomainError::InvalidTransition {
                from: OrderStatus::Shipped,
                to: OrderStatus::Cancelled,
            })
        );
    }

    #[test]
    fn sort_parses_direction_prefix() {
        let asc = ProductSort::parse("price").expect("valid sort");
        assert_eq!(asc.field, SortField::Price);
        assert_eq!(asc.direction, SortDirection::Asc);

        let desc = ProductSort::parse("-created_at").expect("valid sort");
        assert_eq!(desc, ProductSort::default());
        assert_eq!(desc.as_query(), "-created_at");

        assert!(ProductSort::parse("rating").is_err());
    }

    #[test]
    fn owner_requires_exactly_one_column() {
        let id = Uuid::new_v4();
        assert_eq!(
            CartOwner::from_columns(Some(id), None),
            Ok(CartOwner::User(id))
        );
        assert!(CartOwner::from_columns(None, None).is_err());
        assert!(CartOwner::from_columns(Some(id), Some("abc".into())).is_err());
    }
}
