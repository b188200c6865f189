//! Mapping from domain records to wire DTOs.

use rust_decimal::Decimal;
use storefront_api_types as api;

use crate::domain::entities::{
    CartItemRecord, CartRecord, CategoryWithCount, OrderLineRecord, OrderRecord, ProductRecord,
    ReviewRecord, ReviewStats, TagRecord, TagWithCount,
};
use crate::domain::types::{CartState, OrderStatus};

pub fn product_summary(product: &ProductRecord) -> api::ProductSummary {
    api::ProductSummary {
        id: product.id,
        name: product.name.clone(),
        slug: product.slug.clone(),
        short_description: product.short_description.clone(),
        price: product.price,
        sale_price: product.sale_price,
        display_price: product.display_price(),
        on_sale: product.is_on_sale(),
        discount_percent: product.discount_percent(),
        in_stock: product.in_stock(),
        is_active: product.is_active,
        category: api::CategoryRef {
            name: product.category_name.clone(),
            slug: product.category_slug.clone(),
        },
        created_at: product.created_at,
    }
}

pub fn product_detail(
    product: &ProductRecord,
    tags: &[TagRecord],
    reviews: ReviewStats,
) -> api::ProductDetail {
    api::ProductDetail {
        summary: product_summary(product),
        description: product.description.clone(),
        stock_quantity: product.stock_quantity,
        is_featured: product.is_featured,
        tags: tags
            .iter()
            .map(|tag| api::TagRef {
                name: tag.name.clone(),
                slug: tag.slug.clone(),
            })
            .collect(),
        review_count: reviews.count,
        average_rating: reviews.average_rating,
    }
}

pub fn category_summary(entry: &CategoryWithCount) -> api::CategorySummary {
    api::CategorySummary {
        id: entry.category.id,
        name: entry.category.name.clone(),
        slug: entry.category.slug.clone(),
        description: entry.category.description.clone(),
        product_count: entry.product_count,
    }
}

pub fn tag_summary(entry: &TagWithCount) -> api::TagSummary {
    api::TagSummary {
        id: entry.tag.id,
        name: entry.tag.name.clone(),
        slug: entry.tag.slug.clone(),
        product_count: entry.product_count,
    }
}

pub fn review_summary(review: &ReviewRecord) -> api::ReviewSummary {
    api::ReviewSummary {
        id: review.id,
        user_id: review.user_id,
        rating: review.rating,
        title: review.title.clone(),
        comment: review.comment.clone(),
        created_at: review.created_at,
    }
}

/// A missing cart and a cart without lines both render as `empty`.
pub fn cart_response(cart: Option<&CartRecord>, items: &[CartItemRecord]) -> api::CartResponse {
    let state = match cart.map(|cart| cart.state) {
        Some(CartState::CheckedOut) => api::CartState::CheckedOut,
        Some(CartState::Open) if !items.is_empty() => api::CartState::Active,
        _ => api::CartState::Empty,
    };
    api::CartResponse {
        id: cart.map(|cart| cart.id),
        state,
        items: items
            .iter()
            .map(|item| api::CartLine {
                product_id: item.product_id,
                name: item.product_name.clone(),
                slug: item.product_slug.clone(),
                unit_price: item.unit_price(),
                quantity: item.quantity,
                line_total: item.line_total(),
            })
            .collect(),
        total_items: items.iter().map(|item| u64::from(item.quantity)).sum(),
        subtotal: items
            .iter()
            .map(CartItemRecord::line_total)
            .fold(Decimal::ZERO, |acc, value| acc + value),
    }
}

pub fn order_response(order: &OrderRecord) -> api::OrderResponse {
    api::OrderResponse {
        id: order.id,
        order_number: order.order_number.clone(),
        cart_id: order.cart_id,
        status: order_status_to_api(order.status),
        lines: order.lines.iter().map(order_line).collect(),
        subtotal: order.subtotal,
        shipping_amount: order.shipping_amount,
        tax_amount: order.tax_amount,
        total_amount: order.total_amount,
        payment_reference: order.payment_reference.clone(),
        created_at: order.created_at,
    }
}

fn order_line(line: &OrderLineRecord) -> api::OrderLine {
    api::OrderLine {
        product_id: line.product_id,
        product_name: line.product_name.clone(),
        product_slug: line.product_slug.clone(),
        unit_price: line.unit_price,
        quantity: line.quantity,
        line_total: line.line_total,
    }
}

pub fn order_status_to_api(status: OrderStatus) -> api::OrderStatus {
    match status {
        OrderStatus::Pending => api::OrderStatus::Pending,
        OrderStatus::Paid => api::OrderStatus::Paid,
        OrderStatus::Shipped => api::OrderStatus::Shipped,
        OrderStatus::Cancelled => api::OrderStatus::Cancelled,
    }
}

pub fn order_status_from_api(status: api::OrderStatus) -> OrderStatus {
    match status {
        api::OrderStatus::Pending => OrderStatus::Pending,
        api::OrderStatus::Paid => OrderStatus::Paid,
        api::OrderStatus::Shipped => OrderStatus::Shipped,
        api::OrderStatus::Cancelled => OrderStatus::Cancelled,
    }
}
