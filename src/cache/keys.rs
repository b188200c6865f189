//! Cache key layout.
//!
//! ```text
//! catalog:products:cat=<category slug | *>:<sha256 of the normalized query>
//! catalog:product:<slug>
//! catalog:reviews:<product slug>:<page>:<page size>
//! catalog:categories
//! catalog:category:<slug>
//! catalog:tags
//! catalog:tag:<slug>
//! ```
//!
//! The category segment sits before the hash so that a product write can purge
//! every listing for one category with a single prefix invalidation.

use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::application::repos::ProductQuery;
use crate::domain::types::SortDirection;

use super::store::Invalidation;

pub const CATEGORIES_KEY: &str = "catalog:categories";
pub const TAGS_KEY: &str = "catalog:tags";

const PRODUCT_LIST_NAMESPACE: &str = "catalog:products";
const PRODUCT_DETAIL_NAMESPACE: &str = "catalog:product";
const REVIEWS_NAMESPACE: &str = "catalog:reviews";
const CATEGORY_DETAIL_NAMESPACE: &str = "catalog:category";
const TAG_DETAIL_NAMESPACE: &str = "catalog:tag";
const ANY_CATEGORY: &str = "*";

/// Key for one listing page.
pub fn product_list_key(query: &ProductQuery) -> String {
    format!(
        "{}{}",
        product_list_prefix(query.filter.category.as_deref()),
        query_fingerprint(query)
    )
}

/// Prefix shared by every listing filtered on `category` (`None`: unfiltered listings).
pub fn product_list_prefix(category: Option<&str>) -> String {
    format!(
        "{PRODUCT_LIST_NAMESPACE}:cat={}:",
        category.unwrap_or(ANY_CATEGORY)
    )
}

pub fn product_detail_key(slug: &str) -> String {
    format!("{PRODUCT_DETAIL_NAMESPACE}:{slug}")
}

pub fn reviews_key(product_slug: &str, page: u32, page_size: u32) -> String {
    format!("{}{page}:{page_size}", reviews_prefix(product_slug))
}

fn reviews_prefix(product_slug: &str) -> String {
    format!("{REVIEWS_NAMESPACE}:{product_slug}:")
}

pub fn category_detail_key(slug: &str) -> String {
    format!("{CATEGORY_DETAIL_NAMESPACE}:{slug}")
}

pub fn tag_detail_key(slug: &str) -> String {
    format!("{TAG_DETAIL_NAMESPACE}:{slug}")
}

/// Everything a change to one product can make stale.
///
/// Listings filtered by tag, price or search text but not by category live under
/// the `cat=*` prefix, so they are covered as well. Tag counts move with any
/// retagging, so every tag entry goes.
pub fn product_write_invalidations(slugs: &[&str], categories: &[&str]) -> Vec<Invalidation> {
    let mut targets = vec![
        Invalidation::Prefix(product_list_prefix(None)),
        Invalidation::Key(CATEGORIES_KEY.to_string()),
        Invalidation::Key(TAGS_KEY.to_string()),
        Invalidation::Prefix(format!("{TAG_DETAIL_NAMESPACE}:")),
    ];
    for &category in categories {
        push_unique(
            &mut targets,
            Invalidation::Prefix(product_list_prefix(Some(category))),
        );
        push_unique(&mut targets, Invalidation::Key(category_detail_key(category)));
    }
    for &slug in slugs {
        push_unique(&mut targets, Invalidation::Key(product_detail_key(slug)));
        push_unique(&mut targets, Invalidation::Prefix(reviews_prefix(slug)));
    }
    targets
}

/// What a stock change alone can make stale, when the categories are not at hand.
pub fn stock_invalidations(slugs: &[&str]) -> Vec<Invalidation> {
    let mut targets = vec![Invalidation::Prefix(format!("{PRODUCT_LIST_NAMESPACE}:"))];
    for &slug in slugs {
        push_unique(&mut targets, Invalidation::Key(product_detail_key(slug)));
    }
    targets
}

fn push_unique(targets: &mut Vec<Invalidation>, target: Invalidation) {
    if !targets.contains(&target) {
        targets.push(target);
    }
}

/// Hex SHA-256 over a canonical rendering of the query.
///
/// Every field is written, absent ones as empty and text quoted, so distinct
/// queries cannot collapse onto the same text.
pub fn query_fingerprint(query: &ProductQuery) -> String {
    let filter = &query.filter;
    let mut canonical = String::new();
    let _ = write!(
        canonical,
        "cat={:?}|tag={:?}|min={}|max={}|q={:?}|stock={}|inactive={}|sort={}:{}|offset={}|limit={}",
        filter.category.as_deref().unwrap_or(""),
        filter.tag.as_deref().unwrap_or(""),
        filter
            .min_price
            .map(|value| value.normalize().to_string())
            .unwrap_or_default(),
        filter
            .max_price
            .map(|value| value.normalize().to_string())
            .unwrap_or_default(),
        filter.search.as_deref().unwrap_or(""),
        match filter.in_stock {
            Some(true) => "in",
            Some(false) => "out",
            None => "",
        },
        filter.include_inactive,
        query.sort.field.as_str(),
        match query.sort.direction {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        },
        query.offset,
        query.limit,
    );

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}
