//! Catalog read path with a cache in front of the store.
//!
//! Every read computes its cache key explicitly, tries the cache under a short
//! timeout, and on a miss queries the store and writes the serialized page back.
//! Any cache failure degrades to a direct store read.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use rust_decimal::Decimal;
use serde::Serialize;
use storefront_api_types::{Pagination, ProductListResponse, ReviewListResponse};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::application::dto;
use crate::application::pagination::{PageRequest, PaginationError, total_pages};
use crate::application::repos::{CatalogRepo, ProductFilter, ProductQuery, RepoError};
use crate::cache::{
    CacheError, CacheStore, Invalidation, METRIC_CACHE_ERROR, METRIC_CACHE_HIT,
    METRIC_CACHE_MISS, keys,
};
use crate::domain::entities::ProductRecord;
use crate::domain::types::ProductSort;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("`{field}` is out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("catalog store unavailable")]
    StoreUnavailable(#[source] RepoError),
    #[error("failed to encode catalog payload")]
    Encode(#[from] serde_json::Error),
}

impl From<RepoError> for CatalogError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => CatalogError::NotFound { entity: "resource" },
            other => CatalogError::StoreUnavailable(other),
        }
    }
}

impl From<PaginationError> for CatalogError {
    fn from(err: PaginationError) -> Self {
        CatalogError::OutOfRange {
            field: err.field(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CatalogPolicy {
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub cache_ttl: Duration,
    pub cache_timeout: Duration,
    pub query_timeout: Duration,
}

impl Default for CatalogPolicy {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
            cache_ttl: Duration::from_secs(900),
            cache_timeout: Duration::from_millis(100),
            query_timeout: Duration::from_secs(5),
        }
    }
}

/// A listing request as received, before normalization.
#[derive(Debug, Clone, Default)]
pub struct ProductListRequest {
    pub category: Option<String>,
    pub tag: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub search: Option<String>,
    pub in_stock: Option<bool>,
    pub include_inactive: bool,
    pub sort: ProductSort,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

impl CacheOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
        }
    }
}

/// Serialized JSON body, identical whether it came from the cache or the store.
#[derive(Debug, Clone)]
pub struct CatalogPayload {
    pub body: Bytes,
    pub cache: CacheOutcome,
}

pub struct CatalogService {
    repo: Arc<dyn CatalogRepo>,
    cache: Arc<dyn CacheStore>,
    policy: CatalogPolicy,
}

impl CatalogService {
    pub fn new(
        repo: Arc<dyn CatalogRepo>,
        cache: Arc<dyn CacheStore>,
        policy: CatalogPolicy,
    ) -> Self {
        Self {
            repo,
            cache,
            policy,
        }
    }

    /// Validate a listing request and fold it into the canonical query form.
    pub fn normalize(&self, request: ProductListRequest) -> Result<ProductQuery, CatalogError> {
        for (field, value) in [
            ("min_price", request.min_price),
            ("max_price", request.max_price),
        ] {
            if let Some(value) = value
                && value < Decimal::ZERO
            {
                return Err(CatalogError::OutOfRange {
                    field,
                    reason: "must not be negative".to_string(),
                });
            }
        }
        if let (Some(min), Some(max)) = (request.min_price, request.max_price)
            && min > max
        {
            return Err(CatalogError::OutOfRange {
                field: "min_price",
                reason: format!("{min} exceeds max_price {max}"),
            });
        }

        let page = PageRequest::new(
            request.page.unwrap_or(1),
            request.page_size.unwrap_or(self.policy.default_page_size),
            self.policy.max_page_size,
        )?;

        Ok(ProductQuery {
            filter: ProductFilter {
                category: normalize_slug(request.category),
                tag: normalize_slug(request.tag),
                min_price: request.min_price.map(|value| value.normalize()),
                max_price: request.max_price.map(|value| value.normalize()),
                search: request
                    .search
                    .map(|text| text.trim().to_string())
                    .filter(|text| !text.is_empty()),
                in_stock: request.in_stock,
                include_inactive: request.include_inactive,
            },
            sort: request.sort,
            offset: page.offset(),
            limit: page.page_size(),
        })
    }

    pub async fn list_products(
        &self,
        request: ProductListRequest,
    ) -> Result<CatalogPayload, CatalogError> {
        let query = self.normalize(request)?;
        self.product_page(&query, async { Ok(()) }).await
    }

    /// Listing scoped to one category; an unknown or inactive category is `NotFound`.
    pub async fn category_products(
        &self,
        slug: &str,
        request: ProductListRequest,
    ) -> Result<CatalogPayload, CatalogError> {
        let query = self.normalize(ProductListRequest {
            category: Some(slug.to_string()),
            ..request
        })?;
        let slug = query.filter.category.clone().unwrap_or_default();
        self.product_page(&query, async {
            self.query_store(self.repo.find_category_with_count(&slug))
                .await?
                .map(|_| ())
                .ok_or(CatalogError::NotFound { entity: "category" })
        })
        .await
    }

    /// Listing scoped to one tag; a tag no active product carries is `NotFound`.
    pub async fn tag_products(
        &self,
        slug: &str,
        request: ProductListRequest,
    ) -> Result<CatalogPayload, CatalogError> {
        let query = self.normalize(ProductListRequest {
            tag: Some(slug.to_string()),
            ..request
        })?;
        let slug = query.filter.tag.clone().unwrap_or_default();
        self.product_page(&query, async {
            self.query_store(self.repo.find_tag_with_count(&slug))
                .await?
                .map(|_| ())
                .ok_or(CatalogError::NotFound { entity: "tag" })
        })
        .await
    }

    /// Serve one listing page. `scope` only runs on a miss, before the store query.
    async fn product_page<S>(
        &self,
        query: &ProductQuery,
        scope: S,
    ) -> Result<CatalogPayload, CatalogError>
    where
        S: Future<Output = Result<(), CatalogError>>,
    {
        let key = keys::product_list_key(query);
        self.read_through(&key, async {
            scope.await?;
            let slice = self.query_store(self.repo.list_products(query)).await?;
            Ok::<_, CatalogError>(ProductListResponse {
                items: slice.items.iter().map(dto::product_summary).collect(),
                pagination: Pagination {
                    page: page_number(query.offset, query.limit),
                    page_size: query.limit,
                    total: slice.total,
                    total_pages: total_pages(slice.total, query.limit),
                },
            })
        })
        .await
    }

    pub async fn product_detail(&self, slug: &str) -> Result<CatalogPayload, CatalogError> {
        let slug = slug.trim().to_lowercase();
        self.read_through(&keys::product_detail_key(&slug), async {
            let product = self.active_product(&slug).await?;
            let (tags, reviews) = tokio::try_join!(
                self.query_store(self.repo.tags_for_product(product.id)),
                self.query_store(self.repo.review_stats(product.id)),
            )?;
            Ok::<_, CatalogError>(dto::product_detail(&product, &tags, reviews))
        })
        .await
    }

    /// Approved reviews of an active product, newest first.
    pub async fn product_reviews(
        &self,
        slug: &str,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> Result<CatalogPayload, CatalogError> {
        let slug = slug.trim().to_lowercase();
        let page = PageRequest::new(
            page.unwrap_or(1),
            page_size.unwrap_or(self.policy.default_page_size),
            self.policy.max_page_size,
        )?;
        let key = keys::reviews_key(&slug, page.page(), page.page_size());
        self.read_through(&key, async {
            let product = self.active_product(&slug).await?;
            let slice = self
                .query_store(
                    self.repo
                        .list_reviews(product.id, page.offset(), page.page_size()),
                )
                .await?;
            Ok::<_, CatalogError>(ReviewListResponse {
                items: slice.items.iter().map(dto::review_summary).collect(),
                pagination: Pagination {
                    page: page.page(),
                    page_size: page.page_size(),
                    total: slice.total,
                    total_pages: total_pages(slice.total, page.page_size()),
                },
            })
        })
        .await
    }

    pub async fn list_categories(&self) -> Result<CatalogPayload, CatalogError> {
        self.read_through(keys::CATEGORIES_KEY, async {
            let categories = self
                .query_store(self.repo.list_categories_with_counts())
                .await?;
            Ok::<_, CatalogError>(
                categories
                    .iter()
                    .map(dto::category_summary)
                    .collect::<Vec<_>>(),
            )
        })
        .await
    }

    pub async fn category_detail(&self, slug: &str) -> Result<CatalogPayload, CatalogError> {
        let slug = slug.trim().to_lowercase();
        self.read_through(&keys::category_detail_key(&slug), async {
            let category = self
                .query_store(self.repo.find_category_with_count(&slug))
                .await?
                .ok_or(CatalogError::NotFound { entity: "category" })?;
            Ok::<_, CatalogError>(dto::category_summary(&category))
        })
        .await
    }

    pub async fn list_tags(&self) -> Result<CatalogPayload, CatalogError> {
        self.read_through(keys::TAGS_KEY, async {
            let tags = self.query_store(self.repo.list_tags_with_counts()).await?;
            Ok::<_, CatalogError>(tags.iter().map(dto::tag_summary).collect::<Vec<_>>())
        })
        .await
    }

    pub async fn tag_detail(&self, slug: &str) -> Result<CatalogPayload, CatalogError> {
        let slug = slug.trim().to_lowercase();
        self.read_through(&keys::tag_detail_key(&slug), async {
            let tag = self
                .query_store(self.repo.find_tag_with_count(&slug))
                .await?
                .ok_or(CatalogError::NotFound { entity: "tag" })?;
            Ok::<_, CatalogError>(dto::tag_summary(&tag))
        })
        .await
    }

    async fn active_product(&self, slug: &str) -> Result<ProductRecord, CatalogError> {
        self.query_store(self.repo.find_product_by_slug(slug))
            .await?
            .filter(|product| product.is_active)
            .ok_or(CatalogError::NotFound { entity: "product" })
    }

    /// Cache-aside read: a hit is returned verbatim, a miss runs `load` and stores
    /// its serialized result.
    async fn read_through<T, F>(&self, key: &str, load: F) -> Result<CatalogPayload, CatalogError>
    where
        T: Serialize,
        F: Future<Output = Result<T, CatalogError>>,
    {
        if let Some(body) = self.cache_get(key).await {
            return Ok(CatalogPayload {
                body,
                cache: CacheOutcome::Hit,
            });
        }
        let value = load.await?;
        self.populate(key, &value).await
    }

    async fn populate<T: Serialize>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<CatalogPayload, CatalogError> {
        let body = Bytes::from(serde_json::to_vec(value)?);
        self.cache_set(key, body.clone()).await;
        Ok(CatalogPayload {
            body,
            cache: CacheOutcome::Miss,
        })
    }

    async fn query_store<T, F>(&self, query: F) -> Result<T, CatalogError>
    where
        F: Future<Output = Result<T, RepoError>>,
    {
        match timeout(self.policy.query_timeout, query).await {
            Ok(result) => result.map_err(CatalogError::from),
            Err(_) => Err(CatalogError::StoreUnavailable(RepoError::Timeout)),
        }
    }

    async fn cache_get(&self, key: &str) -> Option<Bytes> {
        match timeout(self.policy.cache_timeout, self.cache.get(key)).await {
            Ok(Ok(Some(body))) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                Some(body)
            }
            Ok(Ok(None)) => {
                counter!(METRIC_CACHE_MISS).increment(1);
                None
            }
            Ok(Err(err)) => {
                cache_failure("get", key, &err);
                None
            }
            Err(_) => {
                cache_failure("get", key, &CacheError::Timeout);
                None
            }
        }
    }

    async fn cache_set(&self, key: &str, body: Bytes) {
        let write = self.cache.set(key, body, self.policy.cache_ttl);
        match timeout(self.policy.cache_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => cache_failure("set", key, &err),
            Err(_) => cache_failure("set", key, &CacheError::Timeout),
        }
    }
}

/// Purges the cache entries a product write can make stale.
#[derive(Clone)]
pub struct CatalogInvalidator {
    cache: Arc<dyn CacheStore>,
    timeout: Duration,
}

impl CatalogInvalidator {
    pub fn new(cache: Arc<dyn CacheStore>, timeout: Duration) -> Self {
        Self { cache, timeout }
    }

    /// Failures are logged and otherwise ignored; the TTL bounds what they leave behind.
    pub async fn products_changed(&self, slugs: &[&str], categories: &[&str]) {
        self.apply(keys::product_write_invalidations(slugs, categories))
            .await;
    }

    /// Stock moved for these products outside a product write.
    pub async fn stock_changed(&self, slugs: &[&str]) {
        self.apply(keys::stock_invalidations(slugs)).await;
    }

    async fn apply(&self, targets: Vec<Invalidation>) {
        for target in targets {
            let label = match &target {
                Invalidation::Key(key) | Invalidation::Prefix(key) => key.clone(),
            };
            match timeout(self.timeout, self.cache.invalidate(&target)).await {
                Ok(Ok(removed)) => debug!(
                    target = "storefront::catalog::invalidate",
                    key = %label,
                    removed,
                    "cache entries invalidated"
                ),
                Ok(Err(err)) => cache_failure("invalidate", &label, &err),
                Err(_) => cache_failure("invalidate", &label, &CacheError::Timeout),
            }
        }
    }
}

fn cache_failure(op: &'static str, key: &str, err: &CacheError) {
    counter!(METRIC_CACHE_ERROR, "op" => op).increment(1);
    warn!(
        target = "storefront::catalog::cache",
        op,
        key,
        error = %err,
        "cache unavailable; continuing without it"
    );
}

fn normalize_slug(raw: Option<String>) -> Option<String> {
    raw.map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty())
}

fn page_number(offset: u64, limit: u32) -> u32 {
    if limit == 0 {
        return 1;
    }
    u32::try_from(offset / u64::from(limit) + 1).unwrap_or(u32::MAX)
}
