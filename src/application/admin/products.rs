use std::sync::Arc;

use rust_decimal::Decimal;
use storefront_api_types::ProductDetail;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::application::catalog::CatalogInvalidator;
use crate::application::dto;
use crate::application::repos::{
    CatalogRepo, CatalogWriteRepo, CreateProductParams, ProductRemoval, RepoError,
    UpdateProductParams,
};
use crate::domain::entities::{CategoryRecord, ProductRecord};
use crate::domain::slug::{SlugAsyncError, SlugError, derive_slug, generate_unique_slug};

const MIN_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);
/// Largest value a `NUMERIC(10, 2)` price column holds.
const MAX_PRICE: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

#[derive(Debug, Error)]
pub enum AdminProductError {
    #[error("{0}")]
    ConstraintViolation(&'static str),
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone)]
pub struct CreateProductCommand {
    pub name: String,
    pub slug: Option<String>,
    pub description: String,
    pub short_description: String,
    pub price: Decimal,
    pub sale_price: Option<Decimal>,
    pub stock_quantity: u32,
    pub category_slug: String,
    pub tag_slugs: Vec<String>,
    pub is_active: bool,
    pub is_featured: bool,
}

/// Partial update; `None` leaves a field as it is. `sale_price: Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct UpdateProductCommand {
    pub id: Uuid,
    pub name: Option<String>,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub price: Option<Decimal>,
    pub sale_price: Option<Option<Decimal>>,
    pub stock_quantity: Option<u32>,
    pub category_slug: Option<String>,
    pub is_active: Option<bool>,
    pub is_featured: Option<bool>,
    /// Replaces every tag of the product.
    pub tag_slugs: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct AdminProductService {
    reader: Arc<dyn CatalogRepo>,
    writer: Arc<dyn CatalogWriteRepo>,
    invalidator: CatalogInvalidator,
}

impl AdminProductService {
    pub fn new(
        reader: Arc<dyn CatalogRepo>,
        writer: Arc<dyn CatalogWriteRepo>,
        invalidator: CatalogInvalidator,
    ) -> Self {
        Self {
            reader,
            writer,
            invalidator,
        }
    }

    pub async fn create_product(
        &self,
        command: CreateProductCommand,
    ) -> Result<ProductDetail, AdminProductError> {
        let name = command.name.trim().to_string();
        ensure_non_empty(&name, "name")?;
        ensure_prices(command.price, command.sale_price)?;
        let category = self.category(&command.category_slug).await?;

        let slug = match command.slug.as_deref().map(str::trim) {
            Some(requested) if !requested.is_empty() => {
                let slug =
                    derive_slug(requested).map_err(|_| AdminProductError::ConstraintViolation("slug"))?;
                if self.writer.product_slug_exists(&slug).await? {
                    return Err(RepoError::Duplicate {
                        constraint: "products_slug_key".to_string(),
                    }
                    .into());
                }
                slug
            }
            _ => self.unique_slug(&name).await?,
        };

        let product = self
            .writer
            .create_product(CreateProductParams {
                name,
                slug,
                description: command.description.trim().to_string(),
                short_description: command.short_description.trim().to_string(),
                price: command.price,
                sale_price: command.sale_price,
                stock_quantity: command.stock_quantity,
                category_id: category.id,
                tag_slugs: normalize_tags(&command.tag_slugs),
                is_active: command.is_active,
                is_featured: command.is_featured,
            })
            .await?;
        info!(
            target = "storefront::admin::products",
            slug = %product.slug,
            "product created"
        );

        self.invalidator
            .products_changed(&[product.slug.as_str()], &[product.category_slug.as_str()])
            .await;
        self.view(&product).await
    }

    pub async fn update_product(
        &self,
        command: UpdateProductCommand,
    ) -> Result<ProductDetail, AdminProductError> {
        let existing = self.existing(command.id).await?;

        let name = match command.name {
            Some(name) => {
                let name = name.trim().to_string();
                ensure_non_empty(&name, "name")?;
                name
            }
            None => existing.name.clone(),
        };
        let price = command.price.unwrap_or(existing.price);
        let sale_price = command.sale_price.unwrap_or(existing.sale_price);
        ensure_prices(price, sale_price)?;
        let category_id = match command.category_slug.as_deref() {
            Some(slug) => self.category(slug).await?.id,
            None => existing.category_id,
        };

        let product = self
            .writer
            .update_product(UpdateProductParams {
                id: existing.id,
                name,
                description: command
                    .description
                    .map(|text| text.trim().to_string())
                    .unwrap_or_else(|| existing.description.clone()),
                short_description: command
                    .short_description
                    .map(|text| text.trim().to_string())
                    .unwrap_or_else(|| existing.short_description.clone()),
                price,
                sale_price,
                stock_quantity: command.stock_quantity.unwrap_or(existing.stock_quantity),
                category_id,
                is_active: command.is_active.unwrap_or(existing.is_active),
                is_featured: command.is_featured.unwrap_or(existing.is_featured),
                tag_slugs: command.tag_slugs.as_deref().map(normalize_tags),
            })
            .await?;
        info!(
            target = "storefront::admin::products",
            slug = %product.slug,
            "product updated"
        );

        self.invalidator
            .products_changed(
                &[product.slug.as_str()],
                &[
                    existing.category_slug.as_str(),
                    product.category_slug.as_str(),
                ],
            )
            .await;
        self.view(&product).await
    }

    /// Delete a product, or deactivate it when order lines still reference it.
    pub async fn delete_product(&self, id: Uuid) -> Result<ProductRemoval, AdminProductError> {
        let existing = self.existing(id).await?;
        let removal = self.writer.remove_product(id).await?;
        info!(
            target = "storefront::admin::products",
            slug = %existing.slug,
            outcome = ?removal,
            "product removed"
        );

        self.invalidator
            .products_changed(
                &[existing.slug.as_str()],
                &[existing.category_slug.as_str()],
            )
            .await;
        Ok(removal)
    }

    async fn existing(&self, id: Uuid) -> Result<ProductRecord, AdminProductError> {
        self.reader
            .find_product_by_id(id)
            .await?
            .ok_or(AdminProductError::NotFound { entity: "product" })
    }

    async fn category(&self, slug: &str) -> Result<CategoryRecord, AdminProductError> {
        self.writer
            .find_category_by_slug(&slug.trim().to_lowercase())
            .await?
            .ok_or(AdminProductError::NotFound { entity: "category" })
    }

    async fn unique_slug(&self, name: &str) -> Result<String, AdminProductError> {
        let writer = self.writer.clone();
        match generate_unique_slug(name, move |candidate| {
            let writer = writer.clone();
            async move {
                writer
                    .product_slug_exists(&candidate)
                    .await
                    .map(|exists| !exists)
            }
        })
        .await
        {
            Ok(slug) => Ok(slug),
            Err(SlugAsyncError::Slug(err)) => match err {
                SlugError::EmptyInput | SlugError::Unrepresentable { .. } => {
                    Err(AdminProductError::ConstraintViolation("name"))
                }
                SlugError::Exhausted { .. } => Err(AdminProductError::ConstraintViolation("slug")),
            },
            Err(SlugAsyncError::Predicate(err)) => Err(AdminProductError::Repo(err)),
        }
    }

    async fn view(&self, product: &ProductRecord) -> Result<ProductDetail, AdminProductError> {
        let (tags, reviews) = tokio::try_join!(
            self.reader.tags_for_product(product.id),
            self.reader.review_stats(product.id),
        )?;
        Ok(dto::product_detail(product, &tags, reviews))
    }
}

fn ensure_non_empty(value: &str, field: &'static str) -> Result<(), AdminProductError> {
    if value.trim().is_empty() {
        return Err(AdminProductError::ConstraintViolation(field));
    }
    Ok(())
}

fn normalize_tags(raw: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = raw
        .iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

fn ensure_prices(price: Decimal, sale_price: Option<Decimal>) -> Result<(), AdminProductError> {
    if price < MIN_PRICE || price > MAX_PRICE || price.normalize().scale() > 2 {
        return Err(AdminProductError::ConstraintViolation("price"));
    }
    // Bounded by `price`, so the column ceiling holds as well.
    if let Some(sale) = sale_price
        && (sale < MIN_PRICE || sale > price || sale.normalize().scale() > 2)
    {
        return Err(AdminProductError::ConstraintViolation("sale_price"));
    }
    Ok(())
}
