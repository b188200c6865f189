use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{
        CatalogRepo, CatalogWriteRepo, CreateProductParams, ProductFilter, ProductQuery,
        ProductRemoval, ProductSlice, RepoError, ReviewSlice, UpdateProductParams,
    },
    domain::{
        entities::{
            CategoryRecord, CategoryWithCount, ProductRecord, ReviewRecord, ReviewStats,
            TagRecord, TagWithCount,
        },
        types::{SortDirection, SortField},
    },
};

use super::{
    PostgresRepositories, map_sqlx_error,
    util::{like_pattern, quantity_from_db, quantity_to_db},
};

const PRODUCT_SELECT: &str = "SELECT p.id, p.name, p.slug, p.description, p.short_description, \
        p.price, p.sale_price, p.stock_quantity, p.category_id, \
        c.name AS category_name, c.slug AS category_slug, \
        p.is_active, p.is_featured, p.created_at, p.updated_at \
    FROM products p \
    INNER JOIN categories c ON c.id = p.category_id";

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    slug: String,
    description: String,
    short_description: String,
    price: Decimal,
    sale_price: Option<Decimal>,
    stock_quantity: i32,
    category_id: Uuid,
    category_name: String,
    category_slug: String,
    is_active: bool,
    is_featured: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<ProductRow> for ProductRecord {
    type Error = RepoError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            slug: row.slug,
            description: row.description,
            short_description: row.short_description,
            price: row.price,
            sale_price: row.sale_price,
            stock_quantity: quantity_from_db(row.stock_quantity)?,
            category_id: row.category_id,
            category_name: row.category_name,
            category_slug: row.category_slug,
            is_active: row.is_active,
            is_featured: row.is_featured,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CategoryRow {
    id: Uuid,
    name: String,
    slug: String,
    description: String,
    is_active: bool,
    created_at: OffsetDateTime,
}

impl From<CategoryRow> for CategoryRecord {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            slug: row.slug,
            description: row.description,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CategoryCountRow {
    #[sqlx(flatten)]
    category: CategoryRow,
    product_count: i64,
}

#[derive(sqlx::FromRow)]
struct TagRow {
    id: Uuid,
    name: String,
    slug: String,
}

impl From<TagRow> for TagRecord {
    fn from(row: TagRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            slug: row.slug,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TagCountRow {
    #[sqlx(flatten)]
    tag: TagRow,
    product_count: i64,
}

#[derive(sqlx::FromRow)]
struct ReviewRow {
    id: Uuid,
    product_id: Uuid,
    user_id: Uuid,
    rating: i16,
    title: String,
    comment: String,
    created_at: OffsetDateTime,
}

impl TryFrom<ReviewRow> for ReviewRecord {
    type Error = RepoError;

    fn try_from(row: ReviewRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            product_id: row.product_id,
            user_id: row.user_id,
            rating: u8::try_from(row.rating).map_err(|_| {
                RepoError::from_persistence(format!("rating {} out of range", row.rating))
            })?,
            title: row.title,
            comment: row.comment,
            created_at: row.created_at,
        })
    }
}

const CATEGORY_COUNT_SELECT: &str = "SELECT c.id, c.name, c.slug, c.description, c.is_active, \
        c.created_at, COUNT(p.id) AS product_count \
    FROM categories c \
    LEFT JOIN products p ON p.category_id = c.id AND p.is_active \
    WHERE c.is_active";

const TAG_COUNT_SELECT: &str = "SELECT t.id, t.name, t.slug, COUNT(p.id) AS product_count \
    FROM tags t \
    INNER JOIN product_tags pt ON pt.tag_id = t.id \
    INNER JOIN products p ON p.id = pt.product_id AND p.is_active";

fn category_count(row: CategoryCountRow) -> Result<CategoryWithCount, RepoError> {
    Ok(CategoryWithCount {
        category: row.category.into(),
        product_count: PostgresRepositories::convert_count(row.product_count)?,
    })
}

fn tag_count(row: TagCountRow) -> Result<TagWithCount, RepoError> {
    Ok(TagWithCount {
        tag: row.tag.into(),
        product_count: PostgresRepositories::convert_count(row.product_count)?,
    })
}

impl PostgresRepositories {
    fn push_product_filter<'q>(qb: &mut QueryBuilder<'q, Postgres>, filter: &'q ProductFilter) {
        qb.push(" WHERE TRUE");
        if !filter.include_inactive {
            qb.push(" AND p.is_active");
        }
        if let Some(category) = filter.category.as_ref() {
            qb.push(" AND c.slug = ");
            qb.push_bind(category);
        }
        if let Some(tag) = filter.tag.as_ref() {
            qb.push(
                " AND EXISTS (SELECT 1 FROM product_tags pt INNER JOIN tags t ON t.id = pt.tag_id \
                 WHERE pt.product_id = p.id AND t.slug = ",
            );
            qb.push_bind(tag);
            qb.push(")");
        }
        if let Some(min_price) = filter.min_price {
            qb.push(" AND p.price >= ");
            qb.push_bind(min_price);
        }
        if let Some(max_price) = filter.max_price {
            qb.push(" AND p.price <= ");
            qb.push_bind(max_price);
        }
        if let Some(in_stock) = filter.in_stock {
            qb.push(if in_stock {
                " AND p.stock_quantity > 0"
            } else {
                " AND p.stock_quantity = 0"
            });
        }
        if let Some(search) = filter.search.as_ref() {
            let pattern = like_pattern(search);
            qb.push(" AND (p.name ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR p.description ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR p.short_description ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR c.name ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(
                " OR EXISTS (SELECT 1 FROM product_tags pt INNER JOIN tags t ON t.id = pt.tag_id \
                 WHERE pt.product_id = p.id AND t.name ILIKE ",
            );
            qb.push_bind(pattern);
            qb.push("))");
        }
    }

    /// Fail with `InvalidInput` unless every slug names an existing tag.
    async fn ensure_tags_exist(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        tag_slugs: &[String],
    ) -> Result<(), RepoError> {
        if tag_slugs.is_empty() {
            return Ok(());
        }
        let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags WHERE slug = ANY($1)")
            .bind(tag_slugs)
            .fetch_one(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        if Self::convert_count(known)? != tag_slugs.len() as u64 {
            return Err(RepoError::InvalidInput {
                message: "unknown tag slug".to_string(),
            });
        }
        Ok(())
    }

    async fn attach_tags(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        product_id: Uuid,
        tag_slugs: &[String],
    ) -> Result<(), RepoError> {
        if tag_slugs.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO product_tags (product_id, tag_id)
            SELECT $1, t.id FROM tags t WHERE t.slug = ANY($2)
            "#,
        )
        .bind(product_id)
        .bind(tag_slugs)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn fetch_product(&self, id: Uuid) -> Result<ProductRecord, RepoError> {
        self.find_product_by_id(id).await?.ok_or(RepoError::NotFound)
    }
}

fn sort_column(field: SortField) -> &'static str {
    match field {
        SortField::Name => "p.name",
        SortField::Price => "p.price",
        SortField::CreatedAt => "p.created_at",
    }
}

#[async_trait]
impl CatalogRepo for PostgresRepositories {
    async fn list_products(&self, query: &ProductQuery) -> Result<ProductSlice, RepoError> {
        let mut count_qb = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) FROM products p INNER JOIN categories c ON c.id = p.category_id",
        );
        Self::push_product_filter(&mut count_qb, &query.filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let offset = i64::try_from(query.offset).map_err(|_| RepoError::InvalidInput {
            message: "offset exceeds supported range".to_string(),
        })?;

        let mut qb = QueryBuilder::<Postgres>::new(PRODUCT_SELECT);
        Self::push_product_filter(&mut qb, &query.filter);
        qb.push(" ORDER BY ");
        qb.push(sort_column(query.sort.field));
        qb.push(match query.sort.direction {
            SortDirection::Asc => " ASC",
            SortDirection::Desc => " DESC",
        });
        qb.push(", p.id ASC LIMIT ");
        qb.push_bind(i64::from(query.limit));
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows: Vec<ProductRow> = qb
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(ProductSlice {
            items: rows
                .into_iter()
                .map(ProductRecord::try_from)
                .collect::<Result<_, _>>()?,
            total: Self::convert_count(total)?,
        })
    }

    async fn find_product_by_slug(&self, slug: &str) -> Result<Option<ProductRecord>, RepoError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!("{PRODUCT_SELECT} WHERE p.slug = $1"))
            .bind(slug)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        row.map(ProductRecord::try_from).transpose()
    }

    async fn find_product_by_id(&self, id: Uuid) -> Result<Option<ProductRecord>, RepoError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!("{PRODUCT_SELECT} WHERE p.id = $1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        row.map(ProductRecord::try_from).transpose()
    }

    async fn tags_for_product(&self, product_id: Uuid) -> Result<Vec<TagRecord>, RepoError> {
        let rows = sqlx::query_as::<_, TagRow>(
            r#"
            SELECT t.id, t.name, t.slug
            FROM tags t
            INNER JOIN product_tags pt ON pt.tag_id = t.id
            WHERE pt.product_id = $1
            ORDER BY t.name ASC, t.id ASC
            "#,
        )
        .bind(product_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(TagRecord::from).collect())
    }

    async fn review_stats(&self, product_id: Uuid) -> Result<ReviewStats, RepoError> {
        let (count, average): (i64, Option<Decimal>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), ROUND(AVG(rating), 2)
            FROM reviews
            WHERE product_id = $1 AND is_approved
            "#,
        )
        .bind(product_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(ReviewStats {
            count: Self::convert_count(count)?,
            average_rating: average,
        })
    }

    async fn list_reviews(
        &self,
        product_id: Uuid,
        offset: u64,
        limit: u32,
    ) -> Result<ReviewSlice, RepoError> {
        let offset = i64::try_from(offset).map_err(|_| RepoError::InvalidInput {
            message: "offset exceeds supported range".to_string(),
        })?;
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reviews WHERE product_id = $1 AND is_approved",
        )
        .bind(product_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let rows = sqlx::query_as::<_, ReviewRow>(
            r#"
            SELECT id, product_id, user_id, rating, title, comment, created_at
            FROM reviews
            WHERE product_id = $1 AND is_approved
            ORDER BY created_at DESC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(product_id)
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(ReviewSlice {
            items: rows
                .into_iter()
                .map(ReviewRecord::try_from)
                .collect::<Result<_, _>>()?,
            total: Self::convert_count(total)?,
        })
    }

    async fn list_categories_with_counts(&self) -> Result<Vec<CategoryWithCount>, RepoError> {
        let rows = sqlx::query_as::<_, CategoryCountRow>(&format!(
            "{CATEGORY_COUNT_SELECT} GROUP BY c.id ORDER BY c.name ASC, c.id ASC"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(category_count).collect()
    }

    async fn find_category_with_count(
        &self,
        slug: &str,
    ) -> Result<Option<CategoryWithCount>, RepoError> {
        let row = sqlx::query_as::<_, CategoryCountRow>(&format!(
            "{CATEGORY_COUNT_SELECT} AND c.slug = $1 GROUP BY c.id"
        ))
        .bind(slug)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(category_count).transpose()
    }

    async fn list_tags_with_counts(&self) -> Result<Vec<TagWithCount>, RepoError> {
        let rows = sqlx::query_as::<_, TagCountRow>(&format!(
            "{TAG_COUNT_SELECT} GROUP BY t.id ORDER BY product_count DESC, t.name ASC, t.id ASC"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(tag_count).collect()
    }

    async fn find_tag_with_count(&self, slug: &str) -> Result<Option<TagWithCount>, RepoError> {
        let row = sqlx::query_as::<_, TagCountRow>(&format!(
            "{TAG_COUNT_SELECT} WHERE t.slug = $1 GROUP BY t.id"
        ))
        .bind(slug)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(tag_count).transpose()
    }
}

#[async_trait]
impl CatalogWriteRepo for PostgresRepositories {
    async fn find_category_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<CategoryRecord>, RepoError> {
        let row = sqlx::query_as::<_, CategoryRow>(
            r#"
            SELECT id, name, slug, description, is_active, created_at
            FROM categories
            WHERE slug = $1
            "#,
        )
        .bind(slug)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(CategoryRecord::from))
    }

    async fn product_slug_exists(&self, slug: &str) -> Result<bool, RepoError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM products WHERE slug = $1)")
            .bind(slug)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn create_product(
        &self,
        params: CreateProductParams,
    ) -> Result<ProductRecord, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        Self::ensure_tags_exist(&mut tx, &params.tag_slugs).await?;

        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO products (
                name, slug, description, short_description, price, sale_price,
                stock_quantity, category_id, is_active, is_featured
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(&params.name)
        .bind(&params.slug)
        .bind(&params.description)
        .bind(&params.short_description)
        .bind(params.price)
        .bind(params.sale_price)
        .bind(quantity_to_db(params.stock_quantity)?)
        .bind(params.category_id)
        .bind(params.is_active)
        .bind(params.is_featured)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        Self::attach_tags(&mut tx, id, &params.tag_slugs).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        self.fetch_product(id).await
    }

    async fn update_product(
        &self,
        params: UpdateProductParams,
    ) -> Result<ProductRecord, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        if let Some(tag_slugs) = params.tag_slugs.as_deref() {
            Self::ensure_tags_exist(&mut tx, tag_slugs).await?;
        }

        let result = sqlx::query(
            r#"
            UPDATE products
            SET name = $2,
                description = $3,
                short_description = $4,
                price = $5,
                sale_price = $6,
                stock_quantity = $7,
                category_id = $8,
                is_active = $9,
                is_featured = $10,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(params.id)
        .bind(&params.name)
        .bind(&params.description)
        .bind(&params.short_description)
        .bind(params.price)
        .bind(params.sale_price)
        .bind(quantity_to_db(params.stock_quantity)?)
        .bind(params.category_id)
        .bind(params.is_active)
        .bind(params.is_featured)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }

        if let Some(tag_slugs) = params.tag_slugs.as_deref() {
            sqlx::query("DELETE FROM product_tags WHERE product_id = $1")
                .bind(params.id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            Self::attach_tags(&mut tx, params.id, tag_slugs).await?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        self.fetch_product(params.id).await
    }

    async fn remove_product(&self, id: Uuid) -> Result<ProductRemoval, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        sqlx::query_scalar::<_, Uuid>("SELECT id FROM products WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(RepoError::NotFound)?;

        let referenced: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM order_lines WHERE product_id = $1)",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let removal = if referenced {
            sqlx::query("UPDATE products SET is_active = FALSE, updated_at = now() WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            ProductRemoval::Deactivated
        } else {
            sqlx::query("DELETE FROM products WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            ProductRemoval::Deleted
        };

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(removal)
    }
}
