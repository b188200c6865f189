//! Slug generation for products.
//!
//! Slugs are ASCII (`slug` crate). Uniqueness is checked through an async
//! predicate so the generation logic stays independent of storage.

use std::future::Future;

use slug::slugify;
use thiserror::Error;

const MAX_SUFFIX_ATTEMPTS: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug source text is empty")]
    EmptyInput,
    #[error("failed to derive slug from `{input}`")]
    Unrepresentable { input: String },
    #[error("no free slug found for `{base}`")]
    Exhausted { base: String },
}

#[derive(Debug, Error)]
pub enum SlugAsyncError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error(transparent)]
    Slug(#[from] SlugError),
    #[error(transparent)]
    Predicate(E),
}

pub fn derive_slug(input: &str) -> Result<String, SlugError> {
    if input.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }
    let candidate = slugify(input);
    if candidate.is_empty() {
        return Err(SlugError::Unrepresentable {
            input: input.to_string(),
        });
    }
    Ok(candidate)
}

/// Derive a slug and append `-2`, `-3`, ... until `is_free` accepts it.
pub async fn generate_unique_slug<F, Fut, E>(
    input: &str,
    mut is_free: F,
) -> Result<String, SlugAsyncError<E>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let base = derive_slug(input)?;
    if is_free(base.clone()).await.map_err(SlugAsyncError::Predicate)? {
        return Ok(base);
    }

    for attempt in 2..=MAX_SUFFIX_ATTEMPTS + 1 {
        let candidate = format!("{base}-{attempt}");
        if is_free(candidate.clone())
            .await
            .map_err(SlugAsyncError::Predicate)?
        {
            return Ok(candidate);
        }
    }

    Err(SlugError::Exhausted { base }.into())
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::*;

    #[test]
    fn derive_slug_lowercases_and_hyphenates() {
        assert_eq!(
            derive_slug("  Noise-Cancelling Headphones ").expect("slug"),
            "noise-cancelling-headphones"
        );
        assert_eq!(derive_slug("   "), Err(SlugError::EmptyInput));
    }

    #[tokio::test]
    async fn taken_slugs_get_counter_suffix() {
        let taken = Arc::new(Mutex::new(vec![
            "usb-c-cable".to_string(),
            "usb-c-cable-2".to_string(),
        ]));

        let slug = generate_unique_slug("USB-C Cable", |candidate| {
            let taken = taken.clone();
            async move { Ok::<_, Infallible>(!taken.lock().await.contains(&candidate)) }
        })
        .await
        .expect("unique slug");

        assert_eq!(slug, "usb-c-cable-3");
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let result =
            generate_unique_slug("Lamp", |_| async { Ok::<_, Infallible>(false) }).await;
        assert!(matches!(
            result,
            Err(SlugAsyncError::Slug(SlugError::Exhausted { .. }))
        ));
    }
}
