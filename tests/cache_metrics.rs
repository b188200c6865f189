mod support;

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use metrics_util::debugging::DebuggingRecorder;
use storefront::application::catalog::ProductListRequest;
use storefront::cache::{CacheConfig, MemoryCacheStore};

use support::{FailingCache, Harness};

#[tokio::test]
async fn catalog_reads_emit_cache_and_checkout_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // A single-entry cache so the second distinct key evicts the first.
    let config = CacheConfig {
        capacity: NonZeroUsize::MIN,
        ..Default::default()
    };
    let harness = Harness::with_cache(Arc::new(MemoryCacheStore::new(&config)));
    let category = harness.store.seed_category("Books", "books").await;
    let novel = harness
        .store
        .seed_product(&category, "Novel", "12.00", None, 5)
        .await;
    harness
        .store
        .seed_product(&category, "Atlas", "30.00", None, 5)
        .await;

    let catalog = &harness.state.catalog;
    catalog
        .list_products(ProductListRequest::default())
        .await
        .expect("miss");
    catalog
        .list_products(ProductListRequest::default())
        .await
        .expect("hit");
    catalog.product_detail("atlas").await.expect("evicts listing");

    let owner = storefront::domain::types::CartOwner::Session("metrics".to_string());
    let cart = harness
        .state
        .carts
        .add_item(&owner, novel.id, 1)
        .await
        .expect("add");
    harness
        .state
        .checkout
        .checkout(&owner, cart.id.expect("cart id"))
        .await
        .expect("checkout");
    harness.state.health.check().await;

    let failing = Harness::with_cache(Arc::new(FailingCache));
    failing
        .state
        .catalog
        .list_categories()
        .await
        .expect("falls back to the store");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "storefront_cache_hit_total",
        "storefront_cache_miss_total",
        "storefront_cache_evict_total",
        "storefront_cache_error_total",
        "storefront_checkout_total",
        "storefront_health_probe_ms",
    ];
    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
