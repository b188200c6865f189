use std::{process, sync::Arc};

use storefront::{
    application::{
        admin::AdminProductService,
        cart::CartService,
        catalog::{CatalogInvalidator, CatalogPolicy, CatalogService},
        checkout::CheckoutService,
        error::AppError,
        health::{HealthPolicy, HealthService},
        locks::KeyedLocks,
        orders::OrderService,
        payments::PaymentGateway,
    },
    cache::{CacheConfig, CacheStore, MemoryCacheStore},
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, AdminToken, ApiState},
        payments::gateway_from_settings,
        system::SysinfoProbe,
        telemetry,
    },
};
use tokio::{signal, sync::watch};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_deref()
        .ok_or_else(|| AppError::validation("database.url must be configured"))?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    PostgresRepositories::run_migrations(repositories.pool())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    info!(target = "storefront::migrate", "migrations applied");
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    PostgresRepositories::run_migrations(repositories.pool())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let state = build_api_state(repositories, &settings)?;
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "storefront::serve",
        addr = %settings.server.addr,
        "listening"
    );

    let grace = settings.server.graceful_shutdown;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut server_rx = shutdown_rx.clone();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = server_rx.wait_for(|stop| *stop).await;
        })
        .into_future();
    tokio::pin!(server);

    // Drain in-flight requests once a signal arrives, but not forever.
    let mut deadline_rx = shutdown_rx;
    tokio::select! {
        result = &mut server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = async move {
            let _ = deadline_rx.wait_for(|stop| *stop).await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                target = "storefront::serve",
                grace_seconds = grace.as_secs(),
                "graceful shutdown timed out"
            );
        }
    }
    Ok(())
}

fn build_api_state(
    repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<ApiState, AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new(&cache_config));

    let catalog_policy = CatalogPolicy {
        default_page_size: settings.catalog.default_page_size,
        max_page_size: settings.catalog.max_page_size,
        cache_ttl: cache_config.default_ttl,
        cache_timeout: settings.catalog.cache_timeout,
        query_timeout: settings.catalog.query_timeout,
    };
    let invalidator = CatalogInvalidator::new(cache.clone(), settings.catalog.cache_timeout);
    let locks = Arc::new(KeyedLocks::new());
    let gateway: Arc<dyn PaymentGateway> =
        Arc::from(gateway_from_settings(&settings.payments).map_err(AppError::from)?);
    if settings.payments.endpoint.is_none() {
        info!(
            target = "storefront::serve",
            "no payment endpoint configured, orders settle manually"
        );
    }

    let health_policy = HealthPolicy {
        probe_timeout: settings.health.probe_timeout,
        disk_path: settings.health.disk_path.clone(),
        disk_max_percent: settings.health.disk_max_percent,
        memory_min_mb: settings.health.memory_min_mb,
    };

    Ok(ApiState {
        catalog: Arc::new(CatalogService::new(
            repositories.clone(),
            cache.clone(),
            catalog_policy,
        )),
        carts: Arc::new(CartService::new(
            repositories.clone(),
            repositories.clone(),
            locks.clone(),
        )),
        checkout: Arc::new(CheckoutService::new(
            repositories.clone(),
            repositories.clone(),
            gateway,
            locks,
            invalidator.clone(),
            settings.checkout.pricing,
            settings.checkout.currency.clone(),
        )),
        orders: Arc::new(OrderService::new(repositories.clone(), invalidator.clone())),
        admin_products: Arc::new(AdminProductService::new(
            repositories.clone(),
            repositories.clone(),
            invalidator,
        )),
        health: Arc::new(HealthService::new(
            repositories,
            cache,
            Arc::new(SysinfoProbe),
            health_policy,
        )),
        admin_token: settings
            .admin
            .api_token
            .as_deref()
            .map(|token| Arc::new(AdminToken::new(token))),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!(target = "storefront::serve", "shutdown signal received");
}
