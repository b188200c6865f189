use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    assert_eq!(settings.cache.capacity.get(), 1024);
    assert_eq!(settings.cache.ttl, Duration::from_secs(900));
    assert_eq!(settings.catalog.max_page_size, 100);
    assert_eq!(settings.catalog.cache_timeout, Duration::from_millis(100));
    assert_eq!(settings.health.probe_timeout, Duration::from_millis(2000));
    assert_eq!(settings.checkout.pricing, PricingPolicy::default());
    assert_eq!(settings.checkout.currency, "USD");
    assert!(settings.payments.endpoint.is_none());
    assert!(settings.admin.api_token.is_none());
}

#[test]
fn zero_cache_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.capacity = Some(0);
    let err = Settings::from_raw(raw).expect_err("capacity zero");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.capacity",
            ..
        }
    ));
}

#[test]
fn default_page_size_cannot_exceed_cap() {
    let mut raw = RawSettings::default();
    raw.catalog.default_page_size = Some(50);
    raw.catalog.max_page_size = Some(25);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn checkout_money_parses_from_strings() {
    let mut raw = RawSettings::default();
    raw.checkout.free_shipping_threshold = Some("75.00".to_string());
    raw.checkout.tax_rate = Some("0.2".to_string());
    raw.checkout.currency = Some("eur".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.checkout.pricing.free_shipping_threshold,
        Decimal::from(75)
    );
    assert_eq!(settings.checkout.pricing.tax_rate, Decimal::new(2, 1));
    assert_eq!(settings.checkout.currency, "EUR");

    let mut raw = RawSettings::default();
    raw.checkout.flat_shipping_fee = Some("-1".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn blank_secrets_read_as_unset() {
    let mut raw = RawSettings::default();
    raw.admin.api_token = Some("   ".to_string());
    raw.payments.endpoint = Some(String::new());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.admin.api_token.is_none());
    assert!(settings.payments.endpoint.is_none());
}

#[test]
fn payment_endpoint_must_be_http() {
    let mut raw = RawSettings::default();
    raw.payments.endpoint = Some("ftp://pay.example".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["storefront"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_migrate_arguments() {
    let args = CliArgs::parse_from([
        "storefront",
        "migrate",
        "--database-url",
        "postgres://example",
    ]);

    match args.command.expect("migrate command") {
        Command::Migrate(migrate) => {
            assert_eq!(
                migrate.database.database_url.as_deref(),
                Some("postgres://example")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "storefront",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--database-url",
        "postgres://override",
        "--cache-ttl-seconds",
        "60",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.database.database_url.as_deref(),
                Some("postgres://override")
            );
            assert_eq!(serve.overrides.cache_ttl_seconds, Some(60));
        }
        _ => panic!("wrong command parsed"),
    }
}
