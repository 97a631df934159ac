use tracing_subscriber::EnvFilter;

/// Installs the global compact subscriber. `RUST_LOG` overrides the default
/// `debug` level; database and HTTP client chatter stays at `warn`.
pub fn setup_logger() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("debug"))
        .add_directive(quiet("sqlx=warn"))
        .add_directive(quiet("hyper_util=warn"))
        .add_directive(quiet("reqwest=warn"))
        .add_directive(quiet("tract_core=warn"));

    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_ansi(true)
        .compact()
        .with_env_filter(filter)
        .init();
}

fn quiet(directive: &'static str) -> tracing_subscriber::filter::Directive {
    directive
        .parse()
        .unwrap_or_else(|_| tracing::level_filters::LevelFilter::WARN.into())
}
