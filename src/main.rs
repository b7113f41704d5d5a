use std::sync::Arc;

use signup_flow::analytics::{AnalyticsSink, FanoutAnalytics, HttpAnalytics, TracingAnalytics};
use signup_flow::config::{ServerConfig, SinkBackend};
use signup_flow::flow::{FlowDefinition, FlowState, ValidatorRegistry, presets};
use signup_flow::shell::{
    FlowRegistry, ShellRouteState, cors_layer, shell_routes, spawn_sweep_task,
};
use signup_flow::sink::{LibSqlSink, RestSink, SubmissionSink};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServerConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    eprintln!("📝 Signup Flow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api/signup/flows", config.port);

    // ── Submission sink ─────────────────────────────────────────────────
    let sink: Arc<dyn SubmissionSink> = match &config.sink {
        SinkBackend::LibSql { path } => {
            let sink = LibSqlSink::new_local(path).await.unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", path.display(), e);
                std::process::exit(1);
            });
            eprintln!("   Database: {}", path.display());
            Arc::new(sink)
        }
        SinkBackend::Rest {
            url,
            api_key,
            timeout,
        } => {
            eprintln!("   REST store: {url}");
            Arc::new(RestSink::new(url.clone(), api_key.clone(), *timeout))
        }
    };

    // ── Analytics ───────────────────────────────────────────────────────
    let mut analytics = FanoutAnalytics::new().with(Arc::new(TracingAnalytics));
    if let Some(capture) = &config.analytics {
        eprintln!("   Analytics: {}", capture.host);
        analytics.add(Arc::new(HttpAnalytics::new(
            capture.host.clone(),
            capture.api_key.clone(),
        )));
    }
    let analytics: Arc<dyn AnalyticsSink> = Arc::new(analytics);

    // ── Flows ───────────────────────────────────────────────────────────
    let (pmf, pmf_config) = presets::product_market_fit()?;
    let (waitlist, waitlist_config) = presets::waitlist()?;
    let mut registry = FlowRegistry::new(sink, analytics);

    if let Some(path) = &config.flow_file {
        let (sequence, flow_config) =
            FlowDefinition::load_and_build(path, &ValidatorRegistry::new()).unwrap_or_else(|e| {
                eprintln!("Error: Failed to load flow from {}: {}", path.display(), e);
                std::process::exit(1);
            });
        eprintln!("   Flow file: {}", path.display());
        registry = registry.with_flow("custom", sequence, flow_config);
    }
    let registry = registry
        .with_flow(presets::PRODUCT_MARKET_FIT, pmf, pmf_config)
        .with_flow(presets::WAITLIST, waitlist, waitlist_config)
        .with_success_hook(Arc::new(|state: &FlowState| {
            tracing::info!(flow_id = %state.flow_id, "Signup captured");
        }));

    let registry = Arc::new(registry);
    let _sweep = spawn_sweep_task(Arc::clone(&registry), config.flow_ttl);
    eprintln!("   Flow TTL: {}s", config.flow_ttl.as_secs());

    // ── HTTP server ─────────────────────────────────────────────────────
    let cors = cors_layer(config.allowed_origin.as_deref())?;
    let app = shell_routes(ShellRouteState { registry }).layer(cors);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Signup flow server started");
    axum::serve(listener, app).await?;

    Ok(())
}
