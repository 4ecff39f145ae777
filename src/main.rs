use docrelay::bus::{BusTransport, RedisBus};
use docrelay::clients::SupabaseSink;
use docrelay::config::Config;
use docrelay::routes::create_router;
use docrelay::services::persistence::DocumentSink;
use docrelay::AppState;
use std::panic;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "docrelay=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        process::exit(1);
    });
    if config.is_development() {
        info!("Running in development mode");
    }

    let relay_settings = config.relay_settings().unwrap_or_else(|e| {
        error!("Invalid relay configuration: {}", e);
        process::exit(1);
    });

    let bus_settings = config.bus_settings().unwrap_or_else(|e| {
        error!("Invalid bus configuration: {}", e);
        process::exit(1);
    });

    let redis = match RedisBus::connect(bus_settings).await {
        Ok(bus) => Arc::new(bus),
        Err(e) => {
            error!("❌ Could not connect to Redis: {}", e);
            process::exit(1);
        }
    };
    let shutdown = CancellationToken::new();
    let monitor = redis.spawn_health_monitor(shutdown.clone());

    // Persistence is optional
    let sink: Option<Arc<dyn DocumentSink>> = match config.sink_settings() {
        Some(settings) => match SupabaseSink::new(settings) {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                error!("Failed to build persistence client: {}", e);
                process::exit(1);
            }
        },
        None => {
            warn!("Supabase settings incomplete - document autosave is disabled");
            None
        }
    };

    let bus: Arc<dyn BusTransport> = redis;
    let state = Arc::new(AppState::new(relay_settings, bus, sink));
    let app_routes = create_router(state.clone(), &config.cors_origins());

    // Start the HTTP/WebSocket server
    let listener = match tokio::net::TcpListener::bind(config.server_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.server_address(), e);
            process::exit(1);
        }
    };

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 WebSocket available at ws://{}/ws/{{doc_id}}", config.server_address());
    info!("📚 OpenAPI document at http://{}/api-docs/openapi.json", config.server_address());

    if let Err(e) = axum::serve(listener, app_routes)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    info!("Shutting down...");
    state.shutdown().await;
    shutdown.cancel();
    let _ = monitor.await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
