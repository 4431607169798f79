use actix_web::{web, App, HttpServer};
use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::RwLock;

use packetwatch::api::routes;
use packetwatch::detector::model_client::ModelClient;
use packetwatch::models::config::{AppConfig, DEFAULT_ENDPOINT};
use packetwatch::session::manager::SessionManager;
use packetwatch::stream::transport::{Connector, WebSocketConnector};
use packetwatch::utils::logging;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Live network telemetry monitor with anomaly classification")]
struct Args {
    /// Telemetry stream URL
    #[clap(short, long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Port for the REST API server
    #[clap(short, long, default_value = "3000")]
    port: u16,

    /// Seconds to wait before reconnecting after a dropped stream
    #[clap(long, default_value = "3")]
    reconnect_delay_secs: u64,

    /// Number of events kept in the rolling window
    #[clap(long, default_value = "100")]
    event_window: usize,

    /// Number of anomalies kept in the anomaly window
    #[clap(long, default_value = "20")]
    anomaly_window: usize,

    /// External anomaly model endpoint
    #[clap(long)]
    model_url: Option<String>,

    /// Log level (trace, debug, info, warn, error, off)
    #[clap(long, default_value = "info")]
    log_level: String,

    /// Start monitoring as soon as the server is up
    #[clap(long)]
    autostart: bool,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_logger(logging::get_log_level(&args.log_level));

    info!("Starting PacketWatch v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig {
        endpoint: args.endpoint,
        port: args.port,
        reconnect_delay_secs: args.reconnect_delay_secs,
        event_window: args.event_window,
        anomaly_window: args.anomaly_window,
        model_url: args.model_url,
    };

    let model_client = web::Data::new(ModelClient::new(config.model_url.clone()));
    if !model_client.is_configured() {
        warn!("No anomaly model configured, /api/analyze will report degraded results");
    }

    let connector: Arc<dyn Connector> = Arc::new(WebSocketConnector);
    let session_manager = Arc::new(RwLock::new(SessionManager::new(config.clone(), connector)));

    if args.autostart {
        let session_id = session_manager.write().await.start_session(None)?;
        info!("Autostarted monitoring session {}", session_id);
    }

    let app_state = web::Data::new(session_manager.clone());

    info!(
        "Starting PacketWatch API server on port {} (stream: {})",
        config.port, config.endpoint
    );

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .app_data(model_client.clone())
            .configure(routes::configure)
    })
    .bind(format!("127.0.0.1:{}", config.port))?
    .run()
    .await?;

    let mut manager = session_manager.write().await;
    if manager.is_running() {
        manager.stop_session().await?;
        info!("Monitoring session closed on shutdown");
    }

    Ok(())
}
