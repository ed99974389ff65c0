mod collectors;
mod config;
mod http;
mod metrics;
mod state;
mod vitals;

use axum::serve;
use clap::Parser;
use collectors::system::HostCounters;
use config::Config;
use metrics::Metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vitals::VitalsAggregator;

const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

#[derive(Parser, Debug)]
#[command(name = "vitalsd")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Overrides `listen` from the config file.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) if err.is_not_found() && cli.config == DEFAULT_CONFIG_PATH => {
            info!(path = %cli.config, "no config file, using defaults");
            Config::default()
        }
        Err(err) => {
            error!(error = %err, "failed to load config");
            std::process::exit(1);
        }
    };
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
        if let Err(err) = cfg.validate() {
            error!(error = %err, "invalid --listen");
            std::process::exit(1);
        }
    }

    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "invalid listen address");
            std::process::exit(1);
        }
    };

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            std::process::exit(1);
        }
    };

    let sensors = match collectors::open_sensor_source(&cfg.sensors) {
        Ok(source) => source,
        Err(err) => {
            error!(error = %err, "failed to open sensor source");
            std::process::exit(1);
        }
    };
    info!(
        backend = sensors.backend(),
        devices = sensors.devices().len(),
        "sensor source opened"
    );
    if sensors.devices().is_empty() {
        warn!("sensor source reports no devices, temperatures will be N/A");
    }

    // Baseline counters are read here, before the listener accepts anything.
    let counters = Box::new(HostCounters::new(&cfg.counters.diskstats_path));
    let aggregator = VitalsAggregator::new(
        sensors,
        counters,
        cfg.sensors.gpu_name_marker.clone(),
        metrics.clone(),
    );
    let aggregator = Arc::new(Mutex::new(aggregator));

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, listen = %addr, "failed to start HTTP server");
            std::process::exit(1);
        }
    };
    info!(listen = %addr, "vitalsd listening");

    let app = http::build_router(metrics, aggregator);
    let server = serve(listener, app).with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("received Ctrl+C, shutting down");
    });

    if let Err(err) = server.await {
        error!(error = %err, "HTTP server error");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
