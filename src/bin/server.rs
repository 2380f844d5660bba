use std::{env, fs::OpenOptions, net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{Router, extract::Request};
use axum_server::Handle;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use spendlog::{AppConfig, AppState, DEFAULT_MAX_LOG_BYTES, build_router, graceful_shutdown, open_db};

/// The JSON API server for spendlog.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long, env = "SPENDLOG_DB_PATH")]
    db_path: PathBuf,

    /// The port to serve the API from.
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Attach the debug block to every response.
    #[arg(long, env = "SPENDLOG_DEBUG")]
    debug: bool,

    /// A path prefix the API is served under, e.g. "/spendlog".
    #[arg(long, env = "SPENDLOG_BASE_PATH", default_value = "")]
    base_path: String,

    /// Where to write the request audit log.
    #[arg(long, env = "SPENDLOG_LOG_PATH", default_value = "logs/requests.log")]
    log_path: PathBuf,

    /// Do not write the request audit log.
    #[arg(long)]
    no_request_log: bool,

    /// The size in bytes at which the request audit log is rotated.
    #[arg(long, default_value_t = DEFAULT_MAX_LOG_BYTES)]
    log_max_bytes: u64,

    /// The local timezone as a canonical timezone name, e.g. "Pacific/Auckland".
    #[arg(long, env = "SPENDLOG_TIMEZONE", default_value = "Etc/UTC")]
    timezone: String,
}

#[tokio::main]
async fn main() {
    setup_logging();

    let args = Args::parse();

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));

    let secret = env::var("SECRET").expect("The environment variable 'SECRET' must be set");

    let config = AppConfig {
        debug: args.debug,
        base_path: args.base_path,
        log_path: (!args.no_request_log).then_some(args.log_path),
        log_max_bytes: args.log_max_bytes,
        local_timezone: args.timezone,
        ..AppConfig::default()
    };

    let conn = open_db(&args.db_path).expect("Could not open the database");
    let state = AppState::new(conn, &secret, config).expect("Could not initialize the database");

    let handle = Handle::new();
    tokio::spawn(graceful_shutdown(handle.clone()));

    let router = add_tracing_layer(build_router(state));

    tracing::info!("HTTP server listening on {}", addr);
    axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service())
        .await
        .expect("The server stopped with an error");
}

fn setup_logging() {
    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("Could not create log file");

    let debug_log = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Arc::new(log_file))
        .with_filter(filter::LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(stdout_log)
        .with(debug_log)
        .init();
}

fn add_tracing_layer(router: Router) -> Router {
    let tracing_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request| {
            let method = req.method();
            let uri = req.uri();

            tracing::debug_span!("request", %method, %uri)
        })
        // The dispatcher logs handler failures itself.
        .on_failure(());

    router.layer(tracing_layer)
}
