use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

mod config;
mod handler;
mod http;
mod logger;
mod proxy;
mod server;

/// Config file used when no path is given on the command line (extension optional)
const DEFAULT_CONFIG_PATH: &str = "config";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let cfg = config::Config::load_from(&config_path)?;

    logger::init(&cfg)?;

    // Worker count from config, otherwise one per core
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(workers) = cfg.server.workers {
        runtime_builder.worker_threads(workers);
    }

    let runtime = runtime_builder.build()?;
    runtime.block_on(async_main(cfg))
}

async fn async_main(cfg: config::Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = cfg.get_socket_addr()?;
    // Fails on a malformed ORIGIN_URL before the port is bound
    let state = Arc::new(config::AppState::new(&cfg)?);
    let listener = server::create_reusable_listener(addr)?;

    let origin = state.proxy.origin().map(proxy::OriginBase::as_str);
    logger::log_server_start(&addr, &cfg, origin);

    let shutdown = Arc::new(tokio::sync::Notify::new());
    server::start_signal_handler(Arc::clone(&shutdown));

    server::start_server_loop(listener, state, Arc::new(AtomicUsize::new(0)), shutdown).await;
    Ok(())
}
