use clap::Parser;
use std::{net::SocketAddr, path::Path, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use ttm_hub::{router, HubConfig, HubState};
use ttm_storage::StudioStore;

#[derive(Parser, Debug)]
#[command(name = "ttm-hub")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value = "")]
    db: String,
    #[arg(long, default_value = "")]
    site_base: String,
    #[arg(long, default_value = "")]
    rebuild_hook: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    init_logging(&config);

    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };

    if let Some(parent) = Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                error!(event = "data_dir_error", error = %err);
                return;
            }
        }
    }
    let store = match StudioStore::open(&config.db_path) {
        Ok(value) => value,
        Err(err) => {
            error!(event = "store_open_error", error = %err, db = %config.db_path);
            return;
        }
    };

    let hub = Arc::new(HubState::new(config.clone(), store));
    let app = router(hub);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "bind_error", error = %err, addr = %config.addr);
            return;
        }
    };

    info!(event = "hub_start", addr = %config.addr, db = %config.db_path);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "hub_shutdown");
    };

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(event = "hub_error", error = %err);
    }
}

fn load_config() -> HubConfig {
    let args = Args::parse();
    let defaults = HubConfig::default();
    HubConfig {
        addr: resolve(&args.addr, "TTM_HUB_ADDR", &defaults.addr),
        db_path: resolve(&args.db, "TTM_DB_PATH", &defaults.db_path),
        site_base: resolve(&args.site_base, "TTM_SITE_BASE", &defaults.site_base),
        rebuild_hook: {
            let hook = resolve(&args.rebuild_hook, "TTM_REBUILD_HOOK_URL", "");
            if hook.is_empty() {
                None
            } else {
                Some(hook)
            }
        },
        debug: args.debug || env_true("TTM_HUB_DEBUG"),
    }
}

fn resolve(flag: &str, env_key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var(env_key) {
        if !value.trim().is_empty() {
            return value;
        }
    }
    default.to_string()
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn init_logging(config: &HubConfig) {
    let level = if config.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
