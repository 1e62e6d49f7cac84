#![cfg(not(tarpaulin_include))]

use log::error;
use sheetview::{app, config::Config};

/// Main entry point for the web application
///
/// Loads `.env` if present, reads the server settings from the environment
/// and serves the admin and viewer API until the process is stopped.
///
/// # Environment
/// * `ADMIN_USERNAME`, `ADMIN_PASSWORD` - the single admin account (required)
/// * `HOST`, `PORT` - listen address, `127.0.0.1:8000` by default
/// * `CORS_ORIGIN` - allowed browser origin, any origin when unset
/// * `RUST_LOG` - log filter, `info` by default
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    app::run(config).await
}
