mod app;
mod config;
mod db;
mod events;
mod state;
mod users;

use tracing_subscriber::EnvFilter;

use crate::{app::build_app, state::AppState};

/// Used when `RUST_LOG` is unset. Driver chatter from sqlx and the NATS client
/// is kept at warn so request spans stay readable.
const DEFAULT_LOG_FILTER: &str = "users=info,tower_http=info,sqlx=warn,async_nats=warn";

fn log_filter(raw: Option<String>) -> EnvFilter {
    raw.and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn init_tracing() {
    let filter = log_filter(std::env::var("RUST_LOG").ok());
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => subscriber.with_target(false).json().init(),
        _ => subscriber.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let app_state = AppState::init().await?;
    let app = build_app(app_state.clone());

    app::serve(app, &app_state).await
}
