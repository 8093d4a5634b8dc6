//! Snapgram binary entry point
//!
//! Loads configuration, optionally signs in with `SNAPGRAM_EMAIL` /
//! `SNAPGRAM_PASSWORD`, then prints the signed-in user and the first pages
//! of the feed as read through the query cache.

use snapgram::models::Credentials;
use snapgram::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Feed pages loaded at startup
const STARTUP_PAGES: usize = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("snapgram={}", config.logging.level).into());
    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!(
        endpoint = %config.backend.base_url(),
        project_id = %config.backend.project_id,
        "Configuration loaded"
    );

    // 3. Initialize metrics
    snapgram::metrics::init_metrics();

    // 4. Initialize application state
    let state = AppState::new(config)?;

    // 5. Sign in when credentials are provided
    if let (Ok(email), Ok(password)) = (
        std::env::var("SNAPGRAM_EMAIL"),
        std::env::var("SNAPGRAM_PASSWORD"),
    ) {
        state
            .sign_in_account()
            .mutate(Credentials { email, password })
            .await?;
    }

    // 6. Read through the cache
    match state.check_auth_user().await? {
        Some(user) => println!("Signed in as {} ({})", user.name, user.email),
        None => println!("Not signed in"),
    }

    let feed = state.infinite_posts();
    let page = feed.load_pages(STARTUP_PAGES).await;
    if let Some(error) = page.error {
        return Err(error.into());
    }
    for post in page.data.iter().flat_map(|data| data.items()) {
        println!("{}  {}", post.id, post.caption);
    }

    tracing::debug!(metrics = %snapgram::metrics::gather()?, "Final metrics");
    Ok(())
}
