mod config;
mod db;
mod domain;
mod error;
mod middleware;
mod services;
mod state;
mod web;

use crate::config::Config;
use crate::services::email::EmailNotifier;
use crate::services::notifications::Dispatcher;
use crate::services::telegram::TelegramNotifier;
use crate::state::{AppState, Channels, SharedState};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to run database migrations: {}", e);
            e
        })?;
    tracing::info!("Database migrations completed");

    let channels = build_channels(&config);
    let (tx, rx) = Dispatcher::channel();
    tokio::spawn(Dispatcher::new(channels.notifiers()).run(rx));

    let shared: SharedState = Arc::new(AppState {
        pool,
        config: config.clone(),
        channels,
        notifications: tx,
        submit_limiter: middleware::RateLimiter::for_submissions(),
        login_limiter: middleware::RateLimiter::for_logins(),
    });

    let scheduler = JobScheduler::new().await?;

    // 06:00 UTC is 09:00 Moscow time.
    let shared_for_summary = shared.clone();
    scheduler
        .add(Job::new_async("0 0 6 * * *", move |_uuid, _l| {
            let state = shared_for_summary.clone();
            Box::pin(async move {
                if let Err(e) = send_daily_summary(&state).await {
                    tracing::error!("Failed to send daily summary: {:#}", e);
                }
            })
        })?)
        .await?;

    let shared_for_cleanup = shared.clone();
    scheduler
        .add(Job::new_async("0 */10 * * * *", move |_uuid, _l| {
            let state = shared_for_cleanup.clone();
            Box::pin(async move {
                state.submit_limiter.cleanup().await;
                state.login_limiter.cleanup().await;
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Scheduler started:");
    tracing::info!("  - Daily summary: 06:00 UTC");
    tracing::info!("  - Rate limiter cleanup: every 10 min");

    let app = Router::new()
        .merge(web::routes(shared))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on {}", config.server.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

fn build_channels(config: &Config) -> Channels {
    let admin_url = &config.server.admin_base_url;

    let telegram = match &config.telegram {
        Some(tg) => {
            tracing::info!("Telegram notifications enabled for chat {}", tg.chat_id);
            Some(Arc::new(TelegramNotifier::new(tg, admin_url)))
        }
        None => {
            tracing::warn!("TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID not set, Telegram notifications disabled");
            None
        }
    };

    let email = match &config.smtp {
        Some(smtp) => match EmailNotifier::new(smtp, config.routing.clone(), admin_url) {
            Ok(notifier) => {
                tracing::info!("Email notifications enabled via {}:{}", smtp.host, smtp.port);
                Some(Arc::new(notifier))
            }
            Err(e) => {
                tracing::error!("Email notifications disabled: {:#}", e);
                None
            }
        },
        None => {
            tracing::warn!("SMTP settings not set, email notifications disabled");
            None
        }
    };

    Channels { telegram, email }
}

async fn send_daily_summary(state: &SharedState) -> anyhow::Result<()> {
    let Some(telegram) = &state.channels.telegram else {
        tracing::debug!("Daily summary skipped: Telegram not configured");
        return Ok(());
    };
    let stats = db::feedback_stats(&state.pool, chrono::Utc::now()).await?;
    telegram.send_daily_summary(&stats).await?;
    tracing::info!("Daily summary sent ({} feedback(s) total)", stats.total_feedbacks);
    Ok(())
}
