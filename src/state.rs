use crate::config::Config;
use crate::middleware::RateLimiter;
use crate::services::email::EmailNotifier;
use crate::services::notifications::{NotificationJob, Notifier};
use crate::services::telegram::TelegramNotifier;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound channels that are configured for this deployment.
#[derive(Clone, Default)]
pub struct Channels {
    pub telegram: Option<Arc<TelegramNotifier>>,
    pub email: Option<Arc<EmailNotifier>>,
}

impl Channels {
    pub fn notifiers(&self) -> Vec<Arc<dyn Notifier>> {
        let mut out: Vec<Arc<dyn Notifier>> = Vec::new();
        if let Some(telegram) = &self.telegram {
            out.push(telegram.clone());
        }
        if let Some(email) = &self.email {
            out.push(email.clone());
        }
        out
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub channels: Channels,
    pub notifications: mpsc::Sender<NotificationJob>,
    pub submit_limiter: RateLimiter,
    pub login_limiter: RateLimiter,
}

pub type SharedState = Arc<AppState>;

#[cfg(test)]
pub(crate) fn test_state() -> (SharedState, mpsc::Receiver<NotificationJob>) {
    let config = crate::config::test_config();
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(std::time::Duration::from_millis(200))
        .connect_lazy(&config.database.url)
        .expect("lazy pool");
    let (tx, rx) = crate::services::notifications::Dispatcher::channel();
    let state = Arc::new(AppState {
        pool,
        config: Arc::new(config),
        channels: Channels::default(),
        notifications: tx,
        submit_limiter: RateLimiter::for_submissions(),
        login_limiter: RateLimiter::for_logins(),
    });
    (state, rx)
}
