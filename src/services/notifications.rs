//! Post-commit notification fan-out.
//!
//! Handlers push a `NotificationJob` onto a bounded channel after the record
//! is committed; a single `Dispatcher` task drains it and calls every
//! configured notifier. Delivery failures are logged and never reach the
//! submitter.

use crate::domain::models::{FeedbackRecord, Urgency};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct NotificationJob {
    pub record: FeedbackRecord,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, record: &FeedbackRecord) -> anyhow::Result<()>;
}

/// Team alerts go out for high urgency only.
pub fn needs_team_alert(record: &FeedbackRecord) -> bool {
    record.urgency == Urgency::High
}

/// Queue a job without waiting. A full or closed queue drops the job.
pub fn enqueue(tx: &mpsc::Sender<NotificationJob>, record: FeedbackRecord) -> bool {
    let id = record.id;
    match tx.try_send(NotificationJob { record }) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!("Notification queue full, dropping job for feedback {}", id);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::error!("Notification dispatcher stopped, dropping job for feedback {}", id);
            false
        }
    }
}

pub struct Dispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl Dispatcher {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn channel() -> (mpsc::Sender<NotificationJob>, mpsc::Receiver<NotificationJob>) {
        mpsc::channel(QUEUE_CAPACITY)
    }

    /// Deliver one job through every notifier. Returns how many failed.
    pub async fn dispatch(&self, job: &NotificationJob) -> usize {
        let mut failed = 0;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(&job.record).await {
                failed += 1;
                tracing::error!(
                    "Failed to deliver {} notification for feedback {}: {:#}",
                    notifier.name(),
                    job.record.id,
                    e
                );
            }
        }
        failed
    }

    /// Drain the queue until every sender is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<NotificationJob>) {
        tracing::info!(
            "Notification dispatcher started with {} channel(s)",
            self.notifiers.len()
        );
        while let Some(job) = rx.recv().await {
            self.dispatch(&job).await;
        }
        tracing::info!("Notification dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::lifecycle::sample_record;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl Notifier for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn notify(&self, record: &FeedbackRecord) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(record.id);
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Notifier for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn notify(&self, _record: &FeedbackRecord) -> anyhow::Result<()> {
            anyhow::bail!("smtp unreachable")
        }
    }

    #[tokio::test]
    async fn failing_channel_does_not_block_others() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(vec![Arc::new(Broken), recorder.clone()]);

        let failed = dispatcher
            .dispatch(&NotificationJob {
                record: sample_record(Utc::now()),
            })
            .await;
        assert_eq!(failed, 1);
        assert_eq!(*recorder.seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn run_drains_queue_until_senders_drop() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(vec![recorder.clone()]);
        let (tx, rx) = Dispatcher::channel();

        for id in 1..=3 {
            let mut record = sample_record(Utc::now());
            record.id = id;
            assert!(enqueue(&tx, record));
        }
        drop(tx);
        dispatcher.run(rx).await;

        assert_eq!(*recorder.seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        assert!(enqueue(&tx, sample_record(Utc::now())));
        assert!(!enqueue(&tx, sample_record(Utc::now())));
    }

    #[tokio::test]
    async fn closed_queue_reports_failure() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        assert!(!enqueue(&tx, sample_record(Utc::now())));
    }

    #[test]
    fn only_high_urgency_alerts_the_team() {
        let mut record = sample_record(Utc::now());
        assert!(needs_team_alert(&record));
        record.urgency = Urgency::Medium;
        assert!(!needs_team_alert(&record));
    }
}
