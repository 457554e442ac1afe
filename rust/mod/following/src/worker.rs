use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::emitter::NotificationEmitter;
use crate::engine::FollowingEngine;
use crate::error::FollowingError;
use crate::model::OutboxStatus;

/// Configuration for the outbox dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Fallback scan interval when no wake-up arrives (seconds).
    pub poll_interval: u64,
    /// Entries delivered per pass.
    pub batch_size: u32,
    /// Failed attempts before an entry is marked DEAD.
    pub max_attempts: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: 5,
            batch_size: 50,
            max_attempts: 5,
        }
    }
}

/// Counters for one dispatcher pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: u32,
    pub retried: u32,
    pub dead: u32,
}

/// Deliver up to `batch_size` pending entries, oldest first.
pub async fn drain_once(
    engine: &FollowingEngine,
    emitter: &dyn NotificationEmitter,
    config: &DispatcherConfig,
) -> Result<DrainReport, FollowingError> {
    let outbox = engine.outbox();
    let mut report = DrainReport::default();

    for entry in outbox.pending(config.batch_size)? {
        match emitter.emit(&entry.message_id, &entry.notification).await {
            Ok(()) => {
                outbox.mark_delivered(entry.id)?;
                report.delivered += 1;
            }
            Err(e) => {
                warn!(id = entry.id, attempt = entry.attempts + 1, "notification delivery failed: {e}");
                match outbox.mark_failed(entry.id, &e.to_string(), config.max_attempts)? {
                    OutboxStatus::Dead => report.dead += 1,
                    _ => report.retried += 1,
                }
            }
        }
    }
    Ok(report)
}

/// Handle to a running dispatcher task.
pub struct Dispatcher {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Stop the loop and wait for the pass in flight to record its results.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("notification dispatcher task failed: {e}");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.handle
            .lock()
            .map(|h| h.as_ref().is_none_or(|t| t.is_finished()))
            .unwrap_or(true)
    }
}

/// Start the outbox dispatcher.
///
/// Wakes when the engine commits a new notification or every
/// `poll_interval`, whichever comes first. A pass that has started runs to
/// completion before the task exits.
pub fn start(
    engine: Arc<FollowingEngine>,
    emitter: Arc<dyn NotificationEmitter>,
    config: DispatcherConfig,
) -> Dispatcher {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let interval = Duration::from_secs(config.poll_interval.max(1));

    let handle = tokio::spawn(async move {
        info!(
            "notification dispatcher started (interval={interval:?}, batch={})",
            config.batch_size
        );
        let notify = Arc::clone(engine.notify());
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("notification dispatcher stopped");
                    break;
                }
                _ = notify.notified() => debug!("dispatcher woken"),
                _ = tokio::time::sleep(interval) => debug!("dispatcher poll"),
            }

            // Keep draining while full batches come back.
            loop {
                match drain_once(&engine, emitter.as_ref(), &config).await {
                    Ok(report) => {
                        if report.delivered + report.retried + report.dead > 0 {
                            info!(
                                delivered = report.delivered,
                                retried = report.retried,
                                dead = report.dead,
                                "dispatcher pass"
                            );
                        }
                        // Failures wait for the next tick instead of spinning.
                        if report.delivered < config.batch_size || report.retried > 0 {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("dispatcher error: {e}");
                        break;
                    }
                }
                if token.is_cancelled() {
                    break;
                }
            }
        }
    });

    Dispatcher {
        cancel,
        handle: Mutex::new(Some(handle)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::MemoryEmitter;
    use crate::model::{RequestStatus, RequestUpdate};
    use usergraph_core::{DirectoryUser, StaticDirectory};
    use usergraph_sql::{SQLStore, SqliteStore};

    fn engine() -> Arc<FollowingEngine> {
        let db: Arc<dyn SQLStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let directory = StaticDirectory::new();
        for (id, name) in [(1, "alice"), (2, "bob")] {
            directory.insert(DirectoryUser {
                id,
                username: name.into(),
                identity_provider_id: format!("auth0|{id}"),
                blocked: vec![],
                follow_notifications: true,
            });
        }
        Arc::new(FollowingEngine::new(db, Arc::new(directory)).unwrap())
    }

    #[tokio::test]
    async fn drain_delivers_and_marks() {
        let engine = engine();
        let emitter = MemoryEmitter::new();
        engine.create_request(1, 2).unwrap();

        let report = drain_once(&engine, &emitter, &DispatcherConfig::default())
            .await
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(emitter.sent()[0].message, "alice requested to follow you.");
        assert_eq!(engine.outbox_stats().unwrap().delivered, 1);

        // Nothing left to send.
        let report = drain_once(&engine, &emitter, &DispatcherConfig::default())
            .await
            .unwrap();
        assert_eq!(report, DrainReport::default());
    }

    #[tokio::test]
    async fn failures_retry_then_die() {
        let engine = engine();
        let emitter = MemoryEmitter::new();
        emitter.fail_with(Some("503"));
        engine.create_follower(1, 2).unwrap();

        let config = DispatcherConfig {
            max_attempts: 2,
            ..Default::default()
        };
        let first = drain_once(&engine, &emitter, &config).await.unwrap();
        assert_eq!(first.retried, 1);
        let pending = engine.outbox().pending(10).unwrap();
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("emitter unavailable: 503"));

        let second = drain_once(&engine, &emitter, &config).await.unwrap();
        assert_eq!(second.dead, 1);
        assert_eq!(engine.outbox_stats().unwrap().dead, 1);
        assert!(emitter.sent().is_empty());
    }

    #[tokio::test]
    async fn retries_reuse_the_message_id() {
        let engine = engine();
        let emitter = MemoryEmitter::new();
        engine.create_request(1, 2).unwrap();
        let message_id = engine.outbox().pending(1).unwrap()[0].message_id.clone();

        emitter.fail_with(Some("503"));
        let config = DispatcherConfig::default();
        assert_eq!(drain_once(&engine, &emitter, &config).await.unwrap().retried, 1);
        emitter.fail_with(None);
        assert_eq!(drain_once(&engine, &emitter, &config).await.unwrap().delivered, 1);

        assert_eq!(emitter.attempts(), vec![message_id.clone(), message_id]);
        assert_eq!(emitter.sent().len(), 1);
    }

    /// Signals when delivery starts, then takes a while to finish.
    struct SlowEmitter {
        started: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl NotificationEmitter for SlowEmitter {
        async fn emit(
            &self,
            _message_id: &str,
            _notification: &crate::model::Notification,
        ) -> Result<(), crate::emitter::EmitError> {
            self.started.notify_one();
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn shutdown_waits_for_pass_in_flight() {
        let engine = engine();
        let started = Arc::new(tokio::sync::Notify::new());
        let emitter = Arc::new(SlowEmitter {
            started: started.clone(),
        });
        let config = DispatcherConfig {
            poll_interval: 3600,
            ..Default::default()
        };
        let dispatcher = start(engine.clone(), emitter, config);

        engine.create_follower(1, 2).unwrap();
        started.notified().await;
        dispatcher.shutdown().await;

        assert!(dispatcher.is_stopped());
        let stats = engine.outbox_stats().unwrap();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.pending, 0);

        // Second call is a no-op.
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn background_dispatcher_wakes_on_enqueue() {
        let engine = engine();
        let emitter = Arc::new(MemoryEmitter::new());
        let config = DispatcherConfig {
            poll_interval: 3600,
            ..Default::default()
        };
        let dispatcher = start(engine.clone(), emitter.clone(), config);

        let id = engine.create_request(1, 2).unwrap().primary;
        engine
            .update_request(id, RequestUpdate::status(RequestStatus::Accepted))
            .unwrap();

        let mut delivered = false;
        for _ in 0..100 {
            if engine.outbox_stats().unwrap().delivered == 1 {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        dispatcher.shutdown().await;
        assert!(delivered, "dispatcher did not deliver the queued notification");
        assert_eq!(emitter.sent().len(), 1);
        assert_eq!(engine.outbox_stats().unwrap().pending, 0);
    }
}
