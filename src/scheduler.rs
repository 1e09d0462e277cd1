//! Periodic background task with an explicit start/shutdown lifecycle
//!
//! Used by the bounded cache sweeper and the write-behind flusher. The task
//! body is an ordinary async closure, so tests can call the same body
//! directly instead of waiting for the timer.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to a running periodic task
#[derive(Debug)]
pub struct Scheduler {
    name: String,
    interval: Duration,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn `tick` every `interval` until shut down.
    ///
    /// The first tick fires one full interval after start. Must be called
    /// from within a tokio runtime.
    pub fn start<F, Fut>(name: impl Into<String>, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        // tokio::time::interval panics on zero
        let interval = interval.max(Duration::from_millis(1));
        let token = CancellationToken::new();

        let child = token.clone();
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => tick().await,
                }
            }

            debug!("Scheduler '{}' loop exited", task_name);
        });

        info!("Started scheduler '{}' (interval: {:?})", name, interval);

        Self {
            name,
            interval,
            token,
            handle: Some(handle),
        }
    }

    /// Scheduler name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tick interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the background task is still alive
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the task and wait for an in-progress tick to finish
    pub async fn shutdown(&mut self) {
        self.token.cancel();

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Scheduler '{}' task ended abnormally: {}", self.name, e);
            }
            info!("Stopped scheduler '{}'", self.name);
        }
    }

    /// Like [`Scheduler::shutdown`], but abort a tick still running after
    /// `limit`. Returns whether the task stopped on its own.
    pub async fn shutdown_within(&mut self, limit: Duration) -> bool {
        self.token.cancel();

        let Some(handle) = self.handle.as_mut() else {
            return true;
        };

        let stopped = match tokio::time::timeout(limit, &mut *handle).await {
            Ok(result) => {
                if let Err(e) = result {
                    warn!("Scheduler '{}' task ended abnormally: {}", self.name, e);
                }
                info!("Stopped scheduler '{}'", self.name);
                true
            }
            Err(_) => {
                warn!("Scheduler '{}' still busy after {:?}, aborting", self.name, limit);
                handle.abort();
                false
            }
        };
        self.handle = None;
        stopped
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
