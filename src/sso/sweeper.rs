//! Background eviction, one task per store.

use crate::sso::{clock::Clock, store::Sweepable};
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, warn};

pub const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
pub const TRUST_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
pub const FORBIDDEN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Running sweepers sharing one stop signal.
#[derive(Debug)]
pub struct SweeperSet {
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SweeperSet {
    #[must_use]
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            stop,
            handles: Vec::new(),
        }
    }

    /// Start sweeping `store` every `every`. Must be called inside a tokio runtime.
    pub fn spawn(&mut self, store: Arc<dyn Sweepable>, clock: Arc<dyn Clock>, every: Duration) {
        let stop = self.stop.subscribe();
        self.handles.push(tokio::spawn(run(store, clock, every, stop)));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every sweeper and wait for all of them to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for handle in self.handles {
            if let Err(err) = handle.await {
                warn!("sweeper task failed: {err}");
            }
        }
    }
}

impl Default for SweeperSet {
    fn default() -> Self {
        Self::new()
    }
}

async fn run(
    store: Arc<dyn Sweepable>,
    clock: Arc<dyn Clock>,
    every: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = clock.now_unix();
                let removed = store.sweep(now);
                if removed > 0 {
                    debug!(store = store.name(), removed, "swept expired entries");
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    debug!(store = store.name(), "sweeper stopped");
                    break;
                }
            }
        }
    }
}
