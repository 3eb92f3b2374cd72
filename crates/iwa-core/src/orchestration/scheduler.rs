use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// What a tick tells the scheduler to do next.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TickControl {
    Continue,
    Stop,
}

/// Periodic driver for discovery cycles. The first tick fires one full period
/// after `start`; a tick that overruns delays the next one instead of bursting.
pub struct DiscoveryScheduler {
    period: Duration,
    handle: Option<JoinHandle<()>>,
}

impl DiscoveryScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            handle: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Starts the timer. Does nothing when already running.
    pub fn start<F, Fut>(&mut self, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TickControl> + Send + 'static,
    {
        if self.is_running() {
            return;
        }

        let period = self.period;
        self.handle = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tick().await == TickControl::Stop {
                    tracing::debug!("discovery scheduler stopped by its tick");
                    break;
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for DiscoveryScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
