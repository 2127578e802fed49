use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::location::LocationService;
use crate::models::order::GeoPoint;

/// Running position watch. Dropping the handle stops the watch as well.
pub struct TrackingHandle {
    task: JoinHandle<()>,
}

impl TrackingHandle {
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for TrackingHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Polls the location service every `period` and hands each fix to `on_fix`.
/// Ticks without a fix are skipped.
pub fn watch_position<F>(
    location: Arc<dyn LocationService>,
    period: Duration,
    mut on_fix: F,
) -> TrackingHandle
where
    F: FnMut(GeoPoint) + Send + 'static,
{
    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match location.current_position().await {
                Some(fix) => on_fix(fix),
                None => debug!("no location fix available"),
            }
        }
    });

    TrackingHandle { task }
}
