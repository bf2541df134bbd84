//! Owned background tasks: periodic refreshes and one-shot timers
//!
//! Dropping a handle aborts its task, so a task can never outlive the phase that
//! owns it.

use crate::amqp::publisher::EventPublisher;
use crate::error::Result;
use crate::types::LobbyEvent;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Aborts the wrapped task on drop unless detached
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn spawn<F>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            handle: Some(tokio::spawn(future)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Release the task without aborting it; used by a task that is finishing itself
    pub fn detach(mut self) {
        self.handle.take();
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Cancelling task - name: '{}'", self.name);
            handle.abort();
        }
    }
}

/// Periodically rebuild an event and publish it.
///
/// The first tick fires one `period` after spawning. `rebuild` returning
/// `Ok(None)` ends the loop; errors are logged and the loop continues.
pub struct PeriodicRefresh;

impl PeriodicRefresh {
    pub fn spawn<F, Fut>(
        name: impl Into<String>,
        period: Duration,
        publisher: Arc<dyn EventPublisher>,
        mut rebuild: F,
    ) -> TaskHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<LobbyEvent>>> + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();

        TaskHandle::spawn(name, async move {
            let mut ticks = IntervalStream::new(interval_at(Instant::now() + period, period));

            while ticks.next().await.is_some() {
                match rebuild().await {
                    Ok(Some(event)) => {
                        if let Err(e) = publisher.publish_lobby_event(event).await {
                            warn!("Refresh publish failed - task: '{}', error: {}", task_name, e);
                        }
                    }
                    Ok(None) => {
                        debug!("Refresh finished - task: '{}'", task_name);
                        break;
                    }
                    Err(e) => warn!("Refresh rebuild failed - task: '{}', error: {}", task_name, e),
                }
            }
        })
    }
}
