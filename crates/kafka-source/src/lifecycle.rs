//! Start/stop guard shared by long-running components.

use crate::error::{Error, Result};
use std::future::Future;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Running,
    Stopped,
}

/// NotStarted -> Running -> Stopped, with Stopped terminal.
///
/// The shutdown body passed to [`RunLifecycle::stop`] runs at most once.
/// Concurrent callers wait for it to finish and then return as no-ops.
pub struct RunLifecycle {
    name: String,
    state: Mutex<LifecycleState>,
}

impl RunLifecycle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(LifecycleState::NotStarted),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.lock().await
    }

    /// Run `start` and move to Running.
    ///
    /// Fails if already running or stopped. A failing `start` leaves the
    /// lifecycle in NotStarted.
    pub async fn start<F>(&self, start: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut state = self.state.lock().await;
        match *state {
            LifecycleState::NotStarted => {
                start()?;
                *state = LifecycleState::Running;
                info!(name = %self.name, "started");
                Ok(())
            }
            LifecycleState::Running => Err(Error::AlreadyStarted),
            LifecycleState::Stopped => Err(Error::AlreadyStopped),
        }
    }

    /// Run `stop` if running and move to Stopped.
    ///
    /// Returns true only for the caller that ran the shutdown body.
    pub async fn stop<F, Fut>(&self, stop: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut state = self.state.lock().await;
        match *state {
            LifecycleState::NotStarted => {
                *state = LifecycleState::Stopped;
                false
            }
            LifecycleState::Running => {
                stop().await;
                *state = LifecycleState::Stopped;
                info!(name = %self.name, "stopped");
                true
            }
            LifecycleState::Stopped => false,
        }
    }
}
