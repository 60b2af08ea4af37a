//! Periodic session refresh scheduling
//!
//! A [`Scheduler`] turns a refresh task into a running periodic timer and
//! hands back an owned [`RefreshTimer`]. Whoever holds the handle controls
//! the timer's life: cancelling or dropping it stops further ticks.

use std::{fmt, future::Future, pin::Pin, sync::Arc, time::Duration};

use tokio::{
    sync::oneshot::{self, error::TryRecvError},
    time::{self, Instant, MissedTickBehavior},
};

/// A boxed future produced by a refresh task
pub type TickFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The work performed on every tick of a refresh timer
pub type RefreshTask = Arc<dyn Fn() -> TickFuture + Send + Sync>;

/// A capability for running a task periodically
pub trait Scheduler: Send + Sync {
    /// Starts running `task` every `period`, beginning one period from now
    fn schedule(&self, period: Duration, task: RefreshTask) -> RefreshTimer;
}

/// An owned handle to a running periodic timer
///
/// Dropping the handle cancels the timer.
#[must_use = "dropping a refresh timer cancels it"]
pub struct RefreshTimer {
    period: Duration,
    _cancel: oneshot::Sender<()>,
}

impl RefreshTimer {
    /// Creates a timer handle and the cancellation signal its task should observe
    pub fn new(period: Duration) -> (Self, Cancellation) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                period,
                _cancel: tx,
            },
            Cancellation(rx),
        )
    }

    /// The interval between ticks
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Cancels the timer
    pub fn cancel(self) {
        tracing::trace!(period = ?self.period, "refresh timer cancelled");
    }
}

impl fmt::Debug for RefreshTimer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RefreshTimer")
            .field("period", &self.period)
            .finish()
    }
}

/// The receiving end of a [`RefreshTimer`]'s cancellation
#[derive(Debug)]
pub struct Cancellation(oneshot::Receiver<()>);

impl Cancellation {
    /// Resolves once the owning timer handle is cancelled or dropped
    ///
    /// Must not be awaited again after it has resolved.
    pub async fn cancelled(&mut self) {
        let _ = (&mut self.0).await;
    }

    /// Whether the owning timer handle has been cancelled or dropped
    pub fn is_cancelled(&mut self) -> bool {
        !matches!(self.0.try_recv(), Err(TryRecvError::Empty))
    }
}

/// A scheduler backed by the tokio timer
///
/// Must be used from within a tokio runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, period: Duration, task: RefreshTask) -> RefreshTimer {
        let (timer, mut cancellation) = RefreshTimer::new(period);

        tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => {
                        tracing::debug!("refresh timer stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        tracing::trace!("refresh timer tick");
                        task().await;
                    }
                }
            }
        });

        timer
    }
}
