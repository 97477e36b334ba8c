//! The countdown timer that pauses MPD when it runs out
//!
//! A [`Timer`] is a cheap handle to shared state. Every operation takes the
//! timer's lock for its whole duration, and the expiry callback takes the
//! same lock before it touches anything, so operations never interleave.
//!
//! While the timer is started it owns exactly one pending callback: a tokio
//! task sleeping until the deadline. Starting, restarting and extending abort
//! that task before scheduling a new one. Once the deadline passes the task
//! hands off to a separate expiry task that runs the [`Action`], so aborting a
//! callback that has already fired never cuts a pause command short.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, TimeDelta};
use log::{debug, info, warn};
use serde::{Serialize, Serializer};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::action::Action;
use crate::duration;

/// Ways a timer operation can be refused
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The duration string did not parse
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),
    /// The operation makes no sense for the timer's current state
    #[error("{0}")]
    InvalidTimerState(&'static str),
}

/// Whether the timer is counting down
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Stopped,
    Started,
}

/// Time left before the timer runs out
///
/// Serialized as a string like `"99.5 seconds"`.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Remaining(Duration);

impl Remaining {
    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0.as_secs_f64()
    }
}

impl Serialize for Remaining {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&format_args!("{:?} seconds", self.as_secs_f64()))
    }
}

/// Result of [`Timer::status`]
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_time: Option<Remaining>,
}

/// Result of [`Timer::start`], [`Timer::restart`] and [`Timer::extend`]
#[derive(Debug, Serialize)]
pub struct RemainingReport {
    pub remaining_time: Remaining,
}

/// Result of [`Timer::stop`], which serializes as an empty object
#[derive(Debug, Serialize)]
pub struct StopReport {}

/// A single countdown that runs an [`Action`] when it expires
pub struct Timer<A> {
    shared: Arc<Shared<A>>,
}

impl<A> Clone for Timer<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<A> {
    action: A,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    run: Option<Run>,
    generation: u64,
}

/// A started timer. Only exists while the timer is started.
struct Run {
    started_at: Instant,
    duration: Duration,
    pending: JoinHandle<()>,
    generation: u64,
}

impl Run {
    fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.duration.saturating_sub(self.elapsed(now))
    }

    fn expired(&self, now: Instant) -> bool {
        self.elapsed(now) > self.duration
    }
}

impl State {
    /// Cancel the pending callback, if any, and forget the run.
    ///
    /// Returns whether the timer was started.
    fn clear(&mut self) -> bool {
        match self.run.take() {
            Some(run) => {
                run.pending.abort();
                true
            }
            None => false,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.run
            .as_ref()
            .is_some_and(|run| run.generation == generation)
    }
}

impl<A: Action> Timer<A> {
    /// Create a stopped timer
    pub fn new(action: A) -> Self {
        Self {
            shared: Arc::new(Shared {
                action,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Report whether the timer is started, and how long it has left if so
    pub async fn status(&self) -> StatusReport {
        let state = self.shared.state.lock().await;

        match &state.run {
            Some(run) => StatusReport {
                status: Status::Started,
                remaining_time: Some(Remaining(run.remaining(Instant::now()))),
            },
            None => StatusReport {
                status: Status::Stopped,
                remaining_time: None,
            },
        }
    }

    /// Start the timer with a duration like "30m"
    ///
    /// Starting a timer that is already running leaves it alone and reports
    /// the time it has left. If the running timer is past its deadline its
    /// expiry went missing, so it is stopped and an error is returned.
    pub async fn start(&self, duration: &str) -> Result<RemainingReport, Error> {
        let mut state = self.shared.state.lock().await;
        let now = Instant::now();

        if let Some(run) = &state.run {
            if run.expired(now) {
                state.clear();

                warn!("Timer has already ended, but state is started");

                return Err(Error::InvalidTimerState(
                    "Timer has already ended, but state is started",
                ));
            }

            return Ok(RemainingReport {
                remaining_time: Remaining(run.remaining(now)),
            });
        }

        let duration = duration::parse_duration(duration)?;

        self.schedule(&mut state, now, duration);

        info!(
            "Timer started with duration {} seconds{}",
            duration.as_secs_f64(),
            ends_at(duration)
        );

        Ok(RemainingReport {
            remaining_time: Remaining(duration),
        })
    }

    /// Stop the timer without running its action. Stopping a stopped timer does nothing.
    pub async fn stop(&self) -> StopReport {
        let mut state = self.shared.state.lock().await;

        if state.clear() {
            info!("Timer stopped");
        }

        StopReport {}
    }

    /// Start the countdown over from its full duration
    pub async fn restart(&self) -> Result<RemainingReport, Error> {
        let mut state = self.shared.state.lock().await;
        let now = Instant::now();

        let Some(run) = &state.run else {
            info!("Can't restart a stopped timer");

            return Err(Error::InvalidTimerState("Can't restart a stopped timer"));
        };

        let duration = run.duration;

        self.schedule(&mut state, now, duration);

        info!(
            "Timer restarted with duration {} seconds{}",
            duration.as_secs_f64(),
            ends_at(duration)
        );

        Ok(RemainingReport {
            remaining_time: Remaining(duration),
        })
    }

    /// Add a duration like "15m" to the time the timer has left
    pub async fn extend(&self, duration: &str) -> Result<RemainingReport, Error> {
        let mut state = self.shared.state.lock().await;
        let now = Instant::now();

        let Some(run) = &state.run else {
            info!("Can't extend a stopped timer");

            return Err(Error::InvalidTimerState("Can't extend a stopped timer"));
        };

        let remaining = run.remaining(now);
        let extra = duration::parse_duration(duration)?;
        let extended = remaining
            .checked_add(extra)
            .ok_or_else(|| Error::InvalidDuration(duration.trim().to_string()))?;

        self.schedule(&mut state, now, extended);

        info!(
            "Timer extended with duration {} seconds{}",
            extended.as_secs_f64(),
            ends_at(extended)
        );

        Ok(RemainingReport {
            remaining_time: Remaining(extended),
        })
    }

    /// Replace the current run, if any, with one that expires after `duration`
    fn schedule(&self, state: &mut State, now: Instant, duration: Duration) {
        state.clear();
        state.generation += 1;

        let generation = state.generation;
        let shared = Arc::clone(&self.shared);

        let pending = tokio::spawn(async move {
            tokio::time::sleep(duration).await;

            // No await between waking and handing off, so an abort either
            // lands before this point or not at all.
            tokio::spawn(expire(shared, generation));
        });

        state.run = Some(Run {
            started_at: now,
            duration,
            pending,
            generation,
        });
    }
}

async fn expire<A: Action>(shared: Arc<Shared<A>>, generation: u64) {
    info!("Timer ended");

    if let Err(err) = shared.action.invoke().await {
        warn!("{:#}", err);
    }

    let mut state = shared.state.lock().await;

    if state.is_current(generation) {
        state.clear();

        info!("Timer stopped");
    } else {
        debug!("Timer was changed while it was expiring, leaving it alone");
    }
}

fn ends_at(length: Duration) -> String {
    TimeDelta::from_std(length)
        .ok()
        .and_then(|delta| Local::now().checked_add_signed(delta))
        .map(|at| {
            format!(
                " ({} left, ends at {})",
                duration::to_kitchen(length),
                at.format("%H:%M:%S")
            )
        })
        .unwrap_or_default()
}
