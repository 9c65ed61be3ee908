//! A log level that can be overridden for a bounded time.
//!
//! [`TimedLevel`] holds the configured default level plus an optional
//! override. An override set with a non-zero duration reverts to the default
//! when the duration elapses; a zero duration keeps the override until the
//! next explicit change. Every change is pushed to a [`LevelSetter`], which
//! in the daemon reloads the tracing filter.

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::level_filters::LevelFilter;

use crate::error::{Error, Result};

/// Callback applying a level to the process.
pub type LevelSetter = Arc<dyn Fn(LevelFilter) + Send + Sync>;

/// Parse a level name such as `"debug"` or `"WARN"`.
pub fn parse_level(level: &str) -> Result<LevelFilter> {
    LevelFilter::from_str(level.trim()).map_err(|_| Error::InvalidLevel(level.to_string()))
}

struct State {
    default: LevelFilter,
    current: LevelFilter,
    overridden: bool,
    /// Bumped on every change so a stale revert timer can tell it lost.
    generation: u64,
    revert: Option<JoinHandle<()>>,
}

impl State {
    fn cancel_revert(&mut self) {
        if let Some(handle) = self.revert.take() {
            handle.abort();
        }
    }
}

/// Process-wide log level with temporary overrides.
#[derive(Clone)]
pub struct TimedLevel {
    state: Arc<Mutex<State>>,
    setter: LevelSetter,
}

impl TimedLevel {
    /// Create a timed level and apply `default` through `setter`.
    pub fn new(default: LevelFilter, setter: LevelSetter) -> Self {
        setter(default);
        Self {
            state: Arc::new(Mutex::new(State {
                default,
                current: default,
                overridden: false,
                generation: 0,
                revert: None,
            })),
            setter,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The level currently in effect.
    pub fn level(&self) -> LevelFilter {
        self.lock().current
    }

    /// The level reverted to when an override ends.
    pub fn default_level(&self) -> LevelFilter {
        self.lock().default
    }

    /// Whether an explicit override is in effect.
    pub fn is_overridden(&self) -> bool {
        self.lock().overridden
    }

    /// Override the level. A zero `duration` keeps it until the next change;
    /// otherwise it reverts to the default once `duration` has elapsed.
    ///
    /// Must be called from within a tokio runtime when `duration` is non-zero.
    pub fn set(&self, level: LevelFilter, duration: Duration) {
        let mut state = self.lock();
        state.cancel_revert();
        state.generation += 1;
        state.current = level;
        state.overridden = true;
        (self.setter)(level);

        if !duration.is_zero() {
            let generation = state.generation;
            let this = self.clone();
            state.revert = Some(tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                this.revert_if_current(generation);
            }));
        }
    }

    /// Drop any override and return to the default level.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.cancel_revert();
        state.generation += 1;
        state.overridden = false;
        state.current = state.default;
        (self.setter)(state.default);
    }

    /// Replace the default level. Applied immediately unless an override is
    /// in effect, in which case it takes over when the override ends.
    pub fn set_default(&self, level: LevelFilter) {
        let mut state = self.lock();
        state.default = level;
        if !state.overridden && state.current != level {
            state.current = level;
            (self.setter)(level);
        }
    }

    fn revert_if_current(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        state.revert = None;
        state.overridden = false;
        state.current = state.default;
        (self.setter)(state.default);
    }
}

impl std::fmt::Debug for TimedLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("TimedLevel")
            .field("default", &state.default)
            .field("current", &state.current)
            .field("overridden", &state.overridden)
            .finish_non_exhaustive()
    }
}
