//! Named, cancelable timer slots for Broadside.
//!
//! A [`TimerRegistry`] belongs to exactly one owner: a game session (join
//! timeout, setup countdown) or a single client (reconnection deadline).
//! Each slot is defined once with a callback, a duration, and a repeat
//! flag, and can then be started and stopped any number of times.
//!
//! # Slots vs. firings
//!
//! A slot is the *definition*. A firing is one scheduled run of the slot's
//! callback on the Tokio runtime. Stopping a slot cancels the pending
//! firing and keeps the definition, so the slot can be started again later:
//!
//! ```text
//! define ──→ start ──→ (duration) ──→ callback ──→ [repeat? re-arm]
//!              │
//!              └──→ stop ──→ start ──→ ...
//! ```
//!
//! # Integration
//!
//! Callbacks run on a spawned task, not on the owner's task. In the session
//! layer they only enqueue a command onto the owning session's queue:
//!
//! ```ignore
//! let commands = session_tx.clone();
//! timers.define("join_timeout", move || {
//!     let _ = commands.send(SessionCommand::Timer(SessionTimer::JoinTimeout));
//! }, Duration::from_secs(60), false);
//! timers.start("join_timeout");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// The callback invoked when a slot fires.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Shortest period a repeating slot may use.
///
/// A zero-length repeating timer would spin the runtime, so repeating
/// durations are clamped up to this value.
pub const MIN_REPEAT_PERIOD: Duration = Duration::from_millis(1);

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

struct TimerSlot {
    callback: TimerCallback,
    duration: Duration,
    repeat: bool,
    /// The scheduled firing, if any. At most one per slot.
    pending: Option<JoinHandle<()>>,
}

impl TimerSlot {
    fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) => {
                let was_live = !handle.is_finished();
                handle.abort();
                was_live
            }
            None => false,
        }
    }

    fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A table of named timer slots owned by one session or client.
///
/// `define`, `start`, `stop`, and `disable_all` are the only mutators.
/// Dropping the registry cancels every pending firing.
pub struct TimerRegistry {
    owner: String,
    slots: HashMap<String, TimerSlot>,
    disabled: bool,
}

impl TimerRegistry {
    /// Creates an empty registry. `owner` labels log lines
    /// (e.g. a session code or a client identity).
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            slots: HashMap::new(),
            disabled: false,
        }
    }

    /// Installs or replaces the slot called `name`.
    ///
    /// Any firing still pending under that name is cancelled first, so two
    /// overlapping timers can never exist under one name. The new slot is
    /// left stopped.
    pub fn define<F>(
        &mut self,
        name: &str,
        callback: F,
        duration: Duration,
        repeat: bool,
    ) where
        F: Fn() + Send + Sync + 'static,
    {
        if self.disabled {
            warn!(owner = %self.owner, timer = name, "define on disabled timer registry ignored");
            return;
        }

        let duration = if repeat {
            duration.max(MIN_REPEAT_PERIOD)
        } else {
            duration
        };

        let slot = TimerSlot {
            callback: Arc::new(callback),
            duration,
            repeat,
            pending: None,
        };

        if let Some(mut previous) = self.slots.insert(name.to_string(), slot) {
            if previous.cancel() {
                debug!(owner = %self.owner, timer = name, "pending timer replaced by redefinition");
            }
        }
    }

    /// Schedules the slot's callback to fire after its duration.
    ///
    /// Restarts the countdown when the slot is already pending. Must be
    /// called from within a Tokio runtime.
    pub fn start(&mut self, name: &str) {
        if self.disabled {
            warn!(owner = %self.owner, timer = name, "start on disabled timer registry ignored");
            return;
        }
        let Some(slot) = self.slots.get_mut(name) else {
            debug!(owner = %self.owner, timer = name, "start on undefined timer ignored");
            return;
        };

        slot.cancel();

        let callback = Arc::clone(&slot.callback);
        let duration = slot.duration;
        let repeat = slot.repeat;
        let owner = self.owner.clone();
        let timer = name.to_string();

        slot.pending = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(duration).await;
                trace!(%owner, %timer, "timer fired");
                callback();
                if !repeat {
                    break;
                }
            }
        }));

        trace!(owner = %self.owner, timer = name, ?duration, repeat, "timer started");
    }

    /// Cancels the slot's pending firing. No-op when nothing is pending.
    pub fn stop(&mut self, name: &str) {
        if let Some(slot) = self.slots.get_mut(name) {
            if slot.cancel() {
                trace!(owner = %self.owner, timer = name, "timer stopped");
            }
        }
    }

    /// Cancels every pending firing and makes the registry unusable.
    ///
    /// Called during teardown, before any state a callback could reach is
    /// released. Later `define` and `start` calls are ignored.
    pub fn disable_all(&mut self) {
        let mut cancelled = 0usize;
        for slot in self.slots.values_mut() {
            if slot.cancel() {
                cancelled += 1;
            }
        }
        self.disabled = true;
        debug!(owner = %self.owner, cancelled, "timer registry disabled");
    }

    /// Whether a firing is currently scheduled for `name`.
    pub fn is_pending(&self, name: &str) -> bool {
        self.slots.get(name).is_some_and(TimerSlot::is_pending)
    }

    /// Whether a slot called `name` has been defined.
    pub fn is_defined(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Whether [`disable_all`](Self::disable_all) has been called.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// The configured duration of slot `name`.
    pub fn duration(&self, name: &str) -> Option<Duration> {
        self.slots.get(name).map(|s| s.duration)
    }

    /// The label this registry logs under.
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        for slot in self.slots.values_mut() {
            slot.cancel();
        }
    }
}

impl fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pending: Vec<&str> = self
            .slots
            .iter()
            .filter(|(_, s)| s.is_pending())
            .map(|(n, _)| n.as_str())
            .collect();
        pending.sort_unstable();
        f.debug_struct("TimerRegistry")
            .field("owner", &self.owner)
            .field("slots", &self.slots.len())
            .field("pending", &pending)
            .field("disabled", &self.disabled)
            .finish()
    }
}
