//! Day-boundary detection by coarse polling.
//!
//! Crossing midnight is not an OS event, so a background task compares the
//! absolute day number against the last one it saw. Comparing absolute days
//! (rather than counting elapsed ticks) means a process suspended across one
//! or more boundaries reports a single catch-up change on resume.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::epoch::{self, DayNumber};

/// Default polling period; finer precision buys nothing for whole days.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

/// Source of the current day number.
pub type DayClock = Arc<dyn Fn() -> DayNumber + Send + Sync>;

#[derive(Default)]
struct WatchState {
    subscribers: HashMap<u64, UnboundedSender<DayNumber>>,
    next_id: u64,
    last_day: DayNumber,
    // Present while the polling task runs.
    cancel: Option<CancellationToken>,
}

/// Shared handle to a day-boundary watch.
///
/// Polling starts with the first [`DayWatch::subscribe`] and stops when the
/// last [`DaySubscription`] is dropped.
#[derive(Clone)]
pub struct DayWatch {
    state: Arc<Mutex<WatchState>>,
    period: Duration,
    clock: DayClock,
}

impl fmt::Debug for DayWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DayWatch")
            .field("period", &self.period)
            .field("watching", &self.is_watching())
            .finish()
    }
}

impl DayWatch {
    /// Watch the local calendar, checking every `period`.
    pub fn new(period: Duration) -> Self {
        Self::with_clock(period, Arc::new(epoch::today_to_number))
    }

    pub fn with_clock(period: Duration, clock: DayClock) -> Self {
        Self {
            state: Arc::new(Mutex::new(WatchState::default())),
            period,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether the polling task is running.
    pub fn is_watching(&self) -> bool {
        self.lock().cancel.is_some()
    }

    /// Most recent day number observed by the watch.
    pub fn last_day(&self) -> DayNumber {
        self.lock().last_day
    }

    /// Register for day-change notifications.
    ///
    /// Must be called from within a tokio runtime; the first subscriber
    /// spawns the polling task.
    pub fn subscribe(&self) -> DaySubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.insert(id, tx);

        if state.cancel.is_none() {
            let cancel = CancellationToken::new();
            state.last_day = (self.clock)();
            state.cancel = Some(cancel.clone());
            debug!(day = state.last_day, period = ?self.period, "day watch started");
            tokio::spawn(poll(
                Arc::clone(&self.state),
                self.period,
                Arc::clone(&self.clock),
                cancel,
            ));
        }

        DaySubscription {
            id,
            rx,
            watch: self.clone(),
        }
    }

    fn unsubscribe(&self, id: u64) {
        let mut state = self.lock();
        state.subscribers.remove(&id);
        if state.subscribers.is_empty()
            && let Some(cancel) = state.cancel.take()
        {
            cancel.cancel();
            debug!("day watch stopped");
        }
    }
}

async fn poll(
    state: Arc<Mutex<WatchState>>,
    period: Duration,
    clock: DayClock,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(period) => {}
        }

        let today = clock();
        let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
        if today > guard.last_day {
            info!(previous = guard.last_day, day = today, "day boundary crossed");
            guard.last_day = today;
            for tx in guard.subscribers.values() {
                let _ = tx.send(today);
            }
        }
    }
}

/// Receiving end of a [`DayWatch`]; dropping it unsubscribes.
pub struct DaySubscription {
    id: u64,
    rx: UnboundedReceiver<DayNumber>,
    watch: DayWatch,
}

impl fmt::Debug for DaySubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaySubscription").field("id", &self.id).finish()
    }
}

impl DaySubscription {
    /// Wait for the next day number.
    pub async fn recv(&mut self) -> Option<DayNumber> {
        self.rx.recv().await
    }

    /// Day number as of the watch's most recent check.
    pub fn current_day(&self) -> DayNumber {
        self.watch.last_day()
    }
}

impl Drop for DaySubscription {
    fn drop(&mut self) {
        self.watch.unsubscribe(self.id);
    }
}
