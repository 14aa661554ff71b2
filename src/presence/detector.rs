//! Meeting presence detection.
//!
//! A fixed-cadence poll loop gathers evidence from the process inspector,
//! fuses it against the matching rules, and tells subscribers when (and
//! only when) the in-meeting boolean flips. Evidence itself is refreshed
//! every cycle and available via `state()`, but borderline evidence that
//! does not change the boolean never wakes a subscriber. That debounce is
//! what keeps the UI from flickering on noisy signals.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::inspector::{AppIdentity, ProcessInspector};

use super::rules::MeetingRules;

/// Raw per-cycle observations behind a presence decision.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceEvidence {
    pub foreground_app: Option<AppIdentity>,
    pub active_url: Option<String>,
    pub meeting_process_active: bool,
    pub meeting_tab_active: bool,
    pub timestamp: DateTime<Utc>,
}

impl PresenceEvidence {
    fn empty() -> Self {
        Self {
            foreground_app: None,
            active_url: None,
            meeting_process_active: false,
            meeting_tab_active: false,
            timestamp: Utc::now(),
        }
    }
}

/// Published presence state. Subscribers get immutable snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceState {
    pub in_meeting: bool,
    pub evidence: PresenceEvidence,
}

impl PresenceState {
    fn idle() -> Self {
        Self {
            in_meeting: false,
            evidence: PresenceEvidence::empty(),
        }
    }
}

type Listener = Arc<dyn Fn(PresenceState) + Send + Sync>;

/// Removes one listener registration when consumed. Safe to call from
/// inside a notification callback.
pub struct Subscription {
    id: u64,
    listeners: Arc<Mutex<Vec<(u64, Listener)>>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        let mut listeners = self.listeners.lock().unwrap();
        if let Some(index) = listeners.iter().position(|(id, _)| *id == self.id) {
            listeners.remove(index);
        }
    }
}

struct DetectorInner {
    inspector: Arc<dyn ProcessInspector>,
    rules: MeetingRules,
    state: Mutex<PresenceState>,
    listeners: Arc<Mutex<Vec<(u64, Listener)>>>,
    next_listener_id: AtomicU64,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

/// Evidence-fusion state machine with change-only notifications.
#[derive(Clone)]
pub struct PresenceDetector {
    inner: Arc<DetectorInner>,
}

impl PresenceDetector {
    pub fn new(inspector: Arc<dyn ProcessInspector>, rules: MeetingRules) -> Self {
        Self {
            inner: Arc::new(DetectorInner {
                inspector,
                rules,
                state: Mutex::new(PresenceState::idle()),
                listeners: Arc::new(Mutex::new(Vec::new())),
                next_listener_id: AtomicU64::new(0),
                poll_task: Mutex::new(None),
            }),
        }
    }

    /// Start the poll loop. No-op if already polling. The first check
    /// runs immediately, then once per interval; a slow cycle delays the
    /// next tick rather than overlapping it. The loop holds only a weak
    /// reference, so dropping every detector handle winds it down.
    pub fn start_polling(&self, interval: Duration) {
        let mut task = self.inner.poll_task.lock().unwrap();
        if task.is_some() {
            return;
        }

        debug!("Presence polling started ({:?} interval)", interval);
        let weak: Weak<DetectorInner> = Arc::downgrade(&self.inner);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let inner = match weak.upgrade() {
                    Some(inner) => inner,
                    None => break,
                };
                inner.check_now().await;
            }
        }));
    }

    /// Stop the poll loop without touching published state. Idempotent.
    pub fn stop_polling(&self) {
        self.inner.stop_polling();
    }

    pub fn is_polling(&self) -> bool {
        self.inner.poll_task.lock().unwrap().is_some()
    }

    /// Run one evidence-gathering cycle and publish the result.
    /// Notifies subscribers only if the in-meeting boolean changed.
    pub async fn check_now(&self) {
        self.inner.check_now().await;
    }

    /// Register a listener for state transitions. Listeners are notified
    /// in subscription order, on the polling task.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(PresenceState) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .listeners
            .lock()
            .unwrap()
            .push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::clone(&self.inner.listeners),
        }
    }

    /// Current state snapshot, whether or not polling is active.
    pub fn state(&self) -> PresenceState {
        self.inner.state.lock().unwrap().clone()
    }

    /// Stop polling and force-reset to not-in-meeting with empty
    /// evidence. Always notifies, even if the state was already idle.
    pub fn reset(&self) {
        self.inner.stop_polling();
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            *state = PresenceState::idle();
            state.clone()
        };
        self.inner.notify(snapshot);
    }
}

impl DetectorInner {
    fn stop_polling(&self) {
        if let Some(task) = self.poll_task.lock().unwrap().take() {
            task.abort();
            debug!("Presence polling stopped");
        }
    }

    async fn check_now(&self) {
        let evidence = self.observe().await;
        let in_meeting = evidence.meeting_process_active || evidence.meeting_tab_active;

        let (changed, snapshot) = {
            let mut state = self.state.lock().unwrap();
            let changed = state.in_meeting != in_meeting;
            // Evidence is refreshed every cycle, change or not.
            state.in_meeting = in_meeting;
            state.evidence = evidence;
            (changed, state.clone())
        };

        if changed {
            info!(
                "Meeting state: {}",
                if in_meeting { "IN MEETING" } else { "NO MEETING" }
            );
            self.notify(snapshot);
        }
    }

    async fn observe(&self) -> PresenceEvidence {
        // Both inspector queries are fail-open, so a helper outage shows
        // up here as empty evidence, never as an error.
        let (running_apps, foreground_app) =
            tokio::join!(self.inspector.running_apps(), self.inspector.foreground_app());

        let meeting_process_active = self.rules.any_meeting_process(&running_apps);

        // At most one tab query per cycle, and only for a foregrounded
        // known browser.
        let mut active_url = None;
        let mut meeting_tab_active = false;
        if let Some(app) = &foreground_app {
            if let Some(browser) = self.rules.browser_for(&app.bundle_id) {
                active_url = self.inspector.active_tab_url(browser).await;
                if let Some(url) = &active_url {
                    meeting_tab_active = self.rules.is_meeting_url(url);
                }
            }
        }

        PresenceEvidence {
            foreground_app,
            active_url,
            meeting_process_active,
            meeting_tab_active,
            timestamp: Utc::now(),
        }
    }

    fn notify(&self, state: PresenceState) {
        // Snapshot before iterating so a listener can unsubscribe (itself
        // or another) from inside its callback.
        let listeners: Vec<Listener> = {
            let guard = self.listeners.lock().unwrap();
            guard.iter().map(|(_, listener)| Arc::clone(listener)).collect()
        };
        for listener in listeners {
            listener(state.clone());
        }
    }
}
