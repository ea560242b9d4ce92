/// Event scheduler: decides when to fold events incrementally and when to
/// force a full rescan.
///
/// The scheduler is driven by its owner calling [`Scheduler::pump`] with the
/// current instant (once per tick of a CLI loop or GUI frame). All timers are
/// plain deadlines checked inside `pump`, so every pool mutation and rebuild
/// happens on the caller's thread.
///
/// ```text
/// Idle ──start──▶ Watching ──debounce fires──▶ fold queue + rebuild ──▶ Watching
///                    │  └────inactivity fires──▶ full rescan ─────────▶ Watching
///                    └──stop──▶ Stopped
/// ```
pub mod watcher;

pub use watcher::{start_watch, WatchEvent, WatchEventKind, WatchHandle};

use crate::config::{Settings, HEALTH_CHECK_INTERVAL, INACTIVITY_WINDOW, WATCH_JOIN_TIMEOUT};
use crate::error::WatchError;
use crate::model::Role;
use crate::session::Session;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Watching,
    Stopped,
}

/// Timer lengths. Defaults come from the settings debounce interval and the
/// fixed scheduler constants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub debounce: Duration,
    pub inactivity_window: Duration,
    pub health_check_interval: Duration,
    pub join_timeout: Duration,
}

impl SchedulerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            debounce: settings.debounce(),
            ..Self::default()
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            inactivity_window: INACTIVITY_WINDOW,
            health_check_interval: HEALTH_CHECK_INTERVAL,
            join_timeout: WATCH_JOIN_TIMEOUT,
        }
    }
}

/// What a call to [`Scheduler::pump`] did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tick {
    /// Debounce fired: `events` were folded, `groups` exist after rebuild.
    Incremental { events: usize, groups: usize },
    /// Inactivity fired, or the debounce fired after the watcher dropped
    /// events, and a full rescan ran.
    FullRescan { groups: usize },
    /// The health check found the watcher dead and restarted it.
    WatcherRestarted,
    /// The health check found the watcher dead and could not restart it.
    WatcherDown(String),
}

pub struct Scheduler {
    config: SchedulerConfig,
    state: SchedulerState,
    roots: Vec<(Role, PathBuf)>,
    watch: Option<WatchHandle>,
    queue: Vec<WatchEvent>,
    /// The watcher dropped events; the next debounce does a full rescan.
    rescan_pending: bool,
    debounce_at: Option<Instant>,
    inactivity_at: Option<Instant>,
    health_at: Option<Instant>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            state: SchedulerState::Idle,
            roots: Vec::new(),
            watch: None,
            queue: Vec::new(),
            rescan_pending: false,
            debounce_at: None,
            inactivity_at: None,
            health_at: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_watching(&self) -> bool {
        self.state == SchedulerState::Watching
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    pub fn watcher_alive(&self) -> bool {
        self.watch.as_ref().is_some_and(WatchHandle::is_alive)
    }

    /// Run the synchronous cold scan, start the recursive watch over every
    /// configured role directory, and arm the inactivity and health timers.
    /// Returns the group count after the cold scan.
    pub fn start(&mut self, session: &mut Session, now: Instant) -> Result<usize, WatchError> {
        if self.state == SchedulerState::Watching {
            return Ok(session.groups().len());
        }
        let groups = session.full_rescan().len();
        self.roots = session.settings().role_dirs();
        self.watch = Some(start_watch(self.roots.clone())?);
        self.state = SchedulerState::Watching;
        self.queue.clear();
        self.rescan_pending = false;
        self.debounce_at = None;
        self.inactivity_at = Some(now + self.config.inactivity_window);
        self.health_at = Some(now + self.config.health_check_interval);
        info!("Watching started with {} groups", groups);
        Ok(groups)
    }

    /// Queue an event. Arms the debounce timer if it is not already armed
    /// and pushes the inactivity deadline out.
    pub fn enqueue(&mut self, event: WatchEvent, now: Instant) {
        if self.state != SchedulerState::Watching {
            return;
        }
        self.queue.push(event);
        if self.debounce_at.is_none() {
            self.debounce_at = Some(now + self.config.debounce);
        }
        self.inactivity_at = Some(now + self.config.inactivity_window);
    }

    /// Record that the watcher dropped events. The next debounce replaces
    /// the incremental fold with a full rescan.
    pub fn note_overflow(&mut self, now: Instant) {
        if self.state != SchedulerState::Watching {
            return;
        }
        self.rescan_pending = true;
        if self.debounce_at.is_none() {
            self.debounce_at = Some(now + self.config.debounce);
        }
    }

    /// Drain the watcher and fire every due timer.
    pub fn pump(&mut self, session: &mut Session, now: Instant) -> Vec<Tick> {
        let mut ticks = Vec::new();
        if self.state != SchedulerState::Watching {
            return ticks;
        }

        let incoming: Vec<WatchEvent> = self
            .watch
            .as_ref()
            .map(|w| w.receiver.try_iter().collect())
            .unwrap_or_default();
        for event in incoming {
            self.enqueue(event, now);
        }
        if self.watch.as_ref().is_some_and(WatchHandle::take_overflow) {
            self.note_overflow(now);
        }

        if self.debounce_at.is_some_and(|at| at <= now) && self.rescan_pending {
            self.debounce_at = None;
            self.rescan_pending = false;
            let dropped = std::mem::take(&mut self.queue).len();
            warn!("Watcher dropped events; full rescan instead of folding {} queued events", dropped);
            let groups = session.full_rescan().len();
            ticks.push(Tick::FullRescan { groups });
        } else if self.debounce_at.is_some_and(|at| at <= now) {
            self.debounce_at = None;
            let events = std::mem::take(&mut self.queue);
            let count = events.len();
            session.apply_events(events);
            debug!("Debounce fired: {} events folded", count);
            ticks.push(Tick::Incremental {
                events: count,
                groups: session.groups().len(),
            });
        }

        if self.inactivity_at.is_some_and(|at| at <= now) {
            self.inactivity_at = None;
            info!("No events for {:?}; forcing full rescan", self.config.inactivity_window);
            let groups = session.full_rescan().len();
            ticks.push(Tick::FullRescan { groups });
        }

        if self.health_at.is_some_and(|at| at <= now) {
            self.health_at = Some(now + self.config.health_check_interval);
            if let Some(tick) = self.check_health() {
                ticks.push(tick);
            }
        }

        ticks
    }

    fn check_health(&mut self) -> Option<Tick> {
        if self.watcher_alive() {
            return None;
        }
        warn!("Watcher is not running; restarting");
        if let Some(old) = self.watch.take() {
            old.stop(self.config.join_timeout);
        }
        match start_watch(self.roots.clone()) {
            Ok(handle) => {
                self.watch = Some(handle);
                info!("Watcher recovered");
                Some(Tick::WatcherRestarted)
            }
            Err(e) => {
                warn!("Watcher restart failed: {}", e);
                Some(Tick::WatcherDown(e.to_string()))
            }
        }
    }

    /// Cancel all timers, stop the watcher with the bounded join timeout,
    /// and discard undrained events.
    pub fn stop(&mut self) {
        if let Some(handle) = self.watch.take() {
            handle.stop(self.config.join_timeout);
        }
        let dropped = self.queue.len();
        self.queue.clear();
        self.rescan_pending = false;
        self.debounce_at = None;
        self.inactivity_at = None;
        self.health_at = None;
        if self.state == SchedulerState::Watching {
            info!("Watching stopped ({} queued events discarded)", dropped);
        }
        self.state = SchedulerState::Stopped;
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.watch.take() {
            handle.stop(Duration::ZERO);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fast() -> SchedulerConfig {
        SchedulerConfig {
            debounce: Duration::from_millis(500),
            inactivity_window: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(30),
            join_timeout: Duration::from_secs(3),
        }
    }

    fn session_with_cam(root: &std::path::Path) -> (Session, PathBuf) {
        let cam = root.join("cam1");
        fs::create_dir(&cam).unwrap();
        let mut settings = Settings::default();
        settings.directories.insert(Role::Cam1, cam.clone());
        (Session::new(settings), cam)
    }

    fn created(path: PathBuf) -> WatchEvent {
        WatchEvent {
            kind: WatchEventKind::Created,
            path,
            role: Role::Cam1,
        }
    }

    #[test]
    fn debounce_is_single_shot_and_not_pushed_out() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, cam) = session_with_cam(dir.path());
        // Files exist before the watch starts so only injected events count.
        fs::write(cam.join("a.jpg"), b"a").unwrap();
        fs::write(cam.join("b.jpg"), b"b").unwrap();
        let mut sched = Scheduler::new(fast());
        let t0 = Instant::now();
        sched.start(&mut session, t0).unwrap();

        sched.enqueue(created(cam.join("a.jpg")), t0);
        sched.enqueue(created(cam.join("b.jpg")), t0 + Duration::from_millis(400));

        assert!(sched.pump(&mut session, t0 + Duration::from_millis(499)).is_empty());
        let ticks = sched.pump(&mut session, t0 + Duration::from_millis(500));
        assert_eq!(ticks, vec![Tick::Incremental { events: 2, groups: 2 }]);
        assert_eq!(sched.pending_events(), 0);
        sched.stop();
    }

    #[test]
    fn inactivity_forces_one_rescan_and_rearms_on_events() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, cam) = session_with_cam(dir.path());
        fs::write(cam.join("a.jpg"), b"a").unwrap();
        let mut sched = Scheduler::new(fast());
        let t0 = Instant::now();
        sched.start(&mut session, t0).unwrap();

        let t10 = t0 + Duration::from_secs(10);
        assert_eq!(sched.pump(&mut session, t10), vec![Tick::FullRescan { groups: 1 }]);
        assert!(sched.pump(&mut session, t10 + Duration::from_secs(15)).is_empty());

        let t26 = t0 + Duration::from_secs(26);
        sched.enqueue(created(cam.join("a.jpg")), t26);
        sched.pump(&mut session, t26 + Duration::from_secs(1));
        let ticks = sched.pump(&mut session, t26 + Duration::from_secs(10));
        assert_eq!(ticks, vec![Tick::FullRescan { groups: 1 }]);
        sched.stop();
    }

    #[test]
    fn dropped_events_turn_the_next_debounce_into_a_full_rescan() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, cam) = session_with_cam(dir.path());
        fs::write(cam.join("a.jpg"), b"a").unwrap();
        let mut sched = Scheduler::new(fast());
        let t0 = Instant::now();
        assert_eq!(sched.start(&mut session, t0).unwrap(), 1);

        // A file whose event was lost is only found by rescanning.
        fs::write(cam.join("b.jpg"), b"b").unwrap();
        sched.note_overflow(t0);

        assert!(sched.pump(&mut session, t0 + Duration::from_millis(499)).is_empty());
        let ticks = sched.pump(&mut session, t0 + Duration::from_millis(500));
        assert_eq!(ticks, vec![Tick::FullRescan { groups: 2 }]);
        assert_eq!(sched.pending_events(), 0);
        assert_eq!(session.groups().len(), 2);
        sched.stop();
    }

    #[test]
    fn stop_discards_queue_and_ignores_later_events() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, cam) = session_with_cam(dir.path());
        let mut sched = Scheduler::new(fast());
        let t0 = Instant::now();
        sched.start(&mut session, t0).unwrap();
        sched.enqueue(created(cam.join("a.jpg")), t0);
        sched.stop();
        assert_eq!(sched.state(), SchedulerState::Stopped);
        assert_eq!(sched.pending_events(), 0);
        sched.enqueue(created(cam.join("b.jpg")), t0);
        assert_eq!(sched.pending_events(), 0);
        assert!(sched.pump(&mut session, t0 + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn health_check_leaves_live_watcher_alone() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _cam) = session_with_cam(dir.path());
        let mut sched = Scheduler::new(fast());
        let t0 = Instant::now();
        sched.start(&mut session, t0).unwrap();
        let ticks = sched.pump(&mut session, t0 + Duration::from_secs(30));
        assert!(!ticks.iter().any(|t| matches!(t, Tick::WatcherRestarted)));
        assert!(sched.watcher_alive());
        sched.stop();
    }
}
