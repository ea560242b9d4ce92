/// Filesystem watch: one recursive watch per role directory.
///
/// The platform watcher (`notify`) is created on the calling thread so
/// start-up errors surface synchronously, then moved into a background
/// thread that translates raw notifications into [`WatchEvent`]s tagged with
/// the role of the directory they happened under.
///
/// # Cancellation
///
/// [`WatchHandle::stop`] sets the cancel flag; the background thread polls it
/// every 200 ms between receives and exits, dropping the platform watcher.
use crate::error::WatchError;
use crate::model::Role;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum number of events that may queue up before the coordinator drains
/// them. Further events are dropped and the handle is flagged as overflowed,
/// which makes the scheduler replace its next incremental fold with a full
/// rescan.
pub const EVENT_CHANNEL_CAPACITY: usize = 8_192;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    /// Moved or renamed into place; `path` is the destination.
    Moved,
    Removed,
}

/// A filesystem change under one role directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
    pub role: Role,
}

/// Handle to a running watch thread.
pub struct WatchHandle {
    /// Translated events from the watch thread.
    pub receiver: Receiver<WatchEvent>,
    cancel: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    overflowed: Arc<AtomicBool>,
    done: Receiver<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WatchHandle {
    /// `false` once the thread has exited or the platform watcher reported
    /// an error.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// `true` if events were dropped since the last call. Clears the flag.
    pub fn take_overflow(&self) -> bool {
        self.overflowed.swap(false, Ordering::Relaxed)
    }

    /// Signal the thread to stop and wait up to `timeout` for it to exit.
    /// Returns `false` if it did not exit in time; it is then detached.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.cancel.store(true, Ordering::Relaxed);
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(t) = self.thread.take() {
                    let _ = t.join();
                }
                debug!("Watch thread stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Watch thread did not stop within {:?}; detaching", timeout);
                false
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

/// Start watching every `(role, directory)` pair that exists on disk.
pub fn start_watch(roots: Vec<(Role, PathBuf)>) -> Result<WatchHandle, WatchError> {
    let roots: Vec<_> = roots.into_iter().filter(|(_, dir)| dir.is_dir()).collect();
    if roots.is_empty() {
        return Err(WatchError::NoDirectories);
    }

    let alive = Arc::new(AtomicBool::new(true));
    let overflowed = Arc::new(AtomicBool::new(false));
    let (raw_tx, raw_rx) = bounded::<notify::Result<Event>>(EVENT_CHANNEL_CAPACITY);
    let mut watcher: RecommendedWatcher = notify::recommended_watcher({
        let overflowed = Arc::clone(&overflowed);
        move |res: notify::Result<Event>| {
            if let Err(TrySendError::Full(_)) = raw_tx.try_send(res) {
                flag_overflow(&overflowed, "raw notification");
            }
        }
    })?;
    for (role, dir) in &roots {
        watcher.watch(dir, RecursiveMode::Recursive)?;
        info!("Watching {} at {}", role, dir.display());
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let (tx, rx) = bounded::<WatchEvent>(EVENT_CHANNEL_CAPACITY);
    let (done_tx, done_rx) = bounded::<()>(1);

    let thread = thread::Builder::new()
        .name("nirmatch-watch".to_owned())
        .spawn({
            let cancel = Arc::clone(&cancel);
            let alive = Arc::clone(&alive);
            let overflowed = Arc::clone(&overflowed);
            move || {
                run_watch(watcher, roots, raw_rx, tx, &cancel, &alive, &overflowed);
                alive.store(false, Ordering::Relaxed);
                let _ = done_tx.send(());
            }
        })
        .map_err(WatchError::Spawn)?;

    Ok(WatchHandle {
        receiver: rx,
        cancel,
        alive,
        overflowed,
        done: done_rx,
        thread: Some(thread),
    })
}

// ─── Background thread ──────────────────────────────────────────────────────

fn run_watch(
    watcher: RecommendedWatcher,
    roots: Vec<(Role, PathBuf)>,
    raw_rx: Receiver<notify::Result<Event>>,
    tx: Sender<WatchEvent>,
    cancel: &AtomicBool,
    alive: &AtomicBool,
    overflowed: &AtomicBool,
) {
    // Keeps the platform watch registered until this thread exits.
    let _watcher = watcher;
    loop {
        if cancel.load(Ordering::Relaxed) {
            debug!("Watch: cancelled");
            return;
        }
        match raw_rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(event)) => {
                for ev in translate(event, &roots) {
                    match tx.try_send(ev) {
                        Ok(()) => {}
                        Err(TrySendError::Full(ev)) => {
                            debug!("Watch queue full, dropping event for {}", ev.path.display());
                            flag_overflow(overflowed, "translated event");
                        }
                        Err(TrySendError::Disconnected(_)) => return,
                    }
                }
            }
            Ok(Err(e)) => {
                warn!("Watcher error: {}", e);
                alive.store(false, Ordering::Relaxed);
                return;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Platform watcher disconnected");
                return;
            }
        }
    }
}

/// Mark the handle overflowed. Warns once per overflow episode.
fn flag_overflow(overflowed: &AtomicBool, what: &str) {
    if !overflowed.swap(true, Ordering::Relaxed) {
        warn!("Watch queue full, dropping {} events until the next full rescan", what);
    }
}

/// Map one raw notification onto zero or more role-tagged events.
pub fn translate(event: Event, roots: &[(Role, PathBuf)]) -> Vec<WatchEvent> {
    let kinds: Vec<(WatchEventKind, &PathBuf)> = match event.kind {
        EventKind::Create(_) => event.paths.iter().map(|p| (WatchEventKind::Created, p)).collect(),
        EventKind::Remove(_) => event.paths.iter().map(|p| (WatchEventKind::Removed, p)).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::To => event.paths.iter().map(|p| (WatchEventKind::Moved, p)).collect(),
            RenameMode::From => event.paths.iter().map(|p| (WatchEventKind::Removed, p)).collect(),
            RenameMode::Both => {
                let mut v = Vec::with_capacity(2);
                if let Some(from) = event.paths.first() {
                    v.push((WatchEventKind::Removed, from));
                }
                if let Some(to) = event.paths.get(1) {
                    v.push((WatchEventKind::Moved, to));
                }
                v
            }
            _ => event
                .paths
                .iter()
                .map(|p| {
                    if p.exists() {
                        (WatchEventKind::Moved, p)
                    } else {
                        (WatchEventKind::Removed, p)
                    }
                })
                .collect(),
        },
        _ => Vec::new(),
    };
    kinds
        .into_iter()
        .filter_map(|(kind, path)| {
            role_for(path, roots).map(|role| WatchEvent {
                kind,
                path: path.clone(),
                role,
            })
        })
        .collect()
}

/// Role of the deepest configured root containing `path`.
fn role_for(path: &Path, roots: &[(Role, PathBuf)]) -> Option<Role> {
    roots
        .iter()
        .filter(|(_, root)| path.starts_with(root) && path != root.as_path())
        .max_by_key(|(_, root)| root.components().count())
        .map(|(role, _)| *role)
}
