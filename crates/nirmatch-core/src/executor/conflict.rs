/// Conflict resolution as a request/response channel.
///
/// When a destination already exists, the executor sends a
/// [`ConflictRequest`] and blocks the issuing thread until the handler
/// answers or the timeout elapses. A timeout counts as `Cancel`.
/// `OverwriteAll` is remembered for the rest of the run.
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Capacity of the request channel. Requests are serialised, so at most one
/// is ever pending.
pub const CONFLICT_CHANNEL_CAPACITY: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictResponse {
    Overwrite,
    OverwriteAll,
    Cancel,
}

/// A pending decision about one existing destination.
#[derive(Debug)]
pub struct ConflictRequest {
    /// Display name of the conflicting file or folder.
    pub name: String,
    pub src: PathBuf,
    pub dst: PathBuf,
    reply: Sender<ConflictResponse>,
}

impl ConflictRequest {
    /// Answer the request. A late answer after the timeout is ignored.
    pub fn respond(self, response: ConflictResponse) {
        let _ = self.reply.send(response);
    }
}

pub fn conflict_channel() -> (Sender<ConflictRequest>, Receiver<ConflictRequest>) {
    bounded(CONFLICT_CHANNEL_CAPACITY)
}

/// Answer every request on `rx` with `response` until all senders drop.
/// Returns the number of requests answered.
pub fn auto_respond(rx: Receiver<ConflictRequest>, response: ConflictResponse) -> thread::JoinHandle<usize> {
    thread::spawn(move || {
        let mut answered = 0;
        for req in rx {
            info!("Conflict on {} answered {:?}", req.dst.display(), response);
            req.respond(response);
            answered += 1;
        }
        answered
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Decision {
    Proceed,
    Cancel,
}

/// Per-run conflict state.
pub(crate) struct ConflictGate {
    tx: Sender<ConflictRequest>,
    timeout: Duration,
    overwrite_all: AtomicBool,
    serial: Mutex<()>,
}

impl ConflictGate {
    pub(crate) fn new(tx: Sender<ConflictRequest>, timeout: Duration) -> Self {
        Self {
            tx,
            timeout,
            overwrite_all: AtomicBool::new(false),
            serial: Mutex::new(()),
        }
    }

    pub(crate) fn overwrite_all(&self) -> bool {
        self.overwrite_all.load(Ordering::Relaxed)
    }

    /// Decide whether `src` may be written to `dst`.
    pub(crate) fn check(&self, src: &Path, dst: &Path) -> Decision {
        if !dst.exists() || self.overwrite_all() {
            return Decision::Proceed;
        }
        let _guard = self.serial.lock();
        if self.overwrite_all() {
            return Decision::Proceed;
        }
        let (reply, answer) = bounded(1);
        let request = ConflictRequest {
            name: dst
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| dst.display().to_string()),
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
            reply,
        };
        if self.tx.send_timeout(request, self.timeout).is_err() {
            warn!("No conflict handler for {}; cancelling", dst.display());
            return Decision::Cancel;
        }
        match answer.recv_timeout(self.timeout) {
            Ok(ConflictResponse::Overwrite) => Decision::Proceed,
            Ok(ConflictResponse::OverwriteAll) => {
                self.overwrite_all.store(true, Ordering::Relaxed);
                info!("Overwrite-all selected");
                Decision::Proceed
            }
            Ok(ConflictResponse::Cancel) => {
                info!("Conflict on {}: cancelled", dst.display());
                Decision::Cancel
            }
            Err(_) => {
                warn!(
                    "No conflict decision for {} within {:?}; cancelling",
                    dst.display(),
                    self.timeout
                );
                Decision::Cancel
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_destination_never_asks() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = conflict_channel();
        let gate = ConflictGate::new(tx, Duration::from_millis(50));
        assert_eq!(gate.check(Path::new("a"), &dir.path().join("free")), Decision::Proceed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn timeout_means_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = conflict_channel();
        let gate = ConflictGate::new(tx, Duration::from_millis(50));
        assert_eq!(gate.check(Path::new("a"), dir.path()), Decision::Cancel);
    }

    #[test]
    fn overwrite_all_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = conflict_channel();
        let gate = ConflictGate::new(tx, Duration::from_secs(5));
        let responder = auto_respond(rx, ConflictResponse::OverwriteAll);
        assert_eq!(gate.check(Path::new("a"), dir.path()), Decision::Proceed);
        assert_eq!(gate.check(Path::new("b"), dir.path()), Decision::Proceed);
        assert!(gate.overwrite_all());
        drop(gate);
        assert_eq!(responder.join().unwrap(), 1);
    }
}
