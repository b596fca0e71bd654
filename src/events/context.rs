//! Pipeline coordination surface shared by every event source.
//!
//! The context owns no sources. It only hands out the pieces they need to
//! report back and to learn when to stop:
//!
//!   • a **load group** (crossbeam `WaitGroup`) – one `LoadTicket` per
//!     registered source, released exactly once whether the source loads,
//!     fails, or panics (the ticket decrements on drop).
//!   • a **load channel** – module names of sources that loaded.
//!   • an **error channel** – load failures and non-fatal runtime errors.
//!   • a **quit signal** – a `watch` flag every source observes.
//!
//! A supervisory blocking task waits on the load group and fires a single
//! "all loaded" notification through a oneshot.

use crossbeam::sync::WaitGroup;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task;

/// Failures reported by sources through the error channel.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{name}: failed to load: {reason}")]
    Load { name: String, reason: String },

    #[error("{name}: {message}")]
    Runtime { name: String, message: String },

    #[error("{name}: I/O error: {err}")]
    Io {
        name: String,
        #[source]
        err: std::io::Error,
    },

    #[error("load registration is closed, the all-loaded watcher is already running")]
    RegistrationClosed,
}

/// Receiving ends of the coordination channels, owned by the monitor loop.
pub struct PipelineReceivers {
    pub loaded: mpsc::UnboundedReceiver<String>,
    pub errors: mpsc::UnboundedReceiver<SourceError>,
}

/// One monitoring session's coordination object.
pub struct PipelineContext {
    load_tx: mpsc::UnboundedSender<String>,
    error_tx: mpsc::UnboundedSender<SourceError>,
    quit_tx: watch::Sender<bool>,
    // `None` once the all-loaded watcher has taken the group.
    group: Option<WaitGroup>,
    registered: usize,
}

impl PipelineContext {
    pub fn new() -> (Self, PipelineReceivers) {
        let (load_tx, loaded) = mpsc::unbounded_channel();
        let (error_tx, errors) = mpsc::unbounded_channel();
        let (quit_tx, _) = watch::channel(false);
        let ctx = Self {
            load_tx,
            error_tx,
            quit_tx,
            group: Some(WaitGroup::new()),
            registered: 0,
        };
        (ctx, PipelineReceivers { loaded, errors })
    }

    /// Reserve `n` load slots. Must run before the sources are launched and
    /// before `watch_loaded`, otherwise the group could be seen as empty.
    pub fn register_loading(&mut self, n: usize) -> Result<Vec<SourceHandle>, SourceError> {
        if self.group.is_none() {
            return Err(SourceError::RegistrationClosed);
        }
        self.registered += n;
        log::debug!("registered {n} loading source(s), {} total", self.registered);
        let group = self.group.as_ref().ok_or(SourceError::RegistrationClosed)?;
        Ok((0..n)
            .map(|_| SourceHandle {
                ticket: LoadTicket {
                    load_tx: self.load_tx.clone(),
                    error_tx: self.error_tx.clone(),
                    guard: group.clone(),
                },
                reporter: self.reporter(),
                quit: self.quit_listener(),
            })
            .collect())
    }

    /// Number of sources registered so far.
    pub fn registered(&self) -> usize {
        self.registered
    }

    /// Spawn the supervisory watcher. The returned receiver resolves once,
    /// after every ticket handed out by `register_loading` has been released.
    pub fn watch_loaded(&mut self) -> Result<oneshot::Receiver<()>, SourceError> {
        let group = self.group.take().ok_or(SourceError::RegistrationClosed)?;
        let (tx, rx) = oneshot::channel();
        task::spawn_blocking(move || {
            group.wait();
            let _ = tx.send(());
        });
        Ok(rx)
    }

    /// Ask every source to stop. Cooperative: nothing is killed.
    pub fn request_quit(&self) {
        self.quit_tx.send_replace(true);
    }

    pub fn quit_requested(&self) -> bool {
        *self.quit_tx.borrow()
    }

    pub fn quit_listener(&self) -> QuitListener {
        QuitListener { rx: self.quit_tx.subscribe() }
    }

    pub fn reporter(&self) -> ErrorReporter {
        ErrorReporter { tx: self.error_tx.clone() }
    }
}

/// One registered load slot.
///
/// Consumed by `loaded` or `failed`; dropping it unused still releases the
/// slot so the all-loaded watcher cannot deadlock on a crashed source.
pub struct LoadTicket {
    load_tx: mpsc::UnboundedSender<String>,
    error_tx: mpsc::UnboundedSender<SourceError>,
    guard: WaitGroup,
}

impl LoadTicket {
    /// Report a successful load, then release the slot.
    pub fn loaded(self, name: &str) {
        let _ = self.load_tx.send(name.to_owned());
    }

    /// Report a failed load, then release the slot.
    pub fn failed(self, err: SourceError) {
        let _ = self.error_tx.send(err);
    }
}

impl std::fmt::Debug for LoadTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LoadTicket")
    }
}

/// Error-channel handle that outlives the load ticket.
#[derive(Clone)]
pub struct ErrorReporter {
    tx: mpsc::UnboundedSender<SourceError>,
}

impl ErrorReporter {
    pub fn report(&self, err: SourceError) {
        let _ = self.tx.send(err);
    }
}

/// Read side of the quit signal.
#[derive(Clone)]
pub struct QuitListener {
    rx: watch::Receiver<bool>,
}

impl QuitListener {
    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once quit has been requested or the context is gone.
    pub async fn wait(&mut self) {
        // `wait_for` errors only when the sender is dropped, which also means stop.
        let _ = self.rx.wait_for(|quit| *quit).await;
    }
}

/// Everything a source receives at launch.
pub struct SourceHandle {
    pub ticket: LoadTicket,
    pub reporter: ErrorReporter,
    pub quit: QuitListener,
}
