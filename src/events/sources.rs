//! Source abstraction + the two sources shipped with the crate.
//! -----------------------------------------------------------------------------
//! A **source** produces `Event`s from one kernel probe (or a bridge to one)
//! and pushes them into the shared fan-in channel read by the monitor:
//!
//!   • report load success/failure exactly once through its `LoadTicket`
//!   • after a successful load, emit events until the quit signal is set
//!   • never block another source (each one runs in its own task)
//!
//! The kernel probes themselves live outside this crate. `FeedSource` tails a
//! JSON-lines file written by an external probe helper; `ChannelSource`
//! drains a crossbeam channel for embedding and tests.

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use crossbeam::channel::{Receiver as CbReceiver, RecvTimeoutError};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
    task::{self, JoinHandle},
    time,
};

use crate::events::Event;
use crate::events::context::{PipelineContext, SourceError, SourceHandle};

// ============================================================================
// 1 ▸ Source trait – uniform way to spawn them
// ============================================================================

#[async_trait]
pub trait Source: Send + Sync + 'static {
    /// Display name for logs and load notifications.
    fn name(&self) -> &str;

    /// Load the probe, report through `handle.ticket`, then push events into
    /// `tx` until `handle.quit` is set.
    async fn run(self: Arc<Self>, tx: mpsc::Sender<Event>, handle: SourceHandle);
}

/// Register every source with the context, then launch one task per source.
///
/// Registration happens before the first spawn so no source can release its
/// load slot before the group knows about it.
pub fn spawn_sources(
    sources: Vec<Arc<dyn Source>>,
    tx: &mpsc::Sender<Event>,
    ctx: &mut PipelineContext,
) -> Result<Vec<JoinHandle<()>>, SourceError> {
    let handles = ctx.register_loading(sources.len())?;
    Ok(sources
        .into_iter()
        .zip(handles)
        .map(|(source, handle)| {
            let tx = tx.clone();
            task::spawn(async move {
                let name = source.name().to_owned();
                log::info!("source '{name}' started");
                source.run(tx, handle).await;
                log::info!("source '{name}' exited");
            })
        })
        .collect())
}

// ============================================================================
// 2 ▸ FeedSource – JSON-lines bridge for out-of-process probes
// ============================================================================

/// Tails a file of JSON-serialized events, one per line.
pub struct FeedSource {
    name: String,
    path: PathBuf,
    poll_interval: Duration,
}

impl FeedSource {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        let path = path.into();
        Self { name: format!("feed:{}", path.display()), path, poll_interval }
    }

    fn parse(&self, lineno: usize, line: &str) -> Result<Event, SourceError> {
        serde_json::from_str(line).map_err(|e| SourceError::Runtime {
            name: self.name.clone(),
            message: format!("line {lineno}: {e}"),
        })
    }
}

#[async_trait]
impl Source for FeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(self: Arc<Self>, tx: mpsc::Sender<Event>, handle: SourceHandle) {
        let SourceHandle { ticket, reporter, mut quit } = handle;

        let file = match File::open(&self.path).await {
            Ok(f) => f,
            Err(err) => {
                ticket.failed(SourceError::Io { name: self.name.clone(), err });
                return;
            }
        };
        ticket.loaded(&self.name);

        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        let mut lineno = 0usize;

        loop {
            let read = tokio::select! {
                _ = quit.wait() => break,
                read = reader.read_until(b'\n', &mut buf) => read,
            };

            match read {
                // EOF, or a line the writer has not finished yet: keep what we
                // have and look again after the poll interval.
                Ok(0) => {}
                Ok(_) if buf.last() != Some(&b'\n') => {}
                Ok(_) => {
                    lineno += 1;
                    let parsed = match std::str::from_utf8(&buf) {
                        Ok(line) if line.trim().is_empty() => None,
                        Ok(line) => Some(self.parse(lineno, line.trim())),
                        Err(e) => Some(Err(SourceError::Runtime {
                            name: self.name.clone(),
                            message: format!("line {lineno}: {e}"),
                        })),
                    };
                    buf.clear();
                    match parsed {
                        Some(Ok(ev)) => {
                            let sent = tokio::select! {
                                _ = quit.wait() => break,
                                sent = tx.send(ev) => sent,
                            };
                            if sent.is_err() {
                                // monitor gone → exit
                                break;
                            }
                        }
                        Some(Err(e)) => reporter.report(e),
                        None => {}
                    }
                    continue;
                }
                Err(err) => {
                    reporter.report(SourceError::Io { name: self.name.clone(), err });
                    break;
                }
            }

            tokio::select! {
                _ = quit.wait() => break,
                _ = time::sleep(self.poll_interval) => {}
            }
        }
    }
}

// ============================================================================
// 3 ▸ ChannelSource – crossbeam channel standing in for a probe
// ============================================================================

/// Forwards events received on a crossbeam channel.
pub struct ChannelSource {
    name: &'static str,
    rx: CbReceiver<Event>,
}

impl ChannelSource {
    /// How often the blocking reader looks at the quit flag while idle.
    const QUIT_POLL: Duration = Duration::from_millis(20);

    pub fn new(name: &'static str, rx: CbReceiver<Event>) -> Self {
        Self { name, rx }
    }
}

#[async_trait]
impl Source for ChannelSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(self: Arc<Self>, tx: mpsc::Sender<Event>, handle: SourceHandle) {
        let SourceHandle { ticket, quit, .. } = handle;
        ticket.loaded(self.name);

        // Offload the blocking recv loop to a dedicated OS thread
        let rx = self.rx.clone();
        let reader = task::spawn_blocking(move || {
            while !quit.is_set() {
                match rx.recv_timeout(Self::QUIT_POLL) {
                    Ok(ev) => {
                        // blocking_send() blocks this thread only, never a Tokio worker
                        if tx.blocking_send(ev).is_err() {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });
        if let Err(e) = reader.await {
            log::error!("source '{}' reader panicked: {e}", self.name);
        }
    }
}
