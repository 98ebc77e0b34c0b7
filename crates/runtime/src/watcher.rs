//! Line sources for live mode
//!
//! Discovering and tailing files is done outside the runtime. Whatever does
//! it implements [`Watcher`]; the runtime only pulls [`SourceEvent`]s.

use std::future::Future;

use logtally_vm::LogLine;
use tokio::sync::mpsc;

/// Something a watcher delivers.
#[derive(Debug)]
pub enum SourceEvent {
    /// A complete new line
    Line(LogLine),
    /// A source could not be read; the runtime logs it and keeps going
    Error { source: String, message: String },
}

/// Delivers lines from growing log files.
///
/// Lines of one source must arrive in file order.
pub trait Watcher: Send {
    /// Next event, or `None` once every source is exhausted.
    fn next_event(&mut self) -> impl Future<Output = Option<SourceEvent>> + Send;

    /// Release subscriptions. Called once when the runtime stops.
    fn close(&mut self) {}
}

/// A watcher fed through a channel.
///
/// The paired [`WatcherHandle`] is used by an external tailer, or by tests,
/// to push events. The watcher ends when every handle is dropped.
#[derive(Debug)]
pub struct ChannelWatcher {
    rx: mpsc::Receiver<SourceEvent>,
}

/// Sending side of a [`ChannelWatcher`].
#[derive(Debug, Clone)]
pub struct WatcherHandle {
    tx: mpsc::Sender<SourceEvent>,
}

impl ChannelWatcher {
    pub fn new(capacity: usize) -> (WatcherHandle, ChannelWatcher) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (WatcherHandle { tx }, ChannelWatcher { rx })
    }
}

impl Watcher for ChannelWatcher {
    async fn next_event(&mut self) -> Option<SourceEvent> {
        self.rx.recv().await
    }

    fn close(&mut self) {
        self.rx.close();
    }
}

impl WatcherHandle {
    /// Send a line; returns `false` once the watcher has been closed.
    pub async fn send_line(&self, line: LogLine) -> bool {
        self.tx.send(SourceEvent::Line(line)).await.is_ok()
    }

    /// Report a source failure; returns `false` once the watcher has been closed.
    pub async fn send_error(&self, source: impl Into<String>, message: impl Into<String>) -> bool {
        self.tx
            .send(SourceEvent::Error {
                source: source.into(),
                message: message.into(),
            })
            .await
            .is_ok()
    }
}
