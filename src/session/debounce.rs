use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::session::store::{PersistedState, SessionStore};

enum Command {
    Save(PersistedState),
    Flush(oneshot::Sender<()>),
}

/// Trailing-edge writer: only the last snapshot of a quiet window reaches disk.
pub struct DebouncedWriter {
    sender: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

impl DebouncedWriter {
    pub fn spawn(store: Arc<SessionStore>, delay: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_writer(store, delay, receiver));
        Self { sender, handle }
    }

    /// Replaces any pending snapshot and restarts the quiet period.
    pub fn schedule(&self, state: PersistedState) {
        if self.sender.send(Command::Save(state)).is_err() {
            debug!("Debounced writer already stopped; dropping snapshot");
        }
    }

    /// Writes the pending snapshot now, if there is one.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.sender.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Flushes the pending snapshot and stops the writer task.
    pub async fn shutdown(self) {
        let DebouncedWriter { sender, handle } = self;
        drop(sender);
        if let Err(err) = handle.await {
            warn!("Debounced writer task failed: {}", err);
        }
    }
}

async fn run_writer(
    store: Arc<SessionStore>,
    delay: Duration,
    mut receiver: mpsc::UnboundedReceiver<Command>,
) {
    let mut pending: Option<PersistedState> = None;

    loop {
        if pending.is_none() {
            match receiver.recv().await {
                Some(Command::Save(state)) => pending = Some(state),
                Some(Command::Flush(done)) => {
                    let _ = done.send(());
                }
                None => break,
            }
            continue;
        }

        tokio::select! {
            command = receiver.recv() => match command {
                Some(Command::Save(state)) => pending = Some(state),
                Some(Command::Flush(done)) => {
                    write_pending(&store, &mut pending).await;
                    let _ = done.send(());
                }
                None => {
                    write_pending(&store, &mut pending).await;
                    break;
                }
            },
            _ = tokio::time::sleep(delay) => write_pending(&store, &mut pending).await,
        }
    }

    debug!("Debounced writer stopped");
}

async fn write_pending(store: &SessionStore, pending: &mut Option<PersistedState>) {
    if let Some(state) = pending.take() {
        store.save_best_effort(&state).await;
    }
}
