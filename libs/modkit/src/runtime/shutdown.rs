use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Termination signals the notifier reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM / console close or shutdown on Windows
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => f.write_str("SIGINT"),
            Signal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Decides whether a received signal should end [`SignalNotifier::wait`].
pub type SignalPredicate = Arc<dyn Fn(&CancellationToken, Signal) -> bool + Send + Sync + 'static>;

/// Turns OS termination signals into a wake-up for whoever is waiting.
///
/// Listeners are installed when the notifier is created and every signal is
/// buffered, so a signal that arrives between `on_signal` and `wait` is still
/// observed by `wait`.
pub struct SignalNotifier {
    tx: mpsc::UnboundedSender<Signal>,
    rx: Mutex<mpsc::UnboundedReceiver<Signal>>,
    predicates: RwLock<Vec<SignalPredicate>>,
    listener: Option<JoinHandle<()>>,
}

impl fmt::Debug for SignalNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalNotifier")
            .field("predicates", &self.predicates.read().len())
            .field("os_listener", &self.listener.is_some())
            .finish()
    }
}

impl SignalNotifier {
    /// Install SIGINT/SIGTERM listeners. Must be called inside a Tokio runtime.
    pub fn new() -> std::io::Result<Self> {
        let mut notifier = Self::detached();
        notifier.listener = Some(spawn_os_listener(notifier.tx.clone())?);
        Ok(notifier)
    }

    /// Notifier without OS listeners; signals only arrive through [`deliver`](Self::deliver).
    pub fn detached() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            predicates: RwLock::new(Vec::new()),
            listener: None,
        }
    }

    /// Register a predicate consulted for every received signal. Returning
    /// `true` ends the wait. Predicates run in registration order and the first
    /// `true` wins.
    pub fn on_signal<F>(&self, predicate: F)
    where
        F: Fn(&CancellationToken, Signal) -> bool + Send + Sync + 'static,
    {
        self.predicates.write().push(Arc::new(predicate));
    }

    /// Post a signal as if the OS had delivered it.
    pub fn deliver(&self, signal: Signal) {
        let _ = self.tx.send(signal);
    }

    /// Block until `cancel` fires (returns `None`) or a signal is accepted by a
    /// predicate (returns that signal). With no predicates registered any
    /// signal is accepted.
    pub async fn wait(&self, cancel: &CancellationToken) -> Option<Signal> {
        let mut rx = self.rx.lock().await;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                received = rx.recv() => {
                    let signal = received?;
                    tracing::debug!(%signal, "signal received");
                    if self.should_stop(cancel, signal) {
                        return Some(signal);
                    }
                }
            }
        }
    }

    /// Predicates run on a copy of the list so they may register more.
    fn should_stop(&self, cancel: &CancellationToken, signal: Signal) -> bool {
        let predicates: Vec<SignalPredicate> = self.predicates.read().clone();
        if predicates.is_empty() {
            return true;
        }
        predicates.iter().any(|p| p(cancel, signal))
    }
}

impl Drop for SignalNotifier {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.take() {
            handle.abort();
        }
    }
}

#[cfg(unix)]
fn spawn_os_listener(tx: mpsc::UnboundedSender<Signal>) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    // create signal listeners first so nothing is lost before the task runs
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?; // Ctrl+C

    Ok(tokio::spawn(async move {
        loop {
            let signal = tokio::select! {
                Some(()) = sigint.recv() => Signal::Interrupt,
                Some(()) = sigterm.recv() => Signal::Terminate,
                else => break,
            };
            if tx.send(signal).is_err() {
                break;
            }
        }
    }))
}

#[cfg(windows)]
fn spawn_os_listener(tx: mpsc::UnboundedSender<Signal>) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::windows::{ctrl_c, ctrl_close, ctrl_shutdown};

    let mut c = ctrl_c()?;
    let mut cl = ctrl_close()?;
    let mut sh = ctrl_shutdown()?;

    Ok(tokio::spawn(async move {
        loop {
            let signal = tokio::select! {
                Some(()) = c.recv() => Signal::Interrupt,
                Some(()) = cl.recv() => Signal::Terminate,
                Some(()) = sh.recv() => Signal::Terminate,
                else => break,
            };
            if tx.send(signal).is_err() {
                break;
            }
        }
    }))
}
