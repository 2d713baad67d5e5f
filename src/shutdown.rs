use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Run-wide cancellation signal. Cloning shares the same signal.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `trigger` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // Sender lives as long as any clone; unreachable in practice.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep for `dur` unless cancelled first. Returns `false` on cancellation.
    pub async fn sleep(&self, dur: Duration) -> bool {
        if dur.is_zero() {
            return !self.is_triggered();
        }
        tokio::select! {
            _ = tokio::time::sleep(dur) => !self.is_triggered(),
            _ = self.cancelled() => false,
        }
    }

    /// Trigger on Ctrl-C or after `timeout`, whichever comes first.
    pub fn spawn_watchers(&self, timeout: Option<Duration>) {
        let on_signal = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if res.is_ok() {
                        tracing::warn!("ctrl-c received; finishing in-flight items");
                        on_signal.trigger();
                    }
                }
                _ = on_signal.cancelled() => {}
            }
        });
        if let Some(limit) = timeout {
            let on_timeout = self.clone();
            tokio::spawn(async move {
                if on_timeout.sleep(limit).await {
                    tracing::warn!(timeout_secs = limit.as_secs(), "run timeout reached; cancelling");
                    on_timeout.trigger();
                }
            });
        }
    }
}
