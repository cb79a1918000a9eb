//! Human gates: exactly-once slots a build can wait on.
//!
//! A gate is a [`oneshot`] pair. The caller side ([`GateSender`]) can be
//! filled once; the build side ([`GateReceiver`]) blocks until it is filled,
//! the sender is dropped, or the build's [`CancelToken`] fires.

use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, watch};
use tracing::debug;

use autoformatter_shared::{AutoFormatterError, Result};

/// Create a gate for values of type `T`.
pub fn gate<T>(name: &'static str) -> (GateSender<T>, GateReceiver<T>) {
    let (tx, rx) = oneshot::channel();
    (
        GateSender {
            name,
            tx: Arc::new(Mutex::new(Some(tx))),
        },
        GateReceiver { name, rx },
    )
}

/// Fills a gate. Clones share the same slot.
#[derive(Debug)]
pub struct GateSender<T> {
    name: &'static str,
    tx: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for GateSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> GateSender<T> {
    /// Fill the slot. Fails if it was already filled or the build stopped listening.
    pub fn fill(&self, value: T) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .map_err(|_| AutoFormatterError::Internal(format!("{} gate poisoned", self.name)))?
            .take()
            .ok_or_else(|| AutoFormatterError::validation(format!("{} was already provided", self.name)))?;

        tx.send(value).map_err(|_| {
            AutoFormatterError::validation(format!("the build is no longer waiting for the {}", self.name))
        })
    }

    pub fn is_filled(&self) -> bool {
        self.tx.lock().map(|slot| slot.is_none()).unwrap_or(true)
    }
}

/// Waits on a gate.
#[derive(Debug)]
pub struct GateReceiver<T> {
    name: &'static str,
    rx: oneshot::Receiver<T>,
}

impl<T> GateReceiver<T> {
    /// Block until the slot is filled.
    ///
    /// Returns [`AutoFormatterError::Cancelled`] when `cancel` fires first or
    /// every sender was dropped unfilled.
    pub async fn wait(self, cancel: &CancelToken) -> Result<T> {
        if cancel.is_cancelled() {
            debug!(gate = self.name, "cancelled before waiting");
            return Err(AutoFormatterError::Cancelled);
        }
        // `wait_for` sees a cancel that lands between the check and here.
        let mut signal = cancel.subscribe();

        tokio::select! {
            value = self.rx => value.map_err(|_| {
                debug!(gate = self.name, "sender dropped without a value");
                AutoFormatterError::Cancelled
            }),
            _ = cancelled(&mut signal) => {
                debug!(gate = self.name, "cancelled while waiting");
                Err(AutoFormatterError::Cancelled)
            }
        }
    }
}

async fn cancelled(signal: &mut watch::Receiver<bool>) {
    // A closed channel means the token is gone; nobody can cancel any more.
    if signal.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Per-build cancellation flag. Sticky: once cancelled, always cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_the_filled_value() {
        let (tx, rx) = gate::<String>("response");
        let cancel = CancelToken::new();

        let waiter = tokio::spawn(async move { rx.wait(&cancel).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.fill("pasted reply".into()).unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), "pasted reply");
        assert!(tx.is_filled());
    }

    #[tokio::test]
    async fn second_fill_is_rejected() {
        let (tx, rx) = gate::<u32>("output location");
        tx.fill(1).unwrap();
        let err = tx.clone().fill(2).unwrap_err();
        assert!(err.to_string().contains("already provided"));

        assert_eq!(rx.wait(&CancelToken::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancel_unblocks_a_waiter() {
        let (_tx, rx) = gate::<String>("response");
        let cancel = CancelToken::new();

        let token = cancel.clone();
        let waiter = tokio::spawn(async move { rx.wait(&token).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let err = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke up")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, AutoFormatterError::Cancelled));
    }

    #[tokio::test]
    async fn cancel_before_wait_wins_over_a_value() {
        let (tx, rx) = gate::<String>("response");
        let cancel = CancelToken::new();
        tx.fill("late".into()).unwrap();
        cancel.cancel();

        assert!(matches!(rx.wait(&cancel).await, Err(AutoFormatterError::Cancelled)));
    }

    #[tokio::test]
    async fn dropped_sender_counts_as_cancel() {
        let (tx, rx) = gate::<String>("response");
        drop(tx);
        assert!(matches!(
            rx.wait(&CancelToken::new()).await,
            Err(AutoFormatterError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn fill_after_receiver_dropped_fails() {
        let (tx, rx) = gate::<String>("response");
        drop(rx);
        assert!(tx.fill("x".into()).is_err());
    }
}
