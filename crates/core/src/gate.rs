use std::sync::Arc;

use tokio::sync::watch;

/// Manual-reset gate used to pause a running job.
///
/// Open means "make progress". Clones share the same gate.
#[derive(Clone, Debug)]
pub struct PauseGate {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Close the gate. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        self.tx.send_if_modified(|open| std::mem::replace(open, false))
    }

    /// Open the gate. Returns false if it was already open.
    pub fn open(&self) -> bool {
        self.tx.send_if_modified(|open| !std::mem::replace(open, true))
    }

    /// Resolves as soon as the gate is open.
    pub async fn wait_open(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|open| *open).await;
    }

    /// Resolves as soon as the gate is closed.
    pub async fn wait_closed(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|open| !*open).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn open_and_close_report_changes() {
        let gate = PauseGate::new();
        assert!(gate.is_open());
        assert!(!gate.open());
        assert!(gate.close());
        assert!(!gate.close());
        assert!(!gate.is_open());
        assert!(gate.open());
    }

    #[tokio::test]
    async fn wait_open_blocks_until_reopened() {
        let gate = PauseGate::new();
        gate.close();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_open().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.open();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
