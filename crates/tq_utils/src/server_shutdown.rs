//! Utilities for stopping the queue's background tasks.

use std::io;

use tokio::sync::broadcast;

pub struct ShutdownManager {
    immediate_shutdown_tx: broadcast::Sender<()>,
    immediate_shutdown_rx: Option<broadcast::Receiver<()>>,
    shutdown: bool,
}

impl Default for ShutdownManager {
    fn default() -> Self {
        let (immediate_shutdown_tx, immediate_shutdown_rx) = broadcast::channel(1);

        Self {
            immediate_shutdown_tx,
            immediate_shutdown_rx: Some(immediate_shutdown_rx),
            shutdown: false,
        }
    }
}

impl ShutdownManager {
    pub fn new_pair() -> (Self, ShutdownReceiver) {
        let mut manager = Self::default();
        let recv = manager.add_receiver();
        (manager, recv)
    }

    pub fn add_receiver(&mut self) -> ShutdownReceiver {
        ShutdownReceiver {
            immediate_shutdown_rx: self
                .immediate_shutdown_rx
                .take()
                .unwrap_or_else(|| self.immediate_shutdown_tx.subscribe()),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Signals every receiver to stop. Returns the number of receivers notified.
    pub fn shutdown_immediately(&mut self) -> io::Result<usize> {
        if self.shutdown {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "shutdown was already requested",
            ));
        }
        self.shutdown = true;
        self.immediate_shutdown_tx.send(()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "could not send shutdown message",
            )
        })
    }
}

pub struct ShutdownReceiver {
    immediate_shutdown_rx: broadcast::Receiver<()>,
}

impl ShutdownReceiver {
    pub async fn recv_shutdown_immediately(&mut self) -> io::Result<()> {
        self.immediate_shutdown_rx
            .recv()
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::ShutdownManager;

    #[tokio::test]
    async fn every_receiver_is_notified() {
        let (mut manager, mut rx1) = ShutdownManager::new_pair();
        let mut rx2 = manager.add_receiver();

        assert_eq!(manager.shutdown_immediately().unwrap(), 2);
        assert!(manager.is_shutdown());

        rx1.recv_shutdown_immediately().await.unwrap();
        rx2.recv_shutdown_immediately().await.unwrap();
    }

    #[test]
    fn shutting_down_twice_is_an_error() {
        let (mut manager, _rx) = ShutdownManager::new_pair();

        manager.shutdown_immediately().unwrap();
        assert!(manager.shutdown_immediately().is_err());
    }
}
