use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub const SESSION_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The transport is live. Push sessions send this once; poll sessions send
    /// it again after recovering from an interruption.
    Opened,
    Payload(Vec<u8>),
    /// The transport stopped delivering but keeps retrying on its own.
    Interrupted { reason: String },
    /// The session is over; nothing follows.
    Closed { reason: String },
}

/// Receives a value once the owning [`Session`] is closed or dropped.
pub type ShutdownSignal = oneshot::Receiver<()>;

pub trait Transport: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn open(&self, events: mpsc::Sender<SessionEvent>) -> Session;
}

/// Handle to one running transport session.
///
/// Closing is idempotent. Dropping the handle closes the session as well, so a
/// session can never outlive whoever owns it.
#[derive(Debug)]
pub struct Session {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Session {
    pub fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        Self {
            shutdown: Some(shutdown_tx),
            task: tokio::spawn(run(shutdown_rx)),
        }
    }

    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn close_is_idempotent_and_stops_task() {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        let mut session = Session::spawn(move |shutdown| async move {
            let _ = shutdown.await;
            flag.store(true, Ordering::SeqCst);
        });
        assert!(!session.is_closed());

        session.close();
        session.close();
        assert!(session.is_closed());

        tokio::time::timeout(Duration::from_secs(1), async {
            while !session.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn drop_signals_shutdown() {
        let (done_tx, done_rx) = oneshot::channel();
        let session = Session::spawn(move |shutdown| async move {
            let _ = shutdown.await;
            let _ = done_tx.send(());
        });
        drop(session);
        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .unwrap()
            .unwrap();
    }
}
