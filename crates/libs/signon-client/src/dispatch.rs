use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::task::Poll;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Call = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Per-object driver for remote calls.
///
/// Submitted calls are first polled in submission order, on one task, so the
/// daemon sees them in the order the object issued them. Calls then run
/// concurrently. Cancelling the queue drops every call that has not
/// finished; their replies resolve to `Disposed`.
pub(crate) struct CallQueue {
    tx: mpsc::UnboundedSender<Call>,
    token: CancellationToken,
}

impl CallQueue {
    pub(crate) fn spawn(runtime: &Handle, label: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        runtime.spawn(drive(rx, token.clone(), label));
        Self { tx, token }
    }

    pub(crate) fn submit<F>(&self, call: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_cancelled() || self.tx.send(Box::pin(call)).is_err() {
            log::trace!("call queue closed; dropping call");
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn shutdown(&self) {
        self.token.cancel();
    }
}

impl Drop for CallQueue {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn drive(mut rx: mpsc::UnboundedReceiver<Call>, token: CancellationToken, label: String) {
    let mut in_flight: Vec<Call> = Vec::new();
    let mut closed = false;

    let pump = poll_fn(|cx| {
        while !closed {
            match rx.poll_recv(cx) {
                Poll::Ready(Some(call)) => in_flight.push(call),
                Poll::Ready(None) => closed = true,
                Poll::Pending => break,
            }
        }
        in_flight.retain_mut(|call| call.as_mut().poll(cx).is_pending());
        if closed && in_flight.is_empty() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    });

    tokio::select! {
        _ = token.cancelled() => log::trace!("{label}: call queue cancelled"),
        _ = pump => log::trace!("{label}: call queue drained"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn calls_start_in_submission_order() {
        let queue = CallQueue::spawn(&Handle::current(), "test".to_owned());
        let started = Arc::new(Mutex::new(Vec::new()));
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<()>();

        let first = Arc::clone(&started);
        queue.submit(async move {
            first.lock().expect("mutex poisoned").push(1);
            let _ = release_rx.await;
        });
        let second = Arc::clone(&started);
        queue.submit(async move {
            second.lock().expect("mutex poisoned").push(2);
            let _ = done_tx.send(());
        });

        // The second call completes while the first is still parked.
        done_rx.await.expect("second call finished");
        assert_eq!(*started.lock().expect("mutex poisoned"), vec![1, 2]);
        let _ = release_tx.send(());
    }

    #[tokio::test]
    async fn shutdown_drops_in_flight_calls() {
        let queue = CallQueue::spawn(&Handle::current(), "test".to_owned());
        let (reply_tx, reply_rx) = oneshot::channel::<()>();
        queue.submit(async move {
            std::future::pending::<()>().await;
            let _ = reply_tx.send(());
        });
        tokio::task::yield_now().await;
        queue.shutdown();

        assert!(reply_rx.await.is_err());
    }
}
