use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use signon_ipc::SignonError;
use tokio::sync::oneshot;

/// Completion of a queued operation.
///
/// The operation is queued when the method returning the `Reply` is called;
/// awaiting only observes the outcome. Dropping a `Reply` does not cancel the
/// operation. If the owning object is torn down first, the reply resolves to
/// [`SignonError::Disposed`].
#[must_use = "the operation runs regardless; await the reply to observe its outcome"]
#[derive(Debug)]
pub struct Reply<T> {
    rx: oneshot::Receiver<Result<T, SignonError>>,
}

impl<T> Future for Reply<T> {
    type Output = Result<T, SignonError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SignonError::Disposed)))
    }
}

pub(crate) struct ReplySender<T> {
    tx: oneshot::Sender<Result<T, SignonError>>,
}

impl<T> ReplySender<T> {
    pub(crate) fn send(self, result: Result<T, SignonError>) {
        if self.tx.send(result).is_err() {
            log::trace!("reply dropped by caller");
        }
    }
}

pub(crate) fn channel<T>() -> (ReplySender<T>, Reply<T>) {
    let (tx, rx) = oneshot::channel();
    (ReplySender { tx }, Reply { rx })
}
