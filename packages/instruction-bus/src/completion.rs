//! One-shot completion channel for instruction results.
//!
//! Every instruction carries exactly one [`Promise`]; the submitting caller
//! holds the matching [`Completion`]. Fulfilling or failing a promise
//! consumes it, so a second completion is unrepresentable.
//!
//! # Guarantees
//!
//! - **Exactly once**: `fulfill`/`fail` take the promise by value
//! - **Never resolved by a drop**: if a promise is dropped without being
//!   completed (the dispatcher refused the instruction, or a handler lost
//!   it), the completion stays pending forever. No timeout is imposed here;
//!   callers that need one wrap the completion in `tokio::time::timeout`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::InstructionError;

/// Result delivered through a completion channel.
pub type InstructionResult<T> = Result<T, InstructionError>;

/// Create a linked promise/completion pair.
pub fn channel<T>() -> (Promise<T>, Completion<T>) {
    let (sender, receiver) = oneshot::channel();
    (
        Promise { sender },
        Completion {
            receiver,
            spent: false,
        },
    )
}

/// Producer side of a completion channel.
pub struct Promise<T> {
    sender: oneshot::Sender<InstructionResult<T>>,
}

impl<T> Promise<T> {
    /// Complete with a success payload.
    ///
    /// Returns false if the caller already dropped its completion.
    pub fn fulfill(self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Complete with a failure.
    ///
    /// Returns false if the caller already dropped its completion.
    pub fn fail(self, error: InstructionError) -> bool {
        self.complete(Err(error))
    }

    /// Complete with a prepared result.
    pub fn complete(self, result: InstructionResult<T>) -> bool {
        self.sender.send(result).is_ok()
    }

    /// Returns true if nobody is waiting on the completion any more.
    ///
    /// Long-running handlers may use this to skip work whose result would be
    /// discarded.
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

/// Consumer side of a completion channel.
///
/// Await it, poll it with [`Completion::try_take`], or block on it with
/// [`Completion::blocking_wait`].
pub struct Completion<T> {
    receiver: oneshot::Receiver<InstructionResult<T>>,
    /// Set once the result was taken or the promise was dropped uncompleted.
    /// The receiver is never polled again afterwards.
    spent: bool,
}

impl<T> Completion<T> {
    /// Take the result if it is already available.
    ///
    /// Returns `None` while the instruction is pending, and also after the
    /// result has been taken once.
    pub fn try_take(&mut self) -> Option<InstructionResult<T>> {
        if self.spent {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(result) => {
                self.spent = true;
                Some(result)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.spent = true;
                None
            }
        }
    }

    /// Block the current thread until the result arrives.
    ///
    /// Must not be called from inside an async task. Blocks forever if the
    /// instruction is never completed, or if its result was already taken.
    pub fn blocking_wait(self) -> InstructionResult<T> {
        futures::executor::block_on(self)
    }
}

impl<T> Future for Completion<T> {
    type Output = InstructionResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.spent {
            return Poll::Pending;
        }
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => {
                self.spent = true;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => {
                // Promise dropped uncompleted: stay pending, never resolve.
                self.spent = true;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}
