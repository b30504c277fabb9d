//! Driving a future toward a task, one resumption at a time.
//!
//! A [`Driver`] is the bridge for embedding systems that own their own
//! run loop: they call [`Driver::step`] whenever they see fit, and the
//! driver reinstates the ambient context captured at construction
//! around every poll, so suspension points inside the future observe
//! the same supertext as the code that created it.

use crate::{Reason, Task};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use subtext::Snapshot;

/// Adapts a future into a [`Task`], re-entering the captured ambient
/// context around each resumption.
///
/// ```
/// use futures::task::noop_waker;
/// use std::task::Context;
/// use task::{Driver, Reason};
///
/// let mut driver = Driver::new(async { Ok::<_, Reason>(5) });
/// let task = driver.task();
///
/// let waker = noop_waker();
/// assert!(driver.step(&mut Context::from_waker(&waker)));
/// assert_eq!(task.value(), Some(5));
/// ```
pub struct Driver<F, T> {
    future: Pin<Box<F>>,
    task: Task<T>,
    snapshot: Snapshot,
    done: bool,
}

impl<T, F> Driver<F, T>
where
    T: Clone + 'static,
    F: Future<Output = Result<T, Reason>>,
{
    /// Captures the current ambient context and a pending task for
    /// `future`'s eventual outcome.
    pub fn new(future: F) -> Self {
        Self {
            future: Box::pin(future),
            task: Task::unsettled(),
            snapshot: Snapshot::capture(),
            done: false,
        }
    }

    /// The task settled by this driver.
    pub fn task(&self) -> Task<T> {
        self.task.clone()
    }

    /// Polls the future once under the captured context, settling the
    /// task when it finishes. Returns whether the drive is complete;
    /// stepping a completed driver is a no-op.
    pub fn step(&mut self, cx: &mut Context<'_>) -> bool {
        if self.done {
            return true;
        }

        let future = self.future.as_mut();
        let snapshot = &self.snapshot;
        match snapshot.enter(|| future.poll(cx)) {
            Poll::Pending => false,
            Poll::Ready(Ok(value)) => {
                self.task.resolve(value);
                self.done = true;
                true
            }
            Poll::Ready(Err(reason)) => {
                self.task.reject(reason);
                self.done = true;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskState;
    use futures::task::noop_waker;
    use subtext::{Subtext, Supertext};

    /// Resolves with the ambient value of its slot on the second poll.
    struct AmbientRead {
        slot: Subtext<String>,
        polled: bool,
    }

    impl Future for AmbientRead {
        type Output = Result<String, Reason>;

        fn poll(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Self::Output> {
            let this = self.get_mut();
            if this.polled {
                Poll::Ready(Ok(this.slot.read().to_string()))
            } else {
                this.polled = true;
                Poll::Pending
            }
        }
    }

    #[test]
    fn every_resumption_sees_the_captured_context() {
        let slot = Subtext::new(String::from("missing"));

        let mut driver = None;
        Supertext::empty().branch().with(&slot, String::from("captured")).done().run(|| {
            driver = Some(Driver::new(AmbientRead { slot: slot.clone(), polled: false }));
        });
        let mut driver = driver.expect("driver was built in context");

        // stepped from outside any context, twice
        let waker = noop_waker();
        assert!(!driver.step(&mut Context::from_waker(&waker)), "first poll suspends");
        assert!(driver.step(&mut Context::from_waker(&waker)));

        assert_eq!(driver.task().value().expect("future completed"), "captured");
        assert!(driver.step(&mut Context::from_waker(&waker)), "stepping after completion is idle");
    }

    #[test]
    fn future_errors_become_rejections() {
        let mut driver = Driver::new(async { Err::<u8, _>(Reason::from("boom")) });
        let task = driver.task();

        let waker = noop_waker();
        assert!(driver.step(&mut Context::from_waker(&waker)));
        assert_eq!(task.state(), TaskState::Rejected);
    }
}
