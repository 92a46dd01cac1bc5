//! Completion delivery: asynchronous by default, synchronous on request.
//!
//! # Design
//! Asynchronous completions are pushed onto a `CallbackQueue`, a single
//! worker thread per client that runs them in arrival order. Synchronous mode
//! swaps the queue for a rendezvous channel: the dispatching thread blocks on
//! it (with a timeout) and runs the completion itself before returning.
//!
//! The mode is read once per dispatch, so flipping it only affects requests
//! dispatched afterwards.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SendError, Sender};
use std::thread;
use std::time::Duration;

use tracing::{error, warn};

use crate::error::{NetworkingError, TransportError, TIMED_OUT_CODE, UNKNOWN_CODE};
use crate::http::Headers;
use crate::types::ResponseOutcome;

/// The caller's completion, in its most general form.
pub type Completion = Box<dyn FnOnce(ResponseOutcome) + Send + 'static>;

/// Where a dispatch sends its outcome once known.
pub(crate) type OutcomeSink = Box<dyn FnOnce(ResponseOutcome) + Send + 'static>;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single worker thread draining completions in FIFO order.
#[derive(Debug, Clone)]
pub(crate) struct CallbackQueue {
    sender: Sender<Job>,
}

impl CallbackQueue {
    pub(crate) fn spawn() -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let spawned = thread::Builder::new()
            .name("networking-callbacks".to_string())
            .spawn(move || {
                for job in receiver {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("request completion panicked");
                    }
                }
            });
        if let Err(err) = spawned {
            // The receiver is gone with the closure; `push` falls back to
            // running jobs inline.
            error!(error = %err, "failed to spawn callback thread");
        }
        Self { sender }
    }

    pub(crate) fn push(&self, job: Job) {
        if let Err(SendError(job)) = self.sender.send(job) {
            job();
        }
    }
}

/// A dispatch that may still need to block for its outcome.
pub(crate) enum Pending {
    Queued,
    Blocking {
        receiver: Receiver<ResponseOutcome>,
        completion: Completion,
    },
}

/// Decides whether completions run inline or on the callback queue.
#[derive(Debug)]
pub struct ExecutionModeController {
    synchronous: AtomicBool,
    timeout: Duration,
    queue: CallbackQueue,
}

impl ExecutionModeController {
    pub fn new(timeout: Duration) -> Self {
        Self {
            synchronous: AtomicBool::new(false),
            timeout,
            queue: CallbackQueue::spawn(),
        }
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous.load(Ordering::SeqCst)
    }

    pub fn set_synchronous(&self, synchronous: bool) {
        self.synchronous.store(synchronous, Ordering::SeqCst);
    }

    /// Deliver an already known outcome.
    pub fn deliver(&self, completion: Completion, outcome: ResponseOutcome) {
        if self.is_synchronous() {
            completion(outcome);
        } else {
            self.queue.push(Box::new(move || completion(outcome)));
        }
    }

    /// Split a completion into the sink the dispatcher resolves and the
    /// bookkeeping `finish` needs.
    pub(crate) fn prepare(&self, completion: Completion) -> (OutcomeSink, Pending) {
        if self.is_synchronous() {
            let (sender, receiver) = mpsc::sync_channel(1);
            let sink: OutcomeSink = Box::new(move |outcome| {
                let _ = sender.send(outcome);
            });
            (sink, Pending::Blocking { receiver, completion })
        } else {
            let queue = self.queue.clone();
            let sink: OutcomeSink =
                Box::new(move |outcome| queue.push(Box::new(move || completion(outcome))));
            (sink, Pending::Queued)
        }
    }

    /// Block until a synchronous dispatch resolves, then run its completion
    /// on this thread. `on_timeout` runs first if the wait gives up, so the
    /// underlying operation can be stopped. No-op for queued dispatches.
    pub(crate) fn finish(&self, pending: Pending, on_timeout: impl FnOnce()) {
        let Pending::Blocking { receiver, completion } = pending else {
            return;
        };
        let outcome = match receiver.recv_timeout(self.timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout = ?self.timeout, "synchronous request timed out");
                on_timeout();
                let error = TransportError::new(TIMED_OUT_CODE, "synchronous wait timed out");
                ResponseOutcome::failure(NetworkingError::Transport(error), Headers::new())
            }
            Err(RecvTimeoutError::Disconnected) => {
                let error = TransportError::new(UNKNOWN_CODE, "request dropped without a result");
                ResponseOutcome::failure(NetworkingError::Transport(error), Headers::new())
            }
        };
        completion(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn ok() -> ResponseOutcome {
        ResponseOutcome::success(None, Headers::new(), Vec::new())
    }

    #[test]
    fn asynchronous_is_the_default() {
        let controller = ExecutionModeController::new(Duration::from_secs(1));
        assert!(!controller.is_synchronous());
    }

    #[test]
    fn synchronous_deliver_runs_inline() {
        let controller = ExecutionModeController::new(Duration::from_secs(1));
        controller.set_synchronous(true);
        let caller = thread::current().id();
        let ran_on = Arc::new(std::sync::Mutex::new(None));
        let seen = Arc::clone(&ran_on);
        controller.deliver(
            Box::new(move |_| *seen.lock().unwrap() = Some(thread::current().id())),
            ok(),
        );
        assert_eq!(*ran_on.lock().unwrap(), Some(caller));
    }

    #[test]
    fn asynchronous_deliver_runs_on_the_queue() {
        let controller = ExecutionModeController::new(Duration::from_secs(1));
        let caller = thread::current().id();
        let (sender, receiver) = mpsc::channel();
        controller.deliver(
            Box::new(move |_| sender.send(thread::current().id()).unwrap()),
            ok(),
        );
        let ran_on = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(ran_on, caller);
    }

    #[test]
    fn finish_blocks_until_the_sink_fires() {
        let controller = ExecutionModeController::new(Duration::from_secs(5));
        controller.set_synchronous(true);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let (sink, pending) = controller.prepare(Box::new(move |outcome| {
            assert!(outcome.is_success());
            counted.fetch_add(1, Ordering::SeqCst);
        }));
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            sink(ok());
        });
        controller.finish(pending, || panic!("should not time out"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        worker.join().unwrap();
    }

    #[test]
    fn finish_times_out_and_reports_it() {
        let controller = ExecutionModeController::new(Duration::from_millis(50));
        controller.set_synchronous(true);
        let (sink, pending) = controller.prepare(Box::new(|outcome| {
            assert_eq!(outcome.error.map(|e| e.code()), Some(TIMED_OUT_CODE));
        }));
        let timed_out = AtomicBool::new(false);
        controller.finish(pending, || timed_out.store(true, Ordering::SeqCst));
        assert!(timed_out.load(Ordering::SeqCst));
        drop(sink);
    }

    #[test]
    fn panicking_completion_does_not_kill_the_queue() {
        let controller = ExecutionModeController::new(Duration::from_secs(1));
        controller.deliver(Box::new(|_| panic!("boom")), ok());
        let (sender, receiver) = mpsc::channel();
        controller.deliver(Box::new(move |_| sender.send(()).unwrap()), ok());
        assert!(receiver.recv_timeout(Duration::from_secs(5)).is_ok());
    }
}
