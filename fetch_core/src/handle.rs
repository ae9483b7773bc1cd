use std::thread::JoinHandle;

use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{FetchError, FetchOutcome};

/// Owner side of a running fetch worker.
///
/// The worker reports its outcome before it exits, so an outcome observed via
/// [`try_outcome`](Self::try_outcome) means the sink will not be called again.
/// Dropping the handle cancels and joins the worker.
#[derive(Debug)]
pub struct FetchHandle {
    token: CancellationToken,
    outcome_rx: Option<oneshot::Receiver<FetchOutcome>>,
    outcome: Option<FetchOutcome>,
    worker: Option<JoinHandle<()>>,
}

impl FetchHandle {
    /// Runs `job` on a named worker thread. The job receives the cancellation
    /// token and returns the terminal outcome, which is published once.
    pub fn spawn<F>(name: &str, job: F) -> Result<Self, FetchError>
    where
        F: FnOnce(CancellationToken) -> FetchOutcome + Send + 'static,
    {
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let (tx, rx) = oneshot::channel();

        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let outcome = job(worker_token);
                // The receiver is gone only if the handle was dropped, which
                // already joined or is joining us.
                let _ = tx.send(outcome);
            })
            .map_err(FetchError::Spawn)?;

        Ok(Self {
            token,
            outcome_rx: Some(rx),
            outcome: None,
            worker: Some(worker),
        })
    }

    /// Non-blocking poll for the terminal outcome.
    pub fn try_outcome(&mut self) -> Option<FetchOutcome> {
        if let Some(outcome) = &self.outcome {
            return Some(outcome.clone());
        }
        let rx = self.outcome_rx.as_mut()?;
        let outcome = match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Closed) => {
                FetchOutcome::TransportError("fetch worker exited without an outcome".to_string())
            }
        };
        self.outcome_rx = None;
        self.outcome = Some(outcome.clone());
        Some(outcome)
    }

    /// Requests termination and blocks until the worker has exited. Returns
    /// the outcome the worker reported, which is `Aborted` unless the fetch
    /// had already finished on its own.
    pub fn cancel(&mut self) -> Option<FetchOutcome> {
        self.token.cancel();
        self.join();
        self.try_outcome()
    }

    /// Waits for the worker thread. Only blocks for long if the fetch is
    /// still running and has not been cancelled.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("fetch worker panicked");
            }
        }
    }
}

impl Drop for FetchHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.token.cancel();
            self.join();
        }
    }
}
