//! Concurrent dispatch engine: fan a job's page units out to the inference
//! client and fan the results back in, in page order.
//!
//! ```text
//!  units ──▶ scheduler ──▶ [task][task]...[task]   (≤ W in flight per job,
//!              ▲   │            │                    ≤ G across jobs)
//!              │   └── cancel   ▼
//!              └──────────── slots[0..N]  ──▶ ordered results
//! ```
//!
//! Every page call is a spawned tokio task. Its result lands in the slot of
//! its own index, so completion order never affects output order. A page
//! failure does not stop its siblings; the remaining pages are still
//! scheduled so the caller learns every failed index, not just the first.
//!
//! Cancellation (caller token or job deadline) stops scheduling and returns
//! [`OcrError::Cancelled`] at once. Tasks already calling the backend are
//! detached and allowed to finish on their own; tasks still waiting for a
//! shared permit give up without calling it.

use crate::config::FailurePolicy;
use crate::error::{FailedPage, InferenceError, OcrError};
use crate::inference::InferenceClient;
use crate::job::{DocumentJob, JobStatus, PageUnit};
use crate::output::PageResult;
use crate::progress::ProgressCallback;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info, warn};

// ── Cancellation ─────────────────────────────────────────────────────────

/// Cloneable, one-shot cancellation signal shared between a caller and a job.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent cancel is not missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────────

/// Runs the page units of one job through an [`InferenceClient`].
#[derive(Clone)]
pub struct Dispatcher {
    client: InferenceClient,
    concurrency: usize,
    global: Option<Arc<Semaphore>>,
    job_timeout: Option<Duration>,
    policy: FailurePolicy,
    progress: Option<ProgressCallback>,
}

impl Dispatcher {
    pub fn new(client: InferenceClient, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
            global: None,
            job_timeout: None,
            policy: FailurePolicy::Strict,
            progress: None,
        }
    }

    /// Share a concurrency ceiling with other dispatchers.
    pub fn with_global_limit(mut self, semaphore: Arc<Semaphore>) -> Self {
        self.global = Some(semaphore);
        self
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn client(&self) -> &InferenceClient {
        &self.client
    }

    /// Execute every page unit of `job` and return one result per unit in
    /// ascending index order.
    ///
    /// Under [`FailurePolicy::Strict`] any failed page turns the whole job
    /// into [`OcrError::JobFailed`]. Under [`FailurePolicy::AllowPartial`]
    /// failed pages are returned with their `error` set.
    pub async fn run(
        &self,
        job: &mut DocumentJob,
        skip_special_tokens: bool,
        cancel: &CancelToken,
    ) -> Result<Vec<PageResult>, OcrError> {
        let units = std::mem::take(&mut job.units);
        let total = units.len();
        let prompt: Arc<str> = Arc::from(job.prompt.as_str());

        job.transition(JobStatus::Running);
        info!(
            "Dispatching {} pages of {} (concurrency {})",
            total,
            crate::fingerprint::short(&job.fingerprint),
            self.concurrency
        );
        if let Some(ref cb) = self.progress {
            cb.on_job_start(total);
        }

        let mut slots: Vec<Option<PageResult>> = (0..total).map(|_| None).collect();
        let mut pending = units.into_iter();
        let mut in_flight: FuturesUnordered<BoxFuture<'static, (usize, PageResult)>> =
            FuturesUnordered::new();
        let mut completed = 0usize;
        // Tripped when this call returns, on every path.
        let stop = StopOnReturn(CancelToken::new());

        let deadline = async {
            match self.job_timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled(job, completed, total));
            }

            while in_flight.len() < self.concurrency {
                match pending.next() {
                    Some(unit) => in_flight.push(self.spawn_page(
                        unit,
                        Arc::clone(&prompt),
                        skip_special_tokens,
                        total,
                        stop.0.clone(),
                    )),
                    None => break,
                }
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(self.cancelled(job, completed, total));
                }
                _ = &mut deadline => {
                    warn!("Job deadline reached after {}/{} pages", completed, total);
                    return Err(self.cancelled(job, completed, total));
                }
                next = in_flight.next() => {
                    let Some((index, result)) = next else { break };
                    match slots.get_mut(index) {
                        Some(slot) if slot.is_none() => {
                            *slot = Some(result);
                            completed += 1;
                        }
                        Some(_) => warn!("Page {}: duplicate result ignored", index),
                        None => warn!("Page {}: index outside 0..{}, result ignored", index, total),
                    }
                }
            }
        }

        let results = slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| OcrError::Internal(format!("page {i} produced no result")))
            })
            .collect::<Result<Vec<_>, _>>();
        let results = match results {
            Ok(r) => r,
            Err(e) => {
                job.transition(JobStatus::Failed);
                return Err(e);
            }
        };

        let failed: Vec<FailedPage> = results
            .iter()
            .filter_map(|r| {
                r.error.as_ref().map(|e| FailedPage {
                    index: r.index,
                    kind: e.kind,
                    detail: e.detail.clone(),
                })
            })
            .collect();

        if let Some(ref cb) = self.progress {
            cb.on_job_complete(total, total - failed.len());
        }

        if failed.is_empty() {
            job.transition(JobStatus::Done);
            debug!("All {} pages succeeded", total);
            return Ok(results);
        }

        match self.policy {
            FailurePolicy::Strict => {
                job.transition(JobStatus::Failed);
                warn!("{} of {} pages failed; discarding results", failed.len(), total);
                Err(OcrError::JobFailed { failed, total })
            }
            FailurePolicy::AllowPartial => {
                job.transition(JobStatus::Done);
                warn!("{} of {} pages failed; returning partial results", failed.len(), total);
                Ok(results)
            }
        }
    }

    fn cancelled(&self, job: &mut DocumentJob, completed: usize, total: usize) -> OcrError {
        job.transition(JobStatus::Cancelled);
        info!("Job cancelled after {}/{} pages", completed, total);
        OcrError::Cancelled { completed, total }
    }

    /// Spawn one page call. The returned future resolves to the page's slot
    /// index and its result, including when the task panicked.
    ///
    /// Once `stop` fires, a task that has not reached the backend yet returns
    /// without calling it.
    fn spawn_page(
        &self,
        unit: PageUnit,
        prompt: Arc<str>,
        skip_special_tokens: bool,
        total: usize,
        stop: CancelToken,
    ) -> BoxFuture<'static, (usize, PageResult)> {
        let index = unit.index;
        let client = self.client.clone();
        let global = self.global.clone();
        let progress = self.progress.clone();

        let handle = tokio::spawn(async move {
            let _permit = match global {
                Some(sem) => tokio::select! {
                    biased;
                    _ = stop.cancelled() => None,
                    permit = sem.acquire_owned() => permit.ok(),
                },
                None => None,
            };
            if stop.is_cancelled() {
                debug!("Page {}: job stopped before dispatch", unit.index);
                return None;
            }
            if let Some(ref cb) = progress {
                cb.on_page_start(unit.index, total);
            }
            let result = client.infer(&unit, &prompt, skip_special_tokens).await;
            if let Some(ref cb) = progress {
                match &result.error {
                    None => cb.on_page_complete(unit.index, total, result.text.len()),
                    Some(e) => cb.on_page_error(unit.index, total, &e.to_string()),
                }
            }
            Some(result)
        });

        Box::pin(async move {
            let failed = |detail: String| PageResult {
                index,
                text: String::new(),
                prompt_tokens: 0,
                completion_tokens: 0,
                duration_ms: 0,
                retries: 0,
                error: Some(InferenceError::model(detail)),
            };
            let result = match handle.await {
                Ok(Some(result)) => result,
                Ok(None) => failed("page not dispatched: job stopped".to_string()),
                Err(e) => failed(format!("page task failed: {e}")),
            };
            (index, result)
        })
    }
}

/// Cancels the wrapped token when dropped.
struct StopOnReturn(CancelToken);

impl Drop for StopOnReturn {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_token_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = {
            let t = token.clone();
            tokio::spawn(async move { t.cancelled().await })
        };
        tokio::task::yield_now().await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_resolves_immediately() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("should resolve");
    }
}
