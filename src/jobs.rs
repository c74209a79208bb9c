//! Background job queue.
//!
//! Every unit of work (one URL scan, one translation batch) is a [`Job`]
//! pulled off a shared channel by a fixed set of worker tasks. Failed
//! attempts are retried with backoff and a job that exhausts its attempts is
//! logged and dropped. A panicking job counts as a failed attempt and never
//! takes its worker down.

use anyhow::{anyhow, bail, Result};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::bookkeeping::best_effort;
use crate::config::Config;
use crate::pipeline::{PageScanner, TranslationBatch, TranslationWorker};
use crate::progress::{ProgressTracker, TaskType};
use crate::retry::{with_retry, RetryConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    ScanUrl(String),
    TranslateBatch(TranslationBatch),
}

impl Job {
    fn describe(&self) -> String {
        match self {
            Job::ScanUrl(url) => format!("Scan {}", url),
            Job::TranslateBatch(batch) => {
                format!("Translate {} strings to {}", batch.len(), batch.locale)
            }
        }
    }
}

/// Timeouts, retries and pacing applied to every job.
///
/// Scans are bounded by the scanner's own render timeout, so keys seen
/// before it fires are still flushed.
#[derive(Debug, Clone)]
pub struct JobPolicy {
    pub translation_timeout: Duration,
    pub retry: RetryConfig,
    /// Pause before each scan attempt, to spare the rendered site
    pub scan_delay: Duration,
}

impl JobPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            translation_timeout: config.translation_timeout(),
            retry: RetryConfig::job(config.job_max_attempts),
            scan_delay: Duration::from_millis(config.scan_delay_ms),
        }
    }
}

pub struct JobHandler {
    scanner: Arc<PageScanner>,
    worker: Arc<TranslationWorker>,
    progress: ProgressTracker,
    policy: JobPolicy,
}

impl JobHandler {
    pub fn new(
        scanner: Arc<PageScanner>,
        worker: Arc<TranslationWorker>,
        progress: ProgressTracker,
        policy: JobPolicy,
    ) -> Self {
        Self {
            scanner,
            worker,
            progress,
            policy,
        }
    }

    /// Run a job to completion, retrying failed attempts.
    ///
    /// Returns the last error once every attempt has failed.
    pub async fn handle(&self, job: &Job) -> Result<()> {
        let name = job.describe();
        let result = with_retry(&self.policy.retry, &name, || self.attempt(job)).await;

        if let Err(e) = &result {
            error!("{}: permanently failed: {:#}", name, e);
        }
        result
    }

    async fn attempt(&self, job: &Job) -> Result<()> {
        match AssertUnwindSafe(self.run_once(job)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                self.record_failure(job).await;
                Err(anyhow!("{} panicked: {}", job.describe(), panic_message(&*panic)))
            }
        }
    }

    async fn run_once(&self, job: &Job) -> Result<()> {
        match job {
            Job::ScanUrl(url) => {
                if !self.policy.scan_delay.is_zero() {
                    tokio::time::sleep(self.policy.scan_delay).await;
                }
                self.scanner.scan(url).await.map(|_| ())
            }
            Job::TranslateBatch(batch) => {
                match tokio::time::timeout(self.policy.translation_timeout, self.worker.run(batch)).await {
                    Ok(result) => result.map(|_| ()),
                    Err(_) => {
                        self.record_failure(job).await;
                        Err(anyhow!(
                            "Translation batch for {} timed out after {:?}",
                            batch.locale,
                            self.policy.translation_timeout
                        ))
                    }
                }
            }
        }
    }

    /// Count an attempt that ended without the job's own bookkeeping.
    async fn record_failure(&self, job: &Job) {
        let update = match job {
            Job::ScanUrl(_) => self.progress.increment_failed(TaskType::Extraction, None, 1),
            Job::TranslateBatch(batch) => self.progress.increment_failed(
                TaskType::Translation,
                Some(&batch.locale),
                batch.len() as u64,
            ),
        };
        best_effort("Progress update", update).await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Decrements the pending count when a job is done, however it ended.
struct PendingGuard {
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Fixed set of worker tasks draining one job channel.
pub struct WorkerPool {
    sender: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers (at least one) sharing `handler`.
    pub fn start(worker_count: usize, handler: Arc<JobHandler>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let pending = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());

        let workers = (0..worker_count.max(1))
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let handler = Arc::clone(&handler);
                let pending = Arc::clone(&pending);
                let idle = Arc::clone(&idle);

                tokio::spawn(async move {
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        let Some(job) = job else {
                            break;
                        };

                        let _done = PendingGuard {
                            pending: Arc::clone(&pending),
                            idle: Arc::clone(&idle),
                        };
                        // Failures are already logged by the handler
                        let _ = handler.handle(&job).await;
                    }
                    tracing::debug!("Worker {} stopped", id);
                })
            })
            .collect();

        info!("✓ Started {} job workers", worker_count.max(1));

        Self {
            sender,
            pending,
            idle,
            workers,
        }
    }

    pub fn dispatch(&self, job: Job) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            bail!("Job queue is closed");
        }
        Ok(())
    }

    /// Dispatch every job; returns how many were queued.
    pub fn dispatch_all<I>(&self, jobs: I) -> Result<usize>
    where
        I: IntoIterator<Item = Job>,
    {
        let mut count = 0;
        for job in jobs {
            self.dispatch(job)?;
            count += 1;
        }
        Ok(count)
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Resolve once no job is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting jobs, let the workers drain the queue, and wait for them.
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.await;
        }
        info!("Job workers stopped");
    }
}
