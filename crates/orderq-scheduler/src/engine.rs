use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::FutureExt;
use orderq_core::config::SchedulerConfig;
use tokio::sync::{mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    job::{BoxJob, Job},
    types::{JobFault, Scheduler, SchedulerStats, WorkerState},
};

/// Queue and counters, all guarded by one mutex.
struct QueueState {
    /// Jobs not yet handed to the worker, in submission order.
    pending: VecDeque<BoxJob>,
    /// The worker has taken the head and is running it.
    running: bool,
    scheduled: usize,
    finished: usize,
    worker: WorkerState,
    /// Taken by `stop`. `None` means no further jobs are accepted.
    cancel: Option<CancellationToken>,
}

impl QueueState {
    /// Pending count as callers see it: the running job still counts.
    fn pending_len(&self) -> usize {
        self.pending.len() + usize::from(self.running)
    }

    fn is_settled(&self, n: usize) -> bool {
        self.finished >= n && self.pending_len() == 0
    }
}

struct Shared {
    name: String,
    state: Mutex<QueueState>,
    /// Single-slot coalescing wake for an idle worker.
    resume_tx: mpsc::Sender<()>,
    /// Broadcast after every job completion.
    finish: Notify,
    /// Flips to `true` once the worker has exited.
    done_rx: watch::Receiver<bool>,
    faults_tx: Option<mpsc::Sender<JobFault>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().expect("fifo queue state poisoned")
    }
}

/// Runs jobs one at a time, in the order they were scheduled.
///
/// Dropping the scheduler without calling [`stop`](Self::stop) cancels the
/// shared token; the worker then drains the queue in the background.
pub struct FifoScheduler {
    shared: Arc<Shared>,
}

impl FifoScheduler {
    /// Create a scheduler and spawn its worker on the current Tokio runtime.
    ///
    /// Pass `Some(tx)` to receive a [`JobFault`] for every job that panics.
    /// The sender is non-blocking (`try_send`) so the worker is never stalled.
    pub fn new(
        config: &SchedulerConfig,
        faults_tx: Option<mpsc::Sender<JobFault>>,
    ) -> Result<Self> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let (resume_tx, resume_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                running: false,
                scheduled: 0,
                finished: 0,
                worker: WorkerState::Idle,
                cancel: Some(cancel.clone()),
            }),
            resume_tx,
            finish: Notify::new(),
            done_rx,
            faults_tx,
        });

        let worker = Worker {
            shared: Arc::clone(&shared),
            resume_rx,
            cancel,
            done_tx,
        };
        runtime.spawn(worker.run());

        Ok(Self { shared })
    }

    /// Scheduler with default config and no fault channel.
    pub fn start() -> Result<Self> {
        Self::new(&SchedulerConfig::default(), None)
    }

    /// Queue `job` behind every job scheduled before it.
    ///
    /// Fails with [`SchedulerError::Stopped`] once `stop` has begun; the job is
    /// then dropped without running.
    pub fn schedule<J: Job>(&self, job: J) -> Result<()> {
        self.enqueue(Box::new(job))
    }

    fn enqueue(&self, job: BoxJob) -> Result<()> {
        let mut state = self.shared.lock();
        if state.cancel.is_none() {
            return Err(SchedulerError::Stopped);
        }

        if state.pending_len() == 0 {
            // A full slot already guarantees the worker re-reads the queue.
            let _ = self.shared.resume_tx.try_send(());
        }
        state.pending.push_back(job);
        Ok(())
    }

    /// Jobs not yet finished, counting the one currently running.
    pub fn pending(&self) -> usize {
        self.shared.lock().pending_len()
    }

    /// Jobs handed to the worker so far, including drained ones.
    pub fn scheduled(&self) -> usize {
        self.shared.lock().scheduled
    }

    /// Jobs whose execution has returned, normally or by panic.
    pub fn finished(&self) -> usize {
        self.shared.lock().finished
    }

    /// True once `stop` has begun or the scheduler was dropped.
    pub fn is_stopped(&self) -> bool {
        self.shared.lock().cancel.is_none()
    }

    /// All counters and the worker state, read under one lock.
    pub fn stats(&self) -> SchedulerStats {
        let state = self.shared.lock();
        SchedulerStats {
            pending: state.pending_len(),
            scheduled: state.scheduled,
            finished: state.finished,
            stopped: state.cancel.is_none(),
            worker: state.worker,
        }
    }

    /// Wait until at least `n` jobs have finished and nothing is pending.
    ///
    /// Jobs scheduled after the n-th keep this waiting until they finish too.
    pub async fn wait_finish(&self, n: usize) {
        loop {
            let notified = self.shared.finish.notified();
            tokio::pin!(notified);
            // Register before checking so a completion between the check and
            // the await is not missed.
            notified.as_mut().enable();

            let settled = { self.shared.lock().is_settled(n) };
            if settled {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting jobs, cancel the shared token and wait until the worker
    /// has drained the queue and exited.
    ///
    /// A job already running is not interrupted. Calling `stop` again is a
    /// no-op that waits for the same exit.
    pub async fn stop(&self) {
        let first = {
            let mut state = self.shared.lock();
            match state.cancel.take() {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            }
        };
        if first {
            info!(scheduler = %self.shared.name, "stopping scheduler");
        } else {
            debug!(scheduler = %self.shared.name, "stop called on stopped scheduler");
        }

        let mut done = self.shared.done_rx.clone();
        // Err means the sender is gone, which only happens after the worker exits.
        let _ = done.wait_for(|exited| *exited).await;
    }
}

impl Drop for FifoScheduler {
    fn drop(&mut self) {
        let token = self.shared.lock().cancel.take();
        if let Some(token) = token {
            debug!(scheduler = %self.shared.name, "scheduler dropped without stop; cancelling");
            token.cancel();
        }
    }
}

#[async_trait]
impl Scheduler for FifoScheduler {
    fn schedule(&self, job: BoxJob) -> Result<()> {
        self.enqueue(job)
    }

    fn pending(&self) -> usize {
        FifoScheduler::pending(self)
    }

    fn scheduled(&self) -> usize {
        FifoScheduler::scheduled(self)
    }

    fn finished(&self) -> usize {
        FifoScheduler::finished(self)
    }

    async fn wait_finish(&self, n: usize) {
        FifoScheduler::wait_finish(self, n).await
    }

    async fn stop(&self) {
        FifoScheduler::stop(self).await
    }
}

// --- worker --------------------------------------------------------------

struct Worker {
    shared: Arc<Shared>,
    resume_rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
    done_tx: watch::Sender<bool>,
}

impl Worker {
    /// Main loop. Runs until cancelled while idle, then drains and exits.
    async fn run(mut self) {
        info!(scheduler = %self.shared.name, "fifo worker started");

        loop {
            let next = {
                let mut state = self.shared.lock();
                match state.pending.pop_front() {
                    Some(job) => {
                        state.running = true;
                        state.scheduled += 1;
                        state.worker = WorkerState::Executing;
                        Some((job, state.scheduled))
                    }
                    None => {
                        state.worker = WorkerState::Idle;
                        None
                    }
                }
            };

            if let Some((job, seq)) = next {
                self.execute(job, seq, false).await;
                let mut state = self.shared.lock();
                state.finished += 1;
                state.running = false;
                self.shared.finish.notify_waiters();
                continue;
            }

            let cancelled = tokio::select! {
                _ = self.resume_rx.recv() => false,
                _ = self.cancel.cancelled() => true,
            };
            if cancelled {
                self.drain().await;
                break;
            }
        }

        self.resume_rx.close();
        self.shared.lock().worker = WorkerState::Stopped;
        // Wake any waiter so it can observe the final counters.
        self.shared.finish.notify_waiters();
        let _ = self.done_tx.send(true);
        info!(scheduler = %self.shared.name, "fifo worker exited");
    }

    /// Take everything still queued and run it, in order, with the cancelled token.
    async fn drain(&self) {
        let jobs: Vec<BoxJob> = {
            let mut state = self.shared.lock();
            state.worker = WorkerState::Draining;
            state.pending.drain(..).collect()
        };
        if jobs.is_empty() {
            return;
        }
        info!(scheduler = %self.shared.name, count = jobs.len(), "draining pending jobs");

        for job in jobs {
            let seq = {
                let mut state = self.shared.lock();
                state.scheduled += 1;
                state.scheduled
            };
            self.execute(job, seq, true).await;
            let mut state = self.shared.lock();
            state.finished += 1;
            self.shared.finish.notify_waiters();
        }
    }

    /// Run one job to completion, catching a panic so the loop survives it.
    async fn execute(&self, job: BoxJob, seq: usize, drained: bool) {
        debug!(scheduler = %self.shared.name, seq, drained, "running job");

        let cancel = self.cancel.clone();
        // The call to `run` happens inside the future so a panic while building
        // the job's future is caught as well.
        let outcome = AssertUnwindSafe(async move { job.run(cancel).await })
            .catch_unwind()
            .await;

        if let Err(payload) = outcome {
            let message = panic_message(payload.as_ref());
            error!(
                scheduler = %self.shared.name,
                seq,
                drained,
                %message,
                "job panicked; continuing with next job"
            );
            self.report(JobFault {
                scheduler: self.shared.name.clone(),
                seq,
                drained,
                message,
                at: Utc::now(),
            });
        }
    }

    fn report(&self, fault: JobFault) {
        if let Some(ref tx) = self.shared.faults_tx {
            let seq = fault.seq;
            // try_send never blocks the worker; a full or closed channel loses the report.
            if tx.try_send(fault).is_err() {
                warn!(scheduler = %self.shared.name, seq, "fault channel full or closed; report dropped");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn runs_jobs_in_submission_order() {
        let s = FifoScheduler::start().unwrap();
        let next = Arc::new(AtomicUsize::new(0));

        for i in 0..100 {
            let next = Arc::clone(&next);
            s.schedule(move |_cancel: CancellationToken| async move {
                assert_eq!(next.load(Ordering::SeqCst), i, "job#{i} ran out of order");
                next.store(i + 1, Ordering::SeqCst);
            })
            .unwrap();
        }

        s.wait_finish(100).await;
        assert_eq!(s.scheduled(), 100);
        assert_eq!(s.finished(), 100);
        assert_eq!(s.pending(), 0);
        assert_eq!(next.load(Ordering::SeqCst), 100);
        s.stop().await;
    }

    #[tokio::test]
    async fn stop_with_no_jobs_returns() {
        let s = FifoScheduler::start().unwrap();
        s.stop().await;
        let stats = s.stats();
        assert_eq!(stats.scheduled, 0);
        assert_eq!(stats.finished, 0);
        assert!(stats.stopped);
        assert_eq!(stats.worker, WorkerState::Stopped);
    }

    #[tokio::test]
    async fn schedule_after_stop_is_rejected() {
        let s = FifoScheduler::start().unwrap();
        s.stop().await;

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let err = s
            .schedule(move |_cancel: CancellationToken| async move {
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap_err();

        assert_eq!(err, SchedulerError::Stopped);
        assert_eq!(s.pending(), 0);
        tokio::task::yield_now().await;
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_twice_is_noop() {
        let s = FifoScheduler::start().unwrap();
        s.stop().await;
        s.stop().await;
        assert!(s.is_stopped());
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_job() {
        let s = FifoScheduler::start().unwrap();
        let completed = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = oneshot::channel();

        let flag = Arc::clone(&completed);
        s.schedule(move |_cancel: CancellationToken| async move {
            let _ = started_tx.send(());
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        started_rx.await.unwrap();
        s.stop().await;

        assert!(completed.load(Ordering::SeqCst));
        assert_eq!(s.finished(), 1);
        assert_eq!(s.pending(), 0);
    }

    #[tokio::test]
    async fn pending_counts_running_job() {
        let s = FifoScheduler::start().unwrap();
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        s.schedule(move |_cancel: CancellationToken| async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
        })
        .unwrap();
        s.schedule(|_cancel: CancellationToken| async {}).unwrap();

        started_rx.await.unwrap();
        assert_eq!(s.pending(), 2);
        assert_eq!(s.scheduled(), 1);
        assert_eq!(s.finished(), 0);
        assert_eq!(s.stats().worker, WorkerState::Executing);

        release_tx.send(()).unwrap();
        s.wait_finish(2).await;
        assert_eq!(s.pending(), 0);
        s.stop().await;
    }

    #[tokio::test]
    async fn panicking_job_is_isolated_and_reported() {
        let (faults_tx, mut faults_rx) = mpsc::channel(4);
        let config = SchedulerConfig {
            name: "faulty".to_string(),
            ..SchedulerConfig::default()
        };
        let s = FifoScheduler::new(&config, Some(faults_tx)).unwrap();
        let after = Arc::new(AtomicBool::new(false));

        s.schedule(|_cancel: CancellationToken| async { panic!("boom") })
            .unwrap();
        let flag = Arc::clone(&after);
        s.schedule(move |_cancel: CancellationToken| async move {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        s.wait_finish(2).await;
        assert!(after.load(Ordering::SeqCst));
        assert_eq!(s.finished(), 2);

        let fault = faults_rx.recv().await.unwrap();
        assert_eq!(fault.scheduler, "faulty");
        assert_eq!(fault.seq, 1);
        assert!(!fault.drained);
        assert_eq!(fault.message, "boom");
        s.stop().await;
    }

    #[tokio::test]
    async fn full_fault_channel_does_not_stall_worker() {
        let (faults_tx, _faults_rx) = mpsc::channel(1);
        let s = FifoScheduler::new(&SchedulerConfig::default(), Some(faults_tx)).unwrap();

        for _ in 0..3 {
            s.schedule(|_cancel: CancellationToken| async { panic!("again") })
                .unwrap();
        }
        s.wait_finish(3).await;
        assert_eq!(s.finished(), 3);
        s.stop().await;
    }

    #[test]
    fn new_outside_runtime_fails() {
        let err = FifoScheduler::start().err().unwrap();
        assert_eq!(err, SchedulerError::NoRuntime);
    }

    #[test]
    fn panic_message_handles_payload_kinds() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(s.as_ref()), "owned");
        let s: Box<dyn Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(s.as_ref()), "non-string panic payload");
    }
}
