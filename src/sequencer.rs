use std::{future::Future, pin::Pin, time::Duration};

use log::{trace, warn};
use tokio::{
    sync::{mpsc, oneshot},
    time,
};

use crate::error::RconError;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// FIFO queue that runs one job at a time, in submission order. The worker is
/// spawned on construction and stops once the sequencer is dropped and the
/// queue has drained, so it must be created inside a tokio runtime.
///
/// Every job gets a fixed time budget, measured from the moment it starts
/// running. A job that overruns it is dropped mid-flight and its caller gets
/// [RconError::RequestTimeout]; the queue then moves on to the next job.
pub struct Sequencer {
    jobs: mpsc::UnboundedSender<Job>,
    timeout: Duration,
}

impl Sequencer {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

    pub fn new(timeout: Duration) -> Self {
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            while let Some(job) = queue.recv().await {
                job.await;
            }
            trace!("request queue closed, sequencer stopping");
        });

        Sequencer { jobs, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Queues `task` behind everything submitted earlier and waits for its
    /// result. The job is queued on the first poll of the returned future.
    pub async fn enqueue<F, T>(&self, task: F) -> Result<T, RconError>
    where
        F: Future<Output = Result<T, RconError>> + Send + 'static,
        T: Send + 'static,
    {
        let (done, result) = oneshot::channel();
        let limit = self.timeout;

        let job: Job = Box::pin(async move {
            let outcome = match time::timeout(limit, task).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("queued request exceeded {:?}, aborting it", limit);
                    Err(RconError::RequestTimeout(limit))
                }
            };
            // the caller may have stopped waiting; nothing to do about it
            let _ = done.send(outcome);
        });

        self.jobs.send(job).map_err(|_| RconError::QueueClosed)?;
        result.await.map_err(|_| RconError::QueueClosed)?
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    #[tokio::test]
    async fn runs_jobs_in_submission_order() {
        let sequencer = Sequencer::new(Duration::from_secs(1));
        let log = Arc::new(Mutex::new(Vec::new()));

        let slow_log = Arc::clone(&log);
        let slow = sequencer.enqueue(async move {
            time::sleep(Duration::from_millis(50)).await;
            slow_log.lock().unwrap().push("slow");
            Ok("slow")
        });
        let fast_log = Arc::clone(&log);
        let fast = sequencer.enqueue(async move {
            fast_log.lock().unwrap().push("fast");
            Ok("fast")
        });

        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(slow.unwrap(), "slow");
        assert_eq!(fast.unwrap(), "fast");
        assert_eq!(*log.lock().unwrap(), vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn never_runs_two_jobs_at_once() {
        let sequencer = Sequencer::new(Duration::from_secs(1));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<_> = (0..5)
            .map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                sequencer.enqueue(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                })
            })
            .collect();

        let finished: Vec<_> = join_all(jobs)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(finished, vec![0, 1, 2, 3, 4]);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timed_out_job_is_aborted_and_queue_continues() {
        let sequencer = Sequencer::new(Duration::from_millis(20));
        let finished = Arc::new(AtomicUsize::new(0));

        let stuck_finished = Arc::clone(&finished);
        let stuck = sequencer.enqueue(async move {
            time::sleep(Duration::from_secs(5)).await;
            stuck_finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let next = sequencer.enqueue(async { Ok(42) });

        let (stuck, next) = tokio::join!(stuck, next);
        assert!(matches!(stuck, Err(RconError::RequestTimeout(limit)) if limit == Duration::from_millis(20)));
        assert_eq!(next.unwrap(), 42);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn job_errors_reach_the_caller() {
        let sequencer = Sequencer::default();
        assert_eq!(sequencer.timeout(), Duration::from_millis(500));

        let result: Result<(), _> = sequencer.enqueue(async { Err(RconError::NotWritable) }).await;
        assert!(matches!(result, Err(RconError::NotWritable)));
    }
}
