//! Bounded worker pool over PODs, and interrupt handling.
//!
//! An interrupt first stops new submissions. PODs already running get a
//! grace period, after which every [`Terminate`] handle fires and the
//! runner kills its driver.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::record::RunRecord;

/// Shared stop/terminate state for one framework run.
#[derive(Debug)]
pub struct Shutdown {
    stop: watch::Sender<bool>,
    terminate: watch::Sender<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            stop: watch::channel(false).0,
            terminate: watch::channel(false).0,
        }
    }

    /// No further PODs are started.
    pub fn stop_submissions(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stopping(&self) -> bool {
        *self.stop.borrow()
    }

    /// Stop submissions and kill running drivers immediately.
    pub fn terminate_now(&self) {
        self.stop.send_replace(true);
        self.terminate.send_replace(true);
    }

    pub fn terminate_handle(&self) -> Terminate {
        Terminate(self.terminate.subscribe())
    }

    async fn stopped(&self) {
        let mut rx = self.stop.subscribe();
        if rx.wait_for(|stopping| *stopping).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Stop submissions now and terminate running PODs after `grace`.
    pub fn interrupt(self: &Arc<Self>, grace: Duration) {
        self.stop_submissions();
        let shutdown = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            warn!("grace period of {}s elapsed, terminating running PODs", grace.as_secs());
            shutdown.terminate.send_replace(true);
        });
    }

    /// Turn the first SIGINT into [`Shutdown::interrupt`].
    pub fn listen_for_ctrl_c(self: &Arc<Self>, grace: Duration) -> JoinHandle<()> {
        let shutdown = Arc::clone(self);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!(
                        "interrupt received, waiting up to {}s for running PODs",
                        grace.as_secs()
                    );
                    shutdown.interrupt(grace);
                }
                Err(e) => error!("failed to listen for interrupt: {e}"),
            }
        })
    }
}

/// Fires once running PODs must be killed.
#[derive(Debug, Clone)]
pub struct Terminate(watch::Receiver<bool>);

impl Terminate {
    /// A handle that never fires.
    pub fn never() -> Self {
        Terminate(watch::channel(false).1)
    }

    pub async fn wait(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub struct Scheduler {
    workers: usize,
}

impl Scheduler {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Run `work` over `jobs` with at most `workers` in flight.
    ///
    /// The result has one slot per job in input order; a slot is `None` when
    /// the job was never started because of an interrupt.
    pub async fn run<J, F, Fut>(&self, jobs: Vec<J>, shutdown: &Shutdown, work: F) -> Vec<Option<RunRecord>>
    where
        J: Send + 'static,
        F: Fn(J, Terminate) -> Fut,
        Fut: Future<Output = RunRecord> + Send + 'static,
    {
        let total = jobs.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut results: Vec<Option<RunRecord>> = vec![None; total];

        for (index, job) in jobs.into_iter().enumerate() {
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => permit,
                _ = shutdown.stopped() => break,
            };
            let Ok(permit) = permit else {
                break;
            };
            if shutdown.is_stopping() {
                break;
            }
            let task = work(job, shutdown.terminate_handle());
            tasks.spawn(async move {
                let _permit = permit;
                (index, task.await)
            });
        }
        if shutdown.is_stopping() {
            info!(
                submitted = tasks.len(),
                total, "submissions stopped, waiting for running PODs"
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, record)) => results[index] = Some(record),
                Err(e) => error!("POD task failed: {e}"),
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RunStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn never_exceeds_the_worker_count() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<String> = (0..6).map(|i| format!("pod{i}")).collect();
        let shutdown = Shutdown::new();

        let results = Scheduler::new(2)
            .run(jobs, &shutdown, |pod, _terminate| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    RunRecord::new(&pod, "case", RunStatus::Succeeded)
                }
            })
            .await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
        let pods: Vec<String> = results.into_iter().map(|r| r.unwrap().pod).collect();
        assert_eq!(pods, ["pod0", "pod1", "pod2", "pod3", "pod4", "pod5"]);
    }

    #[tokio::test]
    async fn interrupt_stops_submissions_then_terminates() {
        let shutdown = Arc::new(Shutdown::new());
        {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                shutdown.interrupt(Duration::from_millis(50));
            });
        }

        let results = Scheduler::new(1)
            .run(vec!["a", "b", "c"], &shutdown, |pod, mut terminate| async move {
                terminate.wait().await;
                RunRecord::new(pod, "case", RunStatus::Cancelled)
            })
            .await;

        assert_eq!(results[0].as_ref().map(|r| r.status), Some(RunStatus::Cancelled));
        assert!(results[1].is_none());
        assert!(results[2].is_none());
    }

    #[tokio::test]
    async fn never_handle_does_not_fire() {
        let mut terminate = Terminate::never();
        let fired = tokio::time::timeout(Duration::from_millis(20), terminate.wait()).await;
        assert!(fired.is_err());
    }
}
