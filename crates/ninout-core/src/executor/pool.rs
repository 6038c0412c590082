//! Fixed-size worker pool with a completion channel.

use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};

use ninout_dag::StepValue;

pub(crate) type Job = Box<dyn FnOnce() -> Completion + Send + 'static>;

/// What a worker hands back to the scheduler.
pub(crate) struct Completion {
    pub name: String,
    pub outcome: WorkerOutcome,
}

pub(crate) struct WorkerOutcome {
    /// The payload on success, the error text on failure.
    pub payload: Result<StepValue, String>,
    pub output: String,
    pub duration_s: f64,
    pub input_lines: u64,
    pub output_lines: u64,
}

/// Worker threads draining a shared job queue. Submission never blocks;
/// queued jobs wait for a free worker, which matches the pool contract the
/// scheduler expects (wait happens on the completion side).
pub(crate) struct WorkerPool {
    jobs: Option<Sender<Job>>,
    completions: Receiver<Completion>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let (jobs_tx, jobs_rx) = unbounded::<Job>();
        let (done_tx, done_rx) = unbounded::<Completion>();
        let workers = (0..size.max(1))
            .map(|idx| {
                let jobs_rx = jobs_rx.clone();
                let done_tx = done_tx.clone();
                std::thread::Builder::new()
                    .name(format!("ninout-worker-{idx}"))
                    .spawn(move || {
                        for job in jobs_rx.iter() {
                            if done_tx.send(job()).is_err() {
                                break;
                            }
                        }
                    })
                    .expect("spawn worker thread")
            })
            .collect();
        Self {
            jobs: Some(jobs_tx),
            completions: done_rx,
            workers,
        }
    }

    pub fn submit(&self, job: Job) {
        if let Some(jobs) = &self.jobs {
            let _ = jobs.send(job);
        }
    }

    /// Block until any outstanding worker finishes.
    pub fn recv(&self) -> Option<Completion> {
        self.completions.recv().ok()
    }

    /// Drain further completions without blocking.
    pub fn try_recv(&self) -> Option<Completion> {
        self.completions.try_recv().ok()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the job queue lets workers drain and exit.
        self.jobs.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
