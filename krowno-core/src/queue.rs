use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A unit of work. Typed closures replace opaque string payloads; the
/// queue itself stays payload-agnostic.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    jobs: VecDeque<Job>,
    active: usize,
    shutdown: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    cond: Condvar,
}

/// Bounded pool of worker threads draining a FIFO. Dequeue order is the
/// enqueue order; completion order across workers is unspecified.
/// Workers hold the lock only while dequeuing.
pub struct WorkQueue {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkQueue {
    pub fn new(workers: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                active: 0,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });

        let handles = (0..workers.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker_loop(&shared))
            })
            .collect();

        Self {
            shared,
            workers: handles,
        }
    }

    /// Append a job and wake one worker. Returns `false` once the queue
    /// has been stopped.
    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) -> bool {
        let mut state = lock(&self.shared.state);
        if state.shutdown {
            return false;
        }
        state.jobs.push_back(Box::new(job));
        drop(state);
        self.shared.cond.notify_one();
        true
    }

    /// Block until the queue is empty and no worker is mid-job.
    pub fn wait_for_completion(&self) {
        loop {
            {
                let state = lock(&self.shared.state);
                if state.jobs.is_empty() && state.active == 0 {
                    return;
                }
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Flag shutdown, wake everyone, and join the workers. Jobs still
    /// queued are drained before the workers exit.
    pub fn stop(&mut self) {
        {
            let mut state = lock(&self.shared.state);
            state.shutdown = true;
        }
        self.shared.cond.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut state = lock(&shared.state);
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    state.active += 1;
                    break job;
                }
                if state.shutdown {
                    return;
                }
                state = match shared.cond.wait(state) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        };

        job();

        let mut state = lock(&shared.state);
        state.active -= 1;
    }
}

fn lock(m: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    match m.lock() {
        Ok(guard) => guard,
        // a panicking job poisons nothing we depend on; keep going
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn all_jobs_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut queue = WorkQueue::new(4);
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            queue.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        queue.wait_for_completion();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        queue.stop();
    }

    #[test]
    fn single_worker_preserves_fifo_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut queue = WorkQueue::new(1);
        for i in 0..50 {
            let seen = Arc::clone(&seen);
            queue.enqueue(move || {
                seen.lock().unwrap().push(i);
            });
        }
        queue.wait_for_completion();
        queue.stop();
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn stop_drains_queued_jobs_and_rejects_new_ones() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut queue = WorkQueue::new(2);
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            assert!(queue.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        queue.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert!(!queue.enqueue(|| {}));
    }

    #[test]
    fn wait_for_completion_on_empty_queue_returns() {
        let queue = WorkQueue::new(2);
        queue.wait_for_completion();
    }
}
