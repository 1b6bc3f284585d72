//! Elastic worker pool for database requests.
//!
//! Requests run on plain OS threads because `get_when` may block its thread
//! for an unbounded time. The pool therefore never makes a job wait for a
//! busy thread: if every thread is in use when a job arrives, a new one is
//! spawned. Threads that sit idle while fewer than half of the pool is busy
//! are retired, half of the pool at a time, at most once per shrink interval.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Counters and queue protected by the pool mutex.
struct State {
    queue: VecDeque<Job>,
    /// Threads that are not marked for retirement.
    threads: usize,
    /// Queued plus running jobs.
    busy: usize,
    /// Retirements still to be picked up by idle threads.
    retiring: usize,
    last_shrink: Instant,
    next_thread_id: usize,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    job_ready: Condvar,
    shrink_interval: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retires half of the threads if fewer than half were busy since the
    /// last shrink.
    fn shrink_if_needed(&self, state: &mut State) {
        let half = state.threads / 2;
        if state.last_shrink.elapsed() >= self.shrink_interval && state.busy < half {
            state.threads -= half;
            state.retiring += half;
            state.last_shrink = Instant::now();
            debug!(retired = half, remaining = state.threads, "Shrinking thread pool");
            self.job_ready.notify_all();
        }
    }
}

/// A thread pool that grows on demand and shrinks when idle.
pub struct ThreadPool {
    shared: Arc<Shared>,
}

impl ThreadPool {
    /// Creates an empty pool. Threads are spawned as jobs arrive.
    #[must_use]
    pub fn new(shrink_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    threads: 0,
                    busy: 0,
                    retiring: 0,
                    last_shrink: Instant::now(),
                    next_thread_id: 0,
                    shutdown: false,
                }),
                job_ready: Condvar::new(),
                shrink_interval,
            }),
        }
    }

    /// Queues a job, spawning a thread first if every thread is in use.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool was shut down, or if it has no thread
    /// and none could be spawned.
    pub fn submit<F>(&self, job: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.lock();
        if state.shutdown {
            return Err(io::Error::other("thread pool is shut down"));
        }

        if state.busy >= state.threads {
            let id = state.next_thread_id;
            let shared = Arc::clone(&self.shared);
            match thread::Builder::new()
                .name(format!("kvdb-worker-{id}"))
                .spawn(move || worker_loop(&shared))
            {
                Ok(_) => {
                    state.next_thread_id += 1;
                    state.threads += 1;
                }
                Err(e) if state.threads + state.retiring == 0 => return Err(e),
                Err(e) => warn!(error = %e, "Failed to grow thread pool"),
            }
        }

        state.queue.push_back(Box::new(job));
        state.busy += 1;
        drop(state);
        self.shared.job_ready.notify_one();
        Ok(())
    }

    /// Number of threads, excluding threads marked for retirement.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.shared.lock().threads
    }

    /// Number of queued or running jobs.
    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.shared.lock().busy
    }

    /// Stops accepting jobs. Threads finish the queued jobs and exit.
    pub fn shutdown(&self) {
        self.shared.lock().shutdown = true;
        self.shared.job_ready.notify_all();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("ThreadPool")
            .field("threads", &state.threads)
            .field("busy", &state.busy)
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl fmt::Display for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadPool(threads={})", self.thread_count())
    }
}

fn worker_loop(shared: &Shared) {
    let mut state = shared.lock();
    loop {
        if let Some(job) = state.queue.pop_front() {
            drop(state);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                error!(panic = panic_message(payload.as_ref()), "Job panicked");
            }
            state = shared.lock();
            state.busy -= 1;
            continue;
        }

        if state.retiring > 0 {
            state.retiring -= 1;
            return;
        }
        if state.shutdown {
            state.threads = state.threads.saturating_sub(1);
            return;
        }

        let (guard, timeout) = shared
            .job_ready
            .wait_timeout(state, shared.shrink_interval)
            .unwrap_or_else(PoisonError::into_inner);
        state = guard;
        if timeout.timed_out() {
            shared.shrink_if_needed(&mut state);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn runs_submitted_jobs() {
        let pool = ThreadPool::new(Duration::from_secs(30));
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            pool.submit(move || tx.send(i).unwrap()).unwrap();
        }

        let mut received: Vec<i32> = (0..10).map(|_| rx.recv().unwrap()).collect();
        received.sort_unstable();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn grows_when_all_threads_block() {
        let pool = ThreadPool::new(Duration::from_secs(30));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));
        let (done_tx, done_rx) = mpsc::channel();

        for _ in 0..4 {
            let release_rx = Arc::clone(&release_rx);
            let done_tx = done_tx.clone();
            pool.submit(move || {
                release_rx.lock().unwrap().recv().unwrap();
                done_tx.send(()).unwrap();
            })
            .unwrap();
        }
        assert_eq!(pool.thread_count(), 4);

        // A fifth job still runs while the other four block.
        let (tx, rx) = mpsc::channel();
        pool.submit(move || tx.send(5).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 5);

        for _ in 0..4 {
            release_tx.send(()).unwrap();
        }
        for _ in 0..4 {
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
    }

    #[test]
    fn survives_panicking_job() {
        let pool = ThreadPool::new(Duration::from_secs(30));
        pool.submit(|| panic!("boom")).unwrap();

        let (tx, rx) = mpsc::channel();
        pool.submit(move || tx.send(()).unwrap()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(pool.busy_count(), 0);
    }

    #[test]
    fn shrinks_when_idle() {
        let pool = ThreadPool::new(Duration::from_millis(50));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));
        for _ in 0..4 {
            let release_rx = Arc::clone(&release_rx);
            pool.submit(move || {
                release_rx.lock().unwrap().recv().unwrap();
            })
            .unwrap();
        }
        assert_eq!(pool.thread_count(), 4);
        for _ in 0..4 {
            release_tx.send(()).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.thread_count() == 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(pool.thread_count() < 4);
    }

    #[test]
    fn rejects_jobs_after_shutdown() {
        let pool = ThreadPool::new(Duration::from_secs(30));
        pool.shutdown();
        assert!(pool.submit(|| {}).is_err());
    }

    #[test]
    fn shutdown_finishes_pending_jobs() {
        let pool = ThreadPool::new(Duration::from_secs(30));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));
        let (done_tx, done_rx) = mpsc::channel();

        // The first job holds the gate; the rest wait for it, some of them
        // still in the queue when the pool shuts down.
        for i in 0..6 {
            let release_rx = Arc::clone(&release_rx);
            let done_tx = done_tx.clone();
            pool.submit(move || {
                if i == 0 {
                    release_rx.lock().unwrap().recv().unwrap();
                }
                done_tx.send(i).unwrap();
            })
            .unwrap();
        }
        drop(done_tx);

        pool.shutdown();
        assert!(pool.submit(|| {}).is_err());
        release_tx.send(()).unwrap();

        let mut finished: Vec<i32> = (0..6)
            .map(|_| done_rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        finished.sort_unstable();
        assert_eq!(finished, (0..6).collect::<Vec<_>>());

        let deadline = Instant::now() + Duration::from_secs(5);
        while (pool.thread_count() > 0 || pool.busy_count() > 0) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.busy_count(), 0);
        assert_eq!(pool.thread_count(), 0);
    }

    #[test]
    fn display_shows_thread_count() {
        let pool = ThreadPool::new(Duration::from_secs(30));
        assert_eq!(pool.to_string(), "ThreadPool(threads=0)");
    }
}
