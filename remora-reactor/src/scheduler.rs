use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use crate::executor::Executor;

// Owns a set of executors and their event threads, and hands executors out
// round-robin to new connections.
//
pub struct Scheduler {
    executors: Vec<Executor>,
    threads: Vec<JoinHandle<()>>,
    next_executor: AtomicUsize,
}

impl Scheduler {
    /// Starts `executor_count` reactors (at least one), each blocking in the
    /// kernel for at most `poll_timeout_ms` per turn.
    ///
    pub fn new(executor_count: usize, poll_timeout_ms: i32) -> io::Result<Self> {
        let count = executor_count.max(1);
        let mut executors = Vec::with_capacity(count);
        let mut threads = Vec::with_capacity(count);

        for _ in 0..count {
            let (executor, thread) = Executor::start(poll_timeout_ms)?;
            executors.push(executor);
            threads.push(thread);
        }

        Ok(Scheduler {
            executors,
            threads,
            next_executor: AtomicUsize::new(0),
        })
    }

    /// Picks an executor for a new connection.
    ///
    pub fn alloc_executor(&self) -> Executor {
        let index = self.next_executor.fetch_add(1, Ordering::Relaxed) % self.executors.len();
        self.executors[index].clone()
    }

    pub fn executor_count(&self) -> usize {
        self.executors.len()
    }

    /// Stops every executor and joins the event threads.
    ///
    pub fn stop(&mut self) {
        for executor in &self.executors {
            executor.stop();
        }
        for thread in std::mem::take(&mut self.threads) {
            let _ = thread.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
