use std::{
    sync::{Arc, Mutex, mpsc},
    thread,
};

use tracing::error;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of worker threads pulling jobs off a shared queue.
///
/// No crate in this workspace's dependency stack provides a thread pool, so
/// this is the ordinary `mpsc` + `Arc<Mutex<Receiver>>` pattern: one channel,
/// N consumers.
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Option<mpsc::Sender<Job>>,
}

struct Worker {
    handle: Option<thread::JoinHandle<()>>,
}

impl ThreadPool {
    /// Panics if `size` is zero — a pool with no workers can never make
    /// progress, which is a caller bug, not a runtime condition.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "thread pool size must be at least 1");
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size)
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let handle = thread::Builder::new()
                    .name(format!("netframe-worker-{id}"))
                    .spawn(move || {
                        loop {
                            let job = { receiver.lock().unwrap().recv() };
                            match job {
                                Ok(job) => job(),
                                Err(_) => break,
                            }
                        }
                    })
                    .expect("failed to spawn pool worker thread");
                Worker { handle: Some(handle) }
            })
            .collect();

        Self { workers, sender: Some(sender) }
    }

    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(sender) = &self.sender {
            if sender.send(Box::new(job)).is_err() {
                error!("thread pool queue is gone, dropping job");
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn every_submitted_job_runs_exactly_once() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }
}
