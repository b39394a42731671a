use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

/// Unit of work run by a [`Worker`].
pub type Task = Box<dyn FnOnce() + Send>;

/// Counter of running tasks that can be waited on until it drops to zero.
#[derive(Debug, Default)]
pub struct WaitGroup {
    count: Mutex<usize>,
    zero: Condvar,
}

impl WaitGroup {
    /// Creates an idle group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task.
    pub fn add(&self) {
        *self.count.lock() += 1;
    }

    /// Marks a task as finished.
    pub fn done(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    /// Blocks until every registered task is finished.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.zero.wait(&mut count);
        }
    }

    /// Number of running tasks.
    pub fn running(&self) -> usize {
        *self.count.lock()
    }
}

/// Single background thread executing queued tasks in order.
#[derive(Debug)]
pub struct Worker {
    queue: Option<Sender<Task>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns the worker thread with a queue of `capacity` tasks.
    pub fn spawn(name: &str, capacity: usize) -> std::io::Result<Self> {
        let (queue, tasks) = bounded::<Task>(capacity.max(1));
        let handle = std::thread::Builder::new().name(name.to_string()).spawn(move || {
            for task in tasks {
                task();
            }
        })?;
        Ok(Self { queue: Some(queue), handle: Some(handle) })
    }

    /// Queues `task`, blocking while the queue is full.
    ///
    /// A task that cannot be queued because the worker is gone is handed back.
    pub fn enqueue(&self, task: Task) -> Result<(), Task> {
        match &self.queue {
            Some(queue) => queue.send(task).map_err(|err| err.into_inner()),
            None => Err(task),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.queue.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(target: "gossip::worker", "worker thread panicked");
            } else {
                debug!(target: "gossip::worker", "worker stopped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn test_tasks_run_in_order_and_wait_group_drains() {
        let wg = Arc::new(WaitGroup::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let worker = Worker::spawn("test-worker", 2).unwrap();
        for i in 0..5 {
            wg.add();
            let (wg, seen) = (wg.clone(), seen.clone());
            worker
                .enqueue(Box::new(move || {
                    seen.lock().push(i);
                    wg.done();
                }))
                .map_err(|_| ())
                .unwrap();
        }
        wg.wait();
        assert_eq!(wg.running(), 0);
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_drop_joins_pending_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let worker = Worker::spawn("test-worker", 4).unwrap();
        for _ in 0..3 {
            let counter = counter.clone();
            worker
                .enqueue(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .map_err(|_| ())
                .unwrap();
        }
        drop(worker);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
