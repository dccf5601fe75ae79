//! A scheduler backed by a dedicated thread.
//!
//! Tasks travel over an mpsc channel and run one at a time, in the order they
//! were scheduled. A panicking task is logged and the thread moves on to the
//! next one. The thread exits once every handle to the scheduler (and thereby
//! the sending half of the channel) is gone.
use std::io;
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crate::scheduler::{run_task, Scheduler, Task};

/// Configuration for a [`WorkerScheduler`].
#[derive(Debug, Clone, Default)]
pub struct WorkerBuilder {
    name: Option<String>,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name of the worker thread.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// Spawns the worker thread.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::{Promise, WorkerBuilder};
    /// use futures::executor::block_on;
    ///
    /// let worker = WorkerBuilder::new().name("promises").spawn().unwrap();
    /// let promise = Promise::<u32, String>::resolved(worker, 20).then(|v| Ok(v + 1));
    /// assert_eq!(block_on(promise), Ok(21));
    /// ```
    pub fn spawn(self) -> io::Result<Arc<WorkerScheduler>> {
        let (sender, receiver) = channel::<Task>();
        let mut builder = thread::Builder::new();
        if let Some(name) = self.name.clone() {
            builder = builder.name(name);
        }
        let label = self.name.clone().unwrap_or_else(|| "unnamed".to_string());
        builder.spawn(move || {
            log::trace!("scheduler worker '{label}' starting");
            for task in receiver {
                if !run_task(task) {
                    log::debug!("scheduler worker '{label}' recovered from a panicking task");
                }
            }
            log::trace!("scheduler worker '{label}' exiting");
        })?;

        Ok(Arc::new(WorkerScheduler {
            sender: Mutex::new(sender),
            name: self.name,
        }))
    }
}

/// Runs tasks on a background thread. See [`WorkerBuilder`].
#[derive(Debug)]
pub struct WorkerScheduler {
    sender: Mutex<Sender<Task>>,
    name: Option<String>,
}

impl WorkerScheduler {
    /// A worker with default settings.
    pub fn spawn() -> io::Result<Arc<Self>> {
        WorkerBuilder::new().spawn()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Scheduler for WorkerScheduler {
    fn schedule(&self, task: Task) {
        let sent = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(task);
        if sent.is_err() {
            log::warn!("scheduler worker has exited, dropping task");
        }
    }
}
