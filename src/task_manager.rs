//! Manages the lifecycle of all spawned tasks in the application.
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Keeps track of background tasks and shuts them down together.
///
/// Every task is expected to watch the shared shutdown channel and return
/// once it fires. `shutdown` then awaits them, up to a grace period.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Vec<(&'static str, JoinHandle<()>)>>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskManager {
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_rx,
        }
    }

    /// Spawns a named task and keeps its handle.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task_name = name, "Spawning task");
        let handle = tokio::spawn(future);
        match self.handles.lock() {
            Ok(mut handles) => handles.push((name, handle)),
            Err(poisoned) => poisoned.into_inner().push((name, handle)),
        }
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn task_count(&self) -> usize {
        self.handles.lock().map(|h| h.len()).unwrap_or_default()
    }

    /// Waits for all managed tasks to finish, aborting whatever is still
    /// running after `grace`.
    pub async fn shutdown(self, grace: Duration) {
        let handles = match self.handles.lock() {
            Ok(mut handles) => handles.drain(..).collect::<Vec<_>>(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect::<Vec<_>>(),
        };
        info!("Waiting for {} tasks to complete...", handles.len());

        let (names, handles): (Vec<&'static str>, Vec<JoinHandle<()>>) = handles.into_iter().unzip();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        match tokio::time::timeout(grace, join_all(handles)).await {
            Ok(results) => {
                for (task_name, result) in names.iter().zip(results) {
                    match result {
                        Ok(()) => debug!(task_name, "Task shut down gracefully."),
                        Err(e) => error!(task_name, error = %e, "Task failed during shutdown."),
                    }
                }
                info!("All tasks shut down.");
            }
            Err(_) => {
                warn!(
                    tasks = ?names,
                    "Tasks did not stop within {}s, aborting.",
                    grace.as_secs()
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }
}
