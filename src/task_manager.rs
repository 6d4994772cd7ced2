//! Task management for async service lifecycle.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the background tasks of the daemon.
///
/// Every task gets a child of the global cancellation token, so a task can
/// be stopped alone or together with everything else.
pub struct TaskManager {
    tasks: HashMap<String, TaskInfo>,
    pub global_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            global_token: CancellationToken::new(),
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }

    /// Bounds how long [`shutdown_all`](Self::shutdown_all) waits per task.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Spawns and registers a task with the given name.
    ///
    /// A task registered under a name already in use replaces it; the old
    /// task is cancelled.
    pub async fn spawn_task<F, Fut>(&mut self, name: String, task_fn: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let task_token = self.global_token.child_token();
        let task_token_clone = task_token.clone();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            debug!("Starting task: {}", task_name);
            match task_fn(task_token_clone).await {
                Ok(()) => {
                    info!("Task '{}' completed", task_name);
                    Ok(())
                }
                Err(e) => {
                    error!("Task '{}' failed: {:#}", task_name, e);
                    Err(e)
                }
            }
        });

        if let Some(previous) = self.tasks.insert(
            name.clone(),
            TaskInfo {
                handle,
                cancel_token: task_token,
            },
        ) {
            warn!("Task '{}' replaced", name);
            previous.cancel_token.cancel();
        }

        info!("Task '{}' spawned", name);
        Ok(())
    }

    /// Cancels one task without waiting for it. Returns false for unknown
    /// names.
    pub fn cancel(&mut self, name: &str) -> bool {
        match self.tasks.remove(name) {
            Some(info) => {
                info.cancel_token.cancel();
                true
            }
            None => false,
        }
    }

    /// Shuts down all registered tasks gracefully.
    ///
    /// Waits for all tasks to complete and collects any errors.
    /// Returns the first error encountered, if any.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        info!("Stopping all {} tasks", self.tasks.len());

        self.global_token.cancel();

        let mut first_error = None;
        let tasks: Vec<_> = self.tasks.drain().collect();

        for (name, info) in tasks {
            let error = match tokio::time::timeout(self.shutdown_timeout, info.handle).await {
                Ok(Ok(Ok(()))) => continue,
                Ok(Ok(Err(e))) => e.context(format!("Task '{name}' failed")),
                Ok(Err(e)) => anyhow!("Task '{name}' panicked: {e}"),
                Err(_) => anyhow!("Task '{name}' did not stop in time"),
            };
            warn!("{:#}", error);
            first_error.get_or_insert(error);
        }

        if let Some(error) = first_error {
            Err(error).context("One or more tasks failed during shutdown")
        } else {
            info!("All tasks stopped");
            Ok(())
        }
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .get(name)
            .is_some_and(|info| !info.handle.is_finished())
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

struct TaskInfo {
    handle: JoinHandle<Result<()>>,
    cancel_token: CancellationToken,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::sleep;

    async fn until_cancelled(token: CancellationToken) -> Result<()> {
        token.cancelled().await;
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_cancels_every_task() {
        let mut manager = TaskManager::new();
        manager
            .spawn_task("a".into(), until_cancelled)
            .await
            .unwrap();
        manager
            .spawn_task("b".into(), until_cancelled)
            .await
            .unwrap();
        assert_eq!(manager.active_count(), 2);
        assert!(manager.is_running("a"));

        manager.shutdown_all().await.unwrap();

        assert_eq!(manager.active_count(), 0);
        assert!(manager.global_token.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_stops_a_single_task() {
        let mut manager = TaskManager::new();
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        manager
            .spawn_task("watcher".into(), move |token| async move {
                token.cancelled().await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        manager
            .spawn_task("refresh".into(), until_cancelled)
            .await
            .unwrap();

        assert!(manager.cancel("watcher"));
        assert!(!manager.cancel("watcher"));
        sleep(Duration::from_millis(20)).await;

        assert!(stopped.load(Ordering::SeqCst));
        assert!(manager.is_running("refresh"));
        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn failed_task_surfaces_at_shutdown() {
        let mut manager = TaskManager::new();
        manager
            .spawn_task("broken".into(), |_token| async { Err(anyhow!("bus went away")) })
            .await
            .unwrap();
        sleep(Duration::from_millis(10)).await;
        assert!(!manager.is_running("broken"));

        let err = manager.shutdown_all().await.unwrap_err();

        assert!(format!("{err:#}").contains("bus went away"));
    }

    #[tokio::test]
    async fn stuck_task_times_out() {
        let mut manager = TaskManager::new().with_shutdown_timeout(Duration::from_millis(50));
        manager
            .spawn_task("stuck".into(), |_token| async {
                sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await
            .unwrap();

        let err = manager.shutdown_all().await.unwrap_err();

        assert!(format!("{err:#}").contains("did not stop in time"));
    }

    #[tokio::test]
    async fn same_name_replaces_previous_task() {
        let mut manager = TaskManager::new();
        let first_stopped = Arc::new(AtomicBool::new(false));
        let flag = first_stopped.clone();
        manager
            .spawn_task("refresh".into(), move |token| async move {
                token.cancelled().await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();

        manager
            .spawn_task("refresh".into(), until_cancelled)
            .await
            .unwrap();
        sleep(Duration::from_millis(20)).await;

        assert!(first_stopped.load(Ordering::SeqCst));
        assert_eq!(manager.active_count(), 1);
        manager.shutdown_all().await.unwrap();
    }
}
