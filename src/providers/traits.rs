use anyhow::Result;
use async_trait::async_trait;

use crate::task_manager::TaskManager;

/// Base trait for providers that build a component asynchronously.
///
/// # Example
///
/// ```no_run
/// use dimmerd::providers::traits::AsyncProvider;
///
/// struct LimitProvider;
///
/// #[async_trait::async_trait]
/// impl AsyncProvider<usize> for LimitProvider {
///     async fn provide(&self) -> anyhow::Result<usize> {
///         Ok(4)
///     }
/// }
/// ```
#[async_trait]
pub trait AsyncProvider<T> {
    async fn provide(&self) -> Result<T>;
}

/// Trait for services that can be started through TaskManager.
///
/// Services start in descending priority. A critical service that fails to
/// start aborts the daemon; any other failure is logged and skipped.
///
/// # Example
///
/// ```no_run
/// use dimmerd::providers::traits::ServiceProvider;
/// use dimmerd::task_manager::TaskManager;
/// use anyhow::Result;
///
/// struct HeartbeatService;
///
/// #[async_trait::async_trait]
/// impl ServiceProvider for HeartbeatService {
///     async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
///         task_manager.spawn_task("heartbeat".to_string(), |token| async move {
///             token.cancelled().await;
///             Ok(())
///         }).await
///     }
///
///     fn name(&self) -> &'static str { "HeartbeatService" }
/// }
/// ```
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Starts the service in TaskManager.
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()>;

    /// Returns service name for logging and management.
    fn name(&self) -> &'static str;

    /// Returns startup priority (higher numbers start first).
    fn priority(&self) -> i32 {
        0
    }

    /// Indicates if service is critical for system operation.
    fn is_critical(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::{Duration, sleep};

    struct CountingProvider {
        value: usize,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl AsyncProvider<usize> for CountingProvider {
        async fn provide(&self) -> Result<usize> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.value)
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl AsyncProvider<usize> for FailingProvider {
        async fn provide(&self) -> Result<usize> {
            Err(anyhow!("name store unavailable"))
        }
    }

    struct MockService {
        name: &'static str,
        priority: i32,
        is_critical: bool,
        fail: bool,
        task_ran: Arc<AtomicBool>,
    }

    impl MockService {
        fn new(name: &'static str, priority: i32, is_critical: bool) -> Self {
            Self {
                name,
                priority,
                is_critical,
                fail: false,
                task_ran: Arc::new(AtomicBool::new(false)),
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                fail: true,
                ..Self::new(name, 0, false)
            }
        }
    }

    #[async_trait]
    impl ServiceProvider for MockService {
        async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
            if self.fail {
                return Err(anyhow!("{}: start failed", self.name));
            }
            let task_ran = self.task_ran.clone();
            task_manager
                .spawn_task(format!("{}_task", self.name), move |_token| async move {
                    task_ran.store(true, Ordering::SeqCst);
                    Ok(())
                })
                .await
        }

        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn is_critical(&self) -> bool {
            self.is_critical
        }
    }

    #[tokio::test]
    async fn async_provider_returns_value_each_call() {
        let provider = CountingProvider {
            value: 4,
            calls: Mutex::new(0),
        };

        for _ in 0..3 {
            assert_eq!(provider.provide().await.unwrap(), 4);
        }
        assert_eq!(*provider.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn async_provider_propagates_errors() {
        let providers: Vec<Box<dyn AsyncProvider<usize>>> = vec![
            Box::new(CountingProvider {
                value: 1,
                calls: Mutex::new(0),
            }),
            Box::new(FailingProvider),
        ];

        assert!(providers[0].provide().await.is_ok());
        let err = providers[1].provide().await.unwrap_err();
        assert_eq!(err.to_string(), "name store unavailable");
    }

    #[tokio::test]
    async fn service_start_spawns_task() {
        let mut task_manager = TaskManager::new();
        let service = MockService::new("refresh", 5, false);

        service.start(&mut task_manager).await.unwrap();
        sleep(Duration::from_millis(10)).await;

        assert!(service.task_ran.load(Ordering::SeqCst));
        assert_eq!(task_manager.active_count(), 1);
    }

    #[test]
    fn default_priority_and_criticality() {
        struct DefaultService;

        #[async_trait]
        impl ServiceProvider for DefaultService {
            async fn start(&self, _task_manager: &mut TaskManager) -> Result<()> {
                Ok(())
            }

            fn name(&self) -> &'static str {
                "default_service"
            }
        }

        assert_eq!(DefaultService.priority(), 0);
        assert!(!DefaultService.is_critical());
    }

    #[tokio::test]
    async fn services_sort_and_fail_independently() {
        let mut task_manager = TaskManager::new();
        let mut services: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(MockService::new("relay", 3, false)),
            Box::new(MockService::failing("watcher")),
            Box::new(MockService::new("dbus", 9, true)),
        ];
        services.sort_by_key(|s| std::cmp::Reverse(s.priority()));

        let names: Vec<_> = services.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["dbus", "relay", "watcher"]);

        let mut results = Vec::new();
        for service in &services {
            results.push(service.start(&mut task_manager).await);
        }

        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        let err = results[2].as_ref().unwrap_err();
        assert!(err.to_string().contains("watcher"));
        assert_eq!(task_manager.active_count(), 2);
    }
}
