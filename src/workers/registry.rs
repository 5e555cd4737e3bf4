//! Worker registry and task-type routing.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{WorkerDescriptor, WorkerRef};
use crate::task::TaskType;

#[derive(Default)]
struct Inner {
    workers: HashMap<String, WorkerRef>,
    /// Worker names per task type, in registration order.
    routes: HashMap<TaskType, Vec<String>>,
}

/// Name-keyed worker store with a task-type index.
///
/// Written at startup, read on every dispatch.
#[derive(Default)]
pub struct WorkerRegistry {
    inner: RwLock<Inner>,
}

pub type SharedWorkerRegistry = Arc<WorkerRegistry>;

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker. Re-registering a name replaces the previous entry
    /// and keeps its routing position for task types both versions support.
    pub async fn register(&self, worker: WorkerRef) {
        let name = worker.name().to_string();
        let supported = worker.supported_tasks().to_vec();
        let mut inner = self.inner.write().await;

        if inner.workers.insert(name.clone(), worker).is_some() {
            tracing::info!("Replaced worker registration: {}", name);
            for (task_type, names) in inner.routes.iter_mut() {
                if !supported.contains(task_type) {
                    names.retain(|n| n != &name);
                }
            }
            inner.routes.retain(|_, names| !names.is_empty());
        } else {
            tracing::info!("Registered worker: {} ({} task types)", name, supported.len());
        }

        for task_type in supported {
            let names = inner.routes.entry(task_type).or_default();
            if !names.contains(&name) {
                names.push(name.clone());
            }
        }
    }

    pub async fn get(&self, name: &str) -> Option<WorkerRef> {
        self.inner.read().await.workers.get(name).cloned()
    }

    /// Workers able to handle `task_type`, in registration order.
    pub async fn get_for_task(&self, task_type: TaskType) -> Vec<WorkerRef> {
        let inner = self.inner.read().await;
        inner
            .routes
            .get(&task_type)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| inner.workers.get(n).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Descriptors of all registered workers, sorted by name.
    pub async fn list(&self) -> Vec<WorkerDescriptor> {
        let inner = self.inner.read().await;
        let mut descriptors: Vec<WorkerDescriptor> =
            inner.workers.values().map(|w| w.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.workers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Task types with no registered worker.
    pub async fn uncovered_task_types(&self) -> Vec<TaskType> {
        let inner = self.inner.read().await;
        TaskType::ALL
            .into_iter()
            .filter(|t| inner.routes.get(t).map_or(true, Vec::is_empty))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::WorkerResult;
    use crate::task::TaskSpec;
    use crate::workers::{builtin_workers, ExecutionContext, Worker, WorkerError};
    use async_trait::async_trait;

    struct Stub {
        name: &'static str,
        tasks: Vec<TaskType>,
    }

    #[async_trait]
    impl Worker for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "stub"
        }

        fn supported_tasks(&self) -> &[TaskType] {
            &self.tasks
        }

        fn required_tools(&self) -> &[&'static str] {
            &[]
        }

        async fn execute(
            &self,
            _task: &TaskSpec,
            _ctx: &ExecutionContext,
        ) -> Result<WorkerResult, WorkerError> {
            Err(WorkerError::InvalidTask("stub".to_string()))
        }
    }

    fn stub(name: &'static str, tasks: &[TaskType]) -> WorkerRef {
        Arc::new(Stub {
            name,
            tasks: tasks.to_vec(),
        })
    }

    #[tokio::test]
    async fn test_routing_is_total_for_builtin_workers() {
        let registry = WorkerRegistry::new();
        for worker in builtin_workers() {
            registry.register(worker).await;
        }

        assert!(registry.uncovered_task_types().await.is_empty());
        for task_type in TaskType::ALL {
            let workers = registry.get_for_task(task_type).await;
            assert!(!workers.is_empty());
            assert!(workers
                .iter()
                .all(|w| w.supported_tasks().contains(&task_type)));
        }
    }

    #[tokio::test]
    async fn test_re_registration_is_idempotent() {
        let registry = WorkerRegistry::new();
        registry.register(stub("a", &[TaskType::DrDrill])).await;
        registry.register(stub("b", &[TaskType::DrDrill])).await;
        registry.register(stub("a", &[TaskType::DrDrill])).await;

        let names: Vec<String> = registry
            .get_for_task(TaskType::DrDrill)
            .await
            .iter()
            .map(|w| w.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_re_registration_drops_stale_routes() {
        let registry = WorkerRegistry::new();
        registry
            .register(stub("a", &[TaskType::DrDrill, TaskType::CostOptimization]))
            .await;
        registry.register(stub("a", &[TaskType::CostOptimization])).await;

        assert!(registry.get_for_task(TaskType::DrDrill).await.is_empty());
        assert_eq!(registry.get_for_task(TaskType::CostOptimization).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_lookups_are_empty() {
        let registry = WorkerRegistry::new();
        assert!(registry.is_empty().await);
        assert!(registry.get("nope").await.is_none());
        assert!(registry.get_for_task(TaskType::SopAuthoring).await.is_empty());
        assert_eq!(registry.uncovered_task_types().await.len(), TaskType::ALL.len());
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let registry = WorkerRegistry::new();
        registry.register(stub("zeta", &[TaskType::DrDrill])).await;
        registry.register(stub("alpha", &[TaskType::DrDrill])).await;
        let names: Vec<String> = registry.list().await.into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
