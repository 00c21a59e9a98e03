use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Task service metrics collector
#[derive(Clone)]
pub struct TaskMetrics {
    tasks_created: IntCounter,
    active_tasks: IntGauge,
    updates: IntCounterVec,
    cancellations: IntCounter,
    registry: Registry,
}

impl TaskMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tasks_created = IntCounter::new("agg_tasks_created_total", "Total number of tasks created")?;
        registry.register(Box::new(tasks_created.clone()))?;

        let active_tasks = IntGauge::new("agg_active_tasks", "Number of tasks not yet in a terminal state")?;
        registry.register(Box::new(active_tasks.clone()))?;

        let updates = IntCounterVec::new(
            Opts::new("agg_task_updates_total", "Task updates by resulting state"),
            &["state"],
        )?;
        registry.register(Box::new(updates.clone()))?;

        let cancellations = IntCounter::new(
            "agg_task_cancellations_total",
            "Updates refused because the task was cancelling",
        )?;
        registry.register(Box::new(cancellations.clone()))?;

        Ok(Self {
            tasks_created,
            active_tasks,
            updates,
            cancellations,
            registry,
        })
    }

    pub fn task_created(&self) {
        self.tasks_created.inc();
        self.active_tasks.inc();
    }

    pub fn task_finished(&self) {
        self.active_tasks.dec();
    }

    pub fn task_updated(&self, state: &str) {
        self.updates.with_label_values(&[state]).inc();
    }

    pub fn cancellation_observed(&self) {
        self.cancellations.inc();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn cancellation_count(&self) -> u64 {
        self.cancellations.get()
    }

    pub fn active_count(&self) -> i64 {
        self.active_tasks.get()
    }
}
