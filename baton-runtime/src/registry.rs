use std::collections::HashMap;
use std::sync::Arc;

use crate::cron::CronSchedule;
use crate::handler::Handler;
use crate::task::{ScheduleOptions, TaskDefinition};

/// Global distributed slice collecting tasks declared with `#[task]`
#[linkme::distributed_slice]
pub static TASKS: [fn() -> TaskDefinition] = [..];

/// Recurring schedule with its parsed cron expression.
#[derive(Debug, Clone)]
pub(crate) struct ScheduleEntry {
    pub(crate) options: ScheduleOptions,
    pub(crate) cron: CronSchedule,
}

/// Process-local task id → schedule and task id → handler maps.
///
/// Mutated only while the scheduler is stopped; each run works on a frozen
/// snapshot.
#[derive(Clone, Default)]
pub(crate) struct Registry {
    schedules: HashMap<String, ScheduleEntry>,
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Registry {
    pub(crate) fn register(&mut self, task_id: String, entry: ScheduleEntry) -> Option<ScheduleEntry> {
        self.schedules.insert(task_id, entry)
    }

    pub(crate) fn bind(&mut self, task_id: String, handler: Arc<dyn Handler>) -> bool {
        self.handlers.insert(task_id, handler).is_some()
    }

    pub(crate) fn clear(&mut self) {
        self.schedules.clear();
        self.handlers.clear();
    }

    pub(crate) fn schedules(&self) -> impl Iterator<Item = (&String, &ScheduleEntry)> {
        self.schedules.iter()
    }

    pub(crate) fn handler(&self, task_id: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(task_id)
    }

    /// Bound task ids in a stable order.
    pub(crate) fn bound_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn schedule_count(&self) -> usize {
        self.schedules.len()
    }

    pub(crate) fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.schedules.is_empty() && self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;

    fn entry(expr: &str) -> ScheduleEntry {
        ScheduleEntry {
            options: ScheduleOptions::new(expr),
            cron: CronSchedule::parse(expr).unwrap(),
        }
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = Registry::default();
        assert!(registry.register("a".into(), entry("0 * * * * *")).is_none());
        let previous = registry.register("a".into(), entry("30 * * * * *")).unwrap();
        assert_eq!(previous.options.cron_expr, "0 * * * * *");
        assert_eq!(registry.schedule_count(), 1);
    }

    #[test]
    fn test_bound_ids_sorted_and_clear() {
        let mut registry = Registry::default();
        let handler: Arc<dyn Handler> = Arc::new(|_: Option<String>| async { Ok::<_, BoxError>(true) });
        registry.bind("zeta".into(), handler.clone());
        registry.bind("alpha".into(), handler);
        assert_eq!(registry.bound_task_ids(), vec!["alpha".to_string(), "zeta".to_string()]);
        assert!(registry.handler("alpha").is_some());

        registry.clear();
        assert!(registry.is_empty());
        registry.clear();
        assert!(registry.is_empty());
    }
}
