//! Bounded-parallel dispatch over the dependency map.
//!
//! The [`Scheduler`] owns the status table of one working set of units. The
//! coordinating task calls [`Scheduler::next`] in a loop and spawns the work
//! for each [`Dispatch`]; the work reports back through the dispatch's
//! [`CompletionHandle`], which feeds the scheduler's completion channel.

use indexmap::IndexMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::{GraphError, UnitFailure};

use super::DependencyMap;

/// Walk direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Dependencies before dependents (apply, build).
    Direct,
    /// Dependents before dependencies (destroy).
    Reverse,
}

/// Per-unit execution status. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// Waiting for its constraints.
    Backlog,
    /// Eligible, waiting for a free slot.
    ReadyForExec,
    /// Dispatched and running.
    InProgress,
    /// Reported completion, successfully or not.
    Finished,
}

impl ExecStatus {
    /// Still counts against ordering constraints.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Finished)
    }
}

#[derive(Debug)]
struct Completion {
    key: String,
    result: Result<(), String>,
}

/// Reports the outcome of one dispatched unit.
///
/// Dropping the handle without reporting counts as a failure, so a panicking
/// task cannot stall the scheduler.
#[derive(Debug)]
pub struct CompletionHandle {
    key: String,
    tx: Option<mpsc::UnboundedSender<Completion>>,
}

impl CompletionHandle {
    /// Reports success.
    pub fn success(self) {
        self.report(Ok(()));
    }

    /// Reports failure with a message.
    pub fn failure(self, message: impl Into<String>) {
        self.report(Err(message.into()));
    }

    /// Reports an outcome.
    pub fn report(mut self, result: Result<(), String>) {
        self.send(result);
    }

    fn send(&mut self, result: Result<(), String>) {
        if let Some(tx) = self.tx.take() {
            let key = self.key.clone();
            if tx.send(Completion { key, result }).is_err() {
                warn!("Scheduler gone before unit {} reported completion", self.key);
            }
        }
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        self.send(Err(String::from("unit task ended without reporting completion")));
    }
}

/// A unit handed to the caller for execution.
#[derive(Debug)]
pub struct Dispatch {
    /// Key of the unit to run.
    pub key: String,
    /// Handle to report the outcome with.
    pub completion: CompletionHandle,
}

/// Status table and dispatch loop for one working set.
#[derive(Debug)]
pub struct Scheduler {
    mode: ScheduleMode,
    max_parallel: usize,
    deps: DependencyMap,
    status: IndexMap<String, ExecStatus>,
    ready: VecDeque<String>,
    in_progress: usize,
    peak: usize,
    failures: Vec<UnitFailure>,
    interrupted: Arc<AtomicBool>,
    stopping: bool,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl Scheduler {
    /// Creates a scheduler over `units`.
    ///
    /// `deps` may mention units outside the working set; such edges never
    /// block. A `max_parallel` of zero is treated as one.
    #[must_use]
    pub fn new(
        units: impl IntoIterator<Item = String>,
        deps: &DependencyMap,
        mode: ScheduleMode,
        max_parallel: usize,
    ) -> Self {
        let status: IndexMap<String, ExecStatus> = units
            .into_iter()
            .map(|key| (key, ExecStatus::Backlog))
            .collect();
        let deps = status
            .keys()
            .map(|key| {
                let inside = deps
                    .get(key)
                    .map(|d| d.iter().filter(|k| status.contains_key(*k)).cloned().collect())
                    .unwrap_or_default();
                (key.clone(), inside)
            })
            .collect();
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            mode,
            max_parallel: max_parallel.max(1),
            deps,
            status,
            ready: VecDeque::new(),
            in_progress: 0,
            peak: 0,
            failures: Vec::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
            stopping: false,
            tx,
            rx,
        }
    }

    /// Shares an interrupt flag; once raised no new unit is dispatched.
    #[must_use]
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    /// Returns the next unit to run, or `None` once every unit finished.
    ///
    /// Blocks while all eligible slots are taken or nothing is eligible yet.
    ///
    /// # Errors
    ///
    /// After a failure or an interrupt, waits for every in-flight unit and
    /// then returns [`GraphError::UnitsFailed`] with all collected failures,
    /// or [`GraphError::Interrupted`]. Returns [`GraphError::Broken`] if
    /// units can never become ready.
    pub async fn next(&mut self) -> Result<Option<Dispatch>, GraphError> {
        loop {
            if !self.stopping && self.interrupted.load(Ordering::SeqCst) {
                warn!("Interrupted, waiting for all running units done");
                self.stopping = true;
            }

            if !self.stopping {
                self.refresh_ready();
                if self.in_progress < self.max_parallel
                    && let Some(key) = self.ready.pop_front()
                {
                    return Ok(Some(self.dispatch(key)));
                }
            }

            if self.in_progress == 0 {
                return self.finish();
            }

            match self.rx.recv().await {
                Some(completion) => self.complete(completion),
                None => return Err(self.broken()),
            }
        }
    }

    /// Computes an execution order without running anything, then resets
    /// every unit to [`ExecStatus::Backlog`].
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Broken`] if units can never become ready.
    pub fn index_order(&mut self) -> Result<Vec<String>, GraphError> {
        let mut order = Vec::with_capacity(self.status.len());
        loop {
            self.refresh_ready();
            if self.ready.is_empty() {
                break;
            }
            while let Some(key) = self.ready.pop_front() {
                self.set_status(&key, ExecStatus::Finished);
                order.push(key);
            }
        }

        let result = if order.len() == self.status.len() {
            Ok(order)
        } else {
            Err(self.broken())
        };
        self.reset();
        result
    }

    /// Resets every unit to [`ExecStatus::Backlog`] and clears failures.
    pub fn reset(&mut self) {
        for status in self.status.values_mut() {
            *status = ExecStatus::Backlog;
        }
        self.ready.clear();
        self.failures.clear();
        self.stopping = false;
    }

    /// Current status of a unit.
    #[must_use]
    pub fn status(&self, key: &str) -> Option<ExecStatus> {
        self.status.get(key).copied()
    }

    /// Highest number of simultaneously running units so far.
    #[must_use]
    pub const fn peak_in_progress(&self) -> usize {
        self.peak
    }

    /// Failures reported so far.
    #[must_use]
    pub fn failures(&self) -> &[UnitFailure] {
        &self.failures
    }

    /// Number of units in the working set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.status.len()
    }

    /// Returns true if the working set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status.is_empty()
    }

    fn is_eligible(&self, key: &str) -> bool {
        match self.mode {
            ScheduleMode::Direct => self.deps.get(key).is_none_or(|deps| {
                deps.iter()
                    .all(|d| self.status.get(d).is_none_or(|s| !s.is_active()))
            }),
            ScheduleMode::Reverse => self.status.iter().all(|(other, status)| {
                other == key
                    || !status.is_active()
                    || self.deps.get(other).is_none_or(|deps| !deps.iter().any(|d| d == key))
            }),
        }
    }

    fn refresh_ready(&mut self) {
        let eligible: Vec<String> = self
            .status
            .iter()
            .filter(|(key, status)| **status == ExecStatus::Backlog && self.is_eligible(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in eligible {
            self.set_status(&key, ExecStatus::ReadyForExec);
            self.ready.push_back(key);
        }
    }

    fn dispatch(&mut self, key: String) -> Dispatch {
        self.set_status(&key, ExecStatus::InProgress);
        self.in_progress += 1;
        self.peak = self.peak.max(self.in_progress);
        debug!("Dispatching unit {key} ({} in progress)", self.in_progress);

        Dispatch {
            completion: CompletionHandle {
                key: key.clone(),
                tx: Some(self.tx.clone()),
            },
            key,
        }
    }

    fn complete(&mut self, completion: Completion) {
        let Completion { key, result } = completion;
        if self.status(&key) != Some(ExecStatus::InProgress) {
            warn!("Ignoring completion for unit {key} that is not in progress");
            return;
        }
        self.set_status(&key, ExecStatus::Finished);
        self.in_progress -= 1;

        match result {
            Ok(()) => debug!("Unit {key} finished"),
            Err(message) => {
                if !self.stopping {
                    error!("error in unit {key}, waiting for all running units done");
                }
                self.stopping = true;
                self.failures.push(UnitFailure { key, message });
            }
        }
    }

    fn finish(&mut self) -> Result<Option<Dispatch>, GraphError> {
        if !self.failures.is_empty() {
            return Err(GraphError::UnitsFailed {
                failures: self.failures.clone(),
            });
        }
        if self.stopping {
            return Err(GraphError::Interrupted);
        }
        if self.status.values().any(|s| s.is_active()) {
            return Err(self.broken());
        }
        Ok(None)
    }

    fn broken(&self) -> GraphError {
        GraphError::Broken {
            pending: self
                .status
                .iter()
                .filter(|(_, s)| s.is_active())
                .map(|(k, _)| k.clone())
                .collect(),
        }
    }

    fn set_status(&mut self, key: &str, status: ExecStatus) {
        if let Some(current) = self.status.get_mut(key) {
            *current = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn graph(edges: &[(&str, &[&str])]) -> DependencyMap {
        edges
            .iter()
            .map(|(k, deps)| ((*k).to_string(), deps.iter().map(|d| (*d).to_string()).collect()))
            .collect()
    }

    fn keys(deps: &DependencyMap) -> Vec<String> {
        deps.keys().cloned().collect()
    }

    /// Runs the scheduler to completion, recording start and finish events.
    async fn drive(
        scheduler: &mut Scheduler,
        failing: &[&str],
        delay_ms: u64,
    ) -> (Vec<String>, Result<(), GraphError>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let result = loop {
            match scheduler.next().await {
                Ok(Some(dispatch)) => {
                    let events = Arc::clone(&events);
                    let fail = failing.contains(&dispatch.key.as_str());
                    tokio::spawn(async move {
                        let key = dispatch.key;
                        events.lock().expect("events").push(format!("start {key}"));
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        events.lock().expect("events").push(format!("finish {key}"));
                        if fail {
                            dispatch.completion.failure("boom");
                        } else {
                            dispatch.completion.success();
                        }
                    });
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        let events = events.lock().expect("events").clone();
        (events, result)
    }

    fn position(events: &[String], event: &str) -> usize {
        events
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("missing event {event}"))
    }

    #[tokio::test]
    async fn test_direct_mode_orders_dependencies_first() {
        let deps = graph(&[
            ("app.web", &["infra.db"]),
            ("infra.db", &["infra.net"]),
            ("infra.net", &[]),
        ]);
        let mut scheduler = Scheduler::new(keys(&deps), &deps, ScheduleMode::Direct, 4);
        let (events, result) = drive(&mut scheduler, &[], 5).await;

        result.expect("run succeeds");
        assert!(position(&events, "finish infra.net") < position(&events, "start infra.db"));
        assert!(position(&events, "finish infra.db") < position(&events, "start app.web"));
        assert_eq!(scheduler.status("app.web"), Some(ExecStatus::Finished));
    }

    #[tokio::test]
    async fn test_reverse_mode_destroys_dependents_first() {
        let deps = graph(&[
            ("infra.net", &[]),
            ("infra.db", &["infra.net"]),
            ("app.web", &["infra.db", "infra.net"]),
        ]);
        let mut scheduler = Scheduler::new(keys(&deps), &deps, ScheduleMode::Reverse, 4);
        let (events, result) = drive(&mut scheduler, &[], 5).await;

        result.expect("run succeeds");
        assert!(position(&events, "finish app.web") < position(&events, "start infra.db"));
        assert!(position(&events, "finish infra.db") < position(&events, "start infra.net"));
    }

    #[tokio::test]
    async fn test_dependencies_outside_working_set_never_block() {
        let deps = graph(&[("infra.net", &[]), ("infra.db", &["infra.net"])]);
        let mut scheduler =
            Scheduler::new(vec![String::from("infra.db")], &deps, ScheduleMode::Direct, 1);
        let (events, result) = drive(&mut scheduler, &[], 1).await;

        result.expect("run succeeds");
        assert_eq!(events, vec!["start infra.db", "finish infra.db"]);
    }

    #[tokio::test]
    async fn test_parallelism_bound() {
        let deps: DependencyMap = (0..8).map(|i| (format!("s.u{i}"), Vec::new())).collect();
        let mut scheduler = Scheduler::new(keys(&deps), &deps, ScheduleMode::Direct, 3);
        let (events, result) = drive(&mut scheduler, &[], 20).await;

        result.expect("run succeeds");
        assert_eq!(events.len(), 16);
        assert_eq!(scheduler.peak_in_progress(), 3);
    }

    #[tokio::test]
    async fn test_sequential_when_max_parallel_is_one() {
        let deps: DependencyMap = (0..4).map(|i| (format!("s.u{i}"), Vec::new())).collect();
        let mut scheduler = Scheduler::new(keys(&deps), &deps, ScheduleMode::Direct, 1);
        let (events, result) = drive(&mut scheduler, &[], 2).await;

        result.expect("run succeeds");
        assert_eq!(scheduler.peak_in_progress(), 1);
        for pair in events.chunks(2) {
            assert_eq!(pair[0].replace("start", "finish"), pair[1]);
        }
    }

    #[tokio::test]
    async fn test_failure_drains_in_flight_units() {
        let deps = graph(&[
            ("s.fast", &[]),
            ("s.slow", &[]),
            ("s.after", &["s.fast"]),
        ]);
        let mut scheduler = Scheduler::new(keys(&deps), &deps, ScheduleMode::Direct, 2);

        let first = scheduler.next().await.expect("next").expect("dispatch");
        let second = scheduler.next().await.expect("next").expect("dispatch");
        assert_eq!(first.key, "s.fast");
        assert_eq!(second.key, "s.slow");

        first.completion.failure("boom");
        let slow = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            second.completion.success();
        });

        let err = scheduler.next().await.expect_err("failure surfaces");
        slow.await.expect("slow task");

        assert_eq!(scheduler.status("s.slow"), Some(ExecStatus::Finished));
        assert_eq!(scheduler.status("s.after"), Some(ExecStatus::Backlog));
        match err {
            GraphError::UnitsFailed { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].key, "s.fast");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_collects_every_failure() {
        let deps: DependencyMap = (0..3).map(|i| (format!("s.u{i}"), Vec::new())).collect();
        let mut scheduler = Scheduler::new(keys(&deps), &deps, ScheduleMode::Direct, 3);
        let (_, result) = drive(&mut scheduler, &["s.u0", "s.u1", "s.u2"], 5).await;

        let err = result.expect_err("failures");
        assert!(err.to_string().starts_with("3 unit(s) failed"));
    }

    #[tokio::test]
    async fn test_dropped_handle_counts_as_failure() {
        let deps = graph(&[("s.a", &[])]);
        let mut scheduler = Scheduler::new(keys(&deps), &deps, ScheduleMode::Direct, 1);
        let dispatch = scheduler.next().await.expect("next").expect("dispatch");
        drop(dispatch);
        assert!(matches!(
            scheduler.next().await,
            Err(GraphError::UnitsFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_interrupt_stops_dispatch() {
        let deps = graph(&[("s.a", &[]), ("s.b", &["s.a"])]);
        let flag = Arc::new(AtomicBool::new(false));
        let mut scheduler = Scheduler::new(keys(&deps), &deps, ScheduleMode::Direct, 1)
            .with_interrupt_flag(Arc::clone(&flag));

        let dispatch = scheduler.next().await.expect("next").expect("dispatch");
        flag.store(true, Ordering::SeqCst);
        dispatch.completion.success();

        assert!(matches!(scheduler.next().await, Err(GraphError::Interrupted)));
        assert_eq!(scheduler.status("s.b"), Some(ExecStatus::Backlog));
    }

    #[tokio::test]
    async fn test_empty_working_set() {
        let deps = DependencyMap::new();
        let mut scheduler = Scheduler::new(Vec::new(), &deps, ScheduleMode::Reverse, 2);
        assert!(scheduler.is_empty());
        assert!(scheduler.next().await.expect("next").is_none());
    }

    #[test]
    fn test_index_order_resets_statuses() {
        let deps = graph(&[
            ("app.web", &["infra.db"]),
            ("infra.db", &["infra.net"]),
            ("infra.net", &[]),
            ("infra.dns", &[]),
        ]);
        let mut scheduler = Scheduler::new(keys(&deps), &deps, ScheduleMode::Direct, 1);
        let order = scheduler.index_order().expect("order");

        assert_eq!(order, vec!["infra.net", "infra.dns", "infra.db", "app.web"]);
        assert!(deps
            .keys()
            .all(|k| scheduler.status(k) == Some(ExecStatus::Backlog)));

        let mut reverse = Scheduler::new(keys(&deps), &deps, ScheduleMode::Reverse, 1);
        let order = reverse.index_order().expect("order");
        assert_eq!(order, vec!["app.web", "infra.dns", "infra.db", "infra.net"]);
    }

    #[test]
    fn test_index_order_reports_broken_graph() {
        let deps = graph(&[("s.a", &["s.b"]), ("s.b", &["s.a"]), ("s.c", &[])]);
        let mut scheduler = Scheduler::new(keys(&deps), &deps, ScheduleMode::Direct, 1);
        match scheduler.index_order() {
            Err(GraphError::Broken { pending }) => assert_eq!(pending, vec!["s.a", "s.b"]),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(scheduler.status("s.c"), Some(ExecStatus::Backlog));
    }
}
