//! Plan executor.
//!
//! Runs a [`ProjectPlan`] through the scheduler: a destroy phase in reverse
//! order over the snapshot graph, then an apply phase in direct order over
//! the live graph. Units run in their own tokio tasks; the link registry
//! and the snapshot they write back to are shared behind mutexes. State is
//! saved after each phase, failed or not.

use indexmap::IndexSet;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::DEFAULT_PARALLELISM;
use crate::error::{GraphError, Result, StackforgeError, UnitError, UnitFailure};
use crate::graph::{DependencyMap, Dispatch, ScheduleMode, Scheduler};
use crate::links::{ensure_no_markers, LinkRegistry};
use crate::project::Project;
use crate::state::{RunHistoryEntry, RunOperation, StateSnapshot, StateStore};
use crate::unit::{ExecContext, Unit};

use super::plan::ProjectPlan;

/// Outcome of a successful run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Units applied, in completion order.
    pub applied: Vec<String>,
    /// Units destroyed, in completion order.
    pub destroyed: Vec<String>,
    /// Units left untouched.
    pub unchanged: Vec<String>,
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} applied, {} destroyed, {} unchanged",
            self.applied.len(),
            self.destroyed.len(),
            self.unchanged.len()
        )
    }
}

/// Executes plans against the live project and the snapshot project.
pub struct PlanExecutor<'a> {
    live: &'a Project,
    previous: &'a Project,
    store: &'a dyn StateStore,
    ctx: ExecContext,
    parallelism: usize,
}

impl std::fmt::Debug for PlanExecutor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("project", &self.live.name())
            .field("store", &self.store.location())
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}

impl<'a> PlanExecutor<'a> {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        live: &'a Project,
        previous: &'a Project,
        store: &'a dyn StateStore,
        ctx: ExecContext,
    ) -> Self {
        Self {
            live,
            previous,
            store,
            ctx,
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    /// Sets the maximum number of units run at once.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Destroys the plan's removed units, then applies its changed units.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnitsFailed`] with every unit failure once
    /// in-flight units drained, or an error if the state cannot be saved.
    pub async fn apply(&self, plan: &ProjectPlan, snapshot: &mut StateSnapshot) -> Result<ExecutionResult> {
        let touched: Vec<String> = plan
            .destroy_keys()
            .into_iter()
            .chain(plan.apply_keys())
            .collect();
        let mut result = ExecutionResult {
            unchanged: plan.unchanged_keys(),
            ..ExecutionResult::default()
        };

        let state = Arc::new(Mutex::new(snapshot.clone()));
        let outcome = self.apply_phases(plan, &state, &mut result).await;

        let mut final_state = state.lock().await.clone();
        if outcome.is_ok() {
            final_state.config_hash.clone_from(&plan.config_hash);
        }
        final_state.add_history(RunHistoryEntry::new(
            RunOperation::Apply,
            &plan.config_hash,
            touched,
            outcome.as_ref().err().map(ToString::to_string),
        ));
        final_state.save(self.store).await?;
        *snapshot = final_state;

        outcome.map(|()| result)
    }

    async fn apply_phases(
        &self,
        plan: &ProjectPlan,
        state: &Arc<Mutex<StateSnapshot>>,
        result: &mut ExecutionResult,
    ) -> Result<()> {
        let destroy_keys = plan.destroy_keys();
        if !destroy_keys.is_empty() {
            info!("Destroying {} unit(s)", destroy_keys.len());
            let links = self.previous.links().clone();
            let outcome = self
                .destroy_phase(destroy_keys, self.previous, links, state, &mut result.destroyed)
                .await;
            state.lock().await.save(self.store).await?;
            outcome?;
        }

        let apply_keys = plan.apply_keys();
        if apply_keys.is_empty() {
            return Ok(());
        }
        info!("Applying {} unit(s)", apply_keys.len());

        let links = {
            let snapshot = state.lock().await;
            Arc::new(Mutex::new(self.seeded_links(&snapshot, &apply_keys)))
        };
        let applied = Arc::new(Mutex::new(Vec::new()));

        let work = |key: String| {
            let node = self
                .live
                .get(&key)
                .map(|n| (Arc::clone(&n.unit), n.depends_on.clone(), n.expected_outputs.clone()));
            let links = Arc::clone(&links);
            let state = Arc::clone(state);
            let applied = Arc::clone(&applied);
            let ctx = self.ctx.clone();
            async move {
                let Some((unit, depends_on, expected)) = node else {
                    return Err(StackforgeError::internal(format!("unit {key} is not configured")));
                };
                apply_unit(unit, depends_on, &expected, &links, &state, &ctx).await?;
                applied.lock().await.push(key);
                Ok(())
            }
        };

        let outcome = self
            .run_phase(
                "apply",
                apply_keys,
                &self.live.dependency_map(),
                ScheduleMode::Direct,
                self.parallelism,
                work,
            )
            .await;
        result.applied = applied.lock().await.clone();
        outcome.map_err(report_failures)
    }

    /// Destroys every unit recorded in the snapshot, or every configured
    /// unit when `ignore_state` is set.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnitsFailed`] with every unit failure, or an
    /// error if the state cannot be saved.
    pub async fn destroy_all(&self, snapshot: &mut StateSnapshot, ignore_state: bool) -> Result<ExecutionResult> {
        let (project, links) = if ignore_state {
            (self.live, self.seeded_links(snapshot, &[]))
        } else {
            (self.previous, self.previous.links().clone())
        };
        let keys: Vec<String> = project.keys().cloned().collect();
        info!("Destroying {} unit(s)", keys.len());

        let state = Arc::new(Mutex::new(snapshot.clone()));
        let mut result = ExecutionResult::default();
        let outcome = self
            .destroy_phase(keys.clone(), project, links, &state, &mut result.destroyed)
            .await;

        let mut final_state = state.lock().await.clone();
        let config_hash = final_state.config_hash.clone();
        final_state.add_history(RunHistoryEntry::new(
            RunOperation::Destroy,
            &config_hash,
            keys,
            outcome.as_ref().err().map(ToString::to_string),
        ));
        final_state.save(self.store).await?;
        *snapshot = final_state;

        outcome.map(|()| result)
    }

    /// Destroys `keys` one at a time, consumers first.
    async fn destroy_phase(
        &self,
        keys: Vec<String>,
        project: &Project,
        links: LinkRegistry,
        state: &Arc<Mutex<StateSnapshot>>,
        destroyed: &mut Vec<String>,
    ) -> Result<()> {
        let links = Arc::new(links);
        let done = Arc::new(Mutex::new(Vec::new()));

        let work = |key: String| {
            let unit = project.get(&key).map(|n| Arc::clone(&n.unit));
            let links = Arc::clone(&links);
            let state = Arc::clone(state);
            let done = Arc::clone(&done);
            let ctx = self.ctx.clone();
            async move {
                let Some(unit) = unit else {
                    return Err(StackforgeError::internal(format!("unit {key} is not in the project")));
                };
                destroy_unit(unit, &links, &state, &ctx).await?;
                done.lock().await.push(key);
                Ok(())
            }
        };

        let outcome = self
            .run_phase("destroy", keys, &project.dependency_map(), ScheduleMode::Reverse, 1, work)
            .await;
        *destroyed = done.lock().await.clone();
        outcome.map_err(report_failures)
    }

    /// Runs `work` for each unit in scheduler order.
    async fn run_phase<F, Fut>(
        &self,
        phase: &str,
        keys: Vec<String>,
        deps: &DependencyMap,
        mode: ScheduleMode,
        max_parallel: usize,
        work: F,
    ) -> std::result::Result<(), GraphError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut scheduler = Scheduler::new(keys, deps, mode, max_parallel)
            .with_interrupt_flag(self.ctx.interrupt_flag());
        let order = scheduler.index_order()?;
        debug!("{phase} order: {}", order.join(", "));

        while let Some(Dispatch { key, completion }) = scheduler.next().await? {
            debug!("Starting {phase} of {key}");
            let task = work(key);
            tokio::spawn(async move {
                match task.await {
                    Ok(()) => completion.success(),
                    Err(e) => completion.failure(e.to_string()),
                }
            });
        }
        Ok(())
    }

    /// Runs the unit-level plan of every unit the plan applies, one at a
    /// time in dependency order.
    ///
    /// # Errors
    ///
    /// Returns the failure of the first unit that cannot be planned.
    pub async fn plan_units(&self, plan: &ProjectPlan, snapshot: &StateSnapshot) -> Result<Vec<(String, String)>> {
        let keys = plan.apply_keys();
        let links = self.seeded_links(snapshot, &keys);
        let order = Scheduler::new(keys, &self.live.dependency_map(), ScheduleMode::Direct, 1).index_order()?;

        let mut plans = Vec::with_capacity(order.len());
        for key in order {
            let Some(node) = self.live.get(&key) else {
                continue;
            };
            let text = match node.unit.build(&links) {
                Ok(artifact) => node.unit.plan(&artifact, &self.ctx).await,
                Err(e) => Err(e),
            };
            match text {
                Ok(text) => plans.push((key, text)),
                Err(e) => {
                    return Err(report_failures(GraphError::UnitsFailed {
                        failures: vec![UnitFailure {
                            key,
                            message: e.to_string(),
                        }],
                    }));
                }
            }
        }
        Ok(plans)
    }

    /// Builds every configured unit against the published outputs and
    /// checks that no marker survived.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnitsFailed`] listing every unit that failed
    /// to build.
    pub fn build_all(&self, snapshot: &StateSnapshot) -> Result<Vec<(String, Value)>> {
        let links = self.seeded_links(snapshot, &[]);
        let keys: Vec<String> = self.live.keys().cloned().collect();
        let order = Scheduler::new(keys, &self.live.dependency_map(), ScheduleMode::Direct, 1).index_order()?;

        let mut artifacts = Vec::with_capacity(order.len());
        let mut failures = Vec::new();
        for key in order {
            let Some(node) = self.live.get(&key) else {
                continue;
            };
            let built = node.unit.build(&links).and_then(|artifact| {
                ensure_no_markers(&key, &artifact)?;
                Ok(artifact)
            });
            match built {
                Ok(artifact) => artifacts.push((key, artifact)),
                Err(e) => failures.push(UnitFailure {
                    key,
                    message: e.to_string(),
                }),
            }
        }

        if failures.is_empty() {
            Ok(artifacts)
        } else {
            Err(report_failures(GraphError::UnitsFailed { failures }))
        }
    }

    /// Live links with the snapshot's outputs of every unit not in `applying`.
    fn seeded_links(&self, snapshot: &StateSnapshot, applying: &[String]) -> LinkRegistry {
        let mut links = self.live.links().clone();
        for key in self.live.keys().filter(|k| !applying.contains(*k)) {
            links.join_with_data_replace(&snapshot.unit_links.by_target_unit(key));
            let missing = links.set_output_data(key, &snapshot.outputs_of(key));
            if !missing.is_empty() {
                debug!("No recorded value for {key}: {}", missing.join(", "));
            }
        }
        links
    }
}

async fn apply_unit(
    unit: Arc<dyn Unit>,
    depends_on: Vec<String>,
    expected: &IndexSet<String>,
    links: &Mutex<LinkRegistry>,
    state: &Mutex<StateSnapshot>,
    ctx: &ExecContext,
) -> Result<()> {
    let key = unit.key();
    if ctx.is_interrupted() {
        return Err(UnitError::Interrupted { unit: key }.into());
    }

    let artifact = {
        let links = links.lock().await;
        unit.build(&links)?
    };
    ensure_no_markers(&key, &artifact)?;

    let mut record = unit.get_state();
    record.depends_on = depends_on;

    // Tainted units keep their links in the snapshot.
    let outputs = match unit.apply(&artifact, ctx).await {
        Ok(outputs) => outputs,
        Err(e) => {
            let mut snapshot = state.lock().await;
            snapshot.unit_links.join(&*links.lock().await);
            snapshot.mark_tainted(&key, record);
            return Err(e);
        }
    };

    let mut snapshot = state.lock().await;
    let mut links = links.lock().await;
    snapshot.unit_links.join(&links);
    if let Some(output) = expected.iter().find(|o| !outputs.contains_key(*o)) {
        snapshot.mark_tainted(&key, record);
        return Err(UnitError::MissingOutput {
            unit: key,
            output: output.clone(),
        }
        .into());
    }

    links.set_output_data(&key, &outputs);
    drop(links);
    snapshot.publish_outputs(&key, &outputs);
    record.outputs = outputs;
    snapshot.update_unit(&key, record);
    info!("Unit {key} applied");
    Ok(())
}

async fn destroy_unit(
    unit: Arc<dyn Unit>,
    links: &LinkRegistry,
    state: &Mutex<StateSnapshot>,
    ctx: &ExecContext,
) -> Result<()> {
    let key = unit.key();
    if ctx.is_interrupted() {
        return Err(UnitError::Interrupted { unit: key }.into());
    }

    let artifact = unit.build(links)?;
    ensure_no_markers(&key, &artifact)?;
    unit.destroy(&artifact, ctx).await?;
    state.lock().await.delete_unit(&key);
    info!("Unit {key} destroyed");
    Ok(())
}

/// Logs each collected unit failure.
fn report_failures(e: GraphError) -> StackforgeError {
    if let GraphError::UnitsFailed { failures } = &e {
        for failure in failures {
            error!("{}: {}", failure.key, failure.message);
        }
    }
    e.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::planner::DiffEngine;
    use crate::links::Link;
    use crate::state::LocalStateStore;
    use crate::unit::testing::{recording_registry, Journal};
    use crate::unit::{StateRecord, UnitOutputs, UnitRegistry};
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        journal: Arc<Journal>,
        registry: UnitRegistry,
        store: LocalStateStore,
        temp: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().expect("temp dir");
            let journal = Arc::new(Journal::default());
            Self {
                registry: recording_registry(&journal),
                store: LocalStateStore::with_base_dir(temp.path().join(".stackforge")),
                journal,
                temp,
            }
        }

        fn live(&self, yaml: &str) -> Project {
            let config = ConfigParser::new().parse_yaml(yaml, None).expect("parse");
            Project::from_config(&config, &self.registry).expect("project")
        }

        async fn load(&self) -> StateSnapshot {
            StateSnapshot::load(&self.store, "demo").await.expect("load")
        }

        async fn plan(&self, yaml: &str) -> ProjectPlan {
            let live = self.live(yaml);
            let snapshot = self.load().await;
            let previous = Project::from_snapshot(&snapshot, &self.registry).expect("previous");
            DiffEngine::new(&live, &previous, &snapshot).plan("hash")
        }

        async fn apply(&self, yaml: &str) -> (Result<ExecutionResult>, StateSnapshot) {
            let live = self.live(yaml);
            let mut snapshot = self.load().await;
            let previous = Project::from_snapshot(&snapshot, &self.registry).expect("previous");
            let plan = DiffEngine::new(&live, &previous, &snapshot).plan("hash");
            let executor = PlanExecutor::new(&live, &previous, &self.store, ExecContext::new(self.temp.path()));
            let result = executor.apply(&plan, &mut snapshot).await;
            (result, snapshot)
        }
    }

    const CHAIN: &str = r#"
project:
  name: demo
stacks:
  - name: infra
    units:
      - name: net
        type: recording
        outputs: { subnet_id: subnet-1 }
      - name: db
        type: recording
        size: small
        outputs: { endpoint: '{{ output "this.net.subnet_id" }}' }
"#;

    #[tokio::test]
    async fn test_apply_orders_and_publishes_outputs() {
        let fx = Fixture::new();
        let (result, snapshot) = fx.apply(CHAIN).await;
        let result = result.expect("apply");

        assert_eq!(result.applied, vec!["infra.net", "infra.db"]);
        let finished_net = fx.journal.position("finish infra.net").expect("net ran");
        let started_db = fx.journal.position("start infra.db").expect("db ran");
        assert!(finished_net < started_db);

        assert_eq!(snapshot.outputs_of("infra.db").get("endpoint"), Some(&json!("subnet-1")));
        assert_eq!(snapshot.config_hash, "hash");

        let saved = fx.load().await;
        assert_eq!(saved.units.len(), 2);
        assert_eq!(saved.history.len(), 1);
        assert!(saved.history[0].success);
    }

    #[tokio::test]
    async fn test_plan_after_apply_has_no_changes() {
        let fx = Fixture::new();
        fx.apply(CHAIN).await.0.expect("apply");

        let plan = fx.plan(CHAIN).await;
        assert!(!plan.has_changes());
    }

    #[tokio::test]
    async fn test_unchanged_units_feed_outputs_from_state() {
        let fx = Fixture::new();
        fx.apply(CHAIN).await.0.expect("first apply");

        let (result, snapshot) = fx.apply(&CHAIN.replace("small", "large")).await;
        let result = result.expect("second apply");

        assert_eq!(result.applied, vec!["infra.db"]);
        assert_eq!(result.unchanged, vec!["infra.net"]);
        let net_runs = fx.journal.events().iter().filter(|e| *e == "start infra.net").count();
        assert_eq!(net_runs, 1);
        assert_eq!(snapshot.outputs_of("infra.db").get("endpoint"), Some(&json!("subnet-1")));
    }

    #[tokio::test]
    async fn test_failed_unit_is_tainted_and_dependents_skipped() {
        let fx = Fixture::new();
        let yaml = r"
project:
  name: demo
stacks:
  - name: s
    units:
      - name: a
        type: recording
        fail: true
      - name: b
        type: recording
        depends_on: [ this.a ]
      - name: c
        type: recording
";
        let (result, snapshot) = fx.apply(yaml).await;

        match result {
            Err(StackforgeError::Graph(GraphError::UnitsFailed { failures })) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].key, "s.a");
            }
            other => panic!("expected unit failure, got {other:?}"),
        }
        assert!(snapshot.units["s.a"].tainted);
        assert!(!snapshot.units.contains_key("s.b"));
        assert!(snapshot.units.contains_key("s.c"));
        assert!(fx.journal.position("start s.b").is_none());

        let saved = fx.load().await;
        assert!(saved.units["s.a"].tainted);
        assert!(!saved.history[0].success);
    }

    #[tokio::test]
    async fn test_removed_units_are_destroyed_consumers_first() {
        let fx = Fixture::new();
        fx.apply(CHAIN).await.0.expect("apply");

        let empty = "project:\n  name: demo\nstacks: []\n";
        let (result, snapshot) = fx.apply(empty).await;
        let result = result.expect("destroy phase");

        assert_eq!(result.destroyed, vec!["infra.db", "infra.net"]);
        let db_gone = fx.journal.position("destroy-finish infra.db").expect("db destroyed");
        let net_start = fx.journal.position("destroy-start infra.net").expect("net destroyed");
        assert!(db_gone < net_start);
        assert!(snapshot.is_empty());
        assert!(fx.load().await.unit_links.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_all() {
        let fx = Fixture::new();
        fx.apply(CHAIN).await.0.expect("apply");

        let live = fx.live(CHAIN);
        let mut snapshot = fx.load().await;
        let previous = Project::from_snapshot(&snapshot, &fx.registry).expect("previous");
        let executor = PlanExecutor::new(&live, &previous, &fx.store, ExecContext::new(fx.temp.path()))
            .with_parallelism(1);

        let result = executor.destroy_all(&mut snapshot, false).await.expect("destroy");
        assert_eq!(result.destroyed.len(), 2);
        let saved = fx.load().await;
        assert!(saved.is_empty());
        assert_eq!(saved.history.last().map(|h| h.operation), Some(RunOperation::Destroy));
    }

    #[tokio::test]
    async fn test_tainted_unit_keeps_its_edges_for_destroy() {
        let fx = Fixture::new();
        let producer = r"
project:
  name: demo
stacks:
  - name: s
    units:
      - name: y
        type: recording
        outputs: { id: y-1 }
";
        fx.apply(producer).await.0.expect("first apply");

        let consumer = format!(
            "{producer}      - name: x\n        type: recording\n        fail: true\n        input: '{{{{ output \"this.y.id\" }}}}'\n"
        );
        let (result, _) = fx.apply(&consumer).await;
        assert!(result.is_err());

        let live = fx.live(producer);
        let mut snapshot = fx.load().await;
        assert!(snapshot.units["s.x"].tainted);
        let previous = Project::from_snapshot(&snapshot, &fx.registry).expect("previous");
        assert_eq!(previous.dependency_map()["s.x"], vec![String::from("s.y")]);

        let executor = PlanExecutor::new(&live, &previous, &fx.store, ExecContext::new(fx.temp.path()))
            .with_parallelism(1);
        assert!(executor.destroy_all(&mut snapshot, false).await.is_err());
        assert!(fx.journal.position("destroy-start s.x").is_some());
        assert!(fx.journal.position("destroy-start s.y").is_none());
        assert!(fx.load().await.units.contains_key("s.y"));
    }

    #[tokio::test]
    async fn test_missing_expected_output_taints_producer() {
        let fx = Fixture::new();
        let yaml = r#"
project:
  name: demo
stacks:
  - name: s
    units:
      - name: y
        type: recording
        outputs: { name: y }
      - name: x
        type: recording
        input: '{{ output "this.y.id" }}'
"#;
        let (result, snapshot) = fx.apply(yaml).await;

        match result {
            Err(StackforgeError::Graph(GraphError::UnitsFailed { failures })) => {
                assert_eq!(failures[0].key, "s.y");
                assert!(failures[0].message.contains("id"));
            }
            other => panic!("expected unit failure, got {other:?}"),
        }
        assert!(snapshot.units["s.y"].tainted);
        assert!(fx.journal.position("start s.x").is_none());
    }

    #[tokio::test]
    async fn test_destroy_runs_one_unit_at_a_time() {
        let fx = Fixture::new();
        let yaml = r"
project:
  name: demo
stacks:
  - name: s
    units:
      - name: a
        type: recording
        delay_ms: 30
      - name: b
        type: recording
        delay_ms: 30
      - name: c
        type: recording
        delay_ms: 30
";
        fx.apply(yaml).await.0.expect("apply");

        let live = fx.live(yaml);
        let mut snapshot = fx.load().await;
        let previous = Project::from_snapshot(&snapshot, &fx.registry).expect("previous");
        let executor = PlanExecutor::new(&live, &previous, &fx.store, ExecContext::new(fx.temp.path()))
            .with_parallelism(3);

        let result = executor.destroy_all(&mut snapshot, false).await.expect("destroy");
        assert_eq!(result.destroyed.len(), 3);

        let destroys: Vec<String> = fx
            .journal
            .events()
            .into_iter()
            .filter(|e| e.starts_with("destroy-"))
            .collect();
        assert_eq!(destroys.len(), 6);
        for pair in destroys.chunks(2) {
            let key = pair[0].trim_start_matches("destroy-start ");
            assert!(pair[0].starts_with("destroy-start "));
            assert_eq!(pair[1], format!("destroy-finish {key}"));
        }
    }

    #[tokio::test]
    async fn test_destroy_rejects_unresolved_markers() {
        let fx = Fixture::new();
        let marker = Link::output("s", "gone", "id").marker().expect("marker");
        let mut snapshot = StateSnapshot::new("demo");
        snapshot.update_unit(
            "s.x",
            StateRecord {
                kind: String::from("recording"),
                tainted: false,
                force_apply: false,
                data: json!({ "input": marker }),
                depends_on: Vec::new(),
                outputs: UnitOutputs::new(),
            },
        );

        let live = Project::default();
        let previous = Project::from_snapshot(&snapshot, &fx.registry).expect("previous");
        let executor = PlanExecutor::new(&live, &previous, &fx.store, ExecContext::new(fx.temp.path()));

        match executor.destroy_all(&mut snapshot, false).await {
            Err(StackforgeError::Graph(GraphError::UnitsFailed { failures })) => {
                assert_eq!(failures[0].key, "s.x");
                assert!(failures[0].message.contains("Unprocessed marker"));
            }
            other => panic!("expected unit failure, got {other:?}"),
        }
        assert!(fx.journal.position("destroy-start s.x").is_none());
        assert!(snapshot.units.contains_key("s.x"));
    }

    #[tokio::test]
    async fn test_build_all_uses_placeholders_before_first_apply() {
        let fx = Fixture::new();
        let live = fx.live(CHAIN);
        let snapshot = StateSnapshot::new("demo");
        let previous = Project::default();
        let executor = PlanExecutor::new(&live, &previous, &fx.store, ExecContext::new(fx.temp.path()));

        let artifacts = executor.build_all(&snapshot).expect("build");
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[1].0, "infra.db");
        assert_eq!(
            artifacts[1].1["outputs"]["endpoint"],
            json!("<output infra.net.subnet_id>")
        );
    }

    #[tokio::test]
    async fn test_plan_units_runs_sequentially() {
        let fx = Fixture::new();
        let live = fx.live(CHAIN);
        let snapshot = StateSnapshot::new("demo");
        let previous = Project::default();
        let plan = DiffEngine::new(&live, &previous, &snapshot).plan("hash");
        let executor = PlanExecutor::new(&live, &previous, &fx.store, ExecContext::new(fx.temp.path()));

        let plans = executor.plan_units(&plan, &snapshot).await.expect("plan");
        let keys: Vec<&str> = plans.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["infra.net", "infra.db"]);
        assert_eq!(fx.journal.events(), vec!["plan infra.net", "plan infra.db"]);
    }
}
