//! The apply engine.
//!
//! Walks a stack's dependency graph in waves: each wave is the maximal set
//! of not-yet-applied resources whose dependencies have all settled. Waves
//! run strictly in sequence; resources within a wave run concurrently
//! (bounded by a semaphore) since they share no edges by construction.
//! Output-store writes happen after the wave barrier, so every write for a
//! resource happens-before any read by a dependent without locking.
//!
//! Failure is contained, not all-or-nothing: a failed resource halts its
//! transitive dependents (reported as skipped, with the failed root named),
//! in-flight siblings run to completion, and independent branches of the
//! graph still apply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::outputs::OutputStore;
use crate::provider::Provider;
use crate::resource::{ResourceKind, ResourceSpec};
use crate::stack::Stack;
use crate::state::{ChangeAction, RecordedResource, StateStore};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the apply engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of concurrent provider operations within a wave.
    pub parallelism: usize,
    /// Compute planned actions without invoking the provider or touching
    /// recorded state.
    pub check_mode: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: 5,
            check_mode: false,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Per-resource outcome of an apply pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    /// The resource was created.
    Created,
    /// The resource was updated in place.
    Updated,
    /// Desired state matched recorded state; no provider call was made.
    Unchanged,
    /// The resource was recorded but no longer declared, and was deleted.
    Deleted,
    /// The provider operation failed.
    Failed {
        /// The provider's error message.
        reason: String,
    },
    /// A dependency (direct or transitive) failed, so this resource was
    /// never attempted.
    Skipped {
        /// The failed resource at the root of the blocked chain.
        blocked_by: String,
    },
}

impl std::fmt::Display for ApplyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyStatus::Created => write!(f, "created"),
            ApplyStatus::Updated => write!(f, "updated"),
            ApplyStatus::Unchanged => write!(f, "unchanged"),
            ApplyStatus::Deleted => write!(f, "deleted"),
            ApplyStatus::Failed { .. } => write!(f, "failed"),
            ApplyStatus::Skipped { .. } => write!(f, "skipped"),
        }
    }
}

/// The result of applying one resource.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    /// Logical resource name.
    pub resource: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// What happened.
    pub status: ApplyStatus,
    /// Output attributes available after this pass (empty for failed,
    /// skipped, and deleted resources).
    pub outputs: IndexMap<String, JsonValue>,
    /// Wall-clock time spent on the provider operation.
    pub duration: Duration,
}

/// Aggregate statistics for an apply pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyStats {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ApplyStats {
    /// Counts one outcome.
    pub fn record(&mut self, status: &ApplyStatus) {
        match status {
            ApplyStatus::Created => self.created += 1,
            ApplyStatus::Updated => self.updated += 1,
            ApplyStatus::Unchanged => self.unchanged += 1,
            ApplyStatus::Deleted => self.deleted += 1,
            ApplyStatus::Failed { .. } => self.failed += 1,
            ApplyStatus::Skipped { .. } => self.skipped += 1,
        }
    }

    /// Merges another set of statistics into this one.
    pub fn merge(&mut self, other: &ApplyStats) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.deleted += other.deleted;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

impl std::fmt::Display for ApplyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "created={} updated={} unchanged={} deleted={} failed={} skipped={}",
            self.created, self.updated, self.unchanged, self.deleted, self.failed, self.skipped
        )
    }
}

/// The full result of one apply pass.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// Unique id of this pass.
    pub pass_id: Uuid,
    /// The stack that was applied.
    pub stack: String,
    /// Whether this was a check-mode (dry-run) pass.
    pub check_mode: bool,
    /// When the pass started.
    pub started_at: DateTime<Utc>,
    /// When the pass finished.
    pub finished_at: DateTime<Utc>,
    /// Per-resource outcomes, in completion order.
    pub outcomes: IndexMap<String, ApplyOutcome>,
    /// Resolved exports (empty in check mode).
    pub exports: IndexMap<String, JsonValue>,
}

impl ApplyReport {
    /// Aggregates the per-resource outcomes.
    pub fn stats(&self) -> ApplyStats {
        let mut stats = ApplyStats::default();
        for outcome in self.outcomes.values() {
            stats.record(&outcome.status);
        }
        stats
    }

    /// Returns true if every resource settled without failure.
    pub fn success(&self) -> bool {
        let stats = self.stats();
        stats.failed == 0 && stats.skipped == 0
    }

    /// One-line human-readable recap.
    pub fn summary(&self) -> String {
        format!("stack '{}': {}", self.stack, self.stats())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Applies stacks against a [`Provider`].
#[derive(Debug)]
pub struct ApplyEngine {
    provider: Arc<dyn Provider>,
    config: EngineConfig,
    semaphore: Arc<Semaphore>,
}

impl ApplyEngine {
    /// Creates an engine with the default configuration.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self::with_config(provider, EngineConfig::default())
    }

    /// Creates an engine with an explicit configuration.
    pub fn with_config(provider: Arc<dyn Provider>, config: EngineConfig) -> Self {
        let parallelism = config.parallelism.max(1);
        Self {
            provider,
            config,
            semaphore: Arc::new(Semaphore::new(parallelism)),
        }
    }

    /// Returns true if the engine runs in check mode.
    pub fn is_check_mode(&self) -> bool {
        self.config.check_mode
    }

    /// Runs one apply pass: validates the declarations, orders them, and
    /// drives the provider wave by wave.
    ///
    /// Declaration errors (unknown references, cycles, schema violations)
    /// abort before any provider operation. Provider failures are contained
    /// per resource; the pass itself still returns `Ok` with the failures
    /// reported in the [`ApplyReport`].
    #[instrument(skip(self, stack, state), fields(stack = %stack.name, check = self.config.check_mode))]
    pub async fn apply(&self, stack: &Stack, state: &mut StateStore) -> Result<ApplyReport> {
        info!("Starting apply pass");
        let graph = stack.validate()?;

        // A kind change under a reused name would be a replacement in
        // disguise; reject it before mutating anything.
        for spec in graph.resources() {
            if let Some(record) = state.get(&spec.name) {
                if record.kind != spec.kind {
                    return Err(Error::invalid_declaration(
                        &spec.name,
                        format!(
                            "kind changed from '{}' to '{}'; rename the resource instead",
                            record.kind, spec.kind
                        ),
                    ));
                }
            }
        }

        let waves = graph.waves()?;
        let pass_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut store = OutputStore::new();
        let mut outcomes: IndexMap<String, ApplyOutcome> = IndexMap::new();

        if self.config.check_mode {
            self.plan_pass(&graph, state, &mut outcomes)?;
        } else {
            self.delete_orphans(&graph, state, &mut outcomes).await;
            self.apply_waves(&graph, &waves, state, &mut store, &mut outcomes)
                .await?;
        }

        let exports = store.export_all(&stack.exports);
        let report = ApplyReport {
            pass_id,
            stack: stack.name.clone(),
            check_mode: self.config.check_mode,
            started_at,
            finished_at: Utc::now(),
            outcomes,
            exports,
        };
        info!(pass_id = %report.pass_id, "{}", report.summary());
        Ok(report)
    }

    /// Deletes recorded resources that are no longer declared, newest
    /// record first so dependents recorded later go before what they
    /// referenced. Failures are contained like any other apply failure.
    async fn delete_orphans(
        &self,
        graph: &DependencyGraph,
        state: &mut StateStore,
        outcomes: &mut IndexMap<String, ApplyOutcome>,
    ) {
        let declared: Vec<&str> = graph.resources().map(|s| s.name.as_str()).collect();
        let orphan_names: Vec<String> = state
            .orphans(&declared)
            .iter()
            .map(|record| record.name.clone())
            .collect();

        for name in orphan_names.iter().rev() {
            let record = state.get(name).cloned().expect("orphan listed from state");
            debug!(resource = %name, id = %record.id, "deleting orphaned resource");
            let started = Instant::now();
            match self.provider.delete(record.kind, &record.id).await {
                Ok(()) => {
                    state.remove(name);
                    outcomes.insert(
                        name.clone(),
                        ApplyOutcome {
                            resource: name.clone(),
                            kind: record.kind,
                            status: ApplyStatus::Deleted,
                            outputs: IndexMap::new(),
                            duration: started.elapsed(),
                        },
                    );
                }
                Err(err) => {
                    warn!(resource = %name, "orphan delete failed: {err}");
                    outcomes.insert(
                        name.clone(),
                        ApplyOutcome {
                            resource: name.clone(),
                            kind: record.kind,
                            status: ApplyStatus::Failed {
                                reason: err.to_string(),
                            },
                            outputs: IndexMap::new(),
                            duration: started.elapsed(),
                        },
                    );
                }
            }
        }
    }

    /// Applies the declared resources wave by wave.
    async fn apply_waves(
        &self,
        graph: &DependencyGraph,
        waves: &[Vec<String>],
        state: &mut StateStore,
        store: &mut OutputStore,
        outcomes: &mut IndexMap<String, ApplyOutcome>,
    ) -> Result<()> {
        // resource name -> the failed resource at the root of its blocked
        // chain. Failed resources map to themselves.
        let mut halted: HashMap<String, String> = HashMap::new();

        for (wave_index, wave) in waves.iter().enumerate() {
            debug!(wave = wave_index, size = wave.len(), "starting wave");
            let mut tasks = Vec::new();

            for name in wave {
                let spec = graph.get(name).expect("wave member is declared").clone();

                if let Some(root) = blocking_root(graph, name, &halted) {
                    debug!(resource = %name, blocked_by = %root, "dependency chain failed, skipping");
                    halted.insert(name.clone(), root.clone());
                    outcomes.insert(
                        name.clone(),
                        ApplyOutcome {
                            resource: name.clone(),
                            kind: spec.kind,
                            status: ApplyStatus::Skipped { blocked_by: root },
                            outputs: IndexMap::new(),
                            duration: Duration::ZERO,
                        },
                    );
                    continue;
                }

                // All dependencies settled in earlier waves, so every
                // reference resolves; a miss here is a resolver defect.
                let desired = resolve_properties(&spec, store)?;

                match state.action_for(&spec, &desired) {
                    ChangeAction::Noop => {
                        let record = state.get(name).expect("no-op implies a record");
                        store.publish(name, &record.outputs)?;
                        debug!(resource = %name, "desired state matches record");
                        outcomes.insert(
                            name.clone(),
                            ApplyOutcome {
                                resource: name.clone(),
                                kind: spec.kind,
                                status: ApplyStatus::Unchanged,
                                outputs: record.outputs.clone(),
                                duration: Duration::ZERO,
                            },
                        );
                    }
                    action => {
                        let provider = Arc::clone(&self.provider);
                        let semaphore = Arc::clone(&self.semaphore);
                        let recorded_id = state.get(name).map(|record| record.id.clone());
                        tasks.push(tokio::spawn(async move {
                            let _permit = semaphore
                                .acquire_owned()
                                .await
                                .expect("semaphore never closed");
                            let started = Instant::now();
                            let result = match action {
                                ChangeAction::Create => provider
                                    .create(spec.kind, &spec.name, &desired)
                                    .await
                                    .map(|created| (created.id, created.outputs)),
                                ChangeAction::Update => {
                                    let id = recorded_id.expect("update implies a record");
                                    provider
                                        .update(spec.kind, &id, &desired)
                                        .await
                                        .map(|outputs| (id, outputs))
                                }
                                ChangeAction::Noop => unreachable!("no-op handled inline"),
                            };
                            (spec, desired, action, result, started.elapsed())
                        }));
                    }
                }
            }

            // Wave barrier. Siblings of a failed resource run to
            // completion; only later waves see the failure.
            for joined in join_all(tasks).await {
                let (spec, desired, action, result, duration) = joined
                    .map_err(|err| Error::internal(format!("apply task panicked: {err}")))?;
                match result {
                    Ok((id, outputs)) => {
                        store.publish(&spec.name, &outputs)?;
                        state.record(RecordedResource {
                            name: spec.name.clone(),
                            kind: spec.kind,
                            id,
                            properties: desired,
                            outputs: outputs.clone(),
                            applied_at: Utc::now(),
                        });
                        let status = match action {
                            ChangeAction::Create => ApplyStatus::Created,
                            ChangeAction::Update => ApplyStatus::Updated,
                            ChangeAction::Noop => unreachable!("no-op handled inline"),
                        };
                        info!(resource = %spec.name, status = %status, "resource settled");
                        outcomes.insert(
                            spec.name.clone(),
                            ApplyOutcome {
                                resource: spec.name.clone(),
                                kind: spec.kind,
                                status,
                                outputs,
                                duration,
                            },
                        );
                    }
                    Err(provider_err) => {
                        error!(
                            resource = %spec.name,
                            "{}",
                            Error::provider(&spec.name, provider_err.clone())
                        );
                        halted.insert(spec.name.clone(), spec.name.clone());
                        outcomes.insert(
                            spec.name.clone(),
                            ApplyOutcome {
                                resource: spec.name.clone(),
                                kind: spec.kind,
                                status: ApplyStatus::Failed {
                                    reason: provider_err.to_string(),
                                },
                                outputs: IndexMap::new(),
                                duration,
                            },
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Check mode: compute planned actions without provider calls or state
    /// writes. A resource whose referenced producers have no recorded
    /// outputs has an indeterminate resolved state and is conservatively
    /// planned as an update when it has a record of its own.
    fn plan_pass(
        &self,
        graph: &DependencyGraph,
        state: &StateStore,
        outcomes: &mut IndexMap<String, ApplyOutcome>,
    ) -> Result<()> {
        let declared: Vec<&str> = graph.resources().map(|s| s.name.as_str()).collect();
        for record in state.orphans(&declared).iter().rev() {
            outcomes.insert(
                record.name.clone(),
                ApplyOutcome {
                    resource: record.name.clone(),
                    kind: record.kind,
                    status: ApplyStatus::Deleted,
                    outputs: IndexMap::new(),
                    duration: Duration::ZERO,
                },
            );
        }

        for name in graph.topological_order()? {
            let spec = graph.get(&name).expect("ordered name is declared");
            let status = if state.get(&name).is_none() {
                ApplyStatus::Created
            } else {
                match plan_resolve(spec, state) {
                    Some(desired) => match state.action_for(spec, &desired) {
                        ChangeAction::Noop => ApplyStatus::Unchanged,
                        _ => ApplyStatus::Updated,
                    },
                    None => ApplyStatus::Updated,
                }
            };
            outcomes.insert(
                name.clone(),
                ApplyOutcome {
                    resource: name.clone(),
                    kind: spec.kind,
                    status,
                    outputs: IndexMap::new(),
                    duration: Duration::ZERO,
                },
            );
        }
        Ok(())
    }
}

/// Returns the failed root blocking `name`, if any of its direct
/// dependencies failed or were themselves blocked.
fn blocking_root(
    graph: &DependencyGraph,
    name: &str,
    halted: &HashMap<String, String>,
) -> Option<String> {
    for dep in graph.dependencies_of(name) {
        if let Some(root) = halted.get(dep) {
            return Some(root.clone());
        }
    }
    None
}

/// Resolves a declaration's property bag against the output store. A
/// [`Error::NotYetResolved`] here means the resolver ordered a dependent
/// ahead of its dependency and is escalated to an internal consistency
/// error.
fn resolve_properties(
    spec: &ResourceSpec,
    store: &OutputStore,
) -> Result<IndexMap<String, JsonValue>> {
    let mut resolved = IndexMap::with_capacity(spec.properties.len());
    for (key, value) in &spec.properties {
        let resolved_value = value
            .resolve(&|attr_ref| store.resolve(attr_ref))
            .map_err(|err| match err {
                Error::NotYetResolved {
                    resource,
                    attribute,
                } => Error::internal(format!(
                    "resolver ordering defect: '{resource}.{attribute}' read before it settled \
                     (required by '{}')",
                    spec.name
                )),
                other => other,
            })?;
        resolved.insert(key.clone(), resolved_value);
    }
    Ok(resolved)
}

/// Resolves a property bag from recorded outputs only. Returns `None` when
/// any referenced output is not recorded.
fn plan_resolve(
    spec: &ResourceSpec,
    state: &StateStore,
) -> Option<IndexMap<String, JsonValue>> {
    let mut resolved = IndexMap::with_capacity(spec.properties.len());
    for (key, value) in &spec.properties {
        let resolved_value = value
            .resolve(&|attr_ref| {
                state
                    .get(&attr_ref.resource)
                    .and_then(|record| record.outputs.get(&attr_ref.attribute))
                    .cloned()
                    .ok_or_else(|| Error::NotYetResolved {
                        resource: attr_ref.resource.clone(),
                        attribute: attr_ref.attribute.clone(),
                    })
            })
            .ok()?;
        resolved.insert(key.clone(), resolved_value);
    }
    Some(resolved)
}
