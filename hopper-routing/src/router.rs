//! ABOUTME: The layered router - explicit, patterns, similar tasks, rules, fallback
//! ABOUTME: Decisions are computed over snapshots and committed under the task lock

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use hopper_core::{
    Delegation, DelegationType, HopperError, Instance, InstanceScope, Result, Task,
};
use hopper_delegation::DelegationEngine;
use hopper_instances::InstanceRegistry;
use hopper_memory::{LearningEngine, RoutingSuggestion, SuggestionSource};
use hopper_storage::TaskStore;

use crate::rules::{RuleContext, RulesEngine};

/// Which layer of the resolver produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Task named its project
    Explicit,
    /// A consolidated pattern matched
    Learning,
    /// Similar past tasks voted
    SimilarTask,
    /// The declarative rules engine matched
    Rules,
    /// Deterministic fallback balancing
    Default,
}

impl RoutingStrategy {
    /// Canonical string form, stored on episodes
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Learning => "learning",
            Self::SimilarTask => "similar_task",
            Self::Rules => "rules",
            Self::Default => "default",
        }
    }
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a routing decision
#[derive(Debug, Clone, Serialize)]
pub struct RoutingResult {
    /// Instance the decision was computed from
    pub source_instance_id: Option<String>,
    /// Chosen target; None means "handle at the source"
    pub target_instance_id: Option<String>,
    /// Decision confidence in [0, 1]
    pub confidence: f64,
    /// Layer that decided
    pub strategy: RoutingStrategy,
    /// Why
    pub reasoning: String,
    /// Pattern behind a learning decision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_id: Option<String>,
    /// Suggestion behind a learning / similar-task decision
    #[serde(skip)]
    pub suggestion: Option<RoutingSuggestion>,
}

impl RoutingResult {
    fn handle_locally(reasoning: impl Into<String>) -> Self {
        Self {
            source_instance_id: None,
            target_instance_id: None,
            confidence: 0.0,
            strategy: RoutingStrategy::Rules,
            reasoning: reasoning.into(),
            pattern_id: None,
            suggestion: None,
        }
    }
}

/// Router tuning knobs
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Soft budget for a routing decision; on expiry the router falls
    /// through to the default strategy at confidence 0.5
    pub soft_budget: Duration,
    /// Bounded internal retries when the delegation commit loses a race
    pub conflict_retries: usize,
    /// Suggestions consulted from the learning engine
    pub suggestion_limit: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            soft_budget: Duration::from_millis(250),
            conflict_retries: 3,
            suggestion_limit: 3,
        }
    }
}

/// The routing engine
///
/// Stateless between calls apart from the round-robin cursor; all durable
/// state lives in the stores it reads.
pub struct Router {
    registry: Arc<InstanceRegistry>,
    tasks: Arc<dyn TaskStore>,
    delegations: Arc<DelegationEngine>,
    rules: RulesEngine,
    learning: Option<Arc<LearningEngine>>,
    config: RouterConfig,
    round_robin: AtomicUsize,
}

impl Router {
    /// Wire a router
    #[must_use]
    pub fn new(
        registry: Arc<InstanceRegistry>,
        tasks: Arc<dyn TaskStore>,
        delegations: Arc<DelegationEngine>,
        rules: RulesEngine,
        learning: Option<Arc<LearningEngine>>,
    ) -> Self {
        Self {
            registry,
            tasks,
            delegations,
            rules,
            learning,
            config: RouterConfig::default(),
            round_robin: AtomicUsize::new(0),
        }
    }

    /// Override the tuning knobs
    #[must_use]
    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Delegation validity filter.
    ///
    /// A target is valid when it is not the source, is routable, and is
    /// either a child of the source, a sibling (reassignment), or sits at
    /// the same or a lower level of the scope hierarchy.
    #[must_use]
    pub fn can_delegate(source: &Instance, target: &Instance) -> bool {
        if source.id == target.id {
            return false;
        }
        if !target.status.is_routable() {
            return false;
        }
        if target.parent_id.as_deref() == Some(source.id.as_str()) {
            return true;
        }
        if source.parent_id.is_some() && source.parent_id == target.parent_id {
            return true;
        }
        target.scope.rank() >= source.scope.rank()
    }

    /// Id-based [`Router::can_delegate`], resolving both instances
    pub async fn can_delegate_ids(&self, source_id: &str, target_id: &str) -> Result<bool> {
        let source = self.registry.get_required(source_id).await?;
        let target = self.registry.get_required(target_id).await?;
        Ok(Self::can_delegate(&source, &target))
    }

    /// Decide where a task should go.
    ///
    /// Runs under the soft budget; if the ladder does not finish in time
    /// the router falls through to the default strategy at confidence 0.5.
    pub async fn route(&self, task_id: &str) -> Result<RoutingResult> {
        let (task, source) = self.load(task_id).await?;

        let budget_ms = u64::try_from(self.config.soft_budget.as_millis()).unwrap_or(u64::MAX);
        let decided = match tokio::time::timeout(self.config.soft_budget, self.decide(&task, &source))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(task_id, budget_ms, "routing budget expired, using default strategy");
                match self.default_target(&source).await {
                    Ok(mut result) => {
                        result.confidence = 0.5;
                        result.reasoning =
                            "routing budget expired, fell back to default balancing".into();
                        Ok(result)
                    }
                    // nothing to fall back to either: surface the timeout
                    Err(HopperError::RoutingUnavailable { .. }) => Err(HopperError::Timeout {
                        op: "route".into(),
                        budget_ms,
                    }),
                    Err(err) => Err(err),
                }
            }
        };

        let mut result = decided?;
        if result.source_instance_id.is_none() {
            result.source_instance_id = Some(source.id);
        }
        Ok(result)
    }

    /// Routing suggestions for a task (learning engine view)
    pub async fn suggestions(&self, task_id: &str, limit: usize) -> Result<Vec<RoutingSuggestion>> {
        let (task, _) = self.load(task_id).await?;
        match &self.learning {
            Some(learning) => learning.get_routing_suggestions(&task, limit).await,
            None => Ok(Vec::new()),
        }
    }

    /// Decide and commit: route the task and create the delegation.
    ///
    /// The commit re-validates under the task lock; when it loses the race
    /// (`ConflictingUpdate`) the router re-reads and retries up to the
    /// configured bound before surfacing the conflict. A decision to handle
    /// locally commits nothing.
    pub async fn dispatch(
        &self,
        task_id: &str,
        delegation_type: DelegationType,
    ) -> Result<(RoutingResult, Option<Delegation>)> {
        let mut attempt = 0;
        loop {
            let result = self.route(task_id).await?;
            let Some(target_id) = result.target_instance_id.clone() else {
                return Ok((result, None));
            };

            match self
                .delegations
                .delegate_expecting(
                    task_id,
                    result.source_instance_id.as_deref(),
                    &target_id,
                    delegation_type,
                    None,
                    None,
                )
                .await
            {
                Ok(delegation) => {
                    self.record(task_id, &result).await?;
                    info!(task_id, target = %target_id, strategy = %result.strategy, "dispatched task");
                    return Ok((result, Some(delegation)));
                }
                Err(HopperError::ConflictingUpdate) if attempt < self.config.conflict_retries => {
                    attempt += 1;
                    debug!(task_id, attempt, "delegation commit lost the race, re-routing");
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn record(&self, task_id: &str, result: &RoutingResult) -> Result<()> {
        let Some(learning) = &self.learning else {
            return Ok(());
        };
        let Some(target) = &result.target_instance_id else {
            return Ok(());
        };
        let Some(task) = self.tasks.get(task_id).await? else {
            return Ok(());
        };

        learning
            .record_routing(
                &task,
                target,
                result.confidence,
                result.strategy.as_str(),
                Some(result.reasoning.clone()),
                result.suggestion.as_ref(),
            )
            .await?;
        Ok(())
    }

    async fn load(&self, task_id: &str) -> Result<(Task, Instance)> {
        let task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| HopperError::not_found("task", task_id))?;
        let source_id = task.instance_id.clone().ok_or_else(|| {
            HopperError::RoutingUnavailable {
                reason: format!("task {task_id} has no holding instance"),
            }
        })?;
        let source = self.registry.get_required(&source_id).await?;
        Ok((task, source))
    }

    async fn decide(&self, task: &Task, source: &Instance) -> Result<RoutingResult> {
        match source.scope {
            InstanceScope::Global | InstanceScope::Federated => {
                self.decide_from_global(task, source).await
            }
            InstanceScope::Orchestration => Ok(RoutingResult::handle_locally(
                "orchestration instances execute, they don't delegate",
            )),
            _ => self.decide_from_project(task, source).await,
        }
    }

    /// The full resolver ladder, for routing scopes
    async fn decide_from_global(&self, task: &Task, source: &Instance) -> Result<RoutingResult> {
        // 1. explicit project assignment
        if let Some(project) = &task.project {
            if let Some(target) = self
                .registry
                .find_routable(InstanceScope::Project, project)
                .await?
            {
                if Self::can_delegate(source, &target) {
                    return Ok(RoutingResult {
                        source_instance_id: Some(source.id.clone()),
                        target_instance_id: Some(target.id),
                        confidence: 1.0,
                        strategy: RoutingStrategy::Explicit,
                        reasoning: format!("task names project {project}"),
                        pattern_id: None,
                        suggestion: None,
                    });
                }
            }
        }

        // 2-3. learned patterns, then similar-task analysis
        if let Some(learning) = &self.learning {
            let suggestions = learning
                .get_routing_suggestions(task, self.config.suggestion_limit)
                .await?;
            for suggestion in suggestions {
                let Some(target) = self.registry.get(&suggestion.target_instance).await? else {
                    continue;
                };
                if !Self::can_delegate(source, &target) {
                    continue;
                }

                let strategy = match suggestion.source {
                    SuggestionSource::SimilarTask => RoutingStrategy::SimilarTask,
                    _ => RoutingStrategy::Learning,
                };
                debug!(task_id = %task.id, target = %target.id, strategy = %strategy, "suggestion accepted");
                return Ok(RoutingResult {
                    source_instance_id: Some(source.id.clone()),
                    target_instance_id: Some(target.id),
                    confidence: suggestion.confidence,
                    strategy,
                    reasoning: suggestion.reasoning.clone(),
                    pattern_id: suggestion.pattern_id.clone(),
                    suggestion: Some(suggestion),
                });
            }
        }

        // 4. declarative rules
        if !self.rules.is_empty() {
            let context = RuleContext::from(task);
            if let Some(decision) = self.rules.decide(&context) {
                if let Some(target) = self.resolve_destination(&decision.destination).await? {
                    if Self::can_delegate(source, &target) {
                        return Ok(RoutingResult {
                            source_instance_id: Some(source.id.clone()),
                            target_instance_id: Some(target.id),
                            confidence: decision.score,
                            strategy: RoutingStrategy::Rules,
                            reasoning: format!("rule '{}': {}", decision.rule_name, decision.reason),
                            pattern_id: None,
                            suggestion: None,
                        });
                    }
                }
            }
        }

        // 5. deterministic fallback
        self.default_target(source).await
    }

    /// Project-scope decision: the complexity gate
    async fn decide_from_project(&self, task: &Task, source: &Instance) -> Result<RoutingResult> {
        let auto_delegate = source.config_bool("auto_delegate", true);
        let threshold = source.config_u64("orchestration_threshold", 3);
        let complexity = u64::from(task.complexity());

        let delegating_scope = matches!(source.scope, InstanceScope::Project);
        if !delegating_scope || !auto_delegate || complexity < threshold {
            return Ok(RoutingResult::handle_locally(format!(
                "task complexity ({complexity}) within threshold ({threshold}), handling directly"
            )));
        }

        let orchestrations = self
            .registry
            .routable_children(&source.id, Some(InstanceScope::Orchestration))
            .await?;

        let mut best: Option<(usize, Instance)> = None;
        for orchestration in orchestrations {
            let load = self.active_load(&orchestration.id).await?;
            if best.as_ref().is_none_or(|(n, _)| load < *n) {
                best = Some((load, orchestration));
            }
        }

        match best {
            Some((_, target)) => Ok(RoutingResult {
                source_instance_id: Some(source.id.clone()),
                target_instance_id: Some(target.id),
                confidence: 0.5,
                strategy: RoutingStrategy::Rules,
                reasoning: format!(
                    "task complexity ({complexity}) exceeds threshold ({threshold}), delegating to orchestration"
                ),
                pattern_id: None,
                suggestion: None,
            }),
            None => Ok(RoutingResult::handle_locally(
                "no orchestration available, handling directly",
            )),
        }
    }

    /// Resolve a rule destination: instance id first, then project name
    async fn resolve_destination(&self, destination: &str) -> Result<Option<Instance>> {
        if let Some(by_id) = self.registry.get(destination).await? {
            if by_id.status.is_routable() {
                return Ok(Some(by_id));
            }
        }
        self.registry
            .find_routable(InstanceScope::Project, destination)
            .await
    }

    /// Deterministic load balancer over the source's valid children
    async fn default_target(&self, source: &Instance) -> Result<RoutingResult> {
        let children = self.registry.routable_children(&source.id, None).await?;
        let candidates: Vec<Instance> = children
            .into_iter()
            .filter(|c| Self::can_delegate(source, c))
            .collect();

        if candidates.is_empty() {
            return Err(HopperError::RoutingUnavailable {
                reason: format!("no valid delegation candidate under {}", source.id),
            });
        }

        let strategy = source.config_str("fallback_strategy", "round_robin");
        let target = if strategy == "least_loaded" {
            let mut best: Option<(usize, Instance)> = None;
            for candidate in candidates {
                let load = self.active_load(&candidate.id).await?;
                if best.as_ref().is_none_or(|(n, _)| load < *n) {
                    best = Some((load, candidate));
                }
            }
            // candidates was non-empty, so best is set
            best.map(|(_, i)| i)
        } else {
            let cursor = self.round_robin.fetch_add(1, Ordering::Relaxed);
            Some(candidates[cursor % candidates.len()].clone())
        };

        let Some(target) = target else {
            return Err(HopperError::RoutingUnavailable {
                reason: format!("no valid delegation candidate under {}", source.id),
            });
        };

        Ok(RoutingResult {
            source_instance_id: Some(source.id.clone()),
            reasoning: format!("fallback {strategy} balancing chose {}", target.name),
            target_instance_id: Some(target.id),
            confidence: 0.5,
            strategy: RoutingStrategy::Default,
            pattern_id: None,
            suggestion: None,
        })
    }

    async fn active_load(&self, instance_id: &str) -> Result<usize> {
        use hopper_core::TaskStatus;
        use hopper_storage::{Page, TaskFilter};

        let filter = TaskFilter {
            statuses: vec![TaskStatus::Claimed, TaskStatus::InProgress],
            instance_id: Some(instance_id.to_string()),
            ..TaskFilter::default()
        };
        let (_, total) = self
            .tasks
            .list(
                &filter,
                Page {
                    offset: 0,
                    limit: 0,
                },
            )
            .await?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopper_instances::InstanceSpec;
    use hopper_storage::{InMemoryTaskStore, TaskSpec};
    use serde_json::json;

    async fn tree() -> (Arc<InstanceRegistry>, Arc<InMemoryTaskStore>, Instance) {
        let registry = InstanceRegistry::shared();
        let tasks = Arc::new(InMemoryTaskStore::new());
        let global = registry
            .create(InstanceSpec::new("root", InstanceScope::Global))
            .await
            .unwrap();
        (registry, tasks, global)
    }

    fn router(
        registry: &Arc<InstanceRegistry>,
        tasks: &Arc<InMemoryTaskStore>,
        rules: RulesEngine,
    ) -> Router {
        let delegations = Arc::new(DelegationEngine::new(
            Arc::clone(registry),
            tasks.clone() as Arc<dyn TaskStore>,
        ));
        Router::new(
            Arc::clone(registry),
            tasks.clone() as Arc<dyn TaskStore>,
            delegations,
            rules,
            None,
        )
    }

    async fn seed_task(tasks: &InMemoryTaskStore, spec: TaskSpec, at: &Instance) -> Task {
        let task = tasks.create(spec).await.unwrap();
        tasks
            .assign_instance(&task.id, None, Some(at.id.clone()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn can_delegate_filter() {
        let (registry, _tasks, global) = tree().await;
        let project = registry
            .create(InstanceSpec::new("alpha", InstanceScope::Project).with_parent(&global.id))
            .await
            .unwrap();
        let sibling = registry
            .create(InstanceSpec::new("beta", InstanceScope::Project).with_parent(&global.id))
            .await
            .unwrap();

        // parent -> child
        assert!(Router::can_delegate(&global, &project));
        // sibling -> sibling (reassignment)
        assert!(Router::can_delegate(&project, &sibling));
        // child -> parent blocked by scope rank
        assert!(!Router::can_delegate(&project, &global));
        // never to self
        assert!(!Router::can_delegate(&global, &global));
    }

    #[tokio::test]
    async fn rules_route_to_named_project() {
        let (registry, tasks, global) = tree().await;
        registry
            .create(InstanceSpec::new("data-platform", InstanceScope::Project).with_parent(&global.id))
            .await
            .unwrap();

        let rules = RulesEngine::new(crate::rules::load_rules_from_str(
            "rules:\n  - id: db\n    type: keyword\n    name: db\n    destination: data-platform\n    keywords: [database]\n",
        ).unwrap());
        let router = router(&registry, &tasks, rules);

        let task = seed_task(&tasks, TaskSpec::titled("database migration"), &global).await;
        let result = router.route(&task.id).await.unwrap();

        assert_eq!(result.strategy, RoutingStrategy::Rules);
        assert!(result.target_instance_id.is_some());
    }

    #[tokio::test]
    async fn fallback_round_robin_rotates() {
        let (registry, tasks, global) = tree().await;
        let a = registry
            .create(InstanceSpec::new("a", InstanceScope::Project).with_parent(&global.id))
            .await
            .unwrap();
        let b = registry
            .create(InstanceSpec::new("b", InstanceScope::Project).with_parent(&global.id))
            .await
            .unwrap();

        let router = router(&registry, &tasks, RulesEngine::default());
        let task = seed_task(&tasks, TaskSpec::titled("anything"), &global).await;

        let first = router.route(&task.id).await.unwrap();
        let second = router.route(&task.id).await.unwrap();
        assert_eq!(first.strategy, RoutingStrategy::Default);
        assert!((first.confidence - 0.5).abs() < 1e-9);

        let targets: Vec<String> = [first, second]
            .into_iter()
            .filter_map(|r| r.target_instance_id)
            .collect();
        assert!(targets.contains(&a.id));
        assert!(targets.contains(&b.id));
    }

    #[tokio::test]
    async fn no_candidates_is_unavailable() {
        let (registry, tasks, global) = tree().await;
        let router = router(&registry, &tasks, RulesEngine::default());
        let task = seed_task(&tasks, TaskSpec::titled("stranded"), &global).await;

        let err = router.route(&task.id).await.unwrap_err();
        assert!(matches!(err, HopperError::RoutingUnavailable { .. }));
    }

    #[tokio::test]
    async fn dispatch_commits_delegation() {
        let (registry, tasks, global) = tree().await;
        registry
            .create(InstanceSpec::new("only", InstanceScope::Project).with_parent(&global.id))
            .await
            .unwrap();

        let router = router(&registry, &tasks, RulesEngine::default());
        let task = seed_task(&tasks, TaskSpec::titled("work"), &global).await;

        let (result, delegation) = router.dispatch(&task.id, DelegationType::Route).await.unwrap();
        let delegation = delegation.unwrap();
        assert_eq!(
            Some(delegation.target_instance_id.as_str()),
            result.target_instance_id.as_deref()
        );

        let task = tasks.get(&task.id).await.unwrap().unwrap();
        assert_eq!(task.instance_id, result.target_instance_id);
    }

    #[tokio::test]
    async fn project_complexity_gate() {
        let (registry, tasks, global) = tree().await;
        let project = registry
            .create(
                InstanceSpec::new("proj", InstanceScope::Project)
                    .with_parent(&global.id)
                    .with_config("orchestration_threshold", json!(3)),
            )
            .await
            .unwrap();
        let orch = registry
            .create(InstanceSpec::new("workers", InstanceScope::Orchestration).with_parent(&project.id))
            .await
            .unwrap();

        let router = router(&registry, &tasks, RulesEngine::default());

        // complexity 3: long description + high priority
        let mut complex = TaskSpec::titled("big one");
        complex.description = Some("d".repeat(600));
        complex.priority = hopper_core::TaskPriority::High;
        let complex = seed_task(&tasks, complex, &project).await;

        let result = router.route(&complex.id).await.unwrap();
        assert_eq!(result.target_instance_id.as_deref(), Some(orch.id.as_str()));

        // complexity 2: same description, low priority
        let mut simple = TaskSpec::titled("small one");
        simple.description = Some("d".repeat(600));
        simple.priority = hopper_core::TaskPriority::Low;
        let simple = seed_task(&tasks, simple, &project).await;

        let result = router.route(&simple.id).await.unwrap();
        assert!(result.target_instance_id.is_none());

        let (_, delegation) = router.dispatch(&simple.id, DelegationType::Route).await.unwrap();
        assert!(delegation.is_none());
    }
}
