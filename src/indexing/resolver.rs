//! Deferred reference resolution.
//!
//! Matches pending references against materialized entities, both on a
//! timer and synchronously after each indexed file. Resolution is
//! name-based and best-effort: exact qualified-name match first, then
//! suffix candidates narrowed by the receiver filter and the
//! disambiguation tiers (same repository, longest suffix, preferred
//! entity kind, shortest qualified name).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use uuid::Uuid;

use crate::model::{RelationType, snake_to_pascal};
use crate::storage::RelationGraph;
use crate::storage::graph::Entity;

/// Outcome of one resolution batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionResult {
    pub resolved: u64,
    pub unresolved: u64,
    pub still_pending: u64,
}

pub struct ReferenceResolver {
    graph: RelationGraph,
    interval: Duration,
    max_attempts: u32,
    batch_size: u32,
    shutdown: AtomicBool,
}

impl ReferenceResolver {
    pub fn new(
        graph: RelationGraph,
        interval_seconds: u64,
        max_attempts: u32,
        batch_size: u32,
    ) -> Self {
        Self {
            graph,
            interval: Duration::from_secs(interval_seconds),
            max_attempts,
            batch_size,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Periodic resolution loop; exits when `stop` is called.
    pub async fn run_forever(self: Arc<Self>) {
        tracing::info!(interval = ?self.interval, "reference resolver started");
        while !self.shutdown.load(Ordering::Relaxed) {
            tokio::time::sleep(self.interval).await;
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            match self.resolve_batch().await {
                Ok(result) if result.resolved > 0 || result.unresolved > 0 => {
                    tracing::info!(
                        resolved = result.resolved,
                        unresolved = result.unresolved,
                        pending = result.still_pending,
                        "resolution pass complete"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!("resolution pass failed: {e}"),
            }
        }
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// One resolution pass over the oldest pending references.
    pub async fn resolve_batch(&self) -> crate::error::StoreResult<ResolutionResult> {
        let pending = self.graph.get_pending_references(self.batch_size).await?;
        let mut result = ResolutionResult::default();

        for reference in pending {
            let target = self
                .find_target(
                    &reference.target_qualified_name,
                    reference.source_repository_id,
                    reference.relation_type,
                    reference.receiver_expr.as_deref(),
                )
                .await?;

            match target {
                Some(target) => {
                    if let Err(e) = self.graph.resolve_reference(reference.id, target.id).await {
                        // Per-reference failures are logged, not fatal
                        tracing::warn!(reference = %reference.id, "promotion failed: {e}");
                        continue;
                    }
                    result.resolved += 1;
                }
                None => {
                    self.graph
                        .mark_reference_unresolved(reference.id, self.max_attempts)
                        .await?;
                    if reference.attempts + 1 >= self.max_attempts {
                        result.unresolved += 1;
                    } else {
                        result.still_pending += 1;
                    }
                }
            }
        }
        Ok(result)
    }

    /// Resolve a target pattern to at most one entity.
    async fn find_target(
        &self,
        pattern: &str,
        source_repository_id: Uuid,
        relation_type: RelationType,
        receiver_expr: Option<&str>,
    ) -> crate::error::StoreResult<Option<Entity>> {
        // Exact match wins outright
        if let Some(exact) = self.graph.get_entity_by_qualified_name(pattern).await? {
            return Ok(Some(exact));
        }

        let suffix = last_segment(pattern);
        let mut candidates = self.graph.get_entities_by_suffix(suffix, 10).await?;

        // Receiver filter: keep only candidates whose qualified name
        // contains the PascalCase form of the receiver's last segment.
        // Zero matches means we abandon rather than resolve wrongly.
        if let Some(receiver) = receiver_expr
            && candidates.len() > 1
        {
            let matched: Vec<Entity> = candidates
                .iter()
                .filter(|c| matches_receiver_context(&c.qualified_name, receiver))
                .cloned()
                .collect();
            if matched.is_empty() {
                tracing::debug!(
                    receiver,
                    pattern,
                    "no candidates match receiver context, skipping"
                );
                return Ok(None);
            }
            candidates = matched;
        }

        match candidates.len() {
            0 => Ok(None),
            1 => Ok(candidates.into_iter().next()),
            _ => Ok(disambiguate(
                candidates,
                pattern,
                source_repository_id,
                relation_type,
            )),
        }
    }
}

/// Last name segment of a pattern, handling both `.` and `::` separators
/// and `*.`-prefixed suffix patterns.
fn last_segment(pattern: &str) -> &str {
    let pattern = pattern.strip_prefix("*.").unwrap_or(pattern);
    let after_scope = pattern.rsplit("::").next().unwrap_or(pattern);
    after_scope.rsplit('.').next().unwrap_or(after_scope)
}

/// Receiver heuristic: `chart_writer` suggests a `ChartWriter` type
/// somewhere in the candidate's qualified name (case-insensitive).
fn matches_receiver_context(candidate_qualified_name: &str, receiver_expr: &str) -> bool {
    let last = receiver_expr
        .rsplit('.')
        .next()
        .unwrap_or(receiver_expr);
    let type_hint = snake_to_pascal(last).to_lowercase();
    if type_hint.is_empty() {
        return true;
    }
    candidate_qualified_name.to_lowercase().contains(&type_hint)
}

/// Tiered narrowing. Each tier keeps its survivors when non-empty; the
/// final tie-break picks the shortest qualified name (most direct
/// definition). Pure function of its inputs.
fn disambiguate(
    candidates: Vec<Entity>,
    pattern: &str,
    source_repository_id: Uuid,
    relation_type: RelationType,
) -> Option<Entity> {
    let mut working = candidates;

    // Tier 1: same-repository preference
    let same_repo: Vec<Entity> = working
        .iter()
        .filter(|c| c.repository_id == source_repository_id)
        .cloned()
        .collect();
    if same_repo.len() == 1 {
        return same_repo.into_iter().next();
    }
    if !same_repo.is_empty() {
        working = same_repo;
    }

    // Tier 2: longest suffix match against the full pattern
    let dotted: Vec<Entity> = working
        .iter()
        .filter(|c| c.qualified_name.ends_with(pattern))
        .cloned()
        .collect();
    if dotted.len() == 1 {
        return dotted.into_iter().next();
    }
    if !dotted.is_empty() {
        working = dotted;
    }

    // Tier 3: entity kinds preferred for the relation
    if working.len() > 1
        && let Some(preferred) = relation_type.preferred_targets()
    {
        let typed: Vec<Entity> = working
            .iter()
            .filter(|c| preferred.contains(&c.entity_type))
            .cloned()
            .collect();
        if typed.len() == 1 {
            return typed.into_iter().next();
        }
        if !typed.is_empty() {
            working = typed;
        }
    }

    // Tier 4: shortest qualified name
    working.sort_by_key(|c| c.qualified_name.len());
    working.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CodeEntity, EntityKind, FunctionDetail, MethodDetail, PendingRef, ReferenceStatus};
    use crate::storage::StateDb;

    fn entity(repo: Uuid, file: Uuid, qualified: &str, kind: EntityKind) -> CodeEntity {
        let simple = qualified
            .rsplit("::")
            .next()
            .unwrap()
            .rsplit('.')
            .next()
            .unwrap()
            .to_string();
        CodeEntity::new(repo, file, "python", simple, qualified, 1, 5, kind)
    }

    fn method(repo: Uuid, file: Uuid, qualified: &str) -> CodeEntity {
        let parent = qualified.rsplit_once('.').map(|(p, _)| p).unwrap_or("");
        entity(
            repo,
            file,
            qualified,
            EntityKind::Method(MethodDetail {
                parent_class: parent.to_string(),
                ..Default::default()
            }),
        )
    }

    async fn setup() -> (StateDb, RelationGraph, ReferenceResolver, Uuid) {
        let db = StateDb::in_memory().await.unwrap();
        let graph = RelationGraph::new(&db);
        let resolver = ReferenceResolver::new(graph.clone(), 60, 3, 100);
        let repo = db.create_repository("a").await.unwrap();
        (db, graph, resolver, repo)
    }

    fn pending(source: &CodeEntity, target: &str, receiver: Option<&str>) -> PendingRef {
        PendingRef {
            source_entity_id: source.id,
            source_qualified_name: source.qualified_name.clone(),
            target_qualified_name: target.to_string(),
            relation_type: RelationType::Calls,
            line_number: Some(3),
            context_snippet: None,
            receiver_expr: receiver.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_exact_match_resolves() {
        let (_db, graph, resolver, repo) = setup().await;
        let file = Uuid::new_v4();

        let caller = method(repo, file, "m.Service.run");
        let callee = method(repo, file, "m.Service.helper");
        graph.add_entity(&caller).await.unwrap();
        graph.add_entity(&callee).await.unwrap();
        graph
            .add_pending_reference(repo, &pending(&caller, "m.Service.helper", None))
            .await
            .unwrap();

        let result = resolver.resolve_batch().await.unwrap();
        assert_eq!(result.resolved, 1);

        let incoming = graph.get_incoming_relations(callee.id).await.unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].relation_type, RelationType::Calls);
    }

    #[tokio::test]
    async fn test_suffix_match_resolves_single_candidate() {
        let (_db, graph, resolver, repo) = setup().await;
        let file = Uuid::new_v4();

        let caller = method(repo, file, "m.Service.run");
        let callee = method(repo, file, "m.Service.helper");
        graph.add_entity(&caller).await.unwrap();
        graph.add_entity(&callee).await.unwrap();
        graph
            .add_pending_reference(repo, &pending(&caller, "Service.helper", None))
            .await
            .unwrap();

        let result = resolver.resolve_batch().await.unwrap();
        assert_eq!(result.resolved, 1);
    }

    #[tokio::test]
    async fn test_receiver_aware_disambiguation() {
        let (db, graph, resolver, repo_a) = setup().await;
        let repo_b = db.create_repository("b").await.unwrap();
        let file = Uuid::new_v4();

        // Two candidates for suffix "get" in different repositories
        let chart_get = method(repo_a, file, "charts.ChartWriter.get");
        let cache_get = method(repo_b, file, "cache.CacheManager.get");
        let caller = method(repo_b, file, "app.Main.run");
        for e in [&chart_get, &cache_get, &caller] {
            graph.add_entity(e).await.unwrap();
        }

        // receiver chart_writer → ChartWriter wins despite the repo tier
        let ref_id = graph
            .add_pending_reference(repo_b, &pending(&caller, "get", Some("chart_writer")))
            .await
            .unwrap();

        let result = resolver.resolve_batch().await.unwrap();
        assert_eq!(result.resolved, 1);

        let resolved = graph.get_pending_reference(ref_id).await.unwrap().unwrap();
        assert_eq!(resolved.resolved_target_id, Some(chart_get.id));

        let relation = &graph.get_incoming_relations(chart_get.id).await.unwrap()[0];
        assert!(relation.is_cross_repository);
    }

    #[tokio::test]
    async fn test_receiver_mismatch_abandons_instead_of_wrong_pick() {
        let (_db, graph, resolver, repo) = setup().await;
        let file = Uuid::new_v4();

        let writer_get = method(repo, file, "charts.ChartWriter.get");
        let cache_get = method(repo, file, "cache.CacheManager.get");
        let caller = method(repo, file, "app.Main.run");
        for e in [&writer_get, &cache_get, &caller] {
            graph.add_entity(e).await.unwrap();
        }

        let ref_id = graph
            .add_pending_reference(repo, &pending(&caller, "get", Some("http_session")))
            .await
            .unwrap();

        let result = resolver.resolve_batch().await.unwrap();
        assert_eq!(result.resolved, 0);
        assert_eq!(result.still_pending, 1);

        let unresolved = graph.get_pending_reference(ref_id).await.unwrap().unwrap();
        assert_eq!(unresolved.status, ReferenceStatus::Pending);
        assert_eq!(unresolved.attempts, 1);
    }

    #[tokio::test]
    async fn test_same_repository_tier() {
        let (db, graph, resolver, repo_a) = setup().await;
        let repo_b = db.create_repository("b").await.unwrap();
        let file = Uuid::new_v4();

        let local = entity(
            repo_a,
            file,
            "local.helper",
            EntityKind::Function(FunctionDetail::default()),
        );
        let remote = entity(
            repo_b,
            file,
            "remote.helper",
            EntityKind::Function(FunctionDetail::default()),
        );
        let caller = entity(
            repo_a,
            file,
            "local.main",
            EntityKind::Function(FunctionDetail::default()),
        );
        for e in [&local, &remote, &caller] {
            graph.add_entity(e).await.unwrap();
        }

        let ref_id = graph
            .add_pending_reference(repo_a, &pending(&caller, "helper", None))
            .await
            .unwrap();

        resolver.resolve_batch().await.unwrap();
        let resolved = graph.get_pending_reference(ref_id).await.unwrap().unwrap();
        assert_eq!(resolved.resolved_target_id, Some(local.id));
    }

    #[tokio::test]
    async fn test_entity_type_tier_prefers_callable_for_calls() {
        let (_db, graph, resolver, repo) = setup().await;
        let file = Uuid::new_v4();

        // Same-length names so only the kind tier discriminates
        let variable = entity(
            repo,
            file,
            "aa.process",
            EntityKind::Variable(Default::default()),
        );
        let function = entity(
            repo,
            file,
            "bb.process",
            EntityKind::Function(FunctionDetail::default()),
        );
        let caller = entity(
            repo,
            file,
            "cc.main",
            EntityKind::Function(FunctionDetail::default()),
        );
        for e in [&variable, &function, &caller] {
            graph.add_entity(e).await.unwrap();
        }

        let ref_id = graph
            .add_pending_reference(repo, &pending(&caller, "process", None))
            .await
            .unwrap();

        resolver.resolve_batch().await.unwrap();
        let resolved = graph.get_pending_reference(ref_id).await.unwrap().unwrap();
        assert_eq!(resolved.resolved_target_id, Some(function.id));
    }

    #[tokio::test]
    async fn test_unresolved_after_attempt_budget() {
        let (_db, graph, resolver, repo) = setup().await;
        let file = Uuid::new_v4();
        let caller = method(repo, file, "m.Service.run");
        graph.add_entity(&caller).await.unwrap();

        let ref_id = graph
            .add_pending_reference(repo, &pending(&caller, "missing_fn", None))
            .await
            .unwrap();

        resolver.resolve_batch().await.unwrap();
        resolver.resolve_batch().await.unwrap();
        let third = resolver.resolve_batch().await.unwrap();
        assert_eq!(third.unresolved, 1);

        let reference = graph.get_pending_reference(ref_id).await.unwrap().unwrap();
        assert_eq!(reference.status, ReferenceStatus::Unresolved);
        assert_eq!(reference.attempts, 3);

        // Exhausted references leave the pending set
        let fourth = resolver.resolve_batch().await.unwrap();
        assert_eq!(fourth, ResolutionResult::default());
    }

    #[test]
    fn test_last_segment_handles_both_separators() {
        assert_eq!(last_segment("a.b.c"), "c");
        assert_eq!(last_segment("std::collections::HashMap"), "HashMap");
        assert_eq!(last_segment("*.BaseValidator"), "BaseValidator");
        assert_eq!(last_segment("plain"), "plain");
    }

    #[test]
    fn test_receiver_context_heuristic() {
        assert!(matches_receiver_context("myapp.ChartWriter.get", "chart_writer"));
        assert!(matches_receiver_context("cache.Redis.get", "ctx.redis"));
        assert!(!matches_receiver_context("cache.CacheManager.get", "chart_writer"));
    }

    #[test]
    fn test_disambiguation_is_deterministic() {
        let repo = Uuid::new_v4();
        let file = Uuid::new_v4();
        let a = entity(
            repo,
            file,
            "pkg.module.helper",
            EntityKind::Function(FunctionDetail::default()),
        );
        let b = entity(
            repo,
            file,
            "m.helper",
            EntityKind::Function(FunctionDetail::default()),
        );

        for _ in 0..3 {
            let chosen = disambiguate(
                vec![a.clone(), b.clone()],
                "helper",
                repo,
                RelationType::Calls,
            )
            .unwrap();
            // Shortest qualified name wins the final tier every time
            assert_eq!(chosen.qualified_name, "m.helper");
        }
    }
}
