use petgraph::graph::EdgeIndex;
use serde::Serialize;
use tracing::trace;

use crate::ensure;
use crate::error::FederationError;
use crate::query_graph::QueryGraph;
use crate::query_graph::QueryGraphState;
use crate::query_graph::graph_path::ExcludedConditions;
use crate::query_graph::graph_path::ExcludedEdges;
use crate::query_graph::graph_path::operation::OpGraphPathContext;

/// A query graph edge's conditions can be satisfied or not. This says which, and if satisfied,
/// at what cost.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) enum ConditionResolution {
    Satisfied {
        cost: f64,
    },
    Unsatisfied {
        reason: Option<UnsatisfiedConditionReason>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) enum UnsatisfiedConditionReason {
    /// The conditions of a field (its @requires) could be resolved, but the subgraph of the field
    /// has no key usable to come back to it once they are.
    NoPostRequireKey,
}

impl ConditionResolution {
    pub(crate) fn no_conditions() -> Self {
        Self::Satisfied { cost: 0.0 }
    }

    pub(crate) fn unsatisfied_conditions() -> Self {
        Self::Unsatisfied { reason: None }
    }

    pub(crate) fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied { .. })
    }
}

/// How to resolve the conditions of an edge. Only ever called on edges that have conditions.
pub(crate) trait ConditionResolver {
    fn resolve(
        &mut self,
        edge: EdgeIndex,
        context: &OpGraphPathContext,
        excluded_edges: &ExcludedEdges,
        excluded_conditions: &ExcludedConditions,
    ) -> Result<ConditionResolution, FederationError>;
}

pub(crate) enum ConditionResolutionCacheResult {
    /// Cache hit.
    Hit(ConditionResolution),
    /// Cache miss; can be inserted into cache.
    Miss,
    /// The value can't be cached, or an incompatible value is already in cache.
    NotApplicable,
}

/// Caches the resolution of the conditions of each edge, along with the excluded edges that were
/// used to compute it. Excluded edges impact the resolution, so a cached value is only reused for
/// the same excluded edges. Only the first excluded edges seen for an edge are cached: the
/// traversals tend to always exclude the same edges when resolving the same conditions, so this
/// is enough in practice.
#[derive(Default)]
pub(crate) struct ConditionResolverCache {
    edge_states: QueryGraphState<(), (ConditionResolution, ExcludedEdges)>,
}

impl ConditionResolverCache {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    pub(crate) fn contains(
        &self,
        edge: EdgeIndex,
        context: &OpGraphPathContext,
        excluded_edges: &ExcludedEdges,
        excluded_conditions: &ExcludedConditions,
    ) -> ConditionResolutionCacheResult {
        // A value per context and per excluded conditions is not worth caching. The context only
        // holds @skip/@include conditions, which are rare.
        if !context.is_empty() || !excluded_conditions.is_empty() {
            return ConditionResolutionCacheResult::NotApplicable;
        }
        match self.edge_states.edge_state(edge) {
            Some((cached_resolution, cached_excluded_edges))
                if cached_excluded_edges == excluded_edges =>
            {
                ConditionResolutionCacheResult::Hit(cached_resolution.clone())
            }
            Some(_) => ConditionResolutionCacheResult::NotApplicable,
            None => ConditionResolutionCacheResult::Miss,
        }
    }

    pub(crate) fn insert(
        &mut self,
        edge: EdgeIndex,
        resolution: ConditionResolution,
        excluded_edges: ExcludedEdges,
    ) {
        self.edge_states
            .set_edge_state(edge, (resolution, excluded_edges));
    }
}

/// A condition resolver that memoizes, per edge, the resolutions computed by
/// `resolve_without_cache`.
pub(crate) trait CachingConditionResolver {
    fn query_graph(&self) -> &QueryGraph;

    fn resolver_cache(&mut self) -> &mut ConditionResolverCache;

    fn resolve_without_cache(
        &mut self,
        edge: EdgeIndex,
        context: &OpGraphPathContext,
        excluded_edges: &ExcludedEdges,
        excluded_conditions: &ExcludedConditions,
    ) -> Result<ConditionResolution, FederationError>;
}

impl<T: CachingConditionResolver> ConditionResolver for T {
    fn resolve(
        &mut self,
        edge: EdgeIndex,
        context: &OpGraphPathContext,
        excluded_edges: &ExcludedEdges,
        excluded_conditions: &ExcludedConditions,
    ) -> Result<ConditionResolution, FederationError> {
        ensure!(
            self.query_graph().edge_weight(edge)?.conditions.is_some(),
            "Should not have been called for edge without conditions",
        );
        match self
            .resolver_cache()
            .contains(edge, context, excluded_edges, excluded_conditions)
        {
            ConditionResolutionCacheResult::Hit(cached_resolution) => {
                trace!("Condition resolution cache hit for edge {}", edge.index());
                Ok(cached_resolution)
            }
            ConditionResolutionCacheResult::Miss => {
                trace!("Condition resolution cache miss for edge {}", edge.index());
                let resolution =
                    self.resolve_without_cache(edge, context, excluded_edges, excluded_conditions)?;
                self.resolver_cache()
                    .insert(edge, resolution.clone(), excluded_edges.clone());
                Ok(resolution)
            }
            ConditionResolutionCacheResult::NotApplicable => {
                self.resolve_without_cache(edge, context, excluded_edges, excluded_conditions)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use apollo_compiler::Node;
    use apollo_compiler::ast::Argument;
    use apollo_compiler::ast::Directive;
    use apollo_compiler::ast::DirectiveList;
    use apollo_compiler::ast::Value;
    use apollo_compiler::name;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::Supergraph;
    use crate::query_graph::graph_path::operation::OpInlineFragment;
    use crate::query_graph::graph_path::operation::OpPathElement;
    use crate::query_graph::build_query_graph::build_federated_query_graph;
    use crate::subgraph::Subgraph;

    /// Resolves every condition as satisfied, with a cost counting the calls made so far.
    struct CountingResolver {
        query_graph: Arc<QueryGraph>,
        cache: ConditionResolverCache,
        calls: usize,
    }

    impl CachingConditionResolver for CountingResolver {
        fn query_graph(&self) -> &QueryGraph {
            &self.query_graph
        }

        fn resolver_cache(&mut self) -> &mut ConditionResolverCache {
            &mut self.cache
        }

        fn resolve_without_cache(
            &mut self,
            _edge: EdgeIndex,
            _context: &OpGraphPathContext,
            _excluded_edges: &ExcludedEdges,
            _excluded_conditions: &ExcludedConditions,
        ) -> Result<ConditionResolution, FederationError> {
            self.calls += 1;
            Ok(ConditionResolution::Satisfied {
                cost: self.calls as f64,
            })
        }
    }

    fn resolver() -> (CountingResolver, EdgeIndex, EdgeIndex) {
        let supergraph =
            Supergraph::new("type Query { t: T } type T { id: ID! x: Int }").unwrap();
        let subgraphs = [
            Subgraph::parse(
                "S1",
                r#"type Query { t: T } type T @key(fields: "id") { id: ID! }"#,
            )
            .unwrap(),
            Subgraph::parse("S2", r#"type T @key(fields: "id") { id: ID! x: Int }"#).unwrap(),
        ];
        let query_graph = Arc::new(build_federated_query_graph(&supergraph, &subgraphs).unwrap());
        let mut conditioned_edges = query_graph
            .graph()
            .edge_indices()
            .filter(|edge| query_graph.edge_weight(*edge).unwrap().conditions.is_some());
        let first = conditioned_edges.next().unwrap();
        let second = conditioned_edges.next().unwrap();
        (
            CountingResolver {
                query_graph,
                cache: ConditionResolverCache::new(),
                calls: 0,
            },
            first,
            second,
        )
    }

    #[test]
    fn caches_per_edge_for_the_first_excluded_edges() {
        let (mut resolver, edge, other_edge) = resolver();
        let context = OpGraphPathContext::default();
        let no_exclusions = ExcludedEdges::default();
        let first = resolver
            .resolve(edge, &context, &no_exclusions, &Default::default())
            .unwrap();
        let second = resolver
            .resolve(edge, &context, &no_exclusions, &Default::default())
            .unwrap();
        assert_eq!(first, ConditionResolution::Satisfied { cost: 1.0 });
        assert_eq!(second, first);
        assert_eq!(resolver.calls, 1);

        let with_exclusions = no_exclusions.add_item(other_edge);
        let third = resolver
            .resolve(edge, &context, &with_exclusions, &Default::default())
            .unwrap();
        assert_eq!(third, ConditionResolution::Satisfied { cost: 2.0 });
        // Still the value computed with no exclusions.
        let fourth = resolver
            .resolve(edge, &context, &no_exclusions, &Default::default())
            .unwrap();
        assert_eq!(fourth, first);
        assert_eq!(resolver.calls, 2);
    }

    #[test]
    fn does_not_cache_with_a_context() {
        let (mut resolver, edge, _) = resolver();
        let skipped = OpPathElement::InlineFragment(OpInlineFragment {
            parent_type: name!("T"),
            type_condition: None,
            directives: DirectiveList(vec![Node::new(Directive {
                name: name!("skip"),
                arguments: vec![Node::new(Argument {
                    name: name!("if"),
                    value: Node::new(Value::Boolean(true)),
                })],
            })]),
        });
        let context = OpGraphPathContext::default().with_context_of(&skipped);
        resolver
            .resolve(edge, &context, &Default::default(), &Default::default())
            .unwrap();
        resolver
            .resolve(edge, &context, &Default::default(), &Default::default())
            .unwrap();
        assert_eq!(resolver.calls, 2);
    }
}
