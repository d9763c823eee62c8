use std::fmt::Display;
use std::sync::Arc;

use either::Either;
use indexmap::IndexSet;
use itertools::Itertools;
use petgraph::graph::EdgeIndex;
use petgraph::visit::EdgeRef;

use crate::bail;
use crate::composition::satisfiability::satisfiability_error::ValidationError;
use crate::ensure;
use crate::error::FederationError;
use crate::query_graph::QueryGraph;
use crate::query_graph::QueryGraphEdgeTransition;
use crate::query_graph::QueryGraphNodeType;
use crate::query_graph::condition_resolver::ConditionResolution;
use crate::query_graph::condition_resolver::ConditionResolver;
use crate::query_graph::graph_path::transition::TransitionGraphPath;
use crate::schema::position::SchemaRootDefinitionKind;
use crate::utils::logging::snapshot;

/// A position of the validation: a path in the supergraph API query graph, and all the federated
/// query graph paths that can follow it.
pub struct ValidationState {
    /// Path in the supergraph (i.e. the API schema query graph) corresponding to the current state.
    supergraph_path: TransitionGraphPath,
    /// All the possible paths we could be in the subgraphs.
    subgraph_paths: Vec<TransitionGraphPath>,
}

/// What following a supergraph edge from a validation state leads to.
pub(crate) enum TransitionOutcome {
    Advanced(ValidationState),
    /// The edge is a cast that no subgraph path can ever be at: there is nothing to validate.
    Impossible,
    Unsatisfiable(ValidationError),
}

impl ValidationState {
    /// The state at the root of the given kind: the supergraph root, and each subgraph root of
    /// that kind.
    pub(crate) fn new(
        api_schema_query_graph: Arc<QueryGraph>,
        federated_query_graph: Arc<QueryGraph>,
        root_kind: SchemaRootDefinitionKind,
    ) -> Result<Self, FederationError> {
        let Some(federated_root_node) = federated_query_graph
            .root_kinds_to_nodes()?
            .get(&root_kind)
            .copied()
        else {
            bail!(
                "The supergraph shouldn't have a {} root if no subgraphs have one",
                root_kind
            );
        };
        let federated_root_node_weight = federated_query_graph.node_weight(federated_root_node)?;
        ensure!(
            federated_root_node_weight.type_ == QueryGraphNodeType::FederatedRootType(root_kind),
            "Unexpected node type {} for federated query graph root (expected {})",
            federated_root_node_weight.type_,
            QueryGraphNodeType::FederatedRootType(root_kind),
        );
        let initial_subgraph_path =
            TransitionGraphPath::new(federated_query_graph.clone(), federated_root_node)?;
        let Some(supergraph_path) =
            TransitionGraphPath::from_graph_root(api_schema_query_graph, root_kind)?
        else {
            bail!("The supergraph has no {} root", root_kind);
        };
        Ok(Self {
            supergraph_path,
            subgraph_paths: federated_query_graph
                .out_edges(federated_root_node)
                .into_iter()
                .map(|edge_ref| {
                    initial_subgraph_path.add(
                        QueryGraphEdgeTransition::SubgraphEnteringTransition,
                        Some(edge_ref.id()),
                        ConditionResolution::no_conditions(),
                    )
                })
                .process_results(|iter| iter.collect())?,
        })
    }

    pub fn supergraph_path(&self) -> &TransitionGraphPath {
        &self.supergraph_path
    }

    pub fn subgraph_paths(&self) -> &[TransitionGraphPath] {
        &self.subgraph_paths
    }

    /// The subgraphs the subgraph paths currently end in, in order of first appearance.
    pub(crate) fn current_subgraph_names(&self) -> Result<IndexSet<Arc<str>>, FederationError> {
        self.subgraph_paths
            .iter()
            .map(|path| Ok(path.graph().node_weight(path.tail())?.source.clone()))
            .process_results(|iter| iter.collect())
    }

    /// Follows the given supergraph edge in every subgraph path.
    ///
    /// Subgraph paths that cannot follow it are dropped, and their dead ends are reported if no
    /// subgraph path can.
    pub(crate) fn validate_transition(
        &self,
        supergraph_edge: EdgeIndex,
        condition_resolver: &mut impl ConditionResolver,
    ) -> Result<TransitionOutcome, FederationError> {
        let supergraph_graph = self.supergraph_path.graph();
        let edge_weight = supergraph_graph.edge_weight(supergraph_edge)?;
        ensure!(
            edge_weight.conditions.is_none(),
            "Supergraph edges should not have conditions ({})",
            edge_weight,
        );
        let transition = &edge_weight.transition;
        let target_type = supergraph_graph
            .edge_tail_weight(supergraph_edge)?
            .type_
            .type_name()?;

        let mut new_subgraph_paths = Vec::new();
        let mut dead_ends = Vec::new();
        for path in &self.subgraph_paths {
            match path.advance_with_transition(transition, target_type, condition_resolver)? {
                Either::Left(options) if options.is_empty() => {
                    return Ok(TransitionOutcome::Impossible);
                }
                Either::Left(options) => new_subgraph_paths.extend(options),
                Either::Right(unadvanceables) => {
                    snapshot!(unadvanceables, "dead ends of a subgraph path");
                    dead_ends.push(unadvanceables);
                }
            }
        }
        let new_supergraph_path = self.supergraph_path.add(
            transition.clone(),
            Some(supergraph_edge),
            ConditionResolution::no_conditions(),
        )?;
        if new_subgraph_paths.is_empty() {
            return Ok(TransitionOutcome::Unsatisfiable(ValidationError::new(
                new_supergraph_path,
                self.subgraph_paths.clone(),
                &dead_ends,
            )?));
        }
        Ok(TransitionOutcome::Advanced(Self {
            supergraph_path: new_supergraph_path,
            subgraph_paths: new_subgraph_paths,
        }))
    }
}

impl Display for ValidationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} <=> [{}]",
            self.supergraph_path(),
            self.subgraph_paths().iter().join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::Supergraph;
    use crate::composition::satisfiability::validation_traversal::ConditionValidationResolver;
    use crate::query_graph::build_query_graph::build_federated_query_graph;
    use crate::query_graph::build_query_graph::build_supergraph_api_query_graph;
    use crate::subgraph::Subgraph;

    fn initial_state() -> (ValidationState, ConditionValidationResolver) {
        let supergraph =
            Supergraph::new("type Query { t: T u: Int v: Int } type T { id: ID! }").unwrap();
        let subgraphs = [
            Subgraph::parse(
                "S1",
                r#"type Query { t: T } type T @key(fields: "id") { id: ID! }"#,
            )
            .unwrap(),
            Subgraph::parse("S2", "type Query { u: Int }").unwrap(),
        ];
        let api = Arc::new(build_supergraph_api_query_graph(&supergraph).unwrap());
        let federated = Arc::new(build_federated_query_graph(&supergraph, &subgraphs).unwrap());
        let resolver = ConditionValidationResolver::new(federated.clone()).unwrap();
        let state =
            ValidationState::new(api, federated, SchemaRootDefinitionKind::Query).unwrap();
        (state, resolver)
    }

    fn field_edge(state: &ValidationState, field_name: &str) -> EdgeIndex {
        state
            .supergraph_path()
            .graph()
            .edge_for_field(state.supergraph_path().tail(), field_name)
            .unwrap()
    }

    fn names(state: &ValidationState) -> Vec<String> {
        state
            .current_subgraph_names()
            .unwrap()
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    #[test]
    fn initial_states_enter_every_subgraph() {
        let (state, _) = initial_state();
        assert_eq!(state.supergraph_path().size(), 0);
        assert_eq!(names(&state), ["S1", "S2"]);
    }

    #[test]
    fn transitions_keep_the_subgraphs_that_can_follow_them() {
        let (state, mut resolver) = initial_state();
        let TransitionOutcome::Advanced(new_state) = state
            .validate_transition(field_edge(&state, "t"), &mut resolver)
            .unwrap()
        else {
            panic!("expected `t` to be satisfiable");
        };
        assert_eq!(new_state.supergraph_path().size(), 1);
        assert_eq!(names(&new_state), ["S1"]);
        assert_eq!(new_state.subgraph_paths().len(), 1);
    }

    #[test]
    fn transitions_no_subgraph_can_follow_are_errors() {
        let (state, mut resolver) = initial_state();
        let TransitionOutcome::Unsatisfiable(error) = state
            .validate_transition(field_edge(&state, "v"), &mut resolver)
            .unwrap()
        else {
            panic!("expected `v` to be unsatisfiable");
        };
        assert_eq!(error.subgraphs_paths().len(), 2);
        assert_eq!(error.witness().to_string(), "{\n  v\n}");
    }
}
