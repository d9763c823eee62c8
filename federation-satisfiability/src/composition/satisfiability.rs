mod satisfiability_error;
mod validation_state;
mod validation_traversal;

use std::sync::Arc;

use tracing::debug;

pub use crate::composition::satisfiability::satisfiability_error::ValidationError;
pub use crate::composition::satisfiability::satisfiability_error::WitnessOperation;
pub use crate::composition::satisfiability::validation_state::ValidationState;
use crate::Supergraph;
use crate::bail;
use crate::composition::satisfiability::validation_state::TransitionOutcome;
use crate::composition::satisfiability::validation_traversal::ConditionValidationResolver;
use crate::composition::satisfiability::validation_traversal::ValidationTraversal;
use crate::error::CompositionError;
use crate::error::FederationError;
use crate::query_graph::QueryGraph;
use crate::query_graph::build_query_graph::build_federated_query_graph;
use crate::query_graph::build_query_graph::build_supergraph_api_query_graph;
use crate::query_graph::graph_path::transition::TransitionGraphPath;
use crate::subgraph::Subgraph;

/// Validates that every query expressible against the supergraph API can be answered by the
/// subgraphs, by checking that every path of the supergraph API query graph has a matching path in
/// the federated query graph.
///
/// Returns one error per unsatisfiable supergraph edge reached; an empty vector means the
/// composition is satisfiable. `Err` is only returned on internal errors.
#[cfg_attr(
    feature = "snapshot_tracing",
    tracing::instrument(level = "trace", skip_all, name = "validate_graph_composition")
)]
pub fn validate_graph_composition(
    api_schema_query_graph: Arc<QueryGraph>,
    federated_query_graph: Arc<QueryGraph>,
) -> Result<Vec<ValidationError>, FederationError> {
    let errors =
        ValidationTraversal::new(api_schema_query_graph, federated_query_graph)?.validate()?;
    for error in &errors {
        debug!(
            "Unsatisfiable supergraph path {} (from {} subgraph path(s))",
            error.supergraph_unsatisfiable_path(),
            error.subgraphs_paths().len()
        );
    }
    Ok(errors)
}

/// Builds the query graphs of the given supergraph and subgraphs, then validates that the
/// supergraph can be satisfied.
pub fn validate_satisfiability(
    supergraph: &Supergraph,
    subgraphs: &[Subgraph],
) -> Result<(), Vec<CompositionError>> {
    let build_graphs = || -> Result<_, FederationError> {
        let api_schema_query_graph = Arc::new(build_supergraph_api_query_graph(supergraph)?);
        let federated_query_graph = Arc::new(build_federated_query_graph(supergraph, subgraphs)?);
        Ok((api_schema_query_graph, federated_query_graph))
    };
    let (api_schema_query_graph, federated_query_graph) =
        build_graphs().map_err(|error| vec![error.into()])?;
    let errors = validate_graph_composition(api_schema_query_graph, federated_query_graph)
        .map_err(|error| vec![error.into()])?;
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.into_iter().map(CompositionError::from).collect())
    }
}

/// The outcome of replaying a supergraph path in the federated query graph.
pub enum ComputedSubgraphPaths {
    Traversal {
        /// The state reached after the last edge that could be followed.
        state: ValidationState,
        /// Whether all the edges of the supergraph path were followed.
        is_complete: bool,
    },
    Error(ValidationError),
}

/// Follows the edges of the given supergraph path in the federated query graph, starting from the
/// root of the path, and returns the subgraph paths that match it.
///
/// This is mostly useful to investigate a [`ValidationError`], replaying its
/// [`supergraph_unsatisfiable_path`](ValidationError::supergraph_unsatisfiable_path) or a prefix
/// of it.
pub fn compute_subgraph_paths(
    supergraph_path: &TransitionGraphPath,
    federated_query_graph: Arc<QueryGraph>,
) -> Result<ComputedSubgraphPaths, FederationError> {
    if supergraph_path.has_any_edge_conditions()? {
        bail!(
            "A supergraph path should not have edge conditions: {}",
            supergraph_path
        );
    }
    let api_schema_query_graph = supergraph_path.graph().clone();
    let Some(root_kind) = api_schema_query_graph
        .node_weight(supergraph_path.head())?
        .root_kind
    else {
        bail!("Supergraph path {} does not start at a root", supergraph_path);
    };
    let mut resolver = ConditionValidationResolver::new(federated_query_graph.clone())?;
    let mut state = ValidationState::new(api_schema_query_graph, federated_query_graph, root_kind)?;
    let mut is_complete = true;
    for edge in supergraph_path.edges() {
        match state.validate_transition(edge, &mut resolver)? {
            TransitionOutcome::Advanced(new_state) => state = new_state,
            TransitionOutcome::Impossible => {
                is_complete = false;
                break;
            }
            TransitionOutcome::Unsatisfiable(error) => {
                return Ok(ComputedSubgraphPaths::Error(error));
            }
        }
    }
    Ok(ComputedSubgraphPaths::Traversal { state, is_complete })
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::query_graph::condition_resolver::ConditionResolution;
    use crate::schema::position::SchemaRootDefinitionKind;

    fn graphs(supergraph: &str, subgraphs: &[(&str, &str)]) -> (Arc<QueryGraph>, Arc<QueryGraph>) {
        let supergraph = Supergraph::new(supergraph).unwrap();
        let subgraphs = subgraphs
            .iter()
            .map(|(name, type_defs)| Subgraph::parse(name, type_defs).unwrap())
            .collect::<Vec<_>>();
        (
            Arc::new(build_supergraph_api_query_graph(&supergraph).unwrap()),
            Arc::new(build_federated_query_graph(&supergraph, &subgraphs).unwrap()),
        )
    }

    /// The supergraph path following the given fields from the query root.
    fn supergraph_path(api: &Arc<QueryGraph>, fields: &[&str]) -> TransitionGraphPath {
        let mut path =
            TransitionGraphPath::from_graph_root(api.clone(), SchemaRootDefinitionKind::Query)
                .unwrap()
                .unwrap();
        for field in fields {
            let edge = api.edge_for_field(path.tail(), field).unwrap();
            let transition = api.edge_weight(edge).unwrap().transition.clone();
            path = path
                .add(transition, Some(edge), ConditionResolution::no_conditions())
                .unwrap();
        }
        path
    }

    const SUPERGRAPH: &str = r#"
        type Query { t: T }
        type T { id: ID! x: Int y: Int }
    "#;
    const SUBGRAPH_A: &str = r#"type Query { t: T } type T @key(fields: "id") { id: ID! x: Int }"#;

    #[test]
    fn subgraph_paths_jump_through_keys() {
        let (api, federated) = graphs(
            SUPERGRAPH,
            &[
                ("A", SUBGRAPH_A),
                ("B", r#"type T @key(fields: "id") { id: ID! y: Int }"#),
            ],
        );
        let path = supergraph_path(&api, &["t", "y"]);
        let ComputedSubgraphPaths::Traversal { state, is_complete } =
            compute_subgraph_paths(&path, federated).unwrap()
        else {
            panic!("expected a traversal");
        };
        assert!(is_complete);
        assert_eq!(state.subgraph_paths().len(), 1);
        assert_snapshot!(
            state.subgraph_paths()[0],
            @"Query(A)* --[t]--> T(A) --[{ id } ⊢ key()]--> T(B) --[y]--> Int(B)"
        );
    }

    #[test]
    fn unsatisfiable_paths_stop_at_the_first_error() {
        let (api, federated) = graphs(
            SUPERGRAPH,
            &[
                ("A", SUBGRAPH_A),
                ("B", r#"type T { id: ID! y: Int }"#),
            ],
        );
        let path = supergraph_path(&api, &["t", "y"]);
        let ComputedSubgraphPaths::Error(error) =
            compute_subgraph_paths(&path, federated).unwrap()
        else {
            panic!("expected an error");
        };
        assert_snapshot!(error.message(), @r###"
        The following supergraph API query:
        {
          t {
            y
          }
        }
        cannot be satisfied by the subgraphs because:
        - from subgraph "A":
          - cannot find field "T.y".
          - cannot move to subgraph "B", which has field "T.y", because type "T" has no @key defined in subgraph "B".
        "###);
    }

    #[test]
    fn satisfiable_compositions_have_no_errors() {
        let (api, federated) = graphs(
            SUPERGRAPH,
            &[
                ("A", SUBGRAPH_A),
                ("B", r#"type T @key(fields: "id") { id: ID! y: Int }"#),
            ],
        );
        let errors = validate_graph_composition(api, federated).unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn satisfiability_errors_carry_their_code() {
        let supergraph = Supergraph::new(SUPERGRAPH).unwrap();
        let subgraphs = [
            Subgraph::parse("A", SUBGRAPH_A).unwrap(),
            Subgraph::parse("B", r#"type T { id: ID! y: Int }"#).unwrap(),
        ];
        let errors = validate_satisfiability(&supergraph, &subgraphs).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code().to_string(), "SATISFIABILITY_ERROR");
    }
}
