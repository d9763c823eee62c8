use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::executable::Selection;
use petgraph::graph::EdgeIndex;
use petgraph::visit::EdgeRef;
use tracing::debug;
use tracing::trace;

use crate::bail;
use crate::composition::satisfiability::satisfiability_error::ValidationError;
use crate::composition::satisfiability::validation_state::TransitionOutcome;
use crate::composition::satisfiability::validation_state::ValidationState;
use crate::error::FederationError;
use crate::query_graph::QueryGraph;
use crate::query_graph::QueryGraphEdgeTransition;
use crate::query_graph::QueryGraphState;
use crate::query_graph::condition_resolver::CachingConditionResolver;
use crate::query_graph::condition_resolver::ConditionResolution;
use crate::query_graph::condition_resolver::ConditionResolver;
use crate::query_graph::condition_resolver::ConditionResolverCache;
use crate::query_graph::graph_path::ExcludedConditions;
use crate::query_graph::graph_path::ExcludedEdges;
use crate::query_graph::graph_path::operation::OpGraphPath;
use crate::query_graph::graph_path::operation::OpGraphPathContext;
use crate::query_graph::graph_path::operation::OpPathElement;
use crate::query_graph::graph_path::operation::SimultaneousPaths;
use crate::query_graph::graph_path::operation::SimultaneousPathsWithLazyIndirectPaths;
use crate::schema::ValidFederationSchema;
use crate::utils::logging::snapshot;

#[derive(Clone)]
struct ConditionValidationState<'a> {
    /// Selection that belongs to the condition we're validating.
    selection: &'a Selection,
    /// The type the selection is made on.
    parent_type: &'a Name,
    /// All the possible "simultaneous paths" we could be in the subgraph when we reach this state
    /// selection. The same options are shared by all the sub-selections of a selection.
    subgraph_options: Arc<Vec<SimultaneousPathsWithLazyIndirectPaths>>,
}

impl<'a> ConditionValidationState<'a> {
    fn advance(
        &mut self,
        supergraph_schema: &ValidFederationSchema,
        subgraph_schema: &ValidFederationSchema,
        condition_resolver: &mut impl ConditionResolver,
    ) -> Result<Option<Vec<ConditionValidationState<'a>>>, FederationError> {
        let element =
            OpPathElement::from_selection(subgraph_schema, self.parent_type, self.selection)?;
        let mut new_options = Vec::new();
        let subgraph_options = Arc::make_mut(&mut self.subgraph_options);
        for paths in subgraph_options.iter_mut() {
            let Some(options) = paths.advance_with_operation_element(
                supergraph_schema,
                &element,
                condition_resolver,
            )?
            else {
                continue;
            };
            new_options.extend(options);
        }

        if new_options.is_empty() {
            // That selection of the conditions cannot be satisfied, so the overall condition
            // cannot.
            return Ok(None);
        }

        let subgraph_options = Arc::new(new_options);
        let selection_set = match self.selection {
            Selection::Field(field) => &field.selection_set,
            Selection::InlineFragment(fragment) => &fragment.selection_set,
            Selection::FragmentSpread(_) => return Ok(Some(Vec::new())),
        };
        Ok(Some(
            selection_set
                .selections
                .iter()
                .map(|selection| ConditionValidationState {
                    selection,
                    parent_type: &selection_set.ty,
                    subgraph_options: subgraph_options.clone(),
                })
                .collect(),
        ))
    }
}

/// A condition resolver that only validates that conditions can be satisfied, without comparing
/// the various ways to satisfy them. Satisfied conditions always cost 1.
pub(crate) struct ConditionValidationResolver {
    federated_query_graph: Arc<QueryGraph>,
    supergraph_schema: ValidFederationSchema,
    condition_resolver_cache: ConditionResolverCache,
}

impl ConditionValidationResolver {
    pub(crate) fn new(federated_query_graph: Arc<QueryGraph>) -> Result<Self, FederationError> {
        let supergraph_schema = federated_query_graph.supergraph_schema()?.clone();
        Ok(Self {
            federated_query_graph,
            supergraph_schema,
            condition_resolver_cache: ConditionResolverCache::new(),
        })
    }
}

impl CachingConditionResolver for ConditionValidationResolver {
    fn query_graph(&self) -> &QueryGraph {
        &self.federated_query_graph
    }

    fn resolver_cache(&mut self) -> &mut ConditionResolverCache {
        &mut self.condition_resolver_cache
    }

    fn resolve_without_cache(
        &mut self,
        edge: EdgeIndex,
        context: &OpGraphPathContext,
        excluded_edges: &ExcludedEdges,
        excluded_conditions: &ExcludedConditions,
    ) -> Result<ConditionResolution, FederationError> {
        let graph = self.federated_query_graph.clone();
        let supergraph_schema = self.supergraph_schema.clone();
        let Some(conditions) = graph.edge_weight(edge)?.conditions.clone() else {
            bail!("Edge {} has no conditions to validate", edge.index());
        };
        let excluded_conditions = excluded_conditions.add_item(&conditions);
        let (head, _) = graph.edge_endpoints(edge)?;
        let head_weight = graph.node_weight(head)?;
        let subgraph_schema = graph.schema_by_source(&head_weight.source)?;

        let initial_path = OpGraphPath::new(graph.clone(), head)?;
        let initial_option = SimultaneousPathsWithLazyIndirectPaths::new(
            SimultaneousPaths(vec![Arc::new(initial_path)]),
            context.clone(),
            excluded_edges.clone(),
            excluded_conditions,
        );
        let initial_options = Arc::new(vec![initial_option]);

        let mut stack = conditions
            .selections
            .iter()
            .map(|selection| ConditionValidationState {
                selection,
                parent_type: &conditions.ty,
                subgraph_options: initial_options.clone(),
            })
            .collect::<Vec<_>>();
        while let Some(mut state) = stack.pop() {
            match state.advance(&supergraph_schema, subgraph_schema, self)? {
                None => {
                    trace!("Conditions of edge {} cannot be satisfied", edge.index());
                    return Ok(ConditionResolution::unsatisfied_conditions());
                }
                Some(new_states) => stack.extend(new_states),
            }
        }
        // Some path was found for every selection of the conditions. Efficiency does not matter
        // here, so the cost is always 1.
        Ok(ConditionResolution::Satisfied { cost: 1.0 })
    }
}

/// Walks the supergraph API query graph, checking that every edge can be followed by some path in
/// the federated query graph.
pub(crate) struct ValidationTraversal {
    /// The states that remain to be handled.
    stack: Vec<ValidationState>,
    /// For each supergraph node, the sets of subgraphs the subgraph paths ended in, each time the
    /// node was visited.
    previous_visits: QueryGraphState<Vec<Vec<Arc<str>>>, ()>,
    validation_errors: Vec<ValidationError>,
    condition_resolver: ConditionValidationResolver,
}

impl ValidationTraversal {
    pub(crate) fn new(
        api_schema_query_graph: Arc<QueryGraph>,
        federated_query_graph: Arc<QueryGraph>,
    ) -> Result<Self, FederationError> {
        let root_kinds = api_schema_query_graph
            .root_kinds_to_nodes()?
            .keys()
            .copied()
            .collect::<Vec<_>>();
        let stack = root_kinds
            .into_iter()
            .map(|root_kind| {
                ValidationState::new(
                    api_schema_query_graph.clone(),
                    federated_query_graph.clone(),
                    root_kind,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            stack,
            previous_visits: Default::default(),
            validation_errors: Vec::new(),
            condition_resolver: ConditionValidationResolver::new(federated_query_graph)?,
        })
    }

    pub(crate) fn validate(mut self) -> Result<Vec<ValidationError>, FederationError> {
        while let Some(state) = self.stack.pop() {
            self.handle_state(state)?;
        }
        Ok(self.validation_errors)
    }

    fn handle_state(&mut self, state: ValidationState) -> Result<(), FederationError> {
        debug!(
            "Validation: {} open states. Validating {}",
            self.stack.len() + 1,
            state
        );
        snapshot!("ValidationState", state.to_string(), "popped validation state");
        let node = state.supergraph_path().tail();
        let current_subgraph_names = state
            .current_subgraph_names()?
            .into_iter()
            .collect::<Vec<_>>();
        let previous_visits = self.previous_visits.node_state_mut(node);
        // Reaching a node with the subgraphs of an earlier visit (or more) cannot fail where that
        // visit didn't.
        if previous_visits.iter().any(|previous_subgraph_names| {
            previous_subgraph_names
                .iter()
                .all(|name| current_subgraph_names.contains(name))
        }) {
            debug!("Has already validated this node.");
            return Ok(());
        }
        previous_visits.push(current_subgraph_names);

        let supergraph_graph = state.supergraph_path().graph().clone();
        let edges = supergraph_graph
            .out_edges(node)
            .into_iter()
            .filter(|edge_ref| {
                !matches!(
                    &edge_ref.weight().transition,
                    QueryGraphEdgeTransition::FieldCollection {
                        field_definition_position,
                        ..
                    } if field_definition_position.is_introspection_typename_field()
                )
            })
            .map(|edge_ref| edge_ref.id())
            .collect::<Vec<_>>();
        for edge in edges {
            debug!(
                "Validating supergraph edge {}",
                supergraph_graph.edge_weight(edge)?
            );
            match state.validate_transition(edge, &mut self.condition_resolver)? {
                TransitionOutcome::Unsatisfiable(error) => {
                    debug!("Validation error!");
                    self.validation_errors.push(error);
                }
                TransitionOutcome::Advanced(new_state)
                    if !supergraph_graph.is_terminal(new_state.supergraph_path().tail()) =>
                {
                    debug!("Reached new state {}", new_state);
                    self.stack.push(new_state);
                }
                TransitionOutcome::Advanced(_) | TransitionOutcome::Impossible => {
                    debug!("Reached terminal node/cycle");
                }
            }
        }
        Ok(())
    }
}
