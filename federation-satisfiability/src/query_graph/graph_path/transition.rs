use apollo_compiler::Name;
use apollo_compiler::executable::Selection;
use either::Either;
use itertools::Itertools;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use tracing::trace;

use crate::bail;
use crate::ensure;
use crate::error::FederationError;
use crate::query_graph::QueryGraph;
use crate::query_graph::QueryGraphEdgeTransition;
use crate::query_graph::build_query_graph::FEDERATED_GRAPH_ROOT_SOURCE;
use crate::query_graph::condition_resolver::ConditionResolution;
use crate::query_graph::condition_resolver::ConditionResolver;
use crate::query_graph::condition_resolver::UnsatisfiedConditionReason;
use crate::query_graph::graph_path::GraphPath;
use crate::query_graph::graph_path::GraphPathTrigger;
use crate::query_graph::graph_path::TriggerEdge;
use crate::query_graph::graph_path::Unadvanceable;
use crate::query_graph::graph_path::UnadvanceableReason;
use crate::query_graph::graph_path::Unadvanceables;
use crate::query_graph::graph_path::operation::OpGraphPathContext;
use crate::schema::position::FieldDefinitionPosition;
use crate::subgraph::Subgraph;

/// A `GraphPath` whose triggers are query graph transitions in some other query graph (essentially
/// meaning that the path has been guided by a walk through that other query graph).
pub type TransitionGraphPath = GraphPath<QueryGraphEdgeTransition>;

impl GraphPathTrigger for QueryGraphEdgeTransition {
    fn edge_from(
        &self,
        graph: &QueryGraph,
        node: NodeIndex,
    ) -> Result<TriggerEdge, FederationError> {
        if !self.collect_operation_elements() {
            return Ok(TriggerEdge::Missing);
        }
        let schema = graph.schema_by_source(&graph.node_weight(node)?.source)?;
        let supergraph_schema = graph.supergraph_schema()?;
        for edge_ref in graph.out_edges(node) {
            if edge_ref
                .weight()
                .transition
                .matches_supergraph_transition(schema, self, supergraph_schema)?
            {
                return Ok(TriggerEdge::Edge(edge_ref.id()));
            }
        }
        Ok(TriggerEdge::Missing)
    }

    fn is_bare_type_condition(&self) -> bool {
        false
    }

    fn for_non_collecting_transition(
        transition: &QueryGraphEdgeTransition,
        _context: &OpGraphPathContext,
    ) -> Self {
        transition.clone()
    }
}

impl TransitionGraphPath {
    /// Because Fed 1 used to (somewhat wrongly) require @external on key fields of type extensions
    /// and because Fed 2 allows you to avoid type extensions, users upgrading might try to remove
    /// `extend` from their schema, but forget to remove the @external on their key field. The
    /// problem is that doing that makes the key field truly external, and that could easily make
    /// @requires condition not satisfiable (because the key you'd need to get for @requires is now
    /// external). To help the user understand that mistake, we add a specific mention to this
    /// potential problem if the type is indeed an entity.
    fn warn_on_key_fields_marked_external(
        graph: &QueryGraph,
        source: &str,
        type_name: &Name,
    ) -> Result<String, FederationError> {
        let schema = graph.schema_by_source(source)?;
        let external_tester = graph.external_tester(source)?;
        let key_field_sets = Subgraph::key_field_sets(schema, type_name)?;
        let key_fields_marked_external = key_field_sets
            .iter()
            .flat_map(|key| &key.selections)
            .filter_map(|selection| match selection {
                Selection::Field(field) => Some(&field.name),
                _ => None,
            })
            .filter(|field_name| {
                external_tester.is_external(
                    schema,
                    &FieldDefinitionPosition::new(type_name.clone(), (*field_name).clone()),
                )
            })
            .unique()
            .collect::<Vec<_>>();
        let fields_list = match key_fields_marked_external.as_slice() {
            [] => return Ok(String::new()),
            [field_name] => format!("field \"{field_name}\""),
            field_names => format!(
                "fields {}",
                field_names
                    .iter()
                    .map(|field_name| format!("\"{field_name}\""))
                    .join(", ")
            ),
        };
        Ok(format!(
            " (please ensure that this is not due to key {fields_list} being accidentally marked @external)"
        ))
    }

    /// Advances the path with the edges of its tail matching the given supergraph transition,
    /// without moving to other subgraphs first.
    fn advance_with_direct_transition(
        &self,
        transition: &QueryGraphEdgeTransition,
        condition_resolver: &mut impl ConditionResolver,
    ) -> Result<Either<Vec<TransitionGraphPath>, Unadvanceables>, FederationError> {
        let graph = self.graph().clone();
        let supergraph_schema = graph.supergraph_schema()?;
        let tail_weight = graph.node_weight(self.tail())?;
        let schema = graph.schema_by_source(&tail_weight.source)?;
        let mut options = Vec::new();
        let mut dead_ends = Vec::new();
        let edges = graph
            .out_edges(self.tail())
            .into_iter()
            .map(|edge_ref| edge_ref.id())
            .collect::<Vec<_>>();
        for edge in edges {
            let edge_weight = graph.edge_weight(edge)?;
            // The edge must match the transition. If it doesn't, we cannot use it.
            if !edge_weight.transition.matches_supergraph_transition(
                schema,
                transition,
                supergraph_schema,
            )? {
                continue;
            }
            // Additionally, we can only take an edge if we can satisfy its conditions.
            let condition_resolution = self.can_satisfy_conditions(
                edge,
                condition_resolver,
                &Default::default(),
                &Default::default(),
                &Default::default(),
            )?;
            let ConditionResolution::Unsatisfied { reason } = condition_resolution else {
                options.push(self.add(transition.clone(), Some(edge), condition_resolution)?);
                continue;
            };
            let QueryGraphEdgeTransition::FieldCollection {
                field_definition_position,
                ..
            } = &edge_weight.transition
            else {
                bail!(
                    "Shouldn't have conditions on direct transition {}",
                    transition
                );
            };
            // Condition on a field means a @requires.
            let details = match reason {
                Some(UnsatisfiedConditionReason::NoPostRequireKey) => format!(
                    "@requires condition on field \"{}\" can be satisfied but missing usable key on \"{}\" in subgraph \"{}\" to resume query",
                    field_definition_position,
                    field_definition_position.type_name,
                    tail_weight.source,
                ),
                None => format!(
                    "cannot satisfy @requires conditions on field \"{}\"{}",
                    field_definition_position,
                    Self::warn_on_key_fields_marked_external(
                        &graph,
                        &tail_weight.source,
                        &field_definition_position.type_name,
                    )?,
                ),
            };
            dead_ends.push(Unadvanceable {
                reason: UnadvanceableReason::UnsatisfiableRequiresCondition,
                from_subgraph: tail_weight.source.clone(),
                to_subgraph: tail_weight.source.clone(),
                details,
            });
        }

        if !options.is_empty() {
            return Ok(Either::Left(options));
        }
        if !dead_ends.is_empty() {
            return Ok(Either::Right(Unadvanceables(dead_ends)));
        }
        let details = match transition {
            QueryGraphEdgeTransition::FieldCollection {
                field_definition_position,
                ..
            } => {
                // The subgraph has the field but no corresponding edge: the field is external.
                if field_definition_position.try_get(schema).is_some() {
                    format!(
                        "field \"{}\" is not resolvable because marked @external",
                        field_definition_position
                    )
                } else {
                    format!("cannot find field \"{}\"", field_definition_position)
                }
            }
            QueryGraphEdgeTransition::Downcast { to_type_name, .. } => {
                format!("cannot find type \"{}\"", to_type_name)
            }
            _ => {
                bail!("Unhandled direct transition {}", transition);
            }
        };
        Ok(Either::Right(Unadvanceables(vec![Unadvanceable {
            reason: UnadvanceableReason::NoMatchingTransition,
            from_subgraph: tail_weight.source.clone(),
            to_subgraph: tail_weight.source.clone(),
            details,
        }])))
    }

    /// Advances the path with the given supergraph transition, whose target is the given type.
    ///
    /// The transition is taken directly from the tail if possible. Unless the target type is a
    /// leaf and a direct option exists, the transition is also taken after moving to other
    /// subgraphs through keys. Returns the options found, or why there is none.
    ///
    /// A downcast to a type the path can never be at is not an error: it yields no options.
    pub(crate) fn advance_with_transition(
        &self,
        transition: &QueryGraphEdgeTransition,
        target_type: &Name,
        condition_resolver: &mut impl ConditionResolver,
    ) -> Result<Either<Vec<TransitionGraphPath>, Unadvanceables>, FederationError> {
        ensure!(
            transition.collect_operation_elements(),
            "Supergraphs shouldn't have transitions that don't collect elements",
        );
        let supergraph_schema = self.graph().supergraph_schema()?;
        if let QueryGraphEdgeTransition::Downcast { to_type_name, .. } = transition {
            let supergraph_runtime_types = supergraph_schema.possible_runtime_types(to_type_name);
            if !supergraph_runtime_types
                .iter()
                .any(|type_name| self.runtime_types_of_tail().contains(type_name))
            {
                trace!("No runtime type of {self} can be casted to {to_type_name}");
                return Ok(Either::Left(Vec::new()));
            }
        }

        let mut dead_ends = Vec::new();
        let mut options = match self.advance_with_direct_transition(transition, condition_resolver)? {
            Either::Left(options) => options,
            Either::Right(unadvanceables) => {
                dead_ends.extend(unadvanceables.0);
                Vec::new()
            }
        };
        // If we can fulfill the transition directly and the target is a leaf, no other subgraph
        // can do better.
        if !options.is_empty() && supergraph_schema.is_leaf_type(target_type) {
            return Ok(Either::Left(options));
        }

        let indirect_paths = self.advance_with_non_collecting_and_type_preserving_transitions(
            &Default::default(),
            condition_resolver,
            &Default::default(),
            &Default::default(),
        )?;
        for path in indirect_paths.paths.iter() {
            match path.advance_with_direct_transition(transition, condition_resolver)? {
                Either::Left(path_options) => options.extend(path_options),
                Either::Right(unadvanceables) => dead_ends.extend(unadvanceables.0),
            }
        }
        if !options.is_empty() {
            return Ok(Either::Left(options));
        }

        dead_ends.extend(indirect_paths.dead_ends.0.iter().cloned());
        if let QueryGraphEdgeTransition::FieldCollection {
            field_definition_position,
            ..
        } = transition
        {
            let tail_source = &self.graph().node_weight(self.tail())?.source;
            let unreachable = self
                .graph()
                .sources()
                .filter(|(source, _)| &***source != FEDERATED_GRAPH_ROOT_SOURCE)
                .filter(|(source, _)| {
                    !dead_ends
                        .iter()
                        .any(|dead_end| dead_end.to_subgraph == **source)
                })
                .filter(|(_, schema)| {
                    schema.is_composite_type(&field_definition_position.type_name)
                        && field_definition_position.try_get(schema).is_some()
                })
                // That subgraph has the type we look for, but we have recorded no dead-ends: there
                // is no edge to that type, so it has no keys.
                .map(|(source, _)| Unadvanceable {
                    reason: UnadvanceableReason::UnreachableType,
                    from_subgraph: tail_source.clone(),
                    to_subgraph: source.clone(),
                    details: format!(
                        "cannot move to subgraph \"{}\", which has field \"{}\", because type \"{}\" has no @key defined in subgraph \"{}\"",
                        source,
                        field_definition_position,
                        field_definition_position.type_name,
                        source,
                    ),
                })
                .collect::<Vec<_>>();
            dead_ends.extend(unreachable);
        }
        Ok(Either::Right(Unadvanceables(dead_ends)))
    }
}
