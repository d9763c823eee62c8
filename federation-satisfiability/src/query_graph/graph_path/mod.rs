use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::executable::SelectionSet;
use indexmap::IndexMap;
use indexmap::IndexSet;
use itertools::Itertools;
use petgraph::graph::EdgeIndex;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use serde::Serialize;
use tracing::debug;
use tracing::trace;

use crate::bail;
use crate::ensure;
use crate::error::FederationError;
use crate::query_graph::QueryGraph;
use crate::query_graph::QueryGraphEdgeTransition;
use crate::query_graph::QueryGraphNodeType;
use crate::query_graph::condition_resolver::ConditionResolution;
use crate::query_graph::condition_resolver::ConditionResolver;
use crate::query_graph::condition_resolver::UnsatisfiedConditionReason;
use crate::query_graph::graph_path::operation::OpGraphPathContext;
use crate::schema::field_set::print_field_set;
use crate::schema::position::FieldDefinitionPosition;
use crate::schema::position::SchemaRootDefinitionKind;

pub(crate) mod operation;
pub mod transition;

/// What the triggers of a graph path (the "elements" guiding the walk) must provide.
pub(crate) trait GraphPathTrigger: Display + Clone {
    /// The edge, going out of the given node, that this trigger would follow.
    fn edge_from(&self, graph: &QueryGraph, node: NodeIndex)
    -> Result<TriggerEdge, FederationError>;

    /// Whether this trigger is an inline fragment with a type condition and no directive.
    fn is_bare_type_condition(&self) -> bool;

    /// The trigger recorded when a path takes a non-collecting edge (a key or a root type
    /// resolution) while looking for indirect options.
    fn for_non_collecting_transition(
        transition: &QueryGraphEdgeTransition,
        context: &OpGraphPathContext,
    ) -> Self;
}

/// The edge a trigger maps to from some node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TriggerEdge {
    Edge(EdgeIndex),
    /// The trigger doesn't move the path (e.g. a fragment without type condition).
    NoEdgeNeeded,
    /// The trigger cannot be followed from the node.
    Missing,
}

/// One step of a graph path. Steps are shared between a path and the paths extending it.
pub(crate) struct GraphPathElement<TTrigger> {
    previous: Option<Arc<GraphPathElement<TTrigger>>>,
    pub(crate) trigger: TTrigger,
    /// The edge taken, if any. Steps without edge only record their trigger (e.g. a fragment
    /// carrying @skip/@include).
    pub(crate) edge: Option<EdgeIndex>,
    pub(crate) condition_resolution: ConditionResolution,
}

/// The most recent key edge of a path, with its index in the path and the cost of its
/// conditions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SubgraphEnteringEdgeInfo {
    pub(crate) index: usize,
    pub(crate) edge: EdgeIndex,
    pub(crate) conditions_cost: f64,
}

/// An immutable path in a query graph.
///
/// A "path" here is mostly understood as in graph theory, that is as a list of edges in a graph,
/// each of them guided by a "trigger". Note however that a path can also include "None" edges,
/// steps where the path does not move but still records its trigger.
///
/// The path also tracks the possible runtime types of its tail: a path reaching an interface may
/// in fact only reach some of its implementations, because of the type conditions followed to get
/// there.
pub struct GraphPath<TTrigger> {
    graph: Arc<QueryGraph>,
    head: NodeIndex,
    tail: NodeIndex,
    last_element: Option<Arc<GraphPathElement<TTrigger>>>,
    size: usize,
    last_subgraph_entering_edge_info: Option<SubgraphEnteringEdgeInfo>,
    runtime_types_of_tail: Arc<IndexSet<Name>>,
    /// If the last edge is a downcast, the runtime types before that edge.
    runtime_types_before_tail_if_last_is_cast: Option<Arc<IndexSet<Name>>>,
}

impl<TTrigger> Clone for GraphPath<TTrigger> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            head: self.head,
            tail: self.tail,
            last_element: self.last_element.clone(),
            size: self.size,
            last_subgraph_entering_edge_info: self.last_subgraph_entering_edge_info,
            runtime_types_of_tail: self.runtime_types_of_tail.clone(),
            runtime_types_before_tail_if_last_is_cast: self
                .runtime_types_before_tail_if_last_is_cast
                .clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum UnadvanceableReason {
    UnsatisfiableKeyCondition,
    UnsatisfiableRequiresCondition,
    NoMatchingTransition,
    UnreachableType,
    IgnoredIndirectPath,
}

/// Why a path could not be advanced from a subgraph to another (or within the same subgraph).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct Unadvanceable {
    pub(crate) reason: UnadvanceableReason,
    pub(crate) from_subgraph: Arc<str>,
    pub(crate) to_subgraph: Arc<str>,
    pub(crate) details: String,
}

impl Display for Unadvanceable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}]({}->{}) {}",
            self.reason, self.from_subgraph, self.to_subgraph, self.details
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub(crate) struct Unadvanceables(pub(crate) Vec<Unadvanceable>);

impl Display for Unadvanceables {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0.iter().join(", "))
    }
}

/// Non-collecting edges a search must not take (again).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ExcludedEdges(Arc<Vec<EdgeIndex>>);

impl ExcludedEdges {
    pub(crate) fn is_excluded(&self, edge: EdgeIndex) -> bool {
        self.0.contains(&edge)
    }

    pub(crate) fn add_item(&self, edge: EdgeIndex) -> Self {
        let mut excluded = (*self.0).clone();
        excluded.push(edge);
        Self(Arc::new(excluded))
    }
}

/// Conditions being resolved by an enclosing search, which a nested search must not try to
/// resolve again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ExcludedConditions(Arc<Vec<Arc<SelectionSet>>>);

impl ExcludedConditions {
    pub(crate) fn is_excluded(&self, conditions: Option<&Arc<SelectionSet>>) -> bool {
        conditions.is_some_and(|conditions| {
            self.0
                .iter()
                .any(|excluded| Arc::ptr_eq(excluded, conditions) || **excluded == **conditions)
        })
    }

    pub(crate) fn add_item(&self, conditions: &Arc<SelectionSet>) -> Self {
        let mut excluded = (*self.0).clone();
        excluded.push(conditions.clone());
        Self(Arc::new(excluded))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The paths reachable through non-collecting edges from some path, along with the reasons some
/// subgraphs could not be reached.
pub(crate) struct IndirectPaths<TTrigger> {
    pub(crate) paths: Arc<Vec<Arc<GraphPath<TTrigger>>>>,
    pub(crate) dead_ends: Arc<Unadvanceables>,
}

impl<TTrigger> Clone for IndirectPaths<TTrigger> {
    fn clone(&self) -> Self {
        Self {
            paths: self.paths.clone(),
            dead_ends: self.dead_ends.clone(),
        }
    }
}

/// The possible runtime types at a node, before any edge is taken.
fn initial_runtime_types(
    graph: &QueryGraph,
    node: NodeIndex,
) -> Result<IndexSet<Name>, FederationError> {
    let node_weight = graph.node_weight(node)?;
    Ok(match &node_weight.type_ {
        QueryGraphNodeType::SchemaType(type_name) => graph
            .schema_by_source(&node_weight.source)?
            .possible_runtime_types(type_name),
        QueryGraphNodeType::FederatedRootType(_) => IndexSet::default(),
    })
}

/// The possible runtime types once the given edge is taken.
fn updated_runtime_types(
    graph: &QueryGraph,
    runtime_types: &IndexSet<Name>,
    edge: Option<EdgeIndex>,
) -> Result<IndexSet<Name>, FederationError> {
    let Some(edge) = edge else {
        return Ok(runtime_types.clone());
    };
    let edge_weight = graph.edge_weight(edge)?;
    match &edge_weight.transition {
        QueryGraphEdgeTransition::FieldCollection {
            source,
            field_definition_position,
            ..
        } => {
            let schema = graph.schema_by_source(source)?;
            let field = field_definition_position.get(schema)?;
            if !schema.is_composite_type(field.ty.inner_named_type()) {
                return Ok(IndexSet::default());
            }
            let mut new_runtime_types = IndexSet::default();
            for parent_type_name in runtime_types {
                let position = FieldDefinitionPosition::new(
                    parent_type_name.clone(),
                    field_definition_position.field_name.clone(),
                );
                if let Some(field) = position.try_get(schema) {
                    new_runtime_types
                        .extend(schema.possible_runtime_types(field.ty.inner_named_type()));
                }
            }
            Ok(new_runtime_types)
        }
        QueryGraphEdgeTransition::Downcast {
            source,
            to_type_name,
            ..
        } => {
            let casted_runtime_types = graph
                .schema_by_source(source)?
                .possible_runtime_types(to_type_name);
            Ok(runtime_types
                .iter()
                .filter(|type_name| casted_runtime_types.contains(*type_name))
                .cloned()
                .collect())
        }
        QueryGraphEdgeTransition::KeyResolution => {
            let (_, tail) = graph.edge_endpoints(edge)?;
            initial_runtime_types(graph, tail)
        }
        QueryGraphEdgeTransition::RootTypeResolution { .. }
        | QueryGraphEdgeTransition::SubgraphEnteringTransition => {
            let tail_weight = graph.edge_tail_weight(edge)?;
            Ok(IndexSet::from([tail_weight.type_.type_name()?.clone()]))
        }
    }
}

fn pop_min<TTrigger>(paths: &mut Vec<GraphPath<TTrigger>>) -> Option<GraphPath<TTrigger>> {
    let (min_index, _) = paths.iter().enumerate().min_by_key(|(_, path)| path.size)?;
    Some(paths.remove(min_index))
}

impl<TTrigger> GraphPath<TTrigger>
where
    TTrigger: GraphPathTrigger,
{
    /// Creates an empty path starting at the given node.
    pub(crate) fn new(graph: Arc<QueryGraph>, head: NodeIndex) -> Result<Self, FederationError> {
        let runtime_types_of_tail = Arc::new(initial_runtime_types(&graph, head)?);
        Ok(Self {
            graph,
            head,
            tail: head,
            last_element: None,
            size: 0,
            last_subgraph_entering_edge_info: None,
            runtime_types_of_tail,
            runtime_types_before_tail_if_last_is_cast: None,
        })
    }

    /// Creates an empty path starting at the root of the given kind, if the graph has one.
    pub(crate) fn from_graph_root(
        graph: Arc<QueryGraph>,
        root_kind: SchemaRootDefinitionKind,
    ) -> Result<Option<Self>, FederationError> {
        let Some(root) = graph.root_kinds_to_nodes()?.get(&root_kind).copied() else {
            return Ok(None);
        };
        Self::new(graph, root).map(Some)
    }

    pub(crate) fn graph(&self) -> &Arc<QueryGraph> {
        &self.graph
    }

    pub(crate) fn head(&self) -> NodeIndex {
        self.head
    }

    pub(crate) fn tail(&self) -> NodeIndex {
        self.tail
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn runtime_types_of_tail(&self) -> &IndexSet<Name> {
        &self.runtime_types_of_tail
    }

    pub(crate) fn last_subgraph_entering_edge_info(&self) -> Option<SubgraphEnteringEdgeInfo> {
        self.last_subgraph_entering_edge_info
    }

    /// The steps of the path, from head to tail.
    pub(crate) fn elements(&self) -> Vec<&Arc<GraphPathElement<TTrigger>>> {
        let mut elements = Vec::with_capacity(self.size);
        let mut current = self.last_element.as_ref();
        while let Some(element) = current {
            elements.push(element);
            current = element.previous.as_ref();
        }
        elements.reverse();
        elements
    }

    /// The edges of the path, skipping the steps that don't move.
    pub(crate) fn edges(&self) -> Vec<EdgeIndex> {
        self.elements()
            .into_iter()
            .filter_map(|element| element.edge)
            .collect()
    }

    /// The edge of the last step: `None` for an empty path, `Some(None)` if the last step doesn't
    /// move.
    pub(crate) fn last_edge(&self) -> Option<Option<EdgeIndex>> {
        self.last_element.as_ref().map(|element| element.edge)
    }

    /// Returns a new path extending this one with the given trigger and edge.
    ///
    /// The edge conditions must be satisfied. When the edge is a downcast following a bare type
    /// condition that it makes useless, the previous cast is replaced instead.
    pub(crate) fn add(
        &self,
        trigger: TTrigger,
        edge: Option<EdgeIndex>,
        condition_resolution: ConditionResolution,
    ) -> Result<Self, FederationError> {
        let ConditionResolution::Satisfied { cost } = condition_resolution else {
            bail!("Cannot add to a path if the conditions cannot be satisfied");
        };
        let Some(edge) = edge else {
            return Ok(Self {
                graph: self.graph.clone(),
                head: self.head,
                tail: self.tail,
                last_element: Some(Arc::new(GraphPathElement {
                    previous: self.last_element.clone(),
                    trigger,
                    edge: None,
                    condition_resolution,
                })),
                size: self.size + 1,
                last_subgraph_entering_edge_info: self.last_subgraph_entering_edge_info,
                runtime_types_of_tail: self.runtime_types_of_tail.clone(),
                runtime_types_before_tail_if_last_is_cast: None,
            });
        };
        let (edge_head, edge_tail) = self.graph.edge_endpoints(edge)?;
        ensure!(
            edge_head == self.tail,
            "Cannot add edge {} to path ending at {}",
            edge.index(),
            self
        );
        if let Some(path) = self.try_replace_last_cast(&trigger, edge, &condition_resolution)? {
            return Ok(path);
        }

        let transition = &self.graph.edge_weight(edge)?.transition;
        let mut last_subgraph_entering_edge_info = self.last_subgraph_entering_edge_info;
        if matches!(transition, QueryGraphEdgeTransition::KeyResolution) {
            last_subgraph_entering_edge_info = Some(SubgraphEnteringEdgeInfo {
                index: self.size,
                edge,
                conditions_cost: cost,
            });
        }
        let runtime_types_before_tail_if_last_is_cast =
            if matches!(transition, QueryGraphEdgeTransition::Downcast { .. }) {
                Some(self.runtime_types_of_tail.clone())
            } else {
                None
            };
        Ok(Self {
            graph: self.graph.clone(),
            head: self.head,
            tail: edge_tail,
            last_element: Some(Arc::new(GraphPathElement {
                previous: self.last_element.clone(),
                trigger,
                edge: Some(edge),
                condition_resolution,
            })),
            size: self.size + 1,
            last_subgraph_entering_edge_info,
            runtime_types_of_tail: Arc::new(updated_runtime_types(
                &self.graph,
                &self.runtime_types_of_tail,
                Some(edge),
            )?),
            runtime_types_before_tail_if_last_is_cast,
        })
    }

    /// A downcast following a bare type condition may make that condition useless: in
    /// `... on I { ... on A { x } }`, once on `A`, the cast to `I` brings nothing. In that case the
    /// path directly casts to the new type from where the previous cast started, which keeps
    /// paths from growing on fragments that re-narrow the same type.
    fn try_replace_last_cast(
        &self,
        trigger: &TTrigger,
        edge: EdgeIndex,
        condition_resolution: &ConditionResolution,
    ) -> Result<Option<Self>, FederationError> {
        let edge_weight = self.graph.edge_weight(edge)?;
        if !matches!(
            edge_weight.transition,
            QueryGraphEdgeTransition::Downcast { .. }
        ) {
            return Ok(None);
        }
        let Some(last_element) = &self.last_element else {
            return Ok(None);
        };
        let Some(last_edge) = last_element.edge else {
            return Ok(None);
        };
        if !last_element.trigger.is_bare_type_condition() {
            return Ok(None);
        }
        let Some(runtime_types_before_cast) = &self.runtime_types_before_tail_if_last_is_cast
        else {
            return Ok(None);
        };
        let runtime_types_without_previous_cast =
            updated_runtime_types(&self.graph, runtime_types_before_cast, Some(edge))?;
        if runtime_types_without_previous_cast.is_empty()
            || !runtime_types_without_previous_cast
                .iter()
                .all(|type_name| self.runtime_types_of_tail.contains(type_name))
        {
            return Ok(None);
        }
        let (last_edge_head, _) = self.graph.edge_endpoints(last_edge)?;
        let new_tail_type = &self.graph.edge_tail_weight(edge)?.type_;
        let Some((updated_edge, updated_tail)) = self
            .graph
            .out_edges(last_edge_head)
            .into_iter()
            .find(|edge_ref| self.graph.graph()[edge_ref.target()].type_ == *new_tail_type)
            .map(|edge_ref| (edge_ref.id(), edge_ref.target()))
        else {
            return Ok(None);
        };
        debug!(
            "Previous cast {} is made obsolete by new cast {}, removing from path.",
            last_element.trigger, trigger
        );
        Ok(Some(Self {
            graph: self.graph.clone(),
            head: self.head,
            tail: updated_tail,
            last_element: Some(Arc::new(GraphPathElement {
                previous: last_element.previous.clone(),
                trigger: trigger.clone(),
                edge: Some(updated_edge),
                condition_resolution: condition_resolution.clone(),
            })),
            size: self.size,
            last_subgraph_entering_edge_info: self.last_subgraph_entering_edge_info,
            runtime_types_of_tail: Arc::new(runtime_types_without_previous_cast),
            runtime_types_before_tail_if_last_is_cast: self
                .runtime_types_before_tail_if_last_is_cast
                .clone(),
        }))
    }

    /// Checks whether the steps taken since the last key edge could have been taken directly in
    /// the subgraph that edge left, without any conditions, ending on the given type. Returns the
    /// node reached in that subgraph if so.
    pub(crate) fn check_direct_path_from_previous_subgraph_to(
        &self,
        type_name: &Name,
    ) -> Result<Option<NodeIndex>, FederationError> {
        let Some(info) = self.last_subgraph_entering_edge_info else {
            return Ok(None);
        };
        let (mut previous_subgraph_node, _) = self.graph.edge_endpoints(info.edge)?;
        for element in self.elements().into_iter().skip(info.index + 1) {
            match element
                .trigger
                .edge_from(&self.graph, previous_subgraph_node)?
            {
                TriggerEdge::NoEdgeNeeded => continue,
                TriggerEdge::Missing => return Ok(None),
                TriggerEdge::Edge(edge) => {
                    if self.graph.edge_weight(edge)?.conditions.is_some() {
                        return Ok(None);
                    }
                    let (_, tail) = self.graph.edge_endpoints(edge)?;
                    previous_subgraph_node = tail;
                }
            }
        }
        let node_type = &self.graph.node_weight(previous_subgraph_node)?.type_;
        Ok(
            matches!(node_type, QueryGraphNodeType::SchemaType(name) if name == type_name)
                .then_some(previous_subgraph_node),
        )
    }

    /// Whether the path starts at a root and only ever moved between `Query` types without
    /// collecting any field.
    pub(crate) fn is_on_top_level_query_root(&self) -> Result<bool, FederationError> {
        if !self.graph.is_root_node(self.head)? {
            return Ok(false);
        }
        for edge in self.edges() {
            if matches!(
                self.graph.edge_weight(edge)?.transition,
                QueryGraphEdgeTransition::FieldCollection { .. }
            ) {
                return Ok(false);
            }
            let is_query = matches!(
                &self.graph.edge_tail_weight(edge)?.type_,
                QueryGraphNodeType::SchemaType(type_name) if type_name.as_str() == "Query"
            );
            if !is_query {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Returns this path without its trailing downcasts.
    pub(crate) fn truncate_trailing_downcasts(&self) -> Result<Self, FederationError> {
        let elements = self.elements();
        let mut runtime_types = initial_runtime_types(&self.graph, self.head)?;
        let mut last_non_downcast = None;
        for (index, element) in elements.iter().enumerate() {
            runtime_types = updated_runtime_types(&self.graph, &runtime_types, element.edge)?;
            let Some(edge) = element.edge else {
                continue;
            };
            if !matches!(
                self.graph.edge_weight(edge)?.transition,
                QueryGraphEdgeTransition::Downcast { .. }
            ) {
                let (_, tail) = self.graph.edge_endpoints(edge)?;
                last_non_downcast = Some((index, tail, runtime_types.clone()));
            }
        }
        let Some((index, tail, runtime_types)) = last_non_downcast else {
            return Ok(self.clone());
        };
        if index == self.size - 1 {
            return Ok(self.clone());
        }
        Ok(Self {
            graph: self.graph.clone(),
            head: self.head,
            tail,
            last_element: Some(elements[index].clone()),
            size: index + 1,
            last_subgraph_entering_edge_info: self.last_subgraph_entering_edge_info,
            runtime_types_of_tail: Arc::new(runtime_types),
            runtime_types_before_tail_if_last_is_cast: None,
        })
    }

    /// Whether any edge of the path has conditions.
    pub(crate) fn has_any_edge_conditions(&self) -> Result<bool, FederationError> {
        for edge in self.edges() {
            if self.graph.edge_weight(edge)?.conditions.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Resolves the conditions of the given edge (which must start at the tail of this path).
    ///
    /// Taking a field edge with conditions (an @requires) means the subgraph of that field has to
    /// be queried again once the conditions are fetched, which needs a key of the field's parent
    /// type that this subgraph can resolve. That is checked here, except when the path just came
    /// into the subgraph through a key.
    pub(crate) fn can_satisfy_conditions(
        &self,
        edge: EdgeIndex,
        condition_resolver: &mut impl ConditionResolver,
        context: &OpGraphPathContext,
        excluded_edges: &ExcludedEdges,
        excluded_conditions: &ExcludedConditions,
    ) -> Result<ConditionResolution, FederationError> {
        let edge_weight = self.graph.edge_weight(edge)?;
        if edge_weight.conditions.is_none() {
            return Ok(ConditionResolution::no_conditions());
        }
        let resolution =
            condition_resolver.resolve(edge, context, excluded_edges, excluded_conditions)?;
        if !resolution.is_satisfied() {
            return Ok(ConditionResolution::unsatisfied_conditions());
        }
        if matches!(
            edge_weight.transition,
            QueryGraphEdgeTransition::FieldCollection { .. }
        ) {
            let needs_post_require_key = match self.last_edge() {
                None => true,
                Some(None) => false,
                Some(Some(last_edge)) => !matches!(
                    self.graph.edge_weight(last_edge)?.transition,
                    QueryGraphEdgeTransition::KeyResolution
                ),
            };
            if needs_post_require_key {
                let (edge_head, _) = self.graph.edge_endpoints(edge)?;
                if self.graph.locally_satisfiable_key(edge_head)?.is_none() {
                    return Ok(ConditionResolution::Unsatisfied {
                        reason: Some(UnsatisfiedConditionReason::NoPostRequireKey),
                    });
                }
            }
        }
        Ok(resolution)
    }

    /// Computes the paths reachable from this one by only taking non-collecting edges (keys and
    /// root type resolutions) and ending on the same type as this path, but in other subgraphs.
    ///
    /// At most one path is kept per subgraph, the one with the fewest edges and then the cheapest
    /// conditions. Jumps that are detours through a subgraph that could be skipped altogether are
    /// ignored, and recorded as such in the dead ends along with the keys that couldn't be
    /// resolved.
    pub(crate) fn advance_with_non_collecting_and_type_preserving_transitions(
        &self,
        context: &OpGraphPathContext,
        condition_resolver: &mut impl ConditionResolver,
        excluded_edges: &ExcludedEdges,
        excluded_conditions: &ExcludedConditions,
    ) -> Result<IndirectPaths<TTrigger>, FederationError> {
        let graph = self.graph.clone();
        let is_top_level_path = self.is_on_top_level_query_root()?;
        let tail_weight = graph.node_weight(self.tail)?;
        let type_name = match &tail_weight.type_ {
            QueryGraphNodeType::SchemaType(type_name) => Some(type_name.clone()),
            QueryGraphNodeType::FederatedRootType(_) => None,
        };
        let original_source = tail_weight.source.clone();
        // A `None` value means moving to that subgraph was shown to be a detour.
        let mut best_path_by_source: IndexMap<Arc<str>, Option<(GraphPath<TTrigger>, f64)>> =
            IndexMap::new();
        let mut dead_ends = Vec::new();
        let mut excluded_edges = excluded_edges.clone();
        let mut to_try = vec![self.clone()];
        while let Some(to_advance) = pop_min(&mut to_try) {
            let next_edges = graph
                .out_edges(to_advance.tail)
                .into_iter()
                .filter(|edge_ref| !edge_ref.weight().transition.collect_operation_elements())
                .map(|edge_ref| edge_ref.id())
                .collect::<Vec<_>>();
            if next_edges.is_empty() {
                trace!("Nothing to try for {to_advance}: it has no non-collecting outbound edges");
                continue;
            }
            let to_advance_source = graph.node_weight(to_advance.tail)?.source.clone();
            for edge in next_edges {
                if excluded_edges.is_excluded(edge) {
                    continue;
                }
                excluded_edges = excluded_edges.add_item(edge);
                let edge_weight = graph.edge_weight(edge)?;
                if excluded_conditions.is_excluded(edge_weight.conditions.as_ref()) {
                    continue;
                }
                let (edge_head, edge_tail) = graph.edge_endpoints(edge)?;
                let target = graph.node_weight(edge_tail)?;
                if target.source == original_source {
                    continue;
                }
                if let Some(type_name) = &type_name {
                    if !matches!(&target.type_, QueryGraphNodeType::SchemaType(target_type) if target_type == type_name)
                    {
                        continue;
                    }
                }
                if is_top_level_path
                    && matches!(
                        edge_weight.transition,
                        QueryGraphEdgeTransition::RootTypeResolution { .. }
                    )
                {
                    continue;
                }
                match best_path_by_source.get(&target.source) {
                    Some(None) => {
                        trace!(
                            "Ignored edge {}: going to {} was shown not to be productive",
                            edge_weight,
                            target.source
                        );
                        continue;
                    }
                    Some(Some((previous_path, previous_cost)))
                        if previous_path.size < to_advance.size + 1
                            || (previous_path.size == to_advance.size + 1
                                && *previous_cost <= 1.0) =>
                    {
                        continue;
                    }
                    _ => {}
                }
                let condition_resolution = to_advance.can_satisfy_conditions(
                    edge,
                    condition_resolver,
                    context,
                    &excluded_edges,
                    excluded_conditions,
                )?;
                let ConditionResolution::Satisfied { cost } = condition_resolution else {
                    dead_ends.push(Unadvanceable {
                        reason: UnadvanceableReason::UnsatisfiableKeyCondition,
                        from_subgraph: to_advance_source.clone(),
                        to_subgraph: target.source.clone(),
                        details: format!(
                            "cannot move to subgraph \"{}\" using @key(fields: \"{}\") of \"{}\", the key field(s) cannot be resolved from subgraph \"{}\"",
                            target.source,
                            edge_weight
                                .conditions
                                .as_ref()
                                .map(|conditions| print_field_set(conditions, false))
                                .unwrap_or_default(),
                            graph.node_weight(edge_head)?.type_,
                            to_advance_source,
                        ),
                    });
                    continue;
                };
                if let Some(Some((previous_path, previous_cost))) =
                    best_path_by_source.get(&target.source)
                {
                    if previous_path.size == to_advance.size + 1 && *previous_cost <= cost {
                        continue;
                    }
                }
                if let Some(info) = to_advance.last_subgraph_entering_edge_info {
                    if matches!(
                        edge_weight.transition,
                        QueryGraphEdgeTransition::KeyResolution
                    ) {
                        let (entering_head, entering_tail) = graph.edge_endpoints(info.edge)?;
                        let entering_tail_is_current_type = type_name.as_ref().is_some_and(
                            |type_name| {
                                matches!(
                                    &graph.graph()[entering_tail].type_,
                                    QueryGraphNodeType::SchemaType(entering_type) if entering_type == type_name
                                )
                            },
                        );
                        if !entering_tail_is_current_type {
                            let previous_subgraph_node = to_advance
                                .check_direct_path_from_previous_subgraph_to(
                                    target.type_.type_name()?,
                                )?;
                            let entering_source = &graph.node_weight(entering_head)?.source;
                            let back_to_previous_subgraph = *entering_source == target.source;
                            let max_cost = info.conditions_cost
                                + if back_to_previous_subgraph { 0.0 } else { cost };
                            if let Some(previous_subgraph_node) = previous_subgraph_node {
                                if back_to_previous_subgraph
                                    || has_valid_direct_key_edge(
                                        &graph,
                                        previous_subgraph_node,
                                        &target.source,
                                        condition_resolver,
                                        max_cost,
                                    )?
                                {
                                    debug!(
                                        "Ignored edge {}: detour by subgraph {} from subgraph {}",
                                        edge_weight, to_advance_source, entering_source
                                    );
                                    best_path_by_source.insert(target.source.clone(), None);
                                    dead_ends.push(Unadvanceable {
                                        reason: UnadvanceableReason::IgnoredIndirectPath,
                                        from_subgraph: to_advance_source.clone(),
                                        to_subgraph: target.source.clone(),
                                        details: format!(
                                            "ignoring moving to subgraph \"{}\" using @key(fields: \"{}\") of \"{}\" because there is a more direct path in {} that avoids {} altogether.",
                                            target.source,
                                            edge_weight
                                                .conditions
                                                .as_ref()
                                                .map(|conditions| print_field_set(conditions, false))
                                                .unwrap_or_default(),
                                            graph.node_weight(edge_head)?.type_,
                                            target.source,
                                            to_advance_source,
                                        ),
                                    });
                                    continue;
                                }
                            }
                        }
                    }
                }
                let updated_path = to_advance.add(
                    TTrigger::for_non_collecting_transition(&edge_weight.transition, context),
                    Some(edge),
                    condition_resolution,
                )?;
                trace!("Using edge {edge_weight}, advanced path: {updated_path}");
                let is_key = matches!(
                    edge_weight.transition,
                    QueryGraphEdgeTransition::KeyResolution
                );
                best_path_by_source.insert(
                    target.source.clone(),
                    Some((updated_path.clone(), cost)),
                );
                if is_key {
                    to_try.push(updated_path);
                }
            }
        }
        Ok(IndirectPaths {
            paths: Arc::new(
                best_path_by_source
                    .into_values()
                    .flatten()
                    .map(|(path, _)| Arc::new(path))
                    .collect(),
            ),
            dead_ends: Arc::new(Unadvanceables(dead_ends)),
        })
    }
}

impl GraphPath<QueryGraphEdgeTransition> {
    /// Returns the path made of this path followed by the given one, which must start where this
    /// one ends.
    pub fn concat(&self, other: &Self) -> Result<Self, FederationError> {
        ensure!(
            self.tail == other.head,
            "Cannot concat {} after {}",
            other,
            self
        );
        if other.size == 0 {
            return Ok(self.clone());
        }
        let mut runtime_types_before_tail = self.runtime_types_before_tail_if_last_is_cast.clone();
        let mut runtime_types = self.runtime_types_of_tail.clone();
        let mut last_element = self.last_element.clone();
        for element in other.elements() {
            runtime_types_before_tail = Some(runtime_types.clone());
            runtime_types = Arc::new(updated_runtime_types(
                &self.graph,
                &runtime_types,
                element.edge,
            )?);
            last_element = Some(Arc::new(GraphPathElement {
                previous: last_element,
                trigger: element.trigger.clone(),
                edge: element.edge,
                condition_resolution: element.condition_resolution.clone(),
            }));
        }
        let last_subgraph_entering_edge_info = match other.last_subgraph_entering_edge_info {
            Some(info) => Some(SubgraphEnteringEdgeInfo {
                index: self.size + info.index,
                ..info
            }),
            None => self.last_subgraph_entering_edge_info,
        };
        let last_is_cast = match other.last_edge().flatten() {
            Some(edge) => matches!(
                self.graph.edge_weight(edge)?.transition,
                QueryGraphEdgeTransition::Downcast { .. }
            ),
            None => false,
        };
        Ok(Self {
            graph: self.graph.clone(),
            head: self.head,
            tail: other.tail,
            last_element,
            size: self.size + other.size,
            last_subgraph_entering_edge_info,
            runtime_types_of_tail: runtime_types,
            runtime_types_before_tail_if_last_is_cast: if last_is_cast {
                runtime_types_before_tail
            } else {
                None
            },
        })
    }
}

/// Whether the given node has a key edge to the given subgraph whose conditions can be resolved
/// for at most the given cost.
fn has_valid_direct_key_edge(
    graph: &QueryGraph,
    from: NodeIndex,
    to_source: &str,
    condition_resolver: &mut impl ConditionResolver,
    max_cost: f64,
) -> Result<bool, FederationError> {
    let key_edges = graph
        .out_edges(from)
        .into_iter()
        .filter(|edge_ref| {
            matches!(
                edge_ref.weight().transition,
                QueryGraphEdgeTransition::KeyResolution
            ) && &*graph.graph()[edge_ref.target()].source == to_source
        })
        .map(|edge_ref| edge_ref.id())
        .collect::<Vec<_>>();
    for edge in key_edges {
        let resolution = condition_resolver.resolve(
            edge,
            &Default::default(),
            &Default::default(),
            &Default::default(),
        )?;
        if let ConditionResolution::Satisfied { cost } = resolution {
            if cost <= max_cost {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

impl<TTrigger> Display for GraphPath<TTrigger>
where
    TTrigger: GraphPathTrigger,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let head_weight = self
            .graph
            .node_weight(self.head)
            .map_err(|_| std::fmt::Error)?;
        if head_weight.root_kind.is_some() && self.size == 0 {
            return write!(f, "_");
        }
        // Federated roots are implied by the subgraph root the path enters first.
        let is_federated_root = matches!(
            head_weight.type_,
            QueryGraphNodeType::FederatedRootType(_)
        );
        if !is_federated_root {
            write!(f, "{head_weight}")?;
        }
        for (index, element) in self.elements().into_iter().enumerate() {
            let Some(edge) = element.edge else {
                write!(f, " ({}) ", element.trigger)?;
                continue;
            };
            let edge_weight = self.graph.edge_weight(edge).map_err(|_| std::fmt::Error)?;
            let tail_weight = self
                .graph
                .edge_tail_weight(edge)
                .map_err(|_| std::fmt::Error)?;
            if is_federated_root && index == 0 {
                write!(f, "{tail_weight}")?;
                continue;
            }
            let label = edge_weight.to_string();
            if label.is_empty() {
                write!(f, " --> {tail_weight}")?;
            } else {
                write!(f, " --[{label}]--> {tail_weight}")?;
            }
        }
        if !self.runtime_types_of_tail.is_empty() {
            write!(
                f,
                " (types: [{}])",
                self.runtime_types_of_tail.iter().join(", ")
            )?;
        }
        Ok(())
    }
}
