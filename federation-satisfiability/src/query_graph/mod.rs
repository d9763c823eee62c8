use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::schema::NamedType;
use indexmap::IndexMap;
use indexmap::IndexSet;
use petgraph::Direction;
use petgraph::graph::DiGraph;
use petgraph::graph::EdgeIndex;
use petgraph::graph::EdgeReference;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;

use crate::bail;
use crate::ensure;
use crate::error::FederationError;
use crate::error::SingleFederationError;
use crate::schema::ValidFederationSchema;
use crate::schema::field_set::print_field_set;
use crate::schema::position::FieldDefinitionPosition;
use crate::schema::position::SchemaRootDefinitionKind;
use crate::subgraph::ExternalTester;
use crate::subgraph::Subgraph;

pub mod build_query_graph;
pub(crate) mod condition_resolver;
pub mod graph_path;
pub mod output;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueryGraphNode {
    /// The GraphQL type this node points to.
    pub(crate) type_: QueryGraphNodeType,
    /// An identifier of the underlying schema containing the `type_` this node points to. This is
    /// mainly used in federated query graphs, where the `source` is a subgraph name.
    pub(crate) source: Arc<str>,
    /// @provides works by creating duplicates of the node/type involved in the provides and adding
    /// the provided edges only to those copies. This means that with @provides, you can have more
    /// than one node per-type-and-subgraph in a query graph. The value of this field has no other
    /// meaning than to be unique per-@provides, and so all the nodes copied for a given @provides
    /// application will have the same `provide_id`.
    pub(crate) provide_id: Option<u32>,
    // If present, this node represents a root node of the corresponding kind.
    pub(crate) root_kind: Option<SchemaRootDefinitionKind>,
}

impl Display for QueryGraphNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.type_, self.source)?;
        if let Some(provide_id) = self.provide_id {
            write!(f, "-{}", provide_id)?;
        }
        if self.root_kind.is_some() {
            write!(f, "*")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::From)]
pub(crate) enum QueryGraphNodeType {
    SchemaType(NamedType),
    FederatedRootType(SchemaRootDefinitionKind),
}

impl QueryGraphNodeType {
    /// The name of the schema type this node points to. Federated roots point to no schema type.
    pub(crate) fn type_name(&self) -> Result<&Name, FederationError> {
        match self {
            QueryGraphNodeType::SchemaType(type_name) => Ok(type_name),
            QueryGraphNodeType::FederatedRootType(root_kind) => {
                bail!("Unexpectedly encountered federated root node for \"{root_kind}\"")
            }
        }
    }
}

impl Display for QueryGraphNodeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryGraphNodeType::SchemaType(type_name) => type_name.fmt(f),
            QueryGraphNodeType::FederatedRootType(root_kind) => {
                write!(f, "[{}]", root_kind)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct QueryGraphEdge {
    /// Indicates what kind of edge this is and what the edge does/represents. For instance, if the
    /// edge represents a field, the `transition` will be a `FieldCollection` transition and will
    /// link to the definition of the field it represents.
    pub(crate) transition: QueryGraphEdgeTransition,
    /// Optional conditions on an edge.
    ///
    /// Conditions are a selection set that the traversal of a query graph needs to "collect"
    /// (traverse edges with transitions corresponding to those selections) from the head of the
    /// edge, and in the same subgraph, in order to be able to take that edge.
    ///
    /// Conditions are primarily used for @key edges, in which case they correspond to the fields
    /// composing the key. Outside of keys, @requires edges also rely on conditions.
    pub(crate) conditions: Option<Arc<SelectionSet>>,
}

impl Display for QueryGraphEdge {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if matches!(
            self.transition,
            QueryGraphEdgeTransition::SubgraphEnteringTransition
        ) && self.conditions.is_none()
        {
            return Ok(());
        }
        if let Some(conditions) = &self.conditions {
            write!(
                f,
                "{} ⊢ {}",
                print_field_set(conditions, true),
                self.transition
            )
        } else {
            self.transition.fmt(f)
        }
    }
}

/// The type of query graph edge "transition".
///
/// An edge transition encodes what the edge corresponds to, in the underlying GraphQL schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryGraphEdgeTransition {
    /// A field edge, going from (a node for) the field parent type to the field's (base) type.
    FieldCollection {
        /// The name of the schema containing the field.
        source: Arc<str>,
        /// The object/interface field being collected.
        field_definition_position: FieldDefinitionPosition,
        /// Whether this field is part of an @provides.
        is_part_of_provides: bool,
    },
    /// A downcast edge, going from a composite type (object, interface, or union) to another
    /// composite type that intersects that type (i.e. has at least one possible runtime object type
    /// in common with it).
    Downcast {
        /// The name of the schema containing the from/to types.
        source: Arc<str>,
        /// The parent type of the type condition, i.e. the type of the selection set containing
        /// the type condition.
        from_type_name: NamedType,
        /// The type of the type condition, i.e. the type coming after "... on".
        to_type_name: NamedType,
    },
    /// A key edge (only found in federated query graphs) going from an entity type in a particular
    /// subgraph to the same entity type but in another subgraph. Key transition edges _must_ have
    /// `conditions` corresponding to the key fields.
    KeyResolution,
    /// A root type edge (only found in federated query graphs) going from a root type (query,
    /// mutation or subscription) of a subgraph to the (same) root type of another subgraph. It
    /// encodes the fact that if a subgraph field returns a root type, any subgraph can be queried
    /// from there.
    RootTypeResolution {
        /// The kind of schema root resolved.
        root_kind: SchemaRootDefinitionKind,
    },
    /// A subgraph-entering edge, which is a special case only used for edges coming out of the root
    /// nodes of "federated" query graphs. It does not correspond to any physical GraphQL elements
    /// but can be understood as the fact that the router is always free to start querying any of
    /// the subgraph services as needed.
    SubgraphEnteringTransition,
}

impl QueryGraphEdgeTransition {
    pub(crate) fn collect_operation_elements(&self) -> bool {
        match self {
            QueryGraphEdgeTransition::FieldCollection { .. } => true,
            QueryGraphEdgeTransition::Downcast { .. } => true,
            QueryGraphEdgeTransition::KeyResolution => false,
            QueryGraphEdgeTransition::RootTypeResolution { .. } => false,
            QueryGraphEdgeTransition::SubgraphEnteringTransition => false,
        }
    }

    /// Whether this (subgraph) transition can stand in for the given supergraph transition.
    ///
    /// Fields match by name, as long as the subgraph field type is a subtype of the supergraph
    /// one. Downcasts match on the type casted to.
    pub(crate) fn matches_supergraph_transition(
        &self,
        schema: &ValidFederationSchema,
        supergraph_transition: &Self,
        supergraph_schema: &ValidFederationSchema,
    ) -> Result<bool, FederationError> {
        ensure!(
            supergraph_transition.collect_operation_elements(),
            "Supergraphs shouldn't have a transition that doesn't collect elements; got {}",
            supergraph_transition,
        );
        Ok(match self {
            QueryGraphEdgeTransition::FieldCollection {
                field_definition_position,
                ..
            } => {
                let QueryGraphEdgeTransition::FieldCollection {
                    field_definition_position: supergraph_field_definition_position,
                    ..
                } = supergraph_transition
                else {
                    return Ok(false);
                };
                if field_definition_position.field_name
                    != supergraph_field_definition_position.field_name
                {
                    return Ok(false);
                }
                let field = field_definition_position.get(schema)?;
                let supergraph_field = supergraph_field_definition_position.get(supergraph_schema)?;
                supergraph_schema.is_subtype(&supergraph_field.ty, &field.ty)
            }
            QueryGraphEdgeTransition::Downcast { to_type_name, .. } => matches!(
                supergraph_transition,
                QueryGraphEdgeTransition::Downcast {
                    to_type_name: supergraph_to_type_name,
                    ..
                } if to_type_name == supergraph_to_type_name
            ),
            _ => std::mem::discriminant(self) == std::mem::discriminant(supergraph_transition),
        })
    }
}

impl Display for QueryGraphEdgeTransition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryGraphEdgeTransition::FieldCollection {
                field_definition_position,
                ..
            } => {
                write!(f, "{}", field_definition_position.field_name)
            }
            QueryGraphEdgeTransition::Downcast { to_type_name, .. } => {
                write!(f, "... on {}", to_type_name)
            }
            QueryGraphEdgeTransition::KeyResolution => {
                write!(f, "key()")
            }
            QueryGraphEdgeTransition::RootTypeResolution { root_kind } => {
                write!(f, "{}()", root_kind)
            }
            QueryGraphEdgeTransition::SubgraphEnteringTransition => {
                write!(f, "∅")
            }
        }
    }
}

/// A graph of the ways a query can be resolved against one or more schemas.
///
/// Nodes are (type, source) pairs and edges the transitions between them. A federated query graph
/// has one source per subgraph, plus the synthetic source of its federated roots.
#[derive(Debug)]
pub struct QueryGraph {
    /// The "current" source of the query graph. For query graphs representing a single source
    /// graph, this will only ever be one value, but it will change for "federated" query graphs
    /// while they're being built (and after construction, will become FEDERATED_GRAPH_ROOT_SOURCE,
    /// which is a reserved placeholder value).
    current_source: Arc<str>,
    /// The nodes/edges of the query graph. Note that nodes/edges should never be removed, so
    /// indexes are immutable when a node/edge is created.
    graph: DiGraph<QueryGraphNode, QueryGraphEdge>,
    /// The sources on which the query graph was built, which is a set (potentially of size 1) of
    /// GraphQL schema keyed by the name identifying them. Note that the `source` strings in the
    /// nodes/edges of a query graph are guaranteed to be valid key in this map.
    sources: IndexMap<Arc<str>, ValidFederationSchema>,
    /// The supergraph schema, for query graphs built from federated subgraphs.
    supergraph_schema: Option<ValidFederationSchema>,
    /// A map (keyed by source) that associates type names of the underlying schema on which this
    /// query graph was built to each of the nodes that points to a type of that name.
    types_to_nodes_by_source: IndexMap<Arc<str>, IndexMap<NamedType, IndexSet<NodeIndex>>>,
    /// A map (keyed by source) that associates schema root kinds to root nodes.
    root_kinds_to_nodes_by_source:
        IndexMap<Arc<str>, IndexMap<SchemaRootDefinitionKind, NodeIndex>>,
    /// Which fields of each source are truly external.
    external_testers: IndexMap<Arc<str>, ExternalTester>,
}

impl QueryGraph {
    pub fn name(&self) -> &str {
        &self.current_source
    }

    pub(crate) fn graph(&self) -> &DiGraph<QueryGraphNode, QueryGraphEdge> {
        &self.graph
    }

    pub(crate) fn node_weight(&self, node: NodeIndex) -> Result<&QueryGraphNode, FederationError> {
        self.graph.node_weight(node).ok_or_else(|| {
            SingleFederationError::Internal {
                message: "Node unexpectedly missing".to_owned(),
            }
            .into()
        })
    }

    pub(crate) fn edge_weight(&self, edge: EdgeIndex) -> Result<&QueryGraphEdge, FederationError> {
        self.graph.edge_weight(edge).ok_or_else(|| {
            SingleFederationError::Internal {
                message: "Edge unexpectedly missing".to_owned(),
            }
            .into()
        })
    }

    fn edge_weight_mut(&mut self, edge: EdgeIndex) -> Result<&mut QueryGraphEdge, FederationError> {
        self.graph.edge_weight_mut(edge).ok_or_else(|| {
            SingleFederationError::Internal {
                message: "Edge unexpectedly missing".to_owned(),
            }
            .into()
        })
    }

    pub(crate) fn edge_endpoints(
        &self,
        edge: EdgeIndex,
    ) -> Result<(NodeIndex, NodeIndex), FederationError> {
        self.graph.edge_endpoints(edge).ok_or_else(|| {
            SingleFederationError::Internal {
                message: "Edge unexpectedly missing".to_owned(),
            }
            .into()
        })
    }

    /// The node an edge leads to, with its weight.
    pub(crate) fn edge_tail_weight(
        &self,
        edge: EdgeIndex,
    ) -> Result<&QueryGraphNode, FederationError> {
        let (_, tail) = self.edge_endpoints(edge)?;
        self.node_weight(tail)
    }

    pub(crate) fn schema(&self) -> Result<&ValidFederationSchema, FederationError> {
        self.schema_by_source(&self.current_source)
    }

    pub(crate) fn schema_by_source(
        &self,
        source: &str,
    ) -> Result<&ValidFederationSchema, FederationError> {
        self.sources.get(source).ok_or_else(|| {
            SingleFederationError::Internal {
                message: "Schema unexpectedly missing".to_owned(),
            }
            .into()
        })
    }

    pub(crate) fn sources(&self) -> impl Iterator<Item = (&Arc<str>, &ValidFederationSchema)> {
        self.sources.iter()
    }

    /// The supergraph schema this federated query graph was built for. Query graphs built from a
    /// single schema have no supergraph, and their own schema is returned.
    pub(crate) fn supergraph_schema(&self) -> Result<&ValidFederationSchema, FederationError> {
        match &self.supergraph_schema {
            Some(supergraph_schema) => Ok(supergraph_schema),
            None => self.schema(),
        }
    }

    pub(crate) fn types_to_nodes(
        &self,
    ) -> Result<&IndexMap<NamedType, IndexSet<NodeIndex>>, FederationError> {
        self.types_to_nodes_by_source(&self.current_source)
    }

    pub(crate) fn types_to_nodes_by_source(
        &self,
        source: &str,
    ) -> Result<&IndexMap<NamedType, IndexSet<NodeIndex>>, FederationError> {
        self.types_to_nodes_by_source.get(source).ok_or_else(|| {
            SingleFederationError::Internal {
                message: "Types-to-nodes map unexpectedly missing".to_owned(),
            }
            .into()
        })
    }

    fn types_to_nodes_mut(
        &mut self,
    ) -> Result<&mut IndexMap<NamedType, IndexSet<NodeIndex>>, FederationError> {
        self.types_to_nodes_by_source
            .get_mut(&self.current_source)
            .ok_or_else(|| {
                SingleFederationError::Internal {
                    message: "Types-to-nodes map unexpectedly missing".to_owned(),
                }
                .into()
            })
    }

    pub(crate) fn root_kinds_to_nodes(
        &self,
    ) -> Result<&IndexMap<SchemaRootDefinitionKind, NodeIndex>, FederationError> {
        self.root_kinds_to_nodes_by_source
            .get(&self.current_source)
            .ok_or_else(|| {
                SingleFederationError::Internal {
                    message: "Root-kinds-to-nodes map unexpectedly missing".to_owned(),
                }
                .into()
            })
    }

    fn root_kinds_to_nodes_mut(
        &mut self,
    ) -> Result<&mut IndexMap<SchemaRootDefinitionKind, NodeIndex>, FederationError> {
        self.root_kinds_to_nodes_by_source
            .get_mut(&self.current_source)
            .ok_or_else(|| {
                SingleFederationError::Internal {
                    message: "Root-kinds-to-nodes map unexpectedly missing".to_owned(),
                }
                .into()
            })
    }

    pub(crate) fn external_tester(&self, source: &str) -> Result<&ExternalTester, FederationError> {
        self.external_testers.get(source).ok_or_else(|| {
            SingleFederationError::Internal {
                message: format!("External tester unexpectedly missing for \"{source}\""),
            }
            .into()
        })
    }

    /// The out edges of a node, in creation order.
    pub(crate) fn out_edges(&self, node: NodeIndex) -> Vec<EdgeReference<'_, QueryGraphEdge>> {
        let mut edges = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .collect::<Vec<_>>();
        edges.sort_by_key(|edge| edge.id());
        edges
    }

    /// Whether no edge leaves the given node.
    pub(crate) fn is_terminal(&self, node: NodeIndex) -> bool {
        self.graph
            .edges_directed(node, Direction::Outgoing)
            .next()
            .is_none()
    }

    pub(crate) fn is_root_node(&self, node: NodeIndex) -> Result<bool, FederationError> {
        Ok(self.node_weight(node)?.root_kind.is_some())
    }

    /// The edge collecting the given field from the given node, if any.
    pub(crate) fn edge_for_field(&self, node: NodeIndex, field_name: &str) -> Option<EdgeIndex> {
        self.out_edges(node)
            .into_iter()
            .find(|edge| {
                matches!(
                    &edge.weight().transition,
                    QueryGraphEdgeTransition::FieldCollection {
                        field_definition_position,
                        ..
                    } if field_definition_position.field_name.as_str() == field_name
                )
            })
            .map(|edge| edge.id())
    }

    /// The edge casting the given node to the given type, if any.
    pub(crate) fn edge_for_type_cast(&self, node: NodeIndex, type_name: &str) -> Option<EdgeIndex> {
        self.out_edges(node)
            .into_iter()
            .find(|edge| {
                matches!(
                    &edge.weight().transition,
                    QueryGraphEdgeTransition::Downcast { to_type_name, .. }
                        if to_type_name.as_str() == type_name
                )
            })
            .map(|edge| edge.id())
    }

    /// Returns the first key of the type of the given node that can be resolved from the node's
    /// own subgraph, that is a key that does not select any (truly) external field.
    pub(crate) fn locally_satisfiable_key(
        &self,
        node: NodeIndex,
    ) -> Result<Option<SelectionSet>, FederationError> {
        let node_weight = self.node_weight(node)?;
        let type_name = node_weight.type_.type_name()?;
        let schema = self.schema_by_source(&node_weight.source)?;
        let external_tester = self.external_tester(&node_weight.source)?;
        Ok(Subgraph::key_field_sets(schema, type_name)?
            .into_iter()
            .find(|key| !external_tester.selects_any_external_field(schema, key)))
    }
}

/// A per-node and per-edge state attached to a query graph, for algorithms that need to remember
/// what they saw of each node or edge.
#[derive(Debug)]
pub(crate) struct QueryGraphState<NodeState, EdgeState> {
    nodes_states: IndexMap<NodeIndex, NodeState>,
    edges_states: IndexMap<EdgeIndex, EdgeState>,
}

impl<NodeState, EdgeState> Default for QueryGraphState<NodeState, EdgeState> {
    fn default() -> Self {
        Self {
            nodes_states: IndexMap::new(),
            edges_states: IndexMap::new(),
        }
    }
}

impl<NodeState, EdgeState> QueryGraphState<NodeState, EdgeState> {
    pub(crate) fn node_state_mut(&mut self, node: NodeIndex) -> &mut NodeState
    where
        NodeState: Default,
    {
        self.nodes_states.entry(node).or_default()
    }

    pub(crate) fn edge_state(&self, edge: EdgeIndex) -> Option<&EdgeState> {
        self.edges_states.get(&edge)
    }

    pub(crate) fn set_edge_state(&mut self, edge: EdgeIndex, state: EdgeState) {
        self.edges_states.insert(edge, state);
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::name;

    use super::*;

    #[test]
    fn displays_nodes_and_transitions() {
        let node = QueryGraphNode {
            type_: QueryGraphNodeType::SchemaType(name!("T")),
            source: Arc::from("S1"),
            provide_id: Some(2),
            root_kind: None,
        };
        assert_eq!(node.to_string(), "T(S1)-2");
        let root = QueryGraphNode {
            type_: QueryGraphNodeType::FederatedRootType(SchemaRootDefinitionKind::Query),
            source: Arc::from("_"),
            provide_id: None,
            root_kind: Some(SchemaRootDefinitionKind::Query),
        };
        assert_eq!(root.to_string(), "[query](_)*");
        assert!(root.type_.type_name().is_err());

        let transitions = [
            QueryGraphEdgeTransition::FieldCollection {
                source: Arc::from("S1"),
                field_definition_position: FieldDefinitionPosition::new(name!("T"), name!("f")),
                is_part_of_provides: false,
            },
            QueryGraphEdgeTransition::Downcast {
                source: Arc::from("S1"),
                from_type_name: name!("I"),
                to_type_name: name!("T"),
            },
            QueryGraphEdgeTransition::KeyResolution,
            QueryGraphEdgeTransition::RootTypeResolution {
                root_kind: SchemaRootDefinitionKind::Mutation,
            },
            QueryGraphEdgeTransition::SubgraphEnteringTransition,
        ];
        assert_eq!(
            transitions.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
            ["f", "... on T", "key()", "mutation()", "∅"]
        );
        assert_eq!(
            transitions
                .iter()
                .map(|t| t.collect_operation_elements())
                .collect::<Vec<_>>(),
            [true, true, false, false, false]
        );
    }

    #[test]
    fn entering_edges_without_conditions_have_no_label() {
        let edge = QueryGraphEdge {
            transition: QueryGraphEdgeTransition::SubgraphEnteringTransition,
            conditions: None,
        };
        assert_eq!(edge.to_string(), "");
    }

    #[test]
    fn state_is_kept_per_node_and_edge() {
        let mut state = QueryGraphState::<Vec<u32>, &str>::default();
        assert!(state.node_state_mut(NodeIndex::new(1)).is_empty());
        state.node_state_mut(NodeIndex::new(1)).push(3);
        state.node_state_mut(NodeIndex::new(1)).push(4);
        assert_eq!(state.node_state_mut(NodeIndex::new(1)), &vec![3, 4]);
        state.set_edge_state(EdgeIndex::new(0), "seen");
        assert_eq!(state.edge_state(EdgeIndex::new(0)), Some(&"seen"));
        assert!(state.edge_state(EdgeIndex::new(1)).is_none());
    }
}
