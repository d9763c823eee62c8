use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::schema::ExtendedType;
use indexmap::IndexMap;
use indexmap::IndexSet;
use petgraph::graph::EdgeIndex;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use tracing::debug;

use crate::Supergraph;
use crate::bail;
use crate::error::FederationError;
use crate::error::SingleFederationError;
use crate::query_graph::QueryGraph;
use crate::query_graph::QueryGraphEdge;
use crate::query_graph::QueryGraphEdgeTransition;
use crate::query_graph::QueryGraphNode;
use crate::query_graph::QueryGraphNodeType;
use crate::schema::ValidFederationSchema;
use crate::schema::field_set::parse_field_set;
use crate::schema::position::FieldDefinitionPosition;
use crate::schema::position::INTROSPECTION_TYPENAME_FIELD_NAME;
use crate::schema::position::SchemaRootDefinitionKind;
use crate::subgraph::ExternalTester;
use crate::subgraph::Subgraph;
use crate::subgraph::spec::PROVIDES_DIRECTIVE_NAME;
use crate::subgraph::spec::REQUIRES_DIRECTIVE_NAME;
use crate::subgraph::spec::fields_argument;

/// The source of the root nodes of federated query graphs.
pub(crate) const FEDERATED_GRAPH_ROOT_SOURCE: &str = "_";

/// The source name of the query graph built from the supergraph API schema.
pub(crate) const SUPERGRAPH_API_SOURCE: &str = "supergraph";

/// Builds a "federated" query graph based on the provided supergraph and its subgraphs.
///
/// A federated query graph is one that is used to reason about queries made by a router against a
/// set of federated subgraph services.
#[cfg_attr(
    feature = "snapshot_tracing",
    tracing::instrument(level = "trace", skip_all, name = "build_federated_query_graph")
)]
pub fn build_federated_query_graph(
    supergraph: &Supergraph,
    subgraphs: &[Subgraph],
) -> Result<QueryGraph, FederationError> {
    let query_graph = subgraphs.iter().try_fold(
        QueryGraph::new(),
        |query_graph, subgraph| -> Result<QueryGraph, FederationError> {
            if query_graph.sources.contains_key(&subgraph.name) {
                return Err(SingleFederationError::InvalidSubgraph {
                    subgraph: subgraph.name.to_string(),
                    message: "A subgraph with this name was already provided".to_owned(),
                }
                .into());
            }
            SchemaQueryGraphBuilder::new(
                query_graph,
                subgraph.name.clone(),
                subgraph.schema.clone(),
                Some(supergraph.schema.clone()),
            )
            .build()
        },
    )?;
    FederatedQueryGraphBuilder::new(query_graph, supergraph.schema.clone()).build()
}

/// Builds the query graph of the supergraph API schema, which is the graph walked by
/// satisfiability validation.
pub fn build_supergraph_api_query_graph(
    supergraph: &Supergraph,
) -> Result<QueryGraph, FederationError> {
    build_query_graph(SUPERGRAPH_API_SOURCE.into(), supergraph.schema.clone())
}

/// Builds a query graph based on the provided schema (usually an API schema outside of testing).
pub fn build_query_graph(
    name: Arc<str>,
    schema: ValidFederationSchema,
) -> Result<QueryGraph, FederationError> {
    SchemaQueryGraphBuilder::new(QueryGraph::new(), name, schema, None).build()
}

impl QueryGraph {
    fn new() -> Self {
        Self {
            // Note this name is a dummy initial name that gets overridden as we build the query
            // graph.
            current_source: "".into(),
            graph: Default::default(),
            sources: Default::default(),
            supergraph_schema: Default::default(),
            types_to_nodes_by_source: Default::default(),
            root_kinds_to_nodes_by_source: Default::default(),
            external_testers: Default::default(),
        }
    }
}

struct BaseQueryGraphBuilder {
    query_graph: QueryGraph,
}

impl BaseQueryGraphBuilder {
    fn new(mut query_graph: QueryGraph, source: Arc<str>, schema: ValidFederationSchema) -> Self {
        query_graph.current_source = source.clone();
        query_graph
            .external_testers
            .insert(source.clone(), ExternalTester::new(&schema));
        query_graph.sources.insert(source.clone(), schema);
        query_graph
            .types_to_nodes_by_source
            .insert(source.clone(), IndexMap::new());
        query_graph
            .root_kinds_to_nodes_by_source
            .insert(source, IndexMap::new());
        Self { query_graph }
    }

    fn build(self) -> QueryGraph {
        self.query_graph
    }

    fn add_edge(
        &mut self,
        head: NodeIndex,
        tail: NodeIndex,
        transition: QueryGraphEdgeTransition,
        conditions: Option<Arc<SelectionSet>>,
    ) -> Result<EdgeIndex, FederationError> {
        // Both ends must exist.
        self.query_graph.node_weight(head)?;
        self.query_graph.node_weight(tail)?;
        Ok(self.query_graph.graph.add_edge(
            head,
            tail,
            QueryGraphEdge {
                transition,
                conditions,
            },
        ))
    }

    fn create_new_node(&mut self, type_: QueryGraphNodeType) -> Result<NodeIndex, FederationError> {
        let node = self.query_graph.graph.add_node(QueryGraphNode {
            type_: type_.clone(),
            source: self.query_graph.current_source.clone(),
            provide_id: None,
            root_kind: None,
        });
        if let QueryGraphNodeType::SchemaType(type_name) = type_ {
            self.query_graph
                .types_to_nodes_mut()?
                .entry(type_name)
                .or_default()
                .insert(node);
        }
        Ok(node)
    }

    fn create_root_node(
        &mut self,
        type_: QueryGraphNodeType,
        root_kind: SchemaRootDefinitionKind,
    ) -> Result<NodeIndex, FederationError> {
        let node = self.create_new_node(type_)?;
        self.set_as_root(node, root_kind)?;
        Ok(node)
    }

    fn set_as_root(
        &mut self,
        node: NodeIndex,
        root_kind: SchemaRootDefinitionKind,
    ) -> Result<(), FederationError> {
        let root_kinds_to_nodes = self.query_graph.root_kinds_to_nodes_mut()?;
        if let Some(existing) = root_kinds_to_nodes.get(&root_kind) {
            bail!("Root node for {root_kind} ({existing:?}) already exists: cannot replace by {node:?}");
        }
        root_kinds_to_nodes.insert(root_kind, node);
        let Some(node_weight) = self.query_graph.graph.node_weight_mut(node) else {
            bail!("Node unexpectedly missing");
        };
        node_weight.root_kind = Some(root_kind);
        Ok(())
    }
}

/// Builds the query graph of a single schema, starting from each of its root types.
///
/// When a supergraph schema is provided, the schema is a subgraph of that supergraph, and interface
/// fields that every local implementation resolves directly get their own edge, so that traversals
/// do not have to type-explode them.
struct SchemaQueryGraphBuilder {
    base: BaseQueryGraphBuilder,
    schema: ValidFederationSchema,
    supergraph_schema: Option<ValidFederationSchema>,
}

impl SchemaQueryGraphBuilder {
    fn new(
        query_graph: QueryGraph,
        source: Arc<str>,
        schema: ValidFederationSchema,
        supergraph_schema: Option<ValidFederationSchema>,
    ) -> Self {
        let base = BaseQueryGraphBuilder::new(query_graph, source, schema.clone());
        Self {
            base,
            schema,
            supergraph_schema,
        }
    }

    fn build(mut self) -> Result<QueryGraph, FederationError> {
        for (root_kind, root_type_name) in self.schema.root_types() {
            let node = self.add_type_recursively(&root_type_name)?;
            self.base.set_as_root(node, root_kind)?;
        }
        debug!(
            "Built query graph for \"{}\": {} nodes, {} edges",
            self.base.query_graph.current_source,
            self.base.query_graph.graph.node_count(),
            self.base.query_graph.graph.edge_count(),
        );
        Ok(self.base.build())
    }

    /// Adds a node for the given type (if not already present) along with the edges of its fields
    /// and casts, recursing into the types those edges lead to.
    fn add_type_recursively(&mut self, type_name: &Name) -> Result<NodeIndex, FederationError> {
        if let Some(existing) = self.base.query_graph.types_to_nodes()?.get(type_name) {
            let Some(first) = existing.first() else {
                bail!("Types-to-nodes set unexpectedly empty for type \"{type_name}\"");
            };
            if existing.len() > 1 {
                bail!("Only one node should have been created for type \"{type_name}\"");
            }
            return Ok(*first);
        }
        let node = self
            .base
            .create_new_node(QueryGraphNodeType::SchemaType(type_name.clone()))?;
        let schema = self.schema.clone();
        match schema.get_type(type_name)? {
            ExtendedType::Object(object) => {
                let source = self.base.query_graph.current_source.clone();
                let external_tester = self.base.query_graph.external_tester(&source)?;
                let fields = object
                    .fields
                    .keys()
                    .map(|field_name| FieldDefinitionPosition::new(type_name.clone(), field_name.clone()))
                    .filter(|position| !external_tester.is_external(&schema, position))
                    .collect::<Vec<_>>();
                for position in fields {
                    self.add_edge_for_field(position, node)?;
                }
                self.add_edge_for_field(
                    FieldDefinitionPosition::new(
                        type_name.clone(),
                        INTROSPECTION_TYPENAME_FIELD_NAME.clone(),
                    ),
                    node,
                )?;
            }
            ExtendedType::Interface(interface) => {
                if self.supergraph_schema.is_some() {
                    let fields = interface.fields.keys().cloned().collect::<Vec<_>>();
                    self.maybe_add_interface_fields_edges(type_name, fields, node)?;
                }
                self.add_abstract_type_edges(type_name, node)?;
            }
            ExtendedType::Union(_) => {
                self.add_edge_for_field(
                    FieldDefinitionPosition::new(
                        type_name.clone(),
                        INTROSPECTION_TYPENAME_FIELD_NAME.clone(),
                    ),
                    node,
                )?;
                self.add_abstract_type_edges(type_name, node)?;
            }
            _ => {}
        }
        Ok(node)
    }

    fn add_edge_for_field(
        &mut self,
        position: FieldDefinitionPosition,
        head: NodeIndex,
    ) -> Result<(), FederationError> {
        let field = position.get(&self.schema)?;
        let tail_type_name = field.ty.inner_named_type().clone();
        let tail = self.add_type_recursively(&tail_type_name)?;
        let transition = QueryGraphEdgeTransition::FieldCollection {
            source: self.base.query_graph.current_source.clone(),
            field_definition_position: position,
            is_part_of_provides: false,
        };
        self.base.add_edge(head, tail, transition, None)?;
        Ok(())
    }

    /// Whether the given type has a local definition of the field that resolves it directly, that
    /// is a definition that is neither external nor requiring other fields.
    fn is_directly_provided_by_type(
        &self,
        external_tester: &ExternalTester,
        type_name: &Name,
        field_name: &Name,
    ) -> bool {
        let position = FieldDefinitionPosition::new(type_name.clone(), field_name.clone());
        position.try_get(&self.schema).is_some_and(|field| {
            !external_tester.is_external(&self.schema, &position)
                && !field.directives.has(&REQUIRES_DIRECTIVE_NAME)
        })
    }

    /// Adds edges for the fields of an interface that every local implementation (among the
    /// implementations the supergraph knows of) resolves directly.
    fn maybe_add_interface_fields_edges(
        &mut self,
        type_name: &Name,
        field_names: Vec<Name>,
        head: NodeIndex,
    ) -> Result<(), FederationError> {
        let Some(supergraph_schema) = &self.supergraph_schema else {
            bail!("Missing supergraph schema when building a subgraph");
        };
        if !supergraph_schema.types.contains_key(type_name) {
            return Ok(());
        }
        let local_runtime_types = supergraph_schema
            .possible_runtime_types(type_name)
            .into_iter()
            .filter(|runtime_type| self.schema.types.contains_key(runtime_type))
            .collect::<Vec<_>>();
        let source = self.base.query_graph.current_source.clone();
        let external_tester = self.base.query_graph.external_tester(&source)?;
        let fields = field_names
            .into_iter()
            .map(|field_name| FieldDefinitionPosition::new(type_name.clone(), field_name))
            .filter(|position| {
                !external_tester.is_external(&self.schema, position)
                    && local_runtime_types.iter().all(|runtime_type| {
                        self.is_directly_provided_by_type(
                            external_tester,
                            runtime_type,
                            &position.field_name,
                        )
                    })
            })
            .chain(std::iter::once(FieldDefinitionPosition::new(
                type_name.clone(),
                INTROSPECTION_TYPENAME_FIELD_NAME.clone(),
            )))
            .collect::<Vec<_>>();
        for position in fields {
            self.add_edge_for_field(position, head)?;
        }
        Ok(())
    }

    fn add_abstract_type_edges(
        &mut self,
        type_name: &Name,
        head: NodeIndex,
    ) -> Result<(), FederationError> {
        for implementation_type_name in self.schema.possible_runtime_types(type_name) {
            let tail = self.add_type_recursively(&implementation_type_name)?;
            let transition = QueryGraphEdgeTransition::Downcast {
                source: self.base.query_graph.current_source.clone(),
                from_type_name: type_name.clone(),
                to_type_name: implementation_type_name,
            };
            self.base.add_edge(head, tail, transition, None)?;
        }
        Ok(())
    }
}

struct FederatedQueryGraphBuilder {
    base: BaseQueryGraphBuilder,
}

impl FederatedQueryGraphBuilder {
    fn new(mut query_graph: QueryGraph, supergraph_schema: ValidFederationSchema) -> Self {
        query_graph.supergraph_schema = Some(supergraph_schema);
        let base = BaseQueryGraphBuilder::new(
            query_graph,
            FEDERATED_GRAPH_ROOT_SOURCE.into(),
            // The federated roots point to no schema type, so their source schema is never used.
            ValidFederationSchema::empty(),
        );
        Self { base }
    }

    fn build(mut self) -> Result<QueryGraph, FederationError> {
        self.add_federated_root_nodes()?;
        self.add_root_edges()?;
        self.handle_key()?;
        self.handle_requires()?;
        // Note that @provides must be handled last when building since it requires copying nodes
        // and their edges, and it's easier to reason about this if we know previous steps are done.
        self.handle_provides()?;
        debug!(
            "Built federated query graph: {} nodes, {} edges",
            self.base.query_graph.graph.node_count(),
            self.base.query_graph.graph.edge_count(),
        );
        Ok(self.base.build())
    }

    fn add_federated_root_nodes(&mut self) -> Result<(), FederationError> {
        let root_kinds = self
            .base
            .query_graph
            .root_kinds_to_nodes_by_source
            .iter()
            .filter(|(source, _)| **source != self.base.query_graph.current_source)
            .flat_map(|(_, root_kind_to_nodes)| root_kind_to_nodes.keys().copied())
            .collect::<IndexSet<_>>();
        for root_kind in root_kinds {
            self.base.create_root_node(root_kind.into(), root_kind)?;
        }
        Ok(())
    }

    /// Add the edges from supergraph roots to the subgraph ones. Also, for each root kind, we also
    /// add edges from the corresponding root type of each subgraph to the root type of other
    /// subgraphs. This encodes the fact that if a field returns a root type, we can always query
    /// any subgraph from that point.
    fn add_root_edges(&mut self) -> Result<(), FederationError> {
        let mut new_edges = Vec::new();
        let query_graph = &self.base.query_graph;
        for (source, root_kinds_to_nodes) in &query_graph.root_kinds_to_nodes_by_source {
            if *source == query_graph.current_source {
                continue;
            }
            for (root_kind, root_node) in root_kinds_to_nodes {
                let federated_root_node = query_graph
                    .root_kinds_to_nodes()?
                    .get(root_kind)
                    .ok_or_else(|| SingleFederationError::Internal {
                        message: "Federated root node unexpectedly missing".to_owned(),
                    })?;
                new_edges.push((
                    *federated_root_node,
                    *root_node,
                    QueryGraphEdgeTransition::SubgraphEnteringTransition,
                ));
                for (other_source, other_root_kinds_to_nodes) in
                    &query_graph.root_kinds_to_nodes_by_source
                {
                    if *other_source == query_graph.current_source || other_source == source {
                        continue;
                    }
                    if let Some(other_root_node) = other_root_kinds_to_nodes.get(root_kind) {
                        new_edges.push((
                            *root_node,
                            *other_root_node,
                            QueryGraphEdgeTransition::RootTypeResolution {
                                root_kind: *root_kind,
                            },
                        ));
                    }
                }
            }
        }
        for (head, tail, transition) in new_edges {
            self.base.add_edge(head, tail, transition, None)?;
        }
        Ok(())
    }

    /// Handle @key by adding the appropriate key-resolution edges.
    fn handle_key(&mut self) -> Result<(), FederationError> {
        // We'll look at adding edges from "other subgraphs" to the current type. So the tail of
        // all the edges we'll build here is always going to be the same.
        for tail in self.base.query_graph.graph.node_indices() {
            let mut new_edges = Vec::new();
            let query_graph = &self.base.query_graph;
            let tail_weight = query_graph.node_weight(tail)?;
            let source = &tail_weight.source;
            if *source == query_graph.current_source {
                continue;
            }
            // Ignore federated root nodes.
            let QueryGraphNodeType::SchemaType(type_name) = &tail_weight.type_ else {
                continue;
            };
            let schema = query_graph.schema_by_source(source)?;
            // The @key directive creates an edge from every other subgraph having that type to the
            // current subgraph. In other words, the fact this subgraph has a @key means that the
            // current subgraph can be queried for the entity (through _entities) as long as "the
            // other side" can provide the proper field values. Note that we only require that "the
            // other side" can gather the key fields (through the path conditions; note that it's
            // possible those conditions are never satisfiable), but we don't care that it defines
            // the same key, because it's not a technical requirement.
            for conditions in Subgraph::key_field_sets(schema, type_name)? {
                let conditions = Arc::new(conditions);
                for (other_source, other_types_to_nodes) in &query_graph.types_to_nodes_by_source
                {
                    if *other_source == query_graph.current_source || other_source == source {
                        continue;
                    }
                    let Some(other_nodes) = other_types_to_nodes.get(type_name) else {
                        continue;
                    };
                    let Some(head) = other_nodes.first() else {
                        bail!(
                            "Types-to-nodes set unexpectedly empty for type \"{type_name}\" in subgraph \"{other_source}\""
                        );
                    };
                    // Note that later, when we've handled @provides, this might not be true
                    // anymore as @provides may create copy of a certain type. But for now, it's
                    // true.
                    if other_nodes.len() > 1 {
                        bail!(
                            "Types-to-nodes set unexpectedly had more than one element for type \"{type_name}\" in subgraph \"{other_source}\""
                        );
                    }
                    // The edge goes from the other subgraph to this one.
                    new_edges.push((*head, conditions.clone()));
                }
            }
            for (head, conditions) in new_edges {
                self.base.add_edge(
                    head,
                    tail,
                    QueryGraphEdgeTransition::KeyResolution,
                    Some(conditions),
                )?;
            }
        }
        Ok(())
    }

    /// Handle @requires by updating the appropriate field-collecting edges.
    fn handle_requires(&mut self) -> Result<(), FederationError> {
        // We'll look at any field-collecting edges with @requires and adding their conditions to
        // those edges.
        for edge in self.base.query_graph.graph.edge_indices() {
            let query_graph = &self.base.query_graph;
            let edge_weight = query_graph.edge_weight(edge)?;
            let QueryGraphEdgeTransition::FieldCollection {
                source,
                field_definition_position,
                ..
            } = &edge_weight.transition
            else {
                continue;
            };
            if *source == query_graph.current_source {
                continue;
            }
            // Nothing prior to this should have set any conditions for field-collecting edges.
            if edge_weight.conditions.is_some() {
                bail!(
                    "Field-collection edge for field \"{field_definition_position}\" unexpectedly had conditions"
                );
            }
            let schema = query_graph.schema_by_source(source)?;
            let field = field_definition_position.get(schema)?;
            // @requires is not repeatable.
            let Some(application) = field.directives.get(&REQUIRES_DIRECTIVE_NAME) else {
                continue;
            };
            let conditions = parse_field_set(
                schema,
                field_definition_position.type_name.clone(),
                fields_argument(application)?,
            )?;
            self.base.query_graph.edge_weight_mut(edge)?.conditions = Some(Arc::new(conditions));
        }
        Ok(())
    }

    /// Handle @provides by copying the nodes it goes through, and adding the provided edges to
    /// those copies.
    fn handle_provides(&mut self) -> Result<(), FederationError> {
        let mut provide_id = 0;
        for edge in self.base.query_graph.graph.edge_indices() {
            let query_graph = &self.base.query_graph;
            let edge_weight = query_graph.edge_weight(edge)?;
            let QueryGraphEdgeTransition::FieldCollection {
                source,
                field_definition_position,
                ..
            } = &edge_weight.transition
            else {
                continue;
            };
            if *source == query_graph.current_source {
                continue;
            }
            let source = source.clone();
            let schema = query_graph.schema_by_source(&source)?;
            let field = field_definition_position.get(schema)?;
            // @provides is not repeatable.
            let Some(application) = field.directives.get(&PROVIDES_DIRECTIVE_NAME) else {
                continue;
            };
            let field_type_name = field.ty.inner_named_type();
            if !schema.is_composite_type(field_type_name) {
                return Err(SingleFederationError::InvalidFieldSet {
                    message: format!(
                        "Invalid @provides on field \"{field_definition_position}\" whose type \"{field_type_name}\" is not a composite type"
                    ),
                }
                .into());
            }
            let provided = parse_field_set(
                schema,
                field_type_name.clone(),
                fields_argument(application)?,
            )?;
            provide_id += 1;
            // We make a copy of the tail node (representing the field's type) with all the same
            // out-edges, and we change this particular in-edge to point to the new copy. We then
            // add all the provides edges starting from the copy.
            let (_, tail) = self.base.query_graph.edge_endpoints(edge)?;
            let new_tail = Self::copy_for_provides(&mut self.base, tail, provide_id)?;
            Self::update_edge_tail(&mut self.base, edge, new_tail)?;
            Self::add_provides_edges(&mut self.base, &source, new_tail, &provided, provide_id)?;
        }
        Ok(())
    }

    fn add_provides_edges(
        base: &mut BaseQueryGraphBuilder,
        source: &Arc<str>,
        head: NodeIndex,
        provided: &SelectionSet,
        provide_id: u32,
    ) -> Result<(), FederationError> {
        let mut stack = vec![(head, provided)];
        while let Some((node, selection_set)) = stack.pop() {
            // We reverse-iterate through the selections to cancel out the reversing that the stack
            // does.
            for selection in selection_set.selections.iter().rev() {
                match selection {
                    Selection::Field(field_selection) => {
                        let existing_edge_info = base
                            .query_graph
                            .out_edges(node)
                            .into_iter()
                            .find(|edge_ref| {
                                matches!(
                                    &edge_ref.weight().transition,
                                    QueryGraphEdgeTransition::FieldCollection {
                                        field_definition_position,
                                        ..
                                    } if field_definition_position.field_name == field_selection.name
                                )
                            })
                            .map(|edge_ref| (edge_ref.id(), edge_ref.target()));
                        let has_selections = !field_selection.selection_set.selections.is_empty();
                        if let Some((edge, tail)) = existing_edge_info {
                            // If this is a leaf field, then we don't really have anything to do.
                            // Otherwise, we need to copy the tail and continue propagating the
                            // provided selections from there.
                            if has_selections {
                                let new_tail = Self::copy_for_provides(base, tail, provide_id)?;
                                Self::update_edge_tail(base, edge, new_tail)?;
                                stack.push((new_tail, &field_selection.selection_set))
                            }
                            continue;
                        }
                        // There are no existing edges, which means that it's an edge added by an
                        // @provides to an @external field. We look for an existing node of the
                        // field type that isn't itself a @provides copy, and create one if the
                        // subgraph never reached that type.
                        let tail_type_name = field_selection.definition.ty.inner_named_type();
                        let existing_tail = base
                            .query_graph
                            .types_to_nodes_by_source(source)?
                            .get(tail_type_name)
                            .into_iter()
                            .flatten()
                            .copied()
                            .find(|possible_tail| {
                                base.query_graph
                                    .node_weight(*possible_tail)
                                    .is_ok_and(|weight| weight.provide_id.is_none())
                            });
                        let transition = QueryGraphEdgeTransition::FieldCollection {
                            source: source.clone(),
                            field_definition_position: FieldDefinitionPosition::new(
                                selection_set.ty.clone(),
                                field_selection.name.clone(),
                            ),
                            is_part_of_provides: true,
                        };
                        // If this is a leaf field, then just create the new edge and we're done.
                        // Otherwise, we should copy the node, add the edge, and continue
                        // propagating.
                        let tail = match existing_tail {
                            Some(existing_tail) if has_selections => {
                                Self::copy_for_provides(base, existing_tail, provide_id)?
                            }
                            Some(existing_tail) => existing_tail,
                            None => Self::create_in_source(base, source, tail_type_name)?,
                        };
                        base.add_edge(node, tail, transition, None)?;
                        if has_selections {
                            stack.push((tail, &field_selection.selection_set))
                        }
                    }
                    Selection::InlineFragment(inline_fragment) => {
                        match &inline_fragment.type_condition {
                            Some(type_condition) if *type_condition != selection_set.ty => {
                                // We should always have an edge: otherwise it would mean we list a
                                // type condition for a type that isn't in the subgraph, but the
                                // @provides shouldn't have validated in the first place.
                                let (edge, tail) = base
                                    .query_graph
                                    .out_edges(node)
                                    .into_iter()
                                    .find(|edge_ref| {
                                        matches!(
                                            &edge_ref.weight().transition,
                                            QueryGraphEdgeTransition::Downcast { to_type_name, .. }
                                                if to_type_name == type_condition
                                        )
                                    })
                                    .map(|edge_ref| (edge_ref.id(), edge_ref.target()))
                                    .ok_or_else(|| SingleFederationError::Internal {
                                        message: format!(
                                            "Shouldn't have a fragment on \"{type_condition}\" in an @provides, as its type condition has no query graph edge",
                                        ),
                                    })?;
                                let new_tail = Self::copy_for_provides(base, tail, provide_id)?;
                                Self::update_edge_tail(base, edge, new_tail)?;
                                stack.push((new_tail, &inline_fragment.selection_set))
                            }
                            _ => {
                                // Essentially ignore the condition in this case, and continue
                                // propagating the provided selections.
                                stack.push((node, &inline_fragment.selection_set));
                            }
                        }
                    }
                    Selection::FragmentSpread(_) => {
                        bail!("Unexpected fragment spread in @provides field set")
                    }
                }
            }
        }
        Ok(())
    }

    fn update_edge_tail(
        base: &mut BaseQueryGraphBuilder,
        edge: EdgeIndex,
        tail: NodeIndex,
    ) -> Result<(), FederationError> {
        // Note that petgraph has no method to directly update an edge's endpoints. Instead, you
        // must:
        // 1. Add a new edge, with the same weight but updated endpoints. This edge then becomes the
        //    last edge in the graph (i.e. the one with highest edge index).
        // 2. Remove the old edge. As per the API docs, this causes the last edge's index to change
        //    to be the one that was removed.
        // This results in a Graph where it looks like only the edge's endpoints have changed while
        // its index and weight are unchanged, but really its weight has been cloned (which is
        // cheap).
        let (new_edge_head, _) = base.query_graph.edge_endpoints(edge)?;
        let new_edge_weight = base.query_graph.edge_weight(edge)?.clone();
        base.query_graph
            .graph
            .add_edge(new_edge_head, tail, new_edge_weight);
        base.query_graph.graph.remove_edge(edge);
        Ok(())
    }

    /// Creates a node in the given source, for a type that source never reached so far.
    fn create_in_source(
        base: &mut BaseQueryGraphBuilder,
        source: &Arc<str>,
        type_name: &Name,
    ) -> Result<NodeIndex, FederationError> {
        let current_source = std::mem::replace(&mut base.query_graph.current_source, source.clone());
        let result = base.create_new_node(QueryGraphNodeType::SchemaType(type_name.clone()));
        // Ensure that the current source resets, even if the creation unexpectedly fails.
        base.query_graph.current_source = current_source;
        result
    }

    /// Copies the given node and its outgoing edges, returning the new node's index.
    fn copy_for_provides(
        base: &mut BaseQueryGraphBuilder,
        node: NodeIndex,
        provide_id: u32,
    ) -> Result<NodeIndex, FederationError> {
        let node_weight = base.query_graph.node_weight(node)?;
        let QueryGraphNodeType::SchemaType(type_name) = node_weight.type_.clone() else {
            bail!("Unexpectedly found @provides for federated root node");
        };
        let source = node_weight.source.clone();
        let new_node = Self::create_in_source(base, &source, &type_name)?;
        let Some(new_node_weight) = base.query_graph.graph.node_weight_mut(new_node) else {
            bail!("Node unexpectedly missing");
        };
        new_node_weight.provide_id = Some(provide_id);

        let new_edges = base
            .query_graph
            .out_edges(node)
            .into_iter()
            .map(|edge_ref| (edge_ref.target(), edge_ref.weight().clone()))
            .collect::<Vec<_>>();
        for (tail, edge_weight) in new_edges {
            base.add_edge(new_node, tail, edge_weight.transition, edge_weight.conditions)?;
        }
        Ok(new_node)
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::Schema;
    use apollo_compiler::name;
    use petgraph::Direction;
    use pretty_assertions::assert_eq;

    use super::*;

    const SCHEMA_NAME: &str = "test";

    fn test_query_graph_from_schema_sdl(sdl: &str) -> Result<QueryGraph, FederationError> {
        let schema = ValidFederationSchema::new(Schema::parse_and_validate(sdl, "schema.graphql")?);
        build_query_graph(SCHEMA_NAME.into(), schema)
    }

    fn assert_node_type(
        query_graph: &QueryGraph,
        node: NodeIndex,
        type_name: Name,
        root_kind: Option<SchemaRootDefinitionKind>,
    ) -> Result<(), FederationError> {
        assert_eq!(
            *query_graph.node_weight(node)?,
            QueryGraphNode {
                type_: QueryGraphNodeType::SchemaType(type_name),
                source: SCHEMA_NAME.into(),
                provide_id: None,
                root_kind,
            },
        );
        Ok(())
    }

    fn single_edge(
        query_graph: &QueryGraph,
        head: NodeIndex,
        field_name: Name,
    ) -> Result<NodeIndex, FederationError> {
        let type_name = query_graph.node_weight(head)?.type_.type_name()?.clone();
        let expected_field_transition = QueryGraphEdgeTransition::FieldCollection {
            source: SCHEMA_NAME.into(),
            field_definition_position: FieldDefinitionPosition::new(type_name, field_name),
            is_part_of_provides: false,
        };
        let mut tails = query_graph
            .graph
            .edges_directed(head, Direction::Outgoing)
            .filter_map(|edge_ref| {
                let edge_weight = edge_ref.weight();
                if edge_weight.transition == expected_field_transition {
                    assert!(edge_weight.conditions.is_none());
                    Some(edge_ref.target())
                } else {
                    None
                }
            })
            .collect::<Vec<_>>();
        assert_eq!(tails.len(), 1);
        Ok(tails.pop().unwrap())
    }

    fn out_edge_labels(query_graph: &QueryGraph, node: NodeIndex) -> Vec<String> {
        query_graph
            .out_edges(node)
            .into_iter()
            .map(|edge_ref| {
                format!(
                    "{} -> {}",
                    edge_ref.weight(),
                    query_graph.node_weight(edge_ref.target()).unwrap()
                )
                .trim_start()
                .to_owned()
            })
            .collect()
    }

    #[test]
    fn building_query_graphs_from_schema_handles_object_types() -> Result<(), FederationError> {
        let query_graph = test_query_graph_from_schema_sdl(
            r#"
            type Query {
              t1: T1
            }

            type T1 {
              f1: Int
              f2: String
              f3: T2
            }

            type T2 {
              t: T1
            }
            "#,
        )?;

        // We have 3 object types and 2 scalars (Int and String)
        assert_eq!(query_graph.graph.node_count(), 5);
        let root_node = *query_graph
            .root_kinds_to_nodes()?
            .get(&SchemaRootDefinitionKind::Query)
            .unwrap();
        assert_node_type(
            &query_graph,
            root_node,
            name!("Query"),
            Some(SchemaRootDefinitionKind::Query),
        )?;
        assert_eq!(
            out_edge_labels(&query_graph, root_node),
            ["t1 -> T1(test)", "__typename -> String(test)"]
        );

        let t1_node = single_edge(&query_graph, root_node, name!("t1"))?;
        assert_node_type(&query_graph, t1_node, name!("T1"), None)?;
        assert_eq!(
            out_edge_labels(&query_graph, t1_node),
            [
                "f1 -> Int(test)",
                "f2 -> String(test)",
                "f3 -> T2(test)",
                "__typename -> String(test)",
            ]
        );
        let t1_f1_tail = single_edge(&query_graph, t1_node, name!("f1"))?;
        assert!(query_graph.is_terminal(t1_f1_tail));

        let t2_node = single_edge(&query_graph, t1_node, name!("f3"))?;
        assert_node_type(&query_graph, t2_node, name!("T2"), None)?;
        // The cycle back to T1 reuses the existing node.
        assert_eq!(single_edge(&query_graph, t2_node, name!("t"))?, t1_node);
        Ok(())
    }

    #[test]
    fn abstract_types_are_type_exploded_in_api_graphs() -> Result<(), FederationError> {
        let query_graph = test_query_graph_from_schema_sdl(
            r#"
            type Query {
              i: I
              u: U
            }

            interface I {
              id: ID!
            }

            type A implements I {
              id: ID!
            }

            type B implements I {
              id: ID!
            }

            union U = A | B
            "#,
        )?;
        let root_node = *query_graph
            .root_kinds_to_nodes()?
            .get(&SchemaRootDefinitionKind::Query)
            .unwrap();
        let i_node = single_edge(&query_graph, root_node, name!("i"))?;
        assert_eq!(
            out_edge_labels(&query_graph, i_node),
            ["... on A -> A(test)", "... on B -> B(test)"]
        );
        let u_node = single_edge(&query_graph, root_node, name!("u"))?;
        assert_eq!(
            out_edge_labels(&query_graph, u_node),
            [
                "__typename -> String(test)",
                "... on A -> A(test)",
                "... on B -> B(test)",
            ]
        );
        Ok(())
    }

    fn supergraph(sdl: &str) -> Supergraph {
        Supergraph::new(sdl).unwrap()
    }

    fn node_for(query_graph: &QueryGraph, source: &str, type_name: &str) -> NodeIndex {
        let nodes = query_graph
            .types_to_nodes_by_source(source)
            .unwrap()
            .get(type_name)
            .unwrap();
        *nodes.first().unwrap()
    }

    #[test]
    fn federated_graph_has_entering_root_and_key_edges() -> Result<(), FederationError> {
        let supergraph = supergraph(
            r#"
            type Query {
              product: Product
              top: Product
            }

            type Product {
              id: ID!
              name: String
              price: Int
            }
            "#,
        );
        let subgraphs = [
            Subgraph::parse(
                "S1",
                r#"
                type Query {
                  top: Product
                }

                type Product @key(fields: "id") {
                  id: ID!
                  name: String
                }
                "#,
            )?,
            Subgraph::parse(
                "S2",
                r#"
                type Query {
                  product: Product
                }

                type Product @key(fields: "id") {
                  id: ID!
                  price: Int
                }
                "#,
            )?,
        ];
        let query_graph = build_federated_query_graph(&supergraph, &subgraphs)?;
        assert_eq!(query_graph.name(), FEDERATED_GRAPH_ROOT_SOURCE);

        let root_node = *query_graph
            .root_kinds_to_nodes()?
            .get(&SchemaRootDefinitionKind::Query)
            .unwrap();
        assert_eq!(
            out_edge_labels(&query_graph, root_node),
            ["-> Query(S1)*", "-> Query(S2)*"]
        );
        let s1_query = node_for(&query_graph, "S1", "Query");
        assert!(out_edge_labels(&query_graph, s1_query).contains(&"query() -> Query(S2)*".to_owned()));

        let s1_product = node_for(&query_graph, "S1", "Product");
        assert_eq!(
            out_edge_labels(&query_graph, s1_product),
            [
                "id -> ID(S1)",
                "name -> String(S1)",
                "__typename -> String(S1)",
                "{ id } ⊢ key() -> Product(S2)",
            ]
        );
        Ok(())
    }

    #[test]
    fn federated_graph_folds_requires_and_copies_provides() -> Result<(), FederationError> {
        let supergraph = supergraph(
            r#"
            type Query {
              users: [User]
            }

            type User {
              id: ID!
              name: String
              org: Org
              greeting: String
            }

            type Org {
              id: ID!
              title: String
            }
            "#,
        );
        let subgraphs = [
            Subgraph::parse(
                "accounts",
                r#"
                type User @key(fields: "id") {
                  id: ID!
                  name: String
                  org: Org
                }

                type Org @key(fields: "id") {
                  id: ID!
                  title: String
                }
                "#,
            )?,
            Subgraph::parse(
                "greetings",
                r#"
                type Query {
                  users: [User] @provides(fields: "name")
                }

                type User @key(fields: "id") {
                  id: ID!
                  name: String @external
                  greeting: String @requires(fields: "name")
                }
                "#,
            )?,
        ];
        let query_graph = build_federated_query_graph(&supergraph, &subgraphs)?;

        let greetings_user = node_for(&query_graph, "greetings", "User");
        assert_eq!(
            out_edge_labels(&query_graph, greetings_user),
            [
                "id -> ID(greetings)",
                "{ name } ⊢ greeting -> String(greetings)",
                "__typename -> String(greetings)",
                "{ id } ⊢ key() -> User(accounts)",
            ]
        );

        let greetings_query = node_for(&query_graph, "greetings", "Query");
        let users_tail = single_edge_tail(&query_graph, greetings_query, "users");
        let users_tail_weight = query_graph.node_weight(users_tail)?;
        assert_eq!(users_tail_weight.to_string(), "User(greetings)-1");
        assert_eq!(
            out_edge_labels(&query_graph, users_tail),
            [
                "id -> ID(greetings)",
                "{ name } ⊢ greeting -> String(greetings)",
                "__typename -> String(greetings)",
                "{ id } ⊢ key() -> User(accounts)",
                "name -> String(greetings)",
            ]
        );
        let provided_edge = query_graph
            .out_edges(users_tail)
            .into_iter()
            .find(|edge| edge.weight().to_string() == "name")
            .unwrap();
        assert!(matches!(
            provided_edge.weight().transition,
            QueryGraphEdgeTransition::FieldCollection {
                is_part_of_provides: true,
                ..
            }
        ));
        Ok(())
    }

    fn single_edge_tail(query_graph: &QueryGraph, head: NodeIndex, field_name: &str) -> NodeIndex {
        let edge = query_graph.edge_for_field(head, field_name).unwrap();
        query_graph.edge_endpoints(edge).unwrap().1
    }

    #[test]
    fn federated_subgraph_graphs_add_directly_resolved_interface_fields() -> Result<(), FederationError>
    {
        let supergraph = supergraph(
            r#"
            type Query {
              items: [Item]
            }

            interface Item {
              id: ID!
              label: String
            }

            type Book implements Item {
              id: ID!
              label: String
            }

            type Movie implements Item {
              id: ID!
              label: String
            }
            "#,
        );
        let subgraphs = [Subgraph::parse(
            "catalog",
            r#"
            type Query {
              items: [Item]
            }

            interface Item {
              id: ID!
              label: String
            }

            type Book implements Item @key(fields: "id") {
              id: ID!
              label: String
            }

            type Movie implements Item @key(fields: "id") {
              id: ID!
              label: String @external
            }
            "#,
        )?];
        let query_graph = build_federated_query_graph(&supergraph, &subgraphs)?;
        let item = node_for(&query_graph, "catalog", "Item");
        assert_eq!(
            out_edge_labels(&query_graph, item),
            [
                "id -> ID(catalog)",
                "__typename -> String(catalog)",
                "... on Book -> Book(catalog)",
                "... on Movie -> Movie(catalog)",
            ]
        );
        Ok(())
    }

    #[test]
    fn duplicate_subgraph_names_are_rejected() {
        let supergraph = supergraph("type Query { a: Int }");
        let subgraph = Subgraph::parse("S1", "type Query { a: Int }").unwrap();
        let error =
            build_federated_query_graph(&supergraph, &[subgraph.clone(), subgraph]).unwrap_err();
        assert!(matches!(
            error.errors()[0],
            SingleFederationError::InvalidSubgraph { subgraph, .. } if subgraph == "S1"
        ));
    }
}
