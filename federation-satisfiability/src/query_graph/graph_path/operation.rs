use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::executable::Directive;
use apollo_compiler::executable::DirectiveList;
use apollo_compiler::executable::Selection;
use apollo_compiler::schema::ExtendedType;
use itertools::Itertools;
use petgraph::graph::EdgeIndex;
use petgraph::graph::NodeIndex;
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
use crate::query_graph::graph_path::ExcludedConditions;
use crate::query_graph::graph_path::ExcludedEdges;
use crate::query_graph::graph_path::GraphPath;
use crate::query_graph::graph_path::GraphPathTrigger;
use crate::query_graph::graph_path::IndirectPaths;
use crate::query_graph::graph_path::TriggerEdge;
use crate::schema::ValidFederationSchema;
use crate::schema::position::FieldDefinitionPosition;
use crate::subgraph::spec::PROVIDES_DIRECTIVE_NAME;
use crate::utils::flat_cartesian_product;

const SKIP_DIRECTIVE_NAME: &str = "skip";
const INCLUDE_DIRECTIVE_NAME: &str = "include";

fn print_directive(directive: &Directive) -> String {
    if directive.arguments.is_empty() {
        return format!("@{}", directive.name);
    }
    format!(
        "@{}({})",
        directive.name,
        directive
            .arguments
            .iter()
            .map(|argument| format!("{}: {}", argument.name, argument.value))
            .join(", ")
    )
}

fn print_directives(f: &mut Formatter<'_>, directives: &DirectiveList) -> std::fmt::Result {
    for directive in directives.iter() {
        write!(f, " {}", print_directive(directive))?;
    }
    Ok(())
}

/// A field selection, as an operation element guiding a path.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OpField {
    /// The field, on the type it is selected on.
    pub(crate) field_position: FieldDefinitionPosition,
    pub(crate) directives: DirectiveList,
    /// Whether the base type of the field is a scalar or an enum.
    pub(crate) is_leaf: bool,
}

impl Display for OpField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.field_position.field_name)?;
        print_directives(f, &self.directives)
    }
}

/// An inline fragment, as an operation element guiding a path.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OpInlineFragment {
    pub(crate) parent_type: Name,
    pub(crate) type_condition: Option<Name>,
    pub(crate) directives: DirectiveList,
}

impl OpInlineFragment {
    /// A directive-less cast of the given type to another.
    pub(crate) fn cast(parent_type: Name, type_condition: Name) -> Self {
        Self {
            parent_type,
            type_condition: Some(type_condition),
            directives: Default::default(),
        }
    }
}

impl Display for OpInlineFragment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.type_condition {
            Some(type_condition) => write!(f, "... on {type_condition}")?,
            None => write!(f, "...")?,
        }
        print_directives(f, &self.directives)
    }
}

#[derive(Debug, Clone, PartialEq, derive_more::From)]
pub(crate) enum OpPathElement {
    Field(OpField),
    InlineFragment(OpInlineFragment),
}

impl OpPathElement {
    /// The element for a selection of a (field set) selection set on the given type.
    pub(crate) fn from_selection(
        schema: &ValidFederationSchema,
        parent_type: &Name,
        selection: &Selection,
    ) -> Result<Self, FederationError> {
        match selection {
            Selection::Field(field) => Ok(OpField {
                field_position: FieldDefinitionPosition::new(
                    parent_type.clone(),
                    field.name.clone(),
                ),
                directives: field.directives.clone(),
                is_leaf: schema.is_leaf_type(field.ty().inner_named_type()),
            }
            .into()),
            Selection::InlineFragment(fragment) => Ok(OpInlineFragment {
                parent_type: parent_type.clone(),
                type_condition: fragment.type_condition.clone(),
                directives: fragment.directives.clone(),
            }
            .into()),
            Selection::FragmentSpread(spread) => bail!(
                "Unexpected named fragment spread \"{}\" in a field set",
                spread.fragment_name
            ),
        }
    }

    pub(crate) fn directives(&self) -> &DirectiveList {
        match self {
            OpPathElement::Field(field) => &field.directives,
            OpPathElement::InlineFragment(fragment) => &fragment.directives,
        }
    }

    /// Whether nothing can be selected after this element.
    fn is_terminal(&self) -> bool {
        matches!(self, OpPathElement::Field(field) if field.is_leaf)
    }
}

impl Display for OpPathElement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OpPathElement::Field(field) => field.fmt(f),
            OpPathElement::InlineFragment(fragment) => fragment.fmt(f),
        }
    }
}

/// The @skip/@include conditions applying to the elements of a path.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct OpGraphPathContext {
    conditionals: Arc<Vec<Node<Directive>>>,
}

impl OpGraphPathContext {
    /// This context, along with the @skip/@include of the given element.
    pub(crate) fn with_context_of(&self, element: &OpPathElement) -> Self {
        let new_conditionals = element
            .directives()
            .iter()
            .filter(|directive| {
                matches!(
                    directive.name.as_str(),
                    SKIP_DIRECTIVE_NAME | INCLUDE_DIRECTIVE_NAME
                )
            })
            .cloned()
            .collect::<Vec<_>>();
        if new_conditionals.is_empty() {
            return self.clone();
        }
        let mut conditionals = (*self.conditionals).clone();
        conditionals.extend(new_conditionals);
        Self {
            conditionals: Arc::new(conditionals),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.conditionals.is_empty()
    }
}

impl Display for OpGraphPathContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}]",
            self.conditionals
                .iter()
                .map(|directive| print_directive(directive))
                .join(", ")
        )
    }
}

/// What guides the steps of an `OpGraphPath`: an operation element, or, for the keys and root
/// types taken to reach other subgraphs, the context the path had at that point.
#[derive(Debug, Clone, PartialEq, derive_more::From)]
pub(crate) enum OpGraphPathTrigger {
    OpPathElement(OpPathElement),
    Context(OpGraphPathContext),
}

impl Display for OpGraphPathTrigger {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OpGraphPathTrigger::OpPathElement(element) => element.fmt(f),
            OpGraphPathTrigger::Context(context) => context.fmt(f),
        }
    }
}

impl GraphPathTrigger for OpGraphPathTrigger {
    fn edge_from(
        &self,
        graph: &QueryGraph,
        node: NodeIndex,
    ) -> Result<TriggerEdge, FederationError> {
        let edge = match self {
            OpGraphPathTrigger::Context(_) => None,
            OpGraphPathTrigger::OpPathElement(OpPathElement::Field(field)) => {
                graph.edge_for_field(node, &field.field_position.field_name)
            }
            OpGraphPathTrigger::OpPathElement(OpPathElement::InlineFragment(fragment)) => {
                let Some(type_condition) = &fragment.type_condition else {
                    return Ok(TriggerEdge::NoEdgeNeeded);
                };
                graph.edge_for_type_cast(node, type_condition)
            }
        };
        Ok(edge.map_or(TriggerEdge::Missing, TriggerEdge::Edge))
    }

    fn is_bare_type_condition(&self) -> bool {
        matches!(
            self,
            OpGraphPathTrigger::OpPathElement(OpPathElement::InlineFragment(fragment))
                if fragment.type_condition.is_some() && fragment.directives.is_empty()
        )
    }

    fn for_non_collecting_transition(
        _transition: &QueryGraphEdgeTransition,
        context: &OpGraphPathContext,
    ) -> Self {
        context.clone().into()
    }
}

/// A `GraphPath` whose triggers are operation elements (essentially meaning that the path has been
/// guided by a GraphQL operation, here the field set of some conditions).
pub(crate) type OpGraphPath = GraphPath<OpGraphPathTrigger>;

/// Paths that must all be taken to resolve an operation element: a single path most of the time,
/// several when a field on an interface is resolved separately for each implementation.
#[derive(Clone)]
pub(crate) struct SimultaneousPaths(pub(crate) Vec<Arc<OpGraphPath>>);

impl Display for SimultaneousPaths {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0.as_slice() {
            [] => write!(f, "<no path>"),
            [path] => path.fmt(f),
            paths => write!(f, "{{\n  {}\n}}", paths.iter().join("\n  ")),
        }
    }
}

/// `SimultaneousPaths`, along with what is needed to compute (once) the indirect paths of each of
/// them.
#[derive(Clone)]
pub(crate) struct SimultaneousPathsWithLazyIndirectPaths {
    pub(crate) paths: SimultaneousPaths,
    pub(crate) context: OpGraphPathContext,
    pub(crate) excluded_non_collecting_edges: ExcludedEdges,
    pub(crate) excluded_conditions_on_non_collecting_edges: ExcludedConditions,
    lazily_computed_indirect_paths: Vec<Option<IndirectPaths<OpGraphPathTrigger>>>,
}

impl Display for SimultaneousPathsWithLazyIndirectPaths {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.paths.fmt(f)
    }
}

impl SimultaneousPathsWithLazyIndirectPaths {
    pub(crate) fn new(
        paths: SimultaneousPaths,
        context: OpGraphPathContext,
        excluded_non_collecting_edges: ExcludedEdges,
        excluded_conditions_on_non_collecting_edges: ExcludedConditions,
    ) -> Self {
        let lazily_computed_indirect_paths = vec![None; paths.0.len()];
        Self {
            paths,
            context,
            excluded_non_collecting_edges,
            excluded_conditions_on_non_collecting_edges,
            lazily_computed_indirect_paths,
        }
    }

    /// The indirect paths of the path at the given index. They are only remembered when computed
    /// for the context of these paths.
    fn indirect_options(
        &mut self,
        updated_context: &OpGraphPathContext,
        path_index: usize,
        condition_resolver: &mut impl ConditionResolver,
    ) -> Result<IndirectPaths<OpGraphPathTrigger>, FederationError> {
        if *updated_context != self.context {
            return self.compute_indirect_paths(path_index, condition_resolver);
        }
        if let Some(Some(indirect_paths)) = self.lazily_computed_indirect_paths.get(path_index) {
            return Ok(indirect_paths.clone());
        }
        let indirect_paths = self.compute_indirect_paths(path_index, condition_resolver)?;
        if let Some(slot) = self.lazily_computed_indirect_paths.get_mut(path_index) {
            *slot = Some(indirect_paths.clone());
        }
        Ok(indirect_paths)
    }

    fn compute_indirect_paths(
        &self,
        path_index: usize,
        condition_resolver: &mut impl ConditionResolver,
    ) -> Result<IndirectPaths<OpGraphPathTrigger>, FederationError> {
        let Some(path) = self.paths.0.get(path_index) else {
            bail!("Path index {} out of bounds for {}", path_index, self.paths);
        };
        path.advance_with_non_collecting_and_type_preserving_transitions(
            &self.context,
            condition_resolver,
            &self.excluded_non_collecting_edges,
            &self.excluded_conditions_on_non_collecting_edges,
        )
    }

    /// Advances these paths with the given operation element.
    ///
    /// Returns `None` if one of the paths cannot be advanced at all, and otherwise the options of
    /// simultaneous paths to continue with (the product of the options of each path). An empty
    /// vector means the element cannot apply to these paths (say, a type condition that none of
    /// the possible runtime types satisfies).
    pub(crate) fn advance_with_operation_element(
        &mut self,
        supergraph_schema: &ValidFederationSchema,
        operation_element: &OpPathElement,
        condition_resolver: &mut impl ConditionResolver,
    ) -> Result<Option<Vec<SimultaneousPathsWithLazyIndirectPaths>>, FederationError> {
        trace!("Trying to advance {} for {}", self.paths, operation_element);
        let updated_context = self.context.with_context_of(operation_element);
        let mut options_for_each_path = Vec::new();
        let paths = self.paths.0.clone();
        for (path_index, path) in paths.iter().enumerate() {
            let direct_options = path.advance_with_operation(
                supergraph_schema,
                operation_element,
                &updated_context,
                condition_resolver,
            )?;
            let mut options = match direct_options {
                // Indirect paths cannot add anything for those.
                Some(options)
                    if options.is_empty()
                        || operation_element.is_terminal()
                        || matches!(operation_element, OpPathElement::InlineFragment(_)) =>
                {
                    if !options.is_empty() {
                        options_for_each_path.push(options);
                    }
                    continue;
                }
                options => options.unwrap_or_default(),
            };
            let indirect_paths =
                self.indirect_options(&updated_context, path_index, condition_resolver)?;
            trace!(
                "{} indirect paths for {}",
                indirect_paths.paths.len(),
                path
            );
            for indirect_path in indirect_paths.paths.iter() {
                let Some(indirect_options) = indirect_path.advance_with_operation(
                    supergraph_schema,
                    operation_element,
                    &updated_context,
                    condition_resolver,
                )?
                else {
                    trace!("Ignoring {indirect_path}: cannot be advanced with {operation_element}");
                    continue;
                };
                options.extend(indirect_options);
            }
            if options.is_empty() {
                debug!("No valid options for {path}, aborting operation {operation_element}");
                return Ok(None);
            }
            options_for_each_path.push(options);
        }
        let all_options = flat_cartesian_product(
            options_for_each_path
                .into_iter()
                .map(|options| options.into_iter().map(|paths| paths.0).collect())
                .collect(),
        );
        Ok(Some(
            all_options
                .into_iter()
                .map(|paths| {
                    SimultaneousPathsWithLazyIndirectPaths::new(
                        SimultaneousPaths(paths),
                        updated_context.clone(),
                        self.excluded_non_collecting_edges.clone(),
                        self.excluded_conditions_on_non_collecting_edges.clone(),
                    )
                })
                .collect(),
        ))
    }
}

/// Whether an implementation of the given interface has an @provides on the given field.
fn an_implementation_has_a_provides(
    schema: &ValidFederationSchema,
    interface_name: &Name,
    field_name: &Name,
) -> bool {
    schema
        .possible_runtime_types(interface_name)
        .into_iter()
        .any(|implementation| {
            FieldDefinitionPosition::new(implementation, field_name.clone())
                .try_get(schema)
                .is_some_and(|field| field.directives.has(&PROVIDES_DIRECTIVE_NAME))
        })
}

impl OpGraphPath {
    fn single_option(path: OpGraphPath) -> Vec<SimultaneousPaths> {
        vec![SimultaneousPaths(vec![Arc::new(path)])]
    }

    /// Advances this path with the given operation element, without moving to other subgraphs
    /// first.
    ///
    /// `None` means the element cannot be advanced from the tail. Otherwise, an empty vector
    /// means the element can never apply to this path, and a non-empty one holds the options.
    fn advance_with_operation(
        &self,
        supergraph_schema: &ValidFederationSchema,
        operation_element: &OpPathElement,
        context: &OpGraphPathContext,
        condition_resolver: &mut impl ConditionResolver,
    ) -> Result<Option<Vec<SimultaneousPaths>>, FederationError> {
        let graph = self.graph().clone();
        let tail_weight = graph.node_weight(self.tail())?;
        let QueryGraphNodeType::SchemaType(current_type) = &tail_weight.type_ else {
            trace!("Cannot advance federated graph root with direct operations");
            return Ok(None);
        };
        let schema = graph.schema_by_source(&tail_weight.source)?;
        let current_type_definition = schema.get_type(current_type)?;
        match operation_element {
            OpPathElement::Field(field) => {
                let field_name = &field.field_position.field_name;
                match current_type_definition {
                    ExtendedType::Object(_) => {
                        let Some(edge) = graph.edge_for_field(self.tail(), field_name) else {
                            trace!("No edge for field {field_name} on object type {current_type}");
                            return Ok(None);
                        };
                        self.add_field_edge(operation_element, edge, context, condition_resolver)
                    }
                    ExtendedType::Interface(_) => self.advance_with_interface_field(
                        supergraph_schema,
                        schema,
                        current_type,
                        operation_element,
                        field,
                        context,
                        condition_resolver,
                    ),
                    ExtendedType::Union(_) => {
                        ensure!(
                            field.field_position.is_introspection_typename_field(),
                            "Invalid field selection {} for union type {}",
                            operation_element,
                            current_type
                        );
                        let Some(edge) = graph.edge_for_field(self.tail(), field_name) else {
                            bail!("Should always have an edge for __typename edge on an union");
                        };
                        self.add_field_edge(operation_element, edge, context, condition_resolver)
                    }
                    _ => bail!(
                        "Unexpected type {} from {} given operation {}",
                        current_type,
                        tail_weight,
                        operation_element
                    ),
                }
            }
            OpPathElement::InlineFragment(fragment) => {
                let type_condition = match &fragment.type_condition {
                    Some(type_condition) if type_condition != current_type => type_condition,
                    _ => {
                        trace!("No edge to take for condition {fragment} from current type {current_type}");
                        return Ok(Some(Self::single_option(
                            self.add_context_step(operation_element)?,
                        )));
                    }
                };
                match current_type_definition {
                    ExtendedType::Interface(_) | ExtendedType::Union(_) => {
                        if let Some(edge) = graph.edge_for_type_cast(self.tail(), type_condition) {
                            ensure!(
                                graph.edge_weight(edge)?.conditions.is_none(),
                                "TypeCast collecting edges shouldn't have conditions"
                            );
                            return Ok(Some(Self::single_option(self.add(
                                operation_element.clone().into(),
                                Some(edge),
                                ConditionResolution::no_conditions(),
                            )?)));
                        }
                        let casted_types = supergraph_schema.possible_runtime_types(type_condition);
                        let intersection = self
                            .runtime_types_of_tail()
                            .iter()
                            .filter(|type_name| casted_types.contains(*type_name))
                            .cloned()
                            .collect::<Vec<_>>();
                        trace!(
                            "Trying to type-explode into intersection between {} and {} = [{}]",
                            current_type,
                            type_condition,
                            intersection.iter().join(", ")
                        );
                        let mut options_by_implementations = Vec::new();
                        for type_name in intersection {
                            let cast = OpInlineFragment::cast(current_type.clone(), type_name);
                            let Some(implementation_options) = self
                                .advance_as_single_path(context)
                                .advance_with_operation_element(
                                    supergraph_schema,
                                    &cast.into(),
                                    condition_resolver,
                                )?
                            else {
                                return Ok(None);
                            };
                            if implementation_options.is_empty() {
                                continue;
                            }
                            options_by_implementations.push(
                                implementation_options
                                    .into_iter()
                                    .map(|option| option.paths.0)
                                    .collect(),
                            );
                        }
                        Ok(Some(
                            flat_cartesian_product(options_by_implementations)
                                .into_iter()
                                .map(SimultaneousPaths)
                                .collect(),
                        ))
                    }
                    ExtendedType::Object(_) => {
                        if supergraph_schema.is_abstract_type(type_condition)
                            && supergraph_schema
                                .possible_runtime_types(type_condition)
                                .contains(current_type)
                        {
                            trace!("{type_condition} is a super-type of current type {current_type}: no edge to take");
                            return Ok(Some(Self::single_option(
                                self.add_context_step(operation_element)?,
                            )));
                        }
                        trace!("Cannot ever get {type_condition} from current type {current_type}: returning empty branch");
                        Ok(Some(Vec::new()))
                    }
                    _ => bail!(
                        "Unexpected type {} from {} given operation {}",
                        current_type,
                        tail_weight,
                        operation_element
                    ),
                }
            }
        }
    }

    /// A field on an interface is collected directly when the interface has an edge for it, unless
    /// an @provides may make some implementation collect it more efficiently. Otherwise, the path
    /// is type-exploded: the field must be collected on every possible runtime type.
    #[allow(clippy::too_many_arguments)]
    fn advance_with_interface_field(
        &self,
        supergraph_schema: &ValidFederationSchema,
        schema: &ValidFederationSchema,
        current_type: &Name,
        operation_element: &OpPathElement,
        field: &OpField,
        context: &OpGraphPathContext,
        condition_resolver: &mut impl ConditionResolver,
    ) -> Result<Option<Vec<SimultaneousPaths>>, FederationError> {
        let field_name = &field.field_position.field_name;
        let mut interface_options = None;
        if let Some(edge) = self.graph().edge_for_field(self.tail(), field_name) {
            let options =
                self.add_field_edge(operation_element, edge, context, condition_resolver)?;
            ensure!(
                options.is_some(),
                "Interface edge {} shouldn't have conditions",
                self.graph().edge_weight(edge)?
            );
            let is_provided_edge = matches!(
                self.graph().edge_weight(edge)?.transition,
                QueryGraphEdgeTransition::FieldCollection {
                    is_part_of_provides: true,
                    ..
                }
            );
            if field.field_position.is_introspection_typename_field()
                || (!is_provided_edge
                    && !an_implementation_has_a_provides(schema, current_type, field_name))
            {
                trace!("Collecting field {field_name} on interface {current_type} without type-exploding");
                return Ok(options);
            }
            interface_options = options;
        }

        let implementations = self.runtime_types_of_tail().clone();
        trace!(
            "Type exploding interface {} into possible runtime types [{}]",
            current_type,
            implementations.iter().join(", ")
        );
        let mut options_by_implementations = Vec::new();
        for implementation in implementations {
            let cast = OpInlineFragment::cast(current_type.clone(), implementation.clone());
            let Some(implementation_options) = self
                .advance_as_single_path(context)
                .advance_with_operation_element(supergraph_schema, &cast.into(), condition_resolver)?
            else {
                trace!("Cannot collect field {field_name} from {implementation}");
                return Ok(interface_options);
            };
            if implementation_options.is_empty() {
                trace!("Cannot ever get {implementation} from this branch, ignoring it");
                continue;
            }
            let mut with_field = Vec::new();
            for mut option in implementation_options {
                let Some(with_field_options) = option.advance_with_operation_element(
                    supergraph_schema,
                    operation_element,
                    condition_resolver,
                )?
                else {
                    continue;
                };
                with_field.extend(with_field_options.into_iter().map(|option| option.paths.0));
            }
            if with_field.is_empty() {
                trace!("Cannot collect field {field_name} from {implementation}");
                return Ok(interface_options);
            }
            options_by_implementations.push(with_field);
        }
        let implementation_options = flat_cartesian_product(options_by_implementations)
            .into_iter()
            .map(SimultaneousPaths);
        Ok(Some(match interface_options {
            Some(mut options) => {
                options.extend(implementation_options);
                options
            }
            None => implementation_options.collect(),
        }))
    }

    /// A fresh single-path set starting from this path, with no exclusions.
    fn advance_as_single_path(
        &self,
        context: &OpGraphPathContext,
    ) -> SimultaneousPathsWithLazyIndirectPaths {
        SimultaneousPathsWithLazyIndirectPaths::new(
            SimultaneousPaths(vec![Arc::new(self.clone())]),
            context.clone(),
            Default::default(),
            Default::default(),
        )
    }

    /// Records a fragment that doesn't move the path, if it has directives to remember.
    fn add_context_step(
        &self,
        operation_element: &OpPathElement,
    ) -> Result<OpGraphPath, FederationError> {
        if operation_element.directives().is_empty() {
            return Ok(self.clone());
        }
        self.add(
            operation_element.clone().into(),
            None,
            ConditionResolution::no_conditions(),
        )
    }

    fn add_field_edge(
        &self,
        operation_element: &OpPathElement,
        edge: EdgeIndex,
        context: &OpGraphPathContext,
        condition_resolver: &mut impl ConditionResolver,
    ) -> Result<Option<Vec<SimultaneousPaths>>, FederationError> {
        let condition_resolution = self.can_satisfy_conditions(
            edge,
            condition_resolver,
            context,
            &Default::default(),
            &Default::default(),
        )?;
        if !condition_resolution.is_satisfied() {
            return Ok(None);
        }
        Ok(Some(Self::single_option(self.add(
            operation_element.clone().into(),
            Some(edge),
            condition_resolution,
        )?)))
    }
}
