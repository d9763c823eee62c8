use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use indexmap::IndexMap;
use indexmap::IndexSet;
use itertools::Itertools;
use petgraph::graph::EdgeIndex;

use crate::bail;
use crate::ensure;
use crate::error::CompositionError;
use crate::error::FederationError;
use crate::query_graph::QueryGraphEdgeTransition;
use crate::query_graph::graph_path::Unadvanceable;
use crate::query_graph::graph_path::Unadvanceables;
use crate::query_graph::graph_path::transition::TransitionGraphPath;
use crate::schema::ValidFederationSchema;
use crate::schema::position::FieldDefinitionPosition;
use crate::schema::position::SchemaRootDefinitionKind;

/// A supergraph API query graph edge that no subgraph path can follow.
///
/// The message explains why, with an example operation (the witness) reaching that edge and the
/// dead ends met in each subgraph.
#[derive(Clone, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
    supergraph_unsatisfiable_path: TransitionGraphPath,
    subgraphs_paths: Vec<TransitionGraphPath>,
    witness: WitnessOperation,
}

impl ValidationError {
    pub(crate) fn new(
        supergraph_unsatisfiable_path: TransitionGraphPath,
        subgraphs_paths: Vec<TransitionGraphPath>,
        subgraphs_paths_unadvanceables: &[Unadvanceables],
    ) -> Result<Self, FederationError> {
        let witness = build_witness_operation(&supergraph_unsatisfiable_path)?;
        let message = format!(
            "The following supergraph API query:\n\
             {witness}\n\
             cannot be satisfied by the subgraphs because:\n\
             {reasons}",
            reasons = display_reasons(subgraphs_paths_unadvanceables),
        );
        Ok(Self {
            message,
            supergraph_unsatisfiable_path,
            subgraphs_paths,
            witness,
        })
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// An operation that cannot be executed by the subgraphs.
    pub fn witness(&self) -> &WitnessOperation {
        &self.witness
    }

    /// The supergraph path ending with the edge that no subgraph path can follow.
    pub fn supergraph_unsatisfiable_path(&self) -> &TransitionGraphPath {
        &self.supergraph_unsatisfiable_path
    }

    /// The subgraph paths that reached the start of that edge.
    pub fn subgraphs_paths(&self) -> &[TransitionGraphPath] {
        &self.subgraphs_paths
    }
}

impl std::fmt::Debug for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationError")
            .field("message", &self.message)
            .field(
                "supergraph_unsatisfiable_path",
                &self.supergraph_unsatisfiable_path.to_string(),
            )
            .field(
                "subgraphs_paths",
                &self
                    .subgraphs_paths
                    .iter()
                    .map(|path| path.to_string())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl From<ValidationError> for CompositionError {
    fn from(error: ValidationError) -> Self {
        CompositionError::SatisfiabilityError {
            message: error.message,
        }
    }
}

/// The operation of a witness: a single branch of selections leading to the unsatisfiable edge.
#[derive(Debug, Clone, PartialEq)]
pub struct WitnessOperation {
    root_kind: SchemaRootDefinitionKind,
    selection_set: WitnessSelectionSet,
}

/// A selection set of a witness. An empty one stands for "some selection" and prints as `...`.
#[derive(Debug, Clone, Default, PartialEq)]
struct WitnessSelectionSet {
    selections: Vec<WitnessSelection>,
}

#[derive(Debug, Clone, PartialEq)]
enum WitnessSelection {
    Field {
        name: Name,
        arguments: Vec<Node<ast::Argument>>,
        selection_set: Option<WitnessSelectionSet>,
    },
    InlineFragment {
        type_condition: Name,
        selection_set: WitnessSelectionSet,
    },
}

impl WitnessSelectionSet {
    fn write_indented(&self, f: &mut Formatter<'_>, indent: usize) -> std::fmt::Result {
        writeln!(f, "{{")?;
        let padding = "  ".repeat(indent + 1);
        if self.selections.is_empty() {
            writeln!(f, "{padding}...")?;
        }
        for selection in &self.selections {
            write!(f, "{padding}")?;
            match selection {
                WitnessSelection::Field {
                    name,
                    arguments,
                    selection_set,
                } => {
                    write!(f, "{name}")?;
                    if !arguments.is_empty() {
                        write!(
                            f,
                            "({})",
                            arguments
                                .iter()
                                .map(|argument| format!("{}: {}", argument.name, argument.value))
                                .join(", ")
                        )?;
                    }
                    if let Some(selection_set) = selection_set {
                        write!(f, " ")?;
                        selection_set.write_indented(f, indent + 1)?;
                    }
                }
                WitnessSelection::InlineFragment {
                    type_condition,
                    selection_set,
                } => {
                    write!(f, "... on {type_condition} ")?;
                    selection_set.write_indented(f, indent + 1)?;
                }
            }
            writeln!(f)?;
        }
        write!(f, "{}}}", "  ".repeat(indent))
    }
}

impl Display for WitnessOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.root_kind != SchemaRootDefinitionKind::Query {
            write!(f, "{} ", self.root_kind)?;
        }
        self.selection_set.write_indented(f, 0)
    }
}

pub(crate) fn build_witness_operation(
    witness: &TransitionGraphPath,
) -> Result<WitnessOperation, FederationError> {
    // A cast at the very end of the path selects nothing more than the path before it.
    let witness = witness.truncate_trailing_downcasts()?;
    let graph = witness.graph();
    let root = graph.node_weight(witness.head())?;
    let Some(root_kind) = root.root_kind else {
        bail!("Witness path should start at a root, but starts at {}", root);
    };
    let schema = graph.schema_by_source(&root.source)?;
    let edges = witness.edges();
    ensure!(
        !edges.is_empty(),
        "unsatisfiable_path should contain at least one edge/transition"
    );
    let Some(selection_set) = build_witness_next_step(schema, &witness, &edges)? else {
        bail!("Witness path {} should start with a composite type", witness);
    };
    Ok(WitnessOperation {
        root_kind,
        selection_set,
    })
}

/// Builds the selections of the given edges, bottom-up.
fn build_witness_next_step(
    schema: &ValidFederationSchema,
    witness: &TransitionGraphPath,
    edges: &[EdgeIndex],
) -> Result<Option<WitnessSelectionSet>, FederationError> {
    let graph = witness.graph();
    let Some((edge, rest)) = edges.split_first() else {
        // The end of the witness may not be a leaf, in which case the (unknown) rest of the
        // selection prints as `...`.
        let tail_type = graph.node_weight(witness.tail())?.type_.type_name()?;
        return Ok((!schema.is_leaf_type(tail_type)).then(WitnessSelectionSet::default));
    };
    let sub_selection = build_witness_next_step(schema, witness, rest)?;
    let selection = match &graph.edge_weight(*edge)?.transition {
        QueryGraphEdgeTransition::Downcast { to_type_name, .. } => {
            let Some(selection_set) = sub_selection else {
                bail!("Downcast to {} should lead to a composite type", to_type_name);
            };
            WitnessSelection::InlineFragment {
                type_condition: to_type_name.clone(),
                selection_set,
            }
        }
        QueryGraphEdgeTransition::FieldCollection {
            field_definition_position,
            ..
        } => WitnessSelection::Field {
            name: field_definition_position.field_name.clone(),
            arguments: build_witness_arguments(schema, field_definition_position)?,
            selection_set: sub_selection,
        },
        QueryGraphEdgeTransition::KeyResolution
        | QueryGraphEdgeTransition::RootTypeResolution { .. }
        | QueryGraphEdgeTransition::SubgraphEnteringTransition => return Ok(sub_selection),
    };
    Ok(Some(WitnessSelectionSet {
        selections: vec![selection],
    }))
}

fn build_witness_arguments(
    schema: &ValidFederationSchema,
    field_definition_position: &FieldDefinitionPosition,
) -> Result<Vec<Node<ast::Argument>>, FederationError> {
    let field = field_definition_position.get(schema)?;
    field
        .arguments
        .iter()
        .map(|argument| {
            Ok(Node::new(ast::Argument {
                name: argument.name.clone(),
                value: generate_witness_value(schema, &argument.ty)?,
            }))
        })
        .collect()
}

/// A placeholder value of the given input type. Values are never null, even for nullable types.
fn generate_witness_value(
    schema: &ValidFederationSchema,
    ty: &ast::Type,
) -> Result<Node<ast::Value>, FederationError> {
    let value = match ty {
        ast::Type::List(_) | ast::Type::NonNullList(_) => ast::Value::List(Vec::new()),
        ast::Type::Named(type_name) | ast::Type::NonNullNamed(type_name) => {
            match schema.get_type(type_name)? {
                ExtendedType::Scalar(_) => match type_name.as_str() {
                    "Int" => ast::Value::Int(0.into()),
                    #[allow(clippy::approx_constant)]
                    "Float" => ast::Value::Float((3.14).into()),
                    "Boolean" => ast::Value::Boolean(true),
                    "String" => ast::Value::String("A string value".to_owned()),
                    // There is no telling what an ID looks like at some place.
                    "ID" => ast::Value::String("<any id>".to_owned()),
                    // Likely not a valid value for that custom scalar.
                    _ => ast::Value::String("<some value>".to_owned()),
                },
                ExtendedType::Enum(enum_type) => {
                    let Some(first_value) = enum_type.values.keys().next() else {
                        bail!("Enum type {} has no values", type_name);
                    };
                    ast::Value::Enum(first_value.clone())
                }
                ExtendedType::InputObject(input_object) => {
                    let fields = input_object
                        .fields
                        .iter()
                        // Optional fields are left out.
                        .filter(|(_, field)| field.is_required())
                        .map(|(field_name, field)| {
                            Ok((field_name.clone(), generate_witness_value(schema, &field.ty)?))
                        })
                        .collect::<Result<Vec<_>, FederationError>>()?;
                    ast::Value::Object(fields)
                }
                _ => bail!("Unexpected input type {}", type_name),
            }
        }
    };
    Ok(Node::new(value))
}

/// Lists the dead ends, grouped by the subgraph they were met in.
fn display_reasons(reasons: &[Unadvanceables]) -> String {
    let mut by_subgraph: IndexMap<Arc<str>, Vec<&Unadvanceable>> = IndexMap::new();
    for unadvanceable in reasons.iter().flat_map(|reason| reason.0.iter()) {
        by_subgraph
            .entry(unadvanceable.from_subgraph.clone())
            .or_default()
            .push(unadvanceable);
    }
    by_subgraph
        .iter()
        .filter_map(|(subgraph, reasons)| {
            let (first, rest) = reasons.split_first()?;
            let details = if rest.is_empty() {
                format!(" {}.", first.details)
            } else {
                // Several paths may have hit the same dead end.
                reasons
                    .iter()
                    .map(|reason| reason.details.as_str())
                    .collect::<IndexSet<_>>()
                    .iter()
                    .map(|details| format!("\n  - {details}."))
                    .join("")
            };
            Some(format!("- from subgraph \"{subgraph}\":{details}"))
        })
        .join("\n")
}
