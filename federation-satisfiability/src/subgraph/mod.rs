use std::fmt::Debug;
use std::fmt::Formatter;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::name;
use apollo_compiler::schema::ComponentName;
use apollo_compiler::schema::ComponentOrigin;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use indexmap::IndexSet;
use indexmap::map::Entry;
use tracing::debug;

use crate::error::FederationError;
use crate::error::SingleFederationError;
use crate::schema::ValidFederationSchema;
use crate::schema::field_set::parse_field_set;
use crate::schema::position::FieldDefinitionPosition;
use crate::subgraph::spec::ENTITIES_QUERY_DEFINITION;
use crate::subgraph::spec::ENTITY_UNION_NAME;
use crate::subgraph::spec::EXTENDS_DIRECTIVE_NAME;
use crate::subgraph::spec::EXTERNAL_DIRECTIVE_NAME;
use crate::subgraph::spec::FEDERATION_DIRECTIVE_DEFINITIONS;
use crate::subgraph::spec::FEDERATION_TYPES_DEFINITIONS;
use crate::subgraph::spec::FIELDSET_SCALAR_DEFINITION;
use crate::subgraph::spec::FIELDSET_SCALAR_NAME;
use crate::subgraph::spec::KEY_DIRECTIVE_NAME;
use crate::subgraph::spec::fields_argument;
use crate::subgraph::spec::is_resolvable_key;

pub mod spec;

/// A validated subgraph schema, expanded with the federation definitions it relies on.
#[derive(Clone)]
pub struct Subgraph {
    pub name: Arc<str>,
    pub schema: ValidFederationSchema,
}

impl Subgraph {
    /// Parses a subgraph schema and expands it: missing federation directive definitions (and the
    /// `FieldSet` scalar) are added, as well as the `_service` query field and, when the subgraph
    /// declares entities, the `_Entity` union and the `_entities` query field.
    pub fn parse(name: &str, type_defs: &str) -> Result<Subgraph, FederationError> {
        let invalid_subgraph = |error: FederationError| -> FederationError {
            SingleFederationError::InvalidSubgraph {
                subgraph: name.to_owned(),
                message: error.to_string(),
            }
            .into()
        };
        let mut schema = Schema::builder()
            .adopt_orphan_extensions()
            .parse(type_defs, name)
            .build()
            .map_err(|errors| invalid_subgraph(errors.into()))?;
        Self::populate_missing_federation_definitions(&mut schema)
            .map_err(invalid_subgraph)?;
        Self::populate_missing_federation_types(&mut schema).map_err(invalid_subgraph)?;
        let schema = schema
            .validate()
            .map_err(|errors| invalid_subgraph(errors.into()))?;
        debug!("Parsed subgraph \"{name}\"");
        Ok(Subgraph {
            name: Arc::from(name),
            schema: ValidFederationSchema::new(schema),
        })
    }

    fn populate_missing_federation_definitions(schema: &mut Schema) -> Result<(), FederationError> {
        let mut definitions = vec![FIELDSET_SCALAR_DEFINITION];
        definitions.extend(
            FEDERATION_DIRECTIVE_DEFINITIONS
                .iter()
                .filter(|(name, _)| !schema.directive_definitions.contains_key(name))
                .map(|(_, definition)| *definition),
        );
        let federation = Schema::parse(definitions.join("\n"), "federation_definitions.graphql")?;
        for (name, definition) in federation.directive_definitions {
            if let Entry::Vacant(entry) = schema.directive_definitions.entry(name) {
                entry.insert(definition);
            }
        }
        if let Some(fieldset_scalar) = federation.types.get(&FIELDSET_SCALAR_NAME) {
            schema
                .types
                .entry(FIELDSET_SCALAR_NAME)
                .or_insert_with(|| fieldset_scalar.clone());
        }
        Ok(())
    }

    fn populate_missing_federation_types(schema: &mut Schema) -> Result<(), FederationError> {
        let entities = Self::locate_entities(schema);
        let entities_present = !entities.is_empty();
        let mut definitions = FEDERATION_TYPES_DEFINITIONS.to_owned();
        if entities_present {
            definitions.push_str(&format!(
                "union {ENTITY_UNION_NAME} = {}\n",
                entities
                    .iter()
                    .map(|entity| entity.as_str())
                    .collect::<Vec<_>>()
                    .join(" | ")
            ));
            definitions.push_str(ENTITIES_QUERY_DEFINITION);
        }
        let federation = Schema::builder()
            .adopt_orphan_extensions()
            .parse(definitions, "federation_types.graphql")
            .build()?;

        let query_type_name = schema
            .schema_definition
            .make_mut()
            .query
            .get_or_insert(ComponentName::from(name!("Query")))
            .name
            .clone();
        for (type_name, type_) in &federation.types {
            if type_.is_built_in() || *type_name == name!("Query") {
                continue;
            }
            schema
                .types
                .entry(type_name.clone())
                .or_insert_with(|| type_.clone());
        }
        let Some(ExtendedType::Object(federation_query)) = federation.types.get("Query") else {
            return Ok(());
        };
        match schema.types.entry(query_type_name.clone()) {
            Entry::Vacant(entry) => {
                let mut query_type = federation_query.clone();
                query_type.make_mut().name = query_type_name;
                entry.insert(ExtendedType::Object(query_type));
            }
            Entry::Occupied(mut entry) => {
                if let ExtendedType::Object(query_type) = entry.get_mut() {
                    let query_type = query_type.make_mut();
                    for (field_name, field) in &federation_query.fields {
                        query_type
                            .fields
                            .entry(field_name.clone())
                            .or_insert_with(|| field.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// The object types with a `@key`, which are the members of the `_Entity` union.
    fn locate_entities(schema: &Schema) -> IndexSet<Name> {
        schema
            .types
            .iter()
            .filter(|(_, type_)| {
                matches!(type_, ExtendedType::Object(_))
                    && type_.directives().has(&KEY_DIRECTIVE_NAME)
            })
            .map(|(type_name, _)| type_name.clone())
            .collect()
    }

    /// The field sets of the resolvable `@key`s of the given type, in declaration order.
    pub(crate) fn key_field_sets(
        schema: &ValidFederationSchema,
        type_name: &Name,
    ) -> Result<Vec<SelectionSet>, FederationError> {
        let Some(type_) = schema.types.get(type_name) else {
            return Ok(Vec::new());
        };
        type_
            .directives()
            .get_all(&KEY_DIRECTIVE_NAME)
            .filter(|application| is_resolvable_key(application))
            .map(|application| {
                parse_field_set(schema, type_name.clone(), fields_argument(application)?)
            })
            .collect()
    }
}

impl Debug for Subgraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, r#"name: {}"#, self.name)
    }
}

/// Decides which fields of a subgraph are truly external.
///
/// A field marked `@external` is not considered external when it is part of a `@key` declared on a
/// type extension (or on a type marked `@extends`): those markers only say that the type is
/// "owned" elsewhere, and the subgraph can still resolve the key fields itself.
#[derive(Debug, Clone, Default)]
pub(crate) struct ExternalTester {
    fake_external_fields: IndexSet<FieldDefinitionPosition>,
}

impl ExternalTester {
    pub(crate) fn new(schema: &ValidFederationSchema) -> Self {
        let mut tester = Self::default();
        for (type_name, type_) in &schema.types {
            let type_is_extension = type_.directives().has(&EXTENDS_DIRECTIVE_NAME);
            for key in type_.directives().get_all(&KEY_DIRECTIVE_NAME) {
                if !(type_is_extension || matches!(key.origin, ComponentOrigin::Extension(_))) {
                    continue;
                }
                // Invalid keys are reported when the query graph is built.
                let Ok(fields) = fields_argument(key) else {
                    continue;
                };
                let Ok(selection_set) = parse_field_set(schema, type_name.clone(), fields) else {
                    continue;
                };
                tester.collect_fake_externals(&selection_set);
            }
        }
        tester
    }

    fn collect_fake_externals(&mut self, selection_set: &SelectionSet) {
        for selection in &selection_set.selections {
            match selection {
                Selection::Field(field) => {
                    if field.definition.directives.has(&EXTERNAL_DIRECTIVE_NAME) {
                        self.fake_external_fields.insert(FieldDefinitionPosition::new(
                            selection_set.ty.clone(),
                            field.name.clone(),
                        ));
                    }
                    self.collect_fake_externals(&field.selection_set);
                }
                Selection::InlineFragment(fragment) => {
                    self.collect_fake_externals(&fragment.selection_set)
                }
                Selection::FragmentSpread(_) => {}
            }
        }
    }

    pub(crate) fn is_fake_external(&self, field: &FieldDefinitionPosition) -> bool {
        self.fake_external_fields.contains(field)
    }

    pub(crate) fn is_external(
        &self,
        schema: &Valid<Schema>,
        field: &FieldDefinitionPosition,
    ) -> bool {
        field.try_get(schema).is_some_and(|definition| {
            definition.directives.has(&EXTERNAL_DIRECTIVE_NAME)
        }) && !self.is_fake_external(field)
    }

    pub(crate) fn selects_any_external_field(
        &self,
        schema: &Valid<Schema>,
        selection_set: &SelectionSet,
    ) -> bool {
        selection_set
            .selections
            .iter()
            .any(|selection| match selection {
                Selection::Field(field) => {
                    let position =
                        FieldDefinitionPosition::new(selection_set.ty.clone(), field.name.clone());
                    self.is_external(schema, &position)
                        || self.selects_any_external_field(schema, &field.selection_set)
                }
                Selection::InlineFragment(fragment) => {
                    self.selects_any_external_field(schema, &fragment.selection_set)
                }
                Selection::FragmentSpread(_) => false,
            })
    }
}
