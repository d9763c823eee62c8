use std::fmt::Display;
use std::fmt::Formatter;

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::name;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;
use serde::Serialize;

use crate::error::FederationError;

pub(crate) static INTROSPECTION_TYPENAME_FIELD_NAME: Name = name!("__typename");

/// A zero-allocation error representation for position lookups,
/// because many of these errors are actually immediately discarded.
#[derive(Debug, thiserror::Error)]
pub(crate) enum PositionLookupError {
    #[error("Schema has no type `{0}`")]
    TypeMissing(Name),
    #[error("Schema type `{0}` is not {1}")]
    TypeWrongKind(Name, &'static str),
    #[error("Type `{0}` has no field `{1}`")]
    MissingField(Name, Name),
}

impl From<PositionLookupError> for FederationError {
    fn from(value: PositionLookupError) -> Self {
        FederationError::internal(value.to_string())
    }
}

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum_macros::Display,
    strum_macros::EnumIter,
    Serialize,
)]
pub enum SchemaRootDefinitionKind {
    #[strum(to_string = "query")]
    Query,
    #[strum(to_string = "mutation")]
    Mutation,
    #[strum(to_string = "subscription")]
    Subscription,
}

impl From<SchemaRootDefinitionKind> for ast::OperationType {
    fn from(value: SchemaRootDefinitionKind) -> Self {
        match value {
            SchemaRootDefinitionKind::Query => ast::OperationType::Query,
            SchemaRootDefinitionKind::Mutation => ast::OperationType::Mutation,
            SchemaRootDefinitionKind::Subscription => ast::OperationType::Subscription,
        }
    }
}

impl From<ast::OperationType> for SchemaRootDefinitionKind {
    fn from(value: ast::OperationType) -> Self {
        match value {
            ast::OperationType::Query => SchemaRootDefinitionKind::Query,
            ast::OperationType::Mutation => SchemaRootDefinitionKind::Mutation,
            ast::OperationType::Subscription => SchemaRootDefinitionKind::Subscription,
        }
    }
}

/// The position of a field of an object or interface type (or the `__typename` meta-field of
/// any composite type).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDefinitionPosition {
    pub type_name: Name,
    pub field_name: Name,
}

impl FieldDefinitionPosition {
    pub(crate) fn new(type_name: Name, field_name: Name) -> Self {
        Self {
            type_name,
            field_name,
        }
    }

    pub(crate) fn is_introspection_typename_field(&self) -> bool {
        self.field_name == INTROSPECTION_TYPENAME_FIELD_NAME
    }

    /// Returns the definition of the field, meta-fields included.
    pub(crate) fn get<'schema>(
        &self,
        schema: &'schema Schema,
    ) -> Result<&'schema Component<FieldDefinition>, PositionLookupError> {
        let type_ = schema
            .types
            .get(&self.type_name)
            .ok_or_else(|| PositionLookupError::TypeMissing(self.type_name.clone()))?;
        if !matches!(
            type_,
            ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_)
        ) {
            return Err(PositionLookupError::TypeWrongKind(
                self.type_name.clone(),
                "a composite type",
            ));
        }
        schema
            .type_field(&self.type_name, &self.field_name)
            .map_err(|_| {
                PositionLookupError::MissingField(self.type_name.clone(), self.field_name.clone())
            })
    }

    pub(crate) fn try_get<'schema>(
        &self,
        schema: &'schema Schema,
    ) -> Option<&'schema Component<FieldDefinition>> {
        self.get(schema).ok()
    }
}

impl Display for FieldDefinitionPosition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.type_name, self.field_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDL: &str = r#"
        type Query { t: T }
        type T { id: ID! }
        union U = T
        scalar S
    "#;

    #[test]
    fn finds_fields_and_meta_fields() {
        let schema = Schema::parse_and_validate(SDL, "schema.graphql").unwrap();
        let id = FieldDefinitionPosition::new(name!("T"), name!("id"));
        assert_eq!(id.to_string(), "T.id");
        assert_eq!(id.get(&schema).unwrap().ty.to_string(), "ID!");

        let typename = FieldDefinitionPosition::new(name!("U"), name!("__typename"));
        assert!(typename.is_introspection_typename_field());
        assert_eq!(typename.get(&schema).unwrap().ty.to_string(), "String!");
    }

    #[test]
    fn reports_lookup_errors() {
        let schema = Schema::parse_and_validate(SDL, "schema.graphql").unwrap();
        let missing = FieldDefinitionPosition::new(name!("T"), name!("nope"));
        assert_eq!(
            missing.get(&schema).unwrap_err().to_string(),
            "Type `T` has no field `nope`"
        );
        let scalar = FieldDefinitionPosition::new(name!("S"), name!("x"));
        assert_eq!(
            scalar.get(&schema).unwrap_err().to_string(),
            "Schema type `S` is not a composite type"
        );
        let unknown = FieldDefinitionPosition::new(name!("Nope"), name!("x"));
        assert!(unknown.try_get(&schema).is_none());
    }
}
