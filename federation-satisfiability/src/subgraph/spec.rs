use apollo_compiler::Name;
use apollo_compiler::ast::Directive;
use apollo_compiler::name;

use crate::error::FederationError;
use crate::error::SingleFederationError;

pub const KEY_DIRECTIVE_NAME: Name = name!("key");
pub const REQUIRES_DIRECTIVE_NAME: Name = name!("requires");
pub const PROVIDES_DIRECTIVE_NAME: Name = name!("provides");
pub const EXTERNAL_DIRECTIVE_NAME: Name = name!("external");
pub const EXTENDS_DIRECTIVE_NAME: Name = name!("extends");
pub const SHAREABLE_DIRECTIVE_NAME: Name = name!("shareable");

pub const FIELDSET_SCALAR_NAME: Name = name!("FieldSet");
pub const ENTITY_UNION_NAME: Name = name!("_Entity");

pub(crate) const FIELDS_ARGUMENT_NAME: Name = name!("fields");
pub(crate) const RESOLVABLE_ARGUMENT_NAME: Name = name!("resolvable");

/// The federation directives understood by query graph construction, with their definitions.
pub(crate) const FEDERATION_DIRECTIVE_DEFINITIONS: [(Name, &str); 6] = [
    (
        KEY_DIRECTIVE_NAME,
        "directive @key(fields: FieldSet!, resolvable: Boolean = true) repeatable on OBJECT | INTERFACE",
    ),
    (
        REQUIRES_DIRECTIVE_NAME,
        "directive @requires(fields: FieldSet!) on FIELD_DEFINITION",
    ),
    (
        PROVIDES_DIRECTIVE_NAME,
        "directive @provides(fields: FieldSet!) on FIELD_DEFINITION",
    ),
    (
        EXTERNAL_DIRECTIVE_NAME,
        "directive @external(reason: String) on OBJECT | FIELD_DEFINITION",
    ),
    (
        EXTENDS_DIRECTIVE_NAME,
        "directive @extends on OBJECT | INTERFACE",
    ),
    (
        SHAREABLE_DIRECTIVE_NAME,
        "directive @shareable repeatable on OBJECT | FIELD_DEFINITION",
    ),
];

pub(crate) const FIELDSET_SCALAR_DEFINITION: &str = "scalar FieldSet";

pub(crate) const FEDERATION_TYPES_DEFINITIONS: &str = r#"
scalar _Any

type _Service {
  sdl: String
}

type Query {
  _service: _Service!
}
"#;

pub(crate) const ENTITIES_QUERY_DEFINITION: &str = r#"
extend type Query {
  _entities(representations: [_Any!]!): [_Entity]!
}
"#;

/// Returns the `fields` argument of a `@key`, `@requires` or `@provides` application.
pub(crate) fn fields_argument(application: &Directive) -> Result<&str, FederationError> {
    application
        .specified_argument_by_name(&FIELDS_ARGUMENT_NAME)
        .and_then(|value| value.as_str())
        .ok_or_else(|| {
            SingleFederationError::InvalidFieldSet {
                message: format!(
                    "Directive \"@{}\" has no string \"fields\" argument",
                    application.name
                ),
            }
            .into()
        })
}

/// Whether a `@key` application can be used to resolve its entity. Keys marked
/// `resolvable: false` only document how the entity is identified.
pub(crate) fn is_resolvable_key(application: &Directive) -> bool {
    application
        .specified_argument_by_name(&RESOLVABLE_ARGUMENT_NAME)
        .and_then(|value| value.to_bool())
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use apollo_compiler::Schema;

    use super::*;

    #[test]
    fn directive_definitions_parse() {
        let sdl = FEDERATION_DIRECTIVE_DEFINITIONS
            .iter()
            .map(|(_, definition)| *definition)
            .chain([FIELDSET_SCALAR_DEFINITION, "type Query { a: Int }"])
            .collect::<Vec<_>>()
            .join("\n");
        let schema = Schema::parse_and_validate(sdl, "federation.graphql").unwrap();
        for (name, _) in &FEDERATION_DIRECTIVE_DEFINITIONS {
            assert!(schema.directive_definitions.contains_key(name));
        }
    }

    #[test]
    fn reads_key_arguments() {
        let schema = Schema::parse_and_validate(
            format!(
                "{}\n{}\n{}",
                FEDERATION_DIRECTIVE_DEFINITIONS[0].1,
                FIELDSET_SCALAR_DEFINITION,
                r#"
                type Query { t: T }
                type T @key(fields: "id") @key(fields: "upc", resolvable: false) {
                  id: ID!
                  upc: ID!
                }
                "#
            ),
            "schema.graphql",
        )
        .unwrap();
        let keys = schema.types["T"]
            .directives()
            .get_all("key")
            .collect::<Vec<_>>();
        assert_eq!(fields_argument(keys[0]).unwrap(), "id");
        assert!(is_resolvable_key(keys[0]));
        assert_eq!(fields_argument(keys[1]).unwrap(), "upc");
        assert!(!is_resolvable_key(keys[1]));
    }
}
