use federation_satisfiability::composition::validate_satisfiability;
use federation_satisfiability::error::ErrorCode;
use pretty_assertions::assert_eq;

use super::test_helpers::ServiceDefinition;
use super::test_helpers::parse;

#[test]
fn satisfiable_supergraphs_compose() {
    let (supergraph, subgraphs) = parse(
        "type Query { t: T } type T { id: ID! a: Int }",
        &[
            ServiceDefinition {
                name: "S1",
                type_defs: r#"type Query { t: T } type T @key(fields: "id") { id: ID! }"#,
            },
            ServiceDefinition {
                name: "S2",
                type_defs: r#"type T @key(fields: "id") { id: ID! a: Int }"#,
            },
        ],
    );
    assert!(validate_satisfiability(&supergraph, &subgraphs).is_ok());
}

#[test]
fn unsatisfiable_paths_are_satisfiability_errors() {
    let (supergraph, subgraphs) = parse(
        "type Query { t: T } type T { id: ID! a: Int b: Int }",
        &[
            ServiceDefinition {
                name: "S1",
                type_defs: r#"type Query { t: T } type T @key(fields: "id") { id: ID! }"#,
            },
            ServiceDefinition {
                name: "S2",
                type_defs: r#"type T @key(fields: "id") { id: ID! a: Int }"#,
            },
        ],
    );
    let errors = validate_satisfiability(&supergraph, &subgraphs).unwrap_err();
    let codes = errors.iter().map(|error| error.code()).collect::<Vec<_>>();
    assert_eq!(codes, [ErrorCode::SatisfiabilityError]);
    assert_eq!(errors[0].code().to_string(), "SATISFIABILITY_ERROR");
    assert!(
        errors[0]
            .to_string()
            .starts_with("The following supergraph API query:\n{\n  t {\n    b\n  }\n}\n")
    );
}

#[test]
fn root_kinds_missing_from_every_subgraph_are_internal_errors() {
    let (supergraph, subgraphs) = parse(
        "type Query { a: Int } type Mutation { b: Int }",
        &[ServiceDefinition {
            name: "S1",
            type_defs: "type Query { a: Int }",
        }],
    );
    let errors = validate_satisfiability(&supergraph, &subgraphs).unwrap_err();
    let codes = errors.iter().map(|error| error.code()).collect::<Vec<_>>();
    assert_eq!(codes, [ErrorCode::Internal]);
}
