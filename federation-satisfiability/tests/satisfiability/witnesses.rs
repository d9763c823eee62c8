use insta::assert_snapshot;
use rstest::rstest;

use super::test_helpers::ServiceDefinition;
use super::test_helpers::validate;

#[rstest]
#[case::int("Int!", "0")]
#[case::float("Float", "3.14")]
#[case::boolean("Boolean!", "true")]
#[case::string("String", r#""A string value""#)]
#[case::id("ID!", r#""<any id>""#)]
#[case::custom_scalar("Custom", r#""<some value>""#)]
#[case::enum_value("Color!", "RED")]
#[case::list("[Int!]!", "[]")]
#[case::input_object("Filter!", "{limit: 0}")]
fn arguments_get_placeholder_values(#[case] argument_type: &str, #[case] expected: &str) {
    let supergraph = format!(
        r#"
        scalar Custom

        enum Color {{ RED GREEN }}

        input Filter {{
            limit: Int!
            offset: Int
        }}

        type Query {{
            a: Int
            f(arg: {argument_type}): Int
        }}
        "#
    );
    let errors = validate(
        &supergraph,
        &[ServiceDefinition {
            name: "S1",
            type_defs: "type Query { a: Int }",
        }],
    );
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].witness().to_string(),
        format!("{{\n  f(arg: {expected})\n}}")
    );
}

#[test]
fn abstract_types_are_casted_in_witnesses() {
    let errors = validate(
        r#"
        type Query {
            i: I
        }

        interface I {
            id: ID!
        }

        type A implements I {
            id: ID!
            x: Int
        }

        type B implements I {
            id: ID!
        }
        "#,
        &[ServiceDefinition {
            name: "S1",
            type_defs: r#"
            type Query {
                i: I
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
            "#,
        }],
    );
    assert_eq!(errors.len(), 1);
    assert_snapshot!(errors[0].witness(), @r###"
    {
      i {
        ... on A {
          x
        }
      }
    }
    "###);
}

#[test]
fn mutations_name_their_operation_type() {
    let errors = validate(
        r#"
        type Query {
            a: Int
        }

        type Mutation {
            update(id: ID!): Int
            delete(id: ID!): Boolean
        }
        "#,
        &[ServiceDefinition {
            name: "S1",
            type_defs: r#"
            type Query {
                a: Int
            }

            type Mutation {
                update(id: ID!): Int
            }
            "#,
        }],
    );
    assert_eq!(errors.len(), 1);
    assert_snapshot!(errors[0].witness(), @r###"
    mutation {
      delete(id: "<any id>")
    }
    "###);
}
