use insta::assert_snapshot;

use super::test_helpers::ServiceDefinition;
use super::test_helpers::messages;
use super::test_helpers::validate;

#[test]
fn fields_of_an_entity_are_reached_through_its_key() {
    let errors = validate(
        r#"
        type Query {
            product: Product
        }

        type Product {
            id: ID!
            name: String
            price: Int
        }
        "#,
        &[
            ServiceDefinition {
                name: "S1",
                type_defs: r#"
                type Product @key(fields: "id") {
                    id: ID!
                    name: String
                }
                "#,
            },
            ServiceDefinition {
                name: "S2",
                type_defs: r#"
                type Query {
                    product: Product
                }

                type Product @key(fields: "id") {
                    id: ID!
                    price: Int
                }
                "#,
            },
        ],
    );
    assert!(errors.is_empty(), "{:?}", messages(&errors));
}

#[test]
fn types_without_key_fields_cannot_jump_to_other_subgraphs() {
    let errors = validate(
        r#"
        type Query {
            getA: A
        }

        type A {
            id: ID!
            name: String
            x: Int
        }
        "#,
        &[
            ServiceDefinition {
                name: "S1",
                type_defs: r#"
                type A @key(fields: "id") {
                    id: ID!
                    x: Int
                }
                "#,
            },
            ServiceDefinition {
                name: "S2",
                type_defs: r#"
                type Query {
                    getA: A
                }

                type A {
                    name: String
                }
                "#,
            },
        ],
    );
    // Both `id` and `x` live only in S1, which S2 cannot jump to.
    assert_eq!(errors.len(), 2);
    let x_error = errors
        .iter()
        .find(|error| error.witness().to_string().contains(" x\n"))
        .unwrap();
    assert_snapshot!(x_error.witness(), @r###"
    {
      getA {
        x
      }
    }
    "###);
    assert_snapshot!(x_error.message(), @r###"
    The following supergraph API query:
    {
      getA {
        x
      }
    }
    cannot be satisfied by the subgraphs because:
    - from subgraph "S2":
      - cannot find field "A.x".
      - cannot move to subgraph "S1" using @key(fields: "id") of "A", the key field(s) cannot be resolved from subgraph "S2".
    "###);
}

#[test]
fn requires_need_a_key_to_resume_the_query() {
    let errors = validate(
        r#"
        type Query {
            b: B
        }

        type B {
            id: ID!
            y: Int
            z: Int
        }
        "#,
        &[
            ServiceDefinition {
                name: "S1",
                type_defs: r#"
                type B @key(fields: "id") {
                    id: ID!
                    z: Int
                }
                "#,
            },
            ServiceDefinition {
                name: "S2",
                type_defs: r#"
                type Query {
                    b: B
                }

                type B {
                    id: ID!
                    y: Int @requires(fields: "z")
                    z: Int @external
                }
                "#,
            },
        ],
    );
    assert_eq!(errors.len(), 1);
    assert_snapshot!(errors[0].message(), @r###"
    The following supergraph API query:
    {
      b {
        y
      }
    }
    cannot be satisfied by the subgraphs because:
    - from subgraph "S2": @requires condition on field "B.y" can be satisfied but missing usable key on "B" in subgraph "S2" to resume query.
    - from subgraph "S1": cannot find field "B.y".
    "###);
}

#[test]
fn requires_are_satisfied_from_entities_with_keys() {
    let errors = validate(
        r#"
        type Query {
            b: B
        }

        type B {
            id: ID!
            y: Int
            z: Int
        }
        "#,
        &[
            ServiceDefinition {
                name: "S1",
                type_defs: r#"
                type Query {
                    b: B
                }

                type B @key(fields: "id") {
                    id: ID!
                    z: Int
                }
                "#,
            },
            ServiceDefinition {
                name: "S2",
                type_defs: r#"
                type B @key(fields: "id") {
                    id: ID!
                    y: Int @requires(fields: "z")
                    z: Int @external
                }
                "#,
            },
        ],
    );
    assert!(errors.is_empty(), "{:?}", messages(&errors));
}

#[test]
fn fields_missing_from_every_subgraph_are_reported_once_per_path() {
    let errors = validate(
        r#"
        type Query {
            t: T
        }

        type T {
            a: Int
            b: Int
        }
        "#,
        &[ServiceDefinition {
            name: "S1",
            type_defs: r#"
            type Query {
                t: T
            }

            type T {
                a: Int
            }
            "#,
        }],
    );
    assert_eq!(errors.len(), 1);
    assert_snapshot!(errors[0].message(), @r###"
    The following supergraph API query:
    {
      t {
        b
      }
    }
    cannot be satisfied by the subgraphs because:
    - from subgraph "S1": cannot find field "T.b".
    "###);
}
