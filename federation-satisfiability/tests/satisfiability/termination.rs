use federation_satisfiability::composition::validate_graph_composition;
use pretty_assertions::assert_eq;

use super::test_helpers::ServiceDefinition;
use super::test_helpers::messages;
use super::test_helpers::query_graphs;
use super::test_helpers::validate;

const CYCLIC_SUPERGRAPH: &str = r#"
type Query {
    t: T
}

type T {
    id: ID!
    next: T
    a: Int
    b: Int
}
"#;

const CYCLIC_SUBGRAPHS: [ServiceDefinition<'static>; 2] = [
    ServiceDefinition {
        name: "S1",
        type_defs: r#"
        type Query {
            t: T
        }

        type T @key(fields: "id") {
            id: ID!
            next: T
            a: Int
        }
        "#,
    },
    ServiceDefinition {
        name: "S2",
        type_defs: r#"
        type T @key(fields: "id") {
            id: ID!
            next: T
            b: Int
        }
        "#,
    },
];

#[test]
fn keys_going_both_ways_terminate() {
    let errors = validate(CYCLIC_SUPERGRAPH, &CYCLIC_SUBGRAPHS);
    assert!(errors.is_empty(), "{:?}", messages(&errors));
}

#[test]
fn unsatisfiable_fields_of_recursive_types_are_reported_once() {
    let errors = validate(
        r#"
        type Query {
            t: T
        }

        type T {
            next: T
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
                next: T
                a: Int
            }
            "#,
        }],
    );
    // `T` is reached again through `next` with the same subgraphs, so `b` fails only from `t`.
    assert_eq!(errors.len(), 1);
}

#[test]
fn validation_is_idempotent() {
    let supergraph = r#"
    type Query {
        t: T
    }

    type T {
        id: ID!
        next: T
        a: Int
        b: Int
        c: Int
    }
    "#;
    let (api_schema_query_graph, federated_query_graph) =
        query_graphs(supergraph, &CYCLIC_SUBGRAPHS);
    let first = validate_graph_composition(
        api_schema_query_graph.clone(),
        federated_query_graph.clone(),
    )
    .unwrap();
    let second = validate_graph_composition(api_schema_query_graph, federated_query_graph).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(messages(&first), messages(&second));
}
