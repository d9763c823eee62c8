use federation_satisfiability::composition::ComputedSubgraphPaths;
use federation_satisfiability::composition::compute_subgraph_paths;
use federation_satisfiability::composition::validate_graph_composition;
use insta::assert_snapshot;
use pretty_assertions::assert_eq;

use super::test_helpers::ServiceDefinition;
use super::test_helpers::query_graphs;

#[test]
fn replaying_an_unsatisfiable_path_reproduces_its_error() {
    let (api_schema_query_graph, federated_query_graph) = query_graphs(
        r#"
        type Query {
            t: T
        }

        type T {
            id: ID!
            x: Int
            y: Int
        }
        "#,
        &[
            ServiceDefinition {
                name: "S1",
                type_defs: r#"
                type Query {
                    t: T
                }

                type T @key(fields: "id") {
                    id: ID!
                    x: Int
                }
                "#,
            },
            ServiceDefinition {
                name: "S2",
                type_defs: r#"
                type T {
                    id: ID!
                    y: Int
                }
                "#,
            },
        ],
    );
    let errors =
        validate_graph_composition(api_schema_query_graph, federated_query_graph.clone()).unwrap();
    assert_eq!(errors.len(), 1);
    let error = &errors[0];
    assert_snapshot!(
        error.supergraph_unsatisfiable_path(),
        @"Query(supergraph)* --[t]--> T(supergraph) --[y]--> Int(supergraph)"
    );
    assert_eq!(
        error
            .subgraphs_paths()
            .iter()
            .map(|path| path.to_string())
            .collect::<Vec<_>>(),
        ["Query(S1)* --[t]--> T(S1) (types: [T])"]
    );

    let ComputedSubgraphPaths::Error(replayed) =
        compute_subgraph_paths(error.supergraph_unsatisfiable_path(), federated_query_graph)
            .unwrap()
    else {
        panic!("expected the replay to fail");
    };
    assert_eq!(replayed.message(), error.message());
    assert_eq!(replayed.witness(), error.witness());
}
