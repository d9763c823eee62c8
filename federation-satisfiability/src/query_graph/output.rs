//! Graphviz rendering of query graphs, to debug their construction and the paths walked on them.

use petgraph::dot::Config;
use petgraph::dot::Dot;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;

use crate::query_graph::QueryGraph;
use crate::query_graph::QueryGraphEdge;
use crate::query_graph::QueryGraphNode;

const INDENT: &str = "  ";

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

fn edge_attributes(edge: &QueryGraphEdge) -> String {
    let label = edge.to_string();
    if label.is_empty() {
        String::new()
    } else {
        format!("label=\"{}\"", escape(&label))
    }
}

fn node_attributes(node: &QueryGraphNode) -> String {
    format!("label=\"{}\"", escape(&node.to_string()))
}

/// Renders the query graph in the dot format.
///
/// A query graph built from a single schema is rendered flat. A federated query graph gets one
/// cluster per subgraph, while its federated roots and the edges crossing subgraphs are rendered
/// at the top level.
pub fn to_dot(graph: &QueryGraph) -> String {
    if graph.sources.len() > 1 {
        return to_dot_federated(graph);
    }
    let config = [Config::NodeNoLabel, Config::EdgeNoLabel];
    Dot::with_attr_getters(
        &graph.graph,
        &config,
        &|_, edge_ref| edge_attributes(edge_ref.weight()),
        &|_, (_, node)| node_attributes(node),
    )
    .to_string()
}

fn to_dot_federated(graph: &QueryGraph) -> String {
    let node_line = |depth: usize, node: NodeIndex, weight: &QueryGraphNode| {
        format!(
            "{}{} [{}]\n",
            INDENT.repeat(depth),
            node.index(),
            node_attributes(weight)
        )
    };
    let edge_line = |depth: usize, head: NodeIndex, tail: NodeIndex, edge: &QueryGraphEdge| {
        let attributes = edge_attributes(edge);
        if attributes.is_empty() {
            format!("{}{} -> {}\n", INDENT.repeat(depth), head.index(), tail.index())
        } else {
            format!(
                "{}{} -> {} [{attributes}]\n",
                INDENT.repeat(depth),
                head.index(),
                tail.index()
            )
        }
    };

    let mut output = format!("digraph \"{}\" {{\n", escape(graph.name()));
    for source in graph.sources.keys() {
        if **source == *graph.current_source {
            continue;
        }
        output.push_str(&format!(
            "{INDENT}subgraph \"cluster_{}\" {{\n",
            escape(source)
        ));
        output.push_str(&format!(
            "{}label=\"Subgraph \\\"{}\\\"\"\n",
            INDENT.repeat(2),
            escape(source)
        ));
        for node in graph.graph.node_indices() {
            let weight = &graph.graph[node];
            if weight.source == *source {
                output.push_str(&node_line(2, node, weight));
            }
        }
        for edge_ref in graph.graph.edge_references() {
            let head = &graph.graph[edge_ref.source()];
            let tail = &graph.graph[edge_ref.target()];
            if head.source == *source && tail.source == *source {
                output.push_str(&edge_line(
                    2,
                    edge_ref.source(),
                    edge_ref.target(),
                    edge_ref.weight(),
                ));
            }
        }
        output.push_str(&format!("{INDENT}}}\n"));
    }
    for node in graph.graph.node_indices() {
        let weight = &graph.graph[node];
        if weight.source == graph.current_source {
            output.push_str(&node_line(1, node, weight));
        }
    }
    for edge_ref in graph.graph.edge_references() {
        let head = &graph.graph[edge_ref.source()];
        let tail = &graph.graph[edge_ref.target()];
        if head.source != tail.source {
            output.push_str(&edge_line(
                1,
                edge_ref.source(),
                edge_ref.target(),
                edge_ref.weight(),
            ));
        }
    }
    output.push_str("}\n");
    output
}

#[cfg(test)]
mod tests {
    use apollo_compiler::Schema;
    use insta::assert_snapshot;

    use super::*;
    use crate::Supergraph;
    use crate::query_graph::build_query_graph::build_federated_query_graph;
    use crate::query_graph::build_query_graph::build_query_graph;
    use crate::schema::ValidFederationSchema;
    use crate::subgraph::Subgraph;

    #[test]
    fn single_source_graphs_are_flat() {
        let schema = ValidFederationSchema::new(
            Schema::parse_and_validate("type Query { t: T } type T { id: ID! }", "schema.graphql")
                .unwrap(),
        );
        let query_graph = build_query_graph("api".into(), schema).unwrap();
        let dot = to_dot(&query_graph);
        assert!(dot.starts_with("digraph {"));
        assert!(!dot.contains("cluster"));
        assert!(dot.contains("label=\"Query(api)*\""));
        assert!(dot.contains("label=\"T(api)\""));
        assert!(dot.contains("label=\"id\""));
    }

    #[test]
    fn federated_graphs_are_clustered_by_subgraph() {
        let supergraph = Supergraph::new("type Query { a: Int b: Int }").unwrap();
        let subgraphs = [
            Subgraph::parse("S1", "type Query { a: Int }").unwrap(),
            Subgraph::parse("S2", "type Query { b: Int }").unwrap(),
        ];
        let query_graph = build_federated_query_graph(&supergraph, &subgraphs).unwrap();
        assert_snapshot!(to_dot(&query_graph), @r###"
        digraph "_" {
          subgraph "cluster_S1" {
            label="Subgraph \"S1\""
            0 [label="Query(S1)*"]
            1 [label="Int(S1)"]
            2 [label="_Service(S1)"]
            3 [label="String(S1)"]
            0 -> 1 [label="a"]
            2 -> 3 [label="sdl"]
            2 -> 3 [label="__typename"]
            0 -> 2 [label="_service"]
            0 -> 3 [label="__typename"]
          }
          subgraph "cluster_S2" {
            label="Subgraph \"S2\""
            4 [label="Query(S2)*"]
            5 [label="Int(S2)"]
            6 [label="_Service(S2)"]
            7 [label="String(S2)"]
            4 -> 5 [label="b"]
            6 -> 7 [label="sdl"]
            6 -> 7 [label="__typename"]
            4 -> 6 [label="_service"]
            4 -> 7 [label="__typename"]
          }
          8 [label="[query](_)*"]
          8 -> 0
          0 -> 4 [label="query()"]
          8 -> 4
          4 -> 0 [label="query()"]
        }
        "###);
    }
}
