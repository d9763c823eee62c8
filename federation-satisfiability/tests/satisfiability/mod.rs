mod composition_errors;
mod replay;
mod scenarios;
mod termination;
mod witnesses;

pub(crate) mod test_helpers {
    use std::sync::Arc;

    use federation_satisfiability::Supergraph;
    use federation_satisfiability::composition::ValidationError;
    use federation_satisfiability::composition::validate_graph_composition;
    use federation_satisfiability::query_graph::QueryGraph;
    use federation_satisfiability::query_graph::build_query_graph::build_federated_query_graph;
    use federation_satisfiability::query_graph::build_query_graph::build_supergraph_api_query_graph;
    use federation_satisfiability::subgraph::Subgraph;

    pub(crate) struct ServiceDefinition<'a> {
        pub(crate) name: &'a str,
        pub(crate) type_defs: &'a str,
    }

    /// Parses the given supergraph API schema and subgraphs.
    pub(crate) fn parse(
        supergraph: &str,
        service_list: &[ServiceDefinition<'_>],
    ) -> (Supergraph, Vec<Subgraph>) {
        let supergraph = Supergraph::new(supergraph).unwrap();
        let subgraphs = service_list
            .iter()
            .map(|service| Subgraph::parse(service.name, service.type_defs).unwrap())
            .collect();
        (supergraph, subgraphs)
    }

    /// Builds the supergraph API query graph and the federated query graph.
    pub(crate) fn query_graphs(
        supergraph: &str,
        service_list: &[ServiceDefinition<'_>],
    ) -> (Arc<QueryGraph>, Arc<QueryGraph>) {
        let (supergraph, subgraphs) = parse(supergraph, service_list);
        (
            Arc::new(build_supergraph_api_query_graph(&supergraph).unwrap()),
            Arc::new(build_federated_query_graph(&supergraph, &subgraphs).unwrap()),
        )
    }

    pub(crate) fn validate(
        supergraph: &str,
        service_list: &[ServiceDefinition<'_>],
    ) -> Vec<ValidationError> {
        let (api_schema_query_graph, federated_query_graph) =
            query_graphs(supergraph, service_list);
        validate_graph_composition(api_schema_query_graph, federated_query_graph).unwrap()
    }

    pub(crate) fn messages(errors: &[ValidationError]) -> Vec<&str> {
        errors.iter().map(|error| error.message()).collect()
    }
}
