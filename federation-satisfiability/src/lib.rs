//! ## Usage
//!
//! This crate validates the satisfiability of a federated supergraph: that every query that can
//! be written against the supergraph API can also be answered by its subgraphs.
//!
//! Both sides are modeled as query graphs. [`query_graph::build_query_graph`] builds the query
//! graph of the supergraph API schema and the federated query graph of the subgraphs, and
//! [`composition::validate_graph_composition`] walks the former, looking for a matching path in
//! the latter for every path it takes. Every unsatisfiable path is reported with an example
//! ("witness") query that cannot be planned.

#![warn(
    rustdoc::broken_intra_doc_links,
    unreachable_pub,
    unreachable_patterns,
    unused,
    unused_qualifications,
    dead_code,
    while_true,
    unconditional_panic,
    clippy::all
)]

pub mod composition;
pub mod error;
pub mod query_graph;
pub mod schema;
pub mod subgraph;
pub(crate) mod utils;

use apollo_compiler::Schema;

use crate::error::FederationError;
use crate::schema::ValidFederationSchema;

/// The API schema of a supergraph, as produced by merging the subgraphs.
#[derive(Debug, Clone)]
pub struct Supergraph {
    pub schema: ValidFederationSchema,
}

impl Supergraph {
    pub fn new(schema_str: &str) -> Result<Self, FederationError> {
        let schema = Schema::parse_and_validate(schema_str, "schema.graphql")?;
        Ok(Self {
            schema: ValidFederationSchema::new(schema),
        })
    }
}
