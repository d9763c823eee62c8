mod satisfiability;

pub use crate::composition::satisfiability::ComputedSubgraphPaths;
pub use crate::composition::satisfiability::ValidationError;
pub use crate::composition::satisfiability::ValidationState;
pub use crate::composition::satisfiability::WitnessOperation;
pub use crate::composition::satisfiability::compute_subgraph_paths;
pub use crate::composition::satisfiability::validate_graph_composition;
pub use crate::composition::satisfiability::validate_satisfiability;
