//! Model-level passes run after lowering.
use crate::error::Result;
use crate::ir::model::Model;

mod dce;

pub use self::dce::prune_unused_initializers;

/// A pass over a finished model. Passes may reshape the graph but must keep
/// every structural invariant `Model::check` verifies.
pub trait ModelOptimizer: Send + Sync {
    fn name(&self) -> &str;
    fn optimize(&self, model: Model) -> Result<Model>;
}

/// Leaves the model untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOptimizer;

impl ModelOptimizer for NoopOptimizer {
    fn name(&self) -> &str {
        "noop"
    }

    fn optimize(&self, model: Model) -> Result<Model> {
        Ok(model)
    }
}

/// Removes nodes, functions and initializers that cannot reach an output.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadNodeElimination;

impl ModelOptimizer for DeadNodeElimination {
    fn name(&self) -> &str {
        "dead-node-elimination"
    }

    fn optimize(&self, model: Model) -> Result<Model> {
        Ok(dce::eliminate_dead_nodes(model))
    }
}
