//! file: core/src/ir/opt/dce.rs
//! description: dead-node elimination and initializer pruning.
//!
//! Liveness flows backward from the declared outputs of each graph body.
//! Nodes whose outputs are never read are dropped, then functions no call
//! node reaches, then initializers no node reads.
use std::collections::HashSet;

use log::debug;

use crate::ir::model::{Function, Model, Node};

/// Drop every initializer that no top-level node reads. Returns the number
/// removed.
pub fn prune_unused_initializers(model: &mut Model) -> usize {
    let used: HashSet<&str> = model
        .graph
        .nodes
        .iter()
        .flat_map(|n| n.inputs.iter().map(String::as_str))
        .collect();
    let before = model.graph.initializers.len();
    let kept: Vec<_> = model
        .graph
        .initializers
        .drain(..)
        .filter(|init| {
            let keep = used.contains(init.name.as_str());
            if !keep {
                debug!("pruning unused initializer '{}'", init.name);
            }
            keep
        })
        .collect();
    model.graph.initializers = kept;
    before - model.graph.initializers.len()
}

/// Keep only the nodes that contribute to `outputs`, preserving order.
fn live_nodes(nodes: Vec<Node>, outputs: &[String]) -> Vec<Node> {
    let mut live: HashSet<String> = outputs.iter().cloned().collect();
    let mut keep = vec![false; nodes.len()];
    for (i, node) in nodes.iter().enumerate().rev() {
        if node.outputs.iter().any(|o| live.contains(o)) {
            keep[i] = true;
            live.extend(node.inputs.iter().cloned());
        }
    }
    nodes.into_iter().zip(keep).filter_map(|(n, k)| k.then_some(n)).collect()
}

fn prune_function(mut function: Function) -> Function {
    function.nodes = live_nodes(std::mem::take(&mut function.nodes), &function.outputs);
    let named: HashSet<&str> = function
        .inputs
        .iter()
        .chain(function.nodes.iter().flat_map(|n| n.outputs.iter()))
        .map(String::as_str)
        .collect();
    let records = std::mem::take(&mut function.value_info);
    function.value_info = records.into_iter().filter(|r| named.contains(r.name.as_str())).collect();
    function
}

/// Conservative dead-node elimination over the graph and every function
/// body. Every node in this model is pure, so a node is dead exactly when
/// none of its outputs is read.
pub(crate) fn eliminate_dead_nodes(mut model: Model) -> Model {
    let before = model.graph.nodes.len();
    let outputs: Vec<String> = model.graph.outputs.iter().map(|o| o.name.clone()).collect();
    model.graph.nodes = live_nodes(std::mem::take(&mut model.graph.nodes), &outputs);
    let functions: Vec<Function> = std::mem::take(&mut model.functions).into_iter().map(prune_function).collect();

    // Functions stay only while some surviving call node reaches them.
    let mut reachable: HashSet<String> = model
        .graph
        .nodes
        .iter()
        .filter(|n| n.is_function_call())
        .map(|n| n.op_type.clone())
        .collect();
    loop {
        let grown: Vec<String> = functions
            .iter()
            .filter(|f| reachable.contains(&f.name))
            .flat_map(|f| f.nodes.iter().filter(|n| n.is_function_call()).map(|n| n.op_type.clone()))
            .filter(|name| !reachable.contains(name))
            .collect();
        if grown.is_empty() {
            break;
        }
        reachable.extend(grown);
    }
    model.functions = functions.into_iter().filter(|f| reachable.contains(&f.name)).collect();

    let named: HashSet<&str> = model.graph.nodes.iter().flat_map(|n| n.outputs.iter()).map(String::as_str).collect();
    let records = std::mem::take(&mut model.graph.value_info);
    model.graph.value_info = records.into_iter().filter(|r| named.contains(r.name.as_str())).collect();

    let removed = before - model.graph.nodes.len();
    if removed > 0 {
        debug!("dead-node elimination removed {} top-level nodes", removed);
    }
    prune_unused_initializers(&mut model);
    model
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::model::{Graph, Initializer};
    use crate::ir::tensor::{DType, Tensor};
    use crate::ir::value_info::{Provenance, ShapeDim, ValueInfo};

    fn record(name: &str) -> ValueInfo {
        ValueInfo::new(name, vec![ShapeDim::Fixed(3)], DType::F32, Provenance::Original)
    }

    fn model() -> Model {
        Model {
            producer: "test".to_string(),
            opset: 21,
            graph: Graph {
                name: "m".to_string(),
                inputs: vec![record("x")],
                outputs: vec![record("y")],
                nodes: vec![
                    Node::new("Mul", "Mul_1", vec!["x".into(), "c".into()], vec!["dead".into()]),
                    Node::new("Add", "Add_1", vec!["x".into(), "x".into()], vec!["y".into()]),
                ],
                initializers: vec![
                    Initializer { name: "c".to_string(), tensor: Tensor::ones(&[3], DType::F32) },
                    Initializer { name: "unused".to_string(), tensor: Tensor::zeros(&[], DType::F32) },
                ],
                value_info: vec![record("dead")],
            },
            functions: Vec::new(),
        }
    }

    #[test]
    fn prune_keeps_only_read_initializers() {
        let mut m = model();
        assert_eq!(prune_unused_initializers(&mut m), 1);
        assert_eq!(m.graph.initializers.len(), 1);
        assert_eq!(m.graph.initializers[0].name, "c");
    }

    #[test]
    fn dead_nodes_take_their_constants_with_them() {
        let m = eliminate_dead_nodes(model());
        assert_eq!(m.graph.nodes.len(), 1);
        assert_eq!(m.graph.nodes[0].op_type, "Add");
        assert!(m.graph.initializers.is_empty());
        assert!(m.graph.value_info.is_empty());
    }
}
