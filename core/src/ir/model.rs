//! file: core/src/ir/model.rs
//! description: the target graph model produced by lowering.
//!
//! A `Model` is one top-level `Graph` plus a library of reusable
//! `Function`s invoked from call nodes. Everything here is plain data;
//! construction rules live in `GraphBuilder`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::ir::tensor::Tensor;
use crate::ir::value_info::ValueInfo;

/// Domain used by call nodes that invoke a reusable function.
pub const FUNCTION_DOMAIN: &str = "custom";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attribute {
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Str(String),
    Tensor(Tensor),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub op_type: String,
    #[serde(default)]
    pub domain: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Attribute>,
    /// Human-facing name of the source construct, when it differs from `name`.
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Node {
    pub fn new(op_type: &str, name: &str, inputs: Vec<String>, outputs: Vec<String>) -> Self {
        Node {
            name: name.to_string(),
            op_type: op_type.to_string(),
            domain: String::new(),
            inputs,
            outputs,
            attributes: BTreeMap::new(),
            display_name: None,
        }
    }

    pub fn with_attribute(mut self, key: &str, value: Attribute) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn is_function_call(&self) -> bool {
        self.domain == FUNCTION_DOMAIN
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}[{}]({})", self.outputs.join(", "), self.op_type, self.name, self.inputs.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initializer {
    pub name: String,
    pub tensor: Tensor,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub name: String,
    pub inputs: Vec<ValueInfo>,
    pub outputs: Vec<ValueInfo>,
    pub nodes: Vec<Node>,
    pub initializers: Vec<Initializer>,
    pub value_info: Vec<ValueInfo>,
}

impl Graph {
    pub fn initializer(&self, name: &str) -> Option<&Initializer> {
        self.initializers.iter().find(|i| i.name == name)
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|v| v.name.as_str()).collect()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|v| v.name.as_str()).collect()
    }
}

/// A reusable subgraph. Its inputs are the data inputs followed by
/// `param_count` parameter inputs that receive captured constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub domain: String,
    pub inputs: Vec<String>,
    pub param_count: usize,
    pub outputs: Vec<String>,
    pub nodes: Vec<Node>,
    pub value_info: Vec<ValueInfo>,
}

impl Function {
    pub fn data_inputs(&self) -> &[String] {
        &self.inputs[..self.inputs.len() - self.param_count]
    }

    pub fn param_inputs(&self) -> &[String] {
        &self.inputs[self.inputs.len() - self.param_count..]
    }

    pub fn value_info(&self, name: &str) -> Option<&ValueInfo> {
        self.value_info.iter().find(|v| v.name == name)
    }

    /// Two functions with the same body differ at most by name.
    pub fn same_body(&self, other: &Function) -> bool {
        self.domain == other.domain
            && self.inputs == other.inputs
            && self.param_count == other.param_count
            && self.outputs == other.outputs
            && self.nodes == other.nodes
            && self.value_info == other.value_info
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub producer: String,
    pub opset: u32,
    pub graph: Graph,
    pub functions: Vec<Function>,
}

impl Model {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Call nodes of the top-level graph, in order.
    pub fn call_nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.nodes.iter().filter(|n| n.is_function_call())
    }

    /// Verify the structural invariants of a finished model and return every
    /// violation found.
    pub fn check(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        let functions: HashMap<&str, &Function> =
            self.functions.iter().map(|f| (f.name.as_str(), f)).collect();

        // top-level graph
        let mut defined: HashSet<&str> = HashSet::new();
        defined.extend(self.graph.inputs.iter().map(|v| v.name.as_str()));
        defined.extend(self.graph.initializers.iter().map(|i| i.name.as_str()));
        check_nodes("graph", &self.graph.nodes, &mut defined, &functions, &mut problems);
        for out in &self.graph.outputs {
            if !defined.contains(out.name.as_str()) {
                problems.push(format!("graph: output '{}' is never produced", out.name));
            }
        }
        let referenced: HashSet<&str> = self
            .graph
            .nodes
            .iter()
            .flat_map(|n| n.inputs.iter().map(|s| s.as_str()))
            .collect();
        for init in &self.graph.initializers {
            if !referenced.contains(init.name.as_str()) {
                problems.push(format!("graph: initializer '{}' is never referenced", init.name));
            }
        }

        for func in &self.functions {
            let scope = format!("function {}", func.name);
            let mut defined: HashSet<&str> = func.inputs.iter().map(|s| s.as_str()).collect();
            check_nodes(&scope, &func.nodes, &mut defined, &functions, &mut problems);
            for name in func.inputs.iter().chain(func.outputs.iter()) {
                if func.value_info(name).is_none() {
                    problems.push(format!("{}: '{}' has no shape/dtype record", scope, name));
                }
            }
            for out in &func.outputs {
                if !defined.contains(out.as_str()) {
                    problems.push(format!("{}: output '{}' is never produced", scope, out));
                }
            }
        }

        if problems.is_empty() { Ok(()) } else { Err(problems) }
    }
}

fn check_nodes<'a>(
    scope: &str,
    nodes: &'a [Node],
    defined: &mut HashSet<&'a str>,
    functions: &HashMap<&str, &Function>,
    problems: &mut Vec<String>,
) {
    let mut node_names: HashSet<&str> = HashSet::new();
    for node in nodes {
        if !node_names.insert(node.name.as_str()) {
            problems.push(format!("{}: duplicate node name '{}'", scope, node.name));
        }
        for input in &node.inputs {
            if !defined.contains(input.as_str()) {
                problems.push(format!("{}: node '{}' reads dangling name '{}'", scope, node.name, input));
            }
        }
        if node.is_function_call() {
            match functions.get(node.op_type.as_str()) {
                Some(f) if f.inputs.len() != node.inputs.len() => problems.push(format!(
                    "{}: call '{}' passes {} inputs to '{}' which takes {}",
                    scope,
                    node.name,
                    node.inputs.len(),
                    f.name,
                    f.inputs.len()
                )),
                Some(_) => {}
                None => problems.push(format!("{}: call '{}' targets unknown function '{}'", scope, node.name, node.op_type)),
            }
        }
        defined.extend(node.outputs.iter().map(|s| s.as_str()));
    }
}
