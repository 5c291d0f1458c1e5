//! file: core/src/ir/lower/graph_builder.rs
//! description: per-graph-level construction state.
//!
//! A `GraphBuilder` accumulates the nodes, declared inputs/outputs,
//! value-info records and reusable functions of one graph level. The name
//! generator and the initializer table are borrowed, not owned: a child
//! builder for a nested function reborrows both from its parent, so every
//! level of one conversion shares a single name pool and a single constant
//! namespace while the node lists stay separate. After lowering, a child is
//! frozen into owned data and merged back explicitly.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, warn};

use crate::error::{ErrorKind, LoweringError, Result};
use crate::ir::lower::names::NameGenerator;
use crate::ir::model::{FUNCTION_DOMAIN, Function, Graph, Initializer, Model, Node};
use crate::ir::tensor::{DType, Tensor};
use crate::ir::value_info::{Provenance, Reconciled, ShapeDim, ValueInfo, reconcile};

pub const PRODUCER: &str = "lowergraph";

/// Named constant tensors shared by all graph levels of one conversion.
/// Each distinct payload is stored once.
#[derive(Debug, Default, Clone)]
pub struct InitializerTable {
    entries: Vec<Initializer>,
    index: HashMap<String, usize>,
    by_content: HashMap<Tensor, usize>,
}

impl InitializerTable {
    pub fn new() -> Self {
        InitializerTable::default()
    }

    /// Register `tensor` under `name`. Re-adding identical content is a no-op.
    pub fn add(&mut self, name: &str, tensor: Tensor) -> Result<()> {
        if let Some(&i) = self.index.get(name) {
            if self.entries[i].tensor == tensor {
                return Ok(());
            }
            return Err(LoweringError::duplicate("initializer", name));
        }
        self.index.insert(name.to_string(), self.entries.len());
        self.by_content.entry(tensor.clone()).or_insert(self.entries.len());
        self.entries.push(Initializer { name: name.to_string(), tensor });
        Ok(())
    }

    /// Name of an entry holding exactly `tensor`, if any.
    pub fn find(&self, tensor: &Tensor) -> Option<&str> {
        self.by_content.get(tensor).map(|&i| self.entries[i].name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.index.get(name).map(|&i| &self.entries[i].tensor)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<Initializer> {
        self.entries
    }
}

/// Owned contents of a finished child builder.
#[derive(Debug, Clone)]
pub struct FrozenGraph {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub nodes: Vec<Node>,
    pub value_info: BTreeMap<String, ValueInfo>,
    pub functions: Vec<Function>,
}

impl FrozenGraph {
    /// Initializer names read by any node of this graph, sorted with numeric
    /// suffixes compared as numbers (`const_9` before `const_10`).
    pub fn referenced_initializers(&self, initializers: &InitializerTable) -> Vec<String> {
        let mut used: Vec<String> = self
            .nodes
            .iter()
            .flat_map(|n| n.inputs.iter())
            .filter(|name| initializers.contains(name))
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        used.sort_by(|a, b| name_order(a).cmp(&name_order(b)));
        used
    }

    /// Freeze this graph into a reusable function named `name` whose trailing
    /// inputs are `params`. Internal names are rewritten to function-local
    /// positional names, so two lowerings of the same body compare equal no
    /// matter which global names they happened to draw.
    pub fn to_function(&self, name: &str, params: &[String], initializers: &InitializerTable) -> Result<Function> {
        for out in &self.outputs {
            if !self.value_info.contains_key(out) {
                return Err(LoweringError::unresolved_output(out, format!("declared by '{}'", self.name)));
            }
        }

        let mut rename: HashMap<&str, String> = HashMap::new();
        let mut records: Vec<ValueInfo> = Vec::new();
        let mut inputs = Vec::with_capacity(self.inputs.len() + params.len());
        for (i, input) in self.inputs.iter().enumerate() {
            let local = format!("in_{}", i);
            rename.insert(input.as_str(), local.clone());
            inputs.push(local);
        }
        for (j, param) in params.iter().enumerate() {
            let local = format!("param_{}", j);
            let tensor = initializers
                .get(param)
                .ok_or_else(|| LoweringError::unresolved_output(param, "captured constant is not an initializer"))?;
            let shape = tensor.dims.iter().map(|d| ShapeDim::Fixed(*d)).collect();
            records.push(ValueInfo::new(&local, shape, tensor.dtype, Provenance::Original));
            rename.insert(param.as_str(), local.clone());
            inputs.push(local);
        }
        for (k, output) in self.outputs.iter().enumerate() {
            rename.entry(output.as_str()).or_insert_with(|| format!("out_{}", k));
        }

        let mut temp = 0usize;
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for (idx, node) in self.nodes.iter().enumerate() {
            for output in &node.outputs {
                rename.entry(output.as_str()).or_insert_with(|| {
                    temp += 1;
                    format!("t_{}", temp - 1)
                });
            }
            let local = |name: &String| rename.get(name.as_str()).cloned().unwrap_or_else(|| name.clone());
            nodes.push(Node {
                name: format!("{}_{}", node.op_type, idx),
                inputs: node.inputs.iter().map(local).collect(),
                outputs: node.outputs.iter().map(local).collect(),
                ..node.clone()
            });
        }

        for (global, local) in rename.iter() {
            if let Some(record) = self.value_info.get(*global) {
                records.push(record.renamed(local));
            }
        }
        records.sort_by(|a, b| local_order(&a.name).cmp(&local_order(&b.name)));

        Ok(Function {
            name: name.to_string(),
            domain: FUNCTION_DOMAIN.to_string(),
            inputs,
            param_count: params.len(),
            outputs: self.outputs.iter().map(|o| rename[o.as_str()].clone()).collect(),
            nodes,
            value_info: records,
        })
    }
}

/// Sort key splitting a trailing `_<number>` off a generated name.
fn name_order(name: &str) -> (&str, Option<u64>, &str) {
    match name.rsplit_once('_') {
        Some((stem, suffix)) => match suffix.parse::<u64>() {
            Ok(n) => (stem, Some(n), name),
            Err(_) => (name, None, name),
        },
        None => (name, None, name),
    }
}

/// Sort key for function-local names: inputs, params, outputs, temporaries.
fn local_order(name: &str) -> (u8, usize) {
    let rank = |prefix: &str| name.strip_prefix(prefix).and_then(|n| n.parse::<usize>().ok());
    if let Some(n) = rank("in_") {
        (0, n)
    } else if let Some(n) = rank("param_") {
        (1, n)
    } else if let Some(n) = rank("out_") {
        (2, n)
    } else {
        (3, rank("t_").unwrap_or(usize::MAX))
    }
}

pub struct GraphBuilder<'a> {
    name: String,
    names: &'a mut NameGenerator,
    initializers: &'a mut InitializerTable,
    nodes: Vec<Node>,
    node_names: HashSet<String>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    value_info: BTreeMap<String, ValueInfo>,
    functions: Vec<Function>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(name: &str, names: &'a mut NameGenerator, initializers: &'a mut InitializerTable) -> Self {
        GraphBuilder {
            name: name.to_string(),
            names,
            initializers,
            nodes: Vec::new(),
            node_names: HashSet::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            value_info: BTreeMap::new(),
            functions: Vec::new(),
        }
    }

    /// A builder for a nested function. It shares this builder's name pool
    /// and initializer namespace and starts from a copy of its function
    /// table, so identical inner bodies deduplicate against what the parent
    /// already knows.
    pub fn child(&mut self, name: &str) -> GraphBuilder<'_> {
        let functions = self.functions.clone();
        let mut child = GraphBuilder::new(name, &mut *self.names, &mut *self.initializers);
        child.functions = functions;
        child
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_name(&mut self, base: &str) -> String {
        self.names.fresh(base)
    }

    pub fn unique_instance_name(&mut self, base: &str) -> String {
        self.names.instance(base)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn initializers(&self) -> &InitializerTable {
        self.initializers
    }

    pub fn is_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|i| i == name)
    }

    pub fn is_initializer(&self, name: &str) -> bool {
        self.initializers.contains(name)
    }

    pub fn value_info(&self, name: &str) -> Option<&ValueInfo> {
        self.value_info.get(name)
    }

    pub fn add_input(&mut self, name: &str, shape: Vec<ShapeDim>, dtype: DType) -> Result<()> {
        self.names.reserve(name);
        self.inputs.push(name.to_string());
        self.register_value_info(name, shape, dtype, Provenance::Original)
    }

    pub fn add_output(&mut self, name: &str) {
        self.outputs.push(name.to_string());
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if !self.node_names.insert(node.name.clone()) {
            return Err(LoweringError::duplicate("node", &node.name));
        }
        self.names.reserve(&node.name);
        for output in &node.outputs {
            self.names.reserve(output);
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn add_initializer(&mut self, name: &str, tensor: Tensor) -> Result<()> {
        self.names.reserve(name);
        self.initializers.add(name, tensor)
    }

    /// Register `tensor` under a fresh name derived from `base`, or return the
    /// name it is already registered under at any level.
    pub fn add_constant(&mut self, base: &str, tensor: Tensor) -> Result<String> {
        if let Some(existing) = self.initializers.find(&tensor) {
            return Ok(existing.to_string());
        }
        let name = self.names.fresh(base);
        self.initializers.add(&name, tensor)?;
        Ok(name)
    }

    /// Insert or update the record for `name`, following the provenance
    /// rules in `reconcile`. Reportable disagreements are logged; a
    /// disagreement without a safe resolution is an error.
    pub fn register_value_info(
        &mut self,
        name: &str,
        shape: Vec<ShapeDim>,
        dtype: DType,
        provenance: Provenance,
    ) -> Result<()> {
        match reconcile(self.value_info.get(name), &shape, dtype, provenance) {
            Reconciled::Insert | Reconciled::Upgrade => {
                self.value_info.insert(name.to_string(), ValueInfo::new(name, shape, dtype, provenance));
            }
            Reconciled::Keep => {}
            Reconciled::KeepReported(detail) => {
                warn!("{}: keeping pinned record for '{}' ({})", self.name, name, detail);
            }
            Reconciled::UpgradeReported(detail) => {
                warn!("{}: replacing record for '{}' ({})", self.name, name, detail);
                self.value_info.insert(name.to_string(), ValueInfo::new(name, shape, dtype, provenance));
            }
            Reconciled::Conflict(detail) => return Err(LoweringError::conflict(name, detail)),
        }
        Ok(())
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Name of an already registered function with the same body, if any.
    pub fn function_with_body(&self, candidate: &Function) -> Option<&str> {
        self.functions.iter().find(|f| f.same_body(candidate)).map(|f| f.name.as_str())
    }

    /// Freeze `sub` into a function called `name` with `param_input_names` as
    /// trailing inputs and register it. Returns the name call nodes must use.
    pub fn add_function(&mut self, name: &str, sub: &FrozenGraph, param_input_names: &[String]) -> Result<String> {
        let function = sub.to_function(name, param_input_names, self.initializers)?;
        self.register_function(function)
    }

    /// Register a frozen function once per name. An identical body under an
    /// existing name is deduplicated; a different body is a collision.
    pub fn register_function(&mut self, function: Function) -> Result<String> {
        if let Some(existing) = self.function(&function.name) {
            if existing.same_body(&function) {
                return Ok(function.name);
            }
            return Err(LoweringError::duplicate("function", &function.name));
        }
        self.names.reserve(&function.name);
        let name = function.name.clone();
        debug!("{}: registered function {} ({} nodes)", self.name, name, function.nodes.len());
        self.functions.push(function);
        Ok(name)
    }

    /// Bring functions discovered one level down into this builder without
    /// re-adding names already present.
    pub fn merge_functions(&mut self, functions: Vec<Function>) -> Result<()> {
        for function in functions {
            match self.function(&function.name) {
                Some(existing) if existing.same_body(&function) => {}
                Some(_) => return Err(LoweringError::duplicate("function", &function.name)),
                None => {
                    debug!("{}: propagated nested function {}", self.name, function.name);
                    self.functions.push(function);
                }
            }
        }
        Ok(())
    }

    /// Add a node invoking a registered function. Call inputs are the data
    /// inputs followed by the captured parameter inputs.
    pub fn add_function_call_node(
        &mut self,
        function_name: &str,
        data_inputs: &[String],
        param_inputs: &[String],
        outputs: &[String],
        node_name: &str,
        display_name: &str,
    ) -> Result<()> {
        let expected = self
            .function(function_name)
            .map(|f| f.inputs.len())
            .ok_or_else(|| {
                LoweringError::new(
                    ErrorKind::UnknownOperation,
                    format!("call target '{}' is not a registered function", function_name),
                )
                .issued_by("graph_builder")
            })?;
        let mut inputs = data_inputs.to_vec();
        inputs.extend_from_slice(param_inputs);
        if inputs.len() != expected {
            return Err(LoweringError::conflict(
                node_name,
                format!("call passes {} inputs, '{}' declares {}", inputs.len(), function_name, expected),
            ));
        }
        let mut node = Node::new(function_name, node_name, inputs, outputs.to_vec());
        node.domain = FUNCTION_DOMAIN.to_string();
        node.display_name = Some(display_name.to_string());
        self.add_node(node)
    }

    /// Consume a child builder into owned data for merging into its parent.
    pub fn freeze(self) -> FrozenGraph {
        FrozenGraph {
            name: self.name,
            inputs: self.inputs,
            outputs: self.outputs,
            nodes: self.nodes,
            value_info: self.value_info,
            functions: self.functions,
        }
    }

    /// Produce the complete top-level model. Dead constants are still present
    /// here; `opt::prune_unused_initializers` removes them.
    pub fn finalize(self, model_name: &str, opset: u32) -> Result<Model> {
        let mut value_info = self.value_info;
        let mut declared = |name: &String| {
            value_info
                .remove(name)
                .ok_or_else(|| LoweringError::unresolved_output(name, "graph output has no record"))
        };
        let inputs = self.inputs.iter().map(&mut declared).collect::<Result<Vec<_>>>()?;
        let outputs = self.outputs.iter().map(&mut declared).collect::<Result<Vec<_>>>()?;
        let initializers = std::mem::take(self.initializers).into_vec();
        let graph = Graph {
            name: model_name.to_string(),
            inputs,
            outputs,
            nodes: self.nodes,
            initializers,
            value_info: value_info.into_values().collect(),
        };
        Ok(Model { producer: PRODUCER.to_string(), opset, graph, functions: self.functions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn ones(n: u64) -> Tensor {
        Tensor::ones(&[n], DType::F32)
    }

    #[test]
    fn initializer_names_hold_one_payload() {
        let mut table = InitializerTable::new();
        table.add("w", ones(3)).unwrap();
        table.add("w", ones(3)).unwrap();
        assert_eq!(table.len(), 1);
        let err = table.add("w", ones(4)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateDeclaration);
    }

    #[test]
    fn equal_constants_share_one_name() {
        let mut names = NameGenerator::new();
        let mut initializers = InitializerTable::new();
        let mut builder = GraphBuilder::new("g", &mut names, &mut initializers);
        let a = builder.add_constant("const", ones(3)).unwrap();
        let b = {
            let mut child = builder.child("sub");
            child.add_constant("const", ones(3)).unwrap()
        };
        let c = builder.add_constant("const", ones(5)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(builder.initializers().len(), 2);
    }

    #[test]
    fn duplicate_node_names_are_rejected() {
        let mut names = NameGenerator::new();
        let mut initializers = InitializerTable::new();
        let mut builder = GraphBuilder::new("g", &mut names, &mut initializers);
        builder.add_node(Node::new("Add", "n", vec!["x".into()], vec!["y".into()])).unwrap();
        let err = builder.add_node(Node::new("Mul", "n", vec!["x".into()], vec!["z".into()])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateDeclaration);
        assert_eq!(builder.nodes().len(), 1);
    }

    #[test]
    fn function_outputs_need_records() {
        let mut names = NameGenerator::new();
        let mut initializers = InitializerTable::new();
        let mut builder = GraphBuilder::new("g", &mut names, &mut initializers);
        let sub = {
            let mut child = builder.child("sub");
            child.add_input("x", vec![ShapeDim::Fixed(2)], DType::F32).unwrap();
            child.add_node(Node::new("Neg", "Neg_0", vec!["x".into()], vec!["y".into()])).unwrap();
            child.add_output("y");
            child.freeze()
        };
        let err = builder.add_function("Sub_fn", &sub, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnresolvedOutputMetadata);
        assert!(builder.functions().is_empty());
    }

    #[test]
    fn captured_names_sort_numerically() {
        let mut initializers = InitializerTable::new();
        for (i, name) in ["const_10", "const_9", "const_2"].iter().enumerate() {
            initializers.add(name, ones(i as u64 + 1)).unwrap();
        }
        let graph = FrozenGraph {
            name: "g".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            nodes: vec![Node::new(
                "Sum",
                "Sum_0",
                vec!["const_10".into(), "const_2".into(), "const_9".into()],
                vec!["s".into()],
            )],
            value_info: BTreeMap::new(),
            functions: Vec::new(),
        };
        assert_eq!(graph.referenced_initializers(&initializers), vec!["const_2", "const_9", "const_10"]);
    }
}
