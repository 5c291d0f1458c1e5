// Diagnostic reports over finished models.
// The constant report lists where every constant of a model ends up and how
// each function call receives its inputs. It is read-only and never affects
// conversion.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use log::info;
use serde::{Deserialize, Serialize};

use crate::ir::model::Model;
use crate::ir::value_info::format_shape;

/// How a function-call input is fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    /// A declared input of the top-level graph
    GraphInput,
    /// A named constant of the model
    Initializer,
    /// The output of another node
    Intermediate,
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InputSource::GraphInput => "graph input",
            InputSource::Initializer => "initializer",
            InputSource::Intermediate => "intermediate",
        };
        write!(f, "{}", text)
    }
}

/// One input of a function-call node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInput {
    pub name: String,
    pub source: InputSource,
}

/// Inputs of one function-call node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallReport {
    /// Name of the call node
    pub node: String,
    /// Function the node invokes
    pub function: String,
    pub inputs: Vec<CallInput>,
}

/// Shape summary of one initializer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantEntry {
    pub name: String,
    pub dtype: String,
    pub dims: Vec<u64>,
}

/// Structural summary of the constants of a model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantReport {
    /// Top-level inputs, rendered as `name: dtype[dims]`
    pub inputs: Vec<String>,
    pub initializers: Vec<ConstantEntry>,
    pub calls: Vec<CallReport>,
    /// Initializer name -> op types of the top-level nodes reading it
    pub usage: BTreeMap<String, Vec<String>>,
}

impl ConstantReport {
    /// Number of call inputs fed directly by initializers
    pub fn initializer_fed_inputs(&self) -> usize {
        self.calls
            .iter()
            .flat_map(|c| c.inputs.iter())
            .filter(|i| i.source == InputSource::Initializer)
            .count()
    }
}

/// Analyze how constants flow into the top-level graph of `model`.
pub fn analyze_constants(model: &Model) -> ConstantReport {
    let graph = &model.graph;
    let inputs: HashSet<&str> = graph.inputs.iter().map(|i| i.name.as_str()).collect();
    let constants: HashSet<&str> = graph.initializers.iter().map(|i| i.name.as_str()).collect();
    let classify = |name: &str| {
        if inputs.contains(name) {
            InputSource::GraphInput
        } else if constants.contains(name) {
            InputSource::Initializer
        } else {
            InputSource::Intermediate
        }
    };

    let mut report = ConstantReport {
        inputs: graph
            .inputs
            .iter()
            .map(|i| format!("{}: {}{}", i.name, i.dtype, format_shape(&i.shape)))
            .collect(),
        initializers: graph
            .initializers
            .iter()
            .map(|i| ConstantEntry { name: i.name.clone(), dtype: i.tensor.dtype.to_string(), dims: i.tensor.dims.clone() })
            .collect(),
        ..ConstantReport::default()
    };

    for node in &graph.nodes {
        for input in &node.inputs {
            if constants.contains(input.as_str()) {
                report.usage.entry(input.clone()).or_default().push(node.op_type.clone());
            }
        }
        if node.is_function_call() {
            report.calls.push(CallReport {
                node: node.name.clone(),
                function: node.op_type.clone(),
                inputs: node
                    .inputs
                    .iter()
                    .map(|name| CallInput { name: name.clone(), source: classify(name) })
                    .collect(),
            });
        }
    }

    info!(
        "constant report: {} inputs, {} initializers, {} calls",
        report.inputs.len(),
        report.initializers.len(),
        report.calls.len()
    );
    report
}

impl fmt::Display for ConstantReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Inputs:")?;
        for input in &self.inputs {
            writeln!(f, "  {}", input)?;
        }
        writeln!(f, "Initializers:")?;
        for init in &self.initializers {
            let dims: Vec<String> = init.dims.iter().map(|d| d.to_string()).collect();
            writeln!(f, "  {}: {}[{}]", init.name, init.dtype, dims.join(","))?;
        }
        for call in &self.calls {
            writeln!(f, "Call {} -> {}:", call.node, call.function)?;
            for input in &call.inputs {
                writeln!(f, "  {} ({})", input.name, input.source)?;
            }
        }
        if !self.usage.is_empty() {
            writeln!(f, "Constant usage:")?;
            for (name, ops) in &self.usage {
                writeln!(f, "  {} used by {}", name, ops.join(", "))?;
            }
        }
        Ok(())
    }
}
