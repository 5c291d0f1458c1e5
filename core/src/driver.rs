//! file: core/src/driver.rs
//! description: top-level conversion entry points and their options.
//!
//! The driver owns everything shared across graph levels of one
//! conversion (name pool, initializer table, symbol table) and lends it to
//! the top-level builder, which lends it on to nested ones.

use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{LoweringError, Result};
use crate::ir::lower::{
    ConversionContext, DimSpec, GraphBuilder, InitializerTable, InputSpec, LoweringEnv, NameGenerator,
    abstract_inputs,
};
use crate::ir::model::Model;
use crate::ir::opt::{DeadNodeElimination, ModelOptimizer, NoopOptimizer, prune_unused_initializers};
use crate::ir::tensor::DType;
use crate::plugins::{PrimitiveRegistry, builtin_registry};
use crate::trace::recording::RecordingTracer;
use crate::trace::{Callable, ParamValue, Params, TraceArg, Tracer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionOptions {
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_opset")]
    pub opset: u32,
    #[serde(default)]
    pub default_dtype: DType,
    /// Named parameters forwarded to the traced program. Numbers, booleans,
    /// strings and integer arrays are accepted.
    #[serde(default)]
    pub input_params: serde_json::Map<String, Json>,
    #[serde(default = "default_optimize")]
    pub optimize: bool,
}

fn default_model_name() -> String {
    "model".to_string()
}

fn default_opset() -> u32 {
    21
}

fn default_optimize() -> bool {
    true
}

impl Default for ConversionOptions {
    fn default() -> Self {
        ConversionOptions {
            model_name: default_model_name(),
            opset: default_opset(),
            default_dtype: DType::default(),
            input_params: serde_json::Map::new(),
            optimize: default_optimize(),
        }
    }
}

impl ConversionOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> std::result::Result<ConversionOptions, String> {
        let raw = std::fs::read_to_string(&path).map_err(|e| format!("read options: {}", e))?;
        serde_json::from_str(&raw).map_err(|e| format!("parse options: {}", e))
    }

    /// `input_params` as trace parameters.
    pub fn params(&self) -> Result<Params> {
        let mut params = Params::new();
        for (key, value) in &self.input_params {
            let converted = match value {
                Json::Bool(b) => ParamValue::Bool(*b),
                Json::String(s) => ParamValue::Str(s.clone()),
                Json::Number(n) => match n.as_i64() {
                    Some(i) => ParamValue::Int(i),
                    None => ParamValue::Float(n.as_f64().unwrap_or(f64::NAN)),
                },
                Json::Array(items) => ParamValue::Ints(
                    items
                        .iter()
                        .map(|item| {
                            item.as_i64().ok_or_else(|| {
                                LoweringError::malformed_spec(format!("param '{}': arrays must hold integers", key))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?,
                ),
                other => {
                    return Err(LoweringError::malformed_spec(format!(
                        "param '{}': unsupported value {}",
                        key, other
                    )));
                }
            };
            params.insert(key.clone(), converted);
        }
        Ok(params)
    }
}

/// Conversion pipeline over explicit collaborators.
pub struct Driver<'d> {
    registry: &'d PrimitiveRegistry,
    tracer: &'d dyn Tracer,
    optimizer: &'d dyn ModelOptimizer,
}

impl<'d> Driver<'d> {
    pub fn new(registry: &'d PrimitiveRegistry, tracer: &'d dyn Tracer, optimizer: &'d dyn ModelOptimizer) -> Self {
        Driver { registry, tracer, optimizer }
    }

    /// Convert `callable` traced on `inputs` into a finished model.
    pub fn convert(&self, callable: &Callable, inputs: &[InputSpec], options: &ConversionOptions) -> Result<Model> {
        info!("Converting {} to model '{}'", callable.qualified_name(), options.model_name);
        let params = options.params()?;
        let (avals, symbols) = abstract_inputs(inputs);
        if !symbols.is_empty() {
            debug!("{} symbolic dim(s) declared", symbols.len());
        }

        info!("Tracing {}", callable.qualified_name());
        let args: Vec<TraceArg> = avals.into_iter().map(TraceArg::Abstract).collect();
        let trace = self.tracer.trace(callable, &args, &params)?;

        info!("Building graph ({} equations)", trace.equations.len());
        let mut names = NameGenerator::new();
        let mut initializers = InitializerTable::new();
        let env = LoweringEnv { registry: self.registry, tracer: self.tracer, symbols: &symbols, params: &params };
        let builder = GraphBuilder::new(&options.model_name, &mut names, &mut initializers);
        let mut ctx = ConversionContext::new(builder, env);
        ctx.lower_trace(&trace)?;
        ctx.resolve_output_metadata()?;
        let mut model = ctx.into_builder().finalize(&options.model_name, options.opset)?;

        let pruned = prune_unused_initializers(&mut model);
        if pruned > 0 {
            debug!("removed {} unused initializer(s)", pruned);
        }
        if options.optimize {
            info!("Optimizing with {}", self.optimizer.name());
            model = self.optimizer.optimize(model)?;
        }
        info!(
            "Done: {} nodes, {} initializers, {} functions",
            model.graph.nodes.len(),
            model.graph.initializers.len(),
            model.functions.len()
        );
        Ok(model)
    }
}

/// Convert with the built-in handlers and the recording tracer. Each shape
/// is typed with `options.default_dtype`.
pub fn to_model(callable: &Callable, shapes: &[Vec<DimSpec>], options: &ConversionOptions) -> Result<Model> {
    let inputs: Vec<InputSpec> = shapes.iter().map(|s| InputSpec::new(s.clone(), options.default_dtype)).collect();
    let registry = builtin_registry()?;
    let tracer = RecordingTracer::new();
    if options.optimize {
        Driver::new(registry, &tracer, &DeadNodeElimination).convert(callable, &inputs, options)
    } else {
        Driver::new(registry, &tracer, &NoopOptimizer).convert(callable, &inputs, options)
    }
}

/// `to_model` for shape specs given as JSON, e.g. `[["B", 4], "B"]`. A bare
/// entry becomes a rank-1 shape.
pub fn to_model_json(callable: &Callable, shapes: &Json, options: &ConversionOptions) -> Result<Model> {
    let entries = shapes
        .as_array()
        .ok_or_else(|| LoweringError::malformed_spec(format!("expected a list of shapes, got {}", shapes)))?;
    let specs = entries
        .iter()
        .map(|entry| InputSpec::from_json(entry, options.default_dtype).map(|spec| spec.shape))
        .collect::<Result<Vec<_>>>()?;
    to_model(callable, &specs, options)
}
