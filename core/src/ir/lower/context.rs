//! file: core/src/ir/lower/context.rs
//! description: one traversal of a traced program into one graph level.
//!
//! `ConversionContext` owns the `GraphBuilder` of its level and the map from
//! source variables to tensor names. Each equation is handed to its
//! registered handler, or to the nested-function lowering when it calls a
//! sub-program. Output metadata of the level is resolved afterwards by
//! `resolve_output_metadata`.

use std::collections::HashMap;

use log::{debug, warn};

use crate::error::{LoweringError, Result};
use crate::ir::lower::graph_builder::{FrozenGraph, GraphBuilder};
use crate::ir::lower::symbols::SymbolTable;
use crate::ir::model::Node;
use crate::ir::value_info::{Provenance, ShapeDim, ValueInfo, format_shape};
use crate::plugins::PrimitiveRegistry;
use crate::site::Site;
use crate::trace::{AbstractValue, Atom, ClosedTrace, Equation, Params, Tracer, Var, VarId};

/// Read-only collaborators shared by every level of one conversion.
#[derive(Clone, Copy)]
pub struct LoweringEnv<'e> {
    pub registry: &'e PrimitiveRegistry,
    pub tracer: &'e dyn Tracer,
    pub symbols: &'e SymbolTable,
    pub params: &'e Params,
}

pub struct ConversionContext<'a, 'e> {
    pub(super) builder: GraphBuilder<'a>,
    pub(super) env: LoweringEnv<'e>,
    pub(super) site: Site,
    vars: HashMap<VarId, String>,
    /// Name bound to each output atom before any renaming, with its type.
    output_sources: Vec<(String, AbstractValue)>,
}

impl<'a, 'e> ConversionContext<'a, 'e> {
    pub fn new(builder: GraphBuilder<'a>, env: LoweringEnv<'e>) -> Self {
        Self::nested(builder, env, Site::default())
    }

    pub(super) fn nested(builder: GraphBuilder<'a>, env: LoweringEnv<'e>, site: Site) -> Self {
        ConversionContext { builder, env, site, vars: HashMap::new(), output_sources: Vec::new() }
    }

    pub fn builder(&self) -> &GraphBuilder<'a> {
        &self.builder
    }

    pub fn builder_mut(&mut self) -> &mut GraphBuilder<'a> {
        &mut self.builder
    }

    pub fn into_builder(self) -> GraphBuilder<'a> {
        self.builder
    }

    pub fn symbols(&self) -> &SymbolTable {
        self.env.symbols
    }

    pub fn depth(&self) -> usize {
        self.site.depth
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn unique_name(&mut self, base: &str) -> String {
        self.builder.unique_name(base)
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        self.builder.add_node(node)
    }

    /// Name bound to `var`, binding a fresh one on first use. Handlers call
    /// this for the variables they produce.
    pub fn output_name(&mut self, var: &Var) -> String {
        if let Some(name) = self.vars.get(&var.id) {
            return name.clone();
        }
        let name = self.builder.unique_name("var");
        self.vars.insert(var.id, name.clone());
        name
    }

    /// Name of an operand. Variables must already be bound; literals become
    /// a fresh constant each time they are referenced.
    pub fn input_name(&mut self, atom: &Atom) -> Result<String> {
        match atom {
            Atom::Var(var) => self.vars.get(&var.id).cloned().ok_or_else(|| {
                LoweringError::trace(format!("variable #{} is read before it is defined", var.id.0))
            }),
            Atom::Literal(lit) => self.builder.add_constant("const", lit.value.clone()),
        }
    }

    pub fn is_bound(&self, var: &Var) -> bool {
        self.vars.contains_key(&var.id)
    }

    pub fn render_shape(&self, aval: &AbstractValue) -> Option<Vec<ShapeDim>> {
        self.env.symbols.render_shape(aval)
    }

    /// Register `var`'s own abstract value as the record for its bound name.
    pub fn record_var(&mut self, var: &Var, provenance: Provenance) -> Result<()> {
        let name = self.output_name(var);
        match self.render_shape(&var.aval) {
            Some(shape) => self.builder.register_value_info(&name, shape, var.aval.dtype, provenance),
            None => {
                debug!("{}: '{}' has a dim outside the symbol table, no record", self.builder.name(), name);
                Ok(())
            }
        }
    }

    /// Lower a whole trace into this context's builder: inputs, captured
    /// constants, equations in order, then the declared outputs.
    pub fn lower_trace(&mut self, trace: &ClosedTrace) -> Result<()> {
        for var in &trace.inputs {
            let name = self.output_name(var);
            let shape = self.render_shape(&var.aval).ok_or_else(|| {
                LoweringError::trace(format!("input '{}' uses a symbolic dim that was never declared", name))
                    .at(self.site.clone())
            })?;
            self.builder.add_input(&name, shape, var.aval.dtype)?;
        }
        for (var, value) in &trace.constants {
            let name = self.builder.add_constant("const", value.clone())?;
            self.vars.insert(var.id, name);
        }
        for (index, eqn) in trace.equations.iter().enumerate() {
            self.lower_equation(eqn)
                .map_err(|e| e.at(self.site.clone().with_equation(index, &eqn.primitive)))?;
        }
        self.declare_outputs(&trace.outputs).map_err(|e| e.at(self.site.clone()))
    }

    fn lower_equation(&mut self, eqn: &Equation) -> Result<()> {
        if let Some(callee) = eqn.callee() {
            debug!("{}: nested call to {}", self.builder.name(), callee.qualified_name());
            self.lower_call(eqn, callee)?;
        } else {
            let registry = self.env.registry;
            let handler = registry
                .handler(&eqn.primitive)
                .ok_or_else(|| LoweringError::unknown_operation(&eqn.primitive))?;
            debug!("{}: lowering {}", self.builder.name(), eqn.primitive);
            handler.lower(self, &eqn.inputs, &eqn.outputs, &eqn.params)?;
        }
        for var in &eqn.outputs {
            if !self.is_bound(var) {
                return Err(LoweringError::handler(
                    &eqn.primitive,
                    format!("output variable #{} was never bound to a tensor", var.id.0),
                ));
            }
            self.record_var(var, Provenance::Recovered)?;
        }
        Ok(())
    }

    /// Declare the graph outputs. An output that would alias a graph input,
    /// an initializer or an earlier output is routed through an Identity node
    /// so every output is produced by a node of its own.
    fn declare_outputs(&mut self, outputs: &[Atom]) -> Result<()> {
        for atom in outputs {
            let source = self.input_name(atom)?;
            let aliased = self.builder.is_input(&source)
                || self.builder.is_initializer(&source)
                || self.builder.outputs().iter().any(|o| *o == source);
            let declared = if aliased {
                let out = self.builder.unique_name("out");
                let node_name = self.builder.unique_name("Identity");
                self.builder.add_node(Node::new("Identity", &node_name, vec![source.clone()], vec![out.clone()]))?;
                out
            } else {
                source.clone()
            };
            self.builder.add_output(&declared);
            self.output_sources.push((source, atom.aval()));
        }
        Ok(())
    }

    /// Make sure every declared output has a shape/dtype record, trying the
    /// fallbacks of `resolve_output` in order.
    pub fn resolve_output_metadata(&mut self) -> Result<()> {
        let declared: Vec<String> = self.builder.outputs().to_vec();
        for (index, name) in declared.iter().enumerate() {
            let (expected, aval) = match self.output_sources.get(index) {
                Some((expected, aval)) => (expected.as_str(), Some(aval)),
                None => (name.as_str(), None),
            };
            match resolve_output(&self.builder, self.env.symbols, name, expected, aval) {
                Resolution::Resolved(record) => {
                    self.builder
                        .register_value_info(name, record.shape, record.dtype, record.provenance)
                        .map_err(|e| e.at(self.site.clone()))?;
                }
                Resolution::Conflict(detail) => {
                    return Err(LoweringError::conflict(name, detail).at(self.site.clone()));
                }
                Resolution::Unresolvable(detail) => {
                    return Err(LoweringError::unresolved_output(name, detail).at(self.site.clone()));
                }
            }
        }
        Ok(())
    }

    /// Finish a nested level: its frozen graph, ready to become a function.
    pub(super) fn freeze(self) -> FrozenGraph {
        self.builder.freeze()
    }
}

/// Outcome of looking for an output's shape/dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(ValueInfo),
    Conflict(String),
    Unresolvable(String),
}

/// Decide the record for declared output `name`, in priority order:
/// 1. the record the builder already holds for `name`;
/// 2. the source variable's abstract value, marked `repaired`;
/// 3. the record of the name the output was bound to before renaming
///    (positional correspondence), marked `repaired`, with a warning when
///    the two names differ.
pub fn resolve_output(
    builder: &GraphBuilder<'_>,
    symbols: &SymbolTable,
    name: &str,
    expected: &str,
    aval: Option<&AbstractValue>,
) -> Resolution {
    if let Some(existing) = builder.value_info(name) {
        return Resolution::Resolved(existing.clone());
    }
    let from_aval = aval.and_then(|a| symbols.render_shape(a).map(|shape| (shape, a.dtype)));
    let positional = builder.value_info(expected);
    match (from_aval, positional) {
        (Some((shape, dtype)), Some(record)) if !record.same_type(&shape, dtype) => Resolution::Conflict(format!(
            "source variable says {}{}, positional output '{}' says {}{}",
            dtype,
            format_shape(&shape),
            expected,
            record.dtype,
            format_shape(&record.shape)
        )),
        (Some((shape, dtype)), _) => Resolution::Resolved(ValueInfo::new(name, shape, dtype, Provenance::Repaired)),
        (None, Some(record)) => {
            if expected != name {
                warn!(
                    "{}: output '{}' typed from positional output '{}' ({})",
                    builder.name(),
                    name,
                    expected,
                    record
                );
            }
            Resolution::Resolved(ValueInfo { name: name.to_string(), provenance: Provenance::Repaired, ..record.clone() })
        }
        (None, None) => Resolution::Unresolvable(format!(
            "no record, no renderable source type, no positional record under '{}'",
            expected
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ir::lower::graph_builder::InitializerTable;
    use crate::ir::lower::names::NameGenerator;
    use crate::ir::tensor::DType;
    use crate::trace::recording::RecordingTracer;
    use crate::trace::{Dim, SymbolId};

    fn shape(n: u64) -> Vec<ShapeDim> {
        vec![ShapeDim::Fixed(n)]
    }

    /// A dim no symbol table entry can render.
    fn unrenderable() -> AbstractValue {
        AbstractValue::new(vec![Dim::Symbolic(SymbolId(9))], DType::F32)
    }

    #[test]
    fn existing_record_wins() {
        let (mut names, mut inits) = (NameGenerator::new(), InitializerTable::new());
        let mut builder = GraphBuilder::new("g", &mut names, &mut inits);
        builder.register_value_info("y", shape(2), DType::F32, Provenance::Recovered).unwrap();
        let symbols = SymbolTable::new();
        let aval = AbstractValue::known(&[7], DType::F32);
        match resolve_output(&builder, &symbols, "y", "y", Some(&aval)) {
            Resolution::Resolved(record) => {
                assert_eq!(record.shape, shape(2));
                assert_eq!(record.provenance, Provenance::Recovered);
            }
            other => panic!("expected the existing record, got {:?}", other),
        }
    }

    #[test]
    fn source_type_repairs_a_missing_record() {
        let (mut names, mut inits) = (NameGenerator::new(), InitializerTable::new());
        let builder = GraphBuilder::new("g", &mut names, &mut inits);
        let symbols = SymbolTable::new();
        let aval = AbstractValue::known(&[4], DType::I64);
        let expected = ValueInfo::new("out_0", shape(4), DType::I64, Provenance::Repaired);
        assert_eq!(
            resolve_output(&builder, &symbols, "out_0", "var_3", Some(&aval)),
            Resolution::Resolved(expected)
        );
    }

    #[test]
    fn positional_record_is_the_last_fallback() {
        let (mut names, mut inits) = (NameGenerator::new(), InitializerTable::new());
        let mut builder = GraphBuilder::new("g", &mut names, &mut inits);
        builder.register_value_info("var_3", shape(5), DType::F32, Provenance::Recovered).unwrap();
        let symbols = SymbolTable::new();
        match resolve_output(&builder, &symbols, "out_0", "var_3", Some(&unrenderable())) {
            Resolution::Resolved(record) => {
                assert_eq!(record.name, "out_0");
                assert_eq!(record.shape, shape(5));
                assert_eq!(record.provenance, Provenance::Repaired);
            }
            other => panic!("expected the positional record, got {:?}", other),
        }
    }

    #[test]
    fn source_and_positional_disagreeing_is_a_conflict() {
        let (mut names, mut inits) = (NameGenerator::new(), InitializerTable::new());
        let mut builder = GraphBuilder::new("g", &mut names, &mut inits);
        builder.register_value_info("var_3", shape(5), DType::F32, Provenance::Recovered).unwrap();
        let symbols = SymbolTable::new();
        let aval = AbstractValue::known(&[6], DType::F32);
        assert!(matches!(
            resolve_output(&builder, &symbols, "out_0", "var_3", Some(&aval)),
            Resolution::Conflict(_)
        ));
    }

    #[test]
    fn output_without_any_source_is_unresolved() {
        let (mut names, mut inits) = (NameGenerator::new(), InitializerTable::new());
        let builder = GraphBuilder::new("g", &mut names, &mut inits);
        let symbols = SymbolTable::new();
        assert!(matches!(
            resolve_output(&builder, &symbols, "out_0", "var_3", Some(&unrenderable())),
            Resolution::Unresolvable(_)
        ));

        let registry = PrimitiveRegistry::new();
        let tracer = RecordingTracer::new();
        let params = Params::new();
        let env = LoweringEnv { registry: &registry, tracer: &tracer, symbols: &symbols, params: &params };
        let mut ctx = ConversionContext::new(builder, env);
        ctx.builder_mut().add_output("dangling");
        let err = ctx.resolve_output_metadata().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnresolvedOutputMetadata);
        assert!(err.to_string().contains("dangling"), "{}", err);
    }
}
