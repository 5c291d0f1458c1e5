//! file: core/src/trace/recording.rs
//! description: reference tracing engine.
//!
//! `RecordingTracer` runs a callable's body against a `TraceBuilder`, which
//! records every primitive application as an `Equation` and computes output
//! abstract values for the elementwise primitives it knows about. Calls to
//! other callables are recorded as a single `call` equation; the callee is
//! traced once on the spot only to learn its output abstract values.

use std::cell::Cell;
use std::collections::HashSet;

use log::debug;

use crate::error::{LoweringError, Result};
use crate::ir::tensor::{DType, Tensor};
use crate::trace::{
    AbstractValue, Atom, CALL_PRIMITIVE, CALLABLE_PARAM, Callable, CallableRef, ClosedTrace, Dim,
    Equation, Literal, ParamValue, Params, TraceArg, Tracer, Var, VarId,
};

/// Tracer that records equations emitted by Rust closures.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    invocations: Cell<usize>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        RecordingTracer { invocations: Cell::new(0) }
    }

    /// Number of times `trace` has been called on this tracer.
    pub fn invocations(&self) -> usize {
        self.invocations.get()
    }
}

impl Tracer for RecordingTracer {
    fn trace(&self, callable: &Callable, args: &[TraceArg], params: &Params) -> Result<ClosedTrace> {
        self.invocations.set(self.invocations.get() + 1);
        debug!("tracing {} on {} argument(s)", callable.qualified_name(), args.len());
        let avals: Vec<AbstractValue> = args.iter().map(|a| a.aval()).collect();
        record(callable, &avals, params)
    }
}

fn record(callable: &Callable, avals: &[AbstractValue], params: &Params) -> Result<ClosedTrace> {
    let mut builder = TraceBuilder::new(params);
    let inputs: Vec<Var> = avals.iter().map(|aval| builder.fresh_var(aval.clone())).collect();
    let outputs = (callable.body())(&mut builder, &inputs)?;
    builder.finish(inputs, outputs, callable.qualified_name())
}

pub struct TraceBuilder<'p> {
    next_var: usize,
    params: &'p Params,
    constants: Vec<(Var, Tensor)>,
    equations: Vec<Equation>,
}

impl<'p> TraceBuilder<'p> {
    pub fn new(params: &'p Params) -> Self {
        TraceBuilder { next_var: 0, params, constants: Vec::new(), equations: Vec::new() }
    }

    /// Named parameters forwarded by the caller of the trace.
    pub fn params(&self) -> &Params {
        self.params
    }

    fn fresh_var(&mut self, aval: AbstractValue) -> Var {
        let id = VarId(self.next_var);
        self.next_var += 1;
        Var { id, aval }
    }

    /// A constant captured by the traced program, e.g. a weight.
    pub fn constant(&mut self, value: Tensor) -> Var {
        let var = self.fresh_var(AbstractValue::known(&value.dims, value.dtype));
        self.constants.push((var.clone(), value));
        var
    }

    /// An immediate scalar operand.
    pub fn literal(&self, dtype: DType, value: f64) -> Atom {
        Atom::Literal(Literal::scalar(dtype, value))
    }

    /// Record one primitive application with explicitly given output types.
    pub fn bind(
        &mut self,
        primitive: &str,
        inputs: Vec<Atom>,
        out_avals: Vec<AbstractValue>,
        params: Params,
    ) -> Vec<Var> {
        let outputs: Vec<Var> = out_avals.into_iter().map(|aval| self.fresh_var(aval)).collect();
        self.equations.push(Equation {
            primitive: primitive.to_string(),
            inputs,
            outputs: outputs.clone(),
            params,
        });
        outputs
    }

    /// Record a binary elementwise primitive with numpy-style broadcasting.
    pub fn elementwise(&mut self, primitive: &str, lhs: impl Into<Atom>, rhs: impl Into<Atom>) -> Result<Var> {
        let (lhs, rhs) = (lhs.into(), rhs.into());
        let (la, ra) = (lhs.aval(), rhs.aval());
        let shape = broadcast_shapes(&la.shape, &ra.shape).ok_or_else(|| {
            LoweringError::trace(format!("{}: cannot broadcast {} with {}", primitive, la, ra))
        })?;
        let out = AbstractValue::new(shape, la.dtype);
        let mut outputs = self.bind(primitive, vec![lhs, rhs], vec![out], Params::new());
        outputs.pop().ok_or_else(|| LoweringError::trace(format!("{}: no output recorded", primitive)))
    }

    pub fn pow(&mut self, base: impl Into<Atom>, exponent: impl Into<Atom>) -> Result<Var> {
        self.elementwise("pow", base, exponent)
    }

    pub fn add(&mut self, lhs: impl Into<Atom>, rhs: impl Into<Atom>) -> Result<Var> {
        self.elementwise("add", lhs, rhs)
    }

    pub fn mul(&mut self, lhs: impl Into<Atom>, rhs: impl Into<Atom>) -> Result<Var> {
        self.elementwise("mul", lhs, rhs)
    }

    /// Record a call to another callable as one `call` equation.
    pub fn call(&mut self, callee: &CallableRef, args: &[Atom]) -> Result<Vec<Var>> {
        let avals: Vec<AbstractValue> = args.iter().map(|a| a.aval()).collect();
        let inner = record(callee, &avals, self.params)?;
        let out_avals = inner.outputs.iter().map(|o| o.aval()).collect();
        let mut params = Params::new();
        params.insert(CALLABLE_PARAM.to_string(), ParamValue::Callable(callee.clone()));
        params.insert("name".to_string(), ParamValue::Str(callee.qualified_name().to_string()));
        Ok(self.bind(CALL_PRIMITIVE, args.to_vec(), out_avals, params))
    }

    fn finish(self, inputs: Vec<Var>, outputs: Vec<Atom>, name: &str) -> Result<ClosedTrace> {
        let mut defined: HashSet<VarId> = inputs.iter().map(|v| v.id).collect();
        defined.extend(self.constants.iter().map(|(v, _)| v.id));
        defined.extend(self.equations.iter().flat_map(|e| e.outputs.iter().map(|v| v.id)));
        for out in &outputs {
            if let Atom::Var(v) = out {
                if !defined.contains(&v.id) {
                    return Err(LoweringError::trace(format!(
                        "{} returned variable #{} that was not created by its own trace",
                        name, v.id.0
                    )));
                }
            }
        }
        Ok(ClosedTrace { inputs, constants: self.constants, equations: self.equations, outputs })
    }
}

/// Right-aligned broadcast of two shapes. Symbolic dims only match
/// themselves or a known 1.
pub fn broadcast_shapes(lhs: &[Dim], rhs: &[Dim]) -> Option<Vec<Dim>> {
    let rank = lhs.len().max(rhs.len());
    let mut out = Vec::with_capacity(rank);
    for i in 0..rank {
        let l = if i + lhs.len() >= rank { Some(lhs[i + lhs.len() - rank]) } else { None };
        let r = if i + rhs.len() >= rank { Some(rhs[i + rhs.len() - rank]) } else { None };
        let dim = match (l, r) {
            (Some(a), None) | (None, Some(a)) => a,
            (Some(a), Some(b)) if a == b => a,
            (Some(Dim::Known(1)), Some(b)) => b,
            (Some(a), Some(Dim::Known(1))) => a,
            _ => return None,
        };
        out.push(dim);
    }
    Some(out)
}
