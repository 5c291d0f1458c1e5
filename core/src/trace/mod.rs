//! file: core/src/trace/mod.rs
//! description: the source IR consumed by lowering.
//!
//! A traced program is a `ClosedTrace`: input variables, constant variables
//! bound to concrete tensors, a sequence of `Equation`s and the output atoms.
//! Variables carry an `AbstractValue` (shape + dtype) whose dimensions may be
//! symbolic. The `Tracer` trait is the seam to the tracing engine; the
//! `recording` submodule provides the reference engine.

pub mod recording;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::ir::tensor::{DType, Tensor};

pub use self::recording::{RecordingTracer, TraceBuilder};

/// Params key under which a call equation carries its callee.
pub const CALLABLE_PARAM: &str = "callable";
/// Primitive identifier of a sub-program call.
pub const CALL_PRIMITIVE: &str = "call";

/// Identity of one symbolic dimension. Two dims are the same unknown length
/// exactly when their ids are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Known(u64),
    Symbolic(SymbolId),
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Known(n) => write!(f, "{}", n),
            Dim::Symbolic(s) => write!(f, "s{}", s.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AbstractValue {
    pub shape: Vec<Dim>,
    pub dtype: DType,
}

impl AbstractValue {
    pub fn new(shape: Vec<Dim>, dtype: DType) -> Self {
        AbstractValue { shape, dtype }
    }

    pub fn known(dims: &[u64], dtype: DType) -> Self {
        AbstractValue { shape: dims.iter().map(|d| Dim::Known(*d)).collect(), dtype }
    }

    pub fn scalar(dtype: DType) -> Self {
        AbstractValue { shape: Vec::new(), dtype }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Concrete dims, or `None` when any dim is symbolic.
    pub fn known_dims(&self) -> Option<Vec<u64>> {
        self.shape
            .iter()
            .map(|d| match d {
                Dim::Known(n) => Some(*n),
                Dim::Symbolic(_) => None,
            })
            .collect()
    }
}

impl fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        write!(f, "{}[{}]", self.dtype, dims.join(","))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Var {
    pub id: VarId,
    pub aval: AbstractValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Literal {
    pub value: Tensor,
}

impl Literal {
    pub fn scalar(dtype: DType, value: f64) -> Self {
        Literal { value: Tensor::scalar(dtype, value) }
    }

    pub fn aval(&self) -> AbstractValue {
        AbstractValue::known(&self.value.dims, self.value.dtype)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Atom {
    Var(Var),
    Literal(Literal),
}

impl Atom {
    pub fn aval(&self) -> AbstractValue {
        match self {
            Atom::Var(v) => v.aval.clone(),
            Atom::Literal(l) => l.aval(),
        }
    }
}

impl From<Var> for Atom {
    fn from(v: Var) -> Self {
        Atom::Var(v)
    }
}

impl From<&Var> for Atom {
    fn from(v: &Var) -> Self {
        Atom::Var(v.clone())
    }
}

impl From<Literal> for Atom {
    fn from(l: Literal) -> Self {
        Atom::Literal(l)
    }
}

/// Body of a traceable callable: receives the builder and its input
/// variables, returns the output atoms.
pub type TraceFn = dyn Fn(&mut TraceBuilder<'_>, &[Var]) -> Result<Vec<Atom>> + Send + Sync;

/// A separately traceable sub-program, identified by its qualified name.
pub struct Callable {
    qualified_name: String,
    body: Arc<TraceFn>,
}

pub type CallableRef = Arc<Callable>;

impl Callable {
    pub fn new<F>(qualified_name: &str, body: F) -> CallableRef
    where
        F: Fn(&mut TraceBuilder<'_>, &[Var]) -> Result<Vec<Atom>> + Send + Sync + 'static,
    {
        Arc::new(Callable { qualified_name: qualified_name.to_string(), body: Arc::new(body) })
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Last path component of the qualified name (`blocks.Attention` -> `Attention`).
    pub fn base_name(&self) -> &str {
        self.qualified_name
            .rsplit(['.', ':'])
            .find(|s| !s.is_empty())
            .unwrap_or(&self.qualified_name)
    }

    pub(crate) fn body(&self) -> &TraceFn {
        self.body.as_ref()
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({})", self.qualified_name)
    }
}

#[derive(Debug, Clone)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Ints(Vec<i64>),
    Callable(CallableRef),
}

pub type Params = BTreeMap<String, ParamValue>;

#[derive(Debug, Clone)]
pub struct Equation {
    pub primitive: String,
    pub inputs: Vec<Atom>,
    pub outputs: Vec<Var>,
    pub params: Params,
}

impl Equation {
    /// The sub-program this equation invokes, if it is a higher-order call.
    pub fn callee(&self) -> Option<&CallableRef> {
        match self.params.get(CALLABLE_PARAM) {
            Some(ParamValue::Callable(c)) => Some(c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClosedTrace {
    pub inputs: Vec<Var>,
    pub constants: Vec<(Var, Tensor)>,
    pub equations: Vec<Equation>,
    pub outputs: Vec<Atom>,
}

/// One argument handed to the tracer: an abstract descriptor, a stand-in
/// example array, or a literal passed through unchanged.
#[derive(Debug, Clone)]
pub enum TraceArg {
    Abstract(AbstractValue),
    Example(ExampleArray),
    Literal(Literal),
}

impl TraceArg {
    pub fn aval(&self) -> AbstractValue {
        match self {
            TraceArg::Abstract(aval) => aval.clone(),
            TraceArg::Example(example) => AbstractValue::known(&example.dims, example.dtype),
            TraceArg::Literal(l) => l.aval(),
        }
    }
}

/// A constant-filled array of known shape. Only its description travels;
/// a tracer that needs the values calls `materialize`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExampleArray {
    pub dims: Vec<u64>,
    pub dtype: DType,
    pub fill: f64,
}

impl ExampleArray {
    pub fn ones(dims: &[u64], dtype: DType) -> Self {
        ExampleArray { dims: dims.to_vec(), dtype, fill: 1.0 }
    }

    pub fn zeros(dims: &[u64], dtype: DType) -> Self {
        ExampleArray { dims: dims.to_vec(), dtype, fill: 0.0 }
    }

    pub fn materialize(&self) -> Result<Tensor> {
        Tensor::try_filled(&self.dims, self.dtype, self.fill)
    }
}

pub trait Tracer {
    /// Trace `callable` on `args`, forwarding `params` to its body.
    fn trace(&self, callable: &Callable, args: &[TraceArg], params: &Params) -> Result<ClosedTrace>;
}
