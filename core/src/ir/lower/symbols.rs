//! file: core/src/ir/lower/symbols.rs
//! description: input shape specs and the symbolic dimension table.
//!
//! Users declare inputs as shape specs whose entries are either concrete
//! lengths or symbol names. `abstract_inputs` turns them into abstract values
//! for the tracer, handing out one `SymbolId` per distinct name, and returns
//! the `SymbolTable` used later to render dims back into target shapes.

use serde_json::Value as Json;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{LoweringError, Result};
use crate::ir::tensor::DType;
use crate::ir::value_info::ShapeDim;
use crate::trace::{AbstractValue, Dim, SymbolId};

/// One entry of a declared shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DimSpec {
    Fixed(u64),
    Symbol(String),
}

impl From<u64> for DimSpec {
    fn from(n: u64) -> Self {
        DimSpec::Fixed(n)
    }
}

impl From<&str> for DimSpec {
    fn from(s: &str) -> Self {
        DimSpec::Symbol(s.to_string())
    }
}

impl fmt::Display for DimSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimSpec::Fixed(n) => write!(f, "{}", n),
            DimSpec::Symbol(s) => write!(f, "{}", s),
        }
    }
}

fn is_symbol_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl FromStr for DimSpec {
    type Err = LoweringError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u64>() {
            return Ok(DimSpec::Fixed(n));
        }
        if is_symbol_name(s) {
            return Ok(DimSpec::Symbol(s.to_string()));
        }
        Err(LoweringError::malformed_spec(format!(
            "shape entry '{}' is neither a non-negative integer nor a symbol name",
            s
        )))
    }
}

/// A declared input: shape entries plus element type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub shape: Vec<DimSpec>,
    pub dtype: DType,
}

impl InputSpec {
    pub fn new(shape: Vec<DimSpec>, dtype: DType) -> Self {
        InputSpec { shape, dtype }
    }

    /// Known-length input, e.g. `InputSpec::fixed(&[3], DType::F32)`.
    pub fn fixed(dims: &[u64], dtype: DType) -> Self {
        InputSpec { shape: dims.iter().map(|d| DimSpec::Fixed(*d)).collect(), dtype }
    }

    /// Parse a comma separated spec such as `B,4` or `(3,)`. An empty string
    /// is a scalar. One trailing comma is allowed; any other empty entry is
    /// malformed.
    pub fn parse(text: &str, dtype: DType) -> Result<Self> {
        let body = text.trim().trim_start_matches('(').trim_end_matches(')').trim();
        if body.is_empty() {
            return Ok(InputSpec::new(Vec::new(), dtype));
        }
        let body = body.strip_suffix(',').unwrap_or(body);
        let shape = body
            .split(',')
            .map(|entry| {
                if entry.trim().is_empty() {
                    Err(LoweringError::malformed_spec(format!("shape '{}' has an empty entry", text.trim())))
                } else {
                    DimSpec::from_str(entry)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(InputSpec::new(shape, dtype))
    }

    /// Read a spec from JSON. An array lists the entries; a bare integer or
    /// string is a single-entry shape. Anything else is malformed.
    pub fn from_json(value: &Json, dtype: DType) -> Result<Self> {
        let entries: Vec<&Json> = match value {
            Json::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        let shape = entries.into_iter().map(dim_from_json).collect::<Result<Vec<_>>>()?;
        Ok(InputSpec::new(shape, dtype))
    }
}

fn dim_from_json(value: &Json) -> Result<DimSpec> {
    match value {
        Json::Number(n) => n.as_u64().map(DimSpec::Fixed).ok_or_else(|| {
            LoweringError::malformed_spec(format!("shape entry {} is not a non-negative integer", n))
        }),
        Json::String(s) if is_symbol_name(s) => Ok(DimSpec::Symbol(s.clone())),
        other => Err(LoweringError::malformed_spec(format!(
            "shape entry {} is neither an integer nor a symbol name",
            other
        ))),
    }
}

/// Symbol id <-> declared name, fixed once the inputs are built.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    names: Vec<String>,
    ids: HashMap<String, SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = SymbolId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    pub fn name(&self, id: SymbolId) -> Option<&str> {
        self.names.get(id.0 as usize).map(|s| s.as_str())
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.ids.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Render one source dim as a target dim. Symbols this table never issued
    /// cannot be named and yield `None`.
    pub fn render_dim(&self, dim: &Dim) -> Option<ShapeDim> {
        match dim {
            Dim::Known(n) => Some(ShapeDim::Fixed(*n)),
            Dim::Symbolic(id) => self.name(*id).map(|s| ShapeDim::Named(s.to_string())),
        }
    }

    pub fn render_shape(&self, aval: &AbstractValue) -> Option<Vec<ShapeDim>> {
        aval.shape.iter().map(|d| self.render_dim(d)).collect()
    }
}

/// Build one abstract value per spec. Every occurrence of a symbol name,
/// in any input, maps to the same `SymbolId`.
pub fn abstract_inputs(specs: &[InputSpec]) -> (Vec<AbstractValue>, SymbolTable) {
    let mut table = SymbolTable::new();
    let avals = specs
        .iter()
        .map(|spec| {
            let shape = spec
                .shape
                .iter()
                .map(|d| match d {
                    DimSpec::Fixed(n) => Dim::Known(*n),
                    DimSpec::Symbol(name) => Dim::Symbolic(table.intern(name)),
                })
                .collect();
            AbstractValue::new(shape, spec.dtype)
        })
        .collect();
    (avals, table)
}
