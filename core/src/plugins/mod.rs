//! file: core/src/plugins/mod.rs
//! description: primitive handlers and the registry that dispatches to them.
//!
//! A handler turns one traced equation into graph nodes. Each handler is
//! registered under the primitive identifier it serves, together with its
//! documentation links and the test cases it ships for conformance runs.

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use log::debug;
use serde::Serialize;

use crate::error::{LoweringError, Result};
use crate::ir::lower::context::ConversionContext;
use crate::ir::tensor::DType;
use crate::trace::{Atom, CallableRef, Params, Var};

pub mod lax;

pub trait PrimitiveHandler: Send + Sync {
    /// Emit the nodes computing `outputs` from `inputs`. Input names come
    /// from `ctx.input_name`, and every output variable must be bound through
    /// `ctx.output_name`.
    fn lower(&self, ctx: &mut ConversionContext<'_, '_>, inputs: &[Atom], outputs: &[Var], params: &Params)
    -> Result<()>;
}

/// A documentation link for a primitive or the node it lowers to.
#[derive(Debug, Clone, Serialize)]
pub struct DocRef {
    pub component: &'static str,
    pub doc: &'static str,
}

/// A sample program exercising a handler. Shapes use the input-spec text
/// syntax (`"3"`, `"2,2"`, `"B,4"`).
#[derive(Clone)]
pub struct TestCase {
    pub name: &'static str,
    pub input_shapes: &'static [&'static str],
    pub dtype: DType,
    pub callable: fn() -> CallableRef,
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TestCase({} {:?})", self.name, self.input_shapes)
    }
}

#[derive(Debug, Clone)]
pub struct PrimitiveMeta {
    pub primitive: &'static str,
    pub source_doc: &'static str,
    pub targets: Vec<DocRef>,
    pub since: &'static str,
    pub context: &'static str,
    pub component: &'static str,
    pub testcases: Vec<TestCase>,
}

pub struct RegisteredPrimitive {
    pub meta: PrimitiveMeta,
    pub handler: Arc<dyn PrimitiveHandler>,
}

#[derive(Default)]
pub struct PrimitiveRegistry {
    entries: HashMap<String, RegisteredPrimitive>,
}

impl PrimitiveRegistry {
    pub fn new() -> Self {
        PrimitiveRegistry::default()
    }

    /// Registry holding every handler this crate ships.
    pub fn with_builtins() -> Result<Self> {
        let mut registry = PrimitiveRegistry::new();
        lax::register_all(&mut registry)?;
        Ok(registry)
    }

    /// Register `handler` for `meta.primitive`. A primitive can be served by
    /// one handler only.
    pub fn register(&mut self, meta: PrimitiveMeta, handler: Arc<dyn PrimitiveHandler>) -> Result<()> {
        if self.entries.contains_key(meta.primitive) {
            return Err(LoweringError::duplicate("primitive handler", meta.primitive));
        }
        debug!("registered handler for {} ({})", meta.primitive, meta.context);
        self.entries.insert(meta.primitive.to_string(), RegisteredPrimitive { meta, handler });
        Ok(())
    }

    pub fn handler(&self, primitive: &str) -> Option<&dyn PrimitiveHandler> {
        self.entries.get(primitive).map(|e| e.handler.as_ref())
    }

    pub fn meta(&self, primitive: &str) -> Option<&PrimitiveMeta> {
        self.entries.get(primitive).map(|e| &e.meta)
    }

    pub fn contains(&self, primitive: &str) -> bool {
        self.entries.contains_key(primitive)
    }

    /// Registered primitives sorted by identifier.
    pub fn primitives(&self) -> Vec<&PrimitiveMeta> {
        let mut metas: Vec<&PrimitiveMeta> = self.entries.values().map(|e| &e.meta).collect();
        metas.sort_by_key(|m| m.primitive);
        metas
    }

    /// Every shipped test case with the primitive it belongs to.
    pub fn testcases(&self) -> Vec<(&'static str, &TestCase)> {
        self.primitives()
            .into_iter()
            .flat_map(|m| m.testcases.iter().map(move |t| (m.primitive, t)))
            .collect()
    }

    pub fn testcase(&self, name: &str) -> Option<&TestCase> {
        self.entries.values().flat_map(|e| e.meta.testcases.iter()).find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

lazy_static! {
    static ref BUILTINS: Result<PrimitiveRegistry> = PrimitiveRegistry::with_builtins();
}

/// The process-wide registry of built-in handlers. Fails when two built-in
/// handlers claim the same primitive.
pub fn builtin_registry() -> Result<&'static PrimitiveRegistry> {
    BUILTINS.as_ref().map_err(|e| e.clone())
}
