//! Lowering of traced programs into graph models.
//!
//! `ConversionContext` walks one trace; nested calls recurse through
//! `function_call` into child builders created by `GraphBuilder::child`.

pub mod context;
pub mod function_call;
pub mod graph_builder;
pub mod names;
pub mod symbols;

pub use self::context::{ConversionContext, LoweringEnv, Resolution, resolve_output};
pub use self::function_call::example_arg;
pub use self::graph_builder::{FrozenGraph, GraphBuilder, InitializerTable, PRODUCER};
pub use self::names::NameGenerator;
pub use self::symbols::{DimSpec, InputSpec, SymbolTable, abstract_inputs};
