//! `add` and `mul`: broadcasting binary arithmetic, one node each.

use crate::error::{LoweringError, Result};
use crate::ir::lower::context::ConversionContext;
use crate::ir::model::Node;
use crate::ir::tensor::DType;
use crate::plugins::{DocRef, PrimitiveHandler, PrimitiveMeta, TestCase};
use crate::trace::{Atom, Callable, CallableRef, Params, Var};

/// Lowers a two-operand primitive to a node of type `op_type`.
pub struct BinaryPlugin {
    op_type: &'static str,
}

impl BinaryPlugin {
    pub fn new(op_type: &'static str) -> Self {
        BinaryPlugin { op_type }
    }
}

impl PrimitiveHandler for BinaryPlugin {
    fn lower(&self, ctx: &mut ConversionContext<'_, '_>, inputs: &[Atom], outputs: &[Var], _params: &Params) -> Result<()> {
        let (lhs, rhs, out) = match (inputs, outputs) {
            ([lhs, rhs], [out]) => (lhs, rhs, out),
            _ => {
                return Err(LoweringError::handler(
                    self.op_type,
                    format!("expected 2 operands and 1 result, got {} and {}", inputs.len(), outputs.len()),
                ));
            }
        };
        let lhs = ctx.input_name(lhs)?;
        let rhs = ctx.input_name(rhs)?;
        let out = ctx.output_name(out);
        let node_name = ctx.unique_name(self.op_type);
        ctx.add_node(Node::new(self.op_type, &node_name, vec![lhs, rhs], vec![out]))
    }
}

/// The two arguments of a binary test program.
fn pair<'v>(name: &str, args: &'v [Var]) -> Result<(&'v Var, &'v Var)> {
    match args {
        [lhs, rhs] => Ok((lhs, rhs)),
        _ => Err(LoweringError::trace(format!("{} takes 2 arguments, got {}", name, args.len()))),
    }
}

fn add_program() -> CallableRef {
    Callable::new("add", |b, args| {
        let (lhs, rhs) = pair("add", args)?;
        Ok(vec![Atom::from(b.add(lhs, rhs)?)])
    })
}

fn add_one_program() -> CallableRef {
    Callable::new("add_one", |b, args| {
        let [x] = args else {
            return Err(LoweringError::trace(format!("add_one takes 1 argument, got {}", args.len())));
        };
        let one = b.literal(x.aval.dtype, 1.0);
        Ok(vec![Atom::from(b.add(x, one)?)])
    })
}

fn add_in_block_program() -> CallableRef {
    let block = Callable::new("blocks.AddBlock", |b, args| {
        let (lhs, rhs) = pair("AddBlock", args)?;
        Ok(vec![Atom::from(b.add(lhs, rhs)?)])
    });
    Callable::new("add_in_block", move |b, args| {
        let (lhs, rhs) = pair("add_in_block", args)?;
        let out = b.call(&block, &[Atom::from(lhs), Atom::from(rhs)])?;
        Ok(out.into_iter().map(Atom::from).collect())
    })
}

fn mul_program() -> CallableRef {
    Callable::new("mul", |b, args| {
        let (lhs, rhs) = pair("mul", args)?;
        Ok(vec![Atom::from(b.mul(lhs, rhs)?)])
    })
}

pub fn add_meta() -> PrimitiveMeta {
    PrimitiveMeta {
        primitive: "add",
        source_doc: "https://docs.jax.dev/en/latest/_autosummary/jax.lax.add.html",
        targets: vec![DocRef { component: "Add", doc: "https://onnx.ai/onnx/operators/onnx__Add.html" }],
        since: "v0.1.0",
        context: "primitives.lax",
        component: "add",
        testcases: vec![
            TestCase { name: "add_test1", input_shapes: &["3", "3"], dtype: DType::F32, callable: add_program },
            TestCase { name: "add_literal", input_shapes: &["2,3"], dtype: DType::F32, callable: add_one_program },
            TestCase { name: "add_in_block", input_shapes: &["B,4", "B,4"], dtype: DType::F32, callable: add_in_block_program },
        ],
    }
}

pub fn mul_meta() -> PrimitiveMeta {
    PrimitiveMeta {
        primitive: "mul",
        source_doc: "https://docs.jax.dev/en/latest/_autosummary/jax.lax.mul.html",
        targets: vec![DocRef { component: "Mul", doc: "https://onnx.ai/onnx/operators/onnx__Mul.html" }],
        since: "v0.1.0",
        context: "primitives.lax",
        component: "mul",
        testcases: vec![
            TestCase { name: "mul_test1", input_shapes: &["3", "3"], dtype: DType::F32, callable: mul_program },
            TestCase { name: "mul_symbolic", input_shapes: &["B,4", "B,4"], dtype: DType::F32, callable: mul_program },
        ],
    }
}
