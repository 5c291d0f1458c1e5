//! `pow`: element-wise power, lowered to a single `Pow` node.

use crate::error::{LoweringError, Result};
use crate::ir::lower::context::ConversionContext;
use crate::ir::model::Node;
use crate::ir::tensor::DType;
use crate::plugins::{DocRef, PrimitiveHandler, PrimitiveMeta, TestCase};
use crate::trace::{Atom, Callable, CallableRef, Params, Var};

pub struct PowPlugin;

impl PrimitiveHandler for PowPlugin {
    fn lower(&self, ctx: &mut ConversionContext<'_, '_>, inputs: &[Atom], outputs: &[Var], _params: &Params) -> Result<()> {
        let [base, exponent] = inputs else {
            return Err(LoweringError::handler("pow", format!("expected 2 operands, got {}", inputs.len())));
        };
        let [out] = outputs else {
            return Err(LoweringError::handler("pow", format!("expected 1 result, got {}", outputs.len())));
        };
        let base = ctx.input_name(base)?;
        let exponent = ctx.input_name(exponent)?;
        let out = ctx.output_name(out);
        let node_name = ctx.unique_name("Pow");
        ctx.add_node(Node::new("Pow", &node_name, vec![base, exponent], vec![out]))
    }
}

fn pow_program() -> CallableRef {
    Callable::new("pow", |b, args| {
        let [base, exponent] = args else {
            return Err(LoweringError::trace(format!("pow takes 2 arguments, got {}", args.len())));
        };
        Ok(vec![Atom::from(b.pow(base, exponent)?)])
    })
}

pub fn meta() -> PrimitiveMeta {
    PrimitiveMeta {
        primitive: "pow",
        source_doc: "https://docs.jax.dev/en/latest/_autosummary/jax.lax.pow.html",
        targets: vec![DocRef { component: "Pow", doc: "https://onnx.ai/onnx/operators/onnx__Pow.html" }],
        since: "v0.1.0",
        context: "primitives.lax",
        component: "pow",
        testcases: vec![
            TestCase { name: "pow_test1", input_shapes: &["3", "3"], dtype: DType::F32, callable: pow_program },
            TestCase { name: "pow_test2", input_shapes: &["2,2", "2,2"], dtype: DType::F32, callable: pow_program },
        ],
    }
}
