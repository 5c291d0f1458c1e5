//! file: core/src/ir/lower/function_call.rs
//! description: lowering of calls to named sub-programs.
//!
//! A call equation is traced again on its own, lowered into a child builder
//! that shares the name pool and initializer table of its parent, frozen into
//! a reusable function and replaced at the call site by one call node.

use log::{debug, info};

use crate::error::{LoweringError, Result};
use crate::ir::lower::context::ConversionContext;
use crate::ir::value_info::Provenance;
use crate::site::Site;
use crate::trace::{Atom, CallableRef, Equation, ExampleArray, TraceArg};

impl<'a, 'e> ConversionContext<'a, 'e> {
    /// Lower `eqn`, a call to `callee`, as a function plus one call node.
    pub(super) fn lower_call(&mut self, eqn: &Equation, callee: &CallableRef) -> Result<()> {
        let base = callee.base_name().to_string();
        let instance = self.builder.unique_instance_name(&base);

        let data_inputs = eqn.inputs.iter().map(|atom| self.input_name(atom)).collect::<Result<Vec<_>>>()?;
        let args: Vec<TraceArg> = eqn.inputs.iter().map(example_arg).collect();

        let env = self.env;
        let trace = env
            .tracer
            .trace(callee, &args, env.params)
            .map_err(|e| e.issued_by(callee.qualified_name()))?;
        if trace.outputs.len() != eqn.outputs.len() {
            return Err(LoweringError::unresolved_output(
                &instance,
                format!(
                    "call site expects {} outputs, '{}' produces {}",
                    eqn.outputs.len(),
                    callee.qualified_name(),
                    trace.outputs.len()
                ),
            ));
        }

        let mut path = self.site.path.clone();
        path.push(instance.clone());
        let site = Site::new(self.site.depth + 1, path);
        let graph_name = format!("{}_graph", instance);
        let frozen = {
            let child = self.builder.child(&graph_name);
            let mut sub = ConversionContext::nested(child, env, site);
            sub.lower_trace(&trace)?;
            sub.resolve_output_metadata()?;
            sub.freeze()
        };

        let captured = frozen.referenced_initializers(self.builder.initializers());
        debug!("{}: {} captures {:?}", self.builder.name(), instance, captured);

        // The caller's view of each output is checked against the record the
        // sub-graph produced for it.
        let mut outputs = Vec::with_capacity(eqn.outputs.len());
        for (var, inner) in eqn.outputs.iter().zip(frozen.outputs.iter()) {
            let outer = self.output_name(var);
            let record = frozen
                .value_info
                .get(inner)
                .ok_or_else(|| LoweringError::unresolved_output(inner, format!("declared by '{}'", frozen.name)))?;
            self.builder
                .register_value_info(&outer, record.shape.clone(), record.dtype, Provenance::Subgraph)?;
            outputs.push(outer);
        }

        let mut function = frozen.to_function(&instance, &captured, self.builder.initializers())?;
        self.builder.merge_functions(frozen.functions)?;
        let function_name = match self.builder.function_with_body(&function) {
            Some(existing) => {
                debug!("{}: {} reuses function {}", self.builder.name(), instance, existing);
                existing.to_string()
            }
            None => {
                function.name = self.builder.unique_instance_name(&format!("{}_fn", base));
                info!(
                    "Registered function '{}' for {} ({} nodes, {} captured constants)",
                    function.name,
                    callee.qualified_name(),
                    function.nodes.len(),
                    function.param_count
                );
                self.builder.register_function(function)?
            }
        };

        self.builder.add_function_call_node(
            &function_name,
            &data_inputs,
            &captured,
            &outputs,
            &instance,
            callee.qualified_name(),
        )
    }
}

/// Stand-in argument used to retrace a callee. Fully known shapes get a
/// ones-filled example (a zero scalar for rank 0), described but not
/// allocated; anything symbolic is passed through abstractly so the symbols
/// survive into the nested trace.
pub fn example_arg(atom: &Atom) -> TraceArg {
    match atom {
        Atom::Literal(lit) => TraceArg::Literal(lit.clone()),
        Atom::Var(var) => match var.aval.known_dims() {
            Some(dims) if dims.is_empty() => TraceArg::Example(ExampleArray::zeros(&[], var.aval.dtype)),
            Some(dims) => TraceArg::Example(ExampleArray::ones(&dims, var.aval.dtype)),
            None => TraceArg::Abstract(var.aval.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::tensor::{DType, Tensor};
    use crate::trace::{AbstractValue, Dim, Literal, SymbolId, Var, VarId};

    fn var(aval: AbstractValue) -> Atom {
        Atom::Var(Var { id: VarId(0), aval })
    }

    #[test]
    fn example_args_follow_the_operand_kind() {
        match example_arg(&var(AbstractValue::known(&[2, 3], DType::F32))) {
            TraceArg::Example(example) => {
                assert_eq!(example.dims, vec![2, 3]);
                assert_eq!(example.materialize().unwrap(), Tensor::ones(&[2, 3], DType::F32));
            }
            other => panic!("expected an example tensor, got {:?}", other),
        }
        match example_arg(&var(AbstractValue::scalar(DType::I64))) {
            TraceArg::Example(example) => assert_eq!(example.materialize().unwrap(), Tensor::zeros(&[], DType::I64)),
            other => panic!("expected a scalar, got {:?}", other),
        }
        let symbolic = AbstractValue::new(vec![Dim::Symbolic(SymbolId(0)), Dim::Known(4)], DType::F32);
        assert!(matches!(example_arg(&var(symbolic)), TraceArg::Abstract(_)));
        let lit = Atom::Literal(Literal::scalar(DType::F32, 2.0));
        assert!(matches!(example_arg(&lit), TraceArg::Literal(_)));
    }

    #[test]
    fn huge_known_shapes_are_described_not_allocated() {
        let aval = AbstractValue::known(&[1 << 32, 1 << 32], DType::F32);
        match example_arg(&var(aval.clone())) {
            TraceArg::Example(example) => {
                assert_eq!(TraceArg::Example(example.clone()).aval(), aval);
                assert!(example.materialize().is_err());
            }
            other => panic!("expected an example, got {:?}", other),
        }
    }
}
