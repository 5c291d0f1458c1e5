use lowergraph_core::ir::{DType, FUNCTION_DOMAIN, ShapeDim, Tensor};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use lowergraph_core::trace::{AbstractValue, Atom, CALL_PRIMITIVE, CALLABLE_PARAM, ParamValue, Params};
use lowergraph_core::{Callable, CallableRef, ConversionOptions, DimSpec, ErrorKind, to_model};

fn fixed(n: u64) -> DimSpec {
    DimSpec::Fixed(n)
}

/// y = x * (w + w) with w a constant of the block.
fn scaled_block() -> CallableRef {
    Callable::new("layers.Block", |b, xs| {
        let w = b.constant(Tensor::from_values(&[3], DType::F32, &[1.0, 2.0, 3.0]));
        let twice = b.add(&w, &w)?;
        Ok(vec![b.mul(&xs[0], twice)?.into()])
    })
}

fn call_twice(block: CallableRef) -> CallableRef {
    Callable::new("model.Net", move |b, xs| {
        let h = b.call(&block, &[Atom::from(&xs[0])])?;
        let y = b.call(&block, &[Atom::from(&h[0])])?;
        Ok(y.into_iter().map(Atom::from).collect())
    })
}

#[test]
fn captured_constants_become_parameter_inputs() {
    let block = scaled_block();
    let net = Callable::new("model.Net", move |b, xs| {
        let y = b.call(&block, &[Atom::from(&xs[0])])?;
        Ok(y.into_iter().map(Atom::from).collect())
    });
    let model = to_model(&net, &[vec![fixed(3)]], &ConversionOptions::default()).expect("convert");

    assert_eq!(model.functions.len(), 1);
    let function = &model.functions[0];
    assert_eq!(function.name, "Block_fn");
    assert_eq!(function.domain, FUNCTION_DOMAIN);
    assert_eq!(function.param_count, 1);
    assert_eq!(function.data_inputs().len(), 1);

    let call = model.call_nodes().next().expect("one call node");
    assert_eq!(call.name, "Block");
    assert_eq!(call.op_type, function.name);
    assert_eq!(call.display_name.as_deref(), Some("layers.Block"));
    assert_eq!(call.inputs[0], model.graph.inputs[0].name);

    let mut captured: Vec<String> = model.graph.initializers.iter().map(|i| i.name.clone()).collect();
    captured.sort();
    assert_eq!(call.inputs[1..].to_vec(), captured);
    assert_eq!(model.graph.outputs[0].shape, vec![ShapeDim::Fixed(3)]);
    model.check().expect("valid model");
}

#[test]
fn repeated_block_shares_one_function() {
    let model = to_model(&call_twice(scaled_block()), &[vec![fixed(3)]], &ConversionOptions::default())
        .expect("convert");

    assert_eq!(model.functions.len(), 1);
    let calls: Vec<_> = model.call_nodes().collect();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].op_type, calls[1].op_type);
    assert_eq!(calls[0].name, "Block");
    assert_eq!(calls[1].name, "Block_2");
    // both calls pass the same weight
    assert_eq!(calls[0].inputs[1], calls[1].inputs[1]);
    assert_eq!(model.graph.initializers.len(), 1);
    assert_eq!(calls[1].inputs[0], calls[0].outputs[0]);
    model.check().expect("valid model");
}

/// y = (x * a + b) * c, every weight built by `weight`.
fn affine_block(weight: impl Fn(usize) -> Tensor + Send + Sync + 'static) -> CallableRef {
    Callable::new("layers.Affine", move |b, xs| {
        let a = b.constant(weight(0));
        let c = b.constant(weight(1));
        let d = b.constant(weight(2));
        let y = b.mul(&xs[0], &a)?;
        let y = b.add(y, &c)?;
        Ok(vec![b.mul(y, &d)?.into()])
    })
}

fn call_chain(block: CallableRef, times: usize) -> CallableRef {
    Callable::new("model.Stack", move |b, xs| {
        let mut h = xs[0].clone();
        for _ in 0..times {
            h = b.call(&block, &[Atom::from(&h)])?.remove(0);
        }
        Ok(vec![h.into()])
    })
}

#[test]
fn chained_calls_reuse_function_and_weights() {
    let block = affine_block(|k| Tensor::from_values(&[3], DType::F32, &[k as f64, 1.0, 2.0]));
    let model = to_model(&call_chain(block, 5), &[vec![fixed(3)]], &ConversionOptions::default()).expect("convert");

    assert_eq!(model.functions.len(), 1);
    assert_eq!(model.functions[0].param_count, 3);
    assert_eq!(model.graph.initializers.len(), 3);
    let calls: Vec<_> = model.call_nodes().collect();
    assert_eq!(calls.len(), 5);
    for call in &calls[1..] {
        assert_eq!(call.op_type, "Affine_fn");
        assert_eq!(call.inputs[1..], calls[0].inputs[1..]);
    }
    model.check().expect("valid model");
}

#[test]
fn fresh_weights_per_call_still_share_one_function() {
    let counter = Arc::new(AtomicU64::new(0));
    let block = affine_block(move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst) as f64;
        Tensor::from_values(&[3], DType::F32, &[n, n + 0.5, n + 0.25])
    });
    // five calls with three weights each run the constant names past const_9
    let model = to_model(&call_chain(block, 5), &[vec![fixed(3)]], &ConversionOptions::default()).expect("convert");

    let names: Vec<&str> = model.functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["Affine_fn"]);
    assert_eq!(model.graph.initializers.len(), 15);
    let calls: Vec<_> = model.call_nodes().collect();
    assert_eq!(calls.len(), 5);
    assert_eq!(calls[3].inputs[1..].to_vec(), vec!["const_9", "const_10", "const_11"]);
    assert_eq!(calls[4].inputs[1..].to_vec(), vec!["const_12", "const_13", "const_14"]);
    model.check().expect("valid model");
}

#[test]
fn huge_shapes_lower_without_allocating() {
    let block = Callable::new("Square", |b, xs| Ok(vec![b.mul(&xs[0], &xs[0])?.into()]));
    let net = Callable::new("Net", move |b, xs| {
        let y = b.call(&block, &[Atom::from(&xs[0])])?;
        Ok(y.into_iter().map(Atom::from).collect())
    });
    let model = to_model(&net, &[vec![fixed(1 << 32), fixed(1 << 32)]], &ConversionOptions::default())
        .expect("convert");
    assert_eq!(model.graph.outputs[0].shape, vec![ShapeDim::Fixed(1 << 32), ShapeDim::Fixed(1 << 32)]);
    model.check().expect("valid model");
}

#[test]
fn different_shapes_give_different_functions() {
    let block = Callable::new("Square", |b, xs| Ok(vec![b.mul(&xs[0], &xs[0])?.into()]));
    let net = Callable::new("Net", move |b, xs| {
        let a = b.call(&block, &[Atom::from(&xs[0])])?;
        let c = b.call(&block, &[Atom::from(&xs[1])])?;
        Ok(vec![a[0].clone().into(), c[0].clone().into()])
    });
    let model = to_model(&net, &[vec![fixed(2)], vec![fixed(5)]], &ConversionOptions::default()).expect("convert");
    let names: Vec<&str> = model.functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["Square_fn", "Square_fn_2"]);
    model.check().expect("valid model");
}

#[test]
fn lowering_is_idempotent() {
    let net = call_twice(scaled_block());
    let options = ConversionOptions::default();
    let first = to_model(&net, &[vec![fixed(3)]], &options).expect("convert");
    let second = to_model(&net, &[vec![fixed(3)]], &options).expect("convert");
    assert_eq!(first.functions, second.functions);
    assert_eq!(first, second);
}

#[test]
fn nested_functions_propagate_to_the_model() {
    let inner = Callable::new("ops.Inner", |b, xs| Ok(vec![b.add(&xs[0], &xs[0])?.into()]));
    let mid = Callable::new("ops.Mid", move |b, xs| {
        let h = b.call(&inner, &[Atom::from(&xs[0])])?;
        Ok(vec![b.mul(&h[0], &xs[0])?.into()])
    });
    let outer = Callable::new("Outer", move |b, xs| {
        let y = b.call(&mid, &[Atom::from(&xs[0])])?;
        Ok(y.into_iter().map(Atom::from).collect())
    });
    let shapes = [vec![DimSpec::Symbol("B".into()), fixed(8)]];
    let model = to_model(&outer, &shapes, &ConversionOptions::default()).expect("convert");

    let mut names: Vec<&str> = model.functions.iter().map(|f| f.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["Inner_fn", "Mid_fn"]);
    let mid_fn = model.function("Mid_fn").expect("mid function");
    assert!(mid_fn.nodes.iter().any(|n| n.is_function_call() && n.op_type == "Inner_fn"));
    let out = &mid_fn.value_info(&mid_fn.outputs[0]).expect("output record").shape;
    assert_eq!(out, &vec![ShapeDim::Named("B".into()), ShapeDim::Fixed(8)]);
    model.check().expect("valid model");
}

#[test]
fn nested_failure_reports_its_site() {
    let inner = Callable::new("ops.Inner", |b, xs| {
        let out = b.bind("erf", vec![Atom::from(&xs[0])], vec![xs[0].aval.clone()], Params::new());
        Ok(out.into_iter().map(Atom::from).collect())
    });
    let mid = Callable::new("ops.Mid", move |b, xs| {
        let h = b.call(&inner, &[Atom::from(&xs[0])])?;
        Ok(h.into_iter().map(Atom::from).collect())
    });
    let outer = Callable::new("Outer", move |b, xs| {
        let y = b.call(&mid, &[Atom::from(&xs[0])])?;
        Ok(y.into_iter().map(Atom::from).collect())
    });
    let err = to_model(&outer, &[vec![fixed(2)]], &ConversionOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownOperation);
    let site = lowergraph_core::GraphErrorExt::site(&err).expect("site");
    assert_eq!(site.depth, 2);
    assert_eq!(site.path, vec!["Mid".to_string(), "Inner".to_string()]);
    assert_eq!(site.primitive.as_deref(), Some("erf"));
}

#[test]
fn caller_and_callee_disagreeing_is_a_conflict() {
    let block = Callable::new("Block", |b, xs| Ok(vec![b.add(&xs[0], &xs[0])?.into()]));
    let net = Callable::new("Net", move |b, xs| {
        let mut params = Params::new();
        params.insert(CALLABLE_PARAM.to_string(), ParamValue::Callable(block.clone()));
        // the caller claims a different result shape than the callee produces
        let wrong = AbstractValue::known(&[7], DType::F32);
        let out = b.bind(CALL_PRIMITIVE, vec![Atom::from(&xs[0])], vec![wrong], params);
        Ok(out.into_iter().map(Atom::from).collect())
    });
    let err = to_model(&net, &[vec![fixed(3)]], &ConversionOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MetadataConflict);
}

#[test]
fn literal_call_arguments_are_data_inputs() {
    let block = Callable::new("Scale", |b, xs| Ok(vec![b.mul(&xs[0], &xs[1])?.into()]));
    let net = Callable::new("Net", move |b, xs| {
        let two = b.literal(DType::F32, 2.0);
        let y = b.call(&block, &[Atom::from(&xs[0]), two])?;
        Ok(y.into_iter().map(Atom::from).collect())
    });
    let model = to_model(&net, &[vec![fixed(4)]], &ConversionOptions::default()).expect("convert");
    let function = &model.functions[0];
    assert_eq!(function.data_inputs().len(), 2);
    assert_eq!(function.param_count, 0);
    let call = model.call_nodes().next().expect("call");
    assert_eq!(call.inputs.len(), 2);
    assert!(model.graph.initializer(&call.inputs[1]).is_some());
    model.check().expect("valid model");
}
