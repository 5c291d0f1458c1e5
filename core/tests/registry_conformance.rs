use lowergraph_core::ir::lower::InputSpec;
use lowergraph_core::ir::opt::DeadNodeElimination;
use lowergraph_core::{ConversionOptions, Driver, RecordingTracer, builtin_registry};

#[test]
fn every_registered_testcase_converts_to_a_valid_model() {
    let registry = builtin_registry().expect("built-in registry");
    let cases = registry.testcases();
    assert!(!cases.is_empty());
    for (primitive, case) in cases {
        let inputs = case
            .input_shapes
            .iter()
            .map(|s| InputSpec::parse(s, case.dtype))
            .collect::<Result<Vec<_>, _>>()
            .expect("testcase shapes parse");
        let tracer = RecordingTracer::new();
        let options = ConversionOptions { model_name: case.name.to_string(), ..ConversionOptions::default() };
        let model = Driver::new(registry, &tracer, &DeadNodeElimination)
            .convert(&(case.callable)(), &inputs, &options)
            .unwrap_or_else(|e| panic!("{} ({}): {}", case.name, primitive, e));
        assert_eq!(model.graph.inputs.len(), inputs.len(), "{}", case.name);
        if let Err(problems) = model.check() {
            panic!("{}: {:?}", case.name, problems);
        }
    }
}

#[test]
fn pow_metadata_is_complete() {
    let meta = builtin_registry().expect("built-in registry").meta("pow").expect("pow registered");
    assert_eq!(meta.source_doc, "https://docs.jax.dev/en/latest/_autosummary/jax.lax.pow.html");
    assert_eq!(meta.targets[0].component, "Pow");
    assert_eq!(meta.targets[0].doc, "https://onnx.ai/onnx/operators/onnx__Pow.html");
    assert_eq!(meta.since, "v0.1.0");
    assert_eq!(meta.context, "primitives.lax");
    let names: Vec<&str> = meta.testcases.iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["pow_test1", "pow_test2"]);
    assert_eq!(meta.testcases[1].input_shapes, &["2,2", "2,2"]);
}

#[test]
fn registry_lists_primitives_sorted() {
    let registry = builtin_registry().expect("built-in registry");
    let ids: Vec<&str> = registry.primitives().iter().map(|m| m.primitive).collect();
    assert_eq!(ids, vec!["add", "mul", "pow"]);
    assert!(registry.handler("cumsum").is_none());
    assert!(registry.testcase("add_in_block").is_some());
}

#[test]
fn duplicate_registration_is_rejected() {
    let mut registry = lowergraph_core::PrimitiveRegistry::with_builtins().expect("built-in registry");
    let meta = registry.meta("pow").expect("pow").clone();
    let err = registry
        .register(meta, std::sync::Arc::new(lowergraph_core::plugins::lax::pow::PowPlugin))
        .unwrap_err();
    assert_eq!(err.kind(), lowergraph_core::ErrorKind::DuplicateDeclaration);
}
