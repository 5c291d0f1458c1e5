use assert_cmd::Command;

fn lowergraph() -> Command {
    Command::cargo_bin("lowergraph").expect("lowergraph binary")
}

#[test]
fn primitives_lists_every_handler() {
    let output = lowergraph().arg("primitives").output().expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for primitive in ["add", "mul", "pow", "pow_test1"] {
        assert!(stdout.contains(primitive), "missing {} in {}", primitive, stdout);
    }
}

#[test]
fn convert_writes_model_json() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("pow.json");
    lowergraph()
        .args(["convert", "pow_test2", "-o"])
        .arg(&path)
        .assert()
        .success();

    let raw = std::fs::read_to_string(&path).expect("model written");
    let model: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
    assert_eq!(model["graph"]["name"], "pow_test2");
    assert_eq!(model["graph"]["nodes"][0]["op_type"], "Pow");
    assert_eq!(model["graph"]["inputs"].as_array().map(|a| a.len()), Some(2));
}

#[test]
fn convert_accepts_symbolic_overrides_and_report() {
    let output = lowergraph()
        .args(["convert", "add_in_block", "-i", "N,4", "-i", "N,4", "--report"])
        .output()
        .expect("run");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("AddBlock_fn"), "{}", stdout);
    assert!(stdout.contains("[N, 4]"), "{}", stdout);
}

#[test]
fn convert_reports_malformed_shapes() {
    let output = lowergraph().args(["convert", "pow_test1", "-i", "3.5", "-i", "3"]).output().expect("run");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("LOWERGRAPH | ERROR"), "{}", stderr);
}

#[test]
fn convert_rejects_wrong_number_of_shapes() {
    let output = lowergraph().args(["convert", "pow_test1", "-i", "3"]).output().expect("run");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("LOWERGRAPH | ERROR"), "{}", stderr);
    assert!(stderr.contains("takes 2 input(s), got 1 shape(s)"), "{}", stderr);
}

#[test]
fn convert_reads_options_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = dir.path().join("options.json");
    std::fs::write(&config, r#"{ "model_name": "configured", "optimize": false }"#).expect("write config");
    let out = dir.path().join("model.json");
    lowergraph()
        .args(["convert", "mul_test1", "--config"])
        .arg(&config)
        .arg("-o")
        .arg(&out)
        .assert()
        .success();
    let raw = std::fs::read_to_string(&out).expect("model written");
    assert!(raw.contains("\"configured\""));
}

#[test]
fn check_validates_all_testcases() {
    lowergraph().arg("check").assert().success();
}
