/// cli/src/output.rs
/// Output utilities for CLI
/// description: This module renders tables, progress bars and status lines
/// for the lowergraph commands.

use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use lowergraph_core::ir::value_info::format_shape;
use lowergraph_core::{Model, PrimitiveRegistry};

/// ====================================================================
/// Tables

/// One row per registered primitive, sorted by identifier.
pub fn primitives_table(registry: &PrimitiveRegistry) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Primitive", "Lowers to", "Context", "Since", "Test cases"]);
    for meta in registry.primitives() {
        let targets: Vec<&str> = meta.targets.iter().map(|t| t.component).collect();
        let cases: Vec<&str> = meta.testcases.iter().map(|t| t.name).collect();
        table.add_row(vec![
            meta.primitive.to_string(),
            targets.join(", "),
            meta.context.to_string(),
            meta.since.to_string(),
            cases.join(", "),
        ]);
    }
    table
}

/// Print inputs, outputs and counts of a converted model.
pub fn print_model_summary(model: &Model) {
    println!("{} {}", style("Model").bold(), style(&model.graph.name).cyan());
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Kind", "Name", "Type"]);
    for input in &model.graph.inputs {
        table.add_row(vec!["input".to_string(), input.name.clone(), format!("{}{}", input.dtype, format_shape(&input.shape))]);
    }
    for out in &model.graph.outputs {
        table.add_row(vec!["output".to_string(), out.name.clone(), format!("{}{}", out.dtype, format_shape(&out.shape))]);
    }
    println!("{}", table);
    println!(
        "{} nodes, {} initializers, {} functions",
        model.graph.nodes.len(),
        model.graph.initializers.len(),
        model.functions.len()
    );
}

/// ====================================================================
/// Progress bar

pub fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    if let Ok(bar_style) = ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}") {
        bar.set_style(bar_style.progress_chars("█▒░"));
    }
    bar
}

/// ====================================================================
/// Status lines

pub fn print_success(message: &str) {
    println!("{} {}", style("ok").green().bold(), message);
}

pub fn print_failure(message: &str) {
    eprintln!("{} {}", style("error").red().bold(), message);
}
