use clap::{Arg, ArgAction, ArgMatches, Command};
use lowergraph_core::ir::lower::InputSpec;
use lowergraph_core::ir::opt::{DeadNodeElimination, ModelOptimizer, NoopOptimizer};
use lowergraph_core::plugins::TestCase;
use lowergraph_core::{
    ConversionOptions, Driver, LoweringError, Model, RecordingTracer, analyze_constants, builtin_registry,
    generate_error_report,
};
use std::fs;
use std::process;

mod output;

fn main() {
    let cli = Command::new("lowergraph")
        .version("0.1.0")
        .about("Lower traced programs into graph models");

    let cli = setup_cli(cli);
    let matches = cli.get_matches();
    process::exit(dispatch_commands(&matches));
}

/// Sets up the CLI with subcommands and arguments.
fn setup_cli(cli: Command) -> Command {
    cli.subcommand(Command::new("primitives").about("List the registered primitive handlers"))
        .subcommand(
            Command::new("convert")
                .about("Convert a registered test case into a model")
                .arg(
                    Arg::new("testcase")
                        .help("Name of the test case to convert")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::new("input")
                        .help("Input shape such as `B,4`; repeat once per input")
                        .short('i')
                        .long("input")
                        .action(ArgAction::Append)
                        .value_parser(clap::value_parser!(String))
                        .value_name("SHAPE"),
                )
                .arg(
                    Arg::new("output")
                        .help("Write the model as JSON to this file")
                        .short('o')
                        .long("output")
                        .value_parser(clap::value_parser!(String))
                        .value_name("FILE"),
                )
                .arg(
                    Arg::new("config")
                        .help("Conversion options as a JSON file")
                        .long("config")
                        .value_parser(clap::value_parser!(String))
                        .value_name("FILE"),
                )
                .arg(
                    Arg::new("report")
                        .help("Print the constant report")
                        .long("report")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("no-optimize")
                        .help("Skip the optimization pass")
                        .long("no-optimize")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("check").about("Convert and validate every registered test case"))
}

/// Dispatches the command and returns the process exit code.
fn dispatch_commands(matches: &ArgMatches) -> i32 {
    match matches.subcommand() {
        Some(("primitives", _)) => match builtin_registry() {
            Ok(registry) => {
                println!("{}", output::primitives_table(registry));
                0
            }
            Err(e) => {
                eprintln!("{}", generate_error_report(&e));
                1
            }
        },
        Some(("convert", sub_m)) => run_convert(sub_m),
        Some(("check", _)) => run_check(),
        _ => {
            println!("No valid subcommand was used. Use --help for more information.");
            2
        }
    }
}

fn run_convert(sub_m: &ArgMatches) -> i32 {
    let Some(name) = sub_m.get_one::<String>("testcase") else {
        return 2;
    };
    let registry = match builtin_registry() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("{}", generate_error_report(&e));
            return 1;
        }
    };
    let Some(case) = registry.testcase(name) else {
        output::print_failure(&format!("unknown test case '{}'", name));
        return 1;
    };

    let mut options = match sub_m.get_one::<String>("config") {
        Some(path) => match ConversionOptions::load_from_file(path) {
            Ok(options) => options,
            Err(e) => {
                output::print_failure(&e);
                return 1;
            }
        },
        None => ConversionOptions { model_name: case.name.to_string(), ..ConversionOptions::default() },
    };
    if sub_m.get_flag("no-optimize") {
        options.optimize = false;
    }
    let shapes: Vec<String> = sub_m.get_many::<String>("input").map(|v| v.cloned().collect()).unwrap_or_default();

    let model = match convert_case(case, &shapes, &options) {
        Ok(model) => model,
        Err(e) => {
            eprintln!("{}", generate_error_report(&e));
            return 1;
        }
    };
    output::print_model_summary(&model);

    if sub_m.get_flag("report") {
        println!("{}", analyze_constants(&model));
    }
    if let Some(path) = sub_m.get_one::<String>("output") {
        let written = serde_json::to_string_pretty(&model)
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write(path, json).map_err(|e| e.to_string()));
        if let Err(e) = written {
            output::print_failure(&format!("failed to write {}: {}", path, e));
            return 1;
        }
        output::print_success(&format!("wrote {}", path));
    }
    0
}

fn run_check() -> i32 {
    let cases = match builtin_registry() {
        Ok(registry) => registry.testcases(),
        Err(e) => {
            eprintln!("{}", generate_error_report(&e));
            return 1;
        }
    };
    let bar = output::progress_bar(cases.len() as u64);
    let mut failures = Vec::new();
    for (primitive, case) in cases {
        bar.set_message(case.name);
        let options = ConversionOptions { model_name: case.name.to_string(), ..ConversionOptions::default() };
        match convert_case(case, &[], &options) {
            Ok(model) => {
                if let Err(problems) = model.check() {
                    failures.push(format!("{} ({}): {}", case.name, primitive, problems.join("; ")));
                }
            }
            Err(e) => failures.push(format!("{} ({}): {}", case.name, primitive, generate_error_report(&e))),
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    if failures.is_empty() {
        output::print_success("all test cases converted and validated");
        0
    } else {
        for failure in &failures {
            output::print_failure(failure);
        }
        1
    }
}

/// Convert `case`, replacing its declared input shapes with `shapes` when
/// any are given.
fn convert_case(case: &TestCase, shapes: &[String], options: &ConversionOptions) -> Result<Model, LoweringError> {
    let inputs = if shapes.is_empty() {
        case.input_shapes.iter().map(|s| InputSpec::parse(s, case.dtype)).collect::<Result<Vec<_>, _>>()?
    } else if shapes.len() != case.input_shapes.len() {
        return Err(LoweringError::malformed_spec(format!(
            "{} takes {} input(s), got {} shape(s)",
            case.name,
            case.input_shapes.len(),
            shapes.len()
        )));
    } else {
        shapes.iter().map(|s| InputSpec::parse(s, case.dtype)).collect::<Result<Vec<_>, _>>()?
    };
    let optimizer: &dyn ModelOptimizer = if options.optimize { &DeadNodeElimination } else { &NoopOptimizer };
    let tracer = RecordingTracer::new();
    Driver::new(builtin_registry()?, &tracer, optimizer).convert(&(case.callable)(), &inputs, options)
}
