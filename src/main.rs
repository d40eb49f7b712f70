//! FlowRunner CLI Entry Point
//!
//! Provides command-line interface for flow execution.
//!
//! # Usage
//!
//! ```bash
//! # Execute a flow
//! flowrunner flow.yaml
//!
//! # With kill control
//! flowrunner flow.yaml /tmp/kill.flag
//!
//! # Dry run mode (preview commands)
//! flowrunner flow.yaml --dry-run
//!
//! # Provide inputs
//! flowrunner flow.yaml --input samples='["s1","s2"]'
//!
//! # Print the flow structure as JSON
//! flowrunner flow.yaml --graph
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info};

use flowrunner::execution::{Engine, DEFAULT_STATE_DIR};
use flowrunner::monitoring::ExecutionTimeline;
use flowrunner::workflow::{flow_structure, load_flow, parse_input};
use flowrunner::{Execution, StateType, APP_NAME, VERSION};

/// Default flow file used when none is specified.
const DEFAULT_FLOW: &str = "flow.yaml";

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    flow_path: String,
    kill_flag_path: Option<String>,
    dry_run: bool,
    working_dir: Option<PathBuf>,
    state_dir: PathBuf,
    max_parallel: usize,
    inputs: Vec<(String, serde_json::Value)>,
    graph: bool,
    fresh: bool,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flow_path: DEFAULT_FLOW.to_string(),
            kill_flag_path: None,
            dry_run: false,
            working_dir: None,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            max_parallel: num_cpus::get(),
            inputs: Vec::new(),
            graph: false,
            fresh: false,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Flowable Task Resolution Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: flowrunner [OPTIONS] <FLOW_FILE> [KILL_FLAG_PATH]");
    println!();
    println!("Arguments:");
    println!("  <FLOW_FILE>         Path to flow YAML file");
    println!("  [KILL_FLAG_PATH]    Optional file whose presence kills the execution");
    println!();
    println!("Options:");
    println!("  --dry-run           Preview commands without execution");
    println!("  --working-dir PATH  Set working directory for bash tasks");
    println!("  --parallel N        Maximum parallel tasks (default: number of CPUs)");
    println!("  --input NAME=VALUE  Set a flow input (JSON or plain text)");
    println!("  --graph             Print the flow structure as JSON and exit");
    println!("  --fresh             Ignore any unfinished execution and start over");
    println!("  --state-dir PATH    Directory for execution state (default: {})", DEFAULT_STATE_DIR);
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  flowrunner pipeline.yaml");
    println!("  flowrunner pipeline.yaml --dry-run");
    println!("  flowrunner pipeline.yaml --input samples='[\"s1\",\"s2\"]' --parallel 8");
}

/// Returns the value following an option, advancing the cursor.
fn option_value<'a>(args: &'a [String], i: &mut usize, option: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires an argument", option))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut positional_index = 0;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--dry-run" => config.dry_run = true,
            "--verbose" | "-v" => config.verbose = true,
            "--graph" => config.graph = true,
            "--fresh" => config.fresh = true,
            "--working-dir" => {
                config.working_dir = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            "--state-dir" => {
                config.state_dir = PathBuf::from(option_value(args, &mut i, arg)?);
            }
            "--parallel" => {
                let value = option_value(args, &mut i, arg)?;
                config.max_parallel = value
                    .parse()
                    .map_err(|_| format!("Invalid parallel value: {}", value))?;
            }
            "--input" => {
                let value = option_value(args, &mut i, arg)?;
                let input = parse_input(value)
                    .ok_or_else(|| format!("Invalid input '{}', expected NAME=VALUE", value))?;
                config.inputs.push(input);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                // Positional argument
                match positional_index {
                    0 => config.flow_path = arg.clone(),
                    1 => config.kill_flag_path = Some(arg.clone()),
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Validates the working directory.
fn check_working_directory(working_dir: &Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(dir) = working_dir else {
        info!("Working directory: {}", env::current_dir()?.display());
        return Ok(());
    };

    if !dir.exists() {
        return Err(format!("Working directory does not exist: {}", dir.display()).into());
    }
    if !dir.is_dir() {
        return Err(format!("Path is not a directory: {}", dir.display()).into());
    }

    info!("Working directory: {}", dir.display());
    Ok(())
}

fn colored_state(state: StateType) -> String {
    let text = format!("{:?}", state).to_uppercase();
    match state {
        StateType::Success => text.green().bold().to_string(),
        StateType::Warning => text.yellow().bold().to_string(),
        StateType::Failed | StateType::Killed => text.red().bold().to_string(),
        _ => text.normal().to_string(),
    }
}

/// Prints the final state of every task run and the timeline.
fn print_summary(execution: &Execution) {
    println!();
    println!("Execution {}", execution.id.dimmed());
    for run in &execution.task_runs {
        let label = match &run.value {
            Some(value) => format!("{}[{}]", run.task_id, value),
            None => run.task_id.clone(),
        };
        println!("  {:30} {}", label, colored_state(run.state.current));
    }

    print!("{}", ExecutionTimeline::from_execution(execution).gantt_chart());
    println!();
    println!("Flow finished: {}", colored_state(execution.state.current));
}

/// Main application entry point. Returns whether the flow succeeded.
fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);

    // Load flow
    let flow = load_flow(&config.flow_path).map_err(|e| {
        error!("Failed to load flow: {}", e);
        format!("Could not load flow from '{}': {}", config.flow_path, e)
    })?;

    if config.graph {
        println!("{}", serde_json::to_string_pretty(&flow_structure(&flow))?);
        return Ok(true);
    }

    print_banner();

    if let Some(ref path) = config.kill_flag_path {
        info!("Kill control: {}", path);
    }
    if config.dry_run {
        info!("Mode: DRY RUN (commands will not execute)");
        println!();
    }
    check_working_directory(&config.working_dir)?;

    info!(
        "Flow loaded: '{}' with {} tasks",
        flow.id,
        flow.all_tasks().len()
    );

    // Create and configure engine
    let mut engine = Engine::new(flow);
    engine.set_max_parallel(config.max_parallel);
    engine.set_dry_run(config.dry_run);
    engine.set_fresh(config.fresh);
    engine.set_state_dir(config.state_dir);

    for (name, value) in config.inputs {
        engine.set_input(name, value);
    }
    if let Some(kill_path) = config.kill_flag_path {
        engine.set_kill_flag_path(kill_path);
    }
    if let Some(dir) = config.working_dir {
        engine.set_working_dir(dir);
    }

    // Execute flow
    let execution = engine.run()?;
    print_summary(&execution);

    Ok(matches!(
        execution.state.current,
        StateType::Success | StateType::Warning
    ))
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("flowrunner")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_defaults() {
        let config = parse_arguments(&args(&[])).unwrap();
        assert_eq!(config.flow_path, DEFAULT_FLOW);
        assert_eq!(config.state_dir, PathBuf::from(DEFAULT_STATE_DIR));
        assert!(!config.dry_run);
    }

    #[test]
    fn test_parse_full() {
        let config = parse_arguments(&args(&[
            "flow.yaml",
            "/tmp/kill.flag",
            "--dry-run",
            "--parallel",
            "3",
            "--input",
            "samples=[\"a\"]",
            "--state-dir",
            "/tmp/state",
            "--fresh",
            "--graph",
        ]))
        .unwrap();

        assert_eq!(config.flow_path, "flow.yaml");
        assert_eq!(config.kill_flag_path.as_deref(), Some("/tmp/kill.flag"));
        assert!(config.dry_run && config.fresh && config.graph);
        assert_eq!(config.max_parallel, 3);
        assert_eq!(config.inputs, vec![("samples".to_string(), json!(["a"]))]);
        assert_eq!(config.state_dir, PathBuf::from("/tmp/state"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_arguments(&args(&["--parallel"])).is_err());
        assert!(parse_arguments(&args(&["--parallel", "many"])).is_err());
        assert!(parse_arguments(&args(&["--input", "novalue"])).is_err());
        assert!(parse_arguments(&args(&["--bogus"])).is_err());
        assert!(parse_arguments(&args(&["a.yaml", "b", "c"])).is_err());
    }
}
