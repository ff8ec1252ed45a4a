use clap::{Parser as ClapParser, Subcommand};
use fault::{
    CircuitRef, DisplayMode, Environment, FaultConfig, FaultError, RecordingBackend, RunOptions,
    SynthesisOptions, SynthesizedTest, process, synthesize_source,
};
use miette::{IntoDiagnostic, NamedSource, Report, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(ClapParser)]
#[command(name = "fault", about = "Synthesize and run parametrized circuit tests")]
struct Cli {
    /// Configuration file; defaults to the nearest fault.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Samples per random parameter
    #[arg(long, global = true)]
    num_tests: Option<usize>,

    /// Seed for reproducible sampling
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Output structured JSON to stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print each definition after synthesis and rewriting
    Rewrite { file: PathBuf },
    /// Synthesize every definition and run all of its cases
    Run { file: PathBuf },
    /// Run an external command with the configured environment
    Exec {
        /// Fail if this text appears in the output
        #[arg(long)]
        error_string: Option<String>,
        /// Also write a re-runnable script with this name
        #[arg(long)]
        script: Option<String>,
        /// Print output while the command runs
        #[arg(long)]
        realtime: bool,
        #[arg(long)]
        shell: bool,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let mut options = config.synthesis_options();
    if let Some(num_tests) = cli.num_tests {
        options.num_tests = num_tests;
    }
    if let Some(seed) = cli.seed {
        options.seed = Some(seed);
    }

    match &cli.command {
        Command::Rewrite { file } => {
            let tests = synthesize_file(file, &config, &options)?;
            if cli.json {
                let entries: Vec<_> = tests
                    .iter()
                    .map(|test| {
                        serde_json::json!({
                            "name": test.name(),
                            "params": test.params(),
                            "cases": test.cases().into_iter().map(|case| case.id).collect::<Vec<_>>(),
                            "source": test.definition().to_string(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries).into_diagnostic()?);
            } else {
                for test in &tests {
                    println!("{}", test.definition());
                }
            }
        }
        Command::Run { file } => {
            let tests = synthesize_file(file, &config, &options)?;
            let mut failed = 0;
            let mut summary = Vec::new();
            for test in &tests {
                let report = test.run_all();
                failed += report.failed.len();
                if cli.json {
                    summary.push(serde_json::json!({
                        "name": test.name(),
                        "passed": report.passed,
                        "failed": report
                            .failed
                            .iter()
                            .map(|(id, err)| serde_json::json!({ "id": id, "error": err.to_string() }))
                            .collect::<Vec<_>>(),
                    }));
                } else {
                    for id in &report.passed {
                        println!("PASS {id}");
                    }
                    for (id, err) in &report.failed {
                        println!("FAIL {id}: {err}");
                    }
                }
            }
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary).into_diagnostic()?);
            }
            if failed > 0 {
                bail!("{failed} case(s) failed");
            }
        }
        Command::Exec {
            error_string,
            script,
            realtime,
            shell,
            command,
        } => {
            let mut run_options = RunOptions::default()
                .with_config(config.process.clone())
                .shell(*shell);
            if let Some(needle) = error_string {
                run_options = run_options.error_string(needle.clone());
            }
            if let Some(script) = script {
                run_options = run_options.script(script.clone());
            }
            if *realtime {
                run_options = run_options.display(DisplayMode::Realtime);
            }
            let completed = process::run(command.as_slice(), &run_options).into_diagnostic()?;
            if cli.json {
                let output = serde_json::json!({
                    "args": completed.args,
                    "return_code": completed.return_code,
                    "stdout": completed.stdout,
                    "stderr": completed.stderr,
                });
                println!("{}", serde_json::to_string_pretty(&output).into_diagnostic()?);
            }
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<FaultConfig> {
    if let Some(path) = path {
        return FaultConfig::load(path).into_diagnostic();
    }
    let cwd = std::env::current_dir().into_diagnostic()?;
    match FaultConfig::search_from(&cwd).into_diagnostic()? {
        Some((path, config)) => {
            log::info!("loaded {}", path.display());
            Ok(config)
        }
        None => Ok(FaultConfig::default()),
    }
}

/// Configured circuits are bound to recording backends, which store and
/// read back port values without evaluating any logic.
fn environment(config: &FaultConfig) -> Environment {
    let mut env = Environment::with_prelude();
    for circuit in &config.circuits {
        env.define_circuit(CircuitRef::new(circuit.clone(), RecordingBackend::store_factory()));
    }
    env
}

fn synthesize_file(
    file: &Path,
    config: &FaultConfig,
    options: &SynthesisOptions,
) -> Result<Vec<SynthesizedTest>> {
    let source = fs::read_to_string(file).into_diagnostic()?;
    match synthesize_source(&source, &environment(config), options) {
        Ok(tests) => Ok(tests),
        Err(FaultError::Parse(err)) => {
            Err(Report::new(err).with_source_code(NamedSource::new(file.display().to_string(), source)))
        }
        Err(err) => Err(err).into_diagnostic(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fault::{Circuit, Port};

    #[test]
    fn test_configured_circuits_store_port_values() {
        let config = FaultConfig {
            circuits: vec![Circuit::new("Reg", vec![Port::input("d", 8), Port::output("q", 8)])],
            ..Default::default()
        };
        let options = SynthesisOptions {
            num_tests: 4,
            seed: Some(3),
            ..Default::default()
        };
        let src = "fn t(v: Random(8), dut: Reg) { dut.d = v; dut.eval(); assert dut.d == v; assert dut.q == 0; }";
        let tests = synthesize_source(src, &environment(&config), &options).unwrap();
        let report = tests[0].run_all();
        assert!(report.is_success(), "{:?}", report.failed);
        assert_eq!(report.total(), 4);
    }
}
