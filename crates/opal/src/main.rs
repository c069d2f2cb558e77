//! The Opal CLI.
//!
//! `opal [COMMAND]` compiles a `.opl` file into a deterministic execution
//! plan and emits it. Process exit codes: 0 on success, 1 on any
//! pre-execution failure (parse, plan, file I/O).
//!
//! The secret scrubber is installed on stdout and stderr before anything
//! else runs -- every diagnostic, log line, and plan rendering goes through
//! it, so resolved secrets can never reach a terminal or a pipe.

mod render;

use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use ariadne::{Config, Label, Report, ReportKind, Source};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use opal_parser::{parse, ParseOptions, ParseTree, TelemetryLevel, TraceLevel};
use opal_planner::{plan, PlanConfig, PlanError};
use opal_registry::DecoratorRegistry;
use opal_scrub::{Scrubber, ScrubbedStdio};

#[derive(Parser)]
#[command(name = "opal", version, about = "Compile .opl command files into execution plans")]
struct Cli {
    /// Command (function) to plan; omit to plan the whole script
    target: Option<String>,

    /// Source file (`-` reads stdin; stdin is also used when piped)
    #[arg(short = 'f', long = "file")]
    file: Option<PathBuf>,

    /// Emit the plan without handing it to an executor
    #[arg(long)]
    dry_run: bool,

    /// Verbose logging plus parser/planner telemetry
    #[arg(long)]
    debug: bool,

    /// Disable colored diagnostics
    #[arg(long)]
    no_color: bool,
}

/// Adapter so `tracing-subscriber` writes through the scrubbed stderr.
#[derive(Clone)]
struct ScrubbedMakeWriter(Scrubber<io::Stderr>);

impl<'a> MakeWriter<'a> for ScrubbedMakeWriter {
    type Writer = Scrubber<io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        self.0.clone()
    }
}

fn main() {
    let cli = Cli::parse();

    // The scrubber comes up before any parser or planner call.
    let stdio = ScrubbedStdio::install();

    let filter = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(ScrubbedMakeWriter(stdio.stderr.clone()))
        .with_ansi(!cli.no_color)
        .init();

    let code = match run(&cli, &stdio) {
        Ok(code) => code,
        Err(e) => {
            let _ = writeln!(&stdio.stderr, "error: {e:#}");
            1
        }
    };

    let _ = (&stdio.stdout).flush();
    let _ = (&stdio.stderr).flush();
    process::exit(code);
}

fn run(cli: &Cli, stdio: &ScrubbedStdio) -> Result<i32> {
    let source = read_source(cli)?;

    let registry = DecoratorRegistry::builtin();

    let options = if cli.debug {
        ParseOptions {
            telemetry: TelemetryLevel::CountsAndTiming,
            trace: TraceLevel::CallPaths,
        }
    } else {
        ParseOptions::default()
    };

    let tree = parse(&source, &registry, options);
    if let Some(telemetry) = &tree.telemetry {
        debug!(?telemetry, "parse finished");
    }
    if !tree.ok() {
        report_parse_errors(&tree, cli, stdio)?;
        return Ok(1);
    }

    let config = PlanConfig {
        target: cli.target.clone().unwrap_or_default(),
        telemetry: options.telemetry,
        trace: options.trace,
        ..Default::default()
    };
    let outcome = match plan(&tree, &registry, config) {
        Ok(outcome) => outcome,
        Err(error) => {
            report_plan_error(&error, stdio)?;
            return Ok(1);
        }
    };
    if let Some(telemetry) = &outcome.telemetry {
        debug!(?telemetry, "plan finished");
    }

    // Arm the scrubber before the plan leaves the process: anything that
    // prints a resolved value from here on is redacted.
    for secret in &outcome.plan.secrets {
        stdio.store.register_secret(&secret.value, &secret.display);
    }

    // The execution engine is an external collaborator; the core emits the
    // plan. `--dry-run` is accepted for interface compatibility.
    let _ = cli.dry_run;
    write!(&stdio.stdout, "{}", render::render_plan(&outcome.plan))
        .context("writing the plan to stdout")?;

    Ok(0)
}

/// Resolve the source text per the input rules: `-f PATH`, `-f -` for
/// stdin, or stdin when it is not a terminal.
fn read_source(cli: &Cli) -> Result<String> {
    match &cli.file {
        Some(path) if path.as_os_str() == "-" => read_stdin(),
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display())),
        None => {
            if io::stdin().is_terminal() {
                bail!("no input: pass a file with -f/--file or pipe source on stdin");
            }
            read_stdin()
        }
    }
}

fn read_stdin() -> Result<String> {
    let mut source = String::new();
    io::stdin()
        .read_to_string(&mut source)
        .context("reading stdin")?;
    Ok(source)
}

/// Render parse errors with labeled spans through the scrubbed stderr.
fn report_parse_errors(tree: &ParseTree, cli: &Cli, stdio: &ScrubbedStdio) -> Result<()> {
    for error in &tree.errors {
        let start = error.span.start as usize;
        let end = (error.span.end as usize).max(start + 1);
        let message = match &error.suggestion {
            Some(suggestion) => format!("{}; {suggestion}", error.message),
            None => error.message.clone(),
        };
        let label = Label::new(start..end).with_message(message);
        let mut report = Report::<std::ops::Range<usize>>::build(ReportKind::Error, start..end)
            .with_config(Config::default().with_color(!cli.no_color))
            .with_message(format!("parse error in {}", error.context))
            .with_label(label);
        if let Some(example) = &error.example {
            report = report.with_help(format!("for example: {example}"));
        }
        report
            .finish()
            .write(Source::from(tree.source.as_str()), &mut &stdio.stderr)
            .context("rendering diagnostics")?;
    }
    Ok(())
}

/// One-line summaries for plan-time failures.
fn report_plan_error(error: &PlanError, stdio: &ScrubbedStdio) -> Result<()> {
    match error {
        PlanError::Parse { errors } => {
            for e in errors {
                writeln!(&stdio.stderr, "error: {e}")?;
            }
        }
        PlanError::Failed { diagnostics } => {
            for d in diagnostics {
                writeln!(&stdio.stderr, "error: {d}")?;
            }
        }
        other => {
            writeln!(&stdio.stderr, "error: {other}")?;
        }
    }
    Ok(())
}
