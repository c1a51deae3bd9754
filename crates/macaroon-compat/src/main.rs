use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use macaroon_compat::config::{HarnessConfig, NonceSource};
use macaroon_compat::registry::{ImplementationId, Registry};
use macaroon_compat::report::{RunReport, SuiteReport};
use macaroon_compat::suites::{run_suite, SuiteName};
use macaroon_compat_bridge::{Evaluator, RuntimeKind, RuntimeProfile};
use serde_json::json;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{fmt, EnvFilter};

const ENV_LOG: &str = "MCOMPAT_LOG";

#[derive(Parser, Debug)]
#[command(name = "macaroon-compat")]
#[command(about = "Cross-implementation compatibility checks for macaroon libraries.")]
#[command(long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct GlobalArgs {
    /// Directory holding the interpreter loop programs (python/, node/).
    #[arg(long, global = true, value_name = "DIR")]
    runtimes_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PROGRAM")]
    python2: Option<OsString>,

    #[arg(long, global = true, value_name = "PROGRAM")]
    python3: Option<OsString>,

    #[arg(long, global = true, value_name = "PROGRAM")]
    node: Option<OsString>,

    /// Third-party caveat nonces: `zero` (reproducible) or `random`.
    #[arg(long, global = true, value_name = "MODE")]
    nonce: Option<NonceSource>,

    /// Log as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the configured implementations in registry order.
    List(SelectArgs),
    /// Run scenario suites and print the JSON report.
    Run(RunArgs),
    /// Evaluate one expression in a bare runtime and print the result.
    Eval(EvalArgs),
}

#[derive(Debug, Clone, Args)]
struct SelectArgs {
    /// Implementation to enable (repeatable; order sets the baseline).
    #[arg(long = "impl", value_name = "NAME")]
    implementations: Vec<ImplementationId>,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    #[command(flatten)]
    select: SelectArgs,

    #[arg(long = "suite", value_enum, default_value = "all")]
    suites: Vec<SuiteArg>,

    #[arg(long, value_name = "PATH")]
    report_out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct EvalArgs {
    #[arg(long, value_name = "RUNTIME")]
    runtime: RuntimeKind,

    /// Python statements must assign `result`; Node expressions yield it.
    expr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "kebab_case")]
enum SuiteArg {
    All,
    Signature,
    Bind,
    Verify,
    Serialization,
    Properties,
}

impl SuiteArg {
    fn expand(self) -> Vec<SuiteName> {
        match self {
            SuiteArg::All => SuiteName::ALL.to_vec(),
            SuiteArg::Signature => vec![SuiteName::Signature],
            SuiteArg::Bind => vec![SuiteName::Bind],
            SuiteArg::Verify => vec![SuiteName::Verify],
            SuiteArg::Serialization => vec![SuiteName::Serialization],
            SuiteArg::Properties => vec![SuiteName::Properties],
        }
    }
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.global.log_json)?;

    let mut cfg = HarnessConfig::from_env().context("read MCOMPAT_* environment")?;
    apply_global(&mut cfg, &cli.global);

    match cli.command {
        Command::List(args) => cmd_list(cfg, args),
        Command::Run(args) => cmd_run(cfg, args),
        Command::Eval(args) => cmd_eval(cfg, args),
    }
}

fn init_logging(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = tracing_subscriber::registry().with(filter);
    let installed = if json {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    installed.context("install tracing subscriber")
}

fn apply_global(cfg: &mut HarnessConfig, global: &GlobalArgs) {
    if let Some(dir) = &global.runtimes_dir {
        cfg.runtimes_dir = Some(dir.clone());
    }
    if let Some(p) = &global.python2 {
        cfg.python2 = p.clone();
    }
    if let Some(p) = &global.python3 {
        cfg.python3 = p.clone();
    }
    if let Some(p) = &global.node {
        cfg.node = p.clone();
    }
    if let Some(nonce) = global.nonce {
        cfg.nonce = nonce;
    }
}

fn apply_select(cfg: &mut HarnessConfig, select: &SelectArgs) -> Result<()> {
    if select.implementations.is_empty() {
        return Ok(());
    }
    for (i, id) in select.implementations.iter().enumerate() {
        if select.implementations[..i].contains(id) {
            bail!("--impl {id} given more than once");
        }
    }
    cfg.implementations = select.implementations.clone();
    Ok(())
}

fn cmd_list(mut cfg: HarnessConfig, args: SelectArgs) -> Result<ExitCode> {
    apply_select(&mut cfg, &args)?;
    let registry = Registry::from_config(&cfg).context("build implementation registry")?;
    let doc = json!({
        "implementations": registry.describe(),
        "nonce": cfg.nonce,
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(ExitCode::SUCCESS)
}

fn cmd_run(mut cfg: HarnessConfig, args: RunArgs) -> Result<ExitCode> {
    apply_select(&mut cfg, &args.select)?;
    let registry = Registry::from_config(&cfg).context("build implementation registry")?;

    let mut selected: Vec<SuiteName> = Vec::new();
    for name in args.suites.iter().flat_map(|s| s.expand()) {
        if !selected.contains(&name) {
            selected.push(name);
        }
    }

    let suites: Vec<SuiteReport> = selected
        .into_iter()
        .map(|name| run_suite(name, &registry, cfg.nonce))
        .collect();
    let report = RunReport::new(registry.describe(), cfg.nonce, suites);
    info!(
        cases = report.summary.cases,
        inconsistent = report.summary.inconsistent,
        harness_errors = report.summary.harness_errors,
        "run finished"
    );
    write_report_and_exit(&report, args.report_out.as_deref())
}

fn write_report_and_exit(report: &RunReport, report_out: Option<&Path>) -> Result<ExitCode> {
    let text = serde_json::to_string_pretty(report)?;
    if let Some(path) = report_out {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
        std::fs::write(path, format!("{text}\n"))
            .with_context(|| format!("write report: {}", path.display()))?;
    }
    println!("{text}");
    Ok(report.exit_code())
}

fn cmd_eval(cfg: HarnessConfig, args: EvalArgs) -> Result<ExitCode> {
    let runtimes_dir = cfg.resolve_runtimes_dir()?;
    let profile = RuntimeProfile::new(args.runtime, cfg.program(args.runtime), &runtimes_dir);
    let evaluator = Evaluator::from_profile(&profile);
    let value = evaluator
        .eval(&args.expr)
        .with_context(|| format!("eval in {}", args.runtime))?;
    println!("{}", serde_json::to_string(&value)?);
    Ok(ExitCode::SUCCESS)
}
