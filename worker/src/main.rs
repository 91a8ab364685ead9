//! Build worker CLI.
//!
//! Runs one work order per invocation: prepare the workspace, synchronize the
//! source with git, run the package's unit tests, and optionally mail a
//! summary. Progress goes to stdout; diagnostics go to stderr via `RUST_LOG`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use worker::core::path::workspace_slug;
use worker::core::summary::{Summary, summarize};
use worker::exit_codes;
use worker::io::config::{WorkerConfig, load_config, write_config};
use worker::io::discovery::TestPackages;
use worker::io::mail::{MailNotifier, Notifier, SendmailMailer};
use worker::io::output::OutputSink;
use worker::logging;
use worker::order::{WorkOrder, WorkOrderRequest};
use worker::pipeline::run_work_order;

#[derive(Parser)]
#[command(
    name = "worker",
    version,
    about = "Prepare a workspace, sync from git and run unit tests for one package"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "worker.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one work order.
    Run(RunArgs),
    /// List the test packages under a directory.
    Packages {
        dir: PathBuf,
    },
    /// Write the default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Repository location passed to `git clone`.
    #[arg(long)]
    repo: String,
    /// Package identifier, e.g. `github.com/acme/billing`.
    #[arg(long)]
    package: String,
    #[arg(long)]
    branch: String,
    /// Target environment (used in notifications).
    #[arg(long = "env")]
    environment: String,
    #[arg(long, default_value = "0")]
    build_number: String,
    /// Story or ticket id released by this build; repeatable.
    #[arg(long = "story")]
    stories: Vec<String>,
    /// Mail the summary when the order finishes.
    #[arg(long)]
    notify: bool,
    /// Write the summary record as JSON to this file, apart from the progress stream.
    #[arg(long, value_name = "PATH")]
    summary_json: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    logging::init();
    match cli.command {
        Command::Run(args) => cmd_run(&cli.config, args),
        Command::Packages { dir } => cmd_packages(&cli.config, &dir),
        Command::InitConfig { force } => cmd_init_config(&cli.config, force),
    }
}

fn cmd_run(config_path: &Path, args: RunArgs) -> Result<i32> {
    let Some(cfg) = load_or_report(config_path) else {
        return Ok(exit_codes::INVALID);
    };

    let request = WorkOrderRequest {
        repo: args.repo,
        package: args.package,
        branch: args.branch,
        environment: args.environment.clone(),
        build_number: args.build_number,
    };
    let order = match WorkOrder::new(request, &cfg.base_dir) {
        Ok(order) => order,
        Err(err) => {
            eprintln!("invalid --package: {err}");
            return Ok(exit_codes::INVALID);
        }
    };

    let sink = open_sink(&cfg, &order)?;
    let completed = run_work_order(
        order,
        &sink,
        &cfg.git_cli(),
        &cfg.test_invoker(),
        &cfg.test_file_matcher(),
    );
    let failed = completed.failed;

    let summary = summarize(&args.environment, &args.stories, std::slice::from_ref(&completed));
    if let Some(path) = &args.summary_json {
        write_summary(path, &summary)?;
    }
    if args.notify {
        let mailer = SendmailMailer::new(&cfg.mail.sendmail_program)
            .with_timeout(cfg.command_timeout());
        let notifier = MailNotifier::new(cfg.mail.clone(), mailer)?;
        notifier
            .notify(&args.environment, &summary)
            .context("send notification")?;
    }

    Ok(if failed {
        exit_codes::FAILED
    } else {
        exit_codes::OK
    })
}

fn write_summary(path: &Path, summary: &Summary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("serialize summary")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, format!("{json}\n")).with_context(|| format!("write {}", path.display()))
}

fn cmd_packages(config_path: &Path, dir: &Path) -> Result<i32> {
    let Some(cfg) = load_or_report(config_path) else {
        return Ok(exit_codes::INVALID);
    };
    let packages = TestPackages::new(dir, cfg.test_file_matcher());
    for package in &packages {
        let package = package.with_context(|| format!("discover packages in {}", dir.display()))?;
        println!("{}", package.id);
    }
    Ok(exit_codes::OK)
}

fn cmd_init_config(config_path: &Path, force: bool) -> Result<i32> {
    if !force && config_path.exists() {
        eprintln!(
            "{} already exists; pass --force to overwrite",
            config_path.display()
        );
        return Ok(exit_codes::INVALID);
    }
    write_config(config_path, &WorkerConfig::default())?;
    println!("{}", config_path.display());
    Ok(exit_codes::OK)
}

fn load_or_report(path: &Path) -> Option<WorkerConfig> {
    match load_config(path) {
        Ok(cfg) => Some(cfg),
        Err(err) => {
            eprintln!("{:#}", err);
            None
        }
    }
}

/// Stdout, plus the per-order log file when `log_dir` is configured.
fn open_sink(cfg: &WorkerConfig, order: &WorkOrder) -> Result<OutputSink> {
    let sink = OutputSink::stdout();
    let Some(log_dir) = &cfg.log_dir else {
        return Ok(sink);
    };
    let path = log_dir.join(format!(
        "{}-{}.log",
        workspace_slug(&order.package),
        order.build_number
    ));
    let file =
        OutputSink::open_log(&path).with_context(|| format!("open log {}", path.display()))?;
    Ok(sink.tee(file))
}
