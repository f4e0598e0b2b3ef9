//! CLI binary for running Sluice tasks.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{ArgAction, CommandFactory, FromArgMatches, Parser};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use sluice_engine::{
    default_loader, dump_path, session_path, CliFlag, Config, FailureLog, RunOptions, Runner,
    SessionStore,
};

#[derive(Parser)]
#[command(
    name = "sluice",
    version,
    about = "Plugin-driven feed processor: read sources, filter entries, hand the rest on"
)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Dry run: decide entries but download nothing and save no session
    #[arg(long, conflicts_with = "learn")]
    test: bool,

    /// Check the configuration and exit without running tasks
    #[arg(long, visible_alias = "validate")]
    check: bool,

    /// Skip the download stage but let plugins mark entries processed
    #[arg(long)]
    learn: bool,

    /// Recreate the session from scratch (implies --learn)
    #[arg(long)]
    reset: bool,

    /// Run only the named task (case-insensitive)
    #[arg(long, value_name = "NAME")]
    task: Option<String>,

    /// Ask caching plugins to bypass their caches
    #[arg(long)]
    no_cache: bool,

    /// List recently failed entries and exit
    #[arg(long)]
    failed: bool,

    /// Forget all failed entries and exit
    #[arg(long)]
    clear_failed: bool,

    /// List loaded plugins and exit
    #[arg(long)]
    list: bool,

    /// Print a plugin's documentation and exit
    #[arg(long, value_name = "NAME")]
    doc: Option<String>,

    /// Write a readable session snapshot next to the config after the run
    #[arg(long)]
    dump: bool,

    /// Scheduled-run mode: keep the console quiet, log to file only
    #[arg(long)]
    cron: bool,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Plugins load before argument parsing so the flags they request can
    // be injected, and logging must exist before plugins load. Peek at
    // the raw arguments for the flags that shape logging and for the
    // config location the log file lands beside.
    let raw: Vec<String> = std::env::args().collect();
    let (debug, cron, early_config) = early_args(&raw);
    let _log_guard = init_logging(debug, cron, log_directory(&early_config));

    let runner = Runner::load(&default_loader())?;

    let (command, injected) = inject_plugin_flags(Cli::command(), &runner.load_report().cli_flags);
    let matches = command.get_matches();
    let cli = Cli::from_arg_matches(&matches)?;
    let plugin_flags: HashMap<String, bool> = injected
        .into_iter()
        .map(|name| {
            let value = matches.get_flag(&name);
            (name, value)
        })
        .collect();

    if cli.list {
        return cmd_list(&runner, cli.debug);
    }
    if let Some(ref name) = cli.doc {
        return cmd_doc(&runner, name);
    }

    let session_file = session_path(&cli.config);
    if cli.failed || cli.clear_failed {
        return cmd_failed(&session_file, cli.clear_failed, cli.reset, cli.learn).await;
    }

    let text = tokio::fs::read_to_string(&cli.config)
        .await
        .with_context(|| format!("cannot read configuration {}", cli.config.display()))?;
    let config: Config = serde_json::from_str(&text)
        .with_context(|| format!("configuration {} is not valid JSON", cli.config.display()))?;

    let options = RunOptions {
        test: cli.test,
        learn: cli.learn,
        reset: cli.reset,
        validate_only: cli.check,
        task: cli.task.clone(),
        dump: cli.dump.then(|| dump_path(&cli.config)),
        no_cache: cli.no_cache,
        plugin_flags,
    };

    let session = if cli.test {
        SessionStore::open_volatile(&session_file, cli.reset).await?
    } else {
        SessionStore::open(&session_file, cli.reset).await?
    };

    let summary = runner.run(&config, &session, &options).await?;

    if cli.check {
        println!("Configuration check passed");
    } else if !cli.cron {
        let aborted = if summary.aborted > 0 {
            format!(", {} aborted", summary.aborted)
        } else {
            String::new()
        };
        println!(
            "{} task(s) run: {} accepted, {} rejected, {} failed{}",
            summary.executed, summary.accepted, summary.rejected, summary.failed, aborted
        );
    }
    Ok(())
}

/// Logging starts before clap runs (plugin flags have to be injected
/// first), so the flags that shape it and the config location are read
/// straight from the raw arguments.
fn early_args(args: &[String]) -> (bool, bool, PathBuf) {
    let debug = args.iter().any(|a| a == "--debug");
    let cron = args.iter().any(|a| a == "--cron");
    let mut config = PathBuf::from("config.json");
    for (i, arg) in args.iter().enumerate() {
        if arg == "-c" || arg == "--config" {
            if let Some(value) = args.get(i + 1) {
                config = PathBuf::from(value);
            }
        } else if let Some(value) = arg.strip_prefix("--config=") {
            config = PathBuf::from(value);
        }
    }
    (debug, cron, config)
}

fn log_directory(config: &Path) -> &Path {
    match config.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Appends plugin-requested flags to the argument set, dropping any
/// whose name collides with a built-in flag. Returns the names that
/// made it in so their values can be read back after parsing.
fn inject_plugin_flags(
    mut command: clap::Command,
    flags: &[CliFlag],
) -> (clap::Command, Vec<String>) {
    let reserved: HashSet<String> = command
        .get_arguments()
        .map(|a| a.get_id().to_string())
        .collect();
    let mut injected = Vec::new();
    for flag in flags {
        if reserved.contains(&flag.name) {
            tracing::warn!(flag = %flag.name, "Plugin flag collides with a built-in one, ignored");
            continue;
        }
        command = command.arg(
            clap::Arg::new(flag.name.clone())
                .long(flag.name.clone())
                .help(flag.help.clone())
                .action(ArgAction::SetTrue),
        );
        injected.push(flag.name.clone());
    }
    (command, injected)
}

/// Console plus file output; `--cron` drops the console layer so
/// scheduler mail stays empty. The returned guard must live as long as
/// the process or buffered file output is lost.
fn init_logging(
    debug: bool,
    cron: bool,
    log_dir: &Path,
) -> tracing_appender::non_blocking::WorkerGuard {
    let level = if debug { "debug" } else { "info" };
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never(log_dir, "sluice.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(filter());

    if cron {
        tracing_subscriber::registry().with(file_layer).init();
    } else {
        let console_layer = fmt::layer().with_filter(filter());
        tracing_subscriber::registry()
            .with(file_layer)
            .with(console_layer)
            .init();
    }
    guard
}

fn cmd_list(runner: &Runner, show_debug: bool) -> anyhow::Result<()> {
    println!("{:<18} {:<34} {}", "Plugin", "Events", "Flags");
    println!("{}", "-".repeat(64));
    let mut listed = 0;
    for record in runner.registry().iter() {
        if record.debug && !show_debug {
            continue;
        }
        let events = record.instance.handled_events().join(", ");
        let mut flags: Vec<&str> = Vec::new();
        if record.builtin {
            flags.push("builtin");
        }
        if record.debug {
            flags.push("debug");
        }
        if !record.instance.about().is_empty() {
            flags.push("doc");
        }
        println!("{:<18} {:<34} {}", record.name, events, flags.join(", "));
        listed += 1;
    }
    println!("{}", "-".repeat(64));
    println!("{listed} plugins loaded");
    Ok(())
}

fn cmd_doc(runner: &Runner, name: &str) -> anyhow::Result<()> {
    let Ok(record) = runner.registry().by_name(name) else {
        println!("Unknown plugin '{name}'");
        std::process::exit(1);
    };
    let text = record.instance.about();
    if text.is_empty() {
        println!("Plugin '{name}' has no documentation");
    } else {
        println!("{text}");
    }
    Ok(())
}

async fn cmd_failed(
    session_file: &Path,
    clear: bool,
    reset: bool,
    learn: bool,
) -> anyhow::Result<()> {
    let session = SessionStore::open(session_file, reset).await?;
    session.version_check(learn || reset).await?;
    let ledger = FailureLog::new(session.clone());
    if clear {
        let cleared = ledger.clear().await?;
        session.close().await?;
        println!("Cleared {cleared} failed entries");
        return Ok(());
    }
    let records = ledger.list().await;
    if records.is_empty() {
        println!("No failed entries");
        return Ok(());
    }
    for record in records {
        println!(
            "{}  {}  ({})",
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.title,
            record.url
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
