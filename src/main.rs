use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Handle;
use tracing::info;

use cullspeed::logging::{init_tracing, level_for};
use cullspeed::triage::{MoveOutcome, Progress};
use cullspeed::{
    CancelToken, Config, Engine, EngineError, EngineResult, FolderSummary, Mark, SizeClass,
    ThumbnailOutcome,
};

/// Headless driver for the triage engine
#[derive(Parser)]
#[command(version, about = "Fast keep/reject triage for photo folders")]
struct Opts {
    /// Increase verbosity (-v, -vv). Default INFO.
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Decrease verbosity (-q). Each -q reduces level by one step.
    #[arg(short = 'q', action = clap::ArgAction::Count, global = true)]
    quiet: u8,
    /// Read settings from this file instead of the standard location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a folder's images and their marks
    Scan { folder: PathBuf },
    /// Mark files (keys as printed by `scan`)
    Mark {
        folder: PathBuf,
        #[arg(value_enum)]
        mark: MarkArg,
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Show the moves the current marks imply
    Plan { folder: PathBuf },
    /// Perform the planned moves
    Apply {
        folder: PathBuf,
        /// Confirm the plan; without it nothing is moved
        #[arg(long)]
        yes: bool,
    },
    /// Decode every preview ahead of time
    Warm {
        folder: PathBuf,
        /// Warm focused-view previews instead of thumbnails
        #[arg(long)]
        display: bool,
    },
    /// Reopen the last folder
    Resume,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum MarkArg {
    Keep,
    Reject,
    Clear,
}

impl From<MarkArg> for Mark {
    fn from(arg: MarkArg) -> Self {
        match arg {
            MarkArg::Keep => Mark::Keep,
            MarkArg::Reject => Mark::Reject,
            MarkArg::Clear => Mark::Unmarked,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let opts = Opts::parse();
    init_tracing(level_for(opts.verbose, opts.quiet));

    let config = match &opts.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let mut engine = Engine::new(config, Handle::current());

    match run(&mut engine, opts.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(engine: &mut Engine, command: Command) -> EngineResult<()> {
    match command {
        Command::Scan { folder } => {
            let summary = engine.open_folder(&folder);
            print_summary(&summary);
            for file in engine.files()? {
                println!("  {:<10} {}", format!("{:?}", engine.mark_of(&file.key)?), file.key);
            }
        }
        Command::Mark { folder, mark, files } => {
            engine.open_folder(&folder);
            let mark = Mark::from(mark);
            for key in &files {
                if engine.set_mark(key, mark)? {
                    println!("{} -> {:?}", key, mark);
                }
            }
        }
        Command::Plan { folder } => {
            engine.open_folder(&folder);
            print_plan(engine)?;
        }
        Command::Apply { folder, yes } => {
            engine.open_folder(&folder);
            let total = print_plan(engine)?;
            if total == 0 {
                return Ok(());
            }
            if !yes {
                println!("Nothing moved. Re-run with --yes to confirm.");
                return Ok(());
            }

            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Progress>();
            let printer = tokio::spawn(async move {
                while let Some(p) = rx.recv().await {
                    info!("[{}/{}] {}", p.done, p.total, p.key);
                }
            });
            let report = engine
                .confirm_and_execute_plan(CancelToken::new(), Some(tx))
                .await?;
            let _ = printer.await;

            for result in &report.results {
                match &result.outcome {
                    MoveOutcome::Moved { destination, renamed: true } => {
                        println!("{} -> {} (renamed)", result.item.identity.key, destination.display())
                    }
                    MoveOutcome::Failed(failure) => {
                        println!("FAILED {}: {}", result.item.identity.key, failure)
                    }
                    _ => {}
                }
            }
            println!(
                "{} moved, {} failed, {} unchanged",
                report.moved_count(),
                report.failed_count(),
                report.unchanged
            );
            if report.failed_count() > 0 {
                return Err(EngineError::PartialFailure(report.failed_count()));
            }
        }
        Command::Warm { folder, display } => {
            engine.open_folder(&folder);
            let size = if display { SizeClass::Display } else { SizeClass::Thumbnail };
            let files = engine.files()?.to_vec();

            let (mut ready, mut failed) = (0usize, 0usize);
            for file in &files {
                match engine.thumbnail(file, size).await {
                    ThumbnailOutcome::Ready(_) => ready += 1,
                    ThumbnailOutcome::Failed(err) => {
                        failed += 1;
                        println!("FAILED {}: {}", file.key, err);
                    }
                    ThumbnailOutcome::Cancelled => {}
                }
            }
            let stats = engine.cache_stats();
            println!(
                "{} ready, {} failed ({} in memory, {} persisted)",
                ready,
                failed,
                stats.memory_entries,
                stats.disk_entries.unwrap_or(0)
            );
        }
        Command::Resume => match engine.resume() {
            Some((summary, index)) => {
                print_summary(&summary);
                if let Some(file) = engine.files()?.get(index) {
                    println!("Resume at #{}: {}", index + 1, file.key);
                }
            }
            None => println!("No previous folder to resume"),
        },
    }
    Ok(())
}

fn print_summary(summary: &FolderSummary) {
    println!("{}", summary.folder.display());
    println!(
        "{} images: {} keep, {} reject, {} unmarked",
        summary.files, summary.counts.keep, summary.counts.reject, summary.counts.unmarked
    );
    for warning in &summary.enumeration_warnings {
        println!("warning: {}", warning);
    }
    for warning in &summary.persistence_warnings {
        println!("warning: {}", warning);
    }
}

fn print_plan(engine: &mut Engine) -> EngineResult<usize> {
    let plan = engine.get_plan_preview()?;
    if plan.is_empty() {
        println!("No file movements needed.");
        return Ok(0);
    }
    println!(
        "{} moves: {} -> _KEEPS, {} -> _REJECTS, {} -> root",
        plan.total_moves(),
        plan.to_keeps,
        plan.to_rejects,
        plan.to_root
    );
    for item in &plan.items {
        println!("  {} -> {:?}", item.identity.key, item.destination);
    }
    Ok(plan.total_moves())
}
