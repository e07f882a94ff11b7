use anyhow::{Context, Result};
use batch::{
    cancel,
    config::normalize_extension,
    lifecycle::build_ffmpeg_args,
    scan, BatchConfig, BatchError, BatchOptions, BatchRunner, BatchSummary, CancellationCoordinator,
    JobStatus, TerminalStatus,
};
use clap::Parser;
use crossterm::style::Stylize;
use humansize::{format_size, DECIMAL};
use log::{debug, info};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Run ffmpeg over a batch of files, one at a time
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Copy timestamps from input to output file
    #[arg(long)]
    tscopy: bool,

    /// Move original input files to this directory after processing
    #[arg(long = "move", value_name = "DIR")]
    move_dir: Option<PathBuf>,

    /// Regular expression to filter input files
    #[arg(long, value_name = "PATTERN")]
    rgx: Option<String>,

    /// Output file extension (none when omitted)
    #[arg(long, default_value = "")]
    ext: String,

    /// Write outputs here instead of next to each input
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Include files in subdirectories
    #[arg(short, long)]
    recursive: bool,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    yes: bool,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Input file or directory
    input: PathBuf,

    /// FFmpeg parameters placed between input and output, forwarded as-is
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    ffmpeg_params: Vec<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    if let Err(e) = run(args).await {
        println!("{}", format!("\nError: {:#}\n", e).red());
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let cfg = BatchConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    debug!("Configuration: {:?}", cfg);

    let inputs = scan::collect_inputs(&args.input, args.recursive, args.rgx.as_deref())?;
    let options = BatchOptions {
        input_root: inputs.root.clone(),
        output_ext: normalize_extension(&args.ext),
        output_dir: args.output_dir.clone(),
        move_dir: args.move_dir.clone(),
        copy_timestamps: args.tscopy,
        ffmpeg_params: args.ffmpeg_params.clone(),
    };
    options.validate()?;

    if !args.yes && !confirm(&inputs.files, &options)? {
        println!("Operation cancelled.");
        return Ok(());
    }

    let coordinator = Arc::new(CancellationCoordinator::new());
    let _interrupts = cancel::listen_for_interrupt(coordinator.clone());

    println!("\nProcessing files:");
    let status = Arc::new(TerminalStatus::new(cfg.status_name_width));
    let runner = BatchRunner::new(cfg, options, coordinator, status);

    let summary = match runner.run(&inputs.files).await {
        Ok(summary) => summary,
        Err(e @ BatchError::Spawn { .. }) => {
            // the status line of the job that failed to start is still open
            println!();
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    print_summary(&summary);
    Ok(())
}

/// List what is about to happen and ask for a `y`
fn confirm(files: &[PathBuf], options: &BatchOptions) -> Result<bool> {
    let plural = if files.len() == 1 { "" } else { "s" };
    println!(
        "{}",
        format!("Confirm processing of following {} file{}:", files.len(), plural).yellow()
    );
    for f in files {
        println!("  - {}", f.display().to_string().yellow());
    }

    let yes_no = |on: bool| if on { "Yes".green() } else { "No".red() };
    let dir_or_none = |dir: &Option<PathBuf>| match dir {
        Some(d) => d.display().to_string().cyan(),
        None => "None".to_string().red(),
    };
    let ext = if options.output_ext.is_empty() {
        "None".to_string().red()
    } else {
        options.output_ext.clone().cyan()
    };
    let shape: Vec<String> = build_ffmpeg_args(
        Path::new("[input]"),
        &options.ffmpeg_params,
        Path::new(&format!("[output]{}", options.output_ext)),
    )
    .iter()
    .map(|a| a.to_string_lossy().into_owned())
    .collect();

    println!("\nOptions:");
    println!("  - Copy timestamps: {}", yes_no(options.copy_timestamps));
    println!("  - Move directory: {}", dir_or_none(&options.move_dir));
    println!("  - Output directory: {}", dir_or_none(&options.output_dir));
    println!("  - Output extension: {}", ext);
    println!("  - FFmpeg command: ffmpeg {}", shape.join(" ").cyan());

    print!("\nProceed? (y/n): ");
    std::io::stdout().flush().context("Failed to write prompt")?;

    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read answer")?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

fn print_summary(summary: &BatchSummary) {
    if summary.cancelled {
        println!("{}", "\nBatch cancelled.".magenta());
    } else {
        println!("\nAll files processed.");
    }

    let ok = summary.count(JobStatus::Succeeded);
    let failed = summary.count(JobStatus::Failed);
    let missing = summary.count(JobStatus::NotFound);
    let cancelled = summary.count(JobStatus::Cancelled);
    let total = format_size(summary.total_output_bytes(), DECIMAL);
    println!(
        "{} ok, {} failed, {} not found, {} cancelled ({} written)",
        ok, failed, missing, cancelled, total
    );
    info!("Batch finished: {} ok, {} failed, {} not found, {} cancelled", ok, failed, missing, cancelled);

    for reason in summary.jobs.iter().filter_map(|j| j.cleanup_error.as_deref()) {
        println!("{}", reason.red());
    }
}
