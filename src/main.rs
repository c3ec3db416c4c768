use chrono::Local;
use clap::{Args, Parser, Subcommand};
use colored::*;
use log::info;
use lprof_viewer::{
    function_names, function_views, line_details, parse_lprof_file, summarize_functions,
    total_time, write_csv, Snapshot, SnapshotError, SourceCache, SourceTable,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;
mod render;

#[derive(Args)]
struct InputArgs {
    /// Path to the .lprof snapshot
    #[arg(short = 'l', long)]
    lprof: PathBuf,

    /// Python sources to show next to the timings
    #[arg(short = 's', long = "source", num_args = 1..)]
    sources: Vec<PathBuf>,

    /// Only show the first N rows
    #[arg(short = 't', long)]
    top: Option<usize>,

    /// Print JSON instead of tables
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Per-function totals, slowest first
    Summary {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Per-line timings with their source code
    Lines {
        #[command(flatten)]
        input: InputArgs,

        /// Hide lines faster than this many seconds
        #[arg(short = 'm', long, default_value_t = 0.0)]
        min_time: f64,

        /// Also export the rows as CSV (defaults to a timestamped file name)
        #[arg(long)]
        csv: Option<Option<PathBuf>>,
    },
    /// Heat-map of one function's source
    Show {
        #[command(flatten)]
        input: InputArgs,

        /// Function name to show
        #[arg(short = 'f', long)]
        func: String,
    },
}

#[derive(Parser)]
#[command(
    name = "lprof-viewer",
    version = "0.1.0",
    about = "Inspect line_profiler snapshots against their Python sources"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

impl Commands {
    fn input(&self) -> &InputArgs {
        match self {
            Commands::Summary { input } => input,
            Commands::Lines { input, .. } => input,
            Commands::Show { input, .. } => input,
        }
    }
}

/// Decodes the snapshot, reporting the failure modes in distinct words.
///
/// An empty snapshot is not an error, so it exits successfully.
fn load_snapshot(input: &InputArgs) -> Result<Snapshot, ExitCode> {
    match parse_lprof_file(&input.lprof) {
        Ok(snapshot) => {
            render::print_skipped(&snapshot.skipped);
            Ok(snapshot)
        }
        Err(SnapshotError::Empty { skipped }) => {
            render::print_skipped(&skipped);
            println!(
                "{}",
                format!(
                    "====> {} was read, but no profiling data was found",
                    input.lprof.display()
                )
                .yellow()
            );
            Err(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!(
                "{}",
                format!("====> Error reading {}: {}", input.lprof.display(), e).red()
            );
            Err(ExitCode::FAILURE)
        }
    }
}

fn load_sources(input: &InputArgs) -> SourceTable {
    let (sources, failed) = SourceTable::from_files(&input.sources);
    for (path, e) in &failed {
        println!(
            "{}",
            format!("====> Could not read source {}: {}", path.display(), e).yellow()
        );
    }
    if sources.is_empty() {
        println!(
            "{}",
            "====> No sources given; looking for profiled files on disk".cyan()
        );
    }
    sources
}

fn run_summary(snapshot: &Snapshot, input: &InputArgs) -> Result<(), Box<dyn std::error::Error>> {
    let summaries = summarize_functions(&snapshot.records);
    if input.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        render::print_summary(&summaries, input.top);
        println!(
            "{}",
            format!(
                "====> {} functions, {:.6}s total",
                summaries.len(),
                total_time(&snapshot.records)
            )
            .green()
        );
    }
    Ok(())
}

fn run_lines(
    snapshot: &Snapshot,
    input: &InputArgs,
    min_time: f64,
    csv: Option<Option<PathBuf>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let sources = load_sources(input);
    let mut cache = SourceCache::new(&sources);
    let details = line_details(&snapshot.records, min_time, &mut cache);

    if input.json {
        println!("{}", serde_json::to_string_pretty(&details)?);
    } else {
        render::print_line_details(&details, input.top);
    }

    if let Some(path) = csv {
        let path = path.unwrap_or_else(|| {
            let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
            PathBuf::from(format!("profile_lines_{}.csv", timestamp))
        });
        let writer = BufWriter::new(File::create(&path)?);
        write_csv(&details, writer)?;
        info!("Wrote {} rows to {}", details.len(), path.display());
        println!(
            "{}",
            format!("====> Exported {} rows to {}", details.len(), path.display()).green()
        );
    }
    Ok(())
}

fn run_show(
    snapshot: &Snapshot,
    input: &InputArgs,
    func: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let sources = load_sources(input);
    let mut cache = SourceCache::new(&sources);
    let views = function_views(&snapshot.records, func, &mut cache);

    if views.is_empty() {
        let summaries = summarize_functions(&snapshot.records);
        return Err(format!(
            "No profiled function named {} (profiled: {})",
            func,
            function_names(&summaries).join(", ")
        )
        .into());
    }
    if input.json {
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }
    for view in views.iter().take(input.top.unwrap_or(usize::MAX)) {
        render::print_function_view(view);
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let snapshot = match load_snapshot(cli.command.input()) {
        Ok(snapshot) => snapshot,
        Err(code) => return code,
    };

    let result = match cli.command {
        Commands::Summary { input } => run_summary(&snapshot, &input),
        Commands::Lines {
            input,
            min_time,
            csv,
        } => run_lines(&snapshot, &input, min_time, csv),
        Commands::Show { input, func } => run_show(&snapshot, &input, &func),
    };

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", format!("====> Error: {}", e).red());
            ExitCode::FAILURE
        }
    }
}
