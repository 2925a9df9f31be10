use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use pagewalk::db;
use pagewalk::session::http::HttpLauncher;
use pagewalk::{ExtractionJob, Record, RunError, RunReport, SessionLauncher, Settings, Walker};

#[derive(Parser)]
#[command(name = "pagewalk", about = "Extract records from paginated pages via CSS selectors")]
struct Cli {
    /// Settings file (default: ./pagewalk.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job file and print the extracted records
    Run {
        /// Job definition (JSON)
        job: PathBuf,
        /// Drive a headless Chromium instead of plain HTTP
        #[arg(long)]
        browser: bool,
        /// Store the run in the history database
        #[arg(long)]
        save: bool,
        /// Write records here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long, value_enum, default_value = "json")]
        format: Format,
    },
    /// Check a job file without running it
    Validate {
        job: PathBuf,
    },
    /// List saved runs
    History {
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Print the records of a saved run
    Show {
        run_id: i64,
    },
    /// Show run history statistics
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Jsonl,
    Table,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Run {
            job,
            browser,
            save,
            output,
            format,
        } => {
            let job = load_job(&job)?;
            let started_at = Utc::now();
            let outcome = if browser {
                run_in_browser(&settings, &job).await?
            } else {
                run_with(HttpLauncher, &settings, &job).await
            };
            let finished_at = Utc::now();

            if save {
                let conn = db::connect(&settings.db_path)?;
                db::init_schema(&conn)?;
                let entry = db::RunEntry {
                    job: &job,
                    outcome: outcome.as_ref().map_err(|e| e.to_string()),
                    started_at,
                    finished_at,
                };
                let id = db::save_run(&conn, &entry)?;
                eprintln!("Saved as run #{}", id);
            }

            let report = outcome?;
            eprintln!(
                "{} record(s) from {} page(s), {} warning(s), stopped: {}",
                report.records.len(),
                report.pages_visited,
                report.warnings,
                report.stop.as_str()
            );
            let columns: Vec<&str> = job.fields.iter().map(|f| f.field_name.as_str()).collect();
            write_records(&report.records, &columns, format, output.as_deref())
        }
        Commands::Validate { job } => {
            let job = load_job(&job)?;
            println!(
                "OK: {} field(s), {}",
                job.fields.len(),
                match job.pagination.active_next_selector() {
                    Some(sel) => format!(
                        "up to {} page(s) via `{}`",
                        job.pagination.effective_max_pages(),
                        sel
                    ),
                    None => "single page".to_string(),
                }
            );
            Ok(())
        }
        Commands::History { limit } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let rows = db::fetch_runs(&conn, limit)?;
            if rows.is_empty() {
                println!("No saved runs. Use 'run --save' to record one.");
                return Ok(());
            }

            println!(
                "{:>5} | {:<20} | {:<6} | {:>5} | {:>7} | {:<16} | {:<40}",
                "#", "Started", "Status", "Pages", "Records", "Stop", "URL"
            );
            println!("{}", "-".repeat(115));
            for r in &rows {
                let started = r.started_at.get(..19).unwrap_or(&r.started_at);
                let stop = r.stop_reason.as_deref().unwrap_or("-");
                println!(
                    "{:>5} | {:<20} | {:<6} | {:>5} | {:>7} | {:<16} | {:<40}",
                    r.id,
                    started,
                    r.status,
                    r.pages_visited,
                    r.record_count,
                    stop,
                    truncate(&r.target_url, 40)
                );
            }

            let failed: Vec<_> = rows.iter().filter(|r| r.error.is_some()).collect();
            if !failed.is_empty() {
                println!("\n--- Errors ---");
                for r in &failed {
                    println!("  #{}: {}", r.id, r.error.as_deref().unwrap_or_default());
                }
            }
            Ok(())
        }
        Commands::Show { run_id } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            match db::fetch_records(&conn, run_id)? {
                Some(records) => {
                    println!("{}", serde_json::to_string_pretty(&records)?);
                    Ok(())
                }
                None => bail!("No run with id {}", run_id),
            }
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Runs:    {}", s.runs);
            println!("OK:      {}", s.ok);
            println!("Failed:  {}", s.failed);
            println!("Records: {}", s.records);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn load_job(path: &Path) -> anyhow::Result<ExtractionJob> {
    let job = ExtractionJob::from_path(path)?;
    job.validate()
        .with_context(|| format!("Job {} failed validation", path.display()))?;
    Ok(job)
}

async fn run_with<L: SessionLauncher>(
    launcher: L,
    settings: &Settings,
    job: &ExtractionJob,
) -> Result<RunReport, RunError> {
    let walker = Walker::with_options(launcher, settings.engine_options());
    info!(
        "Running {} field(s) against {}",
        job.fields.len(),
        job.target_url
    );
    walker.run_report(job).await
}

#[cfg(feature = "browser")]
async fn run_in_browser(
    settings: &Settings,
    job: &ExtractionJob,
) -> anyhow::Result<Result<RunReport, RunError>> {
    use pagewalk::session::browser::BrowserLauncher;
    Ok(run_with(BrowserLauncher::default(), settings, job).await)
}

#[cfg(not(feature = "browser"))]
async fn run_in_browser(
    _settings: &Settings,
    _job: &ExtractionJob,
) -> anyhow::Result<Result<RunReport, RunError>> {
    bail!("--browser requires building with `--features browser`")
}

fn write_records(
    records: &[Record],
    columns: &[&str],
    format: Format,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };

    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut out, records)?;
            writeln!(out)?;
        }
        Format::Jsonl => {
            for record in records {
                serde_json::to_writer(&mut out, record)?;
                writeln!(out)?;
            }
        }
        Format::Table => {
            let header: Vec<String> = columns.iter().map(|c| format!("{:<24}", truncate(c, 24))).collect();
            writeln!(out, "{:>4} | {}", "#", header.join(" | "))?;
            writeln!(out, "{}", "-".repeat(7 + columns.len() * 27))?;
            for (i, record) in records.iter().enumerate() {
                let cells: Vec<String> = columns
                    .iter()
                    .map(|c| format!("{:<24}", truncate(record.get(c).unwrap_or("-"), 24)))
                    .collect();
                writeln!(out, "{:>4} | {}", i + 1, cells.join(" | "))?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{:.1}s", d.as_secs_f64()),
        (0, _) => format!("{}m {}s", m, s),
        _ => format!("{}h {}m {}s", h, m, s),
    }
}
