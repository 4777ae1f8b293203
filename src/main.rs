//! CLI entry point for `msg2pdf`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use msg2pdf::batch::{self, BatchOptions};
use msg2pdf::convert::{CancelToken, ConvertOptions, Converter};
use msg2pdf::model::report::{BatchReport, Outcome};

#[derive(Parser)]
#[command(name = "msg2pdf", version)]
#[command(about = "Convert Outlook MSG files to self-contained PDFs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a single MSG file to PDF
    Convert {
        /// The MSG file
        msg_file: PathBuf,
        /// Output directory (default: same as input file)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Don't merge attachments into the PDF (email only)
        #[arg(long)]
        no_merge: bool,
        /// Don't prepend the source-filename banner page
        #[arg(long)]
        no_source: bool,
    },
    /// Batch convert all MSG files in a directory
    Batch {
        /// Directory to search for MSG files
        input_dir: PathBuf,
        /// Output directory for the PDFs
        #[arg(short, long)]
        output: PathBuf,
        /// Search subdirectories
        #[arg(short, long)]
        recursive: bool,
        /// Number of concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,
        /// Don't merge attachments into the PDFs (email only)
        #[arg(long)]
        no_merge: bool,
        /// Don't prepend source-filename banner pages
        #[arg(long)]
        no_source: bool,
        /// Print the batch report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show information about an MSG file without converting
    Info {
        /// The MSG file
        msg_file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = msg2pdf::config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Convert {
            msg_file,
            output,
            no_merge,
            no_source,
        } => cmd_convert(&msg_file, output, no_merge, no_source, &config),
        Commands::Batch {
            input_dir,
            output,
            recursive,
            workers,
            no_merge,
            no_source,
            json,
        } => cmd_batch(
            &input_dir, &output, recursive, workers, no_merge, no_source, json, &config,
        ),
        Commands::Info { msg_file, json } => cmd_info(&msg_file, json),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &msg2pdf::config::Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_dir = msg2pdf::config::log_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "msg2pdf.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "msg2pdf", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Convert a single file.
fn cmd_convert(
    msg_file: &Path,
    output: Option<PathBuf>,
    no_merge: bool,
    no_source: bool,
    config: &msg2pdf::config::Config,
) -> anyhow::Result<()> {
    if !msg_file.exists() {
        anyhow::bail!("File not found: {}", msg_file.display());
    }

    // Output defaults: flag, then config, then the source file's directory.
    let output_dir = output
        .or_else(|| config.convert.default_output_dir.clone())
        .unwrap_or_else(|| {
            msg_file
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        });

    let options = ConvertOptions {
        merge_attachments: !no_merge && config.convert.merge_attachments,
        show_source_banner: !no_source && config.convert.show_source_banner,
        output_dir,
    };

    let converter = Converter::new();
    let result = converter.convert_file(msg_file, &options, &CancelToken::new());

    for warning in &result.warnings {
        eprintln!("  ! {warning}");
    }

    match &result.outcome {
        Outcome::Succeeded { output, bytes, pages } => {
            use humansize::{format_size, BINARY};
            println!(
                "  Created: {} ({}, {} page(s))",
                output.display(),
                format_size(*bytes, BINARY),
                pages
            );
            Ok(())
        }
        Outcome::Failed { message, .. } => anyhow::bail!("{message}"),
        Outcome::Cancelled => anyhow::bail!("conversion cancelled"),
    }
}

/// Batch convert a directory.
#[allow(clippy::too_many_arguments)]
fn cmd_batch(
    input_dir: &Path,
    output: &Path,
    recursive: bool,
    workers: Option<usize>,
    no_merge: bool,
    no_source: bool,
    json: bool,
    config: &msg2pdf::config::Config,
) -> anyhow::Result<()> {
    if !input_dir.exists() {
        anyhow::bail!("Directory not found: {}", input_dir.display());
    }

    let options = BatchOptions {
        recursive: recursive || config.batch.recursive,
        workers: workers.unwrap_or(config.batch.workers),
        convert: ConvertOptions {
            merge_attachments: !no_merge && config.convert.merge_attachments,
            show_source_banner: !no_source && config.convert.show_source_banner,
            output_dir: output.to_path_buf(),
        },
    };

    let files = batch::discover_files(input_dir, options.recursive)?;
    if files.is_empty() {
        println!("No MSG files found in {}", input_dir.display());
        return Ok(());
    }
    if !json {
        println!("Found {} MSG file(s)", files.len());
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Converting [{bar:40.cyan/blue}] {pos}/{len}")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let converter = Converter::new();
    let report = batch::run_files(
        &converter,
        &files,
        &options,
        &CancelToken::new(),
        Some(&|done, _total| pb.set_position(done as u64)),
    )?;
    pb.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_batch_summary(&report, start.elapsed());
    }

    if report.failed() > 0 {
        anyhow::bail!("{} file(s) failed", report.failed());
    }
    Ok(())
}

/// Print the human-readable batch summary: one line per file in discovery
/// order, then the totals.
fn print_batch_summary(report: &BatchReport, elapsed: std::time::Duration) {
    println!();
    for result in &report.results {
        match &result.outcome {
            Outcome::Succeeded { pages, .. } => {
                println!("  ok {} ({} page(s))", result.source.display(), pages);
            }
            Outcome::Failed { kind, message } => {
                println!("  x  {}: {kind:?}: {message}", result.source.display());
            }
            Outcome::Cancelled => {
                println!("  -  {}: cancelled", result.source.display());
            }
        }
        for warning in &result.warnings {
            println!("     ! {warning}");
        }
    }

    println!();
    println!(
        "Completed: {}/{} successful in {:.2?}",
        report.succeeded(),
        report.total(),
        elapsed
    );
    if report.cancelled() > 0 {
        println!("Cancelled: {} file(s)", report.cancelled());
    }
}

/// Display information about an MSG file without converting.
fn cmd_info(msg_file: &Path, json: bool) -> anyhow::Result<()> {
    if !msg_file.exists() {
        anyhow::bail!("File not found: {}", msg_file.display());
    }

    let converter = Converter::new();
    let inspection = converter.inspect(msg_file)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
        return Ok(());
    }

    println!("Subject:  {}", inspection.subject);
    println!("From:     {}", inspection.from);
    if !inspection.to.is_empty() {
        println!("To:       {}", inspection.to);
    }
    if !inspection.cc.is_empty() {
        println!("Cc:       {}", inspection.cc);
    }
    if let Some(date) = &inspection.date {
        println!("Date:     {date}");
    }
    println!();
    println!(
        "Body:     {} ({} chars){}",
        inspection.body.variant,
        inspection.body.chars,
        if inspection.body.has_rtf {
            ", RTF variant present"
        } else {
            ""
        }
    );

    if !inspection.attachments.is_empty() {
        use humansize::{format_size, BINARY};
        println!();
        println!("Attachments ({}):", inspection.attachments.len());
        for att in &inspection.attachments {
            let mut markers = String::new();
            if att.inline {
                markers.push_str(" [inline]");
            }
            if att.embedded {
                markers.push_str(" [embedded message]");
            }
            let disposition = att
                .disposition
                .map(|d| format!(" -> {d}"))
                .unwrap_or_default();
            println!(
                "  - {} ({}, {}){}{}",
                att.filename,
                att.content_type,
                format_size(att.size, BINARY),
                markers,
                disposition
            );
        }
    }

    Ok(())
}
