use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use atty::Stream;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use solidpak::storage::{MAX_LEVEL, MAX_WINDOW_LOG};
use solidpak::{
    build_to_path, collect_dir, extract_at, list_members_at, BuildConfig, CompressionProfile,
    DirectorySinks, MemberDescriptor, MemberKind, ProgressTracker, ReadConfig, Selection,
    DEFAULT_PROGRESS_INTERVAL,
};

#[derive(Parser)]
#[command(name = "solidpak", version, about = "Solid deduplicating archive tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack every regular file under a directory into one container
    Build {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// zstd compression level
        #[arg(long, default_value_t = MAX_LEVEL)]
        level: i32,
        /// log2 of the compression window (10..=27)
        #[arg(long, default_value_t = MAX_WINDOW_LOG)]
        window_log: u32,
        /// Hashing threads (default: available parallelism)
        #[arg(long)]
        jobs: Option<usize>,
        #[arg(long)]
        no_progress: bool,
    },
    /// Print the member index
    List {
        #[arg(long)]
        archive: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Write members below an output directory
    Extract {
        #[arg(long)]
        archive: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Member to extract; repeat for several (default: all)
        #[arg(long = "member")]
        members: Vec<String>,
        #[arg(long)]
        no_progress: bool,
    },
    /// Decompress the whole container and check every digest and checksum
    Verify {
        #[arg(long)]
        archive: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Build {
            input,
            output,
            level,
            window_log,
            jobs,
            no_progress,
        } => cmd_build(&input, &output, level, window_log, jobs, no_progress),
        Commands::List { archive, json } => cmd_list(&archive, json),
        Commands::Extract {
            archive,
            output,
            members,
            no_progress,
        } => cmd_extract(&archive, &output, members, no_progress),
        Commands::Verify { archive } => cmd_verify(&archive),
    }
}

fn cmd_build(
    input: &Path,
    output: &Path,
    level: i32,
    window_log: u32,
    jobs: Option<usize>,
    no_progress: bool,
) -> Result<()> {
    let sources = collect_dir(input)
        .with_context(|| format!("failed to walk {}", input.display()))?;

    let mut config = BuildConfig::new();
    config.profile = CompressionProfile::default()
        .with_level(level)
        .with_window_log(window_log);
    if let Some(jobs) = jobs {
        config.scan_workers = jobs;
    }

    let bar = progress_bar("build", no_progress);
    let mut observer = bar.clone().map(feed_bar);
    let mut progress = tracker(&mut observer);
    let report = build_to_path(&sources, output, &config, &mut progress)
        .with_context(|| format!("failed to build {}", output.display()))?;
    finish_bar(bar);

    for skipped in &report.skipped {
        eprintln!("skipped {}: {}", skipped.name, skipped.error);
    }
    println!(
        "{}: {} data, {} links, {} payload bytes -> {} bytes",
        output.display(),
        report.data_records,
        report.link_records,
        report.payload_bytes,
        report.bytes_written
    );
    Ok(())
}

fn cmd_list(archive: &Path, json: bool) -> Result<()> {
    let members = list_members_at(archive)
        .with_context(|| format!("failed to list {}", archive.display()))?;

    let mut out = io::BufWriter::new(io::stdout().lock());
    if json {
        serde_json::to_writer_pretty(&mut out, &members)?;
        writeln!(out)?;
    } else {
        for member in &members {
            write_member(&mut out, member)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn write_member(out: &mut impl Write, member: &MemberDescriptor) -> io::Result<()> {
    match &member.kind {
        MemberKind::Data { size } => writeln!(out, "data {size:>12}  {}", member.name),
        MemberKind::Link { target, size } => {
            writeln!(out, "link {size:>12}  {} -> {target}", member.name)
        }
    }
}

fn cmd_extract(archive: &Path, output: &Path, members: Vec<String>, no_progress: bool) -> Result<()> {
    let selection = if members.is_empty() {
        Selection::All
    } else {
        Selection::names(members)
    };

    let bar = progress_bar("extract", no_progress);
    let mut observer = bar.clone().map(feed_bar);
    let mut progress = tracker(&mut observer);
    let count = extract_at(
        archive,
        selection,
        DirectorySinks::new(output),
        &ReadConfig::default(),
        &mut progress,
    )
    .with_context(|| format!("failed to extract {}", archive.display()))?;
    finish_bar(bar);

    println!("extracted {count} members into {}", output.display());
    Ok(())
}

fn cmd_verify(archive: &Path) -> Result<()> {
    let members = list_members_at(archive)
        .with_context(|| format!("{} failed verification", archive.display()))?;
    let links = members.iter().filter(|m| m.link_target().is_some()).count();
    let bytes: u64 = members
        .iter()
        .filter(|m| m.link_target().is_none())
        .map(MemberDescriptor::size)
        .sum();
    println!(
        "{}: ok, {} members ({} links), {} stored bytes",
        archive.display(),
        members.len(),
        links,
        bytes
    );
    Ok(())
}

fn progress_allowed(no_progress: bool) -> bool {
    !no_progress && atty::is(Stream::Stderr)
}

/// Starts as a byte spinner; becomes a bar once a total is reported.
fn progress_bar(label: &'static str, no_progress: bool) -> Option<ProgressBar> {
    if !progress_allowed(no_progress) {
        return None;
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {bytes}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_prefix(label);
    bar.enable_steady_tick(Duration::from_millis(120));
    Some(bar)
}

fn feed_bar(bar: ProgressBar) -> impl FnMut(u64, Option<u64>) {
    move |processed, total| {
        if let Some(total) = total {
            if bar.length() != Some(total) {
                bar.set_length(total);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{prefix:.bold} [{bar:40}] {bytes}/{total_bytes} ({eta})",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
            }
        }
        bar.set_position(processed);
    }
}

fn tracker<'a, F: FnMut(u64, Option<u64>)>(observer: &'a mut Option<F>) -> ProgressTracker<'a> {
    match observer {
        Some(observer) => ProgressTracker::new(observer, DEFAULT_PROGRESS_INTERVAL),
        None => ProgressTracker::disabled(),
    }
}

fn finish_bar(bar: Option<ProgressBar>) {
    if let Some(bar) = bar {
        bar.finish();
    }
}
