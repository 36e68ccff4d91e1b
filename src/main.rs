use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use librarygain::analyzer::{self, MeasurementRecord};
use librarygain::batch::{BatchOptions, BatchReport, Orchestrator};
use librarygain::gain::{self, Mode};
use librarygain::scanner::{self, FileRecord};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "librarygain", version, about = "Batch loudness normalizer for audio libraries")]
struct Cli {
    /// ffmpeg binary to use for measurement and encoding
    #[arg(long, global = true)]
    ffmpeg: Option<String>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Each file is normalized toward the target on its own
    Independent,
    /// The whole batch moves by one delta anchored to its loudest file
    Album,
}

impl ModeArg {
    fn mode(self) -> Mode {
        match self {
            Self::Independent => Mode::Independent,
            Self::Album => Mode::Album,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List audio files under a folder without measuring anything
    Scan {
        /// Folders to scan (defaults to config file music_dirs)
        paths: Vec<PathBuf>,
    },

    /// Measure levels and loudness tags without changing any file
    Analyze {
        /// Folders to analyze (defaults to config file music_dirs)
        paths: Vec<PathBuf>,

        /// Number of parallel workers (0 = one per file)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Normalize files toward the target level
    Normalize {
        /// Folders to normalize; each folder is its own batch
        paths: Vec<PathBuf>,

        /// Target peak level in dB (default from config, -7.0)
        #[arg(long)]
        target: Option<f64>,

        /// Selection threshold in dB (default from config, 1.0)
        #[arg(long)]
        threshold: Option<f64>,

        /// Normalization mode
        #[arg(long, value_enum, default_value = "independent")]
        mode: ModeArg,

        /// Number of parallel analysis workers (0 = one per file)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Show the plan and selection without touching any file
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = librarygain::config::AppConfig::load();
    let ffmpeg = cli.ffmpeg.unwrap_or_else(|| config.ffmpeg_path.clone());

    match cli.command {
        Commands::Scan { paths } => {
            let roots = resolve_roots(paths, &config)?;
            for root in &roots {
                let files = scanner::scan(root).context("Scan failed")?;
                println!("{} ({} files)", root.display(), files.len());
                for file in &files {
                    println!(
                        "  {:<40} {:>10}  {}",
                        file.name,
                        human_size(file.size),
                        file.modified.as_deref().unwrap_or("(unknown)")
                    );
                }
            }
        }

        Commands::Analyze { paths, jobs } => {
            let roots = resolve_roots(paths, &config)?;
            let workers = if jobs > 0 { jobs } else { config.workers };
            for root in &roots {
                let files = scanner::scan(root).context("Scan failed")?;
                let records = analyzer::analyze_batch(&ffmpeg, &files, workers);
                println!("{}", root.display());
                print_measurement_table(&files, &records);
            }
        }

        Commands::Normalize { paths, target, threshold, mode, jobs, dry_run } => {
            let roots = resolve_roots(paths, &config)?;
            let opts = BatchOptions {
                mode: mode.mode(),
                target_db: target.unwrap_or(config.target_db),
                threshold_db: threshold.unwrap_or(config.threshold_db),
                jobs: if jobs > 0 { jobs } else { config.workers },
            };

            if dry_run {
                println!("DRY RUN — no files will be modified");
                for root in &roots {
                    dry_run_batch(&ffmpeg, root, &opts).context("Dry run failed")?;
                }
                return Ok(());
            }

            let orchestrator = Orchestrator::new(ffmpeg);
            for root in &roots {
                // Each folder is one batch: album references never cross roots
                let report = orchestrator
                    .run(root, &opts)
                    .with_context(|| format!("Normalization failed for {}", root.display()))?;
                print_report(root, &report);
            }
        }
    }

    Ok(())
}

/// Resolve batch roots: CLI args > config music_dirs.
fn resolve_roots(paths: Vec<PathBuf>, config: &librarygain::config::AppConfig) -> Result<Vec<PathBuf>> {
    if !paths.is_empty() {
        Ok(paths)
    } else if !config.music_dirs.is_empty() {
        Ok(config.music_dirs.clone())
    } else {
        anyhow::bail!("No folders given. Pass paths as arguments or set music_dirs in config.");
    }
}

/// Run everything up to (and including) selection, printing what would happen.
fn dry_run_batch(ffmpeg: &str, root: &Path, opts: &BatchOptions) -> Result<()> {
    let files = scanner::scan(root)?;
    let records = analyzer::analyze_batch(ffmpeg, &files, opts.jobs);

    let pairs: Vec<_> = files
        .iter()
        .map(|f| f.path.as_path())
        .zip(records.iter())
        .collect();
    let plan = gain::plan(&pairs, opts.target_db, opts.mode);
    let selected = gain::select(&pairs, opts.target_db, opts.threshold_db, opts.mode);

    println!("{} — {} of {} files selected", root.display(), selected.len(), files.len());
    for file in &files {
        let marker = if selected.contains(&file.path) { "*" } else { " " };
        let delta = plan
            .get(&file.path)
            .map(|d| format!("{:+.2} dB", gain::round_db(*d)))
            .unwrap_or_else(|| "(no measurement)".to_string());
        println!("  {} {:<40} {}", marker, file.name, delta);
    }
    Ok(())
}

fn print_report(root: &Path, report: &BatchReport) {
    println!(
        "{}: {} normalized, {} failed ({} of {} files selected)",
        root.display(),
        report.succeeded,
        report.failed,
        report.selected.len(),
        report.files.len()
    );
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(()) if outcome.mutated() => {
                println!("  ok   {} ({:+.2} dB)", outcome.path.display(), outcome.applied_db)
            }
            Ok(()) => println!("  ok   {} (already at target)", outcome.path.display()),
            Err(e) => println!("  FAIL {}", e),
        }
    }
}

/// Print a table of per-file measurements, unset values as "(unknown)".
fn print_measurement_table(files: &[FileRecord], records: &[MeasurementRecord]) {
    println!(
        "{:<40} {:>10} {:>19} {:>12} {:>10} {:>10}",
        "File", "Size", "Modified", "ReplayGain", "Avg dB", "Max dB"
    );
    println!("{}", "-".repeat(107));

    for (file, record) in files.iter().zip(records.iter()) {
        let name = truncate_name(&file.name, 40);

        println!(
            "{:<40} {:>10} {:>19} {:>12} {:>10} {:>10}",
            name,
            human_size(file.size),
            file.modified.as_deref().unwrap_or("(unknown)"),
            record.replay_gain.as_deref().unwrap_or("(unknown)"),
            print_db(record.avg_db),
            print_db(record.max_db),
        );
    }
}

fn print_db(db: Option<f64>) -> String {
    match db {
        Some(v) => format!("{v:.2}"),
        None => "(unknown)".to_string(),
    }
}

/// Truncate long names for table display. Counts characters, not bytes —
/// slicing at a byte index would panic inside a multibyte character.
fn truncate_name(name: &str, max_chars: usize) -> String {
    if name.chars().count() > max_chars {
        let cut: String = name.chars().take(max_chars - 3).collect();
        format!("{cut}...")
    } else {
        name.to_string()
    }
}

/// Human-readable file size (B/KB/MB/GB).
fn human_size(bytes: u64) -> String {
    let units = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size > 1024.0 && unit < units.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, units[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_name_leaves_short_names_alone() {
        assert_eq!(truncate_name("01 - Intro.mp3", 40), "01 - Intro.mp3");
        // Multibyte but short in characters: len() in bytes exceeds 40,
        // character count does not
        let umlauts = format!("{}.mp3", "ä".repeat(21));
        assert_eq!(truncate_name(&umlauts, 40), umlauts);
    }

    #[test]
    fn test_truncate_name_cuts_on_char_boundaries() {
        let long = format!("{}.mp3", "ä".repeat(45));
        let cut = truncate_name(&long, 40);
        assert_eq!(cut.chars().count(), 40);
        assert!(cut.ends_with("..."));
        assert_eq!(cut, format!("{}...", "ä".repeat(37)));

        let ascii = format!("{}.mp3", "x".repeat(45));
        assert_eq!(truncate_name(&ascii, 40), format!("{}...", "x".repeat(37)));
    }
}
