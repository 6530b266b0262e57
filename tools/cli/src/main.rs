//! unipath CLI - Command line front end for uniform local and object-storage paths.
//!
//! Every command accepts local paths or URIs such as `s3://bucket/key`,
//! `minio://bucket/key` or `mem://bucket/key`.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use unipath::{
    AccessorRegistry, BatchReport, BatchSource, DownloadTarget, PathSpec, Settings,
    TransferOptions, TransferRequest, TransferSubscriber, UniPath,
};

#[derive(Parser)]
#[command(name = "unipath")]
#[command(about = "unipath - One path API for local disk and object storage")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (JSON). Defaults to the user config file, then the environment.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory, optionally filtered by a glob pattern.
    Ls {
        path: String,

        /// Glob pattern relative to PATH.
        #[arg(short, long)]
        pattern: Option<String>,

        /// Match the pattern at any depth.
        #[arg(short, long)]
        recursive: bool,
    },

    /// Show metadata as JSON.
    Stat { path: String },

    /// Write an object to stdout.
    Cat { path: String },

    /// Copy a file, possibly across backends.
    Cp {
        source: String,
        dest: String,

        #[arg(long)]
        overwrite: bool,
    },

    /// Move a file, possibly across backends.
    Mv {
        source: String,
        dest: String,

        #[arg(long)]
        overwrite: bool,
    },

    /// Remove a file or directory.
    Rm {
        path: String,

        /// Remove directories and their contents.
        #[arg(short, long)]
        recursive: bool,
    },

    /// Create a directory.
    Mkdir {
        path: String,

        /// Create missing parents.
        #[arg(short, long)]
        parents: bool,

        /// Do not fail if the directory exists.
        #[arg(long)]
        exist_ok: bool,
    },

    /// Upload one local file to DEST.
    Upload {
        source: PathBuf,
        dest: String,

        #[arg(long)]
        overwrite: bool,
    },

    /// Download one object.
    Download {
        source: String,

        /// Destination file.
        #[arg(short, long, conflicts_with = "output_dir")]
        output: Option<PathBuf>,

        /// Destination directory.
        #[arg(short = 'd', long)]
        output_dir: Option<PathBuf>,

        /// File name inside the destination directory.
        #[arg(short, long, requires = "output_dir")]
        filename: Option<String>,

        #[arg(long)]
        overwrite: bool,
    },

    /// Upload many local files into a remote directory.
    BatchUpload {
        dest: String,

        /// Explicit files to upload.
        #[arg(long, num_args = 1.., conflicts_with = "pattern")]
        files: Vec<PathBuf>,

        /// Root directory for --pattern.
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Glob pattern below --root.
        #[arg(long)]
        pattern: Option<String>,

        #[command(flatten)]
        policy: Policy,
    },

    /// Download every object matching a pattern into a local directory.
    BatchDownload {
        source: String,

        #[arg(long)]
        pattern: String,

        #[arg(short = 'd', long)]
        output_dir: PathBuf,

        #[command(flatten)]
        policy: Policy,
    },

    /// Print the resolved settings (secrets redacted).
    Config,
}

#[derive(Args)]
struct Policy {
    /// Replace existing destinations.
    #[arg(long)]
    overwrite: bool,

    /// Fail on existing destinations instead of skipping them.
    #[arg(long)]
    no_skip_existing: bool,

    /// Report failed transfers instead of stopping at the first one.
    #[arg(long)]
    keep_going: bool,
}

impl Policy {
    fn options(&self) -> TransferOptions {
        TransferOptions::default()
            .overwrite(self.overwrite)
            .skip_existing(!self.no_skip_existing)
            .tolerate_failures(self.keep_going)
            .subscriber(Arc::new(LogProgress))
    }
}

/// Logs each finished transfer.
struct LogProgress;

impl TransferSubscriber for LogProgress {
    fn on_done(&self, request: &TransferRequest, result: &unipath::Result<u64>) {
        match result {
            Ok(bytes) => info!("{} <-> {} ({} bytes)", request.local.display(), request.remote, bytes),
            Err(e) => warn!("{} <-> {} failed: {}", request.local.display(), request.remote, e),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_env("UNIPATH_LOG")
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    let session = Session::new(settings);

    match cli.command {
        Commands::Ls {
            path,
            pattern,
            recursive,
        } => cmd_ls(&session.path(&path)?, pattern.as_deref(), recursive),
        Commands::Stat { path } => cmd_stat(&session.path(&path)?),
        Commands::Cat { path } => cmd_cat(&session.path(&path)?),
        Commands::Cp {
            source,
            dest,
            overwrite,
        } => {
            let dest = session
                .path(&source)?
                .copy_to(&session.path(&dest)?, overwrite)
                .context("Copy failed")?;
            println!("{}", dest);
            Ok(())
        }
        Commands::Mv {
            source,
            dest,
            overwrite,
        } => {
            let dest = session
                .path(&source)?
                .move_to(&session.path(&dest)?, overwrite)
                .context("Move failed")?;
            println!("{}", dest);
            Ok(())
        }
        Commands::Rm { path, recursive } => cmd_rm(&session.path(&path)?, recursive),
        Commands::Mkdir {
            path,
            parents,
            exist_ok,
        } => session
            .path(&path)?
            .mkdir(parents, exist_ok)
            .context("Failed to create directory"),
        Commands::Upload {
            source,
            dest,
            overwrite,
        } => {
            let dest = session
                .path(&dest)?
                .upload_file(&source, None, overwrite)
                .context("Upload failed")?;
            println!("{}", dest);
            Ok(())
        }
        Commands::Download {
            source,
            output,
            output_dir,
            filename,
            overwrite,
        } => {
            let target = DownloadTarget {
                output_file: output,
                output_dir,
                filename,
            };
            let local = session
                .path(&source)?
                .download_file(&target, overwrite)
                .context("Download failed")?;
            println!("{}", local);
            Ok(())
        }
        Commands::BatchUpload {
            dest,
            files,
            root,
            pattern,
            policy,
        } => {
            let source = match pattern {
                Some(pattern) => BatchSource::glob(root, pattern),
                None if !files.is_empty() => BatchSource::Files(files),
                None => bail!("Either --files or --pattern is required"),
            };
            let report = session
                .path(&dest)?
                .batch_upload_report(&source, &policy.options())
                .context("Batch upload failed")?;
            print_report(&report)
        }
        Commands::BatchDownload {
            source,
            pattern,
            output_dir,
            policy,
        } => {
            let report = session
                .path(&source)?
                .batch_download_report(&pattern, &output_dir, &policy.options())
                .context("Batch download failed")?;
            print_report(&report)
        }
        Commands::Config => {
            println!("{:#?}", session.registry.settings()?);
            Ok(())
        }
    }
}

/// Settings-backed registry shared by every path the command touches.
struct Session {
    registry: Arc<AccessorRegistry>,
}

impl Session {
    fn new(settings: Settings) -> Self {
        Self {
            registry: Arc::new(AccessorRegistry::with_default_factories(settings)),
        }
    }

    fn path(&self, text: &str) -> Result<UniPath> {
        let spec = PathSpec::parse(text).with_context(|| format!("Invalid path: {}", text))?;
        Ok(UniPath::with_registry(spec, Arc::clone(&self.registry))?)
    }
}

/// List a directory or the matches of a pattern.
fn cmd_ls(path: &UniPath, pattern: Option<&str>, recursive: bool) -> Result<()> {
    let entries = match (pattern, recursive) {
        (Some(pattern), false) => path.glob(pattern).paths(),
        (Some(pattern), true) => path.rglob(pattern).paths(),
        (None, true) => path.rglob("*").paths(),
        (None, false) => path.iterdir(),
    }
    .with_context(|| format!("Failed to list {}", path))?;

    if entries.is_empty() {
        println!("No entries.");
        return Ok(());
    }
    for entry in entries {
        let meta = entry.stat()?;
        if meta.is_directory {
            println!("  [DIR]  {}/", entry);
        } else {
            let size = meta.size.map(|s| format!("{} bytes", s)).unwrap_or_default();
            println!("  [FILE] {} ({})", entry, size);
        }
    }
    Ok(())
}

fn cmd_stat(path: &UniPath) -> Result<()> {
    let meta = path.stat().with_context(|| format!("Failed to stat {}", path))?;
    println!("{}", serde_json::to_string_pretty(&meta)?);
    Ok(())
}

fn cmd_cat(path: &UniPath) -> Result<()> {
    let mut reader = path.open_read().with_context(|| format!("Failed to open {}", path))?;
    io::copy(&mut reader, &mut io::stdout().lock())?;
    Ok(())
}

fn cmd_rm(path: &UniPath, recursive: bool) -> Result<()> {
    let removed = if path.is_dir()? {
        path.rmdir(recursive)
    } else {
        path.remove()
    };
    removed.with_context(|| format!("Failed to remove {}", path))?;
    info!("Removed {}", path);
    Ok(())
}

fn print_report(report: &BatchReport) -> Result<()> {
    for path in &report.transferred {
        println!("{}", path);
    }
    println!(
        "{} transferred, {} skipped, {} failed",
        report.transferred.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for failure in &report.failed {
        eprintln!("  {}: {}", failure.entry.source, failure.error);
    }
    if !report.is_complete() {
        bail!("{} transfers failed", report.failed.len());
    }
    Ok(())
}
