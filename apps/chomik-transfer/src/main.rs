//! `chomik-transfer`: probe, download, hash and upload files on Chomikuj.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::BufWriter;
use tracing_subscriber::EnvFilter;

use chomikbox_transfer::{
    Downloader, HashOptions, Progress, ProgressLine, RangeFetcher, TransferConfig, TransferOutcome,
    TransferTarget, Uploader, format_size, hash_many,
};

#[derive(Parser)]
#[command(name = "chomik-transfer", version)]
#[command(about = "Resumable transfers against the Chomikuj file host")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML file with transfer settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show length, name and range support of a remote file
    Probe { url: String },

    /// Download a remote file
    Download {
        url: String,

        /// Output path (defaults to the server-provided file name)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pause once half the file is in, then resume with a range request
        #[arg(long)]
        pause_at_half: bool,
    },

    /// Print SHA-256 of remote files without storing them
    Hash {
        #[arg(required = true)]
        urls: Vec<String>,

        /// Concurrent downloads
        #[arg(short, long, default_value_t = 4)]
        workers: usize,

        /// Failures after which a URL is skipped
        #[arg(long, default_value_t = 5)]
        max_errors: u32,
    },

    /// Upload a local file with a token from the control API
    Upload {
        file: PathBuf,

        /// Ingest server, host[:port]
        #[arg(long)]
        server: String,

        #[arg(long)]
        key: String,

        #[arg(long)]
        time: String,

        /// Name shown on the server (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,

        /// Extra form field forwarded verbatim, as name=value
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => TransferConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TransferConfig::default(),
    };
    let client = config.build_client()?;

    match cli.command {
        Commands::Probe { url } => probe(&client, &config, &url).await,
        Commands::Download {
            url,
            output,
            pause_at_half,
        } => download(&client, &config, &url, output, pause_at_half).await,
        Commands::Hash {
            urls,
            workers,
            max_errors,
        } => hash(&client, &config, &urls, workers, max_errors).await,
        Commands::Upload {
            file,
            server,
            key,
            time,
            name,
            fields,
        } => {
            let target = fields
                .iter()
                .fold(TransferTarget::upload(&server, &key, &time), |t, (k, v)| {
                    t.with_field(k, v)
                });
            upload(&client, &config, &file, target, name).await
        }
    }
}

async fn probe(client: &reqwest::Client, config: &TransferConfig, url: &str) -> Result<()> {
    let fetcher = RangeFetcher::open(client.clone(), url, None, config.range_retry()).await?;
    println!("url:      {}", fetcher.url());
    println!("name:     {}", fetcher.name().unwrap_or("-"));
    match fetcher.len() {
        Some(len) => println!("length:   {len} ({})", format_size(len)),
        None => println!("length:   unknown"),
    }
    println!("seekable: {}", fetcher.is_seekable());
    Ok(())
}

async fn download(
    client: &reqwest::Client,
    config: &TransferConfig,
    url: &str,
    output: Option<PathBuf>,
    pause_at_half: bool,
) -> Result<()> {
    let dl = Downloader::new(client.clone(), url, tokio::io::sink(), config).await?;
    let output = match output {
        Some(path) => path,
        None => local_file_name(dl.name())?,
    };
    let file = tokio::fs::File::create(&output)
        .await
        .with_context(|| format!("creating {}", output.display()))?;
    let mut dl = dl.with_sink(BufWriter::new(file))?;

    let line = Arc::new(Mutex::new(ProgressLine::new(
        dl.name(),
        dl.size().unwrap_or(0),
    )));
    let mut paused_once = !pause_at_half;
    let draw = Arc::clone(&line);
    dl.on_progress(move |p| {
        redraw(&draw, p);
        if !paused_once && p.fraction() >= 0.5 {
            paused_once = true;
            p.pause();
        }
    });

    let mut outcome = dl.start().await?;
    while outcome.is_paused() {
        tracing::info!(bytes = dl.state().bytes_transferred(), "paused, resuming");
        outcome = dl.resume().await?;
    }
    finish(&line);
    if let TransferOutcome::Finished(bytes) = outcome {
        println!("{} ({})", output.display(), format_size(bytes));
    }
    Ok(())
}

async fn hash(
    client: &reqwest::Client,
    config: &TransferConfig,
    urls: &[String],
    workers: usize,
    max_errors: u32,
) -> Result<()> {
    let options = HashOptions {
        workers,
        chunk_size: config.chunk_size,
        max_errors_per_url: max_errors,
        retry: config.range_retry(),
    };
    let mut failed = 0;
    for report in hash_many(client, urls, &options).await {
        match report.result {
            Ok(hash) => println!("{hash}  {}", report.url),
            Err(e) => {
                failed += 1;
                eprintln!("error: {}: {e}", report.url);
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} files could not be hashed", urls.len());
    }
    Ok(())
}

async fn upload(
    client: &reqwest::Client,
    config: &TransferConfig,
    path: &Path,
    target: TransferTarget,
    name: Option<String>,
) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("upload path has no file name")?,
    };
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;

    let mut up = Uploader::new(client.clone(), target, name, file, config).await?;
    let line = Arc::new(Mutex::new(ProgressLine::new(
        up.name(),
        up.state().total_size(),
    )));
    let draw = Arc::clone(&line);
    up.on_progress(move |p| redraw(&draw, p));

    let mut outcome = up.start().await?;
    while outcome.is_paused() {
        outcome = up.resume().await?;
    }
    finish(&line);
    if let TransferOutcome::Finished(file_id) = outcome {
        println!("uploaded {} as file {file_id}", up.name());
    }
    Ok(())
}

fn redraw(line: &Mutex<ProgressLine>, progress: &Progress<'_>) {
    if let Ok(mut line) = line.lock()
        && let Some(text) = line.update(progress.bytes_transferred())
    {
        eprint!("{text}");
    }
}

fn finish(line: &Mutex<ProgressLine>) {
    if let Ok(mut line) = line.lock() {
        eprint!("{}", line.done());
    }
}

/// Keeps only the last component of a server-chosen name so the output
/// stays in the working directory.
fn local_file_name(name: &str) -> Result<PathBuf> {
    Path::new(name)
        .file_name()
        .filter(|n| !n.is_empty())
        .map(PathBuf::from)
        .with_context(|| format!("server file name {name:?} is unusable, pass --output"))
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected name=value, got {raw:?}"))
}
