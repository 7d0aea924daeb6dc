use std::path::{Path, PathBuf};
use std::sync::Arc;

use av_pipe::{
    Backends, ExportConfig, ExportResult, Exporter, RawFileProducer, SourceConfig, Transcoder,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "av-export")]
#[command(about = "Encode raw images or transcode media files into a container")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode a headerless file of back-to-back RGBA images
    Export {
        /// Raw RGBA input
        #[arg(short, long)]
        input: PathBuf,

        /// Add a silent audio track
        #[arg(long)]
        silent_audio: bool,

        #[command(flatten)]
        options: ExportOptions,
    },
    /// Decode a media file and re-encode it
    Transcode {
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        options: ExportOptions,
    },
}

#[derive(Args, Debug)]
struct ExportOptions {
    /// Output file; the container is picked from the extension
    #[arg(short, long)]
    output: PathBuf,

    /// JSON export configuration; the flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    fps: Option<u32>,

    /// Target length in milliseconds, 0 for unbounded
    #[arg(short, long)]
    duration_ms: Option<u64>,

    #[arg(long)]
    video_codec: Option<String>,

    #[arg(long)]
    audio_codec: Option<String>,

    #[arg(long)]
    no_video: bool,

    #[arg(long)]
    no_audio: bool,
}

impl ExportOptions {
    fn load(&self) -> anyhow::Result<ExportConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let file = std::fs::File::open(path)
                    .map_err(|e| anyhow::anyhow!("open config {}: {}", path.display(), e))?;
                serde_json::from_reader(std::io::BufReader::new(file))?
            }
            None => ExportConfig::default(),
        };
        config.output = self.output.clone();
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(duration_ms) = self.duration_ms {
            config.duration_ms = duration_ms;
        }
        if let Some(codec) = &self.video_codec {
            config.video_codec = codec.clone();
        }
        if let Some(codec) = &self.audio_codec {
            config.audio_codec = codec.clone();
        }
        config.disable_video |= self.no_video;
        config.disable_audio |= self.no_audio;
        Ok(config)
    }
}

#[derive(Serialize)]
struct Summary<'a> {
    result: String,
    output: &'a Path,
    stats: av_pipe::stats::PipelineStats,
}

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("av_pipe", log::LevelFilter::Debug)
        .filter_module("av_export", log::LevelFilter::Debug)
        .init();
}

#[cfg(feature = "ffmpeg")]
fn backends() -> anyhow::Result<Backends> {
    Backends::ffmpeg()
}

#[cfg(not(feature = "ffmpeg"))]
fn backends() -> anyhow::Result<Backends> {
    anyhow::bail!("av-export was built without the ffmpeg feature")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let backends = backends()?;

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("ctrl-c, canceling");
            cancel_clone.cancel();
        }
    });

    let result = match cli.command {
        Command::Export {
            input,
            silent_audio,
            options,
        } => {
            let mut config = options.load()?;
            config.disable_audio |= !silent_audio;
            export(input, config, backends, cancel).await?
        }
        Command::Transcode { input, options } => {
            let config = options.load()?;
            transcode(input, config, backends, cancel).await?
        }
    };

    if result != ExportResult::Succeeded {
        std::process::exit(1);
    }
    Ok(())
}

fn report(exporter: &Exporter, result: ExportResult) -> anyhow::Result<()> {
    let summary = Summary {
        result: result.to_string(),
        output: &exporter.config().output,
        stats: exporter.stats(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if let Some(err) = exporter.last_error() {
        log::error!("export failed: {}", err);
    }
    Ok(())
}

async fn export(
    input: PathBuf,
    config: ExportConfig,
    backends: Backends,
    cancel: CancellationToken,
) -> anyhow::Result<ExportResult> {
    let producer = RawFileProducer::open(&input, config.width, config.height, config.fps)?;
    let exporter = Arc::new(Exporter::new(config, &backends));
    let (tx, rx) = oneshot::channel();
    exporter.on_finished(move |result| {
        let _ = tx.send(result);
    });

    let canceller = {
        let exporter = exporter.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let _ = tokio::task::spawn_blocking(move || exporter.cancel()).await;
        })
    };

    let feeder = exporter.clone();
    let fed = tokio::task::spawn_blocking(move || feed(&feeder, producer, &cancel)).await?;
    if let Err(e) = fed {
        log::error!("feeding exporter: {}", e);
    }
    let stopper = exporter.clone();
    tokio::task::spawn_blocking(move || stopper.stop()).await?;
    canceller.abort();

    let result = rx.await?;
    report(&exporter, result)?;
    Ok(result)
}

/// Start the exporter and feed it until the input or the budget runs out.
fn feed(
    exporter: &Exporter,
    mut producer: RawFileProducer,
    cancel: &CancellationToken,
) -> av_pipe::Result<()> {
    exporter.start()?;
    let ticks = producer.feed(exporter, || cancel.is_cancelled())?;
    log::debug!("fed {} ticks", ticks);
    Ok(())
}

async fn transcode(
    input: PathBuf,
    config: ExportConfig,
    backends: Backends,
    cancel: CancellationToken,
) -> anyhow::Result<ExportResult> {
    let transcoder = Arc::new(Transcoder::new(SourceConfig::new(input), config, &backends));
    let (tx, rx) = oneshot::channel();
    transcoder.on_finished(move |result| {
        let _ = tx.send(result);
    });

    let canceller = {
        let transcoder = transcoder.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let _ = tokio::task::spawn_blocking(move || transcoder.cancel()).await;
        })
    };

    let worker = transcoder.clone();
    let started = tokio::task::spawn_blocking(move || -> av_pipe::Result<ExportResult> {
        worker.start()?;
        Ok(worker.wait())
    })
    .await?;
    if let Err(e) = started {
        log::error!("transcode: {}", e);
    }
    canceller.abort();

    let result = rx.await?;
    report(transcoder.exporter(), result)?;
    Ok(result)
}
