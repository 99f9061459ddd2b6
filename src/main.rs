use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use indicatif::ProgressStyle;
use tracing::{info, info_span, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use hvtrack::config::*;
use hvtrack::dataset::{ContourLog, ContourLogWriter};
use hvtrack::detector::Detector;
use hvtrack::export::write_tracks;
use hvtrack::path::{PathAssembler, Track};
use hvtrack::synthetic::SyntheticSource;
use hvtrack::tracker::Tracker;
use hvtrack::video::{self, write_frame, FrameSource};

#[derive(Parser)]
#[clap(name = "hvtrack", about = "Track moving objects through a video and write their paths")]
pub struct Args {
    /// print per-frame detail
    #[clap(short, long, global = true)]
    pub verbose: bool,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Detect and track objects in a video, writing one csv per path
    Track {
        input: PathBuf,
        #[clap(short, long, default_value = "./paths")]
        output_folder: PathBuf,
        /// also record each frame's contours to this log
        #[clap(long)]
        log: Option<PathBuf>,
        /// draw the paths over the last frame into this image
        #[cfg(feature = "opencv")]
        #[clap(long)]
        overlay: Option<PathBuf>,
        #[clap(flatten)]
        settings: Settings,
    },
    /// Only detect, recording each frame's filtered contours to a log
    Detect {
        input: PathBuf,
        #[clap(long, default_value = "./contours.jsonl")]
        log: PathBuf,
        #[clap(flatten)]
        settings: Settings,
    },
    /// Assemble paths from a contour log written by `detect`
    Assemble {
        log: PathBuf,
        #[clap(short, long, default_value = "./paths")]
        output_folder: PathBuf,
        #[clap(flatten)]
        settings: Settings,
    },
    /// Write a synthetic video of moving discs and track it
    Demo {
        #[clap(short, long, default_value = "./demo")]
        output_folder: PathBuf,
        #[clap(long, default_value = "120")]
        frames: usize,
        #[clap(long, default_value = "3")]
        objects: usize,
        #[clap(flatten)]
        settings: Settings,
    },
}

#[derive(clap::Args)]
pub struct Settings {
    /// read settings from this json file instead of the flags below
    #[clap(long)]
    pub config: Option<PathBuf>,
    #[clap(flatten)]
    pub flags: Config,
}

impl Settings {
    fn resolve(self) -> Result<Config> {
        let config = match self.config {
            Some(path) => Config::load(&path)?,
            None => self.flags,
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    // parse the config
    let args = Args::parse();

    // setup logging
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(level)
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stdout_writer()))
        .with(indicatif_layer)
        .init();

    match args.command {
        Command::Track {
            input,
            output_folder,
            log,
            #[cfg(feature = "opencv")]
            overlay,
            settings,
        } => {
            let config = settings.resolve()?;
            let mut source = video::open(&input)?;
            let tracks = track(source.as_mut(), &config, log.as_deref())?;
            write_tracks(&output_folder, &tracks)?;
            #[cfg(feature = "opencv")]
            if let Some(overlay) = overlay {
                let last = source.frame_count().saturating_sub(1);
                hvtrack::visualization::save_overlay(&overlay, &source.read(last)?, &tracks)?;
            }
        }
        Command::Detect {
            input,
            log,
            settings,
        } => {
            let config = settings.resolve()?;
            let mut source = video::open(&input)?;
            detect(source.as_mut(), &config, &log)?;
        }
        Command::Assemble {
            log,
            output_folder,
            settings,
        } => {
            let config = settings.resolve()?;
            let detections = ContourLog::open(&log)?.read_all()?;
            info!("{} frames in {}", detections.len(), log.display());
            let mut paths = PathAssembler::new(config.assembler)?;
            let tracks = paths.assemble(detections)?;
            write_tracks(&output_folder, &tracks)?;
        }
        Command::Demo {
            output_folder,
            frames,
            objects,
            settings,
        } => {
            let config = settings.resolve()?;
            std::fs::create_dir_all(&output_folder)?;
            let mut source = SyntheticSource::random(
                320,
                240,
                frames,
                objects,
                config.seed,
                config.background.frames,
            );
            let video_path = output_folder.join("frames");
            std::fs::create_dir_all(&video_path)?;
            for frame in video::frames(&mut source) {
                let (frame_index, image) = frame?;
                write_frame(&video_path.join(format!("frame_{:04}.png", frame_index)), &image)?;
            }
            config.save(&output_folder.join("config.json"))?;

            let mut source = video::open(&video_path)?;
            let tracks = track(source.as_mut(), &config, None)?;
            write_tracks(&output_folder.join("paths"), &tracks)?;
        }
    }

    Ok(())
}

fn track(source: &mut dyn FrameSource, config: &Config, log: Option<&Path>) -> Result<Vec<Track>> {
    let header_span = info_span!("header");
    header_span.pb_set_style(&ProgressStyle::default_bar());
    header_span.pb_set_length(source.frame_count() as u64);
    let header_span_enter = header_span.enter();

    let mut tracker = Tracker::new(source, config)?;
    let tracks = match log {
        Some(log) => {
            let mut writer = ContourLogWriter::create(log)?;
            let tracks = tracker.run_logged(source, &mut writer)?;
            writer.finish()?;
            tracks
        }
        None => tracker.run(source)?,
    };

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);

    Ok(tracks)
}

fn detect(source: &mut dyn FrameSource, config: &Config, log: &Path) -> Result<()> {
    let header_span = info_span!("header");
    header_span.pb_set_style(&ProgressStyle::default_bar());
    header_span.pb_set_length(source.frame_count() as u64);
    let header_span_enter = header_span.enter();

    let detector = Detector::new(source, config)?;
    let mut writer = ContourLogWriter::create(log)?;
    let mut detections = 0;
    for frame in video::frames(source) {
        let (frame_index, image) = frame?;
        let contours = detector.contours(frame_index, &image)?;
        detections += contours.len();
        writer.write(frame_index, &contours)?;
        Span::current().pb_inc(1);
    }
    writer.finish()?;
    info!("{} detections written to {}", detections, log.display());

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);

    Ok(())
}
