use std::io::Write;

use anyhow::Result;
use tracing::{debug, info, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::Config;
use crate::contour::Contour;
use crate::dataset::ContourLogWriter;
use crate::detection::Detection;
use crate::detector::Detector;
use crate::image::Image;
use crate::my_types::*;
use crate::path::{PathAssembler, Track};
use crate::video::{frames, FrameSource};

/// Runs every frame of a video through the detector and the path assembler.
#[derive(Debug)]
pub struct Tracker {
    detector: Detector,
    paths: PathAssembler,
    // number of frames processed so far
    frame_count: usize,
}

impl Tracker {
    pub fn new(source: &mut dyn FrameSource, config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_detector(
            Detector::new(source, config)?,
            PathAssembler::new(config.assembler)?,
        ))
    }

    pub fn with_detector(detector: Detector, paths: PathAssembler) -> Self {
        Self {
            detector,
            paths,
            frame_count: 0,
        }
    }

    pub fn paths(&self) -> &PathAssembler {
        &self.paths
    }

    /// Detect objects in one frame and hand them to the assembler. Returns the
    /// filtered contours that became detections.
    pub fn process_frame(&mut self, frame_index: FrameIndex, frame: &Image) -> Result<Vec<Contour>> {
        let contours = self.detector.contours(frame_index, frame)?;
        let detections: Vec<Detection> = contours.iter().cloned().map(Detection::from_contour).collect();
        debug!(frame_index, detections = detections.len(), "frame processed");
        self.paths.process_frame(frame_index, detections)?;
        self.frame_count += 1;
        Span::current().pb_inc(1);
        Ok(contours)
    }

    /// Track a whole video and return the paths long enough to keep
    pub fn run(&mut self, source: &mut dyn FrameSource) -> Result<Vec<Track>> {
        self.run_with(source, |_, _| Ok(()))
    }

    /// Like `run`, also recording each frame's contours in a log
    pub fn run_logged<W: Write>(
        &mut self,
        source: &mut dyn FrameSource,
        log: &mut ContourLogWriter<W>,
    ) -> Result<Vec<Track>> {
        self.run_with(source, |frame_index, contours| log.write(frame_index, contours))
    }

    fn run_with<F>(&mut self, source: &mut dyn FrameSource, mut on_frame: F) -> Result<Vec<Track>>
    where
        F: FnMut(FrameIndex, &[Contour]) -> Result<()>,
    {
        self.paths.reset();
        self.frame_count = 0;
        for frame in frames(source) {
            let (frame_index, image) = frame?;
            let contours = self.process_frame(frame_index, &image)?;
            on_frame(frame_index, &contours)?;
        }
        let tracks = self.paths.finalize();
        info!(
            frames = self.frame_count,
            paths = tracks.len(),
            "tracking finished"
        );
        Ok(tracks)
    }
}
