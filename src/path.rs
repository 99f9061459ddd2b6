use tracing::{debug, trace};

use crate::config::{validate_min_length, validate_proximity, AssemblerConfig};
use crate::detection::Detection;
use crate::error::TrackError;
use crate::my_types::*;

#[derive(Clone, Debug, PartialEq)]
pub struct TrackPoint {
    pub frame_number: FrameIndex,
    pub detection: Detection,
}

/// Time ordered detections believed to be one object. Never empty.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub points: Vec<TrackPoint>,
}

impl Track {
    pub fn new(frame_number: FrameIndex, detection: Detection) -> Self {
        Track {
            points: vec![TrackPoint {
                frame_number,
                detection,
            }],
        }
    }

    pub fn last(&self) -> &TrackPoint {
        // constructed with one point and only ever appended to
        &self.points[self.points.len() - 1]
    }

    pub fn first_frame(&self) -> FrameIndex {
        self.points[0].frame_number
    }

    pub fn last_frame(&self) -> FrameIndex {
        self.last().frame_number
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// (frame, centroid) pairs
    pub fn centroids(&self) -> impl Iterator<Item = (FrameIndex, Vector2d)> + '_ {
        self.points
            .iter()
            .map(|p| (p.frame_number, p.detection.centroid))
    }

    fn is_near(&self, detection: &Detection, proximity_threshold: f64) -> bool {
        self.last().detection.distance(detection) < proximity_threshold
    }

    fn push(&mut self, frame_number: FrameIndex, detection: Detection) {
        self.points.push(TrackPoint {
            frame_number,
            detection,
        });
    }
}

/// Stitches per-frame detections into paths, one frame at a time.
///
/// A detection extends the first active track (oldest first) whose last point
/// is closer than the proximity threshold, or starts a new track. A track that
/// goes a whole frame without a detection is retired for good. Frames must be
/// fed in strictly increasing order; gaps count as empty frames.
///
/// A track is not closed for the rest of a frame once it has been extended:
/// a second nearby detection in the same frame is appended to it too, giving
/// two points with one frame number, rather than starting a competing track
/// from what is usually a speck next to the real object.
#[derive(Debug, Clone)]
pub struct PathAssembler {
    config: AssemblerConfig,
    active: Vec<Track>,
    retired: Vec<Track>,
    last_frame: Option<FrameIndex>,
}

impl PathAssembler {
    pub fn new(config: AssemblerConfig) -> Result<Self, TrackError> {
        config.validate()?;
        Ok(Self {
            config,
            active: vec![],
            retired: vec![],
            last_frame: None,
        })
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Change how close a detection has to be to count as near a track end
    pub fn set_near(&mut self, proximity_threshold: f64) -> Result<(), TrackError> {
        validate_proximity(proximity_threshold)?;
        self.config.proximity_threshold = proximity_threshold;
        Ok(())
    }

    pub fn set_min_track_length(&mut self, min_track_length: usize) -> Result<(), TrackError> {
        validate_min_length(min_track_length)?;
        self.config.min_track_length = min_track_length;
        Ok(())
    }

    pub fn active(&self) -> &[Track] {
        &self.active
    }

    pub fn retired(&self) -> &[Track] {
        &self.retired
    }

    /// The most recently processed frame
    pub fn last_frame(&self) -> Option<FrameIndex> {
        self.last_frame
    }

    pub fn process_frame(
        &mut self,
        frame_number: FrameIndex,
        detections: Vec<Detection>,
    ) -> Result<(), TrackError> {
        if let Some(previous) = self.last_frame {
            if frame_number <= previous {
                return Err(TrackError::OutOfOrderFrame {
                    previous,
                    current: frame_number,
                });
            }
        }
        self.last_frame = Some(frame_number);

        self.retire_stale(frame_number);
        for detection in detections {
            self.place(frame_number, detection);
        }
        Ok(())
    }

    /// Move tracks that missed the previous frame to the retired list,
    /// keeping the relative order of both lists
    fn retire_stale(&mut self, frame_number: FrameIndex) {
        let (stale, live): (Vec<Track>, Vec<Track>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|track| track.last_frame() + 1 < frame_number);
        if !stale.is_empty() {
            debug!(frame_number, count = stale.len(), "retiring tracks");
        }
        self.retired.extend(stale);
        self.active = live;
    }

    /// Append to the first track that is near enough, otherwise start one
    fn place(&mut self, frame_number: FrameIndex, detection: Detection) {
        let proximity_threshold = self.config.proximity_threshold;
        let near = self
            .active
            .iter()
            .position(|track| track.is_near(&detection, proximity_threshold));
        match near {
            Some(i) => self.active[i].push(frame_number, detection),
            None => {
                trace!(frame_number, x = detection.centroid.x, y = detection.centroid.y, "new track");
                self.active.push(Track::new(frame_number, detection));
            }
        }
    }

    /// Retire everything still active and return the retired tracks that are
    /// long enough. Calling it again without new frames gives the same answer.
    pub fn finalize(&mut self) -> Vec<Track> {
        self.retired.append(&mut self.active);
        let min_track_length = self.config.min_track_length;
        let kept: Vec<Track> = self
            .retired
            .iter()
            .filter(|track| track.len() >= min_track_length)
            .cloned()
            .collect();
        debug!(
            retired = self.retired.len(),
            kept = kept.len(),
            min_track_length,
            "finalized paths"
        );
        kept
    }

    /// Forget all tracks to prepare for a new video
    pub fn reset(&mut self) {
        self.active.clear();
        self.retired.clear();
        self.last_frame = None;
    }

    /// Run a whole detection log through a fresh state. The position in the
    /// log is the frame number.
    pub fn assemble(&mut self, log: Vec<Vec<Detection>>) -> Result<Vec<Track>, TrackError> {
        self.reset();
        for (frame_number, detections) in log.into_iter().enumerate() {
            self.process_frame(frame_number, detections)?;
        }
        Ok(self.finalize())
    }
}
