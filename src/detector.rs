use anyhow::Result;

use crate::background::Background;
use crate::config::Config;
use crate::contour::{contours_from_image, Contour, ContourFilter};
use crate::detection::Detection;
use crate::image::Image;
use crate::my_types::*;
use crate::segment::Segment;
use crate::video::FrameSource;

/// Finds candidate objects in a frame: background subtraction, segmentation,
/// then contour filtering.
#[derive(Debug, Clone)]
pub struct Detector {
    background: Background,
    segment: Segment,
    filter: ContourFilter,
}

impl Detector {
    /// Build the background model from `source` and take the remaining
    /// settings from `config`
    pub fn new(source: &mut dyn FrameSource, config: &Config) -> Result<Self> {
        let background = Background::new(source, &config.background)?;
        Self::with_background(background, config)
    }

    pub fn with_background(background: Background, config: &Config) -> Result<Self> {
        let filter = ContourFilter::new(config.filter);
        filter.criteria();
        Ok(Detector {
            background,
            segment: Segment::new(config.segment)?,
            filter,
        })
    }

    pub fn filter(&self) -> &ContourFilter {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut ContourFilter {
        &mut self.filter
    }

    /// Binary foreground mask of a frame
    pub fn mask(&self, frame_index: FrameIndex, frame: &Image) -> Result<Image> {
        let diff = self.background.subtract(frame_index, frame)?;
        Ok(self.segment.segment(&diff))
    }

    /// Contours of the frame that pass the filter
    pub fn contours(&self, frame_index: FrameIndex, frame: &Image) -> Result<Vec<Contour>> {
        let mask = self.mask(frame_index, frame)?;
        Ok(self.filter.filter(contours_from_image(&mask)))
    }

    pub fn detect(&self, frame_index: FrameIndex, frame: &Image) -> Result<Vec<Detection>> {
        Ok(self
            .contours(frame_index, frame)?
            .into_iter()
            .map(Detection::from_contour)
            .collect())
    }
}
