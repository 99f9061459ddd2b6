use anyhow::Result;
use ndarray as nd;
use tracing::debug;

use crate::config::BackgroundConfig;
use crate::error::TrackError;
use crate::image::Image;
use crate::my_types::*;
use crate::video::FrameSource;

/// Static background of one video: the mean of its leading frames.
#[derive(Debug, Clone)]
pub struct Background {
    mean: nd::Array2<f64>,
}

impl Background {
    /// Average the first `config.frames` frames (or all of them when the video
    /// is shorter)
    pub fn new(source: &mut dyn FrameSource, config: &BackgroundConfig) -> Result<Background> {
        config.validate()?;
        let count = config.frames.min(source.frame_count());
        if count == 0 {
            return Err(TrackError::EmptyBackground.into());
        }
        let (width, height) = source.shape();
        let mut sum = nd::Array2::<f64>::zeros((height, width));
        for i in 0..count {
            let frame = source.read(i)?;
            check_shape((width, height), &frame)?;
            sum += &frame.to_array();
        }
        debug!("background from {} frames", count);
        Ok(Background {
            mean: sum / count as f64,
        })
    }

    pub fn from_image(image: &Image) -> Background {
        Background {
            mean: image.to_array(),
        }
    }

    /// The background for a given frame. The same mean image serves every frame.
    pub fn background_image(&self, _frame_index: FrameIndex) -> &nd::Array2<f64> {
        &self.mean
    }

    /// Frame minus background, not thresholded and possibly negative
    pub fn subtract(&self, frame_index: FrameIndex, frame: &Image) -> Result<nd::Array2<f64>, TrackError> {
        let (height, width) = self.mean.dim();
        check_shape((width, height), frame)?;
        Ok(frame.to_array() - self.background_image(frame_index))
    }
}

fn check_shape(expected: (usize, usize), frame: &Image) -> Result<(), TrackError> {
    if frame.shape() != expected {
        return Err(TrackError::ShapeMismatch {
            expected,
            got: frame.shape(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{SyntheticObject, SyntheticSource};

    #[test]
    fn test_mean_of_leading_frames() {
        let mut source = SyntheticSource::new(16, 12, 30, 3);
        source.noise = 0;
        let background = Background::new(&mut source, &BackgroundConfig::default()).unwrap();
        assert!(background.background_image(0).iter().all(|&v| v == 40.));
    }

    #[test]
    fn test_subtract_highlights_object() {
        let mut source = SyntheticSource::new(32, 32, 20, 3).with_object(SyntheticObject {
            start: Vector2d::new(16., 16.),
            velocity: Vector2d::zeros(),
            radius: 3.,
            first_frame: 12,
            last_frame: 19,
        });
        source.noise = 0;
        let background = Background::new(&mut source, &BackgroundConfig { frames: 10 }).unwrap();
        let frame = source.read(15).unwrap();
        let diff = background.subtract(15, &frame).unwrap();
        assert_eq!(diff[[16, 16]], 160.);
        assert_eq!(diff[[0, 0]], 0.);
    }

    #[test]
    fn test_short_video_and_shape_errors() {
        let mut source = SyntheticSource::new(8, 8, 3, 0);
        let background = Background::new(&mut source, &BackgroundConfig { frames: 10 }).unwrap();
        assert!(background.subtract(0, &Image::new(4, 4)).is_err());

        let mut empty = SyntheticSource::new(8, 8, 0, 0);
        let error = Background::new(&mut empty, &BackgroundConfig::default()).unwrap_err();
        assert_eq!(error.downcast_ref::<TrackError>(), Some(&TrackError::EmptyBackground));
    }
}
