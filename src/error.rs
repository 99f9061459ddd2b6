use crate::my_types::FrameIndex;

/// Contract violations reported by the tracking core and its collaborators.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackError {
    #[error("frame {current} is not after previously processed frame {previous}")]
    OutOfOrderFrame {
        previous: FrameIndex,
        current: FrameIndex,
    },

    #[error("proximity threshold must be a positive number, got {0}")]
    InvalidProximity(f64),

    #[error("minimum track length must be at least 1, got {0}")]
    InvalidMinLength(usize),

    #[error("invalid value {value:?} for {name}")]
    InvalidBound { name: &'static str, value: String },

    #[error("background model needs at least one frame")]
    EmptyBackground,

    #[error("frame {index} out of range for video of {length} frames")]
    FrameOutOfRange { index: FrameIndex, length: usize },

    #[error("image of {got:?} does not match expected shape {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("unsupported video format: {0}")]
    UnsupportedFormat(String),
}
