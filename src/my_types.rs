use nalgebra as na; 

pub type Vector2d = na::Vector2::<f64>;

/// Zero-based index of a frame in its video
pub type FrameIndex = usize;
