pub mod background;
pub mod config;
pub mod contour;
pub mod dataset;
pub mod detection;
pub mod detector;
pub mod error;
pub mod export;
pub mod image;
pub mod my_types;
pub mod path;
pub mod segment;
pub mod synthetic;
pub mod tracker;
pub mod video;
#[cfg(feature = "opencv")]
pub mod visualization;
