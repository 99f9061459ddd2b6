use std::path::Path;

use cv2::prelude::*;
use opencv as cv2;

use anyhow::{bail, Context as AnyhowContext, Result};

use crate::image::Image;
use crate::path::Track;

const PATH_COLORS: [(f64, f64, f64); 4] = [
    (0.0, 0.0, 255.0),
    (0.0, 255.0, 0.0),
    (255.0, 0.0, 0.0),
    (0.0, 255.0, 255.0),
];

pub fn grayscale_to_cv_8u(img: &Image) -> Result<cv2::core::Mat> {
    let borrowed = unsafe {
        cv2::core::Mat::new_rows_cols_with_data(
            img.height as i32,
            img.width as i32,
            cv2::core::CV_8U,
            img.data.as_ptr() as *mut std::ffi::c_void,
            cv2::core::Mat_AUTO_STEP,
        )?
    };
    // copy so the Mat no longer points into `img`
    Ok(borrowed.try_clone()?)
}

/// Draw every path over a frame: a larger marker at its first point and line
/// segments between consecutive points
pub fn visualize_paths(frame: &Image, tracks: &[Track]) -> Result<cv2::core::Mat> {
    let cv_mat = grayscale_to_cv_8u(frame)?;
    let mut color_mat = cv2::core::Mat::default();
    cv2::imgproc::cvt_color(&cv_mat, &mut color_mat, cv2::imgproc::COLOR_GRAY2BGR, 0)?;

    for (i, track) in tracks.iter().enumerate() {
        let (b, g, r) = PATH_COLORS[i % PATH_COLORS.len()];
        let color = cv2::core::Scalar::new(b, g, r, 0.0);
        let mut previous_point = None;
        for (idx, (_, centroid)) in track.centroids().enumerate() {
            let current_point_cv = cv2::core::Point {
                x: centroid.x.round() as i32,
                y: centroid.y.round() as i32,
            };
            let marker_size = if idx == 0 { 7 } else { 3 };
            cv2::imgproc::draw_marker(
                &mut color_mat,
                current_point_cv,
                color,
                cv2::imgproc::MARKER_CROSS,
                marker_size,
                1,
                cv2::imgproc::LINE_8,
            )?;

            if let Some(previous_point_cv) = previous_point {
                cv2::imgproc::line(&mut color_mat, previous_point_cv, current_point_cv, color, 1, cv2::imgproc::LINE_8, 0)?;
            }

            previous_point = Some(current_point_cv);
        }
    }

    Ok(color_mat)
}

/// Write a frame with its paths drawn on to an image file
pub fn save_overlay(path: &Path, frame: &Image, tracks: &[Track]) -> Result<()> {
    let overlay = visualize_paths(frame, tracks)?;
    let filename = path
        .to_str()
        .with_context(|| format!("non utf-8 path {}", path.display()))?;
    if !cv2::imgcodecs::imwrite(filename, &overlay, &cv2::core::Vector::new())? {
        bail!("OpenCV could not write {}", path.display());
    }
    Ok(())
}
