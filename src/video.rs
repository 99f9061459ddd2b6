use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as AnyhowContext, Result};
use image::{GenericImageView, ImageFormat};
use log::{debug, info};

use crate::error::TrackError;
use crate::image::Image;
use crate::my_types::*;

/// Random access to the frames of one video, converted to grayscale.
pub trait FrameSource {
    /// Number of frames, known once the source is open
    fn frame_count(&self) -> usize;

    /// (width, height) of every frame
    fn shape(&self) -> (usize, usize);

    fn read(&mut self, frame_index: FrameIndex) -> Result<Image>;
}

/// Open a video, picking the backend from the path.
///
/// Directories of frames and single still images are decoded with the
/// `image` crate. `.tif`/`.tiff` stacks and video containers need the
/// `opencv` feature.
pub fn open(path: &Path) -> Result<Box<dyn FrameSource>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    info!("opening video {}", path.display());
    if path.is_dir() {
        return Ok(Box::new(ImageSequence::open_dir(path)?));
    }
    match ext.as_str() {
        "tif" | "tiff" => open_tiff(path),
        _ if ImageFormat::from_path(path).is_ok() => Ok(Box::new(ImageSequence::open_file(path)?)),
        _ => open_video(path),
    }
}

#[cfg(feature = "opencv")]
fn open_tiff(path: &Path) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(cv_backend::TiffStack::open(path)?))
}

#[cfg(not(feature = "opencv"))]
fn open_tiff(path: &Path) -> Result<Box<dyn FrameSource>> {
    Err(TrackError::UnsupportedFormat(format!(
        "{} (tiff stacks need the opencv feature)",
        path.display()
    ))
    .into())
}

#[cfg(feature = "opencv")]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(cv_backend::VideoCapture::open(path)?))
}

#[cfg(not(feature = "opencv"))]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>> {
    Err(TrackError::UnsupportedFormat(format!(
        "{} (video containers need the opencv feature)",
        path.display()
    ))
    .into())
}

/// Lazily walks a source from its first to its last frame. Once exhausted it
/// stays exhausted.
pub struct Frames<'a> {
    source: &'a mut dyn FrameSource,
    next: FrameIndex,
    length: usize,
}

pub fn frames(source: &mut dyn FrameSource) -> Frames<'_> {
    let length = source.frame_count();
    Frames {
        source,
        next: 0,
        length,
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<(FrameIndex, Image)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.length {
            return None;
        }
        let frame_index = self.next;
        self.next += 1;
        Some(self.source.read(frame_index).map(|image| (frame_index, image)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.length - self.next;
        (left, Some(left))
    }
}

pub(crate) fn check_range(frame_index: FrameIndex, length: usize) -> Result<(), TrackError> {
    if frame_index >= length {
        return Err(TrackError::FrameOutOfRange {
            index: frame_index,
            length,
        });
    }
    Ok(())
}

/// Still images read through the `image` crate: every decodable file of a
/// directory in name order, or a single image as a one frame video.
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    shape: (usize, usize),
}

fn is_image_file(path: &Path) -> bool {
    path.is_file() && ImageFormat::from_path(path).is_ok()
}

impl ImageSequence {
    pub fn open_dir(dir: &Path) -> Result<ImageSequence> {
        let mut paths = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_image_file(p))
            .collect::<Vec<_>>();
        paths.sort();
        Self::from_paths(paths, dir)
    }

    pub fn open_file(path: &Path) -> Result<ImageSequence> {
        Self::from_paths(vec![path.to_path_buf()], path)
    }

    fn from_paths(paths: Vec<PathBuf>, origin: &Path) -> Result<ImageSequence> {
        let first = paths
            .first()
            .ok_or_else(|| anyhow!("No image frames found in {}", origin.display()))?;
        let shape = image_shape(first)?;
        for path in &paths[1..] {
            let got = image_shape(path)?;
            if got != shape {
                return Err(TrackError::ShapeMismatch { expected: shape, got })
                    .with_context(|| format!("in {}", path.display()));
            }
        }
        debug!("{} image frames of {:?}", paths.len(), shape);
        Ok(ImageSequence { paths, shape })
    }
}

fn image_shape(path: &Path) -> Result<(usize, usize)> {
    let (width, height) = image::image_dimensions(path)
        .with_context(|| format!("Failed to read the header of {}", path.display()))?;
    Ok((width as usize, height as usize))
}

impl FrameSource for ImageSequence {
    fn frame_count(&self) -> usize {
        self.paths.len()
    }

    fn shape(&self) -> (usize, usize) {
        self.shape
    }

    fn read(&mut self, frame_index: FrameIndex) -> Result<Image> {
        check_range(frame_index, self.paths.len())?;
        let path = &self.paths[frame_index];
        let decoded = image::open(path).with_context(|| format!("Failed to decode {}", path.display()))?;
        let (width, height) = (decoded.width() as usize, decoded.height() as usize);
        if (width, height) != self.shape {
            return Err(TrackError::ShapeMismatch {
                expected: self.shape,
                got: (width, height),
            }
            .into());
        }
        let image = if decoded.color().has_color() {
            Image::from_interleaved(decoded.into_rgb8().as_raw(), width, height, 3)?
        } else {
            Image::from_data(decoded.into_luma8().into_raw(), width, height)?
        };
        Ok(image)
    }
}

/// Save a frame, the format following the file extension
pub fn write_frame(path: &Path, image: &Image) -> Result<()> {
    image::save_buffer(
        path,
        &image.data,
        image.width as u32,
        image.height as u32,
        image::ColorType::L8,
    )
    .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(feature = "opencv")]
mod cv_backend {
    use anyhow::{bail, Context as AnyhowContext, Result};
    use cv2::prelude::*;
    use opencv as cv2;
    use std::path::Path;

    use super::{check_range, FrameSource};
    use crate::image::Image;
    use crate::my_types::*;

    fn path_str(path: &Path) -> Result<&str> {
        path.to_str()
            .with_context(|| format!("non utf-8 path {}", path.display()))
    }

    fn mat_to_image(mat: &cv2::core::Mat) -> Result<Image> {
        let mut mat8 = cv2::core::Mat::default();
        let mat = if mat.depth() == cv2::core::CV_16U {
            mat.convert_to(&mut mat8, cv2::core::CV_8U, 1. / 256., 0.)?;
            &mat8
        } else if mat.depth() != cv2::core::CV_8U {
            bail!("unsupported pixel depth {}", mat.depth());
        } else {
            mat
        };
        let size = mat.size()?;
        let channels = mat.channels() as usize;
        let continuous;
        let mat = if mat.is_continuous() {
            mat
        } else {
            continuous = mat.try_clone()?;
            &continuous
        };
        Ok(Image::from_interleaved(
            mat.data_bytes()?,
            size.width as usize,
            size.height as usize,
            channels,
        )?)
    }

    pub struct VideoCapture {
        capture: cv2::videoio::VideoCapture,
        length: usize,
        shape: (usize, usize),
    }

    impl VideoCapture {
        pub fn open(path: &Path) -> Result<Self> {
            let capture = cv2::videoio::VideoCapture::from_file(path_str(path)?, cv2::videoio::CAP_ANY)?;
            if !capture.is_opened()? {
                bail!("OpenCV could not open {}", path.display());
            }
            let length = capture.get(cv2::videoio::CAP_PROP_FRAME_COUNT)? as usize;
            let shape = (
                capture.get(cv2::videoio::CAP_PROP_FRAME_WIDTH)? as usize,
                capture.get(cv2::videoio::CAP_PROP_FRAME_HEIGHT)? as usize,
            );
            Ok(Self {
                capture,
                length,
                shape,
            })
        }
    }

    impl FrameSource for VideoCapture {
        fn frame_count(&self) -> usize {
            self.length
        }

        fn shape(&self) -> (usize, usize) {
            self.shape
        }

        fn read(&mut self, frame_index: FrameIndex) -> Result<Image> {
            check_range(frame_index, self.length)?;
            self.capture
                .set(cv2::videoio::CAP_PROP_POS_FRAMES, frame_index as f64)?;
            let mut mat = cv2::core::Mat::default();
            if !self.capture.read(&mut mat)? {
                bail!("failed to decode frame {}", frame_index);
            }
            mat_to_image(&mat)
        }
    }

    pub struct TiffStack {
        filename: String,
        length: usize,
        shape: (usize, usize),
    }

    impl TiffStack {
        pub fn open(path: &Path) -> Result<Self> {
            let filename = path_str(path)?.to_string();
            let length = cv2::imgcodecs::imcount(&filename, cv2::imgcodecs::IMREAD_UNCHANGED)? as usize;
            let mut stack = Self {
                filename,
                length,
                shape: (0, 0),
            };
            let first = stack.read(0)?;
            stack.shape = first.shape();
            Ok(stack)
        }
    }

    impl FrameSource for TiffStack {
        fn frame_count(&self) -> usize {
            self.length
        }

        fn shape(&self) -> (usize, usize) {
            self.shape
        }

        fn read(&mut self, frame_index: FrameIndex) -> Result<Image> {
            check_range(frame_index, self.length)?;
            let mut pages = cv2::core::Vector::<cv2::core::Mat>::new();
            let ok = cv2::imgcodecs::imreadmulti_range(
                &self.filename,
                &mut pages,
                frame_index as i32,
                1,
                cv2::imgcodecs::IMREAD_UNCHANGED,
            )?;
            if !ok || pages.is_empty() {
                bail!("failed to read page {} of {}", frame_index, self.filename);
            }
            mat_to_image(&pages.get(0)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: usize, height: usize, offset: u8) -> Image {
        let mut image = Image::new(width, height);
        for y in 0..height {
            for x in 0..width {
                image.set_value(x, y, (x + y) as u8 + offset);
            }
        }
        image
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("hvtrack-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_frame_directory_sorted() {
        let dir = temp_path("frames");
        std::fs::create_dir_all(&dir).unwrap();
        let images: Vec<Image> = (0..3).map(|i| gradient(5, 4, i * 10)).collect();
        for (i, image) in images.iter().enumerate().rev() {
            write_frame(&dir.join(format!("frame_{:04}.png", i)), image).unwrap();
        }
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let mut source = open(&dir).unwrap();
        assert_eq!(source.frame_count(), 3);
        assert_eq!(source.shape(), (5, 4));
        assert_eq!(source.read(2).unwrap(), images[2]);
        assert_eq!(source.read(0).unwrap(), images[0]);
        assert!(source.read(3).is_err());

        let read: Vec<_> = frames(source.as_mut()).map(|f| f.unwrap()).collect();
        std::fs::remove_dir_all(&dir).unwrap();
        assert_eq!(read.len(), 3);
        assert_eq!(read[1], (1, images[1].clone()));
    }

    #[test]
    fn test_single_pgm_with_comment() {
        let mut bytes = b"P5\n# made by hand\n2 1\n255\n".to_vec();
        bytes.extend_from_slice(&[200, 0]);
        let path = temp_path("comment.pgm");
        std::fs::write(&path, &bytes).unwrap();
        let mut source = open(&path).unwrap();
        let image = source.read(0).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(source.frame_count(), 1);
        assert_eq!(image.data, vec![200, 0]);
    }

    #[test]
    fn test_color_frames_averaged() {
        let path = temp_path("color.png");
        image::save_buffer(&path, &[30, 60, 90, 0, 0, 3], 2, 1, image::ColorType::Rgb8).unwrap();
        let mut source = open(&path).unwrap();
        let image = source.read(0).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(image.data, vec![60, 1]);
    }

    #[test]
    fn test_mismatched_frames_rejected() {
        let dir = temp_path("mismatch");
        std::fs::create_dir_all(&dir).unwrap();
        write_frame(&dir.join("a.png"), &gradient(4, 3, 0)).unwrap();
        write_frame(&dir.join("b.png"), &gradient(3, 3, 0)).unwrap();
        let result = ImageSequence::open_dir(&dir);
        std::fs::remove_dir_all(&dir).unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_headers_are_errors() {
        // dimensions that overflow, then ones far larger than the payload
        for (name, header) in [
            ("overflow.pgm", "P5\n4294967296 4294967296\n255\n"),
            ("short.pgm", "P5\n60000 60000\n255\n"),
        ] {
            let path = temp_path(name);
            let mut bytes = header.as_bytes().to_vec();
            bytes.extend_from_slice(&[0; 16]);
            std::fs::write(&path, &bytes).unwrap();
            let result = open(&path).and_then(|mut source| source.read(0));
            std::fs::remove_file(&path).unwrap();
            assert!(result.is_err(), "{}", name);
        }
    }

    #[cfg(not(feature = "opencv"))]
    #[test]
    fn test_unsupported_without_opencv() {
        let error = open(Path::new("flight.avi")).err().unwrap();
        assert!(matches!(
            error.downcast_ref::<TrackError>(),
            Some(TrackError::UnsupportedFormat(_))
        ));
    }
}
