use ndarray as nd;

use crate::config::SegmentConfig;
use crate::error::TrackError;
use crate::image::Image;

const FOREGROUND: u8 = 255;

/// Turns a background-subtracted frame into a binary foreground mask:
/// threshold, then a morphological opening to drop speckle.
#[derive(Debug, Clone)]
pub struct Segment {
    config: SegmentConfig,
}

impl Segment {
    pub fn new(config: SegmentConfig) -> Result<Segment, TrackError> {
        config.validate()?;
        Ok(Segment { config })
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SegmentConfig) -> Result<(), TrackError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Threshold and open with the current settings
    pub fn segment(&self, diff: &nd::Array2<f64>) -> Image {
        let image = Image::from_array(diff);
        let binary = if self.config.absolute {
            abs_thresh(&image, self.config.min_thresh, self.config.invert)
        } else {
            adaptive_thresh(&image, self.config.thresh_area, self.config.invert)
        };
        open(&binary, self.config.open_x, self.config.open_y)
    }
}

fn binary(is_set: bool, invert: bool) -> u8 {
    if is_set != invert {
        FOREGROUND
    } else {
        0
    }
}

/// Pixels strictly brighter than `min_thresh` become foreground
pub fn abs_thresh(image: &Image, min_thresh: f64, invert: bool) -> Image {
    let data = image
        .data
        .iter()
        .map(|&v| binary(v as f64 > min_thresh, invert))
        .collect();
    Image {
        data,
        width: image.width,
        height: image.height,
    }
}

/// Pixels brighter than the Gaussian weighted mean of their `block` x `block`
/// neighbourhood become foreground
pub fn adaptive_thresh(image: &Image, block: usize, invert: bool) -> Image {
    let kernel = gaussian_kernel(block);
    let local_mean = convolve_separable(&image.to_array(), &kernel);
    let data = image
        .data
        .iter()
        .zip(local_mean.iter())
        .map(|(&v, &mean)| binary(v as f64 > mean.round(), invert))
        .collect();
    Image {
        data,
        width: image.width,
        height: image.height,
    }
}

/// Normalized 1D Gaussian whose sigma follows the kernel size the same way
/// OpenCV derives it
fn gaussian_kernel(size: usize) -> Vec<f64> {
    let sigma = 0.3 * ((size as f64 - 1.) * 0.5 - 1.) + 0.8;
    let center = (size as f64 - 1.) / 2.;
    let mut kernel: Vec<f64> = (0..size)
        .map(|i| {
            let d = i as f64 - center;
            (-d * d / (2. * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

/// Convolve rows then columns, replicating edge pixels
fn convolve_separable(array: &nd::Array2<f64>, kernel: &[f64]) -> nd::Array2<f64> {
    let (height, width) = array.dim();
    if height == 0 || width == 0 {
        return array.clone();
    }
    let r = (kernel.len() / 2) as isize;
    let clamp = |i: isize, n: usize| i.clamp(0, n as isize - 1) as usize;

    let mut rows = nd::Array2::<f64>::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            rows[[y, x]] = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * array[[y, clamp(x as isize + k as isize - r, width)]])
                .sum();
        }
    }
    let mut out = nd::Array2::<f64>::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            out[[y, x]] = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * rows[[clamp(y as isize + k as isize - r, height), x]])
                .sum();
        }
    }
    out
}

#[derive(Clone, Copy)]
enum Morph {
    Erode,
    Dilate,
}

/// Min (erode) or max (dilate) over a `kx` x `ky` rectangle anchored at its
/// centre. Pixels outside the image never win.
fn morph(image: &Image, kx: usize, ky: usize, op: Morph) -> Image {
    let pick = |a: u8, b: u8| match op {
        Morph::Erode => a.min(b),
        Morph::Dilate => a.max(b),
    };
    let identity = match op {
        Morph::Erode => u8::MAX,
        Morph::Dilate => u8::MIN,
    };
    let (w, h) = (image.width as isize, image.height as isize);
    let (ax, ay) = ((kx / 2) as isize, (ky / 2) as isize);

    let mut rows = Image::new(image.width, image.height);
    for y in 0..h {
        for x in 0..w {
            let mut acc = identity;
            for dx in 0..kx as isize {
                let sx = x + dx - ax;
                if sx >= 0 && sx < w {
                    acc = pick(acc, image.value(sx as usize, y as usize));
                }
            }
            rows.set_value(x as usize, y as usize, acc);
        }
    }
    let mut out = Image::new(image.width, image.height);
    for y in 0..h {
        for x in 0..w {
            let mut acc = identity;
            for dy in 0..ky as isize {
                let sy = y + dy - ay;
                if sy >= 0 && sy < h {
                    acc = pick(acc, rows.value(x as usize, sy as usize));
                }
            }
            out.set_value(x as usize, y as usize, acc);
        }
    }
    out
}

pub fn erode(image: &Image, kx: usize, ky: usize) -> Image {
    morph(image, kx, ky, Morph::Erode)
}

pub fn dilate(image: &Image, kx: usize, ky: usize) -> Image {
    morph(image, kx, ky, Morph::Dilate)
}

/// Erode then dilate, removing anything smaller than the kernel
pub fn open(image: &Image, kx: usize, ky: usize) -> Image {
    dilate(&erode(image, kx, ky), kx, ky)
}
