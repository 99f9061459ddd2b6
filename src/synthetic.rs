use anyhow::Result;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::image::Image;
use crate::my_types::*;
use crate::video::{check_range, FrameSource};

/// A bright disc moving in a straight line for part of the video
#[derive(Clone, Debug)]
pub struct SyntheticObject {
    pub start: Vector2d,
    pub velocity: Vector2d,
    pub radius: f64,
    pub first_frame: FrameIndex,
    pub last_frame: FrameIndex,
}

impl SyntheticObject {
    pub fn position(&self, frame_index: FrameIndex) -> Option<Vector2d> {
        if frame_index < self.first_frame || frame_index > self.last_frame {
            return None;
        }
        Some(self.start + self.velocity * (frame_index - self.first_frame) as f64)
    }
}

/// Generated frames: a flat background with uniform noise and some moving
/// discs. Every frame is reproducible from the seed alone.
#[derive(Clone, Debug)]
pub struct SyntheticSource {
    pub width: usize,
    pub height: usize,
    pub length: usize,
    pub background: u8,
    pub foreground: u8,
    pub noise: u8,
    pub objects: Vec<SyntheticObject>,
    seed: u64,
}

impl SyntheticSource {
    pub fn new(width: usize, height: usize, length: usize, seed: u64) -> Self {
        Self {
            width,
            height,
            length,
            background: 40,
            foreground: 200,
            noise: 4,
            objects: vec![],
            seed,
        }
    }

    pub fn with_object(mut self, object: SyntheticObject) -> Self {
        self.objects.push(object);
        self
    }

    /// Scatter `count` objects with random paths, leaving the frames used for
    /// the background model empty
    pub fn random(width: usize, height: usize, length: usize, count: usize, seed: u64, quiet_frames: usize) -> Self {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut source = Self::new(width, height, length, seed);
        let first_possible = quiet_frames.min(length.saturating_sub(1));
        for _ in 0..count {
            let radius = rng.gen_range(4.0..8.0);
            let margin = radius + 1.;
            let first_frame = rng.gen_range(first_possible..length.max(first_possible + 1));
            let last_frame = rng.gen_range(first_frame..length.max(first_frame + 1));
            let start = Vector2d::new(
                rng.gen_range(margin..(width as f64 - margin).max(margin + 1.)),
                rng.gen_range(margin..(height as f64 - margin).max(margin + 1.)),
            );
            let velocity = Vector2d::new(rng.gen_range(-3.0..3.0), rng.gen_range(-3.0..3.0));
            source.objects.push(SyntheticObject {
                start,
                velocity,
                radius,
                first_frame,
                last_frame,
            });
        }
        source
    }

    /// Centres of the objects visible in a frame
    pub fn positions(&self, frame_index: FrameIndex) -> Vec<Vector2d> {
        self.objects
            .iter()
            .filter_map(|o| o.position(frame_index))
            .collect()
    }

    fn frame_rng(&self, frame_index: FrameIndex) -> Xoshiro256PlusPlus {
        Xoshiro256PlusPlus::seed_from_u64(
            self.seed ^ (frame_index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15),
        )
    }
}

impl FrameSource for SyntheticSource {
    fn frame_count(&self) -> usize {
        self.length
    }

    fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn read(&mut self, frame_index: FrameIndex) -> Result<Image> {
        check_range(frame_index, self.length)?;
        let mut rng = self.frame_rng(frame_index);
        let mut image = Image::new(self.width, self.height);
        for value in image.data.iter_mut() {
            let jitter = if self.noise > 0 {
                rng.gen_range(0..=self.noise)
            } else {
                0
            };
            *value = self.background.saturating_add(jitter);
        }

        for object in &self.objects {
            let c = match object.position(frame_index) {
                Some(c) => c,
                None => continue,
            };
            let r = object.radius;
            let x0 = (c.x - r).floor().max(0.) as usize;
            let y0 = (c.y - r).floor().max(0.) as usize;
            let x1 = ((c.x + r).ceil().max(0.) as usize).min(self.width.saturating_sub(1));
            let y1 = ((c.y + r).ceil().max(0.) as usize).min(self.height.saturating_sub(1));
            for y in y0..=y1 {
                for x in x0..=x1 {
                    let d = Vector2d::new(x as f64 - c.x, y as f64 - c.y);
                    if d.norm_squared() <= r * r {
                        image.set_value(x, y, self.foreground);
                    }
                }
            }
        }
        Ok(image)
    }
}
