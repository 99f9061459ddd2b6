use ndarray as nd;

use crate::error::TrackError;

/// Row-major grayscale image storage
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Image {
    /// Create a black image of the given size
    pub fn new(width: usize, height: usize) -> Image {
        Image {
            data: vec![0; width * height],
            width,
            height,
        }
    }

    /// Wrap existing pixel data, checking its length
    pub fn from_data(data: Vec<u8>, width: usize, height: usize) -> Result<Image, TrackError> {
        if data.len() != width * height {
            return Err(TrackError::ShapeMismatch {
                expected: (width, height),
                got: (data.len(), 1),
            });
        }
        Ok(Image { data, width, height })
    }

    /// Average interleaved color channels down to one gray channel
    pub fn from_interleaved(
        data: &[u8],
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<Image, TrackError> {
        if channels == 0 || data.len() != width * height * channels {
            return Err(TrackError::ShapeMismatch {
                expected: (width, height),
                got: (data.len(), channels),
            });
        }
        let gray = data
            .chunks_exact(channels)
            .map(|px| {
                let sum: u32 = px.iter().map(|&v| v as u32).sum();
                ((sum as f64) / channels as f64).round() as u8
            })
            .collect();
        Ok(Image {
            data: gray,
            width,
            height,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline(always)]
    pub fn value(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    /// Pixel value, zero outside of the image
    #[inline(always)]
    pub fn value_i32(&self, x: i32, y: i32) -> u8 {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return 0;
        }
        self.data[y as usize * self.width + x as usize]
    }

    #[inline(always)]
    pub fn set_value(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x] = value;
    }

    /// View as a float array indexed `[row, column]`
    pub fn to_array(&self) -> nd::Array2<f64> {
        nd::Array2::from_shape_fn((self.height, self.width), |(y, x)| self.value(x, y) as f64)
    }

    /// Round and saturate a float array into an 8 bit image
    pub fn from_array(array: &nd::Array2<f64>) -> Image {
        let (height, width) = array.dim();
        let data = array
            .iter()
            .map(|&v| {
                if v.is_nan() {
                    0
                } else {
                    v.round().clamp(0., 255.) as u8
                }
            })
            .collect();
        Image { data, width, height }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_conversion() {
        let mut image = Image::new(3, 2);
        image.set_value(2, 1, 200);
        let array = image.to_array();
        assert_eq!(array.dim(), (2, 3));
        assert_eq!(array[[1, 2]], 200.);
        assert_eq!(Image::from_array(&array), image);
    }

    #[test]
    fn test_from_array_saturates() {
        let array = nd::arr2(&[[-4.0, 12.4, 12.6, 300.0]]);
        let image = Image::from_array(&array);
        assert_eq!(image.data, vec![0, 12, 13, 255]);
    }

    #[test]
    fn test_interleaved_to_gray() {
        let rgb = [30, 60, 90, 255, 255, 255];
        let image = Image::from_interleaved(&rgb, 2, 1, 3).unwrap();
        assert_eq!(image.data, vec![60, 255]);
        assert!(Image::from_interleaved(&rgb, 3, 1, 3).is_err());
    }

    #[test]
    fn test_value_outside_is_zero() {
        let image = Image::from_data(vec![9; 4], 2, 2).unwrap();
        assert_eq!(image.value_i32(-1, 0), 0);
        assert_eq!(image.value_i32(1, 2), 0);
        assert_eq!(image.value_i32(1, 1), 9);
    }
}
