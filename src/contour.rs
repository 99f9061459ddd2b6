use std::collections::VecDeque;

use tracing::info;

use crate::config::{Bound, FilterConfig};
use crate::image::Image;
use crate::my_types::*;

/// Guards against a zero perimeter in the area/perimeter ratio
const RATIO_EPSILON: f64 = 0.01;

/// The eight neighbours, clockwise on screen (y grows downwards) from east.
const NEIGHBOURS: [[i32; 2]; 8] = [
    [1, 0],
    [1, 1],
    [0, 1],
    [-1, 1],
    [-1, 0],
    [-1, -1],
    [0, -1],
    [1, -1],
];
const WEST: usize = 4;

/// Closed outline of a blob, vertices in pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Contour {
    pub points: Vec<Vector2d>,
}

/// Zeroth and first order moments of the region a contour encloses
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl Contour {
    pub fn new(points: Vec<Vector2d>) -> Contour {
        Contour { points }
    }

    /// A single vertex, for detections that only carry a position
    pub fn from_point(point: Vector2d) -> Contour {
        Contour {
            points: vec![point],
        }
    }

    fn edges(&self) -> impl Iterator<Item = (&Vector2d, &Vector2d)> {
        let next = self.points.iter().cycle().skip(1);
        self.points.iter().zip(next)
    }

    /// Polygon moments by Green's theorem. `m00` is signed by orientation.
    pub fn moments(&self) -> Moments {
        let mut m = Moments {
            m00: 0.,
            m10: 0.,
            m01: 0.,
        };
        for (a, b) in self.edges() {
            let cross = a.x * b.y - b.x * a.y;
            m.m00 += cross;
            m.m10 += (a.x + b.x) * cross;
            m.m01 += (a.y + b.y) * cross;
        }
        m.m00 /= 2.;
        m.m10 /= 6.;
        m.m01 /= 6.;
        m
    }

    /// Enclosed area, always non-negative
    pub fn area(&self) -> f64 {
        self.moments().m00.abs()
    }

    /// Length of the closed outline
    pub fn perimeter(&self) -> f64 {
        if self.points.len() < 2 {
            return 0.;
        }
        self.edges().map(|(a, b)| (b - a).norm()).sum()
    }

    pub fn ratio(&self) -> f64 {
        self.area() / (self.perimeter() + RATIO_EPSILON)
    }

    /// Area weighted centre. Outlines enclosing no area (points, lines) use
    /// the mean of their vertices instead, and an empty outline sits at the
    /// origin.
    pub fn centroid(&self) -> Vector2d {
        if self.points.is_empty() {
            return Vector2d::zeros();
        }
        let m = self.moments();
        let scale: f64 = self
            .edges()
            .map(|(a, b)| (a.x * b.y - b.x * a.y).abs())
            .sum();
        if scale == 0. || (2. * m.m00).abs() <= 1e-12 * scale {
            return self.vertex_mean();
        }
        Vector2d::new(m.m10 / m.m00, m.m01 / m.m00)
    }

    pub fn vertex_mean(&self) -> Vector2d {
        let sum = self
            .points
            .iter()
            .fold(Vector2d::zeros(), |acc, p| acc + p);
        sum / self.points.len().max(1) as f64
    }
}

/// Outer outlines of every 8-connected foreground (non-zero) blob in a binary
/// image, in raster order of their top-left pixel. Straight runs are reduced
/// to their end points.
pub fn contours_from_image(mask: &Image) -> Vec<Contour> {
    let (w, h) = (mask.width, mask.height);
    let mut labelled = vec![false; w * h];
    let mut contours = vec![];
    let mut queue = VecDeque::new();

    for y in 0..h {
        for x in 0..w {
            if mask.value(x, y) == 0 || labelled[y * w + x] {
                continue;
            }
            // flood the blob so its other pixels don't start new contours
            let mut size = 0;
            labelled[y * w + x] = true;
            queue.push_back((x, y));
            while let Some((px, py)) = queue.pop_front() {
                size += 1;
                for n in NEIGHBOURS.iter() {
                    let (qx, qy) = (px as i32 + n[0], py as i32 + n[1]);
                    if mask.value_i32(qx, qy) != 0 {
                        let i = qy as usize * w + qx as usize;
                        if !labelled[i] {
                            labelled[i] = true;
                            queue.push_back((qx as usize, qy as usize));
                        }
                    }
                }
            }
            let boundary = trace_boundary(mask, [x as i32, y as i32], size);
            contours.push(Contour::new(compress(&boundary)));
        }
    }
    contours
}

fn direction(from: [i32; 2], to: [i32; 2]) -> usize {
    let d = [to[0] - from[0], to[1] - from[1]];
    NEIGHBOURS.iter().position(|n| *n == d).unwrap_or(WEST)
}

/// One Moore-neighbour step: scan clockwise around `p` starting after the
/// background pixel `back`. Returns the next boundary pixel and its new
/// background pixel.
fn step(mask: &Image, p: [i32; 2], back: [i32; 2]) -> Option<([i32; 2], [i32; 2])> {
    let k = direction(p, back);
    for i in 1..=8 {
        let d = NEIGHBOURS[(k + i) % 8];
        let q = [p[0] + d[0], p[1] + d[1]];
        if mask.value_i32(q[0], q[1]) != 0 {
            let b = NEIGHBOURS[(k + i - 1) % 8];
            return Some((q, [p[0] + b[0], p[1] + b[1]]));
        }
    }
    None
}

/// `start` must be the first blob pixel in raster order, so its west
/// neighbour is background.
fn trace_boundary(mask: &Image, start: [i32; 2], blob_size: usize) -> Vec<[i32; 2]> {
    let mut boundary = vec![start];
    let west = NEIGHBOURS[WEST];
    let (first, mut back) = match step(mask, start, [start[0] + west[0], start[1] + west[1]]) {
        Some(next) => next,
        None => return boundary,
    };
    let mut p = first;
    // a boundary pixel is visited at most four times
    let limit = 4 * blob_size + 8;
    while boundary.len() < limit {
        let (next, next_back) = match step(mask, p, back) {
            Some(next) => next,
            None => break,
        };
        if p == start && next == first {
            break;
        }
        boundary.push(p);
        p = next;
        back = next_back;
    }
    boundary
}

/// Drop vertices in the middle of straight runs
fn compress(boundary: &[[i32; 2]]) -> Vec<Vector2d> {
    let n = boundary.len();
    let to_vector = |p: &[i32; 2]| Vector2d::new(p[0] as f64, p[1] as f64);
    if n < 3 {
        return boundary.iter().map(to_vector).collect();
    }
    (0..n)
        .filter(|&i| {
            let prev = boundary[(i + n - 1) % n];
            let cur = boundary[i];
            let next = boundary[(i + 1) % n];
            [cur[0] - prev[0], cur[1] - prev[1]] != [next[0] - cur[0], next[1] - cur[1]]
        })
        .map(|i| to_vector(&boundary[i]))
        .collect()
}

fn above(value: f64, bound: Bound) -> bool {
    bound.get().map_or(true, |b| value > b)
}

fn below(value: f64, bound: Bound) -> bool {
    bound.get().map_or(true, |b| value < b)
}

/// Keeps contours whose area, perimeter and area/perimeter ratio each lie
/// strictly inside their configured bounds.
#[derive(Debug, Clone)]
pub struct ContourFilter {
    config: FilterConfig,
}

impl ContourFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut FilterConfig {
        &mut self.config
    }

    /// Log and return the current criteria
    pub fn criteria(&self) -> FilterConfig {
        info!("contour filter: {}", self.config);
        self.config
    }

    pub fn meets_filters(&self, contour: &Contour) -> bool {
        let c = &self.config;
        let area = contour.area();
        let perimeter = contour.perimeter();
        let ratio = area / (perimeter + RATIO_EPSILON);
        above(area, c.area_min)
            && below(area, c.area_max)
            && above(perimeter, c.perim_min)
            && below(perimeter, c.perim_max)
            && above(ratio, c.ratio_min)
            && below(ratio, c.ratio_max)
    }

    pub fn filter(&self, contours: Vec<Contour>) -> Vec<Contour> {
        contours
            .into_iter()
            .filter(|c| self.meets_filters(c))
            .collect()
    }

    /// Contour a binary image and keep what passes
    pub fn contour_and_filter(&self, mask: &Image) -> Vec<Contour> {
        self.filter(contours_from_image(mask))
    }

    pub fn filtered_centers(&self, mask: &Image) -> Vec<Vector2d> {
        self.contour_and_filter(mask)
            .iter()
            .map(Contour::centroid)
            .collect()
    }
}

pub fn unfiltered_centers(mask: &Image) -> Vec<Vector2d> {
    contours_from_image(mask)
        .iter()
        .map(Contour::centroid)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f64, y: f64) -> Vector2d {
        Vector2d::new(x, y)
    }

    fn fill(mask: &mut Image, x0: usize, y0: usize, w: usize, h: usize) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                mask.set_value(x, y, 255);
            }
        }
    }

    #[test]
    fn test_square_measures() {
        let square = Contour::new(vec![v(0., 0.), v(4., 0.), v(4., 4.), v(0., 4.)]);
        assert_eq!(square.area(), 16.);
        assert_eq!(square.perimeter(), 16.);
        assert!((square.ratio() - 16. / 16.01).abs() < 1e-12);
        assert!((square.centroid() - v(2., 2.)).norm() < 1e-12);
    }

    #[test]
    fn test_area_weighted_centroid() {
        // the dense vertices on the left must not pull the centre
        let polygon = Contour::new(vec![
            v(0., 0.),
            v(10., 0.),
            v(10., 2.),
            v(0., 2.),
            v(0., 1.5),
            v(0., 1.),
            v(0., 0.5),
        ]);
        assert!((polygon.centroid() - v(5., 1.)).norm() < 1e-12);
        assert!((polygon.vertex_mean() - v(20. / 7., 1.)).norm() < 1e-12);
    }

    #[test]
    fn test_degenerate_centroid_falls_back_to_vertex_mean() {
        let line = Contour::new(vec![v(1., 1.), v(3., 3.), v(5., 5.), v(3., 3.)]);
        assert_eq!(line.area(), 0.);
        let c = line.centroid();
        assert!(c.x.is_finite() && c.y.is_finite());
        assert_eq!(c, v(3., 3.));

        let point = Contour::from_point(v(7.5, -2.));
        assert_eq!(point.centroid(), v(7.5, -2.));
        assert_eq!(point.perimeter(), 0.);
        assert_eq!(Contour::new(vec![]).centroid(), Vector2d::zeros());
    }

    #[test]
    fn test_trace_rectangle() {
        let mut mask = Image::new(12, 10);
        fill(&mut mask, 2, 3, 5, 4);
        let contours = contours_from_image(&mask);
        assert_eq!(contours.len(), 1);
        assert_eq!(
            contours[0].points,
            vec![v(2., 3.), v(6., 3.), v(6., 6.), v(2., 6.)]
        );
        assert_eq!(contours[0].area(), 12.);
        assert!((contours[0].centroid() - v(4., 4.5)).norm() < 1e-12);
    }

    #[test]
    fn test_single_pixel_and_diagonal_blobs() {
        let mut mask = Image::new(10, 10);
        mask.set_value(1, 1, 255);
        for i in 0..4 {
            mask.set_value(5 + i, 3 + i, 255);
        }
        let contours = contours_from_image(&mask);
        assert_eq!(contours.len(), 2);
        assert_eq!(contours[0].points, vec![v(1., 1.)]);
        assert_eq!(contours[1].points, vec![v(5., 3.), v(8., 6.)]);
        assert_eq!(contours[1].centroid(), v(6.5, 4.5));
        assert_eq!(contours[1].area(), 0.);
    }

    #[test]
    fn test_blob_with_concavity() {
        // U shape: 5x5 block with a 1 pixel notch cut from the top middle
        let mut mask = Image::new(9, 9);
        fill(&mut mask, 2, 2, 5, 5);
        mask.set_value(4, 2, 0);
        mask.set_value(4, 3, 0);
        let contours = contours_from_image(&mask);
        assert_eq!(contours.len(), 1);
        let area = contours[0].area();
        assert!(area > 12. && area < 16.);
        assert!(contours[0].points.contains(&v(4., 4.)));
    }

    #[test]
    fn test_filter_bounds() {
        let square = |side: f64| {
            Contour::new(vec![v(0., 0.), v(side, 0.), v(side, side), v(0., side)])
        };
        let filter = ContourFilter::new(FilterConfig::default());
        // area 9 is not above 10
        assert!(!filter.meets_filters(&square(3.)));
        assert!(filter.meets_filters(&square(10.)));
        // perimeter 400 is not below 400
        assert!(!filter.meets_filters(&square(100.)));

        let mut filter = ContourFilter::new(FilterConfig::unbounded());
        assert!(filter.meets_filters(&Contour::from_point(v(1., 1.))));
        filter.config_mut().ratio_min = Bound(Some(2.));
        assert!(!filter.meets_filters(&square(4.)));
        assert!(filter.meets_filters(&square(20.)));
        assert_eq!(filter.criteria().ratio_min, Bound(Some(2.)));
    }

    #[test]
    fn test_filtered_centers() {
        let mut mask = Image::new(40, 40);
        fill(&mut mask, 5, 5, 6, 6);
        mask.set_value(30, 30, 255);
        let filter = ContourFilter::new(FilterConfig::default());
        assert_eq!(unfiltered_centers(&mask).len(), 2);
        let centers = filter.filtered_centers(&mask);
        assert_eq!(centers.len(), 1);
        assert!((centers[0] - v(7.5, 7.5)).norm() < 1e-12);
    }
}
