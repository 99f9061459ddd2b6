use crate::contour::Contour;
use crate::my_types::*;

/// One candidate object seen in one frame: its outline and the point that
/// stands for it.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub contour: Contour,
    pub centroid: Vector2d,
}

impl Detection {
    pub fn from_contour(contour: Contour) -> Self {
        let centroid = contour.centroid();
        Self { contour, centroid }
    }

    pub fn from_point(point: Vector2d) -> Self {
        Self::from_contour(Contour::from_point(point))
    }

    pub fn distance(&self, other: &Detection) -> f64 {
        (self.centroid - other.centroid).norm()
    }
}

impl From<Contour> for Detection {
    fn from(contour: Contour) -> Self {
        Detection::from_contour(contour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_is_euclidean() {
        let a = Detection::from_point(Vector2d::new(1., 2.));
        let b = Detection::from_point(Vector2d::new(4., 6.));
        assert_eq!(a.distance(&b), 5.);
        assert_eq!(b.distance(&a), 5.);
    }

    #[test]
    fn test_centroid_from_degenerate_contour() {
        let contour = Contour::new(vec![Vector2d::new(0., 0.), Vector2d::new(4., 0.)]);
        let detection = Detection::from(contour);
        assert_eq!(detection.centroid, Vector2d::new(2., 0.));
    }
}
