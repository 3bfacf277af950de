//! Axis-aligned trigger region.

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// A rectangular region in the world frame.
///
/// Corners may be given in any order; the bounds are normalized once at
/// construction so `min <= max` holds on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    min: Point2<f64>,
    max: Point2<f64>,
}

impl Geofence {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            min: Point2::new(x0.min(x1), y0.min(y1)),
            max: Point2::new(x0.max(x1), y0.max(y1)),
        }
    }

    /// Inclusive membership test: points on an edge are inside.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.min.x <= x && x <= self.max.x && self.min.y <= y && y <= self.max.y
    }

    pub fn contains_point(&self, p: &Point2<f64>) -> bool {
        self.contains(p.x, p.y)
    }

    pub fn center(&self) -> Point2<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    /// Width and height of the region.
    pub fn extent(&self) -> Vector2<f64> {
        self.max - self.min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> Geofence {
        Geofence::new(3.0, 13.0, 5.0, 16.0)
    }

    #[test]
    fn interior_points_are_inside() {
        let g = zone();
        assert!(g.contains(4.0, 14.0));
        assert!(g.contains(3.5, 15.9));
        assert!(g.contains_point(&Point2::new(4.9, 13.1)));
    }

    #[test]
    fn exterior_points_are_outside() {
        let g = zone();
        assert!(!g.contains(1.0, 1.0));
        assert!(!g.contains(2.99, 14.0));
        assert!(!g.contains(4.0, 16.01));
        assert!(!g.contains(5.5, 12.0));
    }

    #[test]
    fn edges_and_corners_are_inclusive() {
        let g = zone();
        assert!(g.contains(3.0, 13.0));
        assert!(g.contains(5.0, 16.0));
        assert!(g.contains(3.0, 14.5));
        assert!(g.contains(4.0, 16.0));
    }

    #[test]
    fn reversed_corners_normalize_to_the_same_region() {
        let reversed = Geofence::new(5.0, 16.0, 3.0, 13.0);
        let mixed = Geofence::new(3.0, 16.0, 5.0, 13.0);
        assert_eq!(reversed, zone());
        assert_eq!(mixed, zone());

        for &(x, y) in &[(1.0, 1.0), (4.0, 14.0), (3.0, 13.0), (5.0, 16.5), (6.0, 15.0)] {
            assert_eq!(reversed.contains(x, y), zone().contains(x, y), "({x}, {y})");
        }
    }

    #[test]
    fn nan_is_never_inside() {
        assert!(!zone().contains(f64::NAN, 14.0));
        assert!(!zone().contains(4.0, f64::NAN));
    }

    #[test]
    fn center_and_extent() {
        let g = zone();
        assert_eq!(g.center(), Point2::new(4.0, 14.5));
        assert_eq!(g.extent(), Vector2::new(2.0, 3.0));
    }
}
