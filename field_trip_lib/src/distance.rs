//! Great-circle distance and the running polyline length of a session.

use crate::position::Coordinate;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in meters between two latitude/longitude pairs given in degrees.
pub fn haversine_distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);

    // Rounding can push `a` marginally above 1 for antipodal points.
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

pub fn distance_between(a: &Coordinate, b: &Coordinate) -> f64 {
    haversine_distance_meters(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Length of the polyline through `points`, in order.
pub fn polyline_distance_meters<'a>(points: impl IntoIterator<Item = &'a Coordinate>) -> f64 {
    let mut accumulator = DistanceAccumulator::new();
    for point in points {
        accumulator.push(*point);
    }
    accumulator.total_meters()
}

/// Sums the distance from each pushed point to the one pushed right before it.
///
/// This is the length of the sampled polyline, so it depends on the sampling
/// interval. GPS jitter is not filtered.
#[derive(Debug, Clone, Default)]
pub struct DistanceAccumulator {
    last: Option<Coordinate>,
    total_meters: f64,
}

impl DistanceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the meters added by this point.
    pub fn push(&mut self, point: Coordinate) -> f64 {
        let added = match self.last {
            Some(previous) => distance_between(&previous, &point),
            None => 0.0,
        };
        self.total_meters += added;
        self.last = Some(point);
        added
    }

    pub fn total_meters(&self) -> f64 {
        self.total_meters
    }

    pub fn total_km(&self) -> f64 {
        self.total_meters / 1000.0
    }

    pub fn last(&self) -> Option<Coordinate> {
        self.last
    }
}
