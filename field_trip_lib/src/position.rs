use chrono::{DateTime, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// x is longitude, y is latitude, as geo-types expects.
    pub fn to_point(&self) -> Point {
        Point::new(self.longitude, self.latitude)
    }
}

impl From<Point> for Coordinate {
    fn from(point: Point) -> Self {
        Self::new(point.y(), point.x())
    }
}

/// A raw reading from the device. Not every sample becomes a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSample {
    pub position: Coordinate,
    /// Horizontal accuracy in meters.
    pub accuracy: f64,
    pub altitude: Option<f64>,
    /// Degrees clockwise from true north.
    pub heading: Option<f64>,
    /// Meters per second.
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PositionSample {
    pub fn new(position: Coordinate, accuracy: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            position,
            accuracy,
            altitude: None,
            heading: None,
            speed: None,
            timestamp,
        }
    }

    pub fn with_motion(mut self, speed: Option<f64>, heading: Option<f64>) -> Self {
        self.speed = speed;
        self.heading = heading;
        self
    }
}
