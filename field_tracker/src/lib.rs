pub mod api;
pub mod backoff;
pub mod config;
pub mod error;
pub mod gpsd;
pub mod history;
pub mod lifecycle;
pub mod outbox;
pub mod realtime;
pub mod sampler;
pub mod session;
pub mod throttle;

#[cfg(test)]
mod fakes;

pub use error::{Result, TrackerError};
pub use lifecycle::{TripManager, TripState};
