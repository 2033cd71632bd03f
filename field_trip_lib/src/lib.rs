pub mod position;
pub mod distance;
pub mod trip;
pub mod checkpoint;
pub mod visit;
pub mod user;
pub mod comms;
pub mod history;
