#![allow(dead_code)]

pub const USERS_TABLE_NAME: &str = "Users";
pub const USER_ID: &str = "user_id";
pub const USER_NAME: &str = "user_name";
pub const TOKEN_HASH: &str = "token_hash";
pub const JOIN_TIME: &str = "join_time";

pub const TRIPS_TABLE_NAME: &str = "Trips";
pub const TRIP_ID: &str = "trip_id";
// User id
pub const STATUS: &str = "status";
pub const PURPOSE: &str = "purpose";
pub const OBJECTIVE: &str = "objective";
pub const VEHICLE_TYPE: &str = "vehicle_type";
pub const ESTIMATED_KM: &str = "estimated_km";
pub const START_TIME: &str = "start_time";
pub const START_LATITUDE: &str = "start_latitude";
pub const START_LONGITUDE: &str = "start_longitude";
pub const START_ADDRESS: &str = "start_address";
pub const END_TIME: &str = "end_time";
pub const END_LATITUDE: &str = "end_latitude";
pub const END_LONGITUDE: &str = "end_longitude";
pub const END_ADDRESS: &str = "end_address";
pub const NOTES: &str = "notes";
pub const DISTANCE_KM: &str = "distance_km";
pub const DURATION_MINUTES: &str = "duration_minutes";
pub const ONE_ACTIVE_TRIP_INDEX: &str = "OneActiveTripPerUser";

pub const CHECKPOINTS_TABLE_NAME: &str = "Checkpoints";
pub const CHECKPOINT_ID: &str = "checkpoint_id";
// Trip id
pub const SEQUENCE: &str = "sequence";
pub const TIMESTAMP: &str = "timestamp";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const ACCURACY: &str = "accuracy";
pub const SPEED: &str = "speed";
pub const HEADING: &str = "heading";

pub const VISITS_TABLE_NAME: &str = "Visits";
pub const VISIT_ID: &str = "visit_id";
pub const CUSTOMER_ID: &str = "customer_id";
// Trip id, latitude, longitude, notes, timestamp
pub const TITLE: &str = "title";
pub const PHOTO_REF: &str = "photo_ref";

pub const ACTIVE: &str = "ACTIVE";
pub const COMPLETED: &str = "COMPLETED";
