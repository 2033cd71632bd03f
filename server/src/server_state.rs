use field_trip_data_management::DataManager;

use crate::tracking_room::TrackingRoom;

pub struct ServerState {
    pub data_manager: DataManager,
    pub tracking_room: TrackingRoom,
}

impl ServerState {
    pub fn new(data_manager: DataManager, room_capacity: usize) -> Self {
        Self {
            data_manager,
            tracking_room: TrackingRoom::new(room_capacity),
        }
    }
}
