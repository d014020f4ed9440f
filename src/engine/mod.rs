pub mod alerts;
pub mod deliveries;
pub mod drivers;
pub mod geofences;
pub mod maintenance;
