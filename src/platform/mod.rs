pub mod alerts;
pub mod device_info;
pub mod permissions;
