//! USB collaborators: hotplug enumeration and the RCM delivery primitive.

pub mod exec;
pub mod hotplug;
pub mod message;
