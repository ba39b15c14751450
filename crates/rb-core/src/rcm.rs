//! RCM protocol constants shared between the payload store and the USB layer.

/// NVIDIA vendor ID of a Tegra device in recovery mode.
pub const VENDOR_ID: u16 = 0x0955;

/// Product ID of the Tegra X1 in recovery mode.
pub const PRODUCT_ID: u16 = 0x7321;

/// Total RCM message budget in bytes. The whole message, command header and
/// bootstrap included, must fit into the target's IRAM.
pub const MAX_MESSAGE_SIZE: usize = 0x30298;

/// Upper bound on a user payload file in bytes: the message budget minus the
/// command header, the bootstrap region, and the stack spray headroom.
pub const MAX_PAYLOAD_SIZE: u64 = 0x28000;
