//! Port to the native RCM delivery primitive.

use async_trait::async_trait;

use crate::device::DeviceId;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("device is gone")]
    DeviceGone,

    #[error("USB access denied; check device permissions")]
    Access,

    #[error("bootstrap image is too large ({size} bytes, limit {max})")]
    BootstrapTooLarge { size: usize, max: usize },

    #[error("payload does not fit into the RCM message ({size} bytes, limit {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("USB I/O error: {0}")]
    Usb(String),
}

/// One-shot delivery of bootstrap and payload into a connected RCM device.
///
/// Long-running; implementations perform the transfer on a blocking thread.
/// The device handle is borrowed only for the duration of the call.
#[async_trait]
pub trait RcmExecPort: Send + Sync {
    async fn execute(
        &self,
        device: DeviceId,
        bootstrap: &[u8],
        payload: &[u8],
    ) -> Result<(), ExecError>;
}
