//! Platform collaborators for rcmboot.
//!
//! Everything here touches the outside world: libusb hotplug enumeration,
//! the RCM USB delivery primitive, and filesystem change notifications.
//! Events cross into the application layer over channels only.

pub mod folder_watch;
pub mod usb;

pub use folder_watch::{FolderWatcher, WatchError, DEBOUNCE_WINDOW};
pub use usb::exec::UsbRcmExec;
pub use usb::hotplug::{UsbDeviceMonitor, UsbWatchError};
