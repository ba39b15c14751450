//! USB hotplug monitoring.
//!
//! Owns the libusb hotplug registration for its whole lifetime: the filter is
//! installed before events start, and dropping the monitor deregisters it.
//! Events are marshaled from the libusb event thread into the control loop
//! over a channel; nothing here touches shared state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::time::Duration;

use rusb::{Context, Device, HotplugBuilder, UsbContext};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use rb_core::device::{DeviceEvent, DeviceId, RcmDevice};

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum UsbWatchError {
    #[error("USB hotplug events are not supported on this platform")]
    HotplugUnsupported,

    #[error("failed to start USB enumeration: {0}")]
    Init(String),
}

struct HotplugHandler {
    events: mpsc::Sender<DeviceEvent>,
}

impl HotplugHandler {
    fn send(&self, event: DeviceEvent) {
        // runs on the dedicated enumeration thread, so blocking is fine and
        // keeps delivery lossless and in order
        if self.events.blocking_send(event).is_err() {
            debug!("device event dropped; control loop is gone");
        }
    }
}

impl rusb::Hotplug<Context> for HotplugHandler {
    fn device_arrived(&mut self, device: Device<Context>) {
        let id = DeviceId {
            bus: device.bus_number(),
            address: device.address(),
        };
        match device.device_descriptor() {
            Ok(descriptor) => self.send(DeviceEvent::Connected(RcmDevice {
                id,
                vendor_id: descriptor.vendor_id(),
                product_id: descriptor.product_id(),
            })),
            Err(error) => self.send(DeviceEvent::Error(format!(
                "could not read descriptor of {id}: {error}"
            ))),
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        self.send(DeviceEvent::Disconnected(DeviceId {
            bus: device.bus_number(),
            address: device.address(),
        }));
    }
}

/// Watches the bus for devices matching one vendor/product pair.
///
/// Already-connected matching devices are reported immediately on start.
pub struct UsbDeviceMonitor {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl UsbDeviceMonitor {
    pub fn start(
        vendor_id: u16,
        product_id: u16,
        events: mpsc::Sender<DeviceEvent>,
    ) -> Result<Self, UsbWatchError> {
        if !rusb::has_hotplug() {
            return Err(UsbWatchError::HotplugUnsupported);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let (ready_tx, ready_rx) = std_mpsc::channel();

        // Registration and event handling both live on a dedicated thread;
        // hotplug callbacks may fire during registration already.
        let thread = std::thread::Builder::new()
            .name("usb-hotplug".into())
            .spawn(move || {
                let context = match Context::new() {
                    Ok(context) => context,
                    Err(error) => {
                        let _ = ready_tx.send(Err(UsbWatchError::Init(error.to_string())));
                        return;
                    }
                };
                let registration = match HotplugBuilder::new()
                    .vendor_id(vendor_id)
                    .product_id(product_id)
                    .enumerate(true)
                    .register(
                        context.clone(),
                        Box::new(HotplugHandler {
                            events: events.clone(),
                        }),
                    ) {
                    Ok(registration) => registration,
                    Err(error) => {
                        let _ = ready_tx.send(Err(UsbWatchError::Init(error.to_string())));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                while !thread_stop.load(Ordering::Relaxed) {
                    if let Err(error) = context.handle_events(Some(EVENT_POLL_INTERVAL)) {
                        warn!(%error, "USB event handling failed");
                        if events
                            .blocking_send(DeviceEvent::Error(format!(
                                "USB event handling: {error}"
                            )))
                            .is_err()
                        {
                            break;
                        }
                        // keep watching; the next hotplug event may succeed
                        std::thread::sleep(EVENT_POLL_INTERVAL);
                    }
                }
                drop(registration);
            })
            .map_err(|error| UsbWatchError::Init(error.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop,
                thread: Some(thread),
            }),
            Ok(Err(error)) => {
                let _ = thread.join();
                Err(error)
            }
            Err(_) => {
                let _ = thread.join();
                Err(UsbWatchError::Init(
                    "enumeration thread exited before becoming ready".into(),
                ))
            }
        }
    }
}

impl Drop for UsbDeviceMonitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
