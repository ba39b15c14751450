//! Connection state of the recovery-mode USB device.

use serde::Serialize;

/// Identity of a USB device on the bus.
///
/// Disconnect events are matched against this, not against vendor/product,
/// since multiple compatible devices may be attached at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceId {
    pub bus: u8,
    pub address: u8,
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bus {} device {}", self.bus, self.address)
    }
}

/// A device observed in recovery mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RcmDevice {
    pub id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl std::fmt::Display for RcmDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} at {}",
            self.vendor_id, self.product_id, self.id
        )
    }
}

/// Hot-plug events raised by the USB enumeration layer.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Connected(RcmDevice),
    Disconnected(DeviceId),
    Error(String),
}

/// Connection state derived from hot-plug events. Exactly one holds at a time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum Connection {
    #[default]
    Idle,
    Error(String),
    Connected(RcmDevice),
}

impl Connection {
    /// Apply a hot-plug event. Returns whether the state changed.
    ///
    /// A disconnect only transitions to [`Connection::Idle`] when it names the
    /// currently connected device; a disconnect for any other device is a
    /// stale or unrelated event and is ignored.
    pub fn apply(&mut self, event: DeviceEvent) -> bool {
        match event {
            DeviceEvent::Connected(device) => {
                let changed = !matches!(self, Connection::Connected(current) if *current == device);
                *self = Connection::Connected(device);
                changed
            }
            DeviceEvent::Disconnected(id) => {
                let departed = matches!(self, Connection::Connected(current) if current.id == id);
                if departed {
                    *self = Connection::Idle;
                }
                departed
            }
            DeviceEvent::Error(message) => {
                *self = Connection::Error(message);
                true
            }
        }
    }

    pub fn device(&self) -> Option<&RcmDevice> {
        match self {
            Connection::Connected(device) => Some(device),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Connection::Connected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(address: u8) -> RcmDevice {
        RcmDevice {
            id: DeviceId { bus: 1, address },
            vendor_id: crate::rcm::VENDOR_ID,
            product_id: crate::rcm::PRODUCT_ID,
        }
    }

    #[test]
    fn connect_then_matching_disconnect_goes_idle() {
        let mut connection = Connection::Idle;
        assert!(connection.apply(DeviceEvent::Connected(device(4))));
        assert!(connection.is_connected());
        assert!(connection.apply(DeviceEvent::Disconnected(DeviceId { bus: 1, address: 4 })));
        assert_eq!(connection, Connection::Idle);
    }

    #[test]
    fn unrelated_disconnect_is_ignored() {
        let mut connection = Connection::Idle;
        connection.apply(DeviceEvent::Connected(device(4)));
        assert!(!connection.apply(DeviceEvent::Disconnected(DeviceId { bus: 1, address: 9 })));
        assert_eq!(connection, Connection::Connected(device(4)));
    }

    #[test]
    fn error_transitions_unconditionally_and_can_recover() {
        let mut connection = Connection::Idle;
        connection.apply(DeviceEvent::Connected(device(4)));
        assert!(connection.apply(DeviceEvent::Error("enumeration failed".into())));
        assert!(matches!(connection, Connection::Error(_)));
        assert!(connection.apply(DeviceEvent::Connected(device(5))));
        assert!(connection.is_connected());
    }

    #[test]
    fn stale_disconnect_after_supersede_is_ignored() {
        let mut connection = Connection::Idle;
        connection.apply(DeviceEvent::Connected(device(4)));
        connection.apply(DeviceEvent::Connected(device(5)));
        assert!(!connection.apply(DeviceEvent::Disconnected(DeviceId { bus: 1, address: 4 })));
        assert_eq!(connection, Connection::Connected(device(5)));
    }
}
