//! # rb-core
//!
//! Core domain models and business logic for rcmboot.
//!
//! This crate contains pure business logic without any infrastructure
//! dependencies. USB, filesystem, and persistence access go through the
//! ports in [`ports`].

pub mod boot;
pub mod device;
pub mod payload;
pub mod ports;
pub mod rcm;

pub use boot::BootAttempt;
pub use device::{Connection, DeviceEvent, DeviceId, RcmDevice};
pub use payload::{Payload, PayloadId, StoreError, PAYLOAD_EXT};
