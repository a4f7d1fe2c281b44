//! DHCPv4 client status HAL for the eRouter, eCM and eMTA client instances.
//!
//! The accessors read per-instance client snapshots. Snapshots are fed by
//! observing the DHCP messages the platform's DHCP client exchanges. The
//! `dhcp4cd` daemon keeps them in a `sled` store and publishes a copy of
//! each one to the snapshot directory, which the C ABI in [`ffi`] reads.

pub mod conf;
pub mod db;
pub mod error;
pub mod ffi;
pub mod hal;
pub mod http;
pub mod provider;
pub mod snapshot;

pub use error::{Error, Result};
pub use hal::{
    ClientInstance, Dhcp4Client, Dhcp4cHal, FsmState, Ipv4AddrList, LeaseTimers, Status,
};
pub use provider::{PublishedHal, StoreHal};
pub use snapshot::{ClientSnapshot, Lease};
