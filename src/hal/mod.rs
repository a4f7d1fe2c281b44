mod addr_list;
mod fsm;

use std::{fmt, net::Ipv4Addr, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use self::{
    addr_list::{
        from_network_order, is_assignable, network_order, Ipv4AddrList, IPV4_ADDR_LIST_CAPACITY,
    },
    fsm::FsmState,
};

/// Size of the caller buffer the interface name accessors write into,
/// terminating NUL included.
pub const IFNAME_LEN: usize = 64;

pub const STATUS_SUCCESS: i32 = 0;
pub const STATUS_FAILURE: i32 = -1;

#[repr(i32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    Success = STATUS_SUCCESS,
    Failure = STATUS_FAILURE,
}

impl<T> From<&Result<T>> for Status {
    fn from(value: &Result<T>) -> Self {
        match value {
            Ok(_) => Status::Success,
            Err(_) => Status::Failure,
        }
    }
}

impl From<Status> for i32 {
    fn from(value: Status) -> Self {
        value as i32
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[serde(rename_all = "lowercase")]
pub enum ClientInstance {
    /// WAN-facing eRouter client.
    Ert,
    /// Cable-modem client.
    Ecm,
    /// Embedded MTA (voice) client.
    Emta,
}

impl ClientInstance {
    pub const ALL: [ClientInstance; 3] = [
        ClientInstance::Ert,
        ClientInstance::Ecm,
        ClientInstance::Emta,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientInstance::Ert => "ert",
            ClientInstance::Ecm => "ecm",
            ClientInstance::Emta => "emta",
        }
    }

    pub fn default_ifname(&self) -> &'static str {
        match self {
            ClientInstance::Ert => "erouter0",
            ClientInstance::Ecm => "wan0",
            ClientInstance::Emta => "mta0",
        }
    }
}

impl fmt::Display for ClientInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClientInstance::Ert => "eRouter",
            ClientInstance::Ecm => "eCM",
            ClientInstance::Emta => "eMTA",
        })
    }
}

impl FromStr for ClientInstance {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ClientInstance::ALL
            .into_iter()
            .find(|instance| instance.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown DHCPv4 client instance '{s}'"))
    }
}

/// Lease timers, in seconds. The only accessors the eMTA client exposes.
pub trait LeaseTimers {
    fn lease_time(&self) -> Result<u32>;
    fn remain_lease_time(&self) -> Result<u32>;
    fn remain_renew_time(&self) -> Result<u32>;
    fn remain_rebind_time(&self) -> Result<u32>;
}

/// Full accessor set of the eRouter and eCM clients.
pub trait Dhcp4Client: LeaseTimers {
    fn config_attempts(&self) -> Result<i32>;
    fn ifname(&self) -> Result<String>;
    fn fsm_state(&self) -> Result<FsmState>;
    fn ip_addr(&self) -> Result<Ipv4Addr>;
    fn mask(&self) -> Result<Ipv4Addr>;
    fn gw(&self) -> Result<Ipv4Addr>;
    fn dns_svrs(&self) -> Result<Ipv4AddrList>;
    fn dhcp_svr(&self) -> Result<Ipv4Addr>;
}

pub trait Dhcp4cHal: Send + Sync {
    fn ert(&self) -> Box<dyn Dhcp4Client + '_>;
    fn ecm(&self) -> Box<dyn Dhcp4Client + '_>;
    fn emta(&self) -> Box<dyn LeaseTimers + '_>;
}

#[test]
fn instance_parse_test() {
    assert_eq!("ert".parse::<ClientInstance>(), Ok(ClientInstance::Ert));
    assert_eq!("eCM".parse::<ClientInstance>(), Ok(ClientInstance::Ecm));
    assert_eq!("EMTA".parse::<ClientInstance>(), Ok(ClientInstance::Emta));
    assert!("mta".parse::<ClientInstance>().is_err());
}

#[test]
fn status_test() {
    let ok: Result<u32> = Ok(60);
    let err: Result<u32> = Err(crate::Error::NullPointer { accessor: "x" });
    assert_eq!(i32::from(Status::from(&ok)), STATUS_SUCCESS);
    assert_eq!(i32::from(Status::from(&err)), STATUS_FAILURE);
}
