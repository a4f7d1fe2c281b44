mod observe;

use std::net::Ipv4Addr;

use chrono::{DateTime, Local};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt};

use crate::{
    error::{IfnameTooLongSnafu, LeaseExpiredSnafu, NoLeaseSnafu, NoRouterSnafu, Result},
    hal::{ClientInstance, Dhcp4Client, FsmState, Ipv4AddrList, LeaseTimers, IFNAME_LEN},
};

pub use self::observe::decode;

#[cfg(test)]
pub(crate) use self::observe::{ack, message};

/// Lease time value meaning "never expires".
pub const INFINITE_LEASE_TIME: u32 = u32::MAX;

#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    Init,
    Selecting,
    Requesting,
    Bound,
}

#[derive(Deserialize, Serialize, PartialEq, Eq, Clone, Debug)]
pub struct Lease {
    pub acquired_at: DateTime<Local>,
    pub lease_time: u32,
    pub renew_time: u32,
    pub rebind_time: u32,
    pub address: Ipv4Net,
    pub routers: Vec<Ipv4Addr>,
    pub domain_name_servers: Vec<Ipv4Addr>,
    pub server: Ipv4Addr,
}

impl Lease {
    pub fn elapsed_at(&self, now: DateTime<Local>) -> u32 {
        let seconds = now.signed_duration_since(self.acquired_at).num_seconds();
        u32::try_from(seconds.max(0)).unwrap_or(u32::MAX)
    }

    fn remaining_at(&self, timer: u32, now: DateTime<Local>) -> u32 {
        if timer == INFINITE_LEASE_TIME {
            return INFINITE_LEASE_TIME;
        }
        timer.saturating_sub(self.elapsed_at(now))
    }

    pub fn remain_lease_time_at(&self, now: DateTime<Local>) -> u32 {
        self.remaining_at(self.lease_time, now)
    }

    pub fn remain_renew_time_at(&self, now: DateTime<Local>) -> u32 {
        self.remaining_at(self.renew_time, now)
    }

    pub fn remain_rebind_time_at(&self, now: DateTime<Local>) -> u32 {
        self.remaining_at(self.rebind_time, now)
    }

    pub fn is_expired_at(&self, now: DateTime<Local>) -> bool {
        self.remain_lease_time_at(now) == 0
    }

    pub fn fsm_state_at(&self, now: DateTime<Local>) -> FsmState {
        if self.is_expired_at(now) {
            FsmState::Init
        } else if self.remain_renew_time_at(now) > 0 {
            FsmState::Bound
        } else if self.remain_rebind_time_at(now) > 0 {
            FsmState::Renewing
        } else {
            FsmState::Rebinding
        }
    }

    pub fn ip_addr(&self) -> Ipv4Addr {
        self.address.addr()
    }

    pub fn mask(&self) -> Ipv4Addr {
        self.address.netmask()
    }
}

/// Everything the HAL reports about one client instance.
#[derive(Deserialize, Serialize, PartialEq, Eq, Clone, Debug)]
pub struct ClientSnapshot {
    pub instance: ClientInstance,
    pub ifname: String,
    pub hardware_address: Option<Vec<u8>>,
    pub config_attempts: i32,
    pub phase: Phase,
    pub lease: Option<Lease>,
    pub updated_at: Option<DateTime<Local>>,
}

impl ClientSnapshot {
    pub fn new(instance: ClientInstance) -> ClientSnapshot {
        ClientSnapshot {
            instance,
            ifname: instance.default_ifname().to_string(),
            hardware_address: None,
            config_attempts: 0,
            phase: Phase::Init,
            lease: None,
            updated_at: None,
        }
    }

    pub fn recorded_lease(&self) -> Result<&Lease> {
        self.lease.as_ref().context(NoLeaseSnafu {
            instance: self.instance,
        })
    }

    pub fn current_lease(&self, now: DateTime<Local>) -> Result<&Lease> {
        let lease = self.recorded_lease()?;
        ensure!(
            !lease.is_expired_at(now),
            LeaseExpiredSnafu {
                instance: self.instance
            }
        );
        Ok(lease)
    }

    pub fn holds_lease(&self, now: DateTime<Local>) -> bool {
        self.current_lease(now).is_ok()
    }

    pub fn fsm_state_at(&self, now: DateTime<Local>) -> FsmState {
        match self.phase {
            Phase::Init => FsmState::Init,
            Phase::Selecting => FsmState::Selecting,
            Phase::Requesting => FsmState::Requesting,
            Phase::Bound => self
                .lease
                .as_ref()
                .map(|lease| lease.fsm_state_at(now))
                .unwrap_or(FsmState::Init),
        }
    }

    pub fn checked_ifname(&self) -> Result<&str> {
        // one byte is kept for the terminating NUL
        ensure!(
            self.ifname.len() < IFNAME_LEN && !self.ifname.contains('\0'),
            IfnameTooLongSnafu {
                name: self.ifname.clone(),
                capacity: IFNAME_LEN,
            }
        );
        Ok(&self.ifname)
    }

    pub fn gw_at(&self, now: DateTime<Local>) -> Result<Ipv4Addr> {
        self.current_lease(now)?
            .routers
            .first()
            .copied()
            .context(NoRouterSnafu {
                instance: self.instance,
            })
    }

    pub fn view_at(&self, now: DateTime<Local>) -> SnapshotView {
        SnapshotView {
            instance: self.instance,
            ifname: self.ifname.clone(),
            fsm_state: self.fsm_state_at(now),
            config_attempts: self.config_attempts,
            lease: self.lease.as_ref().map(|lease| LeaseView {
                address: lease.address,
                routers: lease.routers.clone(),
                domain_name_servers: lease.domain_name_servers.clone(),
                server: lease.server,
                acquired_at: lease.acquired_at,
                lease_time: lease.lease_time,
                remain_lease_time: lease.remain_lease_time_at(now),
                remain_renew_time: lease.remain_renew_time_at(now),
                remain_rebind_time: lease.remain_rebind_time_at(now),
            }),
        }
    }
}

impl LeaseTimers for ClientSnapshot {
    fn lease_time(&self) -> Result<u32> {
        Ok(self.recorded_lease()?.lease_time)
    }

    fn remain_lease_time(&self) -> Result<u32> {
        Ok(self.recorded_lease()?.remain_lease_time_at(Local::now()))
    }

    fn remain_renew_time(&self) -> Result<u32> {
        Ok(self.recorded_lease()?.remain_renew_time_at(Local::now()))
    }

    fn remain_rebind_time(&self) -> Result<u32> {
        Ok(self.recorded_lease()?.remain_rebind_time_at(Local::now()))
    }
}

impl Dhcp4Client for ClientSnapshot {
    fn config_attempts(&self) -> Result<i32> {
        Ok(self.config_attempts)
    }

    fn ifname(&self) -> Result<String> {
        self.checked_ifname().map(str::to_string)
    }

    fn fsm_state(&self) -> Result<FsmState> {
        Ok(self.fsm_state_at(Local::now()))
    }

    fn ip_addr(&self) -> Result<Ipv4Addr> {
        Ok(self.current_lease(Local::now())?.ip_addr())
    }

    fn mask(&self) -> Result<Ipv4Addr> {
        Ok(self.current_lease(Local::now())?.mask())
    }

    fn gw(&self) -> Result<Ipv4Addr> {
        self.gw_at(Local::now())
    }

    fn dns_svrs(&self) -> Result<Ipv4AddrList> {
        let lease = self.current_lease(Local::now())?;
        Ok(Ipv4AddrList::from_addrs(&lease.domain_name_servers))
    }

    fn dhcp_svr(&self) -> Result<Ipv4Addr> {
        Ok(self.current_lease(Local::now())?.server)
    }
}

#[derive(Serialize, PartialEq, Eq, Debug)]
pub struct LeaseView {
    pub address: Ipv4Net,
    pub routers: Vec<Ipv4Addr>,
    pub domain_name_servers: Vec<Ipv4Addr>,
    pub server: Ipv4Addr,
    pub acquired_at: DateTime<Local>,
    pub lease_time: u32,
    pub remain_lease_time: u32,
    pub remain_renew_time: u32,
    pub remain_rebind_time: u32,
}

#[derive(Serialize, PartialEq, Eq, Debug)]
pub struct SnapshotView {
    pub instance: ClientInstance,
    pub ifname: String,
    pub fsm_state: FsmState,
    pub config_attempts: i32,
    pub lease: Option<LeaseView>,
}

#[cfg(test)]
pub(crate) fn bound_snapshot(
    instance: ClientInstance,
    acquired_at: DateTime<Local>,
) -> ClientSnapshot {
    let mut snapshot = ClientSnapshot::new(instance);
    snapshot.phase = Phase::Bound;
    snapshot.config_attempts = 2;
    snapshot.lease = Some(Lease {
        acquired_at,
        lease_time: 86400,
        renew_time: 43200,
        rebind_time: 75600,
        address: "10.0.0.42/24".parse().unwrap(),
        routers: vec![Ipv4Addr::new(10, 0, 0, 1)],
        domain_name_servers: vec![Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(8, 8, 8, 8)],
        server: Ipv4Addr::new(10, 0, 0, 254),
    });
    snapshot
}

#[test]
fn lease_timers_test() {
    use chrono::Duration;

    let now = Local::now();
    let snapshot = bound_snapshot(ClientInstance::Ert, now - Duration::seconds(100));
    let lease = snapshot.recorded_lease().unwrap();
    assert_eq!(lease.elapsed_at(now), 100);
    assert_eq!(lease.remain_lease_time_at(now), 86300);
    assert_eq!(lease.remain_renew_time_at(now), 43100);
    assert_eq!(lease.remain_rebind_time_at(now), 75500);
    assert_eq!(snapshot.lease_time().unwrap(), 86400);
}

#[test]
fn remaining_saturates_test() {
    use chrono::Duration;

    let now = Local::now();
    let snapshot = bound_snapshot(ClientInstance::Ecm, now - Duration::days(3));
    let lease = snapshot.recorded_lease().unwrap();
    assert_eq!(lease.remain_lease_time_at(now), 0);
    assert_eq!(lease.remain_renew_time_at(now), 0);
    assert!(lease.is_expired_at(now));
    assert!(matches!(
        snapshot.current_lease(now),
        Err(crate::Error::LeaseExpired { .. })
    ));
    assert!(snapshot.remain_lease_time().is_ok());
    assert!(snapshot.ip_addr().is_err());
}

#[test]
fn clock_behind_acquisition_test() {
    use chrono::Duration;

    let now = Local::now();
    let snapshot = bound_snapshot(ClientInstance::Ert, now + Duration::seconds(30));
    let lease = snapshot.recorded_lease().unwrap();
    assert_eq!(lease.elapsed_at(now), 0);
    assert_eq!(lease.remain_lease_time_at(now), 86400);
}

#[test]
fn fsm_state_derivation_test() {
    use chrono::Duration;

    let acquired_at = Local::now();
    let snapshot = bound_snapshot(ClientInstance::Ert, acquired_at);
    let at = |seconds| acquired_at + Duration::seconds(seconds);
    assert_eq!(snapshot.fsm_state_at(at(0)), FsmState::Bound);
    assert_eq!(snapshot.fsm_state_at(at(43199)), FsmState::Bound);
    assert_eq!(snapshot.fsm_state_at(at(43200)), FsmState::Renewing);
    assert_eq!(snapshot.fsm_state_at(at(75600)), FsmState::Rebinding);
    assert_eq!(snapshot.fsm_state_at(at(86400)), FsmState::Init);

    let mut selecting = snapshot.clone();
    selecting.phase = Phase::Selecting;
    assert_eq!(selecting.fsm_state_at(at(0)), FsmState::Selecting);
}

#[test]
fn infinite_lease_test() {
    use chrono::Duration;

    let now = Local::now();
    let mut snapshot = bound_snapshot(ClientInstance::Ert, now - Duration::days(365));
    if let Some(lease) = snapshot.lease.as_mut() {
        lease.lease_time = INFINITE_LEASE_TIME;
        lease.renew_time = INFINITE_LEASE_TIME;
        lease.rebind_time = INFINITE_LEASE_TIME;
    }
    let lease = snapshot.recorded_lease().unwrap();
    assert_eq!(lease.remain_lease_time_at(now), INFINITE_LEASE_TIME);
    assert_eq!(snapshot.fsm_state_at(now), FsmState::Bound);
    assert!(snapshot.holds_lease(now));
}

#[test]
fn unbound_accessors_test() {
    let snapshot = ClientSnapshot::new(ClientInstance::Emta);
    assert!(matches!(snapshot.lease_time(), Err(crate::Error::NoLease { .. })));
    assert!(snapshot.dns_svrs().is_err());
    assert_eq!(snapshot.fsm_state().unwrap(), FsmState::Init);
    assert_eq!(snapshot.config_attempts().unwrap(), 0);
    assert_eq!(snapshot.ifname().unwrap(), "mta0");
}

#[test]
fn address_accessors_test() {
    let snapshot = bound_snapshot(ClientInstance::Ert, Local::now());
    assert_eq!(snapshot.ip_addr().unwrap(), Ipv4Addr::new(10, 0, 0, 42));
    assert_eq!(snapshot.mask().unwrap(), Ipv4Addr::new(255, 255, 255, 0));
    assert_eq!(snapshot.gw().unwrap(), Ipv4Addr::new(10, 0, 0, 1));
    assert_eq!(snapshot.dhcp_svr().unwrap(), Ipv4Addr::new(10, 0, 0, 254));
    let dns = snapshot.dns_svrs().unwrap();
    assert_eq!(dns.number, 2);
    assert_eq!(
        dns.iter().collect::<Vec<_>>(),
        vec![Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(8, 8, 8, 8)]
    );
}

#[test]
fn missing_router_test() {
    let mut snapshot = bound_snapshot(ClientInstance::Ecm, Local::now());
    if let Some(lease) = snapshot.lease.as_mut() {
        lease.routers.clear();
    }
    assert!(matches!(snapshot.gw(), Err(crate::Error::NoRouter { .. })));
}

#[test]
fn ifname_capacity_test() {
    let mut snapshot = ClientSnapshot::new(ClientInstance::Ert);
    snapshot.ifname = "x".repeat(IFNAME_LEN - 1);
    assert!(snapshot.ifname().is_ok());
    snapshot.ifname = "x".repeat(IFNAME_LEN);
    assert!(matches!(
        snapshot.ifname(),
        Err(crate::Error::IfnameTooLong { .. })
    ));
}

#[test]
fn encode_decode_test() {
    let snapshot = bound_snapshot(ClientInstance::Ecm, Local::now());
    let serialized = bincode::serialize(&snapshot).unwrap();
    let deserialized: ClientSnapshot = bincode::deserialize(&serialized).unwrap();
    assert_eq!(snapshot, deserialized);
}
