#[cfg(test)]
use std::net::Ipv4Addr;

use anyhow::{bail, ensure, Result};
use chrono::{DateTime, Local};
use dhcproto::{
    v4::{DhcpOption, Message, MessageType, OptionCode},
    Decodable, Decoder,
};
use ipnet::Ipv4Net;
use log::{debug, warn};
use mac_address::MacAddress;

use super::{ClientSnapshot, Lease, Phase, INFINITE_LEASE_TIME};
use crate::hal::{is_assignable, IPV4_ADDR_LIST_CAPACITY};

const CHADDR_LEN: usize = 16;

pub fn decode(buffer: &[u8]) -> Result<Message> {
    let mut decoder = Decoder::new(buffer);
    let message = Message::decode(&mut decoder)?;
    Ok(message)
}

fn default_renew_time(lease_time: u32) -> u32 {
    if lease_time == INFINITE_LEASE_TIME {
        return INFINITE_LEASE_TIME;
    }
    lease_time / 2
}

fn default_rebind_time(lease_time: u32) -> u32 {
    if lease_time == INFINITE_LEASE_TIME {
        return INFINITE_LEASE_TIME;
    }
    (u64::from(lease_time) * 7 / 8) as u32
}

impl Lease {
    pub fn from_ack(message: &Message, now: DateTime<Local>) -> Result<Lease> {
        let opts = message.opts();
        let Some(DhcpOption::AddressLeaseTime(lease_time)) = opts.get(OptionCode::AddressLeaseTime)
        else {
            bail!("ACK carries no address lease time");
        };
        let lease_time = *lease_time;

        let mut renew_time = match opts.get(OptionCode::Renewal) {
            Some(DhcpOption::Renewal(t1)) => *t1,
            _ => default_renew_time(lease_time),
        };
        let mut rebind_time = match opts.get(OptionCode::Rebinding) {
            Some(DhcpOption::Rebinding(t2)) => *t2,
            _ => default_rebind_time(lease_time),
        };
        if !(renew_time <= rebind_time && rebind_time <= lease_time) {
            warn!(
                "ACK timers T1={renew_time} T2={rebind_time} lease={lease_time} are inconsistent, \
                 using defaults"
            );
            renew_time = default_renew_time(lease_time);
            rebind_time = default_rebind_time(lease_time);
        }

        let ip_addr = message.yiaddr();
        ensure!(is_assignable(ip_addr), "ACK assigns unusable address {ip_addr}");
        let prefix_len = match opts.get(OptionCode::SubnetMask) {
            Some(DhcpOption::SubnetMask(mask)) => ipnet::ipv4_mask_to_prefix(*mask)?,
            _ => 32,
        };

        let routers = match opts.get(OptionCode::Router) {
            Some(DhcpOption::Router(routers)) => routers.clone(),
            _ => vec![],
        };
        let domain_name_servers = match opts.get(OptionCode::DomainNameServer) {
            Some(DhcpOption::DomainNameServer(servers)) => servers
                .iter()
                .copied()
                .take(IPV4_ADDR_LIST_CAPACITY)
                .collect(),
            _ => vec![],
        };
        let server = match opts.get(OptionCode::ServerIdentifier) {
            Some(DhcpOption::ServerIdentifier(server)) => *server,
            _ => message.siaddr(),
        };

        Ok(Lease {
            acquired_at: now,
            lease_time,
            renew_time,
            rebind_time,
            address: Ipv4Net::new(ip_addr, prefix_len)?,
            routers,
            domain_name_servers,
            server,
        })
    }
}

impl ClientSnapshot {
    /// Folds one message exchanged by this client into the snapshot.
    pub fn observe(&mut self, message: &Message, now: DateTime<Local>) -> Result<()> {
        let Some(msg_type) = message.opts().msg_type() else {
            bail!("Message type is not included.");
        };
        let hlen = usize::from(message.hlen());
        ensure!(
            hlen <= CHADDR_LEN,
            "Hardware address length {hlen} exceeds the {CHADDR_LEN} byte chaddr field"
        );
        self.check_hardware_address(message.chaddr())?;

        match msg_type {
            MessageType::Discover => {
                self.config_attempts = self.config_attempts.saturating_add(1);
                self.phase = Phase::Selecting;
            }
            MessageType::Request => {
                self.config_attempts = self.config_attempts.saturating_add(1);
                if !(self.phase == Phase::Bound && self.holds_lease(now)) {
                    self.phase = Phase::Requesting;
                }
            }
            MessageType::Ack => {
                let lease = Lease::from_ack(message, now)?;
                debug!(
                    "{} bound {} for {}s from {}",
                    self.instance, lease.address, lease.lease_time, lease.server
                );
                self.lease = Some(lease);
                self.phase = Phase::Bound;
            }
            MessageType::Nak | MessageType::Release | MessageType::Decline => {
                debug!("{} lease dropped by {msg_type:?}", self.instance);
                self.lease = None;
                self.phase = Phase::Init;
            }
            ty => {
                debug!("{} ignoring {ty:?}", self.instance);
                return Ok(());
            }
        }
        self.updated_at = Some(now);
        Ok(())
    }

    fn check_hardware_address(&mut self, chaddr: &[u8]) -> Result<()> {
        match &self.hardware_address {
            Some(hw) => ensure!(
                chaddr.starts_with(hw),
                "{} is not the {} client's hardware address",
                format_hw(chaddr),
                self.instance
            ),
            None => {
                ensure!(
                    chaddr.iter().any(|b| *b != 0),
                    "Message carries no client hardware address"
                );
                self.hardware_address = Some(chaddr.to_vec());
            }
        }
        Ok(())
    }
}

fn format_hw(hw: &[u8]) -> String {
    match <[u8; 6]>::try_from(hw) {
        Ok(ethernet) => MacAddress::new(ethernet).to_string(),
        Err(_) => hw
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":"),
    }
}

#[cfg(test)]
const CHADDR: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];

#[cfg(test)]
pub(crate) fn message(ty: MessageType) -> Message {
    let mut message = Message::default();
    message.set_chaddr(&CHADDR);
    message.opts_mut().insert(DhcpOption::MessageType(ty));
    message
}

#[cfg(test)]
pub(crate) fn ack() -> Message {
    let mut message = message(MessageType::Ack);
    message.set_yiaddr(Ipv4Addr::new(192, 168, 100, 10));
    let opts = message.opts_mut();
    opts.insert(DhcpOption::AddressLeaseTime(3600));
    opts.insert(DhcpOption::SubnetMask(Ipv4Addr::new(255, 255, 255, 0)));
    opts.insert(DhcpOption::Router(vec![Ipv4Addr::new(192, 168, 100, 1)]));
    opts.insert(DhcpOption::DomainNameServer(vec![
        Ipv4Addr::new(192, 168, 100, 1),
        Ipv4Addr::new(1, 1, 1, 1),
        Ipv4Addr::new(8, 8, 8, 8),
        Ipv4Addr::new(8, 8, 4, 4),
        Ipv4Addr::new(9, 9, 9, 9),
    ]));
    opts.insert(DhcpOption::ServerIdentifier(Ipv4Addr::new(192, 168, 100, 1)));
    message
}

#[test]
fn ack_binds_lease_test() {
    use crate::hal::{ClientInstance, FsmState};

    let now = Local::now();
    let mut snapshot = ClientSnapshot::new(ClientInstance::Ert);
    snapshot.observe(&message(MessageType::Discover), now).unwrap();
    assert_eq!(snapshot.fsm_state_at(now), FsmState::Selecting);
    snapshot.observe(&message(MessageType::Request), now).unwrap();
    assert_eq!(snapshot.fsm_state_at(now), FsmState::Requesting);
    snapshot.observe(&ack(), now).unwrap();

    assert_eq!(snapshot.fsm_state_at(now), FsmState::Bound);
    assert_eq!(snapshot.config_attempts, 2);
    assert_eq!(snapshot.hardware_address, Some(CHADDR.to_vec()));
    let lease = snapshot.current_lease(now).unwrap();
    assert_eq!(lease.lease_time, 3600);
    assert_eq!(lease.renew_time, 1800);
    assert_eq!(lease.rebind_time, 3150);
    assert_eq!(lease.address, "192.168.100.10/24".parse::<Ipv4Net>().unwrap());
    assert_eq!(lease.routers, vec![Ipv4Addr::new(192, 168, 100, 1)]);
    assert_eq!(lease.domain_name_servers.len(), IPV4_ADDR_LIST_CAPACITY);
    assert_eq!(lease.server, Ipv4Addr::new(192, 168, 100, 1));
}

#[test]
fn explicit_timers_test() {
    use crate::hal::ClientInstance;

    let mut message = ack();
    message.opts_mut().insert(DhcpOption::Renewal(600));
    message.opts_mut().insert(DhcpOption::Rebinding(3000));
    let mut snapshot = ClientSnapshot::new(ClientInstance::Ecm);
    snapshot.observe(&message, Local::now()).unwrap();
    let lease = snapshot.lease.unwrap();
    assert_eq!((lease.renew_time, lease.rebind_time), (600, 3000));
}

#[test]
fn inconsistent_timers_fall_back_test() {
    let mut message = ack();
    message.opts_mut().insert(DhcpOption::Renewal(3000));
    message.opts_mut().insert(DhcpOption::Rebinding(600));
    let lease = Lease::from_ack(&message, Local::now()).unwrap();
    assert_eq!((lease.renew_time, lease.rebind_time), (1800, 3150));
}

#[test]
fn ack_without_lease_time_test() {
    let mut message = message(MessageType::Ack);
    message.set_yiaddr(Ipv4Addr::new(192, 168, 100, 10));
    assert!(Lease::from_ack(&message, Local::now()).is_err());
}

#[test]
fn ack_without_address_test() {
    let mut message = ack();
    message.set_yiaddr(Ipv4Addr::UNSPECIFIED);
    assert!(Lease::from_ack(&message, Local::now()).is_err());
}

#[test]
fn nak_clears_lease_test() {
    use crate::hal::{ClientInstance, FsmState};

    let now = Local::now();
    let mut snapshot = ClientSnapshot::new(ClientInstance::Ert);
    snapshot.observe(&ack(), now).unwrap();
    snapshot.observe(&message(MessageType::Nak), now).unwrap();
    assert!(snapshot.lease.is_none());
    assert_eq!(snapshot.fsm_state_at(now), FsmState::Init);
}

#[test]
fn renewing_request_keeps_bound_test() {
    use crate::hal::{ClientInstance, FsmState};
    use chrono::Duration;

    let acquired_at = Local::now();
    let mut snapshot = ClientSnapshot::new(ClientInstance::Ert);
    snapshot.observe(&ack(), acquired_at).unwrap();
    let t1 = acquired_at + Duration::seconds(1800);
    snapshot.observe(&message(MessageType::Request), t1).unwrap();
    assert_eq!(snapshot.phase, Phase::Bound);
    assert_eq!(snapshot.fsm_state_at(t1), FsmState::Renewing);
}

#[test]
fn foreign_hardware_address_test() {
    use crate::hal::ClientInstance;

    let mut snapshot = ClientSnapshot::new(ClientInstance::Ert);
    snapshot.hardware_address = Some(vec![0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    assert!(snapshot.observe(&ack(), Local::now()).is_err());
    assert!(snapshot.lease.is_none());
}

#[test]
fn missing_message_type_test() {
    use crate::hal::ClientInstance;

    let mut message = Message::default();
    message.set_chaddr(&CHADDR);
    let mut snapshot = ClientSnapshot::new(ClientInstance::Ert);
    assert!(snapshot.observe(&message, Local::now()).is_err());
}

#[test]
fn offer_is_ignored_test() {
    use crate::hal::ClientInstance;

    let mut snapshot = ClientSnapshot::new(ClientInstance::Ecm);
    snapshot
        .observe(&message(MessageType::Offer), Local::now())
        .unwrap();
    assert_eq!(snapshot.phase, Phase::Init);
    assert!(snapshot.updated_at.is_none());
}

#[test]
fn decode_round_trip_test() {
    use dhcproto::{Encodable, Encoder};

    let mut buffer = Vec::with_capacity(1024);
    let mut encoder = Encoder::new(&mut buffer);
    ack().encode(&mut encoder).unwrap();
    let decoded = decode(&buffer).unwrap();
    assert_eq!(decoded.opts().msg_type(), Some(MessageType::Ack));
    assert_eq!(decoded.yiaddr(), Ipv4Addr::new(192, 168, 100, 10));
}

#[test]
fn release_and_decline_clear_lease_test() {
    use crate::hal::{ClientInstance, FsmState};

    let now = Local::now();
    for ty in [MessageType::Release, MessageType::Decline] {
        let mut snapshot = ClientSnapshot::new(ClientInstance::Ecm);
        snapshot.observe(&ack(), now).unwrap();
        snapshot.observe(&message(ty), now).unwrap();
        assert!(snapshot.lease.is_none(), "{ty:?}");
        assert_eq!(snapshot.phase, Phase::Init);
        assert_eq!(snapshot.fsm_state_at(now), FsmState::Init);
    }
}

#[test]
fn discover_while_bound_keeps_lease_test() {
    use crate::hal::{ClientInstance, FsmState};

    let now = Local::now();
    let mut snapshot = ClientSnapshot::new(ClientInstance::Ert);
    snapshot.observe(&ack(), now).unwrap();
    snapshot.observe(&message(MessageType::Discover), now).unwrap();
    assert_eq!(snapshot.fsm_state_at(now), FsmState::Selecting);
    assert_eq!(snapshot.config_attempts, 1);
    let lease = snapshot.current_lease(now).unwrap();
    assert_eq!(lease.ip_addr(), Ipv4Addr::new(192, 168, 100, 10));
}

#[test]
fn oversized_hardware_length_test() {
    use crate::hal::ClientInstance;

    let mut message = ack();
    message.set_chaddr(&[0x11; 20]);
    assert_eq!(message.hlen(), 20);
    let mut snapshot = ClientSnapshot::new(ClientInstance::Ert);
    assert!(snapshot.observe(&message, Local::now()).is_err());
    assert!(snapshot.hardware_address.is_none());
    assert!(snapshot.lease.is_none());
}

#[test]
fn format_hw_test() {
    assert_eq!(format_hw(&CHADDR), "00:11:22:33:44:55");
    assert_eq!(format_hw(&[0xab, 0x01]), "AB:01");
}
