use std::{
    ffi::CStr,
    os::raw::{c_char, c_int, c_uint},
    ptr,
    sync::{Arc, Once},
};

use chrono::{Duration, Local};

use super::*;
use crate::{
    error::NoLeaseSnafu,
    hal::{from_network_order, is_assignable, ClientInstance, Dhcp4Client, LeaseTimers},
    snapshot::{bound_snapshot, ClientSnapshot},
};

struct FixtureHal {
    ert: ClientSnapshot,
    ecm: ClientSnapshot,
    emta: ClientSnapshot,
}

impl Dhcp4cHal for FixtureHal {
    fn ert(&self) -> Box<dyn Dhcp4Client + '_> {
        Box::new(self.ert.clone())
    }

    fn ecm(&self) -> Box<dyn Dhcp4Client + '_> {
        Box::new(self.ecm.clone())
    }

    fn emta(&self) -> Box<dyn LeaseTimers + '_> {
        Box::new(self.emta.clone())
    }
}

fn fixture() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| {
        let now = Local::now();
        register(Arc::new(FixtureHal {
            ert: bound_snapshot(ClientInstance::Ert, now),
            ecm: bound_snapshot(ClientInstance::Ecm, now - Duration::seconds(50000)),
            emta: bound_snapshot(ClientInstance::Emta, now - Duration::seconds(80000)),
        }));
    });
}

type UintAccessor = unsafe extern "C" fn(*mut c_uint) -> c_int;
type IntAccessor = unsafe extern "C" fn(*mut c_int) -> c_int;
type NameAccessor = unsafe extern "C" fn(*mut c_char) -> c_int;
type ListAccessor = unsafe extern "C" fn(*mut Ipv4AddrList) -> c_int;

const LEASE_TIMES: [UintAccessor; 4] = [
    dhcpv4c_get_ert_lease_time,
    dhcpv4c_get_ecm_lease_time,
    dhcp4c_get_ert_lease_time,
    dhcp4c_get_ecm_lease_time,
];

const REMAINING_TIMES: [UintAccessor; 18] = [
    dhcpv4c_get_ert_remain_lease_time,
    dhcpv4c_get_ert_remain_renew_time,
    dhcpv4c_get_ert_remain_rebind_time,
    dhcpv4c_get_ecm_remain_lease_time,
    dhcpv4c_get_ecm_remain_renew_time,
    dhcpv4c_get_ecm_remain_rebind_time,
    dhcpv4c_get_emta_remain_lease_time,
    dhcpv4c_get_emta_remain_renew_time,
    dhcpv4c_get_emta_remain_rebind_time,
    dhcp4c_get_ert_remain_lease_time,
    dhcp4c_get_ert_remain_renew_time,
    dhcp4c_get_ert_remain_rebind_time,
    dhcp4c_get_ecm_remain_lease_time,
    dhcp4c_get_ecm_remain_renew_time,
    dhcp4c_get_ecm_remain_rebind_time,
    dhcp4c_get_emta_remain_lease_time,
    dhcp4c_get_emta_remain_renew_time,
    dhcp4c_get_emta_remain_rebind_time,
];

const ADDRESSES: [UintAccessor; 16] = [
    dhcpv4c_get_ert_ip_addr,
    dhcpv4c_get_ert_gw,
    dhcpv4c_get_ert_dhcp_svr,
    dhcpv4c_get_ecm_ip_addr,
    dhcpv4c_get_ecm_gw,
    dhcpv4c_get_ecm_dhcp_svr,
    dhcp4c_get_ert_ip_addr,
    dhcp4c_get_ert_gw,
    dhcp4c_get_ert_dhcp_svr,
    dhcp4c_get_ecm_ip_addr,
    dhcp4c_get_ecm_gw,
    dhcp4c_get_ecm_dhcp_svr,
    dhcpv4c_get_ert_mask,
    dhcpv4c_get_ecm_mask,
    dhcp4c_get_ert_mask,
    dhcp4c_get_ecm_mask,
];

const CONFIG_ATTEMPTS: [IntAccessor; 4] = [
    dhcpv4c_get_ert_config_attempts,
    dhcpv4c_get_ecm_config_attempts,
    dhcp4c_get_ert_config_attempts,
    dhcp4c_get_ecm_config_attempts,
];

const FSM_STATES: [IntAccessor; 4] = [
    dhcpv4c_get_ert_fsm_state,
    dhcpv4c_get_ecm_fsm_state,
    dhcp4c_get_ert_fsm_state,
    dhcp4c_get_ecm_fsm_state,
];

const IFNAMES: [NameAccessor; 4] = [
    dhcpv4c_get_ert_ifname,
    dhcpv4c_get_ecm_ifname,
    dhcp4c_get_ert_ifname,
    dhcp4c_get_ecm_ifname,
];

const DNS_SERVERS: [ListAccessor; 4] = [
    dhcpv4c_get_ert_dns_svrs,
    dhcpv4c_get_ecm_dns_svrs,
    dhcp4c_get_ert_dns_svrs,
    dhcp4c_get_ecm_dns_svrs,
];

#[test]
fn lease_time_in_range_test() {
    fixture();
    for accessor in LEASE_TIMES {
        let mut value: c_uint = 0;
        assert_eq!(unsafe { accessor(&mut value) }, STATUS_SUCCESS);
        assert!((60..=604800).contains(&value), "lease time {value}");
    }
}

#[test]
fn remaining_times_within_lease_test() {
    fixture();
    for accessor in REMAINING_TIMES {
        let mut value: c_uint = c_uint::MAX;
        assert_eq!(unsafe { accessor(&mut value) }, STATUS_SUCCESS);
        assert!(value <= 86400, "remaining time {value}");
    }
}

#[test]
fn remaining_times_follow_lease_age_test() {
    fixture();
    let mut renew: c_uint = 0;
    let mut rebind: c_uint = 0;
    assert_eq!(unsafe { dhcpv4c_get_ecm_remain_renew_time(&mut renew) }, STATUS_SUCCESS);
    assert_eq!(unsafe { dhcpv4c_get_ecm_remain_rebind_time(&mut rebind) }, STATUS_SUCCESS);
    assert_eq!(renew, 0);
    assert!(rebind > 0 && rebind <= 75600 - 50000);

    let mut state: c_int = 0;
    assert_eq!(unsafe { dhcpv4c_get_ecm_fsm_state(&mut state) }, STATUS_SUCCESS);
    assert_eq!(state, i32::from(crate::FsmState::Renewing));
}

#[test]
fn addresses_are_assignable_test() {
    fixture();
    for accessor in &ADDRESSES[..12] {
        let mut value: c_uint = 0;
        assert_eq!(unsafe { (*accessor)(&mut value) }, STATUS_SUCCESS);
        let addr = from_network_order(value);
        assert!(is_assignable(addr), "address {addr}");
    }
}

#[test]
fn mask_is_contiguous_test() {
    fixture();
    for accessor in &ADDRESSES[12..] {
        let mut value: c_uint = 0;
        assert_eq!(unsafe { (*accessor)(&mut value) }, STATUS_SUCCESS);
        let mask = u32::from(from_network_order(value));
        assert_eq!(mask.leading_ones() + mask.trailing_zeros(), 32);
        assert_eq!(from_network_order(value).octets(), [255, 255, 255, 0]);
    }
}

#[test]
fn config_attempts_test() {
    fixture();
    for accessor in CONFIG_ATTEMPTS {
        let mut value: c_int = -1;
        assert_eq!(unsafe { accessor(&mut value) }, STATUS_SUCCESS);
        assert_eq!(value, 2);
    }
}

#[test]
fn fsm_state_in_range_test() {
    fixture();
    for accessor in FSM_STATES {
        let mut value: c_int = 0;
        assert_eq!(unsafe { accessor(&mut value) }, STATUS_SUCCESS);
        assert!((1..=6).contains(&value), "fsm state {value}");
    }
}

#[test]
fn ifname_is_nul_terminated_test() {
    fixture();
    for accessor in IFNAMES {
        let mut buffer: [c_char; IFNAME_LEN] = [0x7f; IFNAME_LEN];
        assert_eq!(unsafe { accessor(buffer.as_mut_ptr()) }, STATUS_SUCCESS);
        let name = unsafe { CStr::from_ptr(buffer.as_ptr()) };
        assert!(!name.to_bytes().is_empty());
        assert!(name.to_bytes().len() < IFNAME_LEN);
    }

    let mut buffer: [c_char; IFNAME_LEN] = [0; IFNAME_LEN];
    assert_eq!(unsafe { dhcp4c_get_ecm_ifname(buffer.as_mut_ptr()) }, STATUS_SUCCESS);
    let name = unsafe { CStr::from_ptr(buffer.as_ptr()) };
    assert_eq!(name.to_str().unwrap(), "wan0");
}

#[test]
fn dns_servers_test() {
    fixture();
    for accessor in DNS_SERVERS {
        let mut list = Ipv4AddrList::default();
        assert_eq!(unsafe { accessor(&mut list) }, STATUS_SUCCESS);
        assert!((1..=4).contains(&list.number), "count {}", list.number);
        assert!(list.iter().all(is_assignable));
    }
}

#[test]
fn null_pointer_fails_test() {
    fixture();
    for accessor in LEASE_TIMES
        .iter()
        .chain(REMAINING_TIMES.iter())
        .chain(ADDRESSES.iter())
    {
        assert_eq!(unsafe { (*accessor)(ptr::null_mut()) }, STATUS_FAILURE);
    }
    for accessor in CONFIG_ATTEMPTS.iter().chain(FSM_STATES.iter()) {
        assert_eq!(unsafe { (*accessor)(ptr::null_mut()) }, STATUS_FAILURE);
    }
    for accessor in IFNAMES {
        assert_eq!(unsafe { accessor(ptr::null_mut()) }, STATUS_FAILURE);
    }
    for accessor in DNS_SERVERS {
        assert_eq!(unsafe { accessor(ptr::null_mut()) }, STATUS_FAILURE);
    }
}

#[test]
fn failure_leaves_output_untouched_test() {
    fixture();
    let mut value: c_uint = 12345;
    let status = export("lease_time", &mut value, |_| {
        NoLeaseSnafu {
            instance: ClientInstance::Emta,
        }
        .fail()
    });
    assert_eq!(status, STATUS_FAILURE);
    assert_eq!(value, 12345);
}

#[test]
fn oversized_ifname_fails_test() {
    fixture();
    let mut buffer: [c_char; IFNAME_LEN] = [0; IFNAME_LEN];
    let status = export_ifname("ifname", buffer.as_mut_ptr(), |_| Ok("x".repeat(IFNAME_LEN)));
    assert_eq!(status, STATUS_FAILURE);
    assert_eq!(buffer[0], 0);
}

#[test]
fn panic_becomes_failure_test() {
    fixture();
    let mut value: c_uint = 12345;
    let status = export("lease_time", &mut value, |_| -> Result<c_uint> {
        panic!("provider blew up")
    });
    assert_eq!(status, STATUS_FAILURE);
    assert_eq!(value, 12345);

    let mut buffer: [c_char; IFNAME_LEN] = [0; IFNAME_LEN];
    let status = export_ifname("ifname", buffer.as_mut_ptr(), |_| panic!("provider blew up"));
    assert_eq!(status, STATUS_FAILURE);
    assert_eq!(buffer[0], 0);
}
