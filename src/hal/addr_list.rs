use std::{net::Ipv4Addr, os::raw::c_int};

pub const IPV4_ADDR_LIST_CAPACITY: usize = 4;

/// Caller-owned address list, laid out like the C `dhcpv4c_ip_list_t`.
/// Addresses are raw `in_addr` values, i.e. network byte order.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Ipv4AddrList {
    pub number: c_int,
    pub addrs: [u32; IPV4_ADDR_LIST_CAPACITY],
}

impl Ipv4AddrList {
    /// Keeps the first [`IPV4_ADDR_LIST_CAPACITY`] addresses.
    pub fn from_addrs(addrs: &[Ipv4Addr]) -> Ipv4AddrList {
        let mut list = Ipv4AddrList::default();
        for (slot, addr) in list.addrs.iter_mut().zip(addrs) {
            *slot = network_order(*addr);
            list.number += 1;
        }
        list
    }

    pub fn len(&self) -> usize {
        (self.number.max(0) as usize).min(IPV4_ADDR_LIST_CAPACITY)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.addrs[..self.len()].iter().map(|value| from_network_order(*value))
    }
}

pub fn network_order(addr: Ipv4Addr) -> u32 {
    u32::from_ne_bytes(addr.octets())
}

pub fn from_network_order(value: u32) -> Ipv4Addr {
    Ipv4Addr::from(value.to_ne_bytes())
}

/// Unicast class A, B or C address, loopback excluded.
pub fn is_assignable(addr: Ipv4Addr) -> bool {
    matches!(addr.octets()[0], 1..=126 | 128..=223)
}

#[test]
fn from_addrs_truncates_test() {
    let addrs: Vec<Ipv4Addr> = (1..=6).map(|n| Ipv4Addr::new(10, 0, 0, n)).collect();
    let list = Ipv4AddrList::from_addrs(&addrs);
    assert_eq!(list.number, 4);
    assert_eq!(list.iter().collect::<Vec<_>>(), addrs[..4].to_vec());
}

#[test]
fn network_order_test() {
    let addr = Ipv4Addr::new(192, 168, 0, 1);
    let value = network_order(addr);
    assert_eq!(value.to_ne_bytes(), [192, 168, 0, 1]);
    assert_eq!(from_network_order(value), addr);
}

#[test]
fn assignable_test() {
    assert!(is_assignable(Ipv4Addr::new(10, 1, 2, 3)));
    assert!(is_assignable(Ipv4Addr::new(172, 16, 0, 1)));
    assert!(is_assignable(Ipv4Addr::new(223, 255, 255, 0)));
    assert!(!is_assignable(Ipv4Addr::UNSPECIFIED));
    assert!(!is_assignable(Ipv4Addr::LOCALHOST));
    assert!(!is_assignable(Ipv4Addr::new(224, 0, 0, 1)));
    assert!(!is_assignable(Ipv4Addr::BROADCAST));
}

#[test]
fn negative_count_is_empty_test() {
    let list = Ipv4AddrList {
        number: -3,
        addrs: [1, 2, 3, 4],
    };
    assert!(list.is_empty());
    assert_eq!(list.iter().count(), 0);
}
