//! C ABI of the HAL.
//!
//! Every accessor is exported under both header prefixes, `dhcpv4c_get_*`
//! and `dhcp4c_get_*`. Accessors return [`STATUS_SUCCESS`] after writing the
//! output, or [`STATUS_FAILURE`] for a null output pointer or when the value
//! is not available. Nothing is written on failure, and a panic never
//! crosses into the caller.
//!
//! Unless a provider is [`register`]ed, accessors read the snapshots that
//! `dhcp4cd` publishes, so they work while the daemon owns the store.

use std::{
    net::Ipv4Addr,
    os::raw::{c_char, c_int, c_uint},
    panic::{self, AssertUnwindSafe},
    ptr::NonNull,
    sync::{Arc, PoisonError, RwLock},
};

use log::{debug, warn};
use once_cell::sync::Lazy;
use snafu::{ensure, OptionExt};

use crate::{
    conf::Dhcp4cConfig,
    error::{Error, IfnameTooLongSnafu, NullPointerSnafu, PanickedSnafu, Result},
    hal::{network_order, Dhcp4cHal, Ipv4AddrList, Status, IFNAME_LEN},
    provider::PublishedHal,
};

pub use crate::hal::{STATUS_FAILURE, STATUS_SUCCESS};

static PROVIDER: Lazy<RwLock<Option<Arc<dyn Dhcp4cHal>>>> = Lazy::new(|| RwLock::new(None));

/// Installs the provider every accessor reads from, replacing any previous one.
pub fn register(hal: Arc<dyn Dhcp4cHal>) {
    *PROVIDER.write().unwrap_or_else(PoisonError::into_inner) = Some(hal);
}

fn provider() -> Result<Arc<dyn Dhcp4cHal>> {
    if let Some(hal) = PROVIDER
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
    {
        return Ok(hal.clone());
    }

    let mut slot = PROVIDER.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(hal) = slot.as_ref() {
        return Ok(hal.clone());
    }
    let hal: Arc<dyn Dhcp4cHal> = Dhcp4cConfig::try_load()
        .map(|config| Arc::new(PublishedHal::from_config(&config)))
        .map_err(|e| Error::Unavailable {
            message: format!("{e:#}"),
        })?;
    *slot = Some(hal.clone());
    Ok(hal)
}

fn guarded(accessor: &'static str, work: impl FnOnce() -> Result<()>) -> Result<()> {
    panic::catch_unwind(AssertUnwindSafe(work))
        .unwrap_or_else(|_| PanickedSnafu { accessor }.fail())
}

fn status<T>(accessor: &'static str, result: &Result<T>) -> c_int {
    if let Err(e) = result {
        match e {
            Error::NullPointer { .. } => debug!("{e}"),
            _ => warn!("{accessor}: {e}"),
        }
    }
    Status::from(result).into()
}

fn export<T>(
    accessor: &'static str,
    out: *mut T,
    get: impl FnOnce(&dyn Dhcp4cHal) -> Result<T>,
) -> c_int {
    let result = guarded(accessor, || {
        let out = NonNull::new(out).context(NullPointerSnafu { accessor })?;
        let value = get(provider()?.as_ref())?;
        // SAFETY: the caller hands in storage for one `T`; it may be
        // uninitialized, so it is written without being read or dropped.
        unsafe { out.as_ptr().write(value) };
        Ok(())
    });
    status(accessor, &result)
}

fn export_addr(
    accessor: &'static str,
    out: *mut c_uint,
    get: impl FnOnce(&dyn Dhcp4cHal) -> Result<Ipv4Addr>,
) -> c_int {
    export(accessor, out, |hal| get(hal).map(network_order))
}

fn export_ifname(
    accessor: &'static str,
    out: *mut c_char,
    get: impl FnOnce(&dyn Dhcp4cHal) -> Result<String>,
) -> c_int {
    let result = guarded(accessor, || {
        let out = NonNull::new(out).context(NullPointerSnafu { accessor })?;
        let name = get(provider()?.as_ref())?;
        let bytes = name.as_bytes();
        ensure!(
            bytes.len() < IFNAME_LEN,
            IfnameTooLongSnafu {
                name: name.clone(),
                capacity: IFNAME_LEN,
            }
        );
        // SAFETY: the caller's buffer holds IFNAME_LEN bytes and the name
        // plus its NUL fits in that.
        unsafe {
            let dst = out.as_ptr().cast::<u8>();
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
            dst.add(bytes.len()).write(0);
        }
        Ok(())
    });
    status(accessor, &result)
}

macro_rules! accessors {
    ($( $kind:ident $name:ident / $alias:ident ($out:ty) => |$hal:ident| $get:expr; )*) => {$(
        /// # Safety
        ///
        /// The argument must be null or point to writable storage of the
        /// documented type.
        #[no_mangle]
        pub unsafe extern "C" fn $name(out: *mut $out) -> c_int {
            $kind(stringify!($name), out, |$hal: &dyn Dhcp4cHal| $get)
        }

        /// # Safety
        ///
        /// Same contract as the `dhcpv4c_` accessor of the same name.
        #[no_mangle]
        pub unsafe extern "C" fn $alias(out: *mut $out) -> c_int {
            $name(out)
        }
    )*};
}

accessors! {
    export dhcpv4c_get_ert_lease_time / dhcp4c_get_ert_lease_time (c_uint) => |hal| hal.ert().lease_time();
    export dhcpv4c_get_ert_remain_lease_time / dhcp4c_get_ert_remain_lease_time (c_uint) => |hal| hal.ert().remain_lease_time();
    export dhcpv4c_get_ert_remain_renew_time / dhcp4c_get_ert_remain_renew_time (c_uint) => |hal| hal.ert().remain_renew_time();
    export dhcpv4c_get_ert_remain_rebind_time / dhcp4c_get_ert_remain_rebind_time (c_uint) => |hal| hal.ert().remain_rebind_time();
    export dhcpv4c_get_ert_config_attempts / dhcp4c_get_ert_config_attempts (c_int) => |hal| hal.ert().config_attempts();
    export_ifname dhcpv4c_get_ert_ifname / dhcp4c_get_ert_ifname (c_char) => |hal| hal.ert().ifname();
    export dhcpv4c_get_ert_fsm_state / dhcp4c_get_ert_fsm_state (c_int) => |hal| hal.ert().fsm_state().map(i32::from);
    export_addr dhcpv4c_get_ert_ip_addr / dhcp4c_get_ert_ip_addr (c_uint) => |hal| hal.ert().ip_addr();
    export_addr dhcpv4c_get_ert_mask / dhcp4c_get_ert_mask (c_uint) => |hal| hal.ert().mask();
    export_addr dhcpv4c_get_ert_gw / dhcp4c_get_ert_gw (c_uint) => |hal| hal.ert().gw();
    export dhcpv4c_get_ert_dns_svrs / dhcp4c_get_ert_dns_svrs (Ipv4AddrList) => |hal| hal.ert().dns_svrs();
    export_addr dhcpv4c_get_ert_dhcp_svr / dhcp4c_get_ert_dhcp_svr (c_uint) => |hal| hal.ert().dhcp_svr();

    export dhcpv4c_get_ecm_lease_time / dhcp4c_get_ecm_lease_time (c_uint) => |hal| hal.ecm().lease_time();
    export dhcpv4c_get_ecm_remain_lease_time / dhcp4c_get_ecm_remain_lease_time (c_uint) => |hal| hal.ecm().remain_lease_time();
    export dhcpv4c_get_ecm_remain_renew_time / dhcp4c_get_ecm_remain_renew_time (c_uint) => |hal| hal.ecm().remain_renew_time();
    export dhcpv4c_get_ecm_remain_rebind_time / dhcp4c_get_ecm_remain_rebind_time (c_uint) => |hal| hal.ecm().remain_rebind_time();
    export dhcpv4c_get_ecm_config_attempts / dhcp4c_get_ecm_config_attempts (c_int) => |hal| hal.ecm().config_attempts();
    export_ifname dhcpv4c_get_ecm_ifname / dhcp4c_get_ecm_ifname (c_char) => |hal| hal.ecm().ifname();
    export dhcpv4c_get_ecm_fsm_state / dhcp4c_get_ecm_fsm_state (c_int) => |hal| hal.ecm().fsm_state().map(i32::from);
    export_addr dhcpv4c_get_ecm_ip_addr / dhcp4c_get_ecm_ip_addr (c_uint) => |hal| hal.ecm().ip_addr();
    export_addr dhcpv4c_get_ecm_mask / dhcp4c_get_ecm_mask (c_uint) => |hal| hal.ecm().mask();
    export_addr dhcpv4c_get_ecm_gw / dhcp4c_get_ecm_gw (c_uint) => |hal| hal.ecm().gw();
    export dhcpv4c_get_ecm_dns_svrs / dhcp4c_get_ecm_dns_svrs (Ipv4AddrList) => |hal| hal.ecm().dns_svrs();
    export_addr dhcpv4c_get_ecm_dhcp_svr / dhcp4c_get_ecm_dhcp_svr (c_uint) => |hal| hal.ecm().dhcp_svr();

    export dhcpv4c_get_emta_remain_lease_time / dhcp4c_get_emta_remain_lease_time (c_uint) => |hal| hal.emta().remain_lease_time();
    export dhcpv4c_get_emta_remain_renew_time / dhcp4c_get_emta_remain_renew_time (c_uint) => |hal| hal.emta().remain_renew_time();
    export dhcpv4c_get_emta_remain_rebind_time / dhcp4c_get_emta_remain_rebind_time (c_uint) => |hal| hal.emta().remain_rebind_time();
}

#[cfg(test)]
mod tests;
