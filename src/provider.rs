use std::net::Ipv4Addr;

use anyhow::Context;
use chrono::Local;
use dhcproto::v4::Message;
use log::info;

use crate::{
    conf::Dhcp4cConfig,
    db::{Db, SnapshotFiles, SnapshotTree},
    error::{Error, Result},
    hal::{ClientInstance, Dhcp4Client, Dhcp4cHal, FsmState, Ipv4AddrList, LeaseTimers},
    snapshot::ClientSnapshot,
};

/// Where a provider loads client snapshots from.
pub trait SnapshotSource: Send + Sync {
    fn load(&self, instance: ClientInstance) -> anyhow::Result<ClientSnapshot>;
}

impl SnapshotSource for SnapshotTree {
    fn load(&self, instance: ClientInstance) -> anyhow::Result<ClientSnapshot> {
        self.get(instance)
    }
}

impl SnapshotSource for SnapshotFiles {
    fn load(&self, instance: ClientInstance) -> anyhow::Result<ClientSnapshot> {
        self.read(instance)
    }
}

/// HAL backed by the snapshot store. Every accessor call reads the current
/// record, so values written by the observer are visible immediately.
///
/// Only one process can own the store. When opened from configuration,
/// every change is also published to the snapshot directory, which is what
/// [`PublishedHal`] reads from other processes.
#[derive(Clone, Debug)]
pub struct StoreHal {
    snapshots: SnapshotTree,
    published: Option<SnapshotFiles>,
}

impl StoreHal {
    pub fn new(snapshots: SnapshotTree) -> StoreHal {
        StoreHal {
            snapshots,
            published: None,
        }
    }

    /// Opens the configured store, provisions every client instance and
    /// publishes the result.
    pub fn open(config: &Dhcp4cConfig) -> anyhow::Result<StoreHal> {
        let db = Db::try_open(&config.common.database_dir).with_context(|| {
            format!("open store {}", config.common.database_dir.display())
        })?;
        let snapshots = db.snapshots_tree()?;
        let published = SnapshotFiles::create(&config.common.snapshot_dir)?;
        for instance in ClientInstance::ALL {
            let snapshot = snapshots.provision(instance, config.client(instance))?;
            published.write(&snapshot)?;
            info!("{instance} client on {}", snapshot.ifname);
        }
        Ok(StoreHal {
            snapshots,
            published: Some(published),
        })
    }

    pub fn snapshots(&self) -> &SnapshotTree {
        &self.snapshots
    }

    /// Records one message exchanged by the instance's client. Nothing
    /// changes when the message is rejected.
    pub fn observe(
        &self,
        instance: ClientInstance,
        message: &Message,
    ) -> anyhow::Result<ClientSnapshot> {
        let now = Local::now();
        let snapshot = self
            .snapshots
            .update(instance, |snapshot| snapshot.observe(message, now))?;
        if let Some(published) = &self.published {
            published.write(&snapshot)?;
        }
        Ok(snapshot)
    }
}

impl Dhcp4cHal for StoreHal {
    fn ert(&self) -> Box<dyn Dhcp4Client + '_> {
        Box::new(SourceClient::new(&self.snapshots, ClientInstance::Ert))
    }

    fn ecm(&self) -> Box<dyn Dhcp4Client + '_> {
        Box::new(SourceClient::new(&self.snapshots, ClientInstance::Ecm))
    }

    fn emta(&self) -> Box<dyn LeaseTimers + '_> {
        Box::new(SourceClient::new(&self.snapshots, ClientInstance::Emta))
    }
}

/// Read-only HAL over the snapshots a running `dhcp4cd` publishes. Never
/// touches the store, so any number of processes may use it alongside the
/// daemon.
#[derive(Clone, Debug)]
pub struct PublishedHal {
    files: SnapshotFiles,
}

impl PublishedHal {
    pub fn new(files: SnapshotFiles) -> PublishedHal {
        PublishedHal { files }
    }

    pub fn from_config(config: &Dhcp4cConfig) -> PublishedHal {
        PublishedHal::new(SnapshotFiles::new(&config.common.snapshot_dir))
    }
}

impl Dhcp4cHal for PublishedHal {
    fn ert(&self) -> Box<dyn Dhcp4Client + '_> {
        Box::new(SourceClient::new(&self.files, ClientInstance::Ert))
    }

    fn ecm(&self) -> Box<dyn Dhcp4Client + '_> {
        Box::new(SourceClient::new(&self.files, ClientInstance::Ecm))
    }

    fn emta(&self) -> Box<dyn LeaseTimers + '_> {
        Box::new(SourceClient::new(&self.files, ClientInstance::Emta))
    }
}

struct SourceClient<'a> {
    source: &'a dyn SnapshotSource,
    instance: ClientInstance,
}

impl<'a> SourceClient<'a> {
    fn new(source: &'a dyn SnapshotSource, instance: ClientInstance) -> SourceClient<'a> {
        SourceClient { source, instance }
    }

    fn load(&self) -> Result<ClientSnapshot> {
        self.source.load(self.instance).map_err(Error::store)
    }
}

impl LeaseTimers for SourceClient<'_> {
    fn lease_time(&self) -> Result<u32> {
        self.load()?.lease_time()
    }

    fn remain_lease_time(&self) -> Result<u32> {
        self.load()?.remain_lease_time()
    }

    fn remain_renew_time(&self) -> Result<u32> {
        self.load()?.remain_renew_time()
    }

    fn remain_rebind_time(&self) -> Result<u32> {
        self.load()?.remain_rebind_time()
    }
}

impl Dhcp4Client for SourceClient<'_> {
    fn config_attempts(&self) -> Result<i32> {
        self.load()?.config_attempts()
    }

    fn ifname(&self) -> Result<String> {
        self.load()?.ifname()
    }

    fn fsm_state(&self) -> Result<FsmState> {
        self.load()?.fsm_state()
    }

    fn ip_addr(&self) -> Result<Ipv4Addr> {
        self.load()?.ip_addr()
    }

    fn mask(&self) -> Result<Ipv4Addr> {
        self.load()?.mask()
    }

    fn gw(&self) -> Result<Ipv4Addr> {
        self.load()?.gw()
    }

    fn dns_svrs(&self) -> Result<Ipv4AddrList> {
        self.load()?.dns_svrs()
    }

    fn dhcp_svr(&self) -> Result<Ipv4Addr> {
        self.load()?.dhcp_svr()
    }
}

#[cfg(test)]
fn test_config(dir: &std::path::Path) -> Dhcp4cConfig {
    use crate::conf::{ClientConfig, CommonConfig, HttpConfig};

    Dhcp4cConfig {
        common: CommonConfig {
            database_dir: dir.join("db"),
            snapshot_dir: dir.join("run"),
        },
        http: HttpConfig::default(),
        ert: ClientConfig {
            ifname: Some("erouter7".to_string()),
            hardware_ethernet: None,
        },
        ecm: ClientConfig::default(),
        emta: ClientConfig::default(),
    }
}

#[test]
fn store_hal_reads_observed_lease_test() {
    use dhcproto::v4::MessageType;

    use crate::snapshot::{ack, message};

    let dir = tempfile::tempdir().unwrap();
    let hal = StoreHal::new(
        Db::try_open(dir.path())
            .unwrap()
            .snapshots_tree()
            .unwrap(),
    );
    assert!(hal.ert().lease_time().is_err());
    assert_eq!(hal.ert().fsm_state().unwrap(), FsmState::Init);

    for msg in [message(MessageType::Discover), message(MessageType::Request), ack()] {
        hal.observe(ClientInstance::Ert, &msg).unwrap();
    }

    let ert = hal.ert();
    assert_eq!(ert.lease_time().unwrap(), 3600);
    assert!(ert.remain_lease_time().unwrap() <= 3600);
    assert_eq!(ert.config_attempts().unwrap(), 2);
    assert_eq!(ert.fsm_state().unwrap(), FsmState::Bound);
    assert_eq!(ert.ip_addr().unwrap(), Ipv4Addr::new(192, 168, 100, 10));
    assert_eq!(ert.gw().unwrap(), Ipv4Addr::new(192, 168, 100, 1));
    assert_eq!(ert.dns_svrs().unwrap().number, 4);
    assert!(hal.ecm().ip_addr().is_err());
    assert!(hal.emta().remain_renew_time().is_err());
}

#[test]
fn open_provisions_test() {
    let dir = tempfile::tempdir().unwrap();
    let hal = StoreHal::open(&test_config(dir.path())).unwrap();
    assert_eq!(hal.ert().ifname().unwrap(), "erouter7");
    assert_eq!(hal.ecm().ifname().unwrap(), "wan0");
}

#[test]
fn daemon_and_library_side_by_side_test() {
    use crate::snapshot::ack;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let daemon = StoreHal::open(&config).unwrap();
    let library = PublishedHal::from_config(&config);

    assert_eq!(library.ert().ifname().unwrap(), "erouter7");
    assert_eq!(library.ert().fsm_state().unwrap(), FsmState::Init);
    assert!(library.ert().lease_time().is_err());

    daemon.observe(ClientInstance::Ert, &ack()).unwrap();
    let ert = library.ert();
    assert_eq!(ert.lease_time().unwrap(), 3600);
    assert_eq!(ert.fsm_state().unwrap(), FsmState::Bound);
    assert_eq!(ert.ip_addr().unwrap(), Ipv4Addr::new(192, 168, 100, 10));
    assert_eq!(ert.dhcp_svr().unwrap(), Ipv4Addr::new(192, 168, 100, 1));
    assert!(library.ecm().ip_addr().is_err());

    // the daemon still owns the store
    assert!(StoreHal::open(&config).is_err());
    assert_eq!(daemon.ert().lease_time().unwrap(), 3600);
}

#[test]
fn rejected_message_is_not_published_test() {
    use dhcproto::v4::MessageType;

    use crate::snapshot::{ack, message};

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let daemon = StoreHal::open(&config).unwrap();
    let library = PublishedHal::from_config(&config);
    daemon.observe(ClientInstance::Ecm, &ack()).unwrap();

    let mut foreign = message(MessageType::Release);
    foreign.set_chaddr(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    assert!(daemon.observe(ClientInstance::Ecm, &foreign).is_err());
    assert_eq!(library.ecm().lease_time().unwrap(), 3600);
}

#[test]
fn nothing_published_test() {
    let dir = tempfile::tempdir().unwrap();
    let library = PublishedHal::from_config(&test_config(dir.path()));
    assert!(library.ert().ifname().is_err());
    assert!(library.emta().remain_lease_time().is_err());
}
