use anyhow::Result;
use log::warn;

use crate::{conf::ClientConfig, hal::ClientInstance, snapshot::ClientSnapshot};

#[derive(Clone, Debug)]
pub struct SnapshotTree {
    inner: sled::Tree,
}

impl SnapshotTree {
    pub fn new(inner: sled::Tree) -> SnapshotTree {
        SnapshotTree { inner }
    }

    pub fn generate_key(instance: ClientInstance) -> &'static [u8] {
        instance.as_str().as_bytes()
    }

    fn decode(instance: ClientInstance, value: Option<&[u8]>) -> ClientSnapshot {
        let Some(value) = value else {
            return ClientSnapshot::new(instance);
        };
        match bincode::deserialize::<ClientSnapshot>(value) {
            Ok(snapshot) => snapshot,
            // an unreadable record counts as never recorded
            Err(e) => {
                warn!("{instance} snapshot deserialize error: {e}");
                ClientSnapshot::new(instance)
            }
        }
    }

    /// Stored snapshot, or a fresh one when the instance was never recorded.
    pub fn get(&self, instance: ClientInstance) -> Result<ClientSnapshot> {
        let value = self.inner.get(Self::generate_key(instance))?;
        Ok(Self::decode(instance, value.as_deref()))
    }

    pub fn put(&self, snapshot: &ClientSnapshot) -> Result<()> {
        let serialized = bincode::serialize(snapshot)?;
        let _ = self
            .inner
            .insert(Self::generate_key(snapshot.instance), serialized)?;
        Ok(())
    }

    /// Read-modify-write of one snapshot. `f` runs again if another writer
    /// got in between, and nothing is stored when it fails.
    pub fn update<F>(&self, instance: ClientInstance, mut f: F) -> Result<ClientSnapshot>
    where
        F: FnMut(&mut ClientSnapshot) -> Result<()>,
    {
        let key = Self::generate_key(instance);
        loop {
            let current = self.inner.get(key)?;
            let mut snapshot = Self::decode(instance, current.as_deref());
            f(&mut snapshot)?;
            let serialized = bincode::serialize(&snapshot)?;
            if self
                .inner
                .compare_and_swap(key, current, Some(serialized))?
                .is_ok()
            {
                return Ok(snapshot);
            }
        }
    }

    pub fn all(&self) -> Result<Vec<ClientSnapshot>> {
        ClientInstance::ALL
            .into_iter()
            .map(|instance| self.get(instance))
            .collect()
    }

    /// Applies the configured interface name and hardware address.
    pub fn provision(
        &self,
        instance: ClientInstance,
        config: &ClientConfig,
    ) -> Result<ClientSnapshot> {
        self.update(instance, |snapshot| {
            if let Some(ifname) = &config.ifname {
                snapshot.ifname = ifname.clone();
            }
            if let Some(hw) = &config.hardware_ethernet {
                let hw = hw.bytes().to_vec();
                if snapshot.hardware_address.as_ref() != Some(&hw) {
                    snapshot.hardware_address = Some(hw);
                    snapshot.lease = None;
                }
            }
            Ok(())
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

#[cfg(test)]
fn open_tree() -> (tempfile::TempDir, SnapshotTree) {
    let dir = tempfile::tempdir().unwrap();
    let tree = crate::db::Db::try_open(dir.path())
        .unwrap()
        .snapshots_tree()
        .unwrap();
    (dir, tree)
}

#[test]
fn missing_snapshot_is_fresh_test() {
    let (_dir, tree) = open_tree();
    let snapshot = tree.get(ClientInstance::Ecm).unwrap();
    assert_eq!(snapshot, ClientSnapshot::new(ClientInstance::Ecm));
}

#[test]
fn put_get_test() {
    let (_dir, tree) = open_tree();
    let snapshot = crate::snapshot::bound_snapshot(ClientInstance::Ert, chrono::Local::now());
    tree.put(&snapshot).unwrap();
    assert_eq!(tree.get(ClientInstance::Ert).unwrap(), snapshot);
    assert_eq!(tree.get(ClientInstance::Ecm).unwrap().lease, None);
}

#[test]
fn update_test() {
    let (_dir, tree) = open_tree();
    let updated = tree
        .update(ClientInstance::Emta, |snapshot| {
            snapshot.config_attempts += 1;
            Ok(())
        })
        .unwrap();
    assert_eq!(updated.config_attempts, 1);
    assert_eq!(tree.get(ClientInstance::Emta).unwrap().config_attempts, 1);
}

#[test]
fn failed_update_is_not_stored_test() {
    let (_dir, tree) = open_tree();
    let result = tree.update(ClientInstance::Ert, |snapshot| {
        snapshot.config_attempts = 10;
        anyhow::bail!("rejected")
    });
    assert!(result.is_err());
    assert_eq!(tree.get(ClientInstance::Ert).unwrap().config_attempts, 0);
}

#[test]
fn corrupt_record_is_fresh_test() {
    let (_dir, tree) = open_tree();
    tree.inner
        .insert(SnapshotTree::generate_key(ClientInstance::Ert), &[1u8, 2, 3][..])
        .unwrap();
    assert_eq!(
        tree.get(ClientInstance::Ert).unwrap(),
        ClientSnapshot::new(ClientInstance::Ert)
    );
}

#[test]
fn all_test() {
    let (_dir, tree) = open_tree();
    let instances: Vec<_> = tree
        .all()
        .unwrap()
        .into_iter()
        .map(|snapshot| snapshot.instance)
        .collect();
    assert_eq!(instances, ClientInstance::ALL.to_vec());
}

#[test]
fn provision_test() {
    use mac_address::MacAddress;

    let (_dir, tree) = open_tree();
    let mut snapshot = crate::snapshot::bound_snapshot(ClientInstance::Ert, chrono::Local::now());
    snapshot.hardware_address = Some(vec![0, 0, 0, 0x11, 0x11, 0x11]);
    tree.put(&snapshot).unwrap();

    let same = ClientConfig {
        ifname: Some("erouter1".to_string()),
        hardware_ethernet: Some(MacAddress::new([0, 0, 0, 0x11, 0x11, 0x11])),
    };
    let provisioned = tree.provision(ClientInstance::Ert, &same).unwrap();
    assert_eq!(provisioned.ifname, "erouter1");
    assert!(provisioned.lease.is_some());

    let other = ClientConfig {
        ifname: None,
        hardware_ethernet: Some(MacAddress::new([0, 0, 0, 0x22, 0x22, 0x22])),
    };
    let provisioned = tree.provision(ClientInstance::Ert, &other).unwrap();
    assert_eq!(provisioned.ifname, "erouter1");
    assert!(provisioned.lease.is_none());
}
