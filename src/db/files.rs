use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::debug;
use tempfile::NamedTempFile;

use crate::{hal::ClientInstance, snapshot::ClientSnapshot};

/// Per-instance snapshot files published by the process that owns the
/// store, for readers that cannot open it.
#[derive(Clone, Debug)]
pub struct SnapshotFiles {
    dir: PathBuf,
}

impl SnapshotFiles {
    pub fn new(dir: &Path) -> SnapshotFiles {
        SnapshotFiles {
            dir: dir.to_owned(),
        }
    }

    pub fn create(dir: &Path) -> Result<SnapshotFiles> {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        Ok(SnapshotFiles::new(dir))
    }

    pub fn path(&self, instance: ClientInstance) -> PathBuf {
        self.dir.join(format!("{}.snapshot", instance.as_str()))
    }

    /// Replaces the instance's file atomically, so readers see either the
    /// previous snapshot or this one.
    pub fn write(&self, snapshot: &ClientSnapshot) -> Result<()> {
        let path = self.path(snapshot.instance);
        let tempfile = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("create temporary file in {}", self.dir.display()))?;
        bincode::serialize_into(&tempfile, snapshot)
            .with_context(|| format!("write {}", tempfile.path().display()))?;
        debug!("publishing {} snapshot to {}", snapshot.instance, path.display());
        tempfile
            .into_temp_path()
            .persist(&path)
            .with_context(|| format!("persist {}", path.display()))?;
        Ok(())
    }

    /// Fails when nothing was published for the instance.
    pub fn read(&self, instance: ClientInstance) -> Result<ClientSnapshot> {
        let path = self.path(instance);
        let buffer = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        let snapshot = bincode::deserialize::<ClientSnapshot>(&buffer)
            .with_context(|| format!("decode {}", path.display()))?;
        Ok(snapshot)
    }
}

#[test]
fn write_read_test() {
    let dir = tempfile::tempdir().unwrap();
    let files = SnapshotFiles::create(&dir.path().join("run")).unwrap();
    assert!(files.read(ClientInstance::Ecm).is_err());

    let snapshot = crate::snapshot::bound_snapshot(ClientInstance::Ecm, chrono::Local::now());
    files.write(&snapshot).unwrap();
    assert_eq!(files.read(ClientInstance::Ecm).unwrap(), snapshot);

    let mut next = snapshot.clone();
    next.lease = None;
    files.write(&next).unwrap();
    assert_eq!(files.read(ClientInstance::Ecm).unwrap(), next);
    assert_eq!(fs::read_dir(dir.path().join("run")).unwrap().count(), 1);
}

#[test]
fn corrupt_file_test() {
    let dir = tempfile::tempdir().unwrap();
    let files = SnapshotFiles::create(dir.path()).unwrap();
    fs::write(files.path(ClientInstance::Ert), [1u8, 2, 3]).unwrap();
    assert!(files.read(ClientInstance::Ert).is_err());
}
