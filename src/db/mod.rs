mod files;
mod snapshots;

use anyhow::Result;
use std::{ops::Deref, path::Path};

pub use self::{files::SnapshotFiles, snapshots::SnapshotTree};

#[derive(Clone, Debug)]
pub struct Db {
    inner: sled::Db,
}

impl Db {
    pub fn try_open(path: &Path) -> Result<Db> {
        let inner = sled::open(path)?;
        Ok(Db { inner })
    }

    pub fn snapshots_tree(&self) -> Result<SnapshotTree> {
        let tree = self.open_tree("DHCP4C_SNAPSHOTS")?;
        Ok(SnapshotTree::new(tree))
    }
}

impl Deref for Db {
    type Target = sled::Db;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
