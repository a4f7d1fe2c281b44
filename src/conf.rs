use anyhow::{Context, Result};
use mac_address::MacAddress;
use serde::Deserialize;
use std::{
    fs::File,
    io::{BufReader, Read},
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
};

use crate::hal::ClientInstance;

const DEFAULT_DHCP4C_CONFIG_PATH: &str = "/etc/dhcp4c.conf";
const DEFAULT_SNAPSHOT_DIR: &str = "/run/dhcp4c";
pub const DHCP4C_CONFIG_PATH_ENV_KEY: &str = "DHCP4C_CONFIG_PATH";

#[derive(Deserialize, Clone, PartialEq, Eq, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct CommonConfig {
    pub database_dir: PathBuf,
    /// Where the daemon publishes snapshots for the C accessors.
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SNAPSHOT_DIR)
}

#[derive(Deserialize, Clone, PartialEq, Eq, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct HttpConfig {
    pub addr: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8068)),
        }
    }
}

#[derive(Deserialize, Clone, Default, PartialEq, Eq, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct ClientConfig {
    pub ifname: Option<String>,
    pub hardware_ethernet: Option<MacAddress>,
}

#[derive(Deserialize, Clone, PartialEq, Eq, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct Dhcp4cConfig {
    pub common: CommonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub ert: ClientConfig,
    #[serde(default)]
    pub ecm: ClientConfig,
    #[serde(default)]
    pub emta: ClientConfig,
}

impl Dhcp4cConfig {
    /// Loads from `DHCP4C_CONFIG_PATH`, falling back to `/etc/dhcp4c.conf`.
    pub fn try_load() -> Result<Dhcp4cConfig> {
        match std::env::var(DHCP4C_CONFIG_PATH_ENV_KEY) {
            Ok(path) => Self::from_path(Path::new(&path)),
            Err(_) => Self::from_path(Path::new(DEFAULT_DHCP4C_CONFIG_PATH)),
        }
    }

    pub fn from_path(path: &Path) -> Result<Dhcp4cConfig> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let size = file
            .metadata()
            .map(|meta| meta.len() as usize)
            .unwrap_or(1024);
        let mut reader = BufReader::new(file);
        let mut buffer = Vec::with_capacity(size);
        let size = reader.read_to_end(&mut buffer)?;
        let config: Dhcp4cConfig = toml::from_slice(&buffer[..size])
            .with_context(|| format!("parse {}", path.display()))?;
        Ok(config)
    }

    pub fn client(&self, instance: ClientInstance) -> &ClientConfig {
        match instance {
            ClientInstance::Ert => &self.ert,
            ClientInstance::Ecm => &self.ecm,
            ClientInstance::Emta => &self.emta,
        }
    }
}

#[test]
fn parse_test() {
    const TOML_TEXT: &str = r#"
[common]
database-dir = "dhcp4c-db"
snapshot-dir = "dhcp4c-run"

[http]
addr = "0.0.0.0:8068"

[ert]
ifname = "erouter0"
hardware-ethernet = "00:00:00:11:11:11"

[ecm]
ifname = "wan0"
    "#;
    let expected = Dhcp4cConfig {
        common: CommonConfig {
            database_dir: Path::new("dhcp4c-db").to_owned(),
            snapshot_dir: Path::new("dhcp4c-run").to_owned(),
        },
        http: HttpConfig {
            addr: "0.0.0.0:8068".parse().unwrap(),
        },
        ert: ClientConfig {
            ifname: Some("erouter0".to_string()),
            hardware_ethernet: Some(MacAddress::new([0x00, 0x00, 0x00, 0x11, 0x11, 0x11])),
        },
        ecm: ClientConfig {
            ifname: Some("wan0".to_string()),
            hardware_ethernet: None,
        },
        emta: ClientConfig::default(),
    };

    let config = toml::from_str::<Dhcp4cConfig>(TOML_TEXT);
    assert_eq!(Ok(expected), config);
}

#[test]
fn defaults_test() {
    let config = toml::from_str::<Dhcp4cConfig>("[common]\ndatabase-dir = \"db\"\n").unwrap();
    assert_eq!(config.http, HttpConfig::default());
    assert_eq!(config.common.snapshot_dir, PathBuf::from("/run/dhcp4c"));
    assert_eq!(config.client(ClientInstance::Emta), &ClientConfig::default());
}

#[test]
fn from_path_test() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[common]\ndatabase-dir = \"/var/lib/dhcp4c\"\n[emta]\nifname = \"mta1\"").unwrap();
    let config = Dhcp4cConfig::from_path(file.path()).unwrap();
    assert_eq!(config.common.database_dir, PathBuf::from("/var/lib/dhcp4c"));
    assert_eq!(config.emta.ifname.as_deref(), Some("mta1"));
    assert!(Dhcp4cConfig::from_path(Path::new("/nonexistent/dhcp4c.conf")).is_err());
}
