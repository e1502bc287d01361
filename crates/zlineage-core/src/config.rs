use crate::error::{LineageError, LineageResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layout {
    /// Container grouping bootable system datasets, e.g. `rpool/ROOT/...`.
    #[serde(default = "default_system_container")]
    pub system_container: String,

    /// Container grouping per-user home datasets, e.g. `rpool/USERDATA/...`.
    #[serde(default = "default_user_container")]
    pub user_container: String,

    /// Separator between entries of the bootfs-datasets property value.
    #[serde(default = "default_tag_separator")]
    pub tag_separator: String,

    /// Separator between the user name and the state suffix in user dataset
    /// basenames (`alice_k3x9w2`).
    #[serde(default = "default_user_separator")]
    pub user_separator: String,
}

fn default_system_container() -> String {
    "ROOT".to_string()
}

fn default_user_container() -> String {
    "USERDATA".to_string()
}

fn default_tag_separator() -> String {
    ":".to_string()
}

fn default_user_separator() -> String {
    "_".to_string()
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            system_container: default_system_container(),
            user_container: default_user_container(),
            tag_separator: default_tag_separator(),
            user_separator: default_user_separator(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZfsCfg {
    /// Explicit path to the `zfs` binary; discovered when unset.
    #[serde(default)]
    pub binary_path: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ZfsCfg {
    fn default() -> Self {
        Self {
            binary_path: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LineageConfig {
    #[serde(default)]
    pub layout: Layout,

    #[serde(default)]
    pub zfs: ZfsCfg,

    #[serde(skip)]
    pub path: PathBuf,
}

impl LineageConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> LineageResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut cfg = if matches!(path.extension().and_then(|ext| ext.to_str()), Some(ext) if ext.eq_ignore_ascii_case("toml"))
        {
            toml::from_str::<Self>(&contents)?
        } else {
            serde_yaml::from_str::<Self>(&contents)?
        };

        cfg.path = path.to_path_buf();
        cfg.validate()?;

        Ok(cfg)
    }

    fn validate(&self) -> LineageResult<()> {
        for (field, value) in [
            ("layout.system_container", &self.layout.system_container),
            ("layout.user_container", &self.layout.user_container),
            ("layout.tag_separator", &self.layout.tag_separator),
            ("layout.user_separator", &self.layout.user_separator),
        ] {
            if value.is_empty() {
                return Err(LineageError::InvalidConfig(format!(
                    "{field} must not be empty"
                )));
            }
        }
        if self.layout.system_container.contains('/') || self.layout.user_container.contains('/') {
            return Err(LineageError::InvalidConfig(
                "layout containers must be single path components".to_string(),
            ));
        }
        Ok(())
    }

    pub fn zfs_timeout(&self) -> Duration {
        Duration::from_secs(self.zfs.timeout_secs)
    }

    pub fn zfs_binary_path(&self) -> Option<PathBuf> {
        self.zfs.binary_path.as_ref().map(PathBuf::from)
    }
}
