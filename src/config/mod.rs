use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Construction-time settings of a list. Neither field can change once the
/// list exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Directory under which spilled records are written, one file per item.
    pub base_path: PathBuf,
    /// Maximum number of items kept in memory before spilling.
    pub capacity: usize,
}

impl Config {
    pub fn new<P>(base_path: P, capacity: usize) -> Self
    where
        P: Into<PathBuf>,
    {
        Config {
            base_path: base_path.into(),
            capacity,
        }
    }

    /// Reads a config from a JSON file such as
    /// `{"base_path": "/var/tmp/results", "capacity": 4096}`.
    pub fn load<P>(path: P) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
    {
        let contents = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(contents.as_str())?)
    }

    pub fn write<P>(&self, path: P) -> anyhow::Result<()>
    where
        P: AsRef<Path>,
    {
        let encoded = serde_json::to_string_pretty(self)?;
        fs::write(path, encoded)?;
        Ok(())
    }
}

#[test]
fn test_config_load() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("list.json");

    fs::write(&path, r#"{"base_path": "/var/tmp/results", "capacity": 4096}"#)?;
    let config = Config::load(&path)?;
    assert_eq!(Config::new("/var/tmp/results", 4096), config);

    let other = Config::new(tmp.path().join("spill"), 0);
    other.write(&path)?;
    assert_eq!(other, Config::load(&path)?);

    fs::write(&path, r#"{"base_path": "/var/tmp/results"}"#)?;
    assert!(Config::load(&path).is_err());
    assert!(Config::load(tmp.path().join("missing.json")).is_err());

    Ok(())
}
