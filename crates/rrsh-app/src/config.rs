//! Optional configuration file.
//!
//! Read from `$RRSH_CONFIG`, or `rrsh/config.json` under the user's
//! configuration directory (`$XDG_CONFIG_HOME`, else `~/.config`) when that
//! is unset. A missing file means defaults; command-line arguments override
//! whatever the file says.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::{fs, io};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::address::DEFAULT_PORT;

/// Settings shared by both modes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Port used when an address has none.
    pub port: u16,
    /// Client command when none is given on the command line. Empty means
    /// the user's login shell.
    pub command: Vec<String>,
    /// Server keeps accepting connections after the first one ends.
    pub keep_open: bool,
    /// Log connection events to standard error.
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            command: Vec::new(),
            keep_open: false,
            verbose: false,
        }
    }
}

impl Config {
    /// Location of the configuration file, if one can be determined.
    pub fn path() -> Option<PathBuf> {
        path_from(std::env::var_os("RRSH_CONFIG"))
    }

    /// Load from the default location.
    pub fn load() -> Result<Self> {
        match Self::path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))
    }
}

fn path_from(explicit: Option<OsString>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(PathBuf::from(path)),
        None => dirs::config_dir().map(|dir| dir.join("rrsh").join("config.json")),
    }
}
