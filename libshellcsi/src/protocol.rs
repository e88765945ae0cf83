//! Script calling convention.
//!
//! Requests reach a script as environment variables prefixed with `CSI_`;
//! storage-class parameters become `CSI_PARAM_<sanitized key>`.  Scripts
//! answer by printing lines of the form
//!
//! ```text
//! csi-shell-output:volume_id=pvc-1234
//! csi-shell-output:capacity_bytes=10737418240
//! ```
//!
//! Any other output is ignored, so scripts are free to log.

use std::collections::HashMap;

/// Marker that prefixes every reply line a script wants the driver to read.
pub const REPLY_MARKER: &str = "csi-shell-output:";

pub const REPLY_VOLUME_ID: &str = "volume_id";
pub const REPLY_SNAPSHOT_ID: &str = "snapshot_id";
pub const REPLY_DATA_SOURCE: &str = "data_source";
pub const REPLY_CAPACITY_BYTES: &str = "capacity_bytes";
pub const REPLY_NFS_SERVER: &str = "nfs_server";
pub const REPLY_NFS_PATH: &str = "nfs_path";

pub const ENV_PREFIX: &str = "CSI_";
pub const ENV_SNAPSHOT_NAME: &str = "CSI_SNAPSHOT_NAME";
pub const ENV_SNAPSHOT_ID: &str = "CSI_SNAPSHOT_ID";
pub const ENV_VOLUME_ID: &str = "CSI_VOLUME_ID";
pub const ENV_DATA_SOURCE: &str = "CSI_DATA_SOURCE";
pub const ENV_SRC_SNAPSHOT_ID: &str = "CSI_SRC_SNAPSHOT_ID";
pub const ENV_SRC_VOLUME_ID: &str = "CSI_SRC_VOLUME_ID";
pub const ENV_CAPACITY_BYTES: &str = "CSI_CAPACITY_BYTES";
pub const ENV_PARAM_PREFIX: &str = "CSI_PARAM_";

/// Sanitized keys longer than this are truncated.
const MAX_ENV_KEY_LEN: usize = 60;

/// Map an arbitrary parameter key onto `[A-Za-z0-9_]`, at most 60 chars.
pub fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(MAX_ENV_KEY_LEN)
        .collect()
}

/// Environment variable name for a storage-class parameter.
pub fn param_env_name(key: &str) -> String {
    format!("{ENV_PARAM_PREFIX}{}", env_key(key))
}

/// Key/value pairs a script printed behind [`REPLY_MARKER`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShellReply {
    fields: HashMap<String, String>,
}

impl ShellReply {
    /// Collect marker lines from combined output.  A later line overwrites an
    /// earlier one with the same key; marker lines without `=` are dropped.
    pub fn parse(output: &[u8]) -> Self {
        let text = String::from_utf8_lossy(output);
        let fields = text
            .lines()
            .filter_map(|line| line.strip_prefix(REPLY_MARKER))
            .filter_map(|rest| rest.split_once('='))
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Self { fields }
    }

    /// Remove and return a field.  Empty values count as absent.
    pub fn pop(&mut self, key: &str) -> Option<String> {
        self.fields.remove(key).filter(|v| !v.is_empty())
    }

    /// Pop `capacity_bytes` and parse it as a byte count.
    pub fn pop_capacity(&mut self) -> Result<u64, String> {
        let raw = self
            .pop(REPLY_CAPACITY_BYTES)
            .ok_or_else(|| "capacity not found in shell output".to_owned())?;
        raw.trim()
            .parse::<u64>()
            .map_err(|e| format!("failed to parse capacity {raw:?}: {e}"))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
