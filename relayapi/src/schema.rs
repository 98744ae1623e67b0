use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Where a profile's content comes from.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProfileOrigin {
    Local,
    Remote {
        url: String,
        /// Auto-update interval in minutes; 0 disables updating.
        #[serde(default)]
        interval: u32,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProfileMeta {
    pub uid: String,
    pub name: String,
    #[serde(flatten)]
    pub origin: ProfileOrigin,
    /// Unix timestamp of the last content update.
    pub updated: Option<i64>,
    /// Override ids attached to this profile, in application order.
    #[serde(default)]
    pub overrides: Vec<String>,
}

/// The stored profile index; `current` selects the profile to compile.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ProfilesDoc {
    pub current: Option<String>,
    #[serde(default)]
    pub items: Vec<ProfileMeta>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverrideExt {
    Yaml,
    Js,
}

#[derive(Debug, Error)]
#[error("Unknown override extension: {0}")]
pub struct ParseExtError(pub String);

impl FromStr for OverrideExt {
    type Err = ParseExtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yaml" | "yml" => Ok(OverrideExt::Yaml),
            "js" => Ok(OverrideExt::Js),
            other => Err(ParseExtError(other.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct OverrideMeta {
    pub uid: String,
    pub name: String,
    pub ext: OverrideExt,
    /// Global overrides apply to every profile, before attached ones.
    #[serde(default)]
    pub global: bool,
    pub updated: Option<i64>,
}

/// A user-defined virtual proxy that dials through `dialer_proxy` and clones
/// its outbound parameters from `target_proxy`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChainItem {
    pub id: String,
    pub name: String,
    pub dialer_proxy: String,
    pub target_proxy: String,
    #[serde(default)]
    pub target_groups: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLogKind {
    Log,
    Info,
    Error,
    Debug,
    Exception,
}

impl ScriptLogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptLogKind::Log => "log",
            ScriptLogKind::Info => "info",
            ScriptLogKind::Error => "error",
            ScriptLogKind::Debug => "debug",
            ScriptLogKind::Exception => "exception",
        }
    }
}

/// One line of a per-override execution log.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ScriptLogEntry {
    pub time: String,
    pub kind: ScriptLogKind,
    pub message: String,
}

/// Which retained compilation snapshot to query.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    /// Profile text exactly as loaded from the store.
    Raw,
    /// After controlled-config merge and overrides, before chain injection.
    Enhanced,
    /// The final document handed to the core.
    Compiled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_item_wire_names() {
        let item: ChainItem = serde_json::from_str(
            r#"{"id":"ch-1","name":"Chain-A","dialerProxy":"DIRECT","targetProxy":"HK-01","targetGroups":["Auto"]}"#,
        )
        .unwrap();
        assert_eq!(item.dialer_proxy, "DIRECT");
        assert_eq!(item.target_groups, vec!["Auto".to_string()]);
        assert!(item.enabled);
    }

    #[test]
    fn override_ext_from_str() {
        assert_eq!(OverrideExt::from_str("yml").unwrap(), OverrideExt::Yaml);
        assert_eq!(OverrideExt::from_str("js").unwrap(), OverrideExt::Js);
        assert!(OverrideExt::from_str("lua").is_err());
    }
}
