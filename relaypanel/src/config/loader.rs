use crate::config::{ConfigError, FileError, ProfileError};
use crate::storage::{DocumentStore, StoreError};
use relayapi::{ChainItem, OverrideMeta, ProfileMeta, ProfilesDoc};
use serde_yaml::Mapping;

/// Well-known document ids in the store.
pub const PROFILES_DOC: &str = "profiles.yaml";
pub const OVERRIDES_DOC: &str = "overrides.yaml";
pub const CHAINS_DOC: &str = "chains.yaml";
pub const CONTROLLED_DOC: &str = "controlled.yaml";

#[derive(Debug, Clone)]
pub struct LoadedOverride {
    pub meta: OverrideMeta,
    pub content: String,
}

pub async fn load_profiles(store: &dyn DocumentStore) -> Result<ProfilesDoc, ConfigError> {
    match store.get(PROFILES_DOC).await {
        Ok(text) => serde_yaml::from_str(&text)
            .map_err(|e| FileError::Serde(PROFILES_DOC.to_string(), e).into()),
        Err(StoreError::NotFound(_)) => Ok(ProfilesDoc::default()),
        Err(e) => Err(e.into()),
    }
}

pub fn current_profile(profiles: &ProfilesDoc) -> Result<&ProfileMeta, ConfigError> {
    let current = profiles
        .current
        .as_deref()
        .ok_or(ProfileError::NoCurrent)?;
    profiles
        .items
        .iter()
        .find(|p| p.uid == current)
        .ok_or_else(|| ProfileError::Missing(current.to_string()).into())
}

/// Load every override's metadata and content.
///
/// A missing or malformed index degrades to "no overrides"; an override whose
/// content cannot be read is dropped with a diagnostic. Only genuine store
/// failures propagate.
pub async fn load_overrides(store: &dyn DocumentStore) -> Result<Vec<LoadedOverride>, ConfigError> {
    let metas: Vec<OverrideMeta> = match store.get(OVERRIDES_DOC).await {
        Ok(text) => match serde_yaml::from_str(&text) {
            Ok(metas) => metas,
            Err(e) => {
                tracing::warn!("Malformed override index, applying none: {}", e);
                return Ok(Vec::new());
            }
        },
        Err(StoreError::NotFound(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut loaded = Vec::with_capacity(metas.len());
    for meta in metas {
        match store.get(&meta.uid).await {
            Ok(content) => loaded.push(LoadedOverride { meta, content }),
            Err(StoreError::NotFound(_)) => {
                tracing::warn!("Override {} has no stored content, skipped", meta.uid);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(loaded)
}

/// Load the chain list; missing or malformed lists degrade to "no chains".
pub async fn load_chains(store: &dyn DocumentStore) -> Vec<ChainItem> {
    match store.get(CHAINS_DOC).await {
        Ok(text) => match serde_yaml::from_str(&text) {
            Ok(chains) => chains,
            Err(e) => {
                tracing::warn!("Malformed chain list, injecting none: {}", e);
                Vec::new()
            }
        },
        Err(_) => Vec::new(),
    }
}

/// Load the panel-managed forced settings merged over every profile.
pub async fn load_controlled(store: &dyn DocumentStore) -> Mapping {
    match store.get(CONTROLLED_DOC).await {
        Ok(text) => match serde_yaml::from_str(&text) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("Malformed controlled config, ignoring it: {}", e);
                Mapping::new()
            }
        },
        Err(_) => Mapping::new(),
    }
}
