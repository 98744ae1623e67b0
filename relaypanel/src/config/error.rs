use crate::external::HandoffError;
use crate::storage::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Handoff error: {0}")]
    Handoff(#[from] HandoffError),
    #[error("File error: {0}")]
    File(#[from] FileError),
    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),
    #[error("Internal error: {0}")]
    Internal(&'static str),
}

#[derive(Error, Debug)]
pub enum FileError {
    #[error("{0} deserialization error: {1}")]
    Serde(String, serde_yaml::Error),
    #[error("{0} serialization error: {1}")]
    Emit(String, serde_yaml::Error),
}

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("No profile selected")]
    NoCurrent,
    #[error("Profile {0} missing from index")]
    Missing(String),
    #[error("Profile {0} is not a mapping document")]
    NotMapping(String),
}

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Script {0}: sandbox construction failed: {1}")]
    Sandbox(String, String),
}
