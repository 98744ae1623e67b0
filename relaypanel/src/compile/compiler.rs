use crate::compile::chain::inject_chains;
use crate::compile::logs::OverrideLogStore;
use crate::compile::merge::merge_mappings;
use crate::compile::override_engine::{apply_overrides, ordered_overrides};
use crate::compile::sanitize::sanitize;
use crate::config::{
    current_profile, load_chains, load_controlled, load_overrides, load_profiles, ConfigError,
    FileError, ProfileError,
};
use crate::external::CoreHandoff;
use crate::storage::DocumentStore;
use arc_swap::ArcSwapOption;
use relayapi::SnapshotKind;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    /// Whether this compilation owns the dns block.
    pub control_dns: bool,
    /// Whether this compilation owns the sniffer block.
    pub control_sniff: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            control_dns: true,
            control_sniff: true,
        }
    }
}

/// The three retained diagnostic snapshots of the last successful run.
#[derive(Debug, Clone)]
pub struct CompiledSnapshots {
    /// Profile text exactly as loaded.
    pub raw: String,
    /// After controlled merge and overrides, before chain injection.
    pub enhanced: String,
    /// The final text handed to the core.
    pub compiled: String,
}

/// Sequences one compilation run: profile -> controlled merge -> overrides ->
/// guarded chain injection -> sanitize -> serialize.
///
/// Runs are independent; the published snapshot set is replaced atomically
/// only once a run has succeeded end to end.
pub struct Compiler<S> {
    store: Arc<S>,
    logs: OverrideLogStore,
    snapshots: ArcSwapOption<CompiledSnapshots>,
}

impl<S: DocumentStore> Compiler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            logs: OverrideLogStore::new(),
            snapshots: ArcSwapOption::empty(),
        }
    }

    pub fn override_logs(&self) -> &OverrideLogStore {
        &self.logs
    }

    pub fn snapshots(&self) -> Option<Arc<CompiledSnapshots>> {
        self.snapshots.load_full()
    }

    pub fn snapshot(&self, kind: SnapshotKind) -> Option<String> {
        self.snapshots().map(|s| match kind {
            SnapshotKind::Raw => s.raw.clone(),
            SnapshotKind::Enhanced => s.enhanced.clone(),
            SnapshotKind::Compiled => s.compiled.clone(),
        })
    }

    /// Compile the current profile and return the serialized configuration.
    pub async fn compile(&self, options: CompileOptions) -> Result<String, ConfigError> {
        let store = self.store.as_ref();
        let profiles = load_profiles(store).await?;
        let profile = current_profile(&profiles)?;
        let raw = store.get(&profile.uid).await?;
        let parsed: serde_yaml::Value = serde_yaml::from_str(&raw)
            .map_err(|e| FileError::Serde(profile.uid.clone(), e))?;
        let serde_yaml::Value::Mapping(base) = parsed else {
            return Err(ProfileError::NotMapping(profile.uid.clone()).into());
        };

        let controlled = load_controlled(store).await;
        let working = merge_mappings(&base, &controlled, true);

        let all_overrides = load_overrides(store).await?;
        let ordered = ordered_overrides(&all_overrides, &profile.overrides);
        let working = apply_overrides(working, &ordered, &self.logs).await?;
        let enhanced = serde_yaml::to_string(&working)
            .map_err(|e| FileError::Emit(profile.uid.clone(), e))?;

        let chains = load_chains(store).await;
        // A defect in chain synthesis must never block startup; fall back to
        // the pre-injection document.
        let mut working =
            match catch_unwind(AssertUnwindSafe(|| inject_chains(working.clone(), &chains))) {
                Ok(doc) => doc,
                Err(_) => {
                    tracing::warn!("Chain injection panicked; no chains injected this run");
                    working
                }
            };

        sanitize(&mut working, options.control_dns, options.control_sniff);
        let compiled = serde_yaml::to_string(&working)
            .map_err(|e| FileError::Emit(profile.uid.clone(), e))?;

        self.snapshots.store(Some(Arc::new(CompiledSnapshots {
            raw,
            enhanced,
            compiled: compiled.clone(),
        })));
        tracing::info!("Compiled profile {} ({})", profile.name, profile.uid);
        Ok(compiled)
    }

    /// Compile and hand the result to the core supervisor.
    pub async fn compile_and_deliver(
        &self,
        handoff: &dyn CoreHandoff,
        options: CompileOptions,
    ) -> Result<(), ConfigError> {
        let compiled = self.compile(options).await?;
        handoff.deliver(&compiled).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CHAINS_DOC, CONTROLLED_DOC, OVERRIDES_DOC, PROFILES_DOC};
    use crate::storage::MemStore;
    use serde_yaml::{Mapping, Value};

    const PROFILE: &str = r#"
mode: rule
log-level: info
proxies:
  - name: HK-01
    type: ss
    server: hk.example.com
    port: 443
proxy-groups:
  - name: Auto
    type: select
    proxies: [HK-01]
rules:
  - MATCH,Auto
"#;

    fn index(overrides: &[&str]) -> String {
        let list = overrides
            .iter()
            .map(|uid| format!("\"{}\"", uid))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "current: p1\nitems:\n  - uid: p1\n    name: Main\n    type: local\n    updated: null\n    overrides: [{}]\n",
            list
        )
    }

    fn compiled_doc(text: &str) -> Mapping {
        serde_yaml::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn end_to_end_chain_injection() {
        let idx = index(&[]);
        let store = MemStore::with(vec![
            (PROFILES_DOC, idx.as_str()),
            ("p1", PROFILE),
            (
                CHAINS_DOC,
                "- id: c1\n  name: Chain-A\n  dialerProxy: DIRECT\n  targetProxy: HK-01\n  targetGroups: [Auto]\n",
            ),
        ]);
        let compiler = Compiler::new(Arc::new(store));
        let out = compiled_doc(&compiler.compile(CompileOptions::default()).await.unwrap());
        let proxies = out.get("proxies").unwrap().as_sequence().unwrap();
        let chain = proxies
            .iter()
            .filter_map(Value::as_mapping)
            .find(|p| p.get("name").and_then(Value::as_str) == Some("Chain-A"))
            .expect("virtual node present");
        assert_eq!(chain.get("dialer-proxy").unwrap().as_str(), Some("DIRECT"));
        assert_eq!(chain.get("server").unwrap().as_str(), Some("hk.example.com"));
        let groups = out.get("proxy-groups").unwrap().as_sequence().unwrap();
        let members: Vec<&str> = groups[0]
            .as_mapping()
            .unwrap()
            .get("proxies")
            .unwrap()
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(members, vec!["HK-01", "Chain-A"]);
    }

    #[tokio::test]
    async fn dangling_landing_node_changes_nothing() {
        let idx = index(&[]);
        let store = MemStore::with(vec![
            (PROFILES_DOC, idx.as_str()),
            ("p1", PROFILE),
            (
                CHAINS_DOC,
                "- id: c1\n  name: Chain-A\n  dialerProxy: DIRECT\n  targetProxy: HK-99\n",
            ),
        ]);
        let compiler = Compiler::new(Arc::new(store));
        let out = compiled_doc(&compiler.compile(CompileOptions::default()).await.unwrap());
        let proxies = out.get("proxies").unwrap().as_sequence().unwrap();
        assert_eq!(proxies.len(), 1);
    }

    #[tokio::test]
    async fn mutual_cycle_drops_both() {
        let idx = index(&[]);
        let store = MemStore::with(vec![
            (PROFILES_DOC, idx.as_str()),
            ("p1", PROFILE),
            (
                CHAINS_DOC,
                "- id: c1\n  name: Chain-A\n  dialerProxy: Chain-B\n  targetProxy: HK-01\n- id: c2\n  name: Chain-B\n  dialerProxy: Chain-A\n  targetProxy: HK-01\n",
            ),
        ]);
        let compiler = Compiler::new(Arc::new(store));
        let out = compiled_doc(&compiler.compile(CompileOptions::default()).await.unwrap());
        let names: Vec<&str> = out
            .get("proxies")
            .unwrap()
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(|p| p.as_mapping().unwrap().get("name").unwrap().as_str())
            .collect();
        assert_eq!(names, vec!["HK-01"]);
    }

    #[tokio::test]
    async fn throwing_script_leaves_document_intact() {
        let idx = index(&["s1"]);
        let store = MemStore::with(vec![
            (PROFILES_DOC, idx.as_str()),
            ("p1", PROFILE),
            (
                OVERRIDES_DOC,
                "- uid: s1\n  name: broken\n  ext: js\n  global: false\n  updated: null\n",
            ),
            ("s1", "function main(p){ throw new Error('x') }"),
        ]);
        let compiler = Compiler::new(Arc::new(store));
        let out = compiler.compile(CompileOptions::default()).await.unwrap();
        let snapshots = compiler.snapshots().unwrap();
        // The override changed nothing between the enhanced and raw stages.
        let enhanced: Mapping = serde_yaml::from_str(&snapshots.enhanced).unwrap();
        let raw: Mapping = serde_yaml::from_str(&snapshots.raw).unwrap();
        assert_eq!(enhanced, raw);
        assert!(compiler
            .override_logs()
            .get("s1")
            .iter()
            .any(|e| e.kind == relayapi::ScriptLogKind::Exception));
        assert!(out.contains("HK-01"));
    }

    #[tokio::test]
    async fn declarative_override_and_controlled_merge() {
        let idx = index(&["y1"]);
        let store = MemStore::with(vec![
            (PROFILES_DOC, idx.as_str()),
            ("p1", "mode: rule\nrules: [A, B]\n"),
            (CONTROLLED_DOC, "mixed-port: 7890\n"),
            (
                OVERRIDES_DOC,
                "- uid: y1\n  name: switch\n  ext: yaml\n  global: false\n  updated: null\n",
            ),
            ("y1", "mode: global\nrules: [C]\n"),
        ]);
        let compiler = Compiler::new(Arc::new(store));
        let out = compiled_doc(&compiler.compile(CompileOptions::default()).await.unwrap());
        assert_eq!(out.get("mode").unwrap().as_str(), Some("global"));
        assert_eq!(out.get("mixed-port").unwrap().as_u64(), Some(7890));
        let rules: Vec<&str> = out
            .get("rules")
            .unwrap()
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(rules, vec!["C"]);
    }

    #[tokio::test]
    async fn snapshots_publish_once_per_successful_run() {
        let idx = index(&[]);
        let store = MemStore::with(vec![(PROFILES_DOC, idx.as_str()), ("p1", PROFILE)]);
        let compiler = Compiler::new(Arc::new(store));
        assert!(compiler.snapshots().is_none());
        compiler.compile(CompileOptions::default()).await.unwrap();
        let snapshots = compiler.snapshots().unwrap();
        assert_eq!(snapshots.raw, PROFILE);
        assert!(snapshots.compiled.contains("HK-01"));
        assert_eq!(
            compiler.snapshot(SnapshotKind::Compiled),
            Some(snapshots.compiled.clone())
        );
    }

    #[tokio::test]
    async fn missing_profile_is_fatal() {
        let store = MemStore::with(vec![(PROFILES_DOC, "current: p9\nitems: []\n")]);
        let compiler = Compiler::new(Arc::new(store));
        assert!(matches!(
            compiler.compile(CompileOptions::default()).await,
            Err(ConfigError::Profile(ProfileError::Missing(_)))
        ));
        assert!(compiler.snapshots().is_none());
    }
}
