use crate::compile::logs::OverrideLogStore;
use crate::compile::merge::merge_mappings;
use crate::compile::script::{ScriptEngine, ScriptOutput};
use crate::config::{ConfigError, LoadedOverride};
use relayapi::{OverrideExt, ScriptLogKind};
use serde_yaml::Mapping;

/// Application order: every globally-flagged override first (listing order),
/// then the ids attached to the current profile, de-duplicated by uid with
/// first-seen position winning.
pub fn ordered_overrides<'a>(
    all: &'a [LoadedOverride],
    attached: &[String],
) -> Vec<&'a LoadedOverride> {
    let mut seen = std::collections::HashSet::new();
    let mut ordered = Vec::new();
    for item in all.iter().filter(|o| o.meta.global) {
        if seen.insert(item.meta.uid.as_str()) {
            ordered.push(item);
        }
    }
    for uid in attached {
        if let Some(item) = all.iter().find(|o| &o.meta.uid == uid) {
            if seen.insert(item.meta.uid.as_str()) {
                ordered.push(item);
            }
        }
    }
    ordered
}

/// Apply overrides in sequence; each override's output feeds the next one.
///
/// No override failure aborts the pipeline: bad yaml degrades to an empty
/// patch and a misbehaving script leaves the document untouched, with the
/// reason recorded in that override's log. Only a sandbox that cannot be
/// constructed at all propagates.
pub async fn apply_overrides(
    doc: Mapping,
    overrides: &[&LoadedOverride],
    logs: &OverrideLogStore,
) -> Result<Mapping, ConfigError> {
    let mut working = doc;
    for item in overrides {
        let uid = item.meta.uid.as_str();
        logs.reset(uid);
        let sink = logs.sink(uid);
        match item.meta.ext {
            OverrideExt::Yaml => {
                match serde_yaml::from_str::<serde_yaml::Value>(&item.content) {
                    Ok(serde_yaml::Value::Mapping(patch)) => {
                        working = merge_mappings(&working, &patch, true);
                        sink.push(ScriptLogKind::Info, "patch merged".to_string());
                    }
                    Ok(_) | Err(_) => {
                        // Fail open: a malformed patch is an empty patch.
                        tracing::warn!(
                            "Override {} ({}) is not a mapping, treated as empty",
                            item.meta.name,
                            uid
                        );
                        sink.push(
                            ScriptLogKind::Exception,
                            "content is not a mapping, treated as empty patch".to_string(),
                        );
                    }
                }
            }
            OverrideExt::Js => {
                let engine = ScriptEngine::new(uid, &item.content, sink.clone());
                match engine.run(&working).await? {
                    ScriptOutput::Document(next) => {
                        working = next;
                        sink.push(ScriptLogKind::Info, "script completed".to_string());
                    }
                    ScriptOutput::Failure(failure) => {
                        tracing::warn!(
                            "Override {} ({}) skipped: {}",
                            item.meta.name,
                            uid,
                            failure
                        );
                        sink.push(ScriptLogKind::Exception, failure.to_string());
                    }
                }
            }
        }
    }
    Ok(working)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayapi::OverrideMeta;

    fn over(uid: &str, ext: OverrideExt, global: bool, content: &str) -> LoadedOverride {
        LoadedOverride {
            meta: OverrideMeta {
                uid: uid.to_string(),
                name: uid.to_string(),
                ext,
                global,
                updated: None,
            },
            content: content.to_string(),
        }
    }

    fn doc(text: &str) -> Mapping {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn global_first_then_attached_deduplicated() {
        let all = vec![
            over("g1", OverrideExt::Yaml, true, ""),
            over("a1", OverrideExt::Yaml, false, ""),
            over("a2", OverrideExt::Yaml, false, ""),
        ];
        let attached = vec!["a2".to_string(), "g1".to_string(), "a1".to_string()];
        let ordered: Vec<&str> = ordered_overrides(&all, &attached)
            .iter()
            .map(|o| o.meta.uid.as_str())
            .collect();
        assert_eq!(ordered, vec!["g1", "a2", "a1"]);
    }

    #[tokio::test]
    async fn yaml_override_replaces_arrays() {
        let all = vec![over(
            "y1",
            OverrideExt::Yaml,
            true,
            "mode: global\nrules: [C]",
        )];
        let logs = OverrideLogStore::new();
        let ordered = ordered_overrides(&all, &[]);
        let out = apply_overrides(doc("mode: rule\nrules: [A, B]"), &ordered, &logs)
            .await
            .unwrap();
        assert_eq!(out.get("mode").unwrap().as_str(), Some("global"));
        assert_eq!(out, doc("mode: global\nrules: [C]"));
    }

    #[tokio::test]
    async fn malformed_yaml_is_an_empty_patch() {
        let all = vec![over("y1", OverrideExt::Yaml, true, ": [ not yaml")];
        let logs = OverrideLogStore::new();
        let ordered = ordered_overrides(&all, &[]);
        let before = doc("mode: rule");
        let out = apply_overrides(before.clone(), &ordered, &logs).await.unwrap();
        assert_eq!(out, before);
        assert_eq!(logs.get("y1")[0].kind, ScriptLogKind::Exception);
    }

    #[tokio::test]
    async fn throwing_script_keeps_previous_document() {
        let all = vec![over(
            "s1",
            OverrideExt::Js,
            true,
            "function main(p) { throw new Error('x'); }",
        )];
        let logs = OverrideLogStore::new();
        let ordered = ordered_overrides(&all, &[]);
        let before = doc("mode: rule\nproxies: [{name: HK-01, type: ss}]");
        let out = apply_overrides(before.clone(), &ordered, &logs).await.unwrap();
        assert_eq!(out, before);
        let entries = logs.get("s1");
        assert!(entries
            .iter()
            .any(|e| e.kind == ScriptLogKind::Exception && e.message.contains("x")));
    }

    #[tokio::test]
    async fn script_output_feeds_next_override() {
        let all = vec![
            over(
                "s1",
                OverrideExt::Js,
                true,
                "function main(p) { p.step = 1; return p; }",
            ),
            over("y1", OverrideExt::Yaml, false, "after: true"),
        ];
        let logs = OverrideLogStore::new();
        let attached = vec!["y1".to_string()];
        let ordered = ordered_overrides(&all, &attached);
        let out = apply_overrides(doc("mode: rule"), &ordered, &logs).await.unwrap();
        assert_eq!(out.get("step").unwrap().as_u64(), Some(1));
        assert_eq!(out.get("after").unwrap().as_bool(), Some(true));
    }
}
