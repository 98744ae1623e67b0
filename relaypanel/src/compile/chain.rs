use relayapi::ChainItem;
use serde_yaml::{Mapping, Value};
use std::collections::{HashMap, HashSet};

const PROXIES: &str = "proxies";
const GROUPS: &str = "proxy-groups";
const DIALER: &str = "dialer-proxy";

/// Synthesize the virtual proxy node for every eligible chain and wire it
/// into its target groups.
///
/// Chains that reference a missing landing node or that would close a routing
/// cycle are dropped, never fatal. Re-running with the same chain list yields
/// the same document: existing nodes under a chain's name are replaced and
/// group membership is set-like.
pub fn inject_chains(mut doc: Mapping, chains: &[ChainItem]) -> Mapping {
    if chains.is_empty() {
        return doc;
    }
    for key in [PROXIES, GROUPS] {
        if !doc.contains_key(key) {
            doc.insert(key.into(), Value::Sequence(Vec::new()));
        }
    }

    let candidates: Vec<&ChainItem> = chains
        .iter()
        .filter(|c| {
            c.enabled
                && !c.name.is_empty()
                && !c.target_proxy.is_empty()
                && !c.dialer_proxy.is_empty()
        })
        .collect();
    let graph = build_graph(&doc, &candidates);

    // Landing nodes are looked up in the proxy list as it stood before any
    // chain was injected, so chains cannot clone each other.
    let base_proxies: Vec<Value> = doc
        .get(PROXIES)
        .and_then(Value::as_sequence)
        .cloned()
        .unwrap_or_default();

    for chain in candidates {
        // Fresh DFS state per candidate; dropping one chain never
        // re-validates another within the same pass.
        if has_cycle_from(&graph, &chain.name) {
            tracing::warn!(
                "Chain {} via {} dropped: it would create a routing cycle",
                chain.name,
                chain.dialer_proxy
            );
            continue;
        }
        let Some(template) = base_proxies.iter().find(|p| proxy_name(p) == Some(chain.target_proxy.as_str()))
        else {
            // Dangling landing node; nothing to clone.
            continue;
        };
        let mut node = template
            .as_mapping()
            .cloned()
            .unwrap_or_default();
        node.insert("name".into(), chain.name.clone().into());
        node.insert(DIALER.into(), chain.dialer_proxy.clone().into());

        if let Some(proxies) = doc.get_mut(PROXIES).and_then(Value::as_sequence_mut) {
            proxies.retain(|p| proxy_name(p) != Some(chain.name.as_str()));
            proxies.push(Value::Mapping(node));
        }
        if let Some(groups) = doc.get_mut(GROUPS).and_then(Value::as_sequence_mut) {
            for group_name in &chain.target_groups {
                let Some(group) = groups
                    .iter_mut()
                    .filter_map(Value::as_mapping_mut)
                    .find(|g| g.get("name").and_then(Value::as_str) == Some(group_name.as_str()))
                else {
                    continue;
                };
                if !group.contains_key(PROXIES) {
                    group.insert(PROXIES.into(), Value::Sequence(Vec::new()));
                }
                if let Some(members) = group.get_mut(PROXIES).and_then(Value::as_sequence_mut) {
                    let already = members
                        .iter()
                        .any(|m| m.as_str() == Some(chain.name.as_str()));
                    if !already {
                        members.push(chain.name.clone().into());
                    }
                }
            }
        }
    }
    doc
}

/// Directed dependency edges, source -> what its traffic can flow into.
fn build_graph(doc: &Mapping, candidates: &[&ChainItem]) -> HashMap<String, Vec<String>> {
    let mut graph: HashMap<String, Vec<String>> = HashMap::new();
    let mut edge = |from: &str, to: &str| {
        graph
            .entry(from.to_string())
            .or_default()
            .push(to.to_string());
    };

    if let Some(groups) = doc.get(GROUPS).and_then(Value::as_sequence) {
        for group in groups.iter().filter_map(Value::as_mapping) {
            let Some(name) = group.get("name").and_then(Value::as_str) else {
                continue;
            };
            if let Some(members) = group.get(PROXIES).and_then(Value::as_sequence) {
                for member in members.iter().filter_map(Value::as_str) {
                    edge(name, member);
                }
            }
        }
    }
    if let Some(proxies) = doc.get(PROXIES).and_then(Value::as_sequence) {
        for proxy in proxies.iter().filter_map(Value::as_mapping) {
            let (Some(name), Some(dialer)) = (
                proxy.get("name").and_then(Value::as_str),
                proxy.get(DIALER).and_then(Value::as_str),
            ) else {
                continue;
            };
            edge(name, dialer);
        }
    }
    for chain in candidates {
        edge(&chain.name, &chain.dialer_proxy);
        edge(&chain.name, &chain.target_proxy);
        for group in &chain.target_groups {
            edge(group, &chain.name);
        }
    }
    graph
}

fn has_cycle_from(graph: &HashMap<String, Vec<String>>, start: &str) -> bool {
    let mut visiting = HashSet::new();
    let mut visited = HashSet::new();
    visit(graph, start, &mut visiting, &mut visited)
}

fn visit<'a>(
    graph: &'a HashMap<String, Vec<String>>,
    node: &'a str,
    visiting: &mut HashSet<&'a str>,
    visited: &mut HashSet<&'a str>,
) -> bool {
    if visiting.contains(node) {
        return true;
    }
    if !visited.insert(node) {
        return false;
    }
    visiting.insert(node);
    if let Some(deps) = graph.get(node) {
        for dep in deps {
            if visit(graph, dep, visiting, visited) {
                return true;
            }
        }
    }
    visiting.remove(node);
    false
}

fn proxy_name(proxy: &Value) -> Option<&str> {
    proxy
        .as_mapping()
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
}
