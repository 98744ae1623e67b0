use regex::Regex;
use serde_yaml::{Mapping, Value};

const LOG_LEVELS: [&str; 5] = ["silent", "error", "warning", "info", "debug"];

/// Top-level booleans whose `false` state carries meaning and is owned by a
/// dedicated rule instead of the generic stripper.
const BOOL_KEEP: [&str; 1] = ["allow-lan"];

const PORT_KEYS: [&str; 5] = ["port", "socks-port", "mixed-port", "redir-port", "tproxy-port"];

const LOOPBACK_RANGE: &str = "127.0.0.1/8";

/// Strip default-equivalent and contradictory fields so the emitted document
/// only states what actually deviates from core defaults.
pub fn sanitize(doc: &mut Mapping, control_dns: bool, control_sniff: bool) {
    coerce_log_level(doc);
    strip_false_booleans(doc);
    strip_zero_ports(doc);
    strip_empty_strings(doc);
    lan_rules(doc);
    auth_rules(doc);
    tun_rules(doc);
    if control_dns {
        dns_rules(doc);
    }
    if control_sniff {
        sniffer_rules(doc);
    }
    strip_empty_collections(doc);
}

fn coerce_log_level(doc: &mut Mapping) {
    if let Some(level) = doc.get("log-level") {
        let valid = level
            .as_str()
            .map(|l| LOG_LEVELS.contains(&l))
            .unwrap_or(false);
        if !valid {
            doc.insert("log-level".into(), "info".into());
        }
    }
}

fn strip_false_booleans(doc: &mut Mapping) {
    let keys: Vec<Value> = doc
        .iter()
        .filter(|(k, v)| {
            v.as_bool() == Some(false)
                && !k
                    .as_str()
                    .map(|k| BOOL_KEEP.contains(&k))
                    .unwrap_or(false)
        })
        .map(|(k, _)| k.clone())
        .collect();
    for key in keys {
        doc.remove(&key);
    }
}

fn strip_zero_ports(doc: &mut Mapping) {
    for key in PORT_KEYS {
        if doc.get(key).and_then(Value::as_u64) == Some(0) {
            doc.remove(key);
        }
    }
}

fn strip_empty_strings(doc: &mut Mapping) {
    let keys: Vec<Value> = doc
        .iter()
        .filter(|(_, v)| v.as_str() == Some(""))
        .map(|(k, _)| k.clone())
        .collect();
    for key in keys {
        doc.remove(&key);
    }
    // Dependent fields are meaningless once their anchor is gone.
    if !doc.contains_key("external-controller") {
        doc.remove("external-ui");
        doc.remove("external-controller-cors");
    }
    if !doc.contains_key("external-ui") {
        doc.remove("external-ui-url");
    }
}

fn lan_rules(doc: &mut Mapping) {
    let enabled = doc.get("allow-lan").and_then(Value::as_bool) == Some(true);
    if !enabled {
        doc.remove("allow-lan");
        doc.remove("lan-allowed-ips");
        doc.remove("lan-disallowed-ips");
        return;
    }
    if let Some(allowed) = doc.get_mut("lan-allowed-ips").and_then(Value::as_sequence_mut) {
        let has_loopback = allowed
            .iter()
            .filter_map(Value::as_str)
            .any(|ip| ip.starts_with("127.0.0.1/"));
        if !allowed.is_empty() && !has_loopback {
            allowed.push(LOOPBACK_RANGE.into());
        }
    }
}

fn auth_rules(doc: &mut Mapping) {
    let empty = doc
        .get("authentication")
        .and_then(Value::as_sequence)
        .map(|s| s.is_empty())
        .unwrap_or(true);
    if empty {
        doc.remove("authentication");
        doc.remove("skip-auth-prefixes");
    }
}

fn tun_rules(doc: &mut Mapping) {
    let enabled = doc
        .get("tun")
        .and_then(Value::as_mapping)
        .and_then(|t| t.get("enable"))
        .and_then(Value::as_bool)
        == Some(true);
    if doc.get("tun").map(Value::is_mapping) != Some(true) {
        return;
    }
    if !enabled {
        doc.remove("tun");
        return;
    }
    let Some(tun) = doc.get_mut("tun").and_then(Value::as_mapping_mut) else {
        return;
    };
    let defaults: Vec<Value> = tun
        .iter()
        .filter(|(k, v)| v.as_bool() == Some(false) && k.as_str() != Some("enable"))
        .map(|(k, _)| k.clone())
        .collect();
    for key in defaults {
        tun.remove(&key);
    }
    if tun.get("mtu").and_then(Value::as_u64) == Some(0) {
        tun.remove("mtu");
    }
    if let Some(device) = tun.get("device").and_then(Value::as_str) {
        if device.is_empty() {
            tun.remove("device");
        } else {
            #[cfg(target_os = "macos")]
            if !device_name_valid(device) {
                tracing::warn!("TUN device {} does not fit the platform, dropped", device);
                tun.remove("device");
            }
        }
    }
}

/// Darwin only hands out utun devices; anything else cannot be opened.
fn device_name_valid(name: &str) -> bool {
    Regex::new(r"^utun\d+$").unwrap().is_match(name)
}

fn dns_rules(doc: &mut Mapping) {
    let enabled = doc
        .get("dns")
        .and_then(Value::as_mapping)
        .and_then(|d| d.get("enable"))
        .and_then(Value::as_bool)
        == Some(true);
    if doc.get("dns").map(Value::is_mapping) != Some(true) {
        return;
    }
    if !enabled {
        doc.remove("dns");
        return;
    }
    let Some(dns) = doc.get_mut("dns").and_then(Value::as_mapping_mut) else {
        return;
    };
    let empty_arrays: Vec<Value> = dns
        .iter()
        .filter(|(_, v)| v.as_sequence().map(|s| s.is_empty()).unwrap_or(false))
        .map(|(k, _)| k.clone())
        .collect();
    for key in empty_arrays {
        dns.remove(&key);
    }
    let respect = dns.get("respect-rules").and_then(Value::as_bool);
    let has_proxy_nameserver = dns
        .get("proxy-server-nameserver")
        .and_then(Value::as_sequence)
        .map(|s| !s.is_empty())
        .unwrap_or(false);
    if respect == Some(false) || (respect.is_some() && !has_proxy_nameserver) {
        dns.remove("respect-rules");
    }
    if dns
        .get("nameserver-policy")
        .and_then(Value::as_mapping)
        .map(|m| m.is_empty())
        .unwrap_or(false)
    {
        dns.remove("nameserver-policy");
    }
    // Superseded upstream; must never reach the core.
    dns.remove("fallback");
    dns.remove("fallback-filter");
}

fn sniffer_rules(doc: &mut Mapping) {
    let Some(sniffer) = doc.get("sniffer").and_then(Value::as_mapping) else {
        return;
    };
    if sniffer.get("enable").and_then(Value::as_bool) != Some(true) {
        doc.remove("sniffer");
    }
}

fn strip_empty_collections(doc: &mut Mapping) {
    for key in ["proxies", "proxy-groups", "rules"] {
        if doc
            .get(key)
            .and_then(Value::as_sequence)
            .map(|s| s.is_empty())
            .unwrap_or(false)
        {
            doc.remove(key);
        }
    }
    for key in ["proxy-providers", "rule-providers"] {
        if doc
            .get(key)
            .and_then(Value::as_mapping)
            .map(|m| m.is_empty())
            .unwrap_or(false)
        {
            doc.remove(key);
        }
    }
}
