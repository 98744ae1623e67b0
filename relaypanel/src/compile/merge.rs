use serde_yaml::{Mapping, Value};

/// Recursively merge `patch` over `base`, returning a new value.
///
/// Mappings merge key by key; sequences are replaced wholesale when
/// `replace_arrays` is set and concatenated otherwise; any other pair of
/// values resolves to the patch side. Neither input is modified.
pub fn deep_merge(base: &Value, patch: &Value, replace_arrays: bool) -> Value {
    match (base, patch) {
        (Value::Mapping(base), Value::Mapping(patch)) => {
            Value::Mapping(merge_mappings(base, patch, replace_arrays))
        }
        (Value::Sequence(base), Value::Sequence(patch)) if !replace_arrays => {
            let mut merged = base.clone();
            merged.extend(patch.iter().cloned());
            Value::Sequence(merged)
        }
        (_, patch) => patch.clone(),
    }
}

pub fn merge_mappings(base: &Mapping, patch: &Mapping, replace_arrays: bool) -> Mapping {
    let mut merged = base.clone();
    for (key, patch_value) in patch {
        let next = match merged.get(key) {
            Some(base_value) => deep_merge(base_value, patch_value, replace_arrays),
            None => patch_value.clone(),
        };
        merged.insert(key.clone(), next);
    }
    merged
}
