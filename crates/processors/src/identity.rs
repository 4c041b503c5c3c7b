// SPDX-License-Identifier: Apache-2.0

//! Stable series and resource identity hashing.

use phoenix_pdata::KeyValue;
use xxhash_rust::xxh3::Xxh3;

/// Hashes one series identity: resource attributes, metric name and
/// data-point attributes, order-independent for the attribute lists.
#[must_use]
pub fn series_hash(
    resource_attributes: &[KeyValue],
    metric_name: &str,
    point_attributes: &[KeyValue],
) -> u64 {
    let mut hasher = Xxh3::new();
    hash_attrs_sorted(&mut hasher, resource_attributes);
    hasher.update(b"\x1f");
    hasher.update(metric_name.as_bytes());
    hasher.update(b"\x1f");
    hash_attrs_sorted(&mut hasher, point_attributes);
    hasher.digest()
}

/// Hashes a resource identity from its attributes alone.
#[must_use]
pub fn resource_hash(resource_attributes: &[KeyValue]) -> u64 {
    let mut hasher = Xxh3::new();
    hash_attrs_sorted(&mut hasher, resource_attributes);
    hasher.digest()
}

fn hash_attrs_sorted(hasher: &mut Xxh3, attributes: &[KeyValue]) {
    let mut pairs: Vec<(&str, String)> = attributes
        .iter()
        .map(|kv| (kv.key.as_str(), kv.value.to_string()))
        .collect();
    pairs.sort_unstable();
    for (key, value) in pairs {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\x1e");
    }
}
