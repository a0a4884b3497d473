//! Pluggable conflict resolution strategies.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::hlc::Timestamp;

/// Resolves a conflict between a locally stored body and an incoming
/// remote body, both tagged with the HLC that produced them.
///
/// Resolvers must be pure and deterministic: identical inputs must produce
/// identical outputs on every node, or gossip will not converge to the
/// same state regardless of delivery order.
pub trait ConflictResolver: Send + Sync {
    /// Merges `local` and `remote`, returning the body to persist and the
    /// timestamp to record (always the max of the two inputs).
    fn resolve(&self, local: &ResolverInput<'_>, remote: &ResolverInput<'_>) -> String;

    /// A short name for logging/diagnostics.
    fn name(&self) -> &'static str;
}

/// One side of a conflict: a document body plus the HLC that produced it.
pub struct ResolverInput<'a> {
    pub body: &'a str,
    pub hlc: &'a Timestamp,
}

/// Last-Write-Wins: keeps the body with the higher HLC.
///
/// This is also the implicit gate the merge engine uses regardless of the
/// configured resolver: an op is only handed to a resolver once it has
/// already passed the strict-HLC-supersession check.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl ConflictResolver for LastWriteWins {
    fn resolve(&self, local: &ResolverInput<'_>, remote: &ResolverInput<'_>) -> String {
        if remote.hlc > local.hlc {
            remote.body.to_string()
        } else {
            local.body.to_string()
        }
    }

    fn name(&self) -> &'static str {
        "last-write-wins"
    }
}

/// Recursive field merge: per JSON-object field, the side with the higher
/// HLC wins; arrays of identity-bearing objects merge by `id`/`_id`;
/// everything else falls back to LWW at the leaf.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldMerge;

impl ConflictResolver for FieldMerge {
    fn resolve(&self, local: &ResolverInput<'_>, remote: &ResolverInput<'_>) -> String {
        let local_value: Result<Value, _> = serde_json::from_str(local.body);
        let remote_value: Result<Value, _> = serde_json::from_str(remote.body);

        let (Ok(lv), Ok(rv)) = (local_value, remote_value) else {
            tracing::warn!("field-merge resolver: malformed JSON body, falling back to LWW");
            return LastWriteWins.resolve(local, remote);
        };

        let merged = merge_values(&lv, local.hlc, &rv, remote.hlc);
        merged.to_string()
    }

    fn name(&self) -> &'static str {
        "field-merge"
    }
}

fn merge_values(local: &Value, local_hlc: &Timestamp, remote: &Value, remote_hlc: &Timestamp) -> Value {
    match (local, remote) {
        (Value::Object(lo), Value::Object(ro)) => {
            let mut out = serde_json::Map::new();
            let mut keys: Vec<&String> = lo.keys().chain(ro.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                match (lo.get(key), ro.get(key)) {
                    (Some(l), Some(r)) => {
                        out.insert(key.clone(), merge_values(l, local_hlc, r, remote_hlc));
                    }
                    (Some(l), None) => {
                        out.insert(key.clone(), l.clone());
                    }
                    (None, Some(r)) => {
                        out.insert(key.clone(), r.clone());
                    }
                    (None, None) => unreachable!("key came from one of the two maps"),
                }
            }
            Value::Object(out)
        }
        (Value::Array(la), Value::Array(ra)) => merge_arrays(la, local_hlc, ra, remote_hlc),
        _ => {
            if remote_hlc > local_hlc {
                remote.clone()
            } else {
                local.clone()
            }
        }
    }
}

fn identity_of(v: &Value) -> Option<&Value> {
    v.as_object().and_then(|o| o.get("id").or_else(|| o.get("_id")))
}

fn merge_arrays(local: &[Value], local_hlc: &Timestamp, remote: &[Value], remote_hlc: &Timestamp) -> Value {
    let all_identified = local.iter().chain(remote.iter()).all(|v| identity_of(v).is_some());

    if !all_identified {
        // Concatenate and de-duplicate by full value equality.
        let mut out: Vec<Value> = Vec::with_capacity(local.len() + remote.len());
        for v in local.iter().chain(remote.iter()) {
            if !out.contains(v) {
                out.push(v.clone());
            }
        }
        return Value::Array(out);
    }

    // Merge by identity: later-HLC side wins per element; elements present
    // on only one side are kept. Order is deterministic by id.
    let mut by_id: BTreeMap<String, (Value, &Timestamp)> = BTreeMap::new();
    for v in local {
        let id = identity_of(v).unwrap().to_string();
        by_id.insert(id, (v.clone(), local_hlc));
    }
    for v in remote {
        let id = identity_of(v).unwrap().to_string();
        match by_id.get(&id) {
            Some((_, existing_hlc)) if *existing_hlc >= remote_hlc => {}
            _ => {
                by_id.insert(id, (v.clone(), remote_hlc));
            }
        }
    }
    Value::Array(by_id.into_values().map(|(v, _)| v).collect())
}
