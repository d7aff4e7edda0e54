//! C1: Routing Policy Store.
//!
//! Versioned mapping from (tenant, shard-key) to shard id. Append-only
//! history; the "current" pointer moves forward on every update and can be
//! rolled back to any still-persisted version, but history itself is never
//! rewritten.

use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

pub type ShardId = String;
pub type TenantId = String;

/// A contiguous range of the first two hex chars of `SHA-256(shardKey)`,
/// e.g. `"00".."3f"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HashRange {
    pub prefix_start: String,
    pub prefix_end: String,
    pub shard_id: ShardId,
}

impl HashRange {
    fn contains(&self, prefix: &str) -> bool {
        prefix >= self.prefix_start.as_str() && prefix <= self.prefix_end.as_str()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoutingPolicy {
    pub version: u64,
    pub tenants: BTreeMap<TenantId, ShardId>,
    pub ranges: Vec<HashRange>,
}

impl RoutingPolicy {
    pub fn bootstrap(shard_count: u32) -> Self {
        let mut ranges = Vec::new();
        if shard_count > 0 {
            let span = 256u32 / shard_count.max(1);
            for i in 0..shard_count {
                let start = i * span;
                let end = if i == shard_count - 1 {
                    255
                } else {
                    (i + 1) * span - 1
                };
                ranges.push(HashRange {
                    prefix_start: format!("{:02x}", start),
                    prefix_end: format!("{:02x}", end),
                    shard_id: format!("shard-{i}"),
                });
            }
        }
        Self {
            version: 1,
            tenants: BTreeMap::new(),
            ranges,
        }
    }

    /// Known shard ids referenced anywhere in this policy.
    pub fn known_shards(&self) -> std::collections::BTreeSet<ShardId> {
        let mut shards: std::collections::BTreeSet<ShardId> =
            self.tenants.values().cloned().collect();
        shards.extend(self.ranges.iter().map(|r| r.shard_id.clone()));
        shards
    }

    /// Shard for the first-two-hex-char prefix of a hashed key.
    pub fn range_shard(&self, prefix: &str) -> Option<&ShardId> {
        self.ranges
            .iter()
            .find(|r| r.contains(prefix))
            .map(|r| &r.shard_id)
    }

    /// Stable checksum over canonical (sorted-key) JSON.
    pub fn checksum(&self) -> String {
        let canonical = serde_json::json!({
            "version": self.version,
            "tenants": self.tenants,
            "ranges": self.ranges.iter().map(|r| serde_json::json!({
                "prefix_start": r.prefix_start,
                "prefix_end": r.prefix_end,
                "shard_id": r.shard_id,
            })).collect::<Vec<_>>(),
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: u64,
    pub ts: chrono::DateTime<Utc>,
    pub description: Option<String>,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyDiff {
    pub added_tenants: Vec<TenantId>,
    pub removed_tenants: Vec<TenantId>,
    pub changed_tenants: Vec<ChangedTenant>,
    pub added_ranges: Vec<HashRange>,
    pub removed_ranges: Vec<HashRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedTenant {
    pub tenant_id: TenantId,
    pub old_shard: ShardId,
    pub new_shard: ShardId,
}

/// A persisted version plus the bookkeeping `listVersions()` reports
/// alongside it (spec §4.1): when it was created and the operator's note.
struct VersionEntry {
    policy: RoutingPolicy,
    ts: chrono::DateTime<Utc>,
    description: Option<String>,
}

struct Inner {
    /// All persisted versions, append-only, keyed by version number.
    history: BTreeMap<u64, VersionEntry>,
    /// Pointer to the version currently in effect. Moving this never
    /// mutates `history`.
    current: u64,
}

/// Durable, versioned routing policy store (C1).
pub struct RoutingPolicyStore {
    inner: RwLock<Inner>,
}

impl RoutingPolicyStore {
    pub fn bootstrap(shard_count: u32) -> Self {
        let policy = RoutingPolicy::bootstrap(shard_count);
        let mut history = BTreeMap::new();
        history.insert(
            policy.version,
            VersionEntry {
                policy,
                ts: Utc::now(),
                description: None,
            },
        );
        Self {
            inner: RwLock::new(Inner {
                history,
                current: 1,
            }),
        }
    }

    pub fn get_current_version(&self) -> u64 {
        self.inner.read().current
    }

    pub fn get_current_policy(&self) -> RoutingPolicy {
        let inner = self.inner.read();
        inner.history[&inner.current].policy.clone()
    }

    pub fn get_policy_by_version(&self, version: u64) -> Option<RoutingPolicy> {
        self.inner.read().history.get(&version).map(|e| e.policy.clone())
    }

    /// Replace the current policy, recording a new version. Fails if any
    /// shard referenced by `new_policy` is not in the union of shards known
    /// to the current policy and `new_policy` itself (this is what allows
    /// introducing a brand-new target shard mid-split).
    pub fn update_current_policy(
        &self,
        mut new_policy: RoutingPolicy,
        description: Option<String>,
    ) -> Result<u64> {
        let mut inner = self.inner.write();
        let current = &inner.history[&inner.current].policy;

        let mut known = current.known_shards();
        known.extend(new_policy.known_shards());

        let unknown: Vec<_> = new_policy
            .known_shards()
            .into_iter()
            .filter(|s| !known.contains(s))
            .collect();
        if !unknown.is_empty() {
            return Err(Error::IncompatiblePolicy(format!(
                "unknown shards referenced: {unknown:?}"
            )));
        }

        let new_version = inner.current + 1;
        new_policy.version = new_version;
        inner.history.insert(
            new_version,
            VersionEntry {
                policy: new_policy,
                ts: Utc::now(),
                description,
            },
        );
        inner.current = new_version;
        tracing::info!(version = new_version, "routing policy updated");
        Ok(new_version)
    }

    /// Move the "current" pointer back to a prior version. History is
    /// never rewritten or deleted.
    pub fn rollback_to_version(&self, version: u64) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.history.contains_key(&version) {
            return Err(Error::InvalidPolicy(format!(
                "no such routing policy version: {version}"
            )));
        }
        inner.current = version;
        tracing::warn!(version, "routing policy rolled back");
        Ok(())
    }

    pub fn list_versions(&self) -> Vec<VersionRecord> {
        let inner = self.inner.read();
        let mut versions: Vec<_> = inner
            .history
            .values()
            .map(|e| VersionRecord {
                version: e.policy.version,
                ts: e.ts,
                description: e.description.clone(),
                checksum: e.policy.checksum(),
            })
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        versions
    }

    pub fn get_policy_diff(&self, from_v: u64, to_v: u64) -> Result<PolicyDiff> {
        let inner = self.inner.read();
        let from = &inner
            .history
            .get(&from_v)
            .ok_or_else(|| Error::InvalidPolicy(format!("no such version: {from_v}")))?
            .policy;
        let to = &inner
            .history
            .get(&to_v)
            .ok_or_else(|| Error::InvalidPolicy(format!("no such version: {to_v}")))?
            .policy;

        let mut diff = PolicyDiff::default();
        for (tenant, shard) in &to.tenants {
            match from.tenants.get(tenant) {
                None => diff.added_tenants.push(tenant.clone()),
                Some(old) if old != shard => diff.changed_tenants.push(ChangedTenant {
                    tenant_id: tenant.clone(),
                    old_shard: old.clone(),
                    new_shard: shard.clone(),
                }),
                _ => {}
            }
        }
        for tenant in from.tenants.keys() {
            if !to.tenants.contains_key(tenant) {
                diff.removed_tenants.push(tenant.clone());
            }
        }
        let from_ranges: std::collections::HashSet<_> = from.ranges.iter().collect();
        let to_ranges: std::collections::HashSet<_> = to.ranges.iter().collect();
        diff.added_ranges = to_ranges.difference(&from_ranges).map(|r| (*r).clone()).collect();
        diff.removed_ranges = from_ranges.difference(&to_ranges).map(|r| (*r).clone()).collect();
        Ok(diff)
    }
}

impl std::hash::Hash for HashRange {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.prefix_start.hash(state);
        self.prefix_end.hash(state);
        self.shard_id.hash(state);
    }
}
