//! Deterministic fingerprinting shared by the Response Cache and the
//! Orchestration Engine's checkpoint digests.

use blake3::Hasher;

const SEP: u8 = 0x1f;

fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[SEP]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Cache fingerprint for `(worker, hookKind, sessionId, normalizedArgs)`
/// (§4.4). `args` must already be in a canonical form (e.g. serde_json's
/// default key ordering is not guaranteed stable across maps, so callers
/// should serialize through a `BTreeMap` or sorted-keys value first).
pub fn cache_fingerprint(worker: &str, hook_kind: &str, session_id: &str, normalized_args: &str) -> String {
    hash_parts(&[worker, hook_kind, session_id, normalized_args])
}

/// Digest of a Phase result, used for wave checkpointing and resumption.
pub fn result_digest(payload: &str) -> String {
    hash_parts(&[payload])
}

/// Digest of a merged Context, used for wave checkpointing.
pub fn context_digest(command: &str, flags: &[String], scope: &[String], metadata_json: &str) -> String {
    let flags_joined = flags.join(",");
    let scope_joined = scope.join(",");
    hash_parts(&[command, &flags_joined, &scope_joined, metadata_json])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = cache_fingerprint("w1", "pre_tool", "s1", "{}");
        let b = cache_fingerprint("w1", "pre_tool", "s1", "{}");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_distinguishes_components() {
        let a = cache_fingerprint("w1", "pre_tool", "s1", "{}");
        let b = cache_fingerprint("w2", "pre_tool", "s1", "{}");
        assert_ne!(a, b);
    }
}
