use sha1::{Digest, Sha1};

/// Length of stored digests, in hex chars.
pub const DIGEST_LEN: usize = 16;

/// 16-hex digest used for prune hashes, tool-call keys and repeat hashes.
///
/// The truncated-sha1 format is part of the persisted memory-file contract,
/// so it must stay stable across versions.
pub fn digest16(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    let full = format!("{:x}", hasher.finalize());
    full[..DIGEST_LEN].to_owned()
}

/// Digest of a tool call identity: `toolName || stableKey`.
pub fn tool_call_digest(tool: &str, stable_key: &str) -> String {
    digest16(&format!("{tool}||{stable_key}"))
}
