//! Naming Engine
//!
//! Pure functions turning claim identity into Azure share names and
//! PersistentVolume names. Every output is a deterministic function of its
//! inputs, so a crashed reconcile recomputes exactly the same names.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};

/// Maximum length of an Azure File share name
pub const MAX_SHARE_NAME_LENGTH: usize = 63;

/// Hex characters of digest appended to truncated share names
pub const SHARE_HASH_LENGTH: usize = 8;

/// Hex characters of digest appended to volume names
pub const VOLUME_HASH_LENGTH: usize = 12;

/// Maximum length of a Kubernetes object name (DNS subdomain)
pub const MAX_VOLUME_NAME_LENGTH: usize = 253;

const VOLUME_NAME_PREFIX: &str = "pvc-";
const VOLUME_NAME_FALLBACK: &str = "pv";

/// Normalize `raw` to lowercase ASCII with single hyphen separators.
///
/// Output only contains `[a-z0-9-]` and has no leading/trailing hyphen.
pub fn sanitize(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_dash = false;

    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }

    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        return Err(Error::InvalidShareName(format!(
            "{:?} has no usable characters",
            raw
        )));
    }
    Ok(trimmed.to_string())
}

/// Compute the share name for a claim.
///
/// Uses `share_override` when non-empty, `{namespace}-{name}` otherwise.
/// Names longer than [`MAX_SHARE_NAME_LENGTH`] keep a truncated prefix and
/// end in `-` plus a digest of the full sanitized base.
pub fn compute_share_name(namespace: &str, name: &str, share_override: &str) -> Result<String> {
    let base = if share_override.is_empty() {
        format!("{}-{}", namespace, name)
    } else {
        share_override.to_string()
    };

    let sanitized = sanitize(&base)?;
    if sanitized.len() <= MAX_SHARE_NAME_LENGTH {
        return Ok(sanitized);
    }

    let suffix = format!("-{}", hex_digest(&sanitized, SHARE_HASH_LENGTH));
    let max_prefix = MAX_SHARE_NAME_LENGTH.saturating_sub(suffix.len());
    if max_prefix == 0 {
        return Err(Error::InvalidShareName(format!(
            "no room for a prefix in {:?}",
            sanitized
        )));
    }

    // sanitized is pure ASCII, byte slicing is char slicing
    let prefix = sanitized[..max_prefix].trim_end_matches('-');
    if prefix.is_empty() {
        return Err(Error::InvalidShareName(format!(
            "prefix of {:?} is empty",
            sanitized
        )));
    }

    Ok(format!("{}{}", prefix, suffix))
}

/// Compute the PersistentVolume name binding a claim to a share.
///
/// The digest covers account, resource group and claim uid, so two claims
/// with identical namespace/name/share never collide.
pub fn volume_name(
    namespace: &str,
    name: &str,
    share_name: &str,
    storage_account: &str,
    resource_group: &str,
    claim_uid: &str,
) -> String {
    let base = format!("{}-{}-{}", namespace, name, share_name);
    let base = sanitize(&base).unwrap_or_else(|_| VOLUME_NAME_FALLBACK.to_string());

    let identity = format!("{}|{}|{}", storage_account, resource_group, claim_uid);
    let hash = hex_digest(&identity, VOLUME_HASH_LENGTH);

    let budget = MAX_VOLUME_NAME_LENGTH - VOLUME_NAME_PREFIX.len() - 1 - VOLUME_HASH_LENGTH;
    let base = if base.len() > budget {
        base[..budget].trim_end_matches('-')
    } else {
        base.as_str()
    };

    format!("{}{}-{}", VOLUME_NAME_PREFIX, base, hash)
}

/// First `len` hex characters of the SHA-256 of `value`
pub fn hex_digest(value: &str, len: usize) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(len);
    encoded
}
