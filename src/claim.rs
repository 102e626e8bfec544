//! Claim Inspection
//!
//! Read-only accessors over a PersistentVolumeClaim: identity, the
//! provisioner's annotations and finalizer, and the storage request converted
//! into a whole-GiB share quota.

use crate::domain::literals::{
    FINALIZER, RETAIN_SHARE_ANNOTATION, RETAIN_SHARE_VALUE, SHARE_NAME_ANNOTATION,
    SHARE_OVERRIDE_ANNOTATION, STORAGE_RESOURCE,
};
use crate::domain::ports::ClaimKey;
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;

/// Bytes per GiB of share quota
pub const GIB: u128 = 1 << 30;

// =============================================================================
// Identity
// =============================================================================

/// Scheduler key of a claim
pub fn key_of(claim: &PersistentVolumeClaim) -> ClaimKey {
    ClaimKey::new(claim.namespace().unwrap_or_default(), claim.name_any())
}

/// Name of the StorageClass the claim asks for, if any
pub fn storage_class_name(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim
        .spec
        .as_ref()
        .and_then(|spec| spec.storage_class_name.as_deref())
        .filter(|name| !name.is_empty())
}

/// Whether the claim is being deleted
pub fn is_deleting(claim: &PersistentVolumeClaim) -> bool {
    claim.metadata.deletion_timestamp.is_some()
}

// =============================================================================
// Annotations / Finalizer
// =============================================================================

fn annotation<'a>(claim: &'a PersistentVolumeClaim, key: &str) -> Option<&'a str> {
    claim
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
}

/// Share name override, empty when unset
pub fn share_override(claim: &PersistentVolumeClaim) -> &str {
    annotation(claim, SHARE_OVERRIDE_ANNOTATION).unwrap_or("")
}

/// Share name recorded by a previous successful provisioning
pub fn recorded_share_name(claim: &PersistentVolumeClaim) -> Option<&str> {
    annotation(claim, SHARE_NAME_ANNOTATION).filter(|name| !name.is_empty())
}

/// Whether the operator asked to keep the share after the claim is deleted
pub fn retains_share(claim: &PersistentVolumeClaim) -> bool {
    annotation(claim, RETAIN_SHARE_ANNOTATION) == Some(RETAIN_SHARE_VALUE)
}

/// Whether the claim carries the provisioner finalizer
pub fn has_finalizer(claim: &PersistentVolumeClaim) -> bool {
    claim.finalizers().iter().any(|f| f == FINALIZER)
}

/// Finalizer list with the provisioner finalizer appended, or `None` if present
pub fn finalizers_with_ours(claim: &PersistentVolumeClaim) -> Option<Vec<String>> {
    if has_finalizer(claim) {
        return None;
    }
    let mut finalizers = claim.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    Some(finalizers)
}

/// Finalizer list without the provisioner finalizer, or `None` if absent
pub fn finalizers_without_ours(claim: &PersistentVolumeClaim) -> Option<Vec<String>> {
    if !has_finalizer(claim) {
        return None;
    }
    Some(
        claim
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != FINALIZER)
            .cloned()
            .collect(),
    )
}

// =============================================================================
// Storage Request / Quota
// =============================================================================

/// Requested storage quantity, if the claim has one
pub fn storage_request(claim: &PersistentVolumeClaim) -> Option<&Quantity> {
    claim
        .spec
        .as_ref()
        .and_then(|spec| spec.resources.as_ref())
        .and_then(|resources| resources.requests.as_ref())
        .and_then(|requests| requests.get(STORAGE_RESOURCE))
}

/// Share quota in GiB for the claim's storage request, rounded up.
///
/// A missing, unparseable, non-positive or oversized request is an
/// `Error::InvalidClaim`.
pub fn quota_gib(claim: &PersistentVolumeClaim) -> Result<i32> {
    let invalid = |reason: String| Error::InvalidClaim {
        claim: key_of(claim).to_string(),
        reason,
    };

    let quantity = storage_request(claim).ok_or_else(|| invalid("storage request missing".into()))?;
    let bytes = parse_quantity_bytes(&quantity.0)
        .map_err(|e| invalid(format!("storage request {:?}: {}", quantity.0, e)))?;
    if bytes <= 0 {
        return Err(invalid(format!("storage request {:?} is not positive", quantity.0)));
    }

    quota_from_bytes(bytes as u128).ok_or_else(|| {
        invalid(format!("storage request {:?} is too large", quantity.0))
    })
}

/// `ceil(bytes / 2^30)`, or `None` if it does not fit an `i32`
pub fn quota_from_bytes(bytes: u128) -> Option<i32> {
    let quota = bytes.div_ceil(GIB);
    i32::try_from(quota).ok()
}

/// Parse a Kubernetes resource quantity into bytes, rounding up fractions.
///
/// Accepts binary suffixes (`Ki`..`Ei`), decimal suffixes (`m`, `k`..`E`) and
/// decimal exponents (`1e3`).
pub fn parse_quantity_bytes(s: &str) -> Result<i128> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::QuantityParse("empty quantity".into()));
    }

    let (negative, unsigned) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    // Find where the number ends and the suffix begins
    let num_end = unsigned
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(unsigned.len());
    let (num_str, suffix) = unsigned.split_at(num_end);

    let (int_part, frac_part) = match num_str.split_once('.') {
        Some((i, f)) => (i, f),
        None => (num_str, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(Error::QuantityParse(format!("invalid number: {:?}", s)));
    }
    if frac_part.contains('.') {
        return Err(Error::QuantityParse(format!("invalid number: {:?}", s)));
    }

    // value = mantissa / 10^scale * numerator / denominator
    let digits = format!("{}{}", int_part, frac_part);
    let mantissa: u128 = digits
        .parse()
        .map_err(|_| Error::QuantityParse(format!("invalid number: {:?}", s)))?;
    let mut scale = frac_part.len() as i32;

    let overflow = || Error::QuantityParse(format!("quantity out of range: {:?}", s));
    let (numerator, denominator): (u128, u128) = match suffix {
        "" => (1, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        "m" => (1, 1_000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        exp if exp.starts_with('e') || exp.starts_with('E') => {
            let exponent: i32 = exp[1..]
                .parse()
                .map_err(|_| Error::QuantityParse(format!("invalid exponent: {:?}", s)))?;
            scale = scale.checked_sub(exponent).ok_or_else(overflow)?;
            (1, 1)
        }
        other => {
            return Err(Error::QuantityParse(format!("unknown suffix: {:?}", other)));
        }
    };

    let mut numerator = mantissa.checked_mul(numerator).ok_or_else(overflow)?;
    let mut denominator = denominator;
    if scale >= 0 {
        denominator = denominator
            .checked_mul(10u128.checked_pow(scale as u32).ok_or_else(overflow)?)
            .ok_or_else(overflow)?;
    } else {
        numerator = numerator
            .checked_mul(10u128.checked_pow((-scale) as u32).ok_or_else(overflow)?)
            .ok_or_else(overflow)?;
    }

    let value = i128::try_from(numerator.div_ceil(denominator)).map_err(|_| overflow())?;
    Ok(if negative { -value } else { value })
}
