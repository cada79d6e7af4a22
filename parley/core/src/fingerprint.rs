//! Contact Fingerprinting
//!
//! Derives a stable, opaque identity token from a user's email address so
//! contacts in the remote conversation store can be keyed without storing
//! raw PII there.
//!
//! # Design Philosophy
//!
//! The fingerprint is a name-based (version 5) UUID: SHA-1 over a fixed
//! namespace followed by the lower-cased email. Two properties matter and
//! both fall out of the construction:
//!
//! - **Determinism**: the same email (case-insensitively) always maps to the
//!   same fingerprint, with no dependence on wall-clock time, randomness, or
//!   any external service.
//! - **Non-reversibility**: the one-way hash and the private namespace mean
//!   the email cannot be recovered from the fingerprint alone.
//!
//! Hashing imposes no input validation: an empty or malformed email still
//! yields a syntactically valid fingerprint. Email validity is the caller's
//! concern.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for contact fingerprints.
///
/// Fixed for the lifetime of the deployment: changing it would re-key every
/// contact in the remote store.
const CONTACT_NAMESPACE: Uuid = Uuid::from_u128(0xe676_f123_b5eb_4c44_a80b_8aa0_e723_cfe6);

/// A deterministic, one-way identity token derived from an email address
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(Uuid);

impl Fingerprint {
    /// Access the underlying UUID
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Canonical hyphenated 8-4-4-4-12 form
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Derive the fingerprint for an email address.
///
/// The email is lower-cased before hashing so lookups are case-insensitive.
#[must_use]
pub fn derive_fingerprint(email: &str) -> Fingerprint {
    Fingerprint(Uuid::new_v5(
        &CONTACT_NAMESPACE,
        email.to_lowercase().as_bytes(),
    ))
}
