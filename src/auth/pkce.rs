//! PKCE S256 verifier generation and challenge derivation
//!
//! This module implements the Proof Key for Code Exchange (PKCE) extension
//! to OAuth 2.0 as defined in RFC 7636, using the `S256` challenge method.
//!
//! # How PKCE works
//!
//! 1. The client generates a high-entropy random string called the `code_verifier`.
//! 2. The client computes a SHA-256 hash of the verifier and base64url-encodes
//!    it to produce the `code_challenge`.
//! 3. The authorization request includes `code_challenge` and
//!    `code_challenge_method=S256`.
//! 4. The token exchange request includes the original `code_verifier`.
//! 5. The authorization server recomputes the challenge and compares it to
//!    the value sent in step 3, proving possession of the verifier.
//!
//! A fresh pair is generated for every authorization attempt; the flow drops
//! the verifier once the code exchange has been sent.
//!
//! # References
//!
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>

use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Length of every generated verifier (the RFC 7636 maximum).
pub const VERIFIER_LENGTH: usize = 128;

/// The challenge method sent alongside `code_challenge`.
pub const CHALLENGE_METHOD: &str = "S256";

/// RFC 3986 unreserved characters, the alphabet allowed in a verifier.
const UNRESERVED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// A PKCE S256 verifier and its derived challenge.
///
/// # Examples
///
/// ```
/// use autoauth::auth::pkce;
///
/// let pair = pkce::generate();
/// assert_eq!(pair.verifier.len(), pkce::VERIFIER_LENGTH);
/// assert_eq!(pair.challenge, pkce::challenge_for(&pair.verifier));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    /// 128 characters drawn uniformly from `[A-Za-z0-9-._~]`.
    ///
    /// Sent to the token endpoint as `code_verifier`.
    pub verifier: String,

    /// `BASE64URL-NOPAD(SHA256(verifier))`, sent to the authorization
    /// endpoint as `code_challenge`.
    pub challenge: String,
}

/// Generates a fresh PKCE pair from the thread-local CSPRNG.
pub fn generate() -> PkcePair {
    use rand::Rng as _;

    let mut rng = rand::rng();
    let verifier: String = (0..VERIFIER_LENGTH)
        .map(|_| char::from(UNRESERVED[rng.random_range(0..UNRESERVED.len())]))
        .collect();
    let challenge = challenge_for(&verifier);

    PkcePair {
        verifier,
        challenge,
    }
}

/// Derives the S256 challenge for `verifier`.
///
/// RFC 7636 section 4.2: `BASE64URL(SHA256(ASCII(code_verifier)))`.
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
}

/// Returns `true` when every character of `verifier` is unreserved.
pub fn is_unreserved(verifier: &str) -> bool {
    verifier.bytes().all(|b| UNRESERVED.contains(&b))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
