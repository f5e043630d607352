//! RNG commit-reveal pipeline for provably fair outcomes.
//!
//! ## Commit-Reveal Flow
//!
//! 1. **Generate** - Before any wager, generate a secret server seed
//! 2. **Commit** - Publish `sha256(server_seed)` to the player
//! 3. **Derive** - Each wager maps `(server_seed, client_seed, nonce)` to a float
//! 4. **Reveal** - On rotation the secret is disclosed
//! 5. **Verify** - Anyone can check `sha256(reveal) == commit` and recompute every float
//!
//! ## Derivation
//!
//! ```text
//! digest = HMAC_SHA256(key = server_seed, msg = client_seed ":" nonce [":" round])
//! n      = first 52 bits of digest (13 hex digits)
//! r      = (n + 1) / 2^52            // strictly in (0, 1]
//! ```
//!
//! The server seed is used as its literal UTF-8 text (the hex string the
//! player sees after reveal), so third parties can reproduce results with any
//! stock HMAC implementation.

use hmac::{Hmac, Mac};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length of a server seed in bytes (before hex encoding).
pub const SERVER_SEED_LEN: usize = 32;

/// Length of a hex-encoded commitment.
pub const COMMIT_HEX_LEN: usize = 64;

/// Bits of the digest consumed per float.
pub const FLOAT_BITS: u32 = 52;

const FLOAT_DENOMINATOR: f64 = (1u64 << FLOAT_BITS) as f64;

/// A commit-reveal pair: the published hash and the withheld secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitRevealPair {
    /// Hex SHA-256 of `reveal`. Published before wagering.
    pub commit: String,
    /// Hex server seed. Disclosed on rotation.
    pub reveal: String,
}

impl CommitRevealPair {
    /// Generate a fresh pair from a cryptographic RNG.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let reveal = generate_server_seed(rng);
        let commit = compute_commit(&reveal);
        Self { commit, reveal }
    }

    /// Verify that the commit matches hash(reveal).
    pub fn verify(&self) -> bool {
        verify_commit_reveal(&self.commit, &self.reveal)
    }
}

/// Generate a hex-encoded random server seed.
pub fn generate_server_seed<R: RngCore + CryptoRng>(rng: &mut R) -> String {
    let mut bytes = [0u8; SERVER_SEED_LEN];
    rng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a short random client seed for players that do not bring one.
pub fn generate_client_seed<R: RngCore + CryptoRng>(rng: &mut R) -> String {
    let mut bytes = [0u8; 8];
    rng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Compute a commitment from a server seed: hex `sha256(server_seed)`.
pub fn compute_commit(server_seed: &str) -> String {
    hex::encode(Sha256::digest(server_seed.as_bytes()))
}

/// Returns `true` if `commit == sha256(reveal)`.
///
/// This is the check that lets anyone prove the house didn't swap the seed
/// after seeing bets.
pub fn verify_commit_reveal(commit: &str, reveal: &str) -> bool {
    compute_commit(reveal).eq_ignore_ascii_case(commit)
}

/// Verify a commit-reveal pair supplied by an untrusted caller.
pub fn verify_commit_reveal_checked(commit: &str, reveal: &str) -> Result<(), CommitRevealError> {
    if commit.len() != COMMIT_HEX_LEN {
        return Err(CommitRevealError::InvalidCommitLength(commit.len()));
    }
    if hex::decode(commit).is_err() {
        return Err(CommitRevealError::InvalidCommitEncoding);
    }
    if reveal.is_empty() {
        return Err(CommitRevealError::MissingReveal);
    }
    if verify_commit_reveal(commit, reveal) {
        Ok(())
    } else {
        Err(CommitRevealError::VerificationFailed)
    }
}

/// Errors that can occur during commit-reveal verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitRevealError {
    /// Commit is not 64 hex characters long.
    #[error("invalid commit length: {0} (expected 64)")]
    InvalidCommitLength(usize),
    #[error("commit is not valid hex")]
    InvalidCommitEncoding,
    #[error("reveal is missing")]
    MissingReveal,
    /// Hash of the reveal does not match the commit.
    #[error("commit-reveal verification failed")]
    VerificationFailed,
}

fn hmac_digest(server_seed: &str, message: &str) -> [u8; 32] {
    // HMAC accepts keys of any length; new_from_slice cannot fail.
    let mut mac = match HmacSha256::new_from_slice(server_seed.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac accepts any key length"),
    };
    mac.update(message.as_bytes());
    mac.finalize().into_bytes().into()
}

fn digest_bits(digest: &[u8; 32]) -> u64 {
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head) >> (64 - FLOAT_BITS)
}

fn bits_to_float(bits: u64) -> f64 {
    (bits + 1) as f64 / FLOAT_DENOMINATOR
}

/// Raw 52-bit value for a wager (exposed for test vectors and auditing).
pub fn derive_bits(server_seed: &str, client_seed: &str, nonce: u64) -> u64 {
    let message = format!("{client_seed}:{nonce}");
    digest_bits(&hmac_digest(server_seed, &message))
}

/// Raw 52-bit value for one round of a multi-step wager.
pub fn derive_bits_at_round(server_seed: &str, client_seed: &str, nonce: u64, round: u32) -> u64 {
    let message = format!("{client_seed}:{nonce}:{round}");
    digest_bits(&hmac_digest(server_seed, &message))
}

/// Derive the wager float `r` in (0, 1]. Pure: same inputs, same output.
pub fn derive_float(server_seed: &str, client_seed: &str, nonce: u64) -> f64 {
    bits_to_float(derive_bits(server_seed, client_seed, nonce))
}

/// Derive the float for `round` of a multi-step wager (plinko rows).
pub fn derive_float_at_round(server_seed: &str, client_seed: &str, nonce: u64, round: u32) -> f64 {
    bits_to_float(derive_bits_at_round(server_seed, client_seed, nonce, round))
}

/// Fairness inputs bound to one wager.
#[derive(Clone, Copy, Debug)]
pub struct Fairness<'a> {
    pub server_seed: &'a str,
    pub client_seed: &'a str,
    pub nonce: u64,
}

impl<'a> Fairness<'a> {
    pub fn new(server_seed: &'a str, client_seed: &'a str, nonce: u64) -> Self {
        Self {
            server_seed,
            client_seed,
            nonce,
        }
    }

    pub fn float(&self) -> f64 {
        derive_float(self.server_seed, self.client_seed, self.nonce)
    }

    pub fn float_at(&self, round: u32) -> f64 {
        derive_float_at_round(self.server_seed, self.client_seed, self.nonce, round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    const SERVER: &str = "server-seed";
    const CLIENT: &str = "client-seed";

    #[test]
    fn test_commit_matches_published_vector() {
        assert_eq!(
            compute_commit(SERVER),
            "91024ec49c5bec0b689e42892526320fce08337205c91de94c7a588c20d08eeb"
        );
    }

    #[test]
    fn test_derive_matches_published_vectors() {
        assert_eq!(derive_bits(SERVER, CLIENT, 0), 4_020_183_789_616_317);
        assert_eq!(derive_bits(SERVER, CLIENT, 1), 2_198_387_429_528_013);
        assert_eq!(derive_bits(SERVER, CLIENT, 42), 371_081_568_066_041);

        assert!((derive_float(SERVER, CLIENT, 0) - 0.892_660_121_291_370_5).abs() < 1e-15);
        assert!((derive_float(SERVER, CLIENT, 1) - 0.488_140_068_261_703).abs() < 1e-15);
        assert!((derive_float(SERVER, CLIENT, 42) - 0.082_396_660_176_185_41).abs() < 1e-15);
    }

    #[test]
    fn test_round_vectors() {
        assert_eq!(derive_bits_at_round(SERVER, CLIENT, 7, 0), 313_716_425_850_977);
        assert_eq!(derive_bits_at_round(SERVER, CLIENT, 7, 1), 2_476_347_240_109_679);
        let fairness = Fairness::new(SERVER, CLIENT, 7);
        assert!((fairness.float_at(1) - 0.549_859_544_587_345_5).abs() < 1e-15);
    }

    #[test]
    fn test_derive_deterministic() {
        for nonce in 0..100 {
            assert_eq!(
                derive_float(SERVER, CLIENT, nonce),
                derive_float(SERVER, CLIENT, nonce)
            );
        }
    }

    #[test]
    fn test_float_range_is_half_open_at_zero() {
        assert_eq!(bits_to_float(0), 1.0 / FLOAT_DENOMINATOR);
        assert_eq!(bits_to_float((1u64 << FLOAT_BITS) - 1), 1.0);
        for nonce in 0..1_000 {
            let r = derive_float(SERVER, CLIENT, nonce);
            assert!(r > 0.0 && r <= 1.0, "r out of range: {r}");
        }
    }

    #[test]
    fn test_generated_pair_verifies() {
        let pair = CommitRevealPair::generate(&mut OsRng);
        assert_eq!(pair.reveal.len(), SERVER_SEED_LEN * 2);
        assert_eq!(pair.commit.len(), COMMIT_HEX_LEN);
        assert!(pair.verify());
    }

    #[test]
    fn test_verify_commit_reveal_failure() {
        let pair = CommitRevealPair::generate(&mut OsRng);
        let mut tampered = pair.reveal.clone();
        tampered.replace_range(0..1, if tampered.starts_with('0') { "1" } else { "0" });
        assert!(!verify_commit_reveal(&pair.commit, &tampered));
    }

    #[test]
    fn test_verify_checked_errors() {
        assert_eq!(
            verify_commit_reveal_checked("abcd", SERVER),
            Err(CommitRevealError::InvalidCommitLength(4))
        );
        assert_eq!(
            verify_commit_reveal_checked(&"z".repeat(64), SERVER),
            Err(CommitRevealError::InvalidCommitEncoding)
        );
        let commit = compute_commit(SERVER);
        assert_eq!(
            verify_commit_reveal_checked(&commit, ""),
            Err(CommitRevealError::MissingReveal)
        );
        assert_eq!(
            verify_commit_reveal_checked(&commit, "other"),
            Err(CommitRevealError::VerificationFailed)
        );
        assert_eq!(verify_commit_reveal_checked(&commit.to_uppercase(), SERVER), Ok(()));
    }

    #[test]
    fn test_client_seed_changes_outcome() {
        assert_ne!(
            derive_bits(SERVER, CLIENT, 5),
            derive_bits(SERVER, "another-client", 5)
        );
    }

    #[test]
    fn test_float_distribution_is_uniform() {
        let mut buckets = [0u32; 10];
        let trials = 20_000u64;
        for nonce in 0..trials {
            let r = derive_float(SERVER, CLIENT, nonce);
            let idx = ((r * 10.0).ceil() as usize).clamp(1, 10) - 1;
            buckets[idx] += 1;
        }
        let expected = trials as f64 / 10.0;
        let chi_square: f64 = buckets
            .iter()
            .map(|&count| {
                let diff = count as f64 - expected;
                diff * diff / expected
            })
            .sum();
        // 9 degrees of freedom, p=0.001 critical value is ~27.9
        assert!(chi_square < 27.9, "chi-square = {chi_square}");
    }

    #[test]
    fn test_commit_reveal_error_display() {
        assert_eq!(
            CommitRevealError::InvalidCommitLength(16).to_string(),
            "invalid commit length: 16 (expected 64)"
        );
        assert_eq!(
            CommitRevealError::VerificationFailed.to_string(),
            "commit-reveal verification failed"
        );
        let boxed: Box<dyn std::error::Error> = Box::new(CommitRevealError::MissingReveal);
        assert_eq!(boxed.to_string(), "reveal is missing");
    }
}
