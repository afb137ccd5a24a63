//! Deterministic escrow custodian derivation
//!
//! Every listed asset is held by a custodial keypair derived from the
//! marketplace authority and the asset mint. The mapping is a pure function:
//! the same (authority, mint) pair always yields the same keypair, so no
//! custodian key is ever stored — it is recomputed on demand.

use sha2::{Digest, Sha256};
use solana_sdk::{
    pubkey::{Pubkey, PUBKEY_BYTES},
    signer::keypair::{keypair_from_seed, Keypair},
    signer::Signer,
};
use thiserror::Error;

/// Ed25519 seed length required by the chain's keypair derivation.
pub const SEED_LEN: usize = 32;

#[derive(Debug, Clone, Error)]
pub enum EscrowError {
    /// Malformed identifier input - a caller bug, never retried
    #[error("Invalid identifier: expected {expected} bytes, got {actual}")]
    InvalidIdentifier { expected: usize, actual: usize },
}

/// Derive the escrow custodian keypair for an asset.
///
/// Seed material is `authority || mint`. The concatenation of two pubkeys is
/// 64 bytes, above the 32-byte seed bound, so it is hashed down with SHA-256
/// before keypair expansion.
pub fn derive_escrow(authority: &Pubkey, mint: &Pubkey) -> Keypair {
    let seed = seed_material(authority.as_ref(), mint.as_ref());
    // keypair_from_seed only fails on a wrong-length seed; seed_material
    // always produces exactly SEED_LEN bytes.
    keypair_from_seed(&seed).expect("seed is exactly 32 bytes")
}

/// Derive from raw identifier bytes, validating their length.
///
/// Used at the boundary where identifiers arrive as untrusted bytes rather
/// than SDK types.
pub fn derive_escrow_from_bytes(authority: &[u8], mint: &[u8]) -> Result<Keypair, EscrowError> {
    for id in [authority, mint] {
        if id.len() != PUBKEY_BYTES {
            return Err(EscrowError::InvalidIdentifier {
                expected: PUBKEY_BYTES,
                actual: id.len(),
            });
        }
    }
    let seed = seed_material(authority, mint);
    keypair_from_seed(&seed).map_err(|_| EscrowError::InvalidIdentifier {
        expected: SEED_LEN,
        actual: seed.len(),
    })
}

/// Associated token account that holds the asset while it is listed.
///
/// The escrow occupancy invariant lives here: this account holds exactly 1
/// unit of the mint if and only if the asset is actively listed.
pub fn escrow_token_account(authority: &Pubkey, mint: &Pubkey) -> Pubkey {
    let custodian = derive_escrow(authority, mint);
    spl_associated_token_account::get_associated_token_address(&custodian.pubkey(), mint)
}

fn seed_material(authority: &[u8], mint: &[u8]) -> [u8; SEED_LEN] {
    let mut seed = [0u8; SEED_LEN];
    let total = authority.len() + mint.len();
    if total <= SEED_LEN {
        seed[..authority.len()].copy_from_slice(authority);
        seed[authority.len()..total].copy_from_slice(mint);
    } else {
        let mut hasher = Sha256::new();
        hasher.update(authority);
        hasher.update(mint);
        seed.copy_from_slice(&hasher.finalize());
    }
    seed
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let authority = Pubkey::new_unique();
        let mint = Pubkey::new_unique();

        let a = derive_escrow(&authority, &mint);
        let b = derive_escrow(&authority, &mint);

        assert_eq!(a.pubkey(), b.pubkey());
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn test_distinct_mints_get_distinct_custodians() {
        let authority = Pubkey::new_unique();
        let mint_a = Pubkey::new_unique();
        let mint_b = Pubkey::new_unique();

        let a = derive_escrow(&authority, &mint_a);
        let b = derive_escrow(&authority, &mint_b);

        assert_ne!(a.pubkey(), b.pubkey());
    }

    #[test]
    fn test_distinct_authorities_get_distinct_custodians() {
        let mint = Pubkey::new_unique();

        let a = derive_escrow(&Pubkey::new_unique(), &mint);
        let b = derive_escrow(&Pubkey::new_unique(), &mint);

        assert_ne!(a.pubkey(), b.pubkey());
    }

    #[test]
    fn test_bytes_entry_point_matches_typed_entry_point() {
        let authority = Pubkey::new_unique();
        let mint = Pubkey::new_unique();

        let typed = derive_escrow(&authority, &mint);
        let raw = derive_escrow_from_bytes(authority.as_ref(), mint.as_ref())
            .expect("valid 32-byte identifiers");

        assert_eq!(typed.to_bytes(), raw.to_bytes());
    }

    #[test]
    fn test_wrong_length_identifier_rejected() {
        let mint = Pubkey::new_unique();

        let short = derive_escrow_from_bytes(&[1u8; 31], mint.as_ref());
        assert!(matches!(
            short,
            Err(EscrowError::InvalidIdentifier { expected: 32, actual: 31 })
        ));

        let long = derive_escrow_from_bytes(mint.as_ref(), &[2u8; 33]);
        assert!(matches!(
            long,
            Err(EscrowError::InvalidIdentifier { expected: 32, actual: 33 })
        ));

        let empty = derive_escrow_from_bytes(&[], mint.as_ref());
        assert!(matches!(
            empty,
            Err(EscrowError::InvalidIdentifier { actual: 0, .. })
        ));
    }

    #[test]
    fn test_escrow_token_account_is_stable() {
        let authority = Pubkey::new_unique();
        let mint = Pubkey::new_unique();

        assert_eq!(
            escrow_token_account(&authority, &mint),
            escrow_token_account(&authority, &mint)
        );
    }

    proptest! {
        // Same seed material across independent derivations must produce
        // byte-identical secret material, regardless of input bytes.
        #[test]
        fn prop_derivation_referentially_transparent(
            authority in proptest::array::uniform32(any::<u8>()),
            mint in proptest::array::uniform32(any::<u8>()),
        ) {
            let a = derive_escrow_from_bytes(&authority, &mint).unwrap();
            let b = derive_escrow_from_bytes(&authority, &mint).unwrap();
            prop_assert_eq!(a.to_bytes(), b.to_bytes());
        }
    }
}
