//! # shared-crypto
//!
//! Cryptographic primitives for the ForceMove engine.
//!
//! - **Keccak-256** hashing (channel ids, signer addresses)
//! - **secp256k1** recoverable ECDSA (commitment signatures)
//!
//! Both match the on-chain adjudicator: a commitment signature produced
//! here recovers to the same Ethereum-style address the contract would
//! compute.

pub mod ecdsa;
pub mod keccak;

pub use ecdsa::{recover_signer, PrivateKey, PublicKey, RecoverableSignature};
pub use keccak::{keccak256, Keccak256Hasher};

/// Errors from hashing and signature operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid signature encoding")]
    InvalidSignature,

    #[error("Signing failed")]
    SigningFailed,

    #[error("Signature recovery failed")]
    RecoveryFailed,
}
