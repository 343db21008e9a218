//! # ECDSA Signatures (secp256k1)
//!
//! Recoverable ECDSA over secp256k1, the signature scheme of the ForceMove
//! adjudicator.
//!
//! ## Properties
//!
//! - RFC 6979 deterministic nonces (no RNG dependency for signing)
//! - 65-byte wire form: `r || s || recovery_id`
//! - Signer identified by Ethereum-style address (Keccak-256 of the
//!   uncompressed public key, last 20 bytes)

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use zeroize::Zeroize;

use crate::keccak::keccak256;
use crate::CryptoError;

/// A 20-byte Ethereum-style address.
pub type Address = [u8; 20];

/// A 65-byte recoverable signature: `r || s || recovery_id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoverableSignature(pub [u8; 65]);

impl RecoverableSignature {
    pub fn from_bytes(bytes: [u8; 65]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    fn split(&self) -> Result<(Signature, RecoveryId), CryptoError> {
        let signature =
            Signature::from_slice(&self.0[..64]).map_err(|_| CryptoError::InvalidSignature)?;
        let recovery_id =
            RecoveryId::from_byte(self.0[64]).ok_or(CryptoError::InvalidSignature)?;
        Ok((signature, recovery_id))
    }
}

/// A secp256k1 public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Ethereum-style address of this key.
    pub fn address(&self) -> Address {
        let point = self.0.to_encoded_point(false);
        // Skip the 0x04 uncompressed-point tag.
        let digest = keccak256(&point.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&digest[12..]);
        address
    }
}

/// A secp256k1 signing key.
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    /// Generate a fresh random key.
    pub fn random<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> Self {
        Self(SigningKey::random(rng))
    }

    /// Create from raw scalar bytes. The input copy is wiped after use.
    pub fn from_bytes(mut bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let key = SigningKey::from_slice(&bytes).map_err(|_| CryptoError::InvalidPrivateKey);
        bytes.zeroize();
        key.map(Self)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(*self.0.verifying_key())
    }

    /// Ethereum-style address of the corresponding public key.
    pub fn address(&self) -> Address {
        self.public_key().address()
    }

    /// Sign the Keccak-256 digest of `message`.
    pub fn sign(&self, message: &[u8]) -> Result<RecoverableSignature, CryptoError> {
        let digest = keccak256(message);
        let (signature, recovery_id) = self
            .0
            .sign_prehash_recoverable(&digest)
            .map_err(|_| CryptoError::SigningFailed)?;

        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = recovery_id.to_byte();
        Ok(RecoverableSignature(bytes))
    }
}

/// Recover the address that signed `message`.
pub fn recover_signer(
    message: &[u8],
    signature: &RecoverableSignature,
) -> Result<Address, CryptoError> {
    let digest = keccak256(message);
    let (sig, recovery_id) = signature.split()?;
    let verifying_key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    Ok(PublicKey(verifying_key).address())
}
