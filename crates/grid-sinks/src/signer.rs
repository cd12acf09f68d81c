use ed25519_dalek::{Signature as DalekSignature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::SinkError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(pub Vec<u8>);

pub trait Signer: Send + Sync + 'static {
    fn sign(&self, bytes: &[u8]) -> Signature;
    fn verify(&self, bytes: &[u8], signature: &Signature) -> Result<(), SinkError>;
}

/// Ed25519 signer backing audit-event and artifact-manifest signatures.
/// Holds its keypair in memory; [`Ed25519Signer::from_seed`] loads one
/// persisted elsewhere (a file, a secrets manager) so the key survives
/// process restarts.
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, bytes: &[u8]) -> Signature {
        Signature(self.signing_key.sign(bytes).to_bytes().to_vec())
    }

    fn verify(&self, bytes: &[u8], signature: &Signature) -> Result<(), SinkError> {
        let raw: [u8; 64] = signature
            .0
            .as_slice()
            .try_into()
            .map_err(|_| SinkError::InvalidSignature)?;
        let sig = DalekSignature::from_bytes(&raw);
        let verifying_key: VerifyingKey = self.signing_key.verifying_key();
        verifying_key
            .verify(bytes, &sig)
            .map_err(|_| SinkError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let signer = Ed25519Signer::generate();
        let sig = signer.sign(b"manifest-bytes");
        assert!(signer.verify(b"manifest-bytes", &sig).is_ok());
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let signer = Ed25519Signer::generate();
        let sig = signer.sign(b"manifest-bytes");
        assert!(signer.verify(b"different-bytes", &sig).is_err());
    }

    #[test]
    fn seeded_signer_is_deterministic() {
        let seed = [7u8; 32];
        let a = Ed25519Signer::from_seed(&seed);
        let b = Ed25519Signer::from_seed(&seed);
        assert_eq!(a.verifying_key_bytes(), b.verifying_key_bytes());
        assert_eq!(a.sign(b"x"), b.sign(b"x"));
    }
}
