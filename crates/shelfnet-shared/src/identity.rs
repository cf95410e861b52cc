use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::constants::{
    COMPRESSED_PUBKEY_HEX_LEN, HEX_ID_LEN, PUBKEY_SIZE, SECRET_KEY_SIZE, SIGNATURE_SIZE,
};
use crate::error::IdentityError;

/// A node's signing identity: a secp256k1 keypair used for BIP-340
/// Schnorr signatures. The x-only public key is the node's address on the
/// relay network.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        Self { signing_key }
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; SECRET_KEY_SIZE]) -> Result<Self, IdentityError> {
        let signing_key =
            SigningKey::from_bytes(secret).map_err(|_| IdentityError::InvalidKeyBytes)?;
        Ok(Self { signing_key })
    }

    /// Restore identity from a 64-character hex secret
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(secret_hex.trim())?;
        if bytes.len() != SECRET_KEY_SIZE {
            return Err(IdentityError::InvalidKeyBytes);
        }
        let mut secret = [0u8; SECRET_KEY_SIZE];
        secret.copy_from_slice(&bytes);
        Self::from_secret_bytes(&secret)
    }

    /// Raw x-only public key bytes
    pub fn public_key_bytes(&self) -> [u8; PUBKEY_SIZE] {
        let mut out = [0u8; PUBKEY_SIZE];
        out.copy_from_slice(&self.signing_key.verifying_key().to_bytes());
        out
    }

    /// Lowercase hex public key, the form used on the wire and in storage
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Hex-encoded secret key, for persisting a freshly generated identity
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Sign a 32-byte event id
    pub fn sign_id(&self, id: &[u8; 32]) -> Result<[u8; SIGNATURE_SIZE], IdentityError> {
        let mut aux = [0u8; 32];
        OsRng.fill_bytes(&mut aux);
        let signature = self
            .signing_key
            .sign_raw(id, &aux)
            .map_err(|_| IdentityError::SigningFailed)?;
        Ok(signature.to_bytes())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// Verify a Schnorr signature over an event id
pub fn verify_signature(
    pubkey_bytes: &[u8],
    id: &[u8; 32],
    signature_bytes: &[u8],
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(pubkey_bytes).map_err(|_| IdentityError::InvalidKeyBytes)?;
    let signature =
        Signature::try_from(signature_bytes).map_err(|_| IdentityError::InvalidKeyBytes)?;
    verifying_key
        .verify_raw(id, &signature)
        .map_err(|_| IdentityError::InvalidKeyBytes)
}

/// Canonical form of a sender identifier: 64 lowercase hex characters of
/// the x-only key. Accepts the x-only form and the 66-character compressed
/// SEC1 form (`02`/`03` prefix). Returns `None` for anything else.
pub fn normalize_pubkey(raw: &str) -> Option<String> {
    let raw = raw.trim().to_ascii_lowercase();
    if !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    match raw.len() {
        HEX_ID_LEN => Some(raw),
        COMPRESSED_PUBKEY_HEX_LEN if raw.starts_with("02") || raw.starts_with("03") => {
            Some(raw[2..].to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_generation() {
        let id = Identity::generate();
        assert_eq!(id.public_key_hex().len(), 64);
    }

    #[test]
    fn test_identity_roundtrip() {
        let id = Identity::generate();
        let restored = Identity::from_secret_hex(&id.secret_hex()).unwrap();
        assert_eq!(id.public_key_hex(), restored.public_key_hex());
    }

    #[test]
    fn test_sign_verify() {
        let id = Identity::generate();
        let digest = [7u8; 32];
        let signature = id.sign_id(&digest).unwrap();

        assert!(verify_signature(&id.public_key_bytes(), &digest, &signature).is_ok());

        // Wrong digest should fail
        assert!(verify_signature(&id.public_key_bytes(), &[8u8; 32], &signature).is_err());
    }

    #[test]
    fn test_bad_secret_rejected() {
        assert!(Identity::from_secret_hex("abcd").is_err());
        assert!(Identity::from_secret_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_normalize_pubkey_encodings() {
        let x_only = "ab".repeat(32);
        assert_eq!(normalize_pubkey(&x_only), Some(x_only.clone()));
        assert_eq!(normalize_pubkey(&format!("02{x_only}")), Some(x_only.clone()));
        assert_eq!(
            normalize_pubkey(&format!("03{}", x_only.to_uppercase())),
            Some(x_only.clone())
        );
        assert_eq!(normalize_pubkey(&format!("04{x_only}")), None);
        assert_eq!(normalize_pubkey("deadbeef"), None);
    }
}
