//! X3DH key agreement and AES-256-GCM sealing.
//!
//! The gateway performs X3DH twice: inside each session's cryptographic
//! client when sealing relay payloads, and in the offline vault when a
//! recipient has no live transport link. Both sides derive the same shared
//! secret from identity, signed-prekey and one-time-prekey material.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use k256::ecdsa::{RecoveryId, Signature as SecpSignature, VerifyingKey as SecpVerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use sha3::{Digest, Keccak256};
use thiserror::Error;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("signed prekey signature is invalid")]
    InvalidSignedPrekey,
    #[error("unknown one-time prekey id {0}")]
    UnknownOneTimePrekey(u32),
    #[error("AEAD failure")]
    Aead,
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
    #[error("wallet signature invalid: {0}")]
    WalletSignature(String),
}

/// Long-term identity: an X25519 key for DH plus an Ed25519 key that signs
/// the prekeys.
#[derive(Clone)]
pub struct IdentityKeyPair {
    pub dh_private: StaticSecret,
    pub dh_public: [u8; 32],
    pub signing: SigningKey,
}

#[derive(Clone)]
pub struct SignedPreKeyPair {
    pub id: u32,
    pub private: StaticSecret,
    pub public: [u8; 32],
    pub signature: Signature,
}

#[derive(Clone)]
pub struct OneTimePreKeyPair {
    pub id: u32,
    pub private: StaticSecret,
    pub public: [u8; 32],
}

/// Public key bundle as published to the DHT directory.
#[derive(Clone)]
pub struct KeyBundle {
    pub identity_dh: [u8; 32],
    pub identity_signing: [u8; 32],
    pub signed_prekey: [u8; 32],
    pub signed_prekey_signature: [u8; 64],
    pub signed_prekey_id: u32,
    /// `(id, public)` pool; initiators consume entries front to back.
    pub one_time_prekeys: Vec<(u32, [u8; 32])>,
}

/// X3DH initial-message header the initiator transmits so the responder can
/// reconstruct the shared secret.
#[derive(Clone, Debug)]
pub struct InitialMessage {
    pub sender_identity_dh: [u8; 32],
    pub ephemeral_public: [u8; 32],
    pub used_signed_prekey_id: u32,
    /// 0 when the bundle had no one-time prekeys left.
    pub used_one_time_prekey_id: u32,
}

pub fn generate_identity_keypair() -> IdentityKeyPair {
    let dh_private = StaticSecret::random_from_rng(OsRng);
    let dh_public = X25519Public::from(&dh_private).to_bytes();
    let signing = SigningKey::generate(&mut OsRng);
    IdentityKeyPair {
        dh_private,
        dh_public,
        signing,
    }
}

pub fn generate_signed_prekey(identity: &IdentityKeyPair, id: u32) -> SignedPreKeyPair {
    let private = StaticSecret::random_from_rng(OsRng);
    let public = X25519Public::from(&private).to_bytes();
    let signature = identity.signing.sign(&public);
    SignedPreKeyPair {
        id,
        private,
        public,
        signature,
    }
}

pub fn generate_one_time_prekeys(count: usize) -> Vec<OneTimePreKeyPair> {
    (0..count)
        .map(|i| {
            let private = StaticSecret::random_from_rng(OsRng);
            let public = X25519Public::from(&private).to_bytes();
            OneTimePreKeyPair {
                id: i as u32 + 1,
                private,
                public,
            }
        })
        .collect()
}

pub fn make_key_bundle(
    identity: &IdentityKeyPair,
    signed_prekey: &SignedPreKeyPair,
    one_time_prekeys: &[OneTimePreKeyPair],
) -> KeyBundle {
    KeyBundle {
        identity_dh: identity.dh_public,
        identity_signing: VerifyingKey::from(&identity.signing).to_bytes(),
        signed_prekey: signed_prekey.public,
        signed_prekey_signature: signed_prekey.signature.to_bytes(),
        signed_prekey_id: signed_prekey.id,
        one_time_prekeys: one_time_prekeys.iter().map(|k| (k.id, k.public)).collect(),
    }
}

/// Sender-side X3DH. Verifies the bundle's signed prekey, consumes one
/// one-time prekey when available, and returns the shared secret together
/// with the header the recipient needs.
pub fn x3dh_initiator(
    identity: &IdentityKeyPair,
    bundle: &KeyBundle,
) -> Result<([u8; 32], InitialMessage), CryptoError> {
    verify_signed_prekey(bundle)?;

    let ephemeral = StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519Public::from(&ephemeral).to_bytes();

    let opk = bundle.one_time_prekeys.first().copied();

    let dh1 = identity
        .dh_private
        .diffie_hellman(&X25519Public::from(bundle.signed_prekey));
    let dh2 = ephemeral.diffie_hellman(&X25519Public::from(bundle.identity_dh));
    let dh3 = ephemeral.diffie_hellman(&X25519Public::from(bundle.signed_prekey));
    let dh4 = opk.map(|(_, public)| ephemeral.diffie_hellman(&X25519Public::from(public)));

    let secret = kdf_x3dh(&[
        dh1.as_bytes().as_slice(),
        dh2.as_bytes().as_slice(),
        dh3.as_bytes().as_slice(),
        dh4.as_ref().map(|d| d.as_bytes().as_slice()).unwrap_or(&[]),
    ]);

    let initial = InitialMessage {
        sender_identity_dh: identity.dh_public,
        ephemeral_public,
        used_signed_prekey_id: bundle.signed_prekey_id,
        used_one_time_prekey_id: opk.map(|(id, _)| id).unwrap_or(0),
    };

    Ok((secret, initial))
}

/// Recipient-side X3DH: reconstructs the shared secret from the initiator's
/// header and the local private prekey material.
pub fn x3dh_responder(
    identity: &IdentityKeyPair,
    signed_prekey: &SignedPreKeyPair,
    one_time_prekeys: &std::collections::HashMap<u32, OneTimePreKeyPair>,
    initial: &InitialMessage,
) -> Result<[u8; 32], CryptoError> {
    let opk = match initial.used_one_time_prekey_id {
        0 => None,
        id => Some(
            one_time_prekeys
                .get(&id)
                .ok_or(CryptoError::UnknownOneTimePrekey(id))?,
        ),
    };

    let dh1 = signed_prekey
        .private
        .diffie_hellman(&X25519Public::from(initial.sender_identity_dh));
    let dh2 = identity
        .dh_private
        .diffie_hellman(&X25519Public::from(initial.ephemeral_public));
    let dh3 = signed_prekey
        .private
        .diffie_hellman(&X25519Public::from(initial.ephemeral_public));
    let dh4 = opk.map(|k| {
        k.private
            .diffie_hellman(&X25519Public::from(initial.ephemeral_public))
    });

    Ok(kdf_x3dh(&[
        dh1.as_bytes().as_slice(),
        dh2.as_bytes().as_slice(),
        dh3.as_bytes().as_slice(),
        dh4.as_ref().map(|d| d.as_bytes().as_slice()).unwrap_or(&[]),
    ]))
}

fn verify_signed_prekey(bundle: &KeyBundle) -> Result<(), CryptoError> {
    let verifying = VerifyingKey::from_bytes(&bundle.identity_signing)
        .map_err(|_| CryptoError::InvalidSignedPrekey)?;
    let signature = Signature::from_bytes(&bundle.signed_prekey_signature);
    verifying
        .verify(&bundle.signed_prekey, &signature)
        .map_err(|_| CryptoError::InvalidSignedPrekey)
}

fn kdf_x3dh(inputs: &[&[u8]]) -> [u8; 32] {
    let mut ikm = Vec::new();
    for input in inputs {
        ikm.extend_from_slice(input);
    }
    let hkdf = Hkdf::<Sha256>::new(None, &ikm);
    let mut okm = [0u8; 32];
    // Expand cannot fail for a 32-byte output.
    let _ = hkdf.expand(b"meshtalk-x3dh", &mut okm);
    okm
}

// ============================================================================
// AES-256-GCM
// ============================================================================

/// Encrypts with AES-256-GCM under a fresh random 96-bit nonce.
pub fn aes_gcm_seal(key: &[u8; 32], plaintext: &[u8]) -> Result<(Vec<u8>, [u8; 12]), CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Aead)?;
    Ok((ciphertext, nonce))
}

pub fn aes_gcm_open(
    key: &[u8; 32],
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != 12 {
        return Err(CryptoError::InvalidKeyMaterial(format!(
            "nonce must be 12 bytes, got {}",
            nonce.len()
        )));
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Aead)
}

// ============================================================================
// Wallet ownership proof (EIP-191 personal_sign recovery)
// ============================================================================

fn personal_sign_hash(message: &str) -> [u8; 32] {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// Recovers the signing wallet from a 65-byte personal-sign signature and
/// checks it against the claimed address.
pub fn verify_wallet_signature(
    message: &str,
    signature_hex: &str,
    wallet_address: &str,
) -> Result<(), CryptoError> {
    let sig_hex = signature_hex.trim_start_matches("0x");
    let raw = hex::decode(sig_hex)
        .map_err(|_| CryptoError::WalletSignature("signature is not hex".to_string()))?;
    if raw.len() != 65 {
        return Err(CryptoError::WalletSignature(format!(
            "signature must be 65 bytes, got {}",
            raw.len()
        )));
    }

    let v = match raw[64] {
        27 | 28 => raw[64] - 27,
        0 | 1 => raw[64],
        other => {
            return Err(CryptoError::WalletSignature(format!(
                "invalid recovery id {other}"
            )))
        }
    };

    let recovery_id = RecoveryId::try_from(v)
        .map_err(|_| CryptoError::WalletSignature("invalid recovery id".to_string()))?;
    let signature = SecpSignature::try_from(&raw[..64])
        .map_err(|_| CryptoError::WalletSignature("malformed signature".to_string()))?;
    let digest = personal_sign_hash(message);

    let verifying = SecpVerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|_| CryptoError::WalletSignature("public key recovery failed".to_string()))?;

    let encoded = verifying.to_encoded_point(false);
    let mut hasher = Keccak256::new();
    hasher.update(&encoded.as_bytes()[1..]);
    let hash = hasher.finalize();
    let recovered = hex::encode(&hash[12..]);

    let claimed = crate::address::normalize(wallet_address);
    if recovered != claimed {
        return Err(CryptoError::WalletSignature(format!(
            "recovered address {recovered} does not match claimed address {claimed}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn responder_setup() -> (
        IdentityKeyPair,
        SignedPreKeyPair,
        Vec<OneTimePreKeyPair>,
        KeyBundle,
    ) {
        let identity = generate_identity_keypair();
        let spk = generate_signed_prekey(&identity, 1);
        let opks = generate_one_time_prekeys(4);
        let bundle = make_key_bundle(&identity, &spk, &opks);
        (identity, spk, opks, bundle)
    }

    #[test]
    fn initiator_and_responder_agree() {
        let alice = generate_identity_keypair();
        let (bob, bob_spk, bob_opks, bob_bundle) = responder_setup();

        let (alice_secret, initial) = x3dh_initiator(&alice, &bob_bundle).unwrap();
        assert_eq!(initial.used_one_time_prekey_id, 1);

        let opk_map: HashMap<u32, OneTimePreKeyPair> =
            bob_opks.into_iter().map(|k| (k.id, k)).collect();
        let bob_secret = x3dh_responder(&bob, &bob_spk, &opk_map, &initial).unwrap();

        assert_eq!(alice_secret, bob_secret);
    }

    #[test]
    fn agreement_without_one_time_prekeys() {
        let alice = generate_identity_keypair();
        let bob = generate_identity_keypair();
        let bob_spk = generate_signed_prekey(&bob, 1);
        let bundle = make_key_bundle(&bob, &bob_spk, &[]);

        let (alice_secret, initial) = x3dh_initiator(&alice, &bundle).unwrap();
        assert_eq!(initial.used_one_time_prekey_id, 0);

        let bob_secret = x3dh_responder(&bob, &bob_spk, &HashMap::new(), &initial).unwrap();
        assert_eq!(alice_secret, bob_secret);
    }

    #[test]
    fn tampered_signed_prekey_is_rejected() {
        let alice = generate_identity_keypair();
        let (_, _, _, mut bundle) = responder_setup();
        bundle.signed_prekey[0] ^= 0xff;

        assert!(matches!(
            x3dh_initiator(&alice, &bundle),
            Err(CryptoError::InvalidSignedPrekey)
        ));
    }

    #[test]
    fn aes_gcm_round_trip() {
        let key = [7u8; 32];
        let (ciphertext, nonce) = aes_gcm_seal(&key, b"attack at dawn").unwrap();
        let plaintext = aes_gcm_open(&key, &nonce, &ciphertext).unwrap();
        assert_eq!(plaintext, b"attack at dawn");
    }

    #[test]
    fn aes_gcm_rejects_wrong_key() {
        let (ciphertext, nonce) = aes_gcm_seal(&[7u8; 32], b"secret").unwrap();
        assert!(aes_gcm_open(&[8u8; 32], &nonce, &ciphertext).is_err());
    }

    #[test]
    fn wallet_signature_rejects_garbage() {
        let err = verify_wallet_signature("hello", "0x1234", &"aa".repeat(20));
        assert!(err.is_err());
    }
}
