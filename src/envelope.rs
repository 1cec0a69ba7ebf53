// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Secure Envelope Codec
//!
//! Hybrid encryption for `SECURE_TEXT` bodies:
//!
//! 1. a fresh 256-bit content key and 96-bit nonce per send;
//! 2. AES-256-GCM over the plaintext, AAD = sender identity bytes;
//! 3. the content key wrapped with RSA-OAEP (SHA-256) for the recipient;
//! 4. an RSASSA-PKCS1-v1_5 (SHA-256) signature by the sender over
//!    `iv || ciphertext || wrappedKey || aad`.
//!
//! The relay never sees any of this; it forwards the JSON envelope as an
//! opaque message body.

use rand::rngs::OsRng;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::error::{ChatError, ChatResult};
use crate::key_store::{ContentKey, KeyStore, CONTENT_KEY_LEN};

/// Encrypted message as carried in a `SECURE_TEXT` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub wrapped_key: Vec<u8>,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
    pub sender_identity: String,
}

impl Envelope {
    pub fn to_json(&self) -> ChatResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> ChatResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Result of opening an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    pub plaintext: Vec<u8>,
    /// Whether the sender signature checked out.
    pub verified: bool,
}

/// Result of a group send: one envelope per reachable recipient.
#[derive(Debug)]
pub struct GroupSeal {
    pub envelopes: Vec<(String, Envelope)>,
    pub skipped: Vec<(String, ChatError)>,
}

/// Byte layout covered by the sender signature.
pub fn signed_bytes(iv: &[u8], ciphertext: &[u8], wrapped_key: &[u8], aad: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(iv.len() + ciphertext.len() + wrapped_key.len() + aad.len());
    data.extend_from_slice(iv);
    data.extend_from_slice(ciphertext);
    data.extend_from_slice(wrapped_key);
    data.extend_from_slice(aad);
    data
}

/// Content sealed once and shared by every envelope of one send.
struct SealedContent {
    key: ContentKey,
    iv: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

/// Builds and opens envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec {
    strict: bool,
}

impl EnvelopeCodec {
    /// Codec that reports a bad signature as `verified = false`.
    pub fn new() -> Self {
        EnvelopeCodec { strict: false }
    }

    /// Codec that refuses to decrypt when the signature does not verify.
    pub fn strict() -> Self {
        EnvelopeCodec { strict: true }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Encrypts `plaintext` from `sender_identity` for one recipient.
    pub fn encrypt_for_recipient(
        &self,
        plaintext: &[u8],
        sender_identity: &str,
        recipient_public: &RsaPublicKey,
        sender_private: &RsaPrivateKey,
    ) -> ChatResult<Envelope> {
        self.encrypt_with_key(
            ContentKey::generate()?,
            plaintext,
            sender_identity,
            recipient_public,
            sender_private,
        )
    }

    /// Like [`encrypt_for_recipient`](Self::encrypt_for_recipient), with a
    /// content key supplied by the caller, usually from
    /// [`KeyStore::generate_content_key`]. The key is consumed.
    pub fn encrypt_with_key(
        &self,
        content_key: ContentKey,
        plaintext: &[u8],
        sender_identity: &str,
        recipient_public: &RsaPublicKey,
        sender_private: &RsaPrivateKey,
    ) -> ChatResult<Envelope> {
        let sealed = seal_content(content_key, plaintext, sender_identity)?;
        wrap_for(&sealed, sender_identity, recipient_public, sender_private)
    }

    /// Encrypts once and wraps the content key for every recipient.
    ///
    /// A recipient without a public key, or whose wrap fails, is skipped
    /// and reported. The others still get their envelope.
    pub fn encrypt_for_group<I, S>(
        &self,
        plaintext: &[u8],
        sender_identity: &str,
        recipients: I,
        sender_private: &RsaPrivateKey,
        key_store: &dyn KeyStore,
    ) -> ChatResult<GroupSeal>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sealed = seal_content(key_store.generate_content_key()?, plaintext, sender_identity)?;
        let mut envelopes = Vec::new();
        let mut skipped = Vec::new();

        for recipient in recipients {
            let recipient = recipient.as_ref();
            let result = key_store
                .public_key(recipient)
                .and_then(|public| wrap_for(&sealed, sender_identity, &public, sender_private));
            match result {
                Ok(envelope) => envelopes.push((recipient.to_string(), envelope)),
                Err(e) => {
                    warn!("Skipping group recipient {}: {}", recipient, e);
                    skipped.push((recipient.to_string(), e));
                }
            }
        }

        debug!(
            "Group seal: {} envelopes, {} skipped",
            envelopes.len(),
            skipped.len()
        );
        Ok(GroupSeal { envelopes, skipped })
    }

    /// Verifies the signature, unwraps the content key and decrypts.
    pub fn decrypt_and_verify(
        &self,
        envelope: &Envelope,
        recipient_private: &RsaPrivateKey,
        sender_public: &RsaPublicKey,
    ) -> ChatResult<Opened> {
        let aad = envelope.sender_identity.as_bytes();
        let verified = verify_signature(envelope, sender_public);
        if !verified {
            if self.strict {
                return Err(ChatError::SignatureMismatch);
            }
            debug!(
                "Signature from {} did not verify",
                envelope.sender_identity
            );
        }

        if envelope.iv.len() != NONCE_LEN {
            return Err(ChatError::DecryptionFailure(format!(
                "iv must be {} bytes, got {}",
                NONCE_LEN,
                envelope.iv.len()
            )));
        }

        let key_bytes = recipient_private
            .decrypt(Oaep::new::<Sha256>(), &envelope.wrapped_key)
            .map_err(|_| ChatError::DecryptionFailure("key unwrap failed".to_string()))?;
        let content_key = ContentKey::from_slice(&key_bytes).ok_or_else(|| {
            ChatError::DecryptionFailure(format!(
                "content key must be {} bytes, got {}",
                CONTENT_KEY_LEN,
                key_bytes.len()
            ))
        })?;

        let key = aead_key(&content_key).map_err(ChatError::DecryptionFailure)?;
        let nonce = Nonce::try_assume_unique_for_key(&envelope.iv)
            .map_err(|_| ChatError::DecryptionFailure("invalid nonce".to_string()))?;

        let mut in_out = envelope.ciphertext.clone();
        let plaintext_len = key
            .open_in_place(nonce, Aad::from(aad), &mut in_out)
            .map_err(|_| ChatError::DecryptionFailure("authentication tag mismatch".to_string()))?
            .len();
        in_out.truncate(plaintext_len);

        Ok(Opened {
            plaintext: in_out,
            verified,
        })
    }
}

fn aead_key(content_key: &ContentKey) -> Result<LessSafeKey, String> {
    let unbound = UnboundKey::new(&AES_256_GCM, content_key.as_bytes())
        .map_err(|_| "invalid content key".to_string())?;
    Ok(LessSafeKey::new(unbound))
}

fn seal_content(
    key: ContentKey,
    plaintext: &[u8],
    sender_identity: &str,
) -> ChatResult<SealedContent> {
    let mut iv = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut iv)
        .map_err(|_| ChatError::Encryption("random number generation failed".to_string()))?;

    let aead = aead_key(&key).map_err(ChatError::Encryption)?;
    let mut ciphertext = plaintext.to_vec();
    aead.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(iv),
        Aad::from(sender_identity.as_bytes()),
        &mut ciphertext,
    )
    .map_err(|_| ChatError::Encryption("AEAD seal failed".to_string()))?;

    Ok(SealedContent {
        key,
        iv,
        ciphertext,
    })
}

fn wrap_for(
    sealed: &SealedContent,
    sender_identity: &str,
    recipient_public: &RsaPublicKey,
    sender_private: &RsaPrivateKey,
) -> ChatResult<Envelope> {
    let wrapped_key = recipient_public
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), sealed.key.as_bytes())
        .map_err(|e| ChatError::Encryption(format!("key wrap failed: {}", e)))?;

    let data = signed_bytes(
        &sealed.iv,
        &sealed.ciphertext,
        &wrapped_key,
        sender_identity.as_bytes(),
    );
    let signature = SigningKey::<Sha256>::new(sender_private.clone())
        .try_sign(&data)
        .map_err(|e| ChatError::Encryption(format!("signing failed: {}", e)))?;

    Ok(Envelope {
        iv: sealed.iv.to_vec(),
        ciphertext: sealed.ciphertext.clone(),
        wrapped_key,
        signature: signature.to_vec(),
        sender_identity: sender_identity.to_string(),
    })
}

fn verify_signature(envelope: &Envelope, sender_public: &RsaPublicKey) -> bool {
    let signature = match Signature::try_from(envelope.signature.as_slice()) {
        Ok(signature) => signature,
        Err(_) => return false,
    };
    let data = signed_bytes(
        &envelope.iv,
        &envelope.ciphertext,
        &envelope.wrapped_key,
        envelope.sender_identity.as_bytes(),
    );
    VerifyingKey::<Sha256>::new(sender_public.clone())
        .verify(&data, &signature)
        .is_ok()
}
