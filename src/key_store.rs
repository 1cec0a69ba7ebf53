// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Key Store
//!
//! Supplies the long-lived RSA keypair of each identity and the one-time
//! AES content keys used per send.
//!
//! Two backends: in-memory (for testing and embedding) and a directory
//! layout `{root}/{identity}/private.pem` + `public.pem`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use rand::rngs::OsRng;
use ring::rand::{SecureRandom, SystemRandom};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ChatError, ChatResult};
use crate::message::validate_identity;

/// Content key length in bytes (AES-256).
pub const CONTENT_KEY_LEN: usize = 32;

/// Default RSA modulus size for generated keypairs.
pub const DEFAULT_MODULUS_BITS: usize = 2048;

const PRIVATE_KEY_FILE: &str = "private.pem";
const PUBLIC_KEY_FILE: &str = "public.pem";

/// An identity's RSA keypair, used both for key wrap and for signing.
#[derive(Clone)]
pub struct Keypair {
    pub public: RsaPublicKey,
    pub private: RsaPrivateKey,
}

impl Keypair {
    /// Generates a fresh keypair with the given modulus size.
    pub fn generate(modulus_bits: usize) -> ChatResult<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, modulus_bits)
            .map_err(|e| ChatError::KeyStore(format!("key generation failed: {}", e)))?;
        let public = RsaPublicKey::from(&private);
        Ok(Keypair { public, private })
    }
}

/// One-time symmetric content key. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey([u8; CONTENT_KEY_LEN]);

impl ContentKey {
    /// Generates a fresh random content key.
    pub fn generate() -> ChatResult<Self> {
        let mut bytes = [0u8; CONTENT_KEY_LEN];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| ChatError::Encryption("random number generation failed".to_string()))?;
        Ok(ContentKey(bytes))
    }

    /// Wraps raw key bytes, e.g. after unwrapping them from an envelope.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let key: [u8; CONTENT_KEY_LEN] = bytes.try_into().ok()?;
        Some(ContentKey(key))
    }

    pub fn as_bytes(&self) -> &[u8; CONTENT_KEY_LEN] {
        &self.0
    }
}

/// Source of key material for the envelope codec.
pub trait KeyStore: Send + Sync {
    /// Loads the full keypair of an identity (needs the private key).
    fn load_keypair(&self, identity: &str) -> ChatResult<Keypair>;

    /// Loads only the public key of an identity.
    fn public_key(&self, identity: &str) -> ChatResult<RsaPublicKey>;

    /// Generates a keypair for `identity`, stores it, and returns it.
    fn generate_and_persist_keypair(&self, identity: &str) -> ChatResult<Keypair>;

    /// Returns every identity with at least a public key, sorted.
    fn identities(&self) -> Vec<String>;

    /// Returns a fresh content key for one send.
    fn generate_content_key(&self) -> ChatResult<ContentKey> {
        ContentKey::generate()
    }
}

// ============================================================================
// In-Memory Key Store
// ============================================================================

#[derive(Clone)]
struct MemoryEntry {
    public: RsaPublicKey,
    private: Option<RsaPrivateKey>,
}

/// In-memory key store.
pub struct MemoryKeyStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    modulus_bits: usize,
}

impl MemoryKeyStore {
    /// Creates an empty store generating 2048-bit keys.
    pub fn new() -> Self {
        Self::with_modulus_bits(DEFAULT_MODULUS_BITS)
    }

    /// Creates an empty store generating keys of the given size.
    pub fn with_modulus_bits(modulus_bits: usize) -> Self {
        MemoryKeyStore {
            entries: RwLock::new(HashMap::new()),
            modulus_bits,
        }
    }

    /// Stores an existing keypair.
    pub fn insert_keypair(&self, identity: &str, keypair: Keypair) {
        self.entries.write().unwrap().insert(
            identity.to_string(),
            MemoryEntry {
                public: keypair.public,
                private: Some(keypair.private),
            },
        );
    }

    /// Stores a peer's public key only.
    pub fn import_public_key(&self, identity: &str, public: RsaPublicKey) {
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(identity) {
            Some(entry) => entry.public = public,
            None => {
                entries.insert(
                    identity.to_string(),
                    MemoryEntry {
                        public,
                        private: None,
                    },
                );
            }
        }
    }
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load_keypair(&self, identity: &str) -> ChatResult<Keypair> {
        let entries = self.entries.read().unwrap();
        match entries.get(identity) {
            Some(MemoryEntry {
                public,
                private: Some(private),
            }) => Ok(Keypair {
                public: public.clone(),
                private: private.clone(),
            }),
            _ => Err(ChatError::KeyNotFound(identity.to_string())),
        }
    }

    fn public_key(&self, identity: &str) -> ChatResult<RsaPublicKey> {
        self.entries
            .read()
            .unwrap()
            .get(identity)
            .map(|e| e.public.clone())
            .ok_or_else(|| ChatError::KeyNotFound(identity.to_string()))
    }

    fn generate_and_persist_keypair(&self, identity: &str) -> ChatResult<Keypair> {
        let keypair = Keypair::generate(self.modulus_bits)?;
        self.insert_keypair(identity, keypair.clone());
        Ok(keypair)
    }

    fn identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

// ============================================================================
// Directory Key Store
// ============================================================================

/// Key store backed by one directory per identity holding PEM files.
pub struct FileKeyStore {
    root: PathBuf,
    modulus_bits: usize,
}

impl FileKeyStore {
    /// Opens (and creates if needed) a key directory.
    pub fn open(root: impl AsRef<Path>) -> ChatResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(FileKeyStore {
            root,
            modulus_bits: DEFAULT_MODULUS_BITS,
        })
    }

    /// Sets the modulus size for generated keypairs.
    pub fn with_modulus_bits(mut self, modulus_bits: usize) -> Self {
        self.modulus_bits = modulus_bits;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn identity_dir(&self, identity: &str) -> ChatResult<PathBuf> {
        validate_identity(identity)
            .map_err(|_| ChatError::KeyStore(format!("invalid identity {:?}", identity)))?;
        Ok(self.root.join(identity))
    }

    fn read_pem(path: &Path, identity: &str) -> ChatResult<String> {
        match std::fs::read_to_string(path) {
            Ok(pem) => Ok(pem),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ChatError::KeyNotFound(identity.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the public key of a peer without a private key.
    pub fn import_public_key(&self, identity: &str, public: &RsaPublicKey) -> ChatResult<()> {
        let dir = self.identity_dir(identity)?;
        std::fs::create_dir_all(&dir)?;
        let pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| ChatError::KeyStore(e.to_string()))?;
        std::fs::write(dir.join(PUBLIC_KEY_FILE), pem)?;
        Ok(())
    }
}

impl KeyStore for FileKeyStore {
    fn load_keypair(&self, identity: &str) -> ChatResult<Keypair> {
        let dir = self.identity_dir(identity)?;
        let private_pem = Self::read_pem(&dir.join(PRIVATE_KEY_FILE), identity)?;
        let private = RsaPrivateKey::from_pkcs8_pem(&private_pem)
            .map_err(|e| ChatError::KeyStore(format!("invalid private key: {}", e)))?;
        let public = RsaPublicKey::from(&private);
        Ok(Keypair { public, private })
    }

    fn public_key(&self, identity: &str) -> ChatResult<RsaPublicKey> {
        let dir = self.identity_dir(identity)?;
        let pem = Self::read_pem(&dir.join(PUBLIC_KEY_FILE), identity)?;
        RsaPublicKey::from_public_key_pem(&pem)
            .map_err(|e| ChatError::KeyStore(format!("invalid public key: {}", e)))
    }

    fn generate_and_persist_keypair(&self, identity: &str) -> ChatResult<Keypair> {
        let dir = self.identity_dir(identity)?;
        std::fs::create_dir_all(&dir)?;

        let keypair = Keypair::generate(self.modulus_bits)?;
        let private_pem = keypair
            .private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| ChatError::KeyStore(e.to_string()))?;
        let private_path = dir.join(PRIVATE_KEY_FILE);
        std::fs::write(&private_path, private_pem.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&private_path, std::fs::Permissions::from_mode(0o600))?;
        }

        self.import_public_key(identity, &keypair.public)?;
        info!("Generated {}-bit keypair", self.modulus_bits);
        Ok(keypair)
    }

    fn identities(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list key directory: {}", e);
                return Vec::new();
            }
        };
        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().join(PUBLIC_KEY_FILE).is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        ids.sort();
        ids
    }
}
