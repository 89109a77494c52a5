//! Authentication credentials and signal key collections.
//!
//! These types form the opaque credential blob owned by the credential
//! store. Every byte field serializes as base64 so the blob survives a
//! round-trip through the textual persistence layer byte-exactly; raw
//! binary must never be smuggled through plain JSON strings.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

/// Raw key bytes, base64-armored on the wire and on disk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyMaterial(pub Vec<u8>);

impl KeyMaterial {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for KeyMaterial {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serialize for KeyMaterial {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for KeyMaterial {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let encoded: String = Deserialize::deserialize(deserializer)?;
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

/// An asymmetric key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub public: KeyMaterial,
    pub private: KeyMaterial,
}

/// A signed pre-key as registered with the remote server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPreKey {
    pub key_id: u32,
    pub key_pair: KeyPair,
    pub signature: KeyMaterial,
}

/// The device identity assigned by the remote side after pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Full device jid, e.g. `5511999999999:3@s.whatsapp.net`.
    pub jid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Identity keys and registration metadata for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCredentials {
    pub noise_key: KeyPair,
    pub signed_identity_key: KeyPair,
    pub signed_pre_key: SignedPreKey,
    pub registration_id: u32,
    pub adv_secret_key: KeyMaterial,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<DeviceIdentity>,
    /// Whether the server has acknowledged the account registration.
    #[serde(default)]
    pub registered: bool,
}

/// Kinds of signal keys stored per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyKind {
    PreKey,
    Session,
    SenderKey,
    AppStateSyncKey,
}

impl KeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::PreKey => "pre-key",
            KeyKind::Session => "session",
            KeyKind::SenderKey => "sender-key",
            KeyKind::AppStateSyncKey => "app-state-sync-key",
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-kind keyed maps of signal key material.
pub type KeyCollections = HashMap<KeyKind, HashMap<String, KeyMaterial>>;

/// The full credential blob persisted in `ConnectionRecord.session`.
///
/// `creds` is `None` until the transport generates an identity; key
/// collections may be written before that during pairing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creds: Option<AuthCredentials>,
    #[serde(default)]
    pub keys: KeyCollections,
}

impl AuthState {
    /// True once identity credentials exist.
    pub fn has_credentials(&self) -> bool {
        self.creds.is_some()
    }
}
