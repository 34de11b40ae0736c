//! HMAC-signed provisioning tokens.
//!
//! A token binds an identity (the node name a child hypervisor or guest
//! presents when it pulls its configuration) to an expiry, and is signed
//! with a key the spec/repo server holds. Layout, big-endian throughout:
//!
//! ```text
//! version(u8) | identity_len(u16) | identity | expiry(i64) | nonce(16) | hmac(32)
//! ```
//!
//! The HMAC covers every byte before the signature itself, the same
//! construction used for AWS SigV4 request signing: derive a MAC over a
//! canonical byte string, append it, and let the verifier recompute and
//! compare.

pub mod error;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

pub use error::TokenError;

type HmacSha256 = Hmac<Sha256>;

const VERSION: u8 = 1;
const NONCE_LEN: usize = 16;
const MAC_LEN: usize = 32;

/// An opaque, base64url-encoded provisioning token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token(pub String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A verified token's claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    pub identity: String,
    pub expires_at: DateTime<Utc>,
}

/// Mints and verifies provisioning tokens against a shared HMAC key.
#[derive(Clone)]
pub struct TokenService {
    key: Vec<u8>,
}

impl TokenService {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        TokenService { key: key.into() }
    }

    /// Generates a fresh random 32-byte key, suitable for first-start bootstrap.
    pub fn generate_key() -> Vec<u8> {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    pub fn mint(&self, identity: &str, validity: chrono::Duration) -> Result<Token, TokenError> {
        if self.key.is_empty() {
            return Err(TokenError::NoKey);
        }
        let expiry = (Utc::now() + validity).timestamp();
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut buf = Vec::new();
        buf.push(VERSION);
        let id_bytes = identity.as_bytes();
        buf.extend_from_slice(&(id_bytes.len() as u16).to_be_bytes());
        buf.extend_from_slice(id_bytes);
        buf.extend_from_slice(&expiry.to_be_bytes());
        buf.extend_from_slice(&nonce);

        let mac = hmac_sha256(&self.key, &buf);
        buf.extend_from_slice(&mac);

        Ok(Token(base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            buf,
        )))
    }

    pub fn verify(&self, token: &Token) -> Result<Verified, TokenError> {
        if self.key.is_empty() {
            return Err(TokenError::NoKey);
        }
        let raw = base64::Engine::decode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            token.as_str(),
        )
        .map_err(|_| TokenError::Malformed)?;

        if raw.len() < 1 + 2 + 8 + NONCE_LEN + MAC_LEN {
            return Err(TokenError::Malformed);
        }
        let (signed, mac) = raw.split_at(raw.len() - MAC_LEN);
        let expected = hmac_sha256(&self.key, signed);
        if !constant_time_eq(&expected, mac) {
            return Err(TokenError::BadSignature);
        }

        let mut pos = 0usize;
        let version = signed[pos];
        pos += 1;
        if version != VERSION {
            return Err(TokenError::Malformed);
        }
        let id_len = u16::from_be_bytes(
            signed
                .get(pos..pos + 2)
                .ok_or(TokenError::Malformed)?
                .try_into()
                .map_err(|_| TokenError::Malformed)?,
        ) as usize;
        pos += 2;
        let identity = std::str::from_utf8(signed.get(pos..pos + id_len).ok_or(TokenError::Malformed)?)
            .map_err(|_| TokenError::Malformed)?
            .to_string();
        pos += id_len;
        let expiry = i64::from_be_bytes(
            signed
                .get(pos..pos + 8)
                .ok_or(TokenError::Malformed)?
                .try_into()
                .map_err(|_| TokenError::Malformed)?,
        );

        let expires_at = DateTime::from_timestamp(expiry, 0).ok_or(TokenError::Malformed)?;
        if expires_at < Utc::now() {
            return Err(TokenError::Expired { expired_at: expiry });
        }

        Ok(Verified {
            identity,
            expires_at,
        })
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
