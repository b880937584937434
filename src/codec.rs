//! Payload codec for the `/updates` endpoint.
//!
//! Sending side: JSON → gzip → HMAC-SHA256 over the compressed bytes →
//! optional chunked RSA-OAEP encryption. The receiving side undoes the same
//! steps in reverse and checks the signature after decryption.
//!
//! # Example
//!
//! ```rust,no_run
//! use pulse::codec::{PayloadDecoder, PayloadEncoder};
//! use pulse::model::MetricRecord;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let encoder = PayloadEncoder::new().with_signing_key("secret");
//! let payload = encoder.encode(&[MetricRecord::counter("PollCount", 1)])?;
//!
//! let decoder = PayloadDecoder::new().with_signing_key("secret");
//! let records = decoder.decode(&payload.body, payload.signature.as_deref())?;
//! assert_eq!(records.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use hmac::{Hmac, Mac};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha512};
use thiserror::Error;

use crate::model::MetricRecord;

/// Header carrying the hex HMAC of the compressed body.
pub const SIGNATURE_HEADER: &str = "HashSHA256";

/// Output size of the OAEP hash (SHA-512).
const OAEP_HASH_LEN: usize = 64;

type HmacSha256 = Hmac<Sha256>;

/// Codec failures.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("compression error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rsa error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("invalid signing key: {0}")]
    SigningKey(#[from] hmac::digest::InvalidLength),

    /// A PEM file could not be read or parsed.
    #[error("invalid key '{path}': {message}")]
    Key { path: String, message: String },

    /// Ciphertext length is not a multiple of the key size.
    #[error("ciphertext length {len} is not a multiple of key size {key_size}")]
    CiphertextLength { len: usize, key_size: usize },

    /// A signing key is configured but the request carried no signature.
    #[error("missing {SIGNATURE_HEADER} signature")]
    MissingSignature,

    #[error("signature mismatch")]
    SignatureMismatch,
}

/// Encoded request body plus its signature header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub body: Vec<u8>,
    /// Hex HMAC-SHA256, present when a signing key is configured.
    pub signature: Option<String>,
}

/// Turns a snapshot into a request body.
#[derive(Clone, Default)]
pub struct PayloadEncoder {
    signing_key: Option<Vec<u8>>,
    public_key: Option<RsaPublicKey>,
}

impl std::fmt::Debug for PayloadEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadEncoder")
            .field("signed", &self.signing_key.is_some())
            .field("encrypted", &self.public_key.is_some())
            .finish()
    }
}

impl PayloadEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sign payloads with HMAC-SHA256 under `key`. An empty key disables signing.
    pub fn with_signing_key(mut self, key: impl AsRef<[u8]>) -> Self {
        let key = key.as_ref();
        self.signing_key = (!key.is_empty()).then(|| key.to_vec());
        self
    }

    /// Encrypt payloads with `key`.
    pub fn with_public_key(mut self, key: RsaPublicKey) -> Self {
        self.public_key = Some(key);
        self
    }

    pub fn encode(&self, records: &[MetricRecord]) -> Result<EncodedPayload, CodecError> {
        let json = serde_json::to_vec(records)?;
        let compressed = compress(&json)?;
        let signature = self
            .signing_key
            .as_deref()
            .map(|key| sign(key, &compressed))
            .transpose()?;

        let body = match &self.public_key {
            Some(key) => encrypt(key, &compressed)?,
            None => compressed,
        };
        Ok(EncodedPayload { body, signature })
    }
}

/// Turns a request body back into records.
#[derive(Clone, Default)]
pub struct PayloadDecoder {
    signing_key: Option<Vec<u8>>,
    private_key: Option<RsaPrivateKey>,
}

impl std::fmt::Debug for PayloadDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadDecoder")
            .field("verifies", &self.signing_key.is_some())
            .field("decrypts", &self.private_key.is_some())
            .finish()
    }
}

impl PayloadDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signing_key(mut self, key: impl AsRef<[u8]>) -> Self {
        let key = key.as_ref();
        self.signing_key = (!key.is_empty()).then(|| key.to_vec());
        self
    }

    pub fn with_private_key(mut self, key: RsaPrivateKey) -> Self {
        self.private_key = Some(key);
        self
    }

    /// Decode `body`, checking `signature` when a signing key is configured.
    pub fn decode(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<Vec<MetricRecord>, CodecError> {
        let compressed = match &self.private_key {
            Some(key) => decrypt(key, body)?,
            None => body.to_vec(),
        };

        if let Some(key) = &self.signing_key {
            let signature = signature.ok_or(CodecError::MissingSignature)?;
            verify(key, &compressed, signature)?;
        }

        let json = decompress(&compressed)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// gzip at best compression.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Hex HMAC-SHA256 of `data`.
pub fn sign(key: &[u8], data: &[u8]) -> Result<String, CodecError> {
    Ok(hex::encode(hmac_bytes(key, data)?))
}

fn hmac_bytes(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut mac = HmacSha256::new_from_slice(key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time comparison of `signature` against the expected HMAC.
pub fn verify(key: &[u8], data: &[u8], signature: &str) -> Result<(), CodecError> {
    let expected = hmac_bytes(key, data)?;
    let given = hex::decode(signature.trim()).map_err(|_| CodecError::SignatureMismatch)?;
    if constant_time_eq::constant_time_eq(&expected, &given) {
        Ok(())
    } else {
        Err(CodecError::SignatureMismatch)
    }
}

/// Largest plaintext chunk one OAEP(SHA-512) block can carry.
pub fn chunk_size(key_size: usize) -> usize {
    key_size.saturating_sub(2 * OAEP_HASH_LEN + 2)
}

pub fn encrypt(key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let step = chunk_size(key.size());
    if step == 0 {
        return Err(CodecError::Rsa(rsa::Error::MessageTooLong));
    }
    let mut rng = rand::thread_rng();
    let mut out = Vec::with_capacity(data.len().div_ceil(step) * key.size());
    for chunk in data.chunks(step) {
        out.extend(key.encrypt(&mut rng, Oaep::new::<Sha512>(), chunk)?);
    }
    Ok(out)
}

pub fn decrypt(key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let key_size = key.size();
    if data.len() % key_size != 0 {
        return Err(CodecError::CiphertextLength {
            len: data.len(),
            key_size,
        });
    }
    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks(key_size) {
        out.extend(key.decrypt(Oaep::new::<Sha512>(), chunk)?);
    }
    Ok(out)
}

/// Load an SPKI ("PUBLIC KEY") PEM file.
pub fn load_public_key(path: impl AsRef<Path>) -> Result<RsaPublicKey, CodecError> {
    let path = path.as_ref();
    let pem = read_pem(path)?;
    RsaPublicKey::from_public_key_pem(&pem).map_err(|e| key_error(path, e))
}

/// Load a PKCS#1 ("RSA PRIVATE KEY") PEM file, falling back to PKCS#8.
pub fn load_private_key(path: impl AsRef<Path>) -> Result<RsaPrivateKey, CodecError> {
    let path = path.as_ref();
    let pem = read_pem(path)?;
    RsaPrivateKey::from_pkcs1_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
        .map_err(|e| key_error(path, e))
}

fn read_pem(path: &Path) -> Result<String, CodecError> {
    std::fs::read_to_string(path).map_err(|e| key_error(path, e))
}

fn key_error(path: &Path, err: impl std::fmt::Display) -> CodecError {
    CodecError::Key {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}
