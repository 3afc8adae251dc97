//! EAPI envelope codec
//!
//! Request and response bodies of the EAPI endpoints are AES-128-ECB
//! encrypted with a fixed key and PKCS#7 padded. Responses arrive as raw
//! ciphertext (or its hex form once a capture tool has saved them); requests
//! are form bodies `params=<HEX>`.
//!
//! Decrypted plaintext is either a flat JSON document (responses) or a
//! three-part envelope `url-36cd479b6b5-json-36cd479b6b5-checksum`
//! (requests).

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// EAPI AES-128 key
pub const EAPI_KEY: &[u8; 16] = b"e82ckenh8dichen8";

/// IV for the chained variant; ECB ignores it
pub const EAPI_IV: &[u8; 16] = b"0102030405060708";

/// Literal separator between envelope parts
pub const ENVELOPE_DELIMITER: &str = "-36cd479b6b5-";

const BLOCK_SIZE: usize = 16;
const FORM_PREFIX: &[u8] = b"params=";

/// Codec errors
///
/// Every variant drops a single exchange; none is fatal to the engine.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("Empty body")]
    Empty,

    #[error("Invalid hex: {0}")]
    BadHex(String),

    #[error("Ciphertext length {0} is not a non-zero multiple of 16")]
    BadCiphertextLength(usize),

    #[error("Bad PKCS#7 padding")]
    BadPadding,

    #[error("Plaintext is not UTF-8: {0}")]
    BadPlaintext(String),

    #[error("Plaintext is not JSON: {0}")]
    BadJson(String),

    #[error("Unknown envelope shape: {0} parts")]
    UnknownEnvelopeShape(usize),
}

/// Decrypted and parsed body
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    /// Endpoint url from a three-part request envelope
    pub url: Option<String>,
    pub document: Value,
}

/// Decrypt and parse a request or response body
pub fn decode(raw: &[u8]) -> Result<DecodedPayload, CodecError> {
    let plaintext = decrypt(raw)?;
    let text = String::from_utf8(plaintext).map_err(|e| CodecError::BadPlaintext(e.to_string()))?;
    parse_plaintext(&text)
}

/// Decrypt a body to plaintext bytes
///
/// Accepts raw ciphertext, ASCII hex (either case) and `params=<HEX>` form
/// bodies. Surrounding whitespace around hex text is ignored.
pub fn decrypt(raw: &[u8]) -> Result<Vec<u8>, CodecError> {
    let ciphertext = ciphertext_bytes(raw)?;
    decrypt_blocks(&ciphertext)
}

fn ciphertext_bytes(raw: &[u8]) -> Result<Vec<u8>, CodecError> {
    if raw.is_empty() {
        return Err(CodecError::Empty);
    }

    if let Some(hex_part) = raw.strip_prefix(FORM_PREFIX) {
        let hex_part = trim_whitespace(hex_part);
        if hex_part.is_empty() {
            return Err(CodecError::Empty);
        }
        return hex::decode(hex_part).map_err(|e| CodecError::BadHex(e.to_string()));
    }

    let trimmed = trim_whitespace(raw);
    if !trimmed.is_empty() && trimmed.iter().all(u8::is_ascii_hexdigit) {
        return hex::decode(trimmed).map_err(|e| CodecError::BadHex(e.to_string()));
    }

    Ok(raw.to_vec())
}

fn trim_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// AES-128-ECB decrypt and strip PKCS#7 padding
pub fn decrypt_blocks(ciphertext: &[u8]) -> Result<Vec<u8>, CodecError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CodecError::BadCiphertextLength(ciphertext.len()));
    }

    let cipher = Aes128::new(GenericArray::from_slice(EAPI_KEY));
    let mut buffer = ciphertext.to_vec();
    for block in buffer.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }

    let pad = buffer[buffer.len() - 1] as usize;
    if pad == 0 || pad > BLOCK_SIZE {
        return Err(CodecError::BadPadding);
    }
    let body_len = buffer.len() - pad;
    if buffer[body_len..].iter().any(|&b| b as usize != pad) {
        return Err(CodecError::BadPadding);
    }
    buffer.truncate(body_len);
    Ok(buffer)
}

/// Interpret decrypted text as flat JSON or a three-part envelope
pub fn parse_plaintext(text: &str) -> Result<DecodedPayload, CodecError> {
    let parts: Vec<&str> = text.split(ENVELOPE_DELIMITER).collect();
    match parts.as_slice() {
        [json] => Ok(DecodedPayload {
            url: None,
            document: parse_json(json)?,
        }),
        [url, json, _checksum] => Ok(DecodedPayload {
            url: Some((*url).to_string()),
            document: parse_json(json)?,
        }),
        other => Err(CodecError::UnknownEnvelopeShape(other.len())),
    }
}

fn parse_json(text: &str) -> Result<Value, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::BadJson(e.to_string()))
}

/// PKCS#7 pad and AES-128-ECB encrypt
pub fn encrypt(plaintext: &[u8]) -> Vec<u8> {
    let pad = BLOCK_SIZE - plaintext.len() % BLOCK_SIZE;
    let mut buffer = Vec::with_capacity(plaintext.len() + pad);
    buffer.extend_from_slice(plaintext);
    buffer.resize(plaintext.len() + pad, pad as u8);

    let cipher = Aes128::new(GenericArray::from_slice(EAPI_KEY));
    for block in buffer.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    buffer
}

/// Encrypt to upper-case hex, the form the client puts on the wire
pub fn encrypt_hex(plaintext: &[u8]) -> String {
    hex::encode_upper(encrypt(plaintext))
}

/// Build a `params=<HEX>` request body for `url` carrying `data`
///
/// The checksum part is never verified on decode; a digest of the other
/// two parts fills its slot.
pub fn encode_request(url: &str, data: &Value) -> String {
    let json = data.to_string();
    let digest = Sha256::digest(format!("nobody{}use{}md5forencrypt", url, json).as_bytes());
    let checksum = hex::encode(&digest[..16]);
    let plaintext = format!(
        "{url}{delim}{json}{delim}{checksum}",
        delim = ENVELOPE_DELIMITER
    );
    format!("params={}", encrypt_hex(plaintext.as_bytes()))
}
