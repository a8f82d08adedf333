// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

use crate::error::{ConfigError, StreamError};

use data_encoding::{Encoding, Specification, BASE64};
use lazy_static::lazy_static;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Suffix of base32 addresses.
pub const B32_EXT: &str = ".b32.i2p";

/// Length of the base64 form of a 32-byte hash.
const HASH_B64_LEN: usize = 44;

lazy_static! {
    /// Base32 encoding used for `.b32.i2p` addresses: lowercase, no padding.
    pub static ref BASE32_I2P: Encoding = {
        let mut spec = Specification::new();

        spec.symbols.push_str("abcdefghijklmnopqrstuvwxyz234567");
        spec.padding = None;
        spec.encoding().unwrap()
    };
}

lazy_static! {
    /// Base64 encoding used for destinations and key material on the wire.
    pub static ref BASE64_I2P: Encoding = {
        let mut spec = Specification::new();
        spec.symbols
            .push_str("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-~");
        spec.padding = Some('=');
        spec.encoding().unwrap()
    };
}

/// Offline signature block of a destination.
///
/// Only the fixed-width prefix is interpreted; the remainder of the block is
/// carried opaquely and handed to the router as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineSignature {
    /// Expiry of the transient key, seconds since the epoch.
    pub expires: u32,

    /// Signature type of the transient key.
    pub transient_sig_type: u16,

    /// Full signature block as received.
    pub raw: Vec<u8>,
}

impl OfflineSignature {
    /// Parse an offline signature block.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, StreamError> {
        if raw.len() < 6 {
            return Err(StreamError::InvalidKey);
        }

        Ok(Self {
            expires: u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
            transient_sig_type: u16::from_be_bytes([raw[4], raw[5]]),
            raw: raw.to_vec(),
        })
    }
}

/// An I2P destination: public identity plus the signing key backing it.
///
/// Key material is opaque to the bridge; generation and verification of real
/// signature-scheme keys belong to the cryptography collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Public key bytes.
    public_key: Vec<u8>,

    /// Signature type of the destination.
    signature_type: u16,

    /// Offline signature block, if the destination uses offline keys.
    offline_signature: Option<OfflineSignature>,

    /// Private signing key bytes.
    private_key: Vec<u8>,
}

impl Destination {
    /// Generate a new destination of the given signature type.
    pub fn generate(signature_type: u16) -> Self {
        let mut public_key = vec![0u8; 32];
        let mut private_key = vec![0u8; 64];

        rand::thread_rng().fill_bytes(&mut public_key);
        rand::thread_rng().fill_bytes(&mut private_key);

        Self {
            public_key,
            signature_type,
            offline_signature: None,
            private_key,
        }
    }

    /// Reconstruct a destination from the private key blob returned by
    /// [`Destination::private_key_b64()`].
    pub fn from_private_b64(key: &str) -> Result<Self, StreamError> {
        let blob = BASE64_I2P.decode(key.as_bytes()).map_err(|_| StreamError::InvalidKey)?;

        if blob.len() != 32 + 64 {
            return Err(StreamError::InvalidKey);
        }

        Ok(Self {
            public_key: blob[..32].to_vec(),
            signature_type: 7,
            offline_signature: None,
            private_key: blob[32..].to_vec(),
        })
    }

    /// Signature type of the destination.
    pub fn signature_type(&self) -> u16 {
        self.signature_type
    }

    /// Attach an offline signature block.
    pub fn set_offline_signature(&mut self, signature: OfflineSignature) {
        self.offline_signature = Some(signature);
    }

    /// Offline signature block, if any.
    pub fn offline_signature(&self) -> Option<&OfflineSignature> {
        self.offline_signature.as_ref()
    }

    /// Stable lookup identity of the destination.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.public_key);
        hasher.finalize().into()
    }

    /// Base64 form of [`Destination::hash()`], used as registry key and as the
    /// source of delivered DATAGRAM3 datagrams.
    pub fn hash_b64(&self) -> String {
        BASE64.encode(&self.hash())
    }

    /// Base64 form of the public identity, used on the wire.
    pub fn to_b64(&self) -> String {
        BASE64_I2P.encode(&self.public_key)
    }

    /// Base64 private key blob, returned in `SESSION STATUS` and `DEST REPLY`.
    pub fn private_key_b64(&self) -> String {
        let mut blob = self.public_key.clone();
        blob.extend_from_slice(&self.private_key);

        BASE64_I2P.encode(&blob)
    }

    /// Base32 address of the destination.
    pub fn b32_address(&self) -> String {
        let mut address = BASE32_I2P.encode(&self.hash());
        address.push_str(B32_EXT);
        address
    }
}

/// Hash of a base64 destination, for lookups keyed by destination identity.
pub fn hash_of_b64(destination: &str) -> Result<[u8; 32], StreamError> {
    let bytes = BASE64_I2P
        .decode(destination.as_bytes())
        .map_err(|_| StreamError::InvalidKey)?;

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Ok(hasher.finalize().into())
}

/// Validate a DATAGRAM3 source hash: 44 base64 characters decoding to 32 bytes.
pub fn validate_hash_source(source: &str) -> Result<[u8; 32], ConfigError> {
    if source.len() != HASH_B64_LEN {
        return Err(ConfigError::InvalidHashLength);
    }

    let bytes = BASE64.decode(source.as_bytes()).map_err(|_| ConfigError::InvalidHashFormat)?;

    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| ConfigError::InvalidHashLength)
}

/// Derive the base32 address of a DATAGRAM3 source hash.
///
/// The 44-byte base64 input decodes to a 32-byte hash which is base32-encoded
/// to 52 lowercase characters and suffixed with `.b32.i2p`, yielding a 60-char
/// address suitable for `NAMING LOOKUP`.
pub fn hash_to_b32(source: &str) -> Result<String, ConfigError> {
    let hash = validate_hash_source(source)?;

    let mut address = BASE32_I2P.encode(&hash);
    address.push_str(B32_EXT);
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_destinations_differ() {
        let a = Destination::generate(7);
        let b = Destination::generate(7);

        assert_ne!(a.hash(), b.hash());
        assert_ne!(a.to_b64(), b.to_b64());
    }

    #[test]
    fn private_key_round_trip() {
        let destination = Destination::generate(7);
        let restored = Destination::from_private_b64(&destination.private_key_b64()).unwrap();

        assert_eq!(destination.hash(), restored.hash());
        assert_eq!(destination.to_b64(), restored.to_b64());
    }

    #[test]
    fn b32_address_shape() {
        let destination = Destination::generate(7);
        let address = destination.b32_address();

        assert_eq!(address.len(), 60);
        assert!(address.ends_with(B32_EXT));
        assert_eq!(address, address.to_lowercase());
    }

    #[test]
    fn hash_to_b32_zero_hash() {
        let source = BASE64.encode(&[0u8; 32]);
        assert_eq!(source.len(), 44);

        let address = hash_to_b32(&source).unwrap();

        assert_eq!(address, format!("{}{B32_EXT}", "a".repeat(52)));
        assert_eq!(address.len(), 60);
    }

    #[test]
    fn hash_to_b32_round_trip() {
        let hash = [0xa5u8; 32];
        let address = hash_to_b32(&BASE64.encode(&hash)).unwrap();

        let prefix = address.strip_suffix(B32_EXT).unwrap();
        assert_eq!(prefix.len(), 52);
        assert_eq!(BASE32_I2P.decode(prefix.as_bytes()).unwrap(), hash.to_vec());
    }

    #[test]
    fn hash_source_validation() {
        assert_eq!(validate_hash_source("too-short"), Err(ConfigError::InvalidHashLength));
        assert_eq!(
            validate_hash_source(&"!".repeat(44)),
            Err(ConfigError::InvalidHashFormat),
        );

        // 44 valid base64 characters that decode to 31 bytes, not 32
        let source = BASE64.encode(&[0u8; 31]);
        assert_eq!(source.len(), 44);
        assert_eq!(validate_hash_source(&source), Err(ConfigError::InvalidHashLength));

        assert!(validate_hash_source(&BASE64.encode(&[7u8; 32])).is_ok());
    }

    #[test]
    fn offline_signature_prefix() {
        let mut raw = vec![0u8; 64];
        raw[..4].copy_from_slice(&0x0063_2ea0u32.to_be_bytes());
        raw[4..6].copy_from_slice(&7u16.to_be_bytes());

        let signature = OfflineSignature::from_bytes(&raw).unwrap();

        assert_eq!(signature.expires, 0x0063_2ea0);
        assert_eq!(signature.transient_sig_type, 7);
        assert_eq!(signature.raw, raw);

        assert_eq!(OfflineSignature::from_bytes(&[0u8; 5]), Err(StreamError::InvalidKey));
    }
}
