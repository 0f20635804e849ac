//! Cryptographic primitives for the handshake
//!
//! The handshake borrows its key schedule from TLS 1.0: a running SHA-256
//! transcript over the handshake messages and an iterated HMAC-SHA256 PRF
//! for secret derivation. Key exchange is RSA key transport (v1) or
//! ephemeral P-256 ECDH (v2).

use hmac::{Hmac, Mac};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{AuthError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const RANDOM_LEN: usize = 32;
pub const SECRET_LEN: usize = 48;
pub const TRANSCRIPT_LEN: usize = 32;
pub const SESSION_KEY_LEN: usize = 16;

/// Raw uncompressed P-256 point without the SEC1 tag byte
pub const ECDH_PUBKEY_LEN: usize = 64;

/// DER-encoded RSAPublicKey with a 2048-bit modulus
pub const RSA_PUBKEY_DER_LEN: usize = 270;

/// Running hash over the handshake messages.
///
/// Digests are taken mid-stream without disturbing accumulation.
#[derive(Debug, Clone)]
pub struct TranscriptHash(Sha256);

impl TranscriptHash {
    pub fn new() -> TranscriptHash {
        TranscriptHash(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn digest(&self) -> [u8; TRANSCRIPT_LEN] {
        self.0.clone().finalize().into()
    }

    pub fn reset(&mut self) {
        self.0 = Sha256::new();
    }
}

impl Default for TranscriptHash {
    fn default() -> TranscriptHash {
        TranscriptHash::new()
    }
}

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac key");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// TLS-1.0-style pseudorandom function, iterated HMAC-SHA256.
pub fn prf(key: &[u8], label: &str, seed: &[u8], out_len: usize) -> Vec<u8> {
    let label = label.as_bytes();
    let mut a = hmac_sha256(key, &[label, seed]);

    let mut out = Vec::with_capacity(out_len.next_multiple_of(32));
    while out.len() < out_len {
        out.extend_from_slice(&hmac_sha256(key, &[&a, label, seed]));
        a = hmac_sha256(key, &[&a]);
    }

    out.truncate(out_len);
    out
}

/// ASN.1 SEQUENCE tag of a 270-byte RSAPublicKey
const ASN1_SEQ: [u8; 4] = [0x30, 0x82, 0x01, 0x0a];

/// Pull the RSA public key out of a peer certificate.
///
/// The certificates are not RFC 5280 compliant (empty subject, no
/// subjectAltName), so off-the-shelf X.509 parsing fails on them. Scan for
/// the SEQUENCE tag of the embedded RSAPublicKey instead and parse its two
/// integers field by field.
pub fn extract_rsa_pubkey(cert: &[u8]) -> Result<RsaPublicKey> {
    for (i, window) in cert.windows(ASN1_SEQ.len()).enumerate() {
        if window != ASN1_SEQ {
            continue;
        }

        let der = cert
            .get(i..i + RSA_PUBKEY_DER_LEN)
            .ok_or(AuthError::CertificateInvalid)?;

        // INTEGER, 257 bytes, leading zero, 256-byte modulus
        if der[4..9] != [0x02, 0x82, 0x01, 0x01, 0x00] {
            return Err(AuthError::CertificateInvalid);
        }
        let modulus = &der[9..265];

        // INTEGER, 3-byte exponent
        if der[265..267] != [0x02, 0x03] {
            return Err(AuthError::CertificateInvalid);
        }
        let exponent = &der[267..270];

        return Ok(RsaPublicKey::new(
            BigUint::from_bytes_be(modulus),
            BigUint::from_bytes_be(exponent),
        )?);
    }

    Err(AuthError::CertificateInvalid)
}

/// PKCS#1 v1.5 encryption of the premaster secret.
pub fn encrypt_premaster(pubkey: &RsaPublicKey, premaster: &[u8]) -> Result<Vec<u8>> {
    Ok(pubkey.encrypt(&mut OsRng, Pkcs1v15Encrypt, premaster)?)
}

/// One ephemeral ECDH exchange against a raw peer point.
///
/// Returns our raw public point and the SHA-256 hash of the shared
/// x-coordinate, which feeds the PRF as the premaster.
pub fn ecdh_exchange(
    peer: &[u8; ECDH_PUBKEY_LEN],
) -> Result<([u8; ECDH_PUBKEY_LEN], [u8; 32])> {
    let mut sec1 = [0u8; ECDH_PUBKEY_LEN + 1];
    sec1[0] = 0x04;
    sec1[1..].copy_from_slice(peer);
    let peer_key =
        p256::PublicKey::from_sec1_bytes(&sec1).map_err(|_| AuthError::PublicKeyInvalid)?;

    let secret = p256::ecdh::EphemeralSecret::random(&mut OsRng);
    let point = secret.public_key().to_encoded_point(false);

    let mut pubkey = [0u8; ECDH_PUBKEY_LEN];
    pubkey.copy_from_slice(&point.as_bytes()[1..]);

    let shared = secret.diffie_hellman(&peer_key);
    let hash = Sha256::digest(shared.raw_secret_bytes()).into();

    Ok((pubkey, hash))
}
