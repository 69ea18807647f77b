//! ClientHello fingerprint builder
//!
//! Canonicalises a parsed handshake into the three-field fingerprint string
//! `a_b_c`: a 10-character header, a 12-hex-digit cipher-suite digest and a
//! 12-hex-digit extension/signature digest. The derivation is deterministic
//! under reordering of the cipher-suite and extension input lists; signature
//! algorithms keep their transmitted order.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::tls::{TlsHandshake, Transport};

/// Extensions excluded from field c: SNI and ALPN
const EXCLUDED_EXTENSIONS: [u16; 2] = [0x0000, 0x0010];

/// Counts above this cannot be encoded in field a; no fingerprint is produced
const MAX_LIST_COUNT: usize = 99;

/// Immutable 3-field handshake fingerprint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ja4Record {
    a: String,
    b: String,
    c: String,
}

impl Ja4Record {
    /// Derive the fingerprint, or `None` when a list count exceeds 99
    pub fn from_handshake(hs: &TlsHandshake) -> Option<Self> {
        Some(Self {
            a: field_a(hs)?,
            b: field_b(hs),
            c: field_c(hs),
        })
    }

    /// 10-character header field
    pub fn a(&self) -> &str {
        &self.a
    }

    /// Cipher-suite digest, 12 hex characters
    pub fn b(&self) -> &str {
        &self.b
    }

    /// Extension/signature digest, 12 hex characters
    pub fn c(&self) -> &str {
        &self.c
    }
}

impl fmt::Display for Ja4Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.a, self.b, self.c)
    }
}

fn field_a(hs: &TlsHandshake) -> Option<String> {
    let ciphers = hs.cipher_suites.len();
    let extensions = hs.extensions.len();
    if ciphers > MAX_LIST_COUNT || extensions > MAX_LIST_COUNT {
        return None;
    }

    let mut a = String::with_capacity(10);
    a.push(match hs.transport {
        Transport::Tcp => 't',
        Transport::Quic => 'q',
    });
    a.push_str(hs.version_str());
    a.push(if hs.sni.is_some() { 'd' } else { 'i' });
    a.push_str(&format!("{:02}{:02}", ciphers, extensions));

    let alpn = hs.alpn.as_bytes();
    match (alpn.first(), alpn.last()) {
        (Some(&first), Some(&last)) => {
            a.push(first as char);
            a.push(last as char);
        }
        _ => a.push_str("00"),
    }
    Some(a)
}

fn field_b(hs: &TlsHandshake) -> String {
    let mut suites = hs.cipher_suites.clone();
    suites.sort_unstable();
    truncated_digest(&hex_csv(&suites))
}

fn field_c(hs: &TlsHandshake) -> String {
    let mut extensions: Vec<u16> = hs
        .extensions
        .iter()
        .copied()
        .filter(|e| !EXCLUDED_EXTENSIONS.contains(e))
        .collect();
    extensions.sort_unstable();
    let input = format!(
        "{}_{}",
        hex_csv(&extensions),
        hex_csv(&hs.signature_algorithms)
    );
    truncated_digest(&input)
}

/// Comma-separated lower-case 4-hex-digit serialization
fn hex_csv(values: &[u16]) -> String {
    values
        .iter()
        .map(|v| format!("{:04x}", v))
        .collect::<Vec<_>>()
        .join(",")
}

/// First 6 bytes of the SHA-256, hex-encoded to 12 characters
fn truncated_digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(&hasher.finalize()[..6])
}
