//! Keyed checksums for the SSO attach/verify/bearer handshake.
//!
//! Every value that crosses the browser or the wire is derived here:
//! - attach and bearer checksums (HMAC-SHA256 keyed with the broker secret)
//! - verification codes (SHA256 over broker id, token and session id)
//! - random client tokens
//!
//! All outputs are lowercase base36 so they can travel in URLs and match the
//! `[a-z0-9]` alphabet the server accepts in bearer tokens.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Number of random bytes in a freshly generated client token.
pub const TOKEN_BYTES: usize = 16;

/// Command a checksum is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Initial handshake, signed into the attach URL.
    Attach,
    /// Authenticated API call, bound to the verification code of one attach.
    Bearer(&'a str),
}

impl Command<'_> {
    /// Checksum of this command for `token` under `secret`.
    pub fn checksum(&self, token: &str, secret: &str) -> String {
        checksum(&self.to_string(), token, secret)
    }
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Attach => f.write_str("attach"),
            Command::Bearer(code) => write!(f, "bearer:{}", code),
        }
    }
}

/// Keyed checksum: base36(HMAC-SHA256(secret, "{command}:{token}")).
pub fn checksum(command: &str, token: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(command.as_bytes());
    mac.update(b":");
    mac.update(token.as_bytes());
    base36(&mac.finalize().into_bytes())
}

/// Verification code tying a broker token to one server session.
///
/// No secret is involved: the code is handed to the broker over the redirect
/// channel and only becomes useful combined with the broker secret inside a
/// bearer checksum.
pub fn verification_code(broker_id: &str, token: &str, session_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(broker_id.as_bytes());
    hasher.update(token.as_bytes());
    hasher.update(session_id.as_bytes());
    base36(&hasher.finalize())
}

/// Constant-time comparison of an expected and a received checksum.
pub fn checksums_match(expected: &str, received: &str) -> bool {
    expected.as_bytes().ct_eq(received.as_bytes()).into()
}

/// Generate a high-entropy client token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base36(&bytes)
}

/// Encode a big-endian unsigned integer as lowercase base36.
pub fn base36(bytes: &[u8]) -> String {
    let mut number: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
    let mut digits = Vec::with_capacity(number.len() * 8 / 5 + 1);

    while !number.is_empty() {
        let mut remainder: u32 = 0;
        let mut quotient = Vec::with_capacity(number.len());

        for &byte in &number {
            let acc = (remainder << 8) | u32::from(byte);
            let q = (acc / 36) as u8;
            remainder = acc % 36;
            if !quotient.is_empty() || q != 0 {
                quotient.push(q);
            }
        }

        digits.push(BASE36_ALPHABET[remainder as usize]);
        number = quotient;
    }

    if digits.is_empty() {
        return "0".to_string();
    }

    digits.iter().rev().map(|&d| d as char).collect()
}
