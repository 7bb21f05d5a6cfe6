// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token minting, constant-time comparison, and at-rest key sealing.

use base64::Engine;
use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, CHACHA20_POLY1305, NONCE_LEN};
use sha2::{Digest, Sha256};

use crate::error::{err, HubError, HubResult};

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Mint a 128-bit random URL-safe token.
pub fn mint() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    B64.encode(bytes)
}

/// Derive the at-rest sealing key from the env-provided master secret.
fn sealing_key(master_secret: &str) -> HubResult<LessSafeKey> {
    let digest = Sha256::digest(master_secret.as_bytes());
    let unbound = UnboundKey::new(&CHACHA20_POLY1305, &digest)
        .map_err(|_| (HubError::Internal, "sealing key derivation failed".to_owned()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Seal plaintext under the master secret. Output is `base64(nonce || ciphertext)`.
pub fn seal(master_secret: &str, plaintext: &[u8]) -> HubResult<String> {
    let key = sealing_key(master_secret)?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut buf = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut buf)
        .map_err(|_| (HubError::Internal, "seal failed".to_owned()))?;

    let mut out = nonce_bytes.to_vec();
    out.extend_from_slice(&buf);
    Ok(B64.encode(out))
}

/// Open a sealed value produced by [`seal`].
pub fn open(master_secret: &str, sealed: &str) -> HubResult<Vec<u8>> {
    let raw = B64
        .decode(sealed)
        .map_err(|_| (HubError::Internal, "sealed value is not valid base64".to_owned()))?;
    if raw.len() < NONCE_LEN {
        return err(HubError::Internal, "sealed value too short");
    }
    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
    let mut nonce_arr = [0u8; NONCE_LEN];
    nonce_arr.copy_from_slice(nonce_bytes);
    let nonce = Nonce::assume_unique_for_key(nonce_arr);

    let key = sealing_key(master_secret)?;
    let mut buf = ciphertext.to_vec();
    let plain = key
        .open_in_place(nonce, Aad::empty(), &mut buf)
        .map_err(|_| (HubError::Internal, "unseal failed".to_owned()))?;
    Ok(plain.to_vec())
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
