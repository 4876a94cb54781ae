//! Cryptographic primitives for KNX IP Secure.
//!
//! Key agreement is plain X25519 (RFC 7748); the session key is the first
//! half of SHA-256 over the shared secret. Packet protection is AES-128 in
//! CTR mode with a CBC-MAC over the associated data, the MAC itself masked
//! with one dedicated keystream block.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes128;
use sha2::{Digest, Sha256};

use knxip_types::SecureError;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// X25519 public key length.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Length of the packet and handshake MACs.
pub const MAC_SIZE: usize = 16;

/// AES-128 session key length.
pub const SESSION_KEY_SIZE: usize = 16;

/// Server serial number length.
pub const SERIAL_SIZE: usize = 6;

/// Counter-block tail selecting the MAC keystream block.
pub const MAC_COUNTER_TAIL: u16 = 0xFF00;

/// An AES-128 session key derived from the handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SecureError> {
        if bytes.len() != SESSION_KEY_SIZE {
            return Err(SecureError::InvalidKeyLength {
                expected: SESSION_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; SESSION_KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }
}

impl From<[u8; SESSION_KEY_SIZE]> for SessionKey {
    fn from(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        // Zero out the key bytes
        for byte in &mut self.0 {
            unsafe {
                std::ptr::write_volatile(byte, 0);
            }
        }
        std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKey([REDACTED])")
    }
}

/// Derive the session key from an X25519 shared secret: SHA-256, truncated
/// to the AES-128 key length.
pub fn session_key_from_shared(shared: &[u8; PUBLIC_KEY_SIZE]) -> SessionKey {
    let hash = Sha256::digest(shared);
    let mut key = [0u8; SESSION_KEY_SIZE];
    key.copy_from_slice(&hash[..SESSION_KEY_SIZE]);
    SessionKey(key)
}

/// XOR two public keys, the handshake MAC input.
pub fn xor_keys(
    a: &[u8; PUBLIC_KEY_SIZE],
    b: &[u8; PUBLIC_KEY_SIZE],
) -> [u8; PUBLIC_KEY_SIZE] {
    let mut out = [0u8; PUBLIC_KEY_SIZE];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = a[i] ^ b[i];
    }
    out
}

/// Build the 16-byte security-information block: sequence (48 bit), serial
/// number (48 bit), message tag, and the two-byte tail (counter index or
/// payload length, depending on use).
pub fn security_info(seq: u64, serial: &[u8; SERIAL_SIZE], tag: u16, tail: u16) -> [u8; 16] {
    let mut info = [0u8; 16];
    info[..6].copy_from_slice(&seq.to_be_bytes()[2..]);
    info[6..12].copy_from_slice(serial);
    info[12..14].copy_from_slice(&tag.to_be_bytes());
    info[14..16].copy_from_slice(&tail.to_be_bytes());
    info
}

/// AES-128 CBC-MAC with a zero IV and zero-byte padding; the MAC is the last
/// cipher block.
pub fn cbc_mac(key: &[u8; SESSION_KEY_SIZE], data: &[u8]) -> [u8; MAC_SIZE] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut state = [0u8; MAC_SIZE];
    for chunk in data.chunks(MAC_SIZE) {
        for (s, b) in state.iter_mut().zip(chunk) {
            *s ^= b;
        }
        let mut block = GenericArray::from(state);
        cipher.encrypt_block(&mut block);
        state.copy_from_slice(&block);
    }
    state
}

/// XOR-encrypt a MAC with the single AES-ECB keystream block for the given
/// counter block. Applying it twice restores the original.
pub fn encrypt_mac(key: &SessionKey, counter: &[u8; 16], mac: &mut [u8; MAC_SIZE]) {
    let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
    let mut block = GenericArray::from(*counter);
    cipher.encrypt_block(&mut block);
    for (m, k) in mac.iter_mut().zip(block.iter()) {
        *m ^= k;
    }
}

/// AES-128-CTR over the data, starting from the given counter block.
/// Symmetric; used for both encryption and decryption.
pub fn ctr_crypt(key: &SessionKey, counter: &[u8; 16], data: &mut [u8]) {
    let mut cipher = Aes128Ctr::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(counter),
    );
    cipher.apply_keystream(data);
}
