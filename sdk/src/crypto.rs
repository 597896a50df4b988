//! XSalsa20-Poly1305 secure channel for RTP payloads.
//!
//! Sealed output uses the libsodium `crypto_secretbox_easy` layout: the
//! 16-byte Poly1305 tag followed by the ciphertext. The 24-byte nonce is the
//! 12-byte RTP header followed by twelve zero bytes.
//!
//! Nonce uniqueness rests on the header. The sequence number wraps every
//! 2^16 packets but the timestamp advances by 960 per packet, so the
//! (sequence, timestamp) pair, and therefore the nonce, only repeats after
//! lcm(2^16, 2^32 / gcd(960, 2^32)) = 2^26 packets. At 50 packets per second
//! that is roughly 15.5 days of continuous sending within one session.

use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Key, Nonce, XSalsa20Poly1305};
use finchvoice_protocol::RTP_HEADER_LEN;

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// The session's 32-byte secret key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    #[must_use]
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl From<[u8; KEY_LEN]> for SecretKey {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Nonce for a packet: the header verbatim, zero-padded to [`NONCE_LEN`].
#[must_use]
pub fn nonce_from_header(header: &[u8; RTP_HEADER_LEN]) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..RTP_HEADER_LEN].copy_from_slice(header);
    nonce
}

/// Keyed cipher shared read-only between the send and receive paths.
pub struct SecureChannel {
    cipher: XSalsa20Poly1305,
}

impl SecureChannel {
    #[must_use]
    pub fn new(key: &SecretKey) -> Self {
        Self {
            cipher: XSalsa20Poly1305::new(Key::from_slice(key.as_bytes())),
        }
    }

    /// Encrypt and authenticate `plaintext`. Output is `tag || ciphertext`.
    ///
    /// # Errors
    /// Returns [`CryptoError::SealFailure`] if the cipher rejects the input.
    pub fn seal(&self, plaintext: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| CryptoError::SealFailure)
    }

    /// Verify and decrypt `tag || ciphertext`.
    ///
    /// # Errors
    /// Returns [`CryptoError::AuthenticationFailure`] on any tag mismatch,
    /// including input shorter than the tag.
    pub fn open(&self, sealed: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < TAG_LEN {
            return Err(CryptoError::AuthenticationFailure);
        }
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::AuthenticationFailure)
    }

    /// Seal `payload` under the nonce derived from `header`.
    ///
    /// # Errors
    /// See [`SecureChannel::seal`].
    pub fn seal_for_header(
        &self,
        payload: &[u8],
        header: &[u8; RTP_HEADER_LEN],
    ) -> Result<Vec<u8>, CryptoError> {
        self.seal(payload, &nonce_from_header(header))
    }

    /// Open `sealed` under the nonce derived from `header`.
    ///
    /// # Errors
    /// See [`SecureChannel::open`].
    pub fn open_for_header(
        &self,
        sealed: &[u8],
        header: &[u8; RTP_HEADER_LEN],
    ) -> Result<Vec<u8>, CryptoError> {
        self.open(sealed, &nonce_from_header(header))
    }
}
