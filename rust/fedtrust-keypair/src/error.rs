//! Error types for key pair operations.

use thiserror::Error;

/// Errors from loading, serializing or using a [`crate::Keypair`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The key material could not be parsed.
    #[error("malformed key material: {0}")]
    Malformed(String),

    /// The key material is well formed but uses an algorithm or
    /// container this engine does not handle (EC, DSA, OpenSSH, ...).
    #[error("unsupported key material: {0}")]
    Unsupported(String),

    /// The key is encrypted and no passphrase was supplied.
    #[error("key is encrypted and no passphrase was supplied")]
    PassphraseRequired,

    /// The supplied passphrase did not decrypt the key.
    #[error("passphrase does not decrypt the key")]
    WrongPassphrase,

    /// A private-key operation was attempted on a public-only key pair.
    #[error("key pair holds only a public key")]
    PublicOnly,

    /// The RSA primitive failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Key generation failed.
    #[error("key generation failed: {0}")]
    Generation(String),
}

impl From<rsa::Error> for KeyError {
    fn from(e: rsa::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<rsa::pkcs1::Error> for KeyError {
    fn from(e: rsa::pkcs1::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<pkcs8::Error> for KeyError {
    fn from(e: pkcs8::Error) -> Self {
        match e {
            pkcs8::Error::KeyMalformed | pkcs8::Error::Asn1(_) => Self::Malformed(e.to_string()),
            other => Self::Unsupported(other.to_string()),
        }
    }
}

impl From<pkcs8::spki::Error> for KeyError {
    fn from(e: pkcs8::spki::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}
