//! RSA key pairs for federation identities.
//!
//! A [`Keypair`] is the signing identity behind every certificate, GID and
//! credential in the federation trust engine. Keys are RSA-2048, signatures
//! are RSASSA-PKCS1-v1_5 over SHA-256, and private material round-trips
//! through PKCS#8 PEM.
//!
//! Encrypted PKCS#8 keys are loaded with an explicit [`PassphraseSource`]
//! rather than a global callback.

pub mod error;
pub mod keypair;
pub mod passphrase;

pub use error::KeyError;
pub use keypair::{KEY_BITS, Keypair, passphrase_decrypts};
pub use passphrase::{NoPassphrase, PassphraseSource, StaticPassphrase};
