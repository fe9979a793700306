//! Passphrase capabilities for encrypted key material.
//!
//! Callers that hold encrypted private keys pass a [`PassphraseSource`]
//! to [`crate::Keypair::load_with`] at the call site. There is no
//! process-wide callback.

/// Supplies the passphrase for a piece of encrypted key material.
pub trait PassphraseSource {
    /// Return the passphrase to try for `material`, or `None` to give up.
    fn passphrase(&self, material: &str) -> Option<String>;
}

/// A fixed passphrase.
#[derive(Clone)]
pub struct StaticPassphrase(String);

impl StaticPassphrase {
    /// Wrap a passphrase.
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self(passphrase.into())
    }
}

impl std::fmt::Debug for StaticPassphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticPassphrase(..)")
    }
}

impl PassphraseSource for StaticPassphrase {
    fn passphrase(&self, _material: &str) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Closures work as passphrase sources, e.g. a prompt.
impl<F> PassphraseSource for F
where
    F: Fn(&str) -> Option<String>,
{
    fn passphrase(&self, material: &str) -> Option<String> {
        self(material)
    }
}

/// Never supplies a passphrase.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPassphrase;

impl PassphraseSource for NoPassphrase {
    fn passphrase(&self, _material: &str) -> Option<String> {
        None
    }
}
