//! Error types for certificates, chain verification and naming.

use fedtrust_keypair::KeyError;

/// Errors from building, loading, signing or serializing a
/// [`crate::Certificate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertificateError {
    /// Key material attached to the certificate is unusable.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The certificate could not be parsed or encoded.
    #[error("malformed certificate: {0}")]
    Malformed(String),

    /// An extension was re-added with a different value.
    #[error("extension {name} is already set to {existing:?}, refusing {attempted:?}")]
    ExtensionConflict {
        /// Extension name
        name: String,
        /// Value already present
        existing: String,
        /// Value that was refused
        attempted: String,
    },

    /// The extension name is neither a known name nor a dotted OID.
    #[error("unknown extension {0}")]
    UnknownExtension(String),

    /// The extension value does not parse for its extension type.
    #[error("invalid value for extension {name}: {reason}")]
    InvalidExtension {
        /// Extension name
        name: String,
        /// What was wrong with the value
        reason: String,
    },

    /// A set-once field was written twice.
    #[error("{0} can only be set once")]
    AlreadySet(&'static str),

    /// `sign` was called before the issuer key and subject were set.
    #[error("certificate has no issuer key or issuer subject")]
    MissingIssuer,

    /// `sign` was called before a public key was set.
    #[error("certificate has no public key")]
    MissingPublicKey,

    /// The operation needs a signed certificate.
    #[error("certificate is not signed")]
    Unsigned,

    /// A GID lacks the identity data in its subjectAltName.
    #[error("certificate carries no identity: {0}")]
    MissingIdentity(String),

    /// A naming error while decoding identity data.
    #[error(transparent)]
    Xrn(#[from] XrnError),

    /// Reading or writing a certificate file failed.
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<der::Error> for CertificateError {
    fn from(e: der::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<std::io::Error> for CertificateError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Chain of trust failures from [`crate::Certificate::verify_chain`] and
/// [`crate::Gid::verify_chain`].
///
/// Subjects are reported in their short printable form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrustError {
    /// The certificate, or the trusted root that signed it, has expired.
    #[error("certificate {subject} has expired")]
    Expired {
        /// Expired certificate
        subject: String,
    },

    /// No trusted root signed the certificate and there is no parent to
    /// continue the chain.
    #[error("{subject}: issuer {issuer} is not one of the {trusted} trusted roots, and cert has no parent")]
    MissingParent {
        /// Certificate at the end of the chain
        subject: String,
        /// Its issuer name
        issuer: String,
        /// Number of trusted roots that were tried
        trusted: usize,
    },

    /// The parent did not sign the child, or is not a CA.
    #[error("{subject}: not signed by parent {parent}: {reason}")]
    NotSignedByParent {
        /// Child certificate
        subject: String,
        /// Parent certificate
        parent: String,
        /// Which check failed
        reason: String,
    },

    /// A GID's issuer is outside the namespace of the identity it signed.
    #[error("{parent} is not an authority for {child}")]
    NotAuthorityFor {
        /// Issuing authority HRN
        parent: String,
        /// Signed identity HRN
        child: String,
    },

    /// A GID was signed by an identity that is not an authority.
    #[error("{subject} is not an authority (type {kind})")]
    NotAnAuthority {
        /// Signer HRN
        subject: String,
        /// Signer GID type
        kind: String,
    },

    /// A certificate in the chain does not carry a usable identity.
    #[error("{subject}: {reason}")]
    InvalidIdentity {
        /// Offending certificate
        subject: String,
        /// Decoding failure
        reason: String,
    },
}

/// Errors converting between HRNs and URNs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XrnError {
    /// The string is not a `urn:publicid:IDN` URN.
    #[error("not a publicid URN: {0}")]
    NotUrn(String),

    /// The URN lacks the authority, type or name fields.
    #[error("malformed URN {0}")]
    MalformedUrn(String),

    /// The HRN is empty.
    #[error("empty HRN")]
    EmptyHrn,
}
