//! Error types for rights, documents, signing tools and credentials.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use fedtrust_certificate::{CertificateError, TrustError};
use fedtrust_keypair::KeyError;

/// Errors building a [`crate::Rights`] set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RightsError {
    /// A right of this kind is already present.
    #[error("duplicate right {0}")]
    Duplicate(String),

    /// An entry of a rights string does not parse.
    #[error("malformed right {0:?}")]
    Malformed(String),
}

/// Errors reading or shaping a credential document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    /// The text is not well-formed XML.
    #[error("xml parse error: {0}")]
    Parse(String),

    /// A required element is absent.
    #[error("missing element <{0}>")]
    MissingElement(String),

    /// An element is present but its content is wrong.
    #[error("invalid <{element}>: {reason}")]
    Invalid {
        /// Element name
        element: String,
        /// What was wrong
        reason: String,
    },
}

/// Failures of an XML signature tool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// The tool cannot be found or started.
    #[error("signing tool unavailable: {0}")]
    Unavailable(String),

    /// The tool did not finish in time.
    #[error("signing tool timed out after {0:?}")]
    Timeout(Duration),

    /// The tool ran and reported failure.
    #[error("signing tool failed: {0}")]
    Failed(String),
}

/// Which part of the delegation invariant a child credential breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationBreach {
    /// The child holds rights the parent cannot delegate.
    RightsNotSubset,
    /// The child is about a different object.
    ObjectMismatch,
    /// The child outlives the parent.
    ExpirationExceedsParent,
    /// The child was not signed by the parent's caller.
    SignerMismatch,
}

impl fmt::Display for DelegationBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RightsNotSubset => "rights-not-subset",
            Self::ObjectMismatch => "object-mismatch",
            Self::ExpirationExceedsParent => "expiration-exceeds-parent",
            Self::SignerMismatch => "signer-mismatch",
        })
    }
}

/// Errors from encoding, signing, decoding and verifying credentials.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// The document is not a well-formed credential.
    #[error("malformed credential document: {0}")]
    MalformedDocument(String),

    /// The credential is past its expiration.
    #[error("credential expired at {0}")]
    Expired(DateTime<Utc>),

    /// A caller or object GID in the chain does not verify against the
    /// trusted roots.
    #[error("GID {hrn} is not trusted: {source}")]
    GidNotTrusted {
        /// HRN of the GID that failed
        hrn: String,
        /// Why the chain failed
        source: TrustError,
    },

    /// A signature block does not verify.
    #[error("signature {refid} is invalid: {reason}")]
    SignatureInvalid {
        /// Credential whose signature failed
        refid: String,
        /// Tool output or missing piece
        reason: String,
    },

    /// A delegated credential breaks the delegation invariant.
    #[error("credential {refid} breaks delegation: {breach}")]
    DelegationInvariant {
        /// Child credential
        refid: String,
        /// Which check failed
        breach: DelegationBreach,
    },

    /// The root credential's signer has no authority over its object.
    #[error("issuer {issuer} is not an authority for {object}")]
    UntrustedIssuer {
        /// Signer HRN
        issuer: String,
        /// Object HRN
        object: String,
    },

    /// The XML signature tool could not be found or started.
    #[error("signing tool unavailable: {0}")]
    SigningToolUnavailable(String),

    /// The XML signature tool did not finish in time.
    #[error("signing tool timed out after {0:?}")]
    SigningToolTimeout(Duration),

    /// The XML signature tool failed to sign.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// The credential already carries a signature and cannot be re-encoded.
    #[error("credential is already signed")]
    AlreadySigned,

    /// A parent credential must be signed before a child embeds it.
    #[error("parent credential {0} is not signed")]
    UnsignedParent(String),

    /// Signing needs issuer keys; see `set_issuer_keys`.
    #[error("no issuer key and GID set")]
    MissingIssuer,

    /// A GID could not be built or serialized.
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// Key material is unusable.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The privilege list is invalid.
    #[error(transparent)]
    Rights(#[from] RightsError),

    /// Reading or writing a credential file failed.
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<DocumentError> for CredentialError {
    fn from(e: DocumentError) -> Self {
        Self::MalformedDocument(e.to_string())
    }
}

impl From<std::io::Error> for CredentialError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CredentialError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedDocument(e.to_string())
    }
}
