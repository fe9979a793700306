//! Signed, delegatable federation credentials.
//!
//! A [`Credential`] grants a caller [`Rights`] over an object, both named
//! by GIDs, and is signed node by node through a [`SignatureTool`]. Holders
//! delegate by wrapping a signed credential as the parent of a new one;
//! [`Credential::verify`] walks the whole chain against trusted roots.
//!
//! [`Ticket`]s carry provisioning data in a signed certificate.

pub mod clock;
pub mod credential;
pub mod document;
pub mod envelope;
pub mod error;
pub mod rights;
pub mod schema;
pub mod signature;
pub mod ticket;
pub mod tool;

pub use clock::{Clock, FixedClock, SystemClock};
pub use credential::{
    CREDENTIAL_TYPE, Credential, DEFAULT_CREDENTIAL_LIFETIME_SECS, EXPIRES_FORMAT,
    filter_by_caller,
};
pub use document::{Document, Element, Node};
pub use envelope::{CREDENTIAL_VERSION, CredentialEnvelope};
pub use error::{CredentialError, DelegationBreach, DocumentError, RightsError, ToolError};
pub use rights::{Right, Rights, WILDCARD, default_rights_for, operations};
pub use schema::{CredentialSchema, DocumentSchema};
pub use signature::Signature;
pub use ticket::Ticket;
pub use tool::{InProcessSigner, SignatureTool, ToolConfig, Xmlsec1};
