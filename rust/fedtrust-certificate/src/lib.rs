//! Certificates, chains of trust and global identifiers.
//!
//! [`Certificate`] wraps one X.509 v3 certificate plus the chain of parents
//! that signed it. Chains serialize as concatenated PEM blocks, leaf first,
//! and verify against an ordered list of trusted roots with
//! [`Certificate::verify_chain`].
//!
//! [`Gid`] specializes a certificate to name a federation object (a user,
//! slice, node or authority) by [`Xrn`], and adds the naming-hierarchy
//! checks to chain verification.

pub mod certificate;
pub mod chain;
pub mod error;
pub mod extension;
pub mod gid;
pub mod xrn;

pub use certificate::{Certificate, DEFAULT_LIFETIME_DAYS, PARENT_SEPARATOR};
pub use error::{CertificateError, TrustError, XrnError};
pub use extension::{
    BASIC_CONSTRAINTS, ExtensionEntry, ExtensionMap, SUBJECT_ALT_NAME, TICKET_DATA,
    TICKET_DATA_OID,
};
pub use gid::{Gid, GidBuilder, decode_identity, encode_identity};
pub use xrn::{URN_PREFIX, Xrn, hrn_authority_for, hrn_to_urn, is_urn, urn_to_hrn};
