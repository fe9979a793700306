use fedtrust_certificate::Gid;

use crate::{
    document::{Document, Element},
    error::CredentialError,
    tool::{embedded_chain, referenced_id},
};

/// A signature block bound to one credential of a chain.
#[derive(Debug, Clone)]
pub struct Signature {
    refid: String,
    issuer_gid: Gid,
    element: Element,
}

impl Signature {
    /// Read the refid and signer GID from a `<Signature>` element.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::MalformedDocument`] if the element names
    /// no credential or carries no certificate.
    pub fn from_element(element: &Element) -> Result<Self, CredentialError> {
        let refid = referenced_id(element).ok_or_else(|| {
            CredentialError::MalformedDocument("signature does not name a credential".into())
        })?;
        let chain = embedded_chain(element).ok_or_else(|| {
            CredentialError::MalformedDocument("no certificate found in signature".into())
        })?;
        Ok(Self {
            refid,
            issuer_gid: Gid::load_from_string(&chain)?,
            element: element.clone(),
        })
    }

    /// Parse a standalone signature document.
    ///
    /// # Errors
    ///
    /// See [`Signature::from_element`].
    pub fn decode(xml: &str) -> Result<Self, CredentialError> {
        let document = Document::parse(xml)?;
        let root = document.root();
        let element = if root.local_name() == "Signature" {
            root
        } else {
            root.descendants_named("Signature")
                .into_iter()
                .next()
                .ok_or_else(|| CredentialError::MalformedDocument("no <Signature>".into()))?
        };
        Self::from_element(element)
    }

    /// The credential this signature covers.
    pub fn refid(&self) -> &str {
        &self.refid
    }

    /// The signer, with the chain embedded in the block.
    pub fn issuer_gid(&self) -> &Gid {
        &self.issuer_gid
    }

    /// The `<Signature>` element as found in the document.
    pub fn element(&self) -> &Element {
        &self.element
    }
}
