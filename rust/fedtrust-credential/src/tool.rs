//! XML signature tools.
//!
//! A credential is signed one node at a time: the tool fills the
//! `<Signature xml:id="Sig_<refid>">` block that references the
//! credential element `xml:id="<refid>"`, and leaves every other signature
//! in the document untouched. [`Xmlsec1`] shells out to the `xmlsec1`
//! utility; [`InProcessSigner`] produces RSA-SHA256 signatures over this
//! crate's own serialization and needs no external program.

mod in_process;
mod xmlsec1;

pub use in_process::*;
pub use xmlsec1::*;

use std::{path::PathBuf, time::Duration};

use fedtrust_certificate::{Certificate, Gid};
use fedtrust_keypair::Keypair;
use serde::Deserialize;

use crate::{document::Element, document::XML_ID, error::ToolError};

/// XML-DSig namespace.
pub const XMLDSIG_NAMESPACE: &str = "http://www.w3.org/2000/09/xmldsig#";
/// Canonicalization algorithm named in signature templates.
pub const C14N_ALGORITHM: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
/// Signature algorithm named in signature templates.
pub const RSA_SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
/// Digest algorithm named in signature templates.
pub const SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
/// Transform excluding the signature from its own digest.
pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

/// Signs and verifies one signature node of an XML document.
pub trait SignatureTool: Send + Sync {
    /// Fill the signature node `node_id` of `document` with a signature by
    /// `key`, embedding the certificate chain of `issuer`. Returns the
    /// signed document.
    ///
    /// # Errors
    ///
    /// - [`ToolError::Unavailable`] if the tool cannot run
    /// - [`ToolError::Timeout`] if it does not finish in time
    /// - [`ToolError::Failed`] if signing fails
    fn sign(
        &self,
        document: &str,
        node_id: &str,
        key: &Keypair,
        issuer: &Gid,
    ) -> Result<String, ToolError>;

    /// Check the signature node `node_id` of `document`, and that its
    /// signer chains to one of `trusted`.
    ///
    /// # Errors
    ///
    /// As [`SignatureTool::sign`]; [`ToolError::Failed`] means the
    /// signature is invalid.
    fn verify(
        &self,
        document: &str,
        node_id: &str,
        trusted: &[Certificate],
    ) -> Result<(), ToolError>;
}

/// Settings for locating and running external tools.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Explicit path to the `xmlsec1` binary; skips the search.
    pub path: Option<PathBuf>,
    /// Directories searched, in order, before `PATH`.
    pub search_dirs: Vec<PathBuf>,
    /// Upper bound on one tool invocation, in seconds.
    pub timeout_secs: u64,
}

impl ToolConfig {
    /// [`ToolConfig::timeout_secs`] as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            path: None,
            search_dirs: [
                "/usr/bin",
                "/usr/local/bin",
                "/bin",
                "/opt/bin",
                "/opt/local/bin",
            ]
            .into_iter()
            .map(PathBuf::from)
            .collect(),
            timeout_secs: 30,
        }
    }
}

/// `Sig_<refid>`, the id of the signature node for credential `refid`.
pub fn signature_id(refid: &str) -> String {
    format!("Sig_{refid}")
}

/// An empty XML-DSig block for the credential element `refid`.
pub fn signature_template(refid: &str) -> Element {
    let algorithm = |name: &str, uri: &str| Element::new(name).with_attribute("Algorithm", uri);

    Element::new("Signature")
        .with_attribute(XML_ID, signature_id(refid))
        .with_attribute("xmlns", XMLDSIG_NAMESPACE)
        .with_child(
            Element::new("SignedInfo")
                .with_child(algorithm("CanonicalizationMethod", C14N_ALGORITHM))
                .with_child(algorithm("SignatureMethod", RSA_SHA256_ALGORITHM))
                .with_child(
                    Element::new("Reference")
                        .with_attribute("URI", format!("#{refid}"))
                        .with_child(
                            Element::new("Transforms")
                                .with_child(algorithm("Transform", ENVELOPED_SIGNATURE)),
                        )
                        .with_child(algorithm("DigestMethod", SHA256_ALGORITHM))
                        .with_child(Element::new("DigestValue")),
                ),
        )
        .with_child(Element::new("SignatureValue"))
        .with_child(
            Element::new("KeyInfo")
                .with_child(
                    Element::new("X509Data")
                        .with_child(Element::new("X509SubjectName"))
                        .with_child(Element::new("X509IssuerSerial"))
                        .with_child(Element::new("X509Certificate")),
                )
                .with_child(Element::new("KeyValue")),
        )
}

/// The credential id named by the signed `SignedInfo/Reference/@URI`.
pub fn signed_reference(signature: &Element) -> Option<String> {
    signature
        .child("SignedInfo")?
        .child("Reference")?
        .attribute("URI")
        .map(|uri| uri.trim().trim_start_matches('#').to_string())
        .filter(|id| !id.is_empty())
}

/// The credential id a signature element points at: the signed
/// reference, else the signature's own `xml:id` minus `Sig_`.
pub fn referenced_id(signature: &Element) -> Option<String> {
    signed_reference(signature).or_else(|| {
        signature
            .attribute(XML_ID)
            .map(|id| {
                let id = id.trim();
                id.strip_prefix("Sig_").unwrap_or(id).to_string()
            })
            .filter(|id| !id.is_empty())
    })
}

/// The credential element a document holds at its top level: the root
/// itself, the `credential` child of any other root, or failing that the
/// first `credential` descendant.
pub fn top_credential(root: &Element) -> Option<&Element> {
    if root.local_name() == "credential" {
        return Some(root);
    }
    root.child("credential")
        .or_else(|| root.descendants_named("credential").into_iter().next())
}

/// The credential `refid` on the chain running from the top-level
/// credential through each `parent/credential`. Elements elsewhere in the
/// document are never returned.
pub fn bound_credential<'a>(root: &'a Element, refid: &str) -> Option<&'a Element> {
    let mut next = top_credential(root);
    while let Some(credential) = next {
        if credential.attribute(XML_ID) == Some(refid) {
            return Some(credential);
        }
        next = credential
            .child("parent")
            .and_then(|parent| parent.child("credential"));
    }
    None
}

/// PEM chain of the certificates embedded in a signature, leaf first.
pub fn embedded_chain(signature: &Element) -> Option<String> {
    let pem: String = signature
        .descendants_named("X509Certificate")
        .into_iter()
        .map(|certificate| certificate.text().trim().to_string())
        .filter(|body| !body.is_empty())
        .map(|body| format!("-----BEGIN CERTIFICATE-----\n{body}\n-----END CERTIFICATE-----\n"))
        .collect();
    (!pem.is_empty()).then_some(pem)
}
