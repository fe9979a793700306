//! Signed, delegatable privilege credentials.
//!
//! A credential grants its caller a set of [`Rights`] over an object. The
//! issuer signs the `<credential>` element through a [`SignatureTool`]; a
//! holder may delegate it by embedding the signed credential as the parent
//! of a new one that they sign themselves. Each credential of the chain
//! keeps its own detached signature, so embedding never invalidates the
//! signatures already present.

mod verify;

use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
};

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeDelta, Utc};
use fedtrust_certificate::Gid;
use fedtrust_keypair::Keypair;

use crate::{
    document::{Document, Element, XML_ID},
    error::{CredentialError, ToolError},
    rights::{Right, Rights, WILDCARD, default_rights_for},
    signature::Signature,
    tool::{SignatureTool, signature_id, signature_template, top_credential},
};

/// Lifetime of a credential created without an expiration.
pub const DEFAULT_CREDENTIAL_LIFETIME_SECS: i64 = 86_400 * 31;

/// Type marker of these credentials in API envelopes.
pub const CREDENTIAL_TYPE: &str = "geni_sfa";

/// Format of `<expires>`.
pub const EXPIRES_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const SERIAL: &str = "8";
const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";
const SCHEMA_LOCATION: &str = "http://www.planet-lab.org/resources/sfa/credential.xsd";
const POLICY_LOCATION: &str = "http://www.planet-lab.org/resources/sfa/ext/policy/1 \
     http://www.planet-lab.org/resources/sfa/ext/policy/1/policy.xsd";

/// A credential and the chain it was delegated from.
#[derive(Debug, Clone)]
pub struct Credential {
    caller: Gid,
    object: Gid,
    privileges: Rights,
    expiration: DateTime<Utc>,
    parent: Option<Box<Credential>>,
    signature: Option<Signature>,
    refid: String,
    xml: Option<String>,
    issuer: Option<(Keypair, Gid)>,
    version: Option<String>,
    filename: Option<PathBuf>,
}

impl Credential {
    /// An unsigned credential granting `caller` the `privileges` over
    /// `object` until `expiration`, or for
    /// [`DEFAULT_CREDENTIAL_LIFETIME_SECS`] from now.
    pub fn new(
        caller: Gid,
        object: Gid,
        privileges: Rights,
        expiration: Option<DateTime<Utc>>,
    ) -> Self {
        let expiration = expiration.unwrap_or_else(|| {
            tracing::debug!(
                "creating credential valid for {DEFAULT_CREDENTIAL_LIFETIME_SECS} s"
            );
            Utc::now() + TimeDelta::seconds(DEFAULT_CREDENTIAL_LIFETIME_SECS)
        });
        Self {
            caller,
            object,
            privileges,
            expiration: expiration.trunc_subsecs(0),
            parent: None,
            signature: None,
            refid: "ref0".into(),
            xml: None,
            issuer: None,
            version: None,
            filename: None,
        }
    }

    /// Parse a credential document, its parents and their signatures.
    ///
    /// A `*` privilege expands to the default rights of the object's
    /// type, each inheriting the wildcard's delegate flag.
    ///
    /// # Errors
    ///
    /// - [`CredentialError::MalformedDocument`] if required parts are
    ///   missing or unreadable
    /// - [`CredentialError::Certificate`] if an embedded GID is invalid
    /// - [`CredentialError::Rights`] if a privilege is listed twice
    pub fn decode(xml: &str) -> Result<Self, CredentialError> {
        let document = Document::parse(xml)?;
        let root = document.root();

        let signatures: Vec<&Element> = if root.local_name() == "signed-credential" {
            root.child("signatures")
                .map(|signatures| signatures.children_named("Signature").collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        let credential = top_credential(root).ok_or_else(|| {
            CredentialError::MalformedDocument("no credential element found".into())
        })?;
        let signatures = signatures
            .into_iter()
            .map(Signature::from_element)
            .collect::<Result<Vec<_>, _>>()?;

        let mut decoded = Self::from_element(root, credential, &signatures)?;
        decoded.xml = Some(xml.to_string());
        Ok(decoded)
    }

    fn from_element(
        root: &Element,
        credential: &Element,
        signatures: &[Signature],
    ) -> Result<Self, CredentialError> {
        let required = |name: &str| {
            credential
                .child_text(name)
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty())
                .ok_or_else(|| CredentialError::MalformedDocument(format!("missing <{name}>")))
        };

        let refid = credential
            .attribute(XML_ID)
            .unwrap_or("ref0")
            .to_string();
        let expiration = parse_expires(&required("expires")?)?;
        let caller = Gid::load_from_string(&required("owner_gid")?)?;
        let object = Gid::load_from_string(&required("target_gid")?)?;

        let mut privileges = Rights::new();
        for privilege in credential
            .child("privileges")
            .into_iter()
            .flat_map(|privileges| privileges.children_named("privilege"))
        {
            let kind = privilege.child_text("name").unwrap_or_default();
            let kind = kind.trim();
            let delegate = privilege
                .child_text("can_delegate")
                .is_some_and(|flag| matches!(flag.trim().to_ascii_lowercase().as_str(), "true" | "1"));
            if kind == WILDCARD {
                for right in default_rights_for(object.gid_type().unwrap_or_default()).iter() {
                    if privileges.get(right.kind()).is_none() {
                        privileges.add(Right::with_delegate(right.kind(), delegate))?;
                    }
                }
            } else {
                privileges.add(Right::with_delegate(kind, delegate))?;
            }
        }

        let parent = match credential.child("parent") {
            Some(parent) => {
                let element = parent.child("credential").ok_or_else(|| {
                    CredentialError::MalformedDocument("empty <parent>".into())
                })?;
                Some(Box::new(Self::from_element(root, element, signatures)?))
            }
            None => None,
        };

        let mut decoded = Self {
            caller,
            object,
            privileges,
            expiration,
            parent,
            signature: signatures
                .iter()
                .find(|signature| signature.refid() == refid)
                .cloned(),
            refid,
            xml: None,
            issuer: None,
            version: None,
            filename: None,
        };
        decoded.xml = Some(decoded.standalone_document(root, credential)?);
        Ok(decoded)
    }

    /// A signed-credential document holding only this credential's element
    /// and the signatures of its chain.
    fn standalone_document(
        &self,
        root: &Element,
        credential: &Element,
    ) -> Result<String, CredentialError> {
        let mut signed = Element::new("signed-credential");
        for (name, value) in root.attributes() {
            signed.set_attribute(name, value);
        }
        signed.push(credential.clone());
        let mut signatures = Element::new("signatures");
        for signature in self.credential_list().into_iter().rev() {
            if let Some(signature) = &signature.signature {
                signatures.push(signature.element().clone());
            }
        }
        signed.push(signatures);
        Ok(Document::new(signed).to_xml()?)
    }

    /// Load a credential document from text.
    ///
    /// # Errors
    ///
    /// Rejects certificate-encoded legacy credentials with
    /// [`CredentialError::MalformedDocument`]; otherwise see
    /// [`Credential::decode`].
    pub fn load_from_string(text: &str) -> Result<Self, CredentialError> {
        if text.trim_start().starts_with("-----") {
            tracing::error!("legacy certificate credentials are not supported");
            return Err(CredentialError::MalformedDocument(
                "legacy certificate credentials are not supported".into(),
            ));
        }
        Self::decode(text)
    }

    /// Load a credential document from a file.
    ///
    /// # Errors
    ///
    /// [`CredentialError::Io`] if the file cannot be read, or see
    /// [`Credential::load_from_string`].
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref();
        let mut credential = Self::load_from_string(&std::fs::read_to_string(path)?)?;
        credential.filename = Some(path.to_path_buf());
        Ok(credential)
    }

    /// The document text, encoding it first if needed.
    ///
    /// # Errors
    ///
    /// See [`Credential::encode`].
    pub fn save_to_string(&mut self) -> Result<String, CredentialError> {
        if self.xml.is_none() {
            self.encode()?;
        }
        self.xml
            .clone()
            .ok_or_else(|| CredentialError::MalformedDocument("credential has no document".into()))
    }

    /// Write the document to `path`.
    ///
    /// # Errors
    ///
    /// See [`Credential::save_to_string`]; also [`CredentialError::Io`].
    pub fn save_to_file(&mut self, path: impl AsRef<Path>) -> Result<(), CredentialError> {
        let path = path.as_ref();
        std::fs::write(path, self.save_to_string()?)?;
        self.filename = Some(path.to_path_buf());
        Ok(())
    }

    /// The holder of the privileges.
    pub fn caller(&self) -> &Gid {
        &self.caller
    }

    /// The object the privileges apply to.
    pub fn object(&self) -> &Gid {
        &self.object
    }

    /// Granted privileges.
    pub fn privileges(&self) -> &Rights {
        &self.privileges
    }

    /// Expiration, in whole seconds.
    pub fn expiration(&self) -> DateTime<Utc> {
        self.expiration
    }

    /// The credential this one was delegated from.
    pub fn parent(&self) -> Option<&Credential> {
        self.parent.as_deref()
    }

    /// This credential's signature, once signed or decoded.
    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// Id of this credential's element, unique within the chain.
    pub fn refid(&self) -> &str {
        &self.refid
    }

    /// The encoded or signed document, if any.
    pub fn xml(&self) -> Option<&str> {
        self.xml.as_deref()
    }

    /// Envelope version this credential arrived with.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub(crate) fn set_version(&mut self, version: Option<String>) {
        self.version = version;
    }

    /// File the credential was loaded from or saved to.
    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    /// Whether the privileges allow `operation`.
    pub fn can_perform(&self, operation: &str) -> bool {
        self.privileges.can_perform(operation)
    }

    /// Replace the privileges.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::AlreadySigned`] once signed.
    pub fn set_privileges(&mut self, privileges: Rights) -> Result<(), CredentialError> {
        self.unsigned()?;
        self.privileges = privileges;
        self.xml = None;
        Ok(())
    }

    /// Replace the expiration; sub-second precision is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::AlreadySigned`] once signed.
    pub fn set_expiration(&mut self, expiration: DateTime<Utc>) -> Result<(), CredentialError> {
        self.unsigned()?;
        self.expiration = expiration.trunc_subsecs(0);
        self.xml = None;
        Ok(())
    }

    /// Make `parent` the credential this one is delegated from, and pick
    /// the lowest `refN` not used by any ancestor.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::AlreadySigned`] once signed.
    pub fn set_parent(&mut self, parent: Credential) -> Result<(), CredentialError> {
        self.unsigned()?;
        self.parent = Some(Box::new(parent));
        self.xml = None;
        self.update_refid();
        Ok(())
    }

    /// Key and GID used by [`Credential::sign`].
    pub fn set_issuer_keys(&mut self, key: Keypair, gid: Gid) {
        self.issuer = Some((key, gid));
    }

    fn unsigned(&self) -> Result<(), CredentialError> {
        match self.signature {
            Some(_) => Err(CredentialError::AlreadySigned),
            None => Ok(()),
        }
    }

    fn update_refid(&mut self) {
        let taken: Vec<&str> = self
            .credential_list()
            .into_iter()
            .skip(1)
            .map(Credential::refid)
            .collect();
        let refid = (0..)
            .map(|n| format!("ref{n}"))
            .find(|candidate| !taken.contains(&candidate.as_str()))
            .unwrap_or_else(|| "ref0".into());
        self.refid = refid;
    }

    /// This credential followed by its ancestors; the root grant is last.
    pub fn credential_list(&self) -> Vec<&Credential> {
        let mut list = Vec::new();
        let mut next = Some(self);
        while let Some(credential) = next {
            list.push(credential);
            next = credential.parent();
        }
        list
    }

    /// Build the unsigned document. A parent's signed element and every
    /// ancestor signature are copied in unchanged.
    ///
    /// # Errors
    ///
    /// - [`CredentialError::AlreadySigned`] once signed
    /// - [`CredentialError::UnsignedParent`] if the parent has no signature
    /// - [`CredentialError::Certificate`] if a GID cannot be serialized
    pub fn encode(&mut self) -> Result<(), CredentialError> {
        self.unsigned()?;

        let mut signed = Element::new("signed-credential")
            .with_attribute("xmlns:xsi", XSI_NAMESPACE)
            .with_attribute("xsi:noNamespaceSchemaLocation", SCHEMA_LOCATION)
            .with_attribute("xsi:schemaLocation", POLICY_LOCATION);

        let mut privileges = Element::new("privileges");
        for right in self.privileges.iter() {
            privileges.push(
                Element::new("privilege")
                    .with_child(Element::text_element("name", right.kind()))
                    .with_child(Element::text_element(
                        "can_delegate",
                        right.can_delegate().to_string(),
                    )),
            );
        }

        let mut credential = Element::new("credential")
            .with_attribute(XML_ID, self.refid.as_str())
            .with_child(Element::text_element("type", "privilege"))
            .with_child(Element::text_element("serial", SERIAL))
            .with_child(Element::text_element(
                "owner_gid",
                self.caller.save_to_string(true)?,
            ))
            .with_child(Element::text_element("owner_urn", self.caller.urn()))
            .with_child(Element::text_element(
                "target_gid",
                self.object.save_to_string(true)?,
            ))
            .with_child(Element::text_element("target_urn", self.object.urn()))
            .with_child(Element::new("uuid"))
            .with_child(Element::text_element(
                "expires",
                self.expiration.format(EXPIRES_FORMAT).to_string(),
            ))
            .with_child(privileges);

        let mut signatures = Element::new("signatures");
        if let Some(parent) = &self.parent {
            let parent_xml = match (&parent.xml, &parent.signature) {
                (Some(xml), Some(_)) => xml,
                _ => return Err(CredentialError::UnsignedParent(parent.refid.clone())),
            };
            let parent_document = Document::parse(parent_xml)?;
            let parent_root = parent_document.root();
            for (name, value) in parent_root.attributes() {
                if signed.attribute(name).is_some_and(|existing| existing != value) {
                    tracing::warn!(
                        attribute = name,
                        value,
                        "delegating {}: replacing root attribute",
                        self.object.urn()
                    );
                }
                signed.set_attribute(name, value);
            }
            let parent_credential = parent_root.child("credential").ok_or_else(|| {
                CredentialError::MalformedDocument("parent has no credential element".into())
            })?;
            credential.push(Element::new("parent").with_child(parent_credential.clone()));
            for signature in parent_root
                .child("signatures")
                .into_iter()
                .flat_map(|signatures| signatures.children_named("Signature"))
            {
                signatures.push(signature.clone());
            }
        }

        signed.push(credential);
        signed.push(signatures);
        self.xml = Some(Document::new(signed).to_xml()?);
        Ok(())
    }

    /// Sign this credential's element with the issuer keys, encoding first
    /// if needed, and bind the new signature.
    ///
    /// # Errors
    ///
    /// - [`CredentialError::AlreadySigned`] once signed
    /// - [`CredentialError::MissingIssuer`] without
    ///   [`Credential::set_issuer_keys`]
    /// - [`CredentialError::SigningToolUnavailable`],
    ///   [`CredentialError::SigningToolTimeout`] or
    ///   [`CredentialError::SigningFailed`] from the tool
    pub fn sign(&mut self, tool: &dyn SignatureTool) -> Result<(), CredentialError> {
        self.unsigned()?;
        let Some((key, issuer)) = self.issuer.clone() else {
            tracing::warn!("cannot sign credential without issuer key and GID");
            return Err(CredentialError::MissingIssuer);
        };
        if self.xml.is_none() {
            self.encode()?;
        }

        let mut document = Document::parse(self.xml.as_deref().unwrap_or_default())?;
        document
            .root_mut()
            .child_mut("signatures")
            .ok_or_else(|| CredentialError::MalformedDocument("missing <signatures>".into()))?
            .push(signature_template(&self.refid));
        let template = document.to_xml()?;

        let signed = tool
            .sign(&template, &signature_id(&self.refid), &key, &issuer)
            .map_err(|error| match error {
                ToolError::Unavailable(reason) => CredentialError::SigningToolUnavailable(reason),
                ToolError::Timeout(after) => CredentialError::SigningToolTimeout(after),
                ToolError::Failed(reason) => CredentialError::SigningFailed(reason),
            })?;

        let decoded = Self::decode(&signed)?;
        self.signature = decoded.signature;
        self.xml = Some(signed);
        Ok(())
    }

    /// Delegate this signed credential to `delegee`, signing the new
    /// credential with the current caller's key and GID.
    ///
    /// The child keeps the object, expiration and privilege kinds, with
    /// every delegate flag set; verification then bounds it by what this
    /// credential may delegate.
    ///
    /// # Errors
    ///
    /// [`CredentialError::UnsignedParent`] if this credential is not
    /// signed, or any error of [`Credential::sign`].
    pub fn delegate(
        &self,
        delegee: Gid,
        key: Keypair,
        issuer: Gid,
        tool: &dyn SignatureTool,
    ) -> Result<Credential, CredentialError> {
        if self.signature.is_none() {
            return Err(CredentialError::UnsignedParent(self.refid.clone()));
        }
        let mut privileges = self.privileges.clone();
        privileges.delegate_all(true);

        let mut child = Credential::new(
            delegee,
            self.object.clone(),
            privileges,
            Some(self.expiration),
        );
        child.set_parent(self.clone())?;
        child.set_issuer_keys(key, issuer);
        child.encode()?;
        child.sign(tool)?;
        Ok(child)
    }

    /// Best guess at who is really calling with this credential.
    ///
    /// A user caller under a non-user signer, or a caller inside the
    /// signer's namespace, is the caller; otherwise the credential looks
    /// delegated and the signer is returned. `None` when unsigned.
    pub fn actual_caller_hrn(&self) -> Option<String> {
        let issuer = self.signature.as_ref()?.issuer_gid();
        let caller_hrn = self.caller.hrn();
        let actual = if self.caller.gid_type() == Some("user") && issuer.gid_type() != Some("user")
        {
            caller_hrn
        } else if caller_hrn.starts_with(issuer.hrn()) {
            caller_hrn
        } else {
            issuer.hrn()
        };
        tracing::info!(
            caller_hrn,
            issuer_hrn = issuer.hrn(),
            actual,
            "resolved actual caller"
        );
        Some(actual.to_string())
    }

    /// `[Cred. for <caller> rights on <object> until <expiration> ]`.
    pub fn pretty_cred(&self) -> String {
        format!(
            "[Cred. for {} rights on {} until {} ]",
            self.caller.pretty_cert(),
            self.object.pretty_cert(),
            self.expiration.format(EXPIRES_FORMAT)
        )
    }

    /// Multi-line description, optionally with the parent chain.
    pub fn dump_string(&self, dump_parents: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "CREDENTIAL {}", self.object.pretty_cert());
        if let Some(filename) = &self.filename {
            let _ = writeln!(out, "Filename {}", filename.display());
        }
        let _ = writeln!(out, "      privs: {}", self.privileges);
        let _ = writeln!(out, "  gidCaller:");
        out.push_str(&indent(&self.caller.dump_string(false), 8));
        if let Some(signature) = &self.signature {
            let _ = writeln!(out, "  gidIssuer:");
            out.push_str(&indent(&signature.issuer_gid().dump_string(false), 8));
        }
        let _ = writeln!(
            out,
            "  expiration: {}",
            self.expiration.format(EXPIRES_FORMAT)
        );
        let _ = writeln!(out, "  gidObject:");
        out.push_str(&indent(&self.object.dump_string(false), 8));
        if let (Some(parent), true) = (&self.parent, dump_parents) {
            out.push_str("\nPARENT");
            out.push_str(&parent.dump_string(true));
        }
        out
    }
}

/// The credentials among `credentials` whose caller is one of `callers`.
/// Documents that do not parse are skipped.
pub fn filter_by_caller<'a>(credentials: &[&'a str], callers: &[&str]) -> Vec<&'a str> {
    credentials
        .iter()
        .copied()
        .filter(|text| {
            Credential::load_from_string(text)
                .is_ok_and(|credential| callers.contains(&credential.caller().hrn()))
        })
        .collect()
}

fn parse_expires(text: &str) -> Result<DateTime<Utc>, CredentialError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.with_timezone(&Utc).trunc_subsecs(0));
    }
    ["%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc().trunc_subsecs(0))
        .ok_or_else(|| CredentialError::MalformedDocument(format!("bad expiration {text:?}")))
}

fn indent(text: &str, width: usize) -> String {
    text.lines()
        .map(|line| format!("{:width$}{line}\n", ""))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    #[test]
    fn it_parses_expiration_formats() -> TestResult {
        let expected = Utc.with_ymd_and_hms(2031, 4, 5, 6, 7, 8).single().ok_or("time")?;
        assert_eq!(parse_expires("2031-04-05T06:07:08Z")?, expected);
        assert_eq!(parse_expires("2031-04-05T06:07:08.250Z")?, expected);
        assert_eq!(parse_expires("2031-04-05T06:07:08")?, expected);
        assert_eq!(parse_expires("2031-04-05 06:07:08")?, expected);
        assert!(matches!(
            parse_expires("next tuesday"),
            Err(CredentialError::MalformedDocument(_))
        ));
        Ok(())
    }

    #[test]
    fn it_indents_dumps() {
        assert_eq!(indent("a\nb", 2), "  a\n  b\n");
    }
}
