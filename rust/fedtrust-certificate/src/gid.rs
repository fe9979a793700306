//! Global identifiers: certificates that name a federation object.
//!
//! A GID is a [`Certificate`] whose `subjectAltName` carries the object's
//! URN, a UUID and an optional contact address:
//!
//! ```text
//! URI:urn:publicid:IDN+plc:princeton+user+alice, URI:urn:uuid:6f1c..., email:alice@example.org
//! ```
//!
//! The HRN and type are derived from the URN. Authorities mint a
//! self-signed CA GID as the root of their naming branch and sign the GIDs
//! of everything below it.

use std::{ops::Deref, path::Path};

use chrono::{DateTime, Utc};
use fedtrust_keypair::Keypair;
use uuid::Uuid;

use crate::{
    certificate::{Certificate, DEFAULT_LIFETIME_DAYS},
    error::{CertificateError, TrustError},
    extension::SUBJECT_ALT_NAME,
    xrn::{Xrn, hrn_authority_for, is_urn},
};

/// A certificate bound to a federation name.
#[derive(Debug, Clone)]
pub struct Gid {
    certificate: Certificate,
    xrn: Xrn,
    uuid: Option<Uuid>,
    email: Option<String>,
}

impl Gid {
    /// Start building a GID for `xrn`.
    pub fn builder(xrn: Xrn) -> GidBuilder {
        GidBuilder {
            xrn,
            uuid: None,
            email: None,
            is_ca: None,
            lifetime_days: DEFAULT_LIFETIME_DAYS,
        }
    }

    /// Mint a GID for `xrn` holding `pubkey`, signed with `issuer_key`.
    ///
    /// With an `issuer` GID the new GID chains to it; without one it is
    /// self-signed. Authority types are minted as CAs.
    ///
    /// # Errors
    ///
    /// Returns any [`CertificateError`] raised while building or signing.
    pub fn create(
        xrn: &Xrn,
        uuid: Option<Uuid>,
        pubkey: &Keypair,
        issuer_key: &Keypair,
        issuer: Option<&Gid>,
        email: Option<&str>,
    ) -> Result<Self, CertificateError> {
        let mut builder = Self::builder(xrn.clone());
        if let Some(uuid) = uuid {
            builder = builder.uuid(uuid);
        }
        if let Some(email) = email {
            builder = builder.email(email);
        }
        builder.issue(pubkey, issuer_key, issuer)
    }

    /// Mint the self-signed CA GID of the authority `hrn`.
    ///
    /// # Errors
    ///
    /// Returns any [`CertificateError`] raised while building or signing.
    pub fn create_authority(hrn: &str, keypair: &Keypair) -> Result<Self, CertificateError> {
        Self::builder(Xrn::from_hrn(hrn, Some("authority"))?)
            .ca(true)
            .issue(keypair, keypair, None)
    }

    /// Load a GID chain from PEM text.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::MissingIdentity`] if the leaf certificate
    /// does not name an object, or any load error.
    pub fn load_from_string(text: &str) -> Result<Self, CertificateError> {
        Self::try_from(Certificate::load_from_string(text)?)
    }

    /// Load a GID chain from a file.
    ///
    /// # Errors
    ///
    /// See [`Gid::load_from_string`].
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, CertificateError> {
        Self::try_from(Certificate::load_from_file(path)?)
    }

    /// Write the GID chain to a file.
    ///
    /// # Errors
    ///
    /// See [`Certificate::save_to_file`].
    pub fn save_to_file(
        &mut self,
        path: impl AsRef<Path>,
        include_parents: bool,
    ) -> Result<(), CertificateError> {
        self.certificate.save_to_file(path, include_parents)
    }

    /// The object's name.
    pub fn xrn(&self) -> &Xrn {
        &self.xrn
    }

    /// The dotted HRN.
    pub fn hrn(&self) -> &str {
        self.xrn.hrn()
    }

    /// The URN.
    pub fn urn(&self) -> &str {
        self.xrn.urn()
    }

    /// The object type taken from the URN (`user`, `slice`, `authority`, ...).
    pub fn gid_type(&self) -> Option<&str> {
        self.xrn.kind()
    }

    /// Whether the GID names an authority of any kind.
    pub fn is_authority(&self) -> bool {
        self.xrn.is_authority()
    }

    /// The UUID, if carried.
    pub fn uuid(&self) -> Option<&Uuid> {
        self.uuid.as_ref()
    }

    /// The contact address, if carried.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// The underlying certificate chain.
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Give up the identity view.
    pub fn into_certificate(self) -> Certificate {
        self.certificate
    }

    /// The issuer's GID, if the chain carries it.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent certificate does not name an object.
    pub fn parent_gid(&self) -> Result<Option<Gid>, CertificateError> {
        self.certificate
            .parent()
            .map(|parent| Gid::try_from(parent.clone()))
            .transpose()
    }

    /// Verify the certificate chain and the naming hierarchy as of now.
    ///
    /// # Errors
    ///
    /// See [`Gid::verify_chain_at`].
    pub fn verify_chain<'a>(
        &self,
        trusted: &'a [Certificate],
    ) -> Result<&'a Certificate, TrustError> {
        self.verify_chain_at(trusted, Utc::now())
    }

    /// Verify the certificate chain, then check that every signer in it is
    /// an authority whose HRN encloses the HRN it signed.
    ///
    /// # Errors
    ///
    /// - any error of [`Certificate::verify_chain_at`]
    /// - [`TrustError::NotAuthorityFor`] if a signer's namespace does not
    ///   cover the signed name
    /// - [`TrustError::NotAnAuthority`] if a signer is not an authority
    /// - [`TrustError::InvalidIdentity`] if a signer carries no name
    pub fn verify_chain_at<'a>(
        &self,
        trusted: &'a [Certificate],
        now: DateTime<Utc>,
    ) -> Result<&'a Certificate, TrustError> {
        let root = self.certificate.verify_chain_at(trusted, now)?;

        let invalid = |certificate: &Certificate, error: CertificateError| {
            TrustError::InvalidIdentity {
                subject: certificate.pretty_name(),
                reason: error.to_string(),
            }
        };
        match self.parent_gid() {
            Ok(Some(parent)) => {
                self.check_signer(&parent)?;
                parent.verify_chain_at(trusted, now)?;
            }
            Ok(None) => {
                let root_gid =
                    Gid::try_from(root.clone()).map_err(|error| invalid(root, error))?;
                self.check_signer(&root_gid)?;
            }
            Err(error) => return Err(invalid(&self.certificate, error)),
        }
        Ok(root)
    }

    fn check_signer(&self, signer: &Gid) -> Result<(), TrustError> {
        if !hrn_authority_for(signer.hrn(), self.hrn()) {
            return Err(TrustError::NotAuthorityFor {
                parent: signer.hrn().to_string(),
                child: self.hrn().to_string(),
            });
        }
        if !signer.is_authority() {
            return Err(TrustError::NotAnAuthority {
                subject: signer.hrn().to_string(),
                kind: signer.gid_type().unwrap_or_default().to_string(),
            });
        }
        Ok(())
    }
}

/// The `subjectAltName` text for an identity.
pub fn encode_identity(urn: &str, uuid: Option<&Uuid>, email: Option<&str>) -> String {
    let mut parts = vec![format!("URI:{urn}")];
    if let Some(uuid) = uuid {
        parts.push(format!("URI:urn:uuid:{uuid}"));
    }
    if let Some(email) = email {
        parts.push(format!("email:{email}"));
    }
    parts.join(", ")
}

/// Parse `subjectAltName` text into `(xrn, uuid, email)`.
///
/// # Errors
///
/// Returns [`CertificateError::MissingIdentity`] when no publicid URN is
/// present.
pub fn decode_identity(
    data: &str,
) -> Result<(Xrn, Option<Uuid>, Option<String>), CertificateError> {
    let mut xrn = None;
    let mut uuid = None;
    let mut email = None;
    for item in data.split(',').map(str::trim) {
        if let Some(uri) = item.strip_prefix("URI:") {
            if let Some(id) = uri.strip_prefix("urn:uuid:") {
                uuid = Uuid::parse_str(id).ok();
            } else if is_urn(uri) {
                xrn = Some(Xrn::from_urn(uri)?);
            }
        } else if let Some(address) = item.strip_prefix("email:") {
            email = Some(address.to_string());
        }
    }
    let xrn = xrn.ok_or_else(|| CertificateError::MissingIdentity(data.to_string()))?;
    Ok((xrn, uuid, email))
}

impl TryFrom<Certificate> for Gid {
    type Error = CertificateError;

    fn try_from(certificate: Certificate) -> Result<Self, Self::Error> {
        let data = certificate
            .get_data(SUBJECT_ALT_NAME)
            .ok_or_else(|| CertificateError::MissingIdentity(certificate.subject()))?;
        let (xrn, uuid, email) = decode_identity(data)?;
        Ok(Self {
            certificate,
            xrn,
            uuid,
            email,
        })
    }
}

impl From<Gid> for Certificate {
    fn from(gid: Gid) -> Self {
        gid.certificate
    }
}

impl Deref for Gid {
    type Target = Certificate;

    fn deref(&self) -> &Self::Target {
        &self.certificate
    }
}

/// Builder for [`Gid`]s; see [`Gid::builder`].
#[derive(Debug, Clone)]
pub struct GidBuilder {
    xrn: Xrn,
    uuid: Option<Uuid>,
    email: Option<String>,
    is_ca: Option<bool>,
    lifetime_days: u32,
}

impl GidBuilder {
    /// Use this UUID instead of a fresh random one.
    pub fn uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    /// Attach a contact address.
    pub fn email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    /// Mark the GID as a CA or not. Defaults to whether the type is an
    /// authority type; set it to mint sub-authorities.
    pub fn ca(mut self, is_ca: bool) -> Self {
        self.is_ca = Some(is_ca);
        self
    }

    /// Certificate lifetime in days.
    pub fn lifetime_days(mut self, days: u32) -> Self {
        self.lifetime_days = days;
        self
    }

    /// Sign the GID for `subject_key` with `issuer_key`.
    ///
    /// `issuer` is the issuing authority's GID, or `None` to self-sign.
    ///
    /// # Errors
    ///
    /// Returns any [`CertificateError`] raised while building or signing.
    pub fn issue(
        self,
        subject_key: &Keypair,
        issuer_key: &Keypair,
        issuer: Option<&Gid>,
    ) -> Result<Gid, CertificateError> {
        let uuid = self.uuid.unwrap_or_else(Uuid::new_v4);
        let is_ca = self.is_ca.unwrap_or_else(|| self.xrn.is_authority());

        let mut certificate = Certificate::create(self.lifetime_days)?;
        certificate.set_subject(self.xrn.hrn())?;
        certificate.set_pubkey(subject_key)?;
        certificate.set_data(
            SUBJECT_ALT_NAME,
            &encode_identity(self.xrn.urn(), Some(&uuid), self.email.as_deref()),
        )?;
        certificate.set_is_ca(is_ca)?;
        match issuer {
            Some(issuer) => {
                certificate.set_issuer_from(issuer_key.clone(), issuer);
                certificate.set_parent(issuer.certificate().clone());
            }
            None => certificate.set_issuer(issuer_key.clone(), self.xrn.hrn())?,
        }
        certificate.sign()?;

        Ok(Gid {
            certificate,
            xrn: self.xrn,
            uuid: Some(uuid),
            email: self.email,
        })
    }
}
