//! A single X.509 certificate with an optional owned parent chain.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use base64::prelude::*;
use chrono::{DateTime, TimeDelta, Utc};
use der::{
    Any, AnyRef, Decode, Encode, EncodePem, Tag,
    asn1::{BitString, GeneralizedTime, SetOfVec, UtcTime},
    oid::ObjectIdentifier,
    pem::LineEnding,
};
use fedtrust_keypair::Keypair;
use tracing::debug;
use x509_cert::{
    TbsCertificate,
    attr::AttributeTypeAndValue,
    certificate::Version,
    name::{Name, RdnSequence, RelativeDistinguishedName},
    serial_number::SerialNumber,
    spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned},
    time::{Time, Validity},
};

use crate::{
    error::CertificateError,
    extension::{BASIC_CONSTRAINTS, ExtensionMap, SUBJECT_ALT_NAME},
};

/// Lifetime of a freshly created certificate, five years.
pub const DEFAULT_LIFETIME_DAYS: u32 = 1825;

/// Explicit marker between a certificate and its parent in a chain blob.
pub const PARENT_SEPARATOR: &str = "-----parent-----";

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

/// An X.509 v3 certificate under construction or loaded from PEM.
///
/// Fields are edited through setters and only become a real certificate
/// once [`Certificate::sign`] runs. Any edit after signing drops the
/// signature, so a certificate is never serialized with stale content.
///
/// `parent` owns the rest of the chain: the certificate that signed this
/// one, then the one that signed it, up to some root.
#[derive(Clone)]
pub struct Certificate {
    serial: SerialNumber,
    subject: Name,
    issuer: Name,
    validity: Validity,
    public_key: Option<SubjectPublicKeyInfoOwned>,
    extensions: ExtensionMap,
    is_ca: Option<bool>,
    issuer_key: Option<Keypair>,
    issuer_subject: Option<Name>,
    parent: Option<Box<Certificate>>,
    signed: Option<x509_cert::Certificate>,
    filename: Option<PathBuf>,
}

impl Certificate {
    /// A blank, unsigned certificate valid from now for `lifetime_days`.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::Malformed`] if the validity window cannot
    /// be represented.
    pub fn create(lifetime_days: u32) -> Result<Self, CertificateError> {
        let not_before = Utc::now();
        let not_after = not_before + TimeDelta::days(i64::from(lifetime_days));
        Ok(Self {
            serial: random_serial()?,
            subject: Name::default(),
            issuer: Name::default(),
            validity: Validity {
                not_before: to_time(not_before)?,
                not_after: to_time(not_after)?,
            },
            public_key: None,
            extensions: ExtensionMap::new(),
            is_ca: None,
            issuer_key: None,
            issuer_subject: None,
            parent: None,
            signed: None,
            filename: None,
        })
    }

    fn from_x509(x509: x509_cert::Certificate) -> Self {
        let tbs = &x509.tbs_certificate;
        Self {
            serial: tbs.serial_number.clone(),
            subject: tbs.subject.clone(),
            issuer: tbs.issuer.clone(),
            validity: tbs.validity,
            public_key: Some(tbs.subject_public_key_info.clone()),
            extensions: ExtensionMap::from_x509(tbs.extensions.as_deref().unwrap_or_default()),
            is_ca: None,
            issuer_key: None,
            issuer_subject: None,
            parent: None,
            signed: Some(x509),
            filename: None,
        }
    }

    /// Load a certificate, and any chain following it, from text.
    ///
    /// Accepts a bare base64 DER blob, one PEM block, or several PEM blocks
    /// (optionally split by [`PARENT_SEPARATOR`]). Text before the first
    /// PEM block is skipped. Every block after the first becomes the
    /// parent chain.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::Malformed`] if a block does not decode.
    pub fn load_from_string(text: &str) -> Result<Self, CertificateError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CertificateError::Malformed("empty certificate string".into()));
        }
        let Some(begin) = text.find("-----BEGIN CERTIFICATE") else {
            return Ok(Self::from_x509(x509_cert::Certificate::from_der(
                &decode_base64(text)?,
            )?));
        };
        let text = &text[begin..];

        let (first, rest) =
            if text.matches(PEM_BEGIN).count() > 1 && !text.contains(PARENT_SEPARATOR) {
                match text.split_once(PEM_END) {
                    Some((first, rest)) => (first, rest),
                    None => (text, ""),
                }
            } else {
                text.split_once(PARENT_SEPARATOR).unwrap_or((text, ""))
            };

        let mut certificate = Self::from_x509(x509_cert::Certificate::from_der(
            &decode_pem_block(first)?,
        )?);
        if !rest.trim().is_empty() {
            certificate.parent = Some(Box::new(Self::load_from_string(rest)?));
        }
        Ok(certificate)
    }

    /// Load a certificate chain from a file.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::Io`] if the file cannot be read, or any
    /// error from [`Certificate::load_from_string`].
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, CertificateError> {
        let path = path.as_ref();
        let mut certificate = Self::load_from_string(&std::fs::read_to_string(path)?)?;
        certificate.filename = Some(path.to_path_buf());
        Ok(certificate)
    }

    /// PEM for this certificate, followed by its parents when
    /// `include_parents` is set.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::Unsigned`] if any certificate written is
    /// not signed.
    pub fn save_to_string(&self, include_parents: bool) -> Result<String, CertificateError> {
        let signed = self.signed.as_ref().ok_or(CertificateError::Unsigned)?;
        let mut text = signed.to_pem(LineEnding::LF)?;
        if include_parents {
            if let Some(parent) = &self.parent {
                text.push_str(&parent.save_to_string(true)?);
            }
        }
        Ok(text)
    }

    /// Write the PEM chain to `path`.
    ///
    /// # Errors
    ///
    /// See [`Certificate::save_to_string`]; also [`CertificateError::Io`].
    pub fn save_to_file(
        &mut self,
        path: impl AsRef<Path>,
        include_parents: bool,
    ) -> Result<(), CertificateError> {
        let path = path.as_ref();
        std::fs::write(path, self.save_to_string(include_parents)?)?;
        self.filename = Some(path.to_path_buf());
        Ok(())
    }

    /// DER of this certificate alone.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::Unsigned`] before signing.
    pub fn to_der(&self) -> Result<Vec<u8>, CertificateError> {
        Ok(self
            .signed
            .as_ref()
            .ok_or(CertificateError::Unsigned)?
            .to_der()?)
    }

    /// Whether both are the same signed certificate, ignoring parents.
    pub fn is_same(&self, other: &Certificate) -> bool {
        match (&self.signed, &other.signed) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Set the subject common name.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::Malformed`] if the name cannot be encoded.
    pub fn set_subject(&mut self, common_name: &str) -> Result<(), CertificateError> {
        self.subject = common_name_to_name(common_name)?;
        self.signed = None;
        Ok(())
    }

    /// Set the key and subject name used by [`Certificate::sign`].
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::Malformed`] if the name cannot be encoded.
    pub fn set_issuer(&mut self, key: Keypair, subject: &str) -> Result<(), CertificateError> {
        self.issuer_subject = Some(common_name_to_name(subject)?);
        self.issuer_key = Some(key);
        Ok(())
    }

    /// Set the signing key, taking the issuer name from `issuer`'s subject.
    pub fn set_issuer_from(&mut self, key: Keypair, issuer: &Certificate) {
        self.issuer_subject = Some(issuer.subject.clone());
        self.issuer_key = Some(key);
    }

    /// Set the subject public key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be encoded as SPKI.
    pub fn set_pubkey(&mut self, key: &Keypair) -> Result<(), CertificateError> {
        self.public_key = Some(SubjectPublicKeyInfoOwned::from_der(
            &key.public_key_der()?,
        )?);
        self.signed = None;
        Ok(())
    }

    /// Replace the validity window.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::Malformed`] for times before 1970.
    pub fn set_validity(
        &mut self,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<(), CertificateError> {
        self.validity = Validity {
            not_before: to_time(not_before)?,
            not_after: to_time(not_after)?,
        };
        self.signed = None;
        Ok(())
    }

    /// Add an extension; see [`ExtensionMap::insert_once`].
    ///
    /// # Errors
    ///
    /// See [`ExtensionMap::insert_once`].
    pub fn add_extension(
        &mut self,
        name: &str,
        critical: bool,
        value: &str,
    ) -> Result<(), CertificateError> {
        let before = self.extensions.len();
        self.extensions.insert_once(name, critical, value)?;
        if self.extensions.len() != before {
            self.signed = None;
        }
        Ok(())
    }

    /// Text value of an extension.
    pub fn get_extension(&self, name: &str) -> Option<&str> {
        let value = self.extensions.get(name);
        if value.is_none() {
            debug!(name, subject = %self.subject(), "extension not present");
        }
        value
    }

    /// All extensions.
    pub fn extensions(&self) -> &ExtensionMap {
        &self.extensions
    }

    /// Store a non-critical text field, `subjectAltName` for GIDs.
    ///
    /// # Errors
    ///
    /// See [`ExtensionMap::insert_once`].
    pub fn set_data(&mut self, field: &str, value: &str) -> Result<(), CertificateError> {
        self.add_extension(field, false, value)
    }

    /// Read back a field stored with [`Certificate::set_data`].
    pub fn get_data(&self, field: &str) -> Option<&str> {
        self.extensions.get(field)
    }

    /// Mark this certificate as a CA, or explicitly not one.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::AlreadySet`] on a second call.
    pub fn set_is_ca(&mut self, is_ca: bool) -> Result<(), CertificateError> {
        if self.is_ca.is_some() {
            return Err(CertificateError::AlreadySet("CA flag"));
        }
        let value = if is_ca { "CA:TRUE" } else { "CA:FALSE" };
        self.add_extension(BASIC_CONSTRAINTS, true, value)?;
        self.is_ca = Some(is_ca);
        Ok(())
    }

    /// Whether this certificate may sign others: set with
    /// [`Certificate::set_is_ca`] or carried in `basicConstraints`.
    pub fn is_ca(&self) -> bool {
        self.is_ca.unwrap_or_else(|| {
            self.extensions
                .get(BASIC_CONSTRAINTS)
                .is_some_and(|value| value.starts_with("CA:TRUE"))
        })
    }

    /// Sign with the issuer key and subject set earlier, using SHA-256.
    ///
    /// # Errors
    ///
    /// - [`CertificateError::MissingIssuer`] without an issuer key or subject
    /// - [`CertificateError::MissingPublicKey`] without a subject key
    /// - [`CertificateError::Key`] if the issuer key cannot sign
    pub fn sign(&mut self) -> Result<(), CertificateError> {
        let key = self
            .issuer_key
            .as_ref()
            .ok_or(CertificateError::MissingIssuer)?;
        let issuer = self
            .issuer_subject
            .clone()
            .ok_or(CertificateError::MissingIssuer)?;
        let public_key = self
            .public_key
            .clone()
            .ok_or(CertificateError::MissingPublicKey)?;

        let algorithm = AlgorithmIdentifierOwned {
            oid: SHA256_WITH_RSA,
            parameters: Some(Any::from(AnyRef::NULL)),
        };
        let tbs_certificate = TbsCertificate {
            version: Version::V3,
            serial_number: self.serial.clone(),
            signature: algorithm.clone(),
            issuer: issuer.clone(),
            validity: self.validity,
            subject: self.subject.clone(),
            subject_public_key_info: public_key,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: self.extensions.to_x509()?,
        };
        let signature = key.sign(&tbs_certificate.to_der()?)?;

        self.issuer = issuer;
        self.signed = Some(x509_cert::Certificate {
            tbs_certificate,
            signature_algorithm: algorithm,
            signature: BitString::from_bytes(&signature)?,
        });
        debug!(subject = %self.subject(), issuer = %self.issuer(), "signed certificate");
        Ok(())
    }

    /// Whether `pubkey` produced this certificate's signature.
    pub fn verify(&self, pubkey: &Keypair) -> bool {
        let Some(signed) = &self.signed else {
            return false;
        };
        if signed.signature_algorithm.oid != SHA256_WITH_RSA {
            debug!(
                algorithm = %signed.signature_algorithm.oid,
                subject = %self.subject(),
                "unsupported certificate signature algorithm"
            );
            return false;
        }
        let Ok(tbs) = signed.tbs_certificate.to_der() else {
            return false;
        };
        pubkey.verify(&tbs, signed.signature.raw_bytes())
    }

    /// Whether `other`'s public key signed this certificate.
    pub fn is_signed_by_cert(&self, other: &Certificate) -> bool {
        match other.pubkey() {
            Ok(key) => self.verify(&key),
            Err(_) => false,
        }
    }

    /// The subject public key.
    ///
    /// # Errors
    ///
    /// - [`CertificateError::MissingPublicKey`] if none is set
    /// - [`CertificateError::Key`] if it is not an RSA key
    pub fn pubkey(&self) -> Result<Keypair, CertificateError> {
        let spki = self
            .public_key
            .as_ref()
            .ok_or(CertificateError::MissingPublicKey)?;
        Ok(Keypair::load_public_only(&spki.to_der()?)?)
    }

    /// Whether the subject key is `key`.
    pub fn is_pubkey(&self, key: &Keypair) -> bool {
        self.pubkey().is_ok_and(|own| own.matches_public(key))
    }

    /// Subject common name, or the full name when it has none.
    pub fn subject(&self) -> String {
        display_name(&self.subject)
    }

    /// Issuer common name as stamped at signing time.
    pub fn issuer(&self) -> String {
        display_name(&self.issuer)
    }

    /// Serial number as hex.
    pub fn serial(&self) -> String {
        self.serial
            .as_bytes()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }

    /// Start of the validity window.
    pub fn not_before(&self) -> DateTime<Utc> {
        from_time(&self.validity.not_before)
    }

    /// End of the validity window.
    pub fn not_after(&self) -> DateTime<Utc> {
        from_time(&self.validity.not_after)
    }

    /// Whether the certificate is past its end of validity at `now`.
    pub fn has_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.not_after()
    }

    /// Whether the certificate is past its end of validity.
    pub fn has_expired(&self) -> bool {
        self.has_expired_at(Utc::now())
    }

    /// Whether the certificate carries a current signature.
    pub fn is_signed(&self) -> bool {
        self.signed.is_some()
    }

    /// Attach the certificate that signed this one.
    pub fn set_parent(&mut self, parent: Certificate) {
        self.parent = Some(Box::new(parent));
    }

    /// The certificate that signed this one, if carried.
    pub fn parent(&self) -> Option<&Certificate> {
        self.parent.as_deref()
    }

    /// File this chain was last loaded from or saved to.
    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    /// One-line summary: common name and identity URIs.
    pub fn pretty_cert(&self) -> String {
        let mut message = format!("[Cert. CN: {}", self.subject());
        if let Some(data) = self.get_data(SUBJECT_ALT_NAME) {
            message.push_str(" SubjectAltName: ");
            message.push_str(data);
        }
        message.push(']');
        message
    }

    /// Subject names from this certificate up the chain, `a->b->c`.
    pub fn pretty_chain(&self) -> String {
        let mut names = vec![self.subject()];
        let mut parent = self.parent();
        while let Some(current) = parent {
            names.push(current.subject());
            parent = current.parent();
        }
        names.join("->")
    }

    /// The file name if known, otherwise the chain summary.
    pub fn pretty_name(&self) -> String {
        match &self.filename {
            Some(path) => path.display().to_string(),
            None => self.pretty_chain(),
        }
    }

    /// Multi-line description for diagnostics.
    pub fn dump_string(&self, show_extensions: bool) -> String {
        let mut result = format!(
            "CERTIFICATE for {}\nIssued by {}\n",
            self.pretty_cert(),
            self.issuer()
        );
        if let Some(path) = &self.filename {
            result.push_str(&format!("Filename {}\n", path.display()));
        }
        if show_extensions {
            result.push_str(&format!(
                " has {} extensions attached\n",
                self.extensions.len()
            ));
            for entry in self.extensions.iter() {
                result.push_str(&format!(
                    "    ext: {} (crit={})=<<<{}>>>\n",
                    entry.name(),
                    entry.critical(),
                    entry.value()
                ));
            }
        }
        result
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject())
            .field("issuer", &self.issuer())
            .field("serial", &self.serial())
            .field("signed", &self.is_signed())
            .field("parent", &self.parent)
            .finish()
    }
}

fn random_serial() -> Result<SerialNumber, CertificateError> {
    let mut bytes: [u8; 8] = rand::random();
    // positive, minimally encoded
    bytes[0] = (bytes[0] & 0x7f) | 0x01;
    Ok(SerialNumber::new(&bytes)?)
}

fn common_name_to_name(common_name: &str) -> Result<Name, CertificateError> {
    let attribute = AttributeTypeAndValue {
        oid: COMMON_NAME,
        value: Any::new(Tag::Utf8String, common_name.as_bytes())?,
    };
    let rdn = RelativeDistinguishedName(SetOfVec::try_from(vec![attribute])?);
    Ok(RdnSequence(vec![rdn]))
}

fn display_name(name: &Name) -> String {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|attribute| attribute.oid == COMMON_NAME)
        .map(|attribute| String::from_utf8_lossy(attribute.value.value()).into_owned())
        .unwrap_or_else(|| name.to_string())
}

fn to_time(instant: DateTime<Utc>) -> Result<Time, CertificateError> {
    let seconds = u64::try_from(instant.timestamp())
        .map_err(|_| CertificateError::Malformed(format!("time {instant} precedes 1970")))?;
    let since_epoch = Duration::from_secs(seconds);
    match UtcTime::from_unix_duration(since_epoch) {
        Ok(utc) => Ok(Time::UtcTime(utc)),
        Err(_) => Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(
            since_epoch,
        )?)),
    }
}

fn from_time(time: &Time) -> DateTime<Utc> {
    i64::try_from(time.to_unix_duration().as_secs())
        .ok()
        .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn decode_base64(text: &str) -> Result<Vec<u8>, CertificateError> {
    let body: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64_STANDARD
        .decode(body)
        .map_err(|e| CertificateError::Malformed(e.to_string()))
}

fn decode_pem_block(block: &str) -> Result<Vec<u8>, CertificateError> {
    let block = block.trim();
    let body = block
        .strip_prefix(PEM_BEGIN)
        .ok_or_else(|| CertificateError::Malformed("missing PEM header".into()))?;
    let body = body.split(PEM_END).next().unwrap_or_default();
    decode_base64(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::sync::OnceLock;
    use testresult::TestResult;

    fn key() -> &'static Keypair {
        static KEY: OnceLock<Keypair> = OnceLock::new();
        KEY.get_or_init(|| {
            let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(11);
            Keypair::generate_with(&mut rng).unwrap()
        })
    }

    fn self_signed(name: &str) -> Result<Certificate, CertificateError> {
        let mut certificate = Certificate::create(DEFAULT_LIFETIME_DAYS)?;
        certificate.set_subject(name)?;
        certificate.set_pubkey(key())?;
        certificate.set_issuer(key().clone(), name)?;
        certificate.sign()?;
        Ok(certificate)
    }

    #[test]
    fn it_signs_and_verifies() -> TestResult {
        let certificate = self_signed("plc")?;
        assert!(certificate.verify(key()));
        assert!(certificate.is_signed_by_cert(&certificate));
        assert_eq!(certificate.subject(), "plc");
        assert_eq!(certificate.issuer(), "plc");
        Ok(())
    }

    #[test]
    fn it_requires_an_issuer_before_signing() -> TestResult {
        let mut certificate = Certificate::create(10)?;
        certificate.set_pubkey(key())?;
        assert_eq!(certificate.sign(), Err(CertificateError::MissingIssuer));
        Ok(())
    }

    #[test]
    fn it_drops_the_signature_on_edit() -> TestResult {
        let mut certificate = self_signed("plc")?;
        certificate.add_extension("1.2.3.4", false, "note")?;
        assert!(!certificate.is_signed());
        assert_eq!(certificate.save_to_string(false), Err(CertificateError::Unsigned));
        Ok(())
    }

    #[test]
    fn it_sets_the_ca_flag_once() -> TestResult {
        let mut certificate = Certificate::create(10)?;
        certificate.set_is_ca(true)?;
        assert!(certificate.is_ca());
        assert_eq!(
            certificate.set_is_ca(false),
            Err(CertificateError::AlreadySet("CA flag"))
        );
        Ok(())
    }

    #[test]
    fn it_wraps_bare_base64() -> TestResult {
        let certificate = self_signed("plc")?;
        let pem = certificate.save_to_string(false)?;
        let bare: String = pem
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .collect();
        let loaded = Certificate::load_from_string(&bare)?;
        assert!(loaded.is_same(&certificate));
        Ok(())
    }

    #[test]
    fn it_skips_leading_text() -> TestResult {
        let certificate = self_signed("plc")?;
        let text = format!("Certificate:\n  junk\n{}", certificate.save_to_string(false)?);
        assert!(Certificate::load_from_string(&text)?.is_same(&certificate));
        Ok(())
    }
}
