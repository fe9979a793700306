//! Write-once certificate extensions.
//!
//! Extensions are addressed by name and carried as text, in the same form
//! the OpenSSL tools print them (`URI:urn:..., email:...`, `CA:TRUE`). Each
//! entry also keeps its DER encoding, which is what lands in the signed
//! certificate.

use base64::prelude::*;
use der::{
    Decode, Encode,
    asn1::{Ia5String, OctetString, Utf8StringRef},
    oid::ObjectIdentifier,
};
use x509_cert::ext::{
    Extension,
    pkix::{BasicConstraints, SubjectAltName, name::GeneralName},
};

use crate::error::CertificateError;

/// Name of the extension carrying GID identity data.
pub const SUBJECT_ALT_NAME: &str = "subjectAltName";

/// Name of the CA flag extension.
pub const BASIC_CONSTRAINTS: &str = "basicConstraints";

/// Name of the ticket payload extension.
pub const TICKET_DATA: &str = "ticketData";

const SUBJECT_ALT_NAME_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.17");
const BASIC_CONSTRAINTS_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.19");

/// Private arc used for the ticket payload.
pub const TICKET_DATA_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.54673.1.1");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syntax {
    GeneralNames,
    BasicConstraints,
    Utf8,
}

/// One extension: its name, criticality and value in text and DER form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionEntry {
    name: String,
    oid: ObjectIdentifier,
    critical: bool,
    value: String,
    der: Vec<u8>,
}

impl ExtensionEntry {
    /// Extension name, or its dotted OID when the name is not known.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Extension OID.
    pub fn oid(&self) -> ObjectIdentifier {
        self.oid
    }

    /// Whether the extension is marked critical.
    pub fn critical(&self) -> bool {
        self.critical
    }

    /// Text form of the value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Ordered extensions, each settable at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionMap {
    entries: Vec<ExtensionEntry>,
}

impl ExtensionMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an extension unless it is already present.
    ///
    /// Re-adding a name with the same value is a no-op.
    ///
    /// # Errors
    ///
    /// - [`CertificateError::ExtensionConflict`] if the name is already set to
    ///   another value
    /// - [`CertificateError::UnknownExtension`] if `name` is neither a known
    ///   extension nor a dotted OID
    /// - [`CertificateError::InvalidExtension`] if `value` does not parse
    pub fn insert_once(
        &mut self,
        name: &str,
        critical: bool,
        value: &str,
    ) -> Result<(), CertificateError> {
        let (name, oid, syntax) = resolve(name)?;
        if let Some(existing) = self.entries.iter().find(|entry| entry.oid == oid) {
            if existing.value == value {
                return Ok(());
            }
            return Err(CertificateError::ExtensionConflict {
                name,
                existing: existing.value.clone(),
                attempted: value.to_string(),
            });
        }
        let der = encode(syntax, &name, value)?;
        self.entries.push(ExtensionEntry {
            name,
            oid,
            critical,
            value: value.to_string(),
            der,
        });
        Ok(())
    }

    /// Text value of an extension.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entry(name).map(ExtensionEntry::value)
    }

    /// The entry for an extension, by name or dotted OID.
    pub fn entry(&self, name: &str) -> Option<&ExtensionEntry> {
        let (_, oid, _) = resolve(name).ok()?;
        self.entries.iter().find(|entry| entry.oid == oid)
    }

    /// Whether an extension is present.
    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// All entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ExtensionEntry> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn to_x509(&self) -> Result<Option<Vec<Extension>>, CertificateError> {
        if self.entries.is_empty() {
            return Ok(None);
        }
        self.entries
            .iter()
            .map(|entry| {
                Ok(Extension {
                    extn_id: entry.oid,
                    critical: entry.critical,
                    extn_value: OctetString::new(entry.der.clone())?,
                })
            })
            .collect::<Result<Vec<_>, CertificateError>>()
            .map(Some)
    }

    pub(crate) fn from_x509(extensions: &[Extension]) -> Self {
        let entries = extensions
            .iter()
            .map(|extension| {
                let der = extension.extn_value.as_bytes().to_vec();
                let (name, value) = describe(extension.extn_id, &der);
                ExtensionEntry {
                    name,
                    oid: extension.extn_id,
                    critical: extension.critical,
                    value,
                    der,
                }
            })
            .collect();
        Self { entries }
    }
}

fn resolve(name: &str) -> Result<(String, ObjectIdentifier, Syntax), CertificateError> {
    let known = [
        (SUBJECT_ALT_NAME, SUBJECT_ALT_NAME_OID, Syntax::GeneralNames),
        (BASIC_CONSTRAINTS, BASIC_CONSTRAINTS_OID, Syntax::BasicConstraints),
        (TICKET_DATA, TICKET_DATA_OID, Syntax::Utf8),
    ];
    if let Some((known_name, oid, syntax)) = known.iter().find(|(n, _, _)| *n == name) {
        return Ok((known_name.to_string(), *oid, *syntax));
    }
    let oid = ObjectIdentifier::new(name)
        .map_err(|_| CertificateError::UnknownExtension(name.to_string()))?;
    Ok(match known.iter().find(|(_, known_oid, _)| *known_oid == oid) {
        Some((known_name, _, syntax)) => (known_name.to_string(), oid, *syntax),
        None => (oid.to_string(), oid, Syntax::Utf8),
    })
}

fn encode(syntax: Syntax, name: &str, value: &str) -> Result<Vec<u8>, CertificateError> {
    let invalid = |reason: String| CertificateError::InvalidExtension {
        name: name.to_string(),
        reason,
    };
    match syntax {
        Syntax::GeneralNames => {
            let names = parse_general_names(value).map_err(invalid)?;
            Ok(SubjectAltName(names).to_der()?)
        }
        Syntax::BasicConstraints => {
            let constraints = parse_basic_constraints(value).map_err(invalid)?;
            Ok(constraints.to_der()?)
        }
        Syntax::Utf8 => Ok(Utf8StringRef::new(value)?.to_der()?),
    }
}

fn describe(oid: ObjectIdentifier, der: &[u8]) -> (String, String) {
    let opaque = || BASE64_STANDARD.encode(der);
    if oid == SUBJECT_ALT_NAME_OID {
        let value = SubjectAltName::from_der(der)
            .map(|san| render_general_names(&san.0))
            .unwrap_or_else(|_| opaque());
        return (SUBJECT_ALT_NAME.to_string(), value);
    }
    if oid == BASIC_CONSTRAINTS_OID {
        let value = BasicConstraints::from_der(der)
            .map(|bc| render_basic_constraints(&bc))
            .unwrap_or_else(|_| opaque());
        return (BASIC_CONSTRAINTS.to_string(), value);
    }
    let name = if oid == TICKET_DATA_OID {
        TICKET_DATA.to_string()
    } else {
        oid.to_string()
    };
    let value = Utf8StringRef::from_der(der)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| opaque());
    (name, value)
}

fn parse_general_names(value: &str) -> Result<Vec<GeneralName>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (kind, body) = item
                .split_once(':')
                .ok_or_else(|| format!("missing type prefix in {item:?}"))?;
            let body = Ia5String::new(body.trim()).map_err(|e| e.to_string())?;
            match kind.trim().to_ascii_lowercase().as_str() {
                "uri" => Ok(GeneralName::UniformResourceIdentifier(body)),
                "email" => Ok(GeneralName::Rfc822Name(body)),
                "dns" => Ok(GeneralName::DnsName(body)),
                other => Err(format!("unsupported general name type {other:?}")),
            }
        })
        .collect()
}

fn render_general_names(names: &[GeneralName]) -> String {
    names
        .iter()
        .map(|name| match name {
            GeneralName::UniformResourceIdentifier(uri) => format!("URI:{uri}"),
            GeneralName::Rfc822Name(email) => format!("email:{email}"),
            GeneralName::DnsName(dns) => format!("DNS:{dns}"),
            _ => "othername:<unsupported>".to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_basic_constraints(value: &str) -> Result<BasicConstraints, String> {
    let mut constraints = BasicConstraints {
        ca: false,
        path_len_constraint: None,
    };
    for item in value.split(',').map(str::trim) {
        match item.split_once(':') {
            Some((key, flag)) if key.eq_ignore_ascii_case("ca") => {
                constraints.ca = match flag.to_ascii_uppercase().as_str() {
                    "TRUE" => true,
                    "FALSE" => false,
                    other => return Err(format!("CA flag must be TRUE or FALSE, got {other}")),
                };
            }
            Some((key, len)) if key.eq_ignore_ascii_case("pathlen") => {
                constraints.path_len_constraint =
                    Some(len.parse().map_err(|_| format!("bad pathlen {len:?}"))?);
            }
            _ => return Err(format!("unexpected item {item:?}")),
        }
    }
    Ok(constraints)
}

fn render_basic_constraints(constraints: &BasicConstraints) -> String {
    let flag = if constraints.ca { "CA:TRUE" } else { "CA:FALSE" };
    match constraints.path_len_constraint {
        Some(len) => format!("{flag}, pathlen:{len}"),
        None => flag.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testresult::TestResult;

    #[test]
    fn it_ignores_identical_reinsertion() -> TestResult {
        let mut map = ExtensionMap::new();
        map.insert_once(BASIC_CONSTRAINTS, true, "CA:TRUE")?;
        map.insert_once(BASIC_CONSTRAINTS, true, "CA:TRUE")?;
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(BASIC_CONSTRAINTS), Some("CA:TRUE"));
        Ok(())
    }

    #[test]
    fn it_refuses_a_different_value() -> TestResult {
        let mut map = ExtensionMap::new();
        map.insert_once(SUBJECT_ALT_NAME, false, "URI:urn:publicid:IDN+plc+user+a")?;
        let result = map.insert_once(SUBJECT_ALT_NAME, false, "URI:urn:publicid:IDN+plc+user+b");
        assert!(matches!(
            result,
            Err(CertificateError::ExtensionConflict { .. })
        ));
        Ok(())
    }

    #[test]
    fn it_treats_a_dotted_oid_as_the_known_name() -> TestResult {
        let mut map = ExtensionMap::new();
        map.insert_once("2.5.29.19", true, "CA:FALSE")?;
        assert_eq!(map.get(BASIC_CONSTRAINTS), Some("CA:FALSE"));
        assert!(matches!(
            map.insert_once(BASIC_CONSTRAINTS, true, "CA:TRUE"),
            Err(CertificateError::ExtensionConflict { .. })
        ));
        Ok(())
    }

    #[test]
    fn it_round_trips_through_x509_extensions() -> TestResult {
        let mut map = ExtensionMap::new();
        map.insert_once(
            SUBJECT_ALT_NAME,
            false,
            "URI:urn:publicid:IDN+plc+user+alice, email:alice@example.org",
        )?;
        map.insert_once(BASIC_CONSTRAINTS, true, "CA:TRUE, pathlen:2")?;
        map.insert_once(TICKET_DATA, false, "{\"rspec\":\"\"}")?;
        map.insert_once("1.2.3.4", false, "opaque")?;

        let extensions = map.to_x509()?.unwrap_or_default();
        assert_eq!(ExtensionMap::from_x509(&extensions), map);
        Ok(())
    }

    #[test]
    fn it_rejects_unknown_names_and_bad_values() {
        let mut map = ExtensionMap::new();
        assert_eq!(
            map.insert_once("keyUsage", false, "digitalSignature"),
            Err(CertificateError::UnknownExtension("keyUsage".into()))
        );
        assert!(matches!(
            map.insert_once(SUBJECT_ALT_NAME, false, "nonsense"),
            Err(CertificateError::InvalidExtension { .. })
        ));
        assert!(matches!(
            map.insert_once(BASIC_CONSTRAINTS, true, "CA:MAYBE"),
            Err(CertificateError::InvalidExtension { .. })
        ));
        assert!(map.is_empty());
    }
}
