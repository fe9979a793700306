//! Hierarchical names (HRNs) and their `urn:publicid:IDN` form.
//!
//! An HRN is a dotted name such as `plc.princeton.alice`, where the prefix
//! `plc.princeton` is the naming authority. A literal dot inside a component
//! is written `\.`. The URN form carries the authority components separated
//! by `:`, the object type and the leaf name:
//!
//! ```text
//! plc.princeton.alice (user)  <->  urn:publicid:IDN+plc:princeton+user+alice
//! plc.princeton (authority)   <->  urn:publicid:IDN+plc:princeton+authority+sa
//! ```

use std::fmt;

use crate::error::XrnError;

/// Prefix shared by every URN in the federation.
pub const URN_PREFIX: &str = "urn:publicid:IDN";

/// Type assigned to the URN leaf of a plain authority.
const AUTHORITY_LEAF: &str = "sa";

/// A name known in both its HRN and URN forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xrn {
    hrn: String,
    urn: String,
    kind: Option<String>,
}

impl Xrn {
    /// Build from an HRN and an optional object type.
    ///
    /// Authority types (`authority`, `authority+ma`, ...) name the
    /// authority itself, so every HRN component lands in the URN
    /// authority field.
    ///
    /// # Errors
    ///
    /// Returns [`XrnError::EmptyHrn`] for an empty name.
    pub fn from_hrn(hrn: &str, kind: Option<&str>) -> Result<Self, XrnError> {
        let hrn = hrn.trim();
        if hrn.is_empty() {
            return Err(XrnError::EmptyHrn);
        }
        let parts = hrn_split(hrn);
        let urn = match kind {
            Some(kind) if kind.starts_with("authority") => {
                let leaf = kind
                    .split_once('+')
                    .map_or(AUTHORITY_LEAF, |(_, leaf)| leaf);
                format!(
                    "{URN_PREFIX}+{}+authority+{leaf}",
                    join_authority(&parts)
                )
            }
            _ => {
                let (leaf, authority) = parts.split_last().ok_or(XrnError::EmptyHrn)?;
                let authority = join_authority(authority);
                let leaf = unescape(leaf);
                match kind {
                    Some(kind) => format!("{URN_PREFIX}+{authority}+{kind}+{leaf}"),
                    None => format!("{URN_PREFIX}+{authority}+{leaf}"),
                }
            }
        };
        Ok(Self {
            hrn: hrn.to_string(),
            urn,
            kind: kind.map(str::to_string),
        })
    }

    /// Build from a `urn:publicid:IDN+...` URN.
    ///
    /// # Errors
    ///
    /// - [`XrnError::NotUrn`] if the prefix is missing
    /// - [`XrnError::MalformedUrn`] if the authority or name field is missing
    pub fn from_urn(urn: &str) -> Result<Self, XrnError> {
        let urn = urn.trim();
        if !is_urn(urn) {
            return Err(XrnError::NotUrn(urn.to_string()));
        }
        let rest = &urn[URN_PREFIX.len() + 1..];
        let fields: Vec<&str> = rest.splitn(3, '+').collect();
        let (authority, kind, name) = match fields.as_slice() {
            [authority, kind, name] => (*authority, Some(*kind), *name),
            [authority, name] => (*authority, None, *name),
            _ => return Err(XrnError::MalformedUrn(urn.to_string())),
        };
        if name.is_empty() {
            return Err(XrnError::MalformedUrn(urn.to_string()));
        }

        let mut components: Vec<String> = authority
            .split(':')
            .filter(|part| !part.is_empty())
            .map(escape)
            .collect();
        let kind = match kind {
            Some("authority") => {
                if name == AUTHORITY_LEAF {
                    Some("authority".to_string())
                } else {
                    Some(format!("authority+{name}"))
                }
            }
            other => {
                components.push(escape(name));
                other.map(str::to_string)
            }
        };
        if components.is_empty() {
            return Err(XrnError::MalformedUrn(urn.to_string()));
        }

        Ok(Self {
            hrn: components.join("."),
            urn: format!("{URN_PREFIX}+{rest}"),
            kind,
        })
    }

    /// Accept either form, using `kind` only when `name` is an HRN.
    ///
    /// # Errors
    ///
    /// See [`Xrn::from_hrn`] and [`Xrn::from_urn`].
    pub fn parse(name: &str, kind: Option<&str>) -> Result<Self, XrnError> {
        if is_urn(name) {
            Self::from_urn(name)
        } else {
            Self::from_hrn(name, kind)
        }
    }

    /// The dotted HRN.
    pub fn hrn(&self) -> &str {
        &self.hrn
    }

    /// The URN.
    pub fn urn(&self) -> &str {
        &self.urn
    }

    /// The object type (`user`, `slice`, `authority+ma`, ...), if any.
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    /// Whether the type is one of the authority types.
    pub fn is_authority(&self) -> bool {
        self.kind().is_some_and(|kind| kind.starts_with("authority"))
    }

    /// The last HRN component, unescaped.
    pub fn leaf(&self) -> String {
        hrn_split(&self.hrn)
            .last()
            .map(|leaf| unescape(leaf))
            .unwrap_or_default()
    }

    /// The HRN of the enclosing authority: everything but the leaf.
    pub fn authority_hrn(&self) -> String {
        let parts = hrn_split(&self.hrn);
        match parts.split_last() {
            Some((_, authority)) => authority.join("."),
            None => String::new(),
        }
    }
}

impl fmt::Display for Xrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.hrn, self.kind().unwrap_or("?"))
    }
}

/// Whether `name` is a publicid URN.
pub fn is_urn(name: &str) -> bool {
    name.len() > URN_PREFIX.len()
        && name.is_char_boundary(URN_PREFIX.len())
        && name[..URN_PREFIX.len()].eq_ignore_ascii_case(URN_PREFIX)
        && name[URN_PREFIX.len()..].starts_with('+')
}

/// Convert a URN to `(hrn, type)`.
///
/// # Errors
///
/// See [`Xrn::from_urn`].
pub fn urn_to_hrn(urn: &str) -> Result<(String, Option<String>), XrnError> {
    let xrn = Xrn::from_urn(urn)?;
    Ok((xrn.hrn, xrn.kind))
}

/// Convert an HRN and type to a URN.
///
/// # Errors
///
/// See [`Xrn::from_hrn`].
pub fn hrn_to_urn(hrn: &str, kind: Option<&str>) -> Result<String, XrnError> {
    Ok(Xrn::from_hrn(hrn, kind)?.urn)
}

/// Whether `parent` names `child` or one of its enclosing authorities.
pub fn hrn_authority_for(parent: &str, child: &str) -> bool {
    parent == child
        || child
            .strip_prefix(parent)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Split an HRN on unescaped dots. Components keep their escapes.
pub fn hrn_split(hrn: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = hrn.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '.' => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn join_authority(parts: &[String]) -> String {
    parts
        .iter()
        .map(|part| unescape(part))
        .collect::<Vec<_>>()
        .join(":")
}

fn escape(part: &str) -> String {
    part.replace('.', "\\.")
}

fn unescape(part: &str) -> String {
    part.replace("\\.", ".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use testresult::TestResult;

    #[test]
    fn it_converts_a_user_hrn() -> TestResult {
        let xrn = Xrn::from_hrn("plc.princeton.alice", Some("user"))?;
        assert_eq!(xrn.urn(), "urn:publicid:IDN+plc:princeton+user+alice");
        assert_eq!(xrn.leaf(), "alice");
        assert_eq!(xrn.authority_hrn(), "plc.princeton");
        Ok(())
    }

    #[test]
    fn it_names_authorities_by_their_own_hrn() -> TestResult {
        let sa = Xrn::from_hrn("plc.princeton", Some("authority"))?;
        assert_eq!(sa.urn(), "urn:publicid:IDN+plc:princeton+authority+sa");

        let ma = Xrn::from_hrn("plc.princeton", Some("authority+ma"))?;
        assert_eq!(ma.urn(), "urn:publicid:IDN+plc:princeton+authority+ma");

        assert_eq!(
            urn_to_hrn(ma.urn())?,
            ("plc.princeton".to_string(), Some("authority+ma".to_string()))
        );
        assert_eq!(
            urn_to_hrn(sa.urn())?,
            ("plc.princeton".to_string(), Some("authority".to_string()))
        );
        Ok(())
    }

    #[test]
    fn it_round_trips_escaped_dots() -> TestResult {
        let xrn = Xrn::from_hrn(r"plc.princeton.alice\.smith", Some("user"))?;
        assert_eq!(xrn.urn(), "urn:publicid:IDN+plc:princeton+user+alice.smith");
        let back = Xrn::from_urn(xrn.urn())?;
        assert_eq!(back.hrn(), r"plc.princeton.alice\.smith");
        assert_eq!(back.leaf(), "alice.smith");
        Ok(())
    }

    #[test]
    fn it_rejects_non_urns() {
        assert_eq!(
            Xrn::from_urn("plc.princeton"),
            Err(XrnError::NotUrn("plc.princeton".into()))
        );
        assert!(matches!(
            Xrn::from_urn("urn:publicid:IDN+plc"),
            Err(XrnError::MalformedUrn(_))
        ));
        assert_eq!(Xrn::from_hrn("  ", None), Err(XrnError::EmptyHrn));
    }

    #[test]
    fn it_parses_either_form() -> TestResult {
        let a = Xrn::parse("urn:publicid:IDN+plc+slice+demo", None)?;
        let b = Xrn::parse("plc.demo", Some("slice"))?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn it_checks_namespace_authority() {
        assert!(hrn_authority_for("plc", "plc"));
        assert!(hrn_authority_for("plc", "plc.princeton.alice"));
        assert!(!hrn_authority_for("plc", "plcx.alice"));
        assert!(!hrn_authority_for("plc.princeton", "plc"));
    }
}
