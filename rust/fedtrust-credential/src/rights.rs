//! The privilege algebra.
//!
//! A [`Right`] is a named privilege kind plus a delegate bit. Each kind
//! grants a fixed set of operations; a right covers another when its
//! operations include the other's. A delegatable right can only be covered
//! by a delegatable right, so delegation authority is passed down but never
//! created.

use std::fmt;

use crate::error::RightsError;

/// Operations granted by each privilege kind.
const PRIVILEGE_TABLE: &[(&str, &[&str])] = &[
    (
        "authority",
        &["register", "remove", "update", "resolve", "list", "getcredential", "*"],
    ),
    ("refresh", &["remove", "update"]),
    ("resolve", &["resolve", "list", "getcredential"]),
    (
        "sa",
        &[
            "getticket",
            "redeemslice",
            "redeemticket",
            "createslice",
            "createsliver",
            "deleteslice",
            "deletesliver",
            "updateslice",
            "getsliceresources",
            "loanresources",
            "stopslice",
            "startslice",
            "renewsliver",
            "resetslice",
            "listslices",
            "listnodes",
            "getpolicy",
            "sliverstatus",
        ],
    ),
    (
        "embed",
        &[
            "getticket",
            "redeemslice",
            "redeemticket",
            "createslice",
            "createsliver",
            "renewsliver",
            "deleteslice",
            "deletesliver",
            "updateslice",
            "sliverstatus",
            "getsliceresources",
            "shutdown",
        ],
    ),
    ("bind", &["getticket", "loanresources", "redeemticket"]),
    (
        "control",
        &[
            "updateslice",
            "createslice",
            "createsliver",
            "renewsliver",
            "sliverstatus",
            "stopslice",
            "startslice",
            "deleteslice",
            "deletesliver",
            "resetslice",
            "getsliceresources",
            "getgids",
        ],
    ),
    ("info", &["listslices", "listnodes", "getpolicy"]),
    (
        "ma",
        &["setbootstate", "getbootstate", "reboot", "getgids", "gettrustedcerts"],
    ),
    ("operator", &["gettrustedcerts", "getgids"]),
    (
        "*",
        &["createsliver", "deletesliver", "sliverstatus", "renewsliver", "shutdown"],
    ),
];

/// The wildcard kind.
pub const WILDCARD: &str = "*";

/// Operations granted by `kind`, or `None` for an unknown kind.
pub fn operations(kind: &str) -> Option<&'static [&'static str]> {
    let kind = kind.to_ascii_lowercase();
    PRIVILEGE_TABLE
        .iter()
        .find(|(name, _)| *name == kind)
        .map(|(_, ops)| *ops)
}

/// One privilege kind and whether it may be delegated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Right {
    kind: String,
    delegate: bool,
}

impl Right {
    /// A non-delegatable right.
    pub fn new(kind: impl Into<String>) -> Self {
        Self::with_delegate(kind, false)
    }

    /// A right with an explicit delegate bit.
    pub fn with_delegate(kind: impl Into<String>, delegate: bool) -> Self {
        Self {
            kind: kind.into().trim().to_string(),
            delegate,
        }
    }

    /// The privilege kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Whether the right may be delegated.
    pub fn can_delegate(&self) -> bool {
        self.delegate
    }

    /// Set the delegate bit.
    pub fn set_delegate(&mut self, delegate: bool) {
        self.delegate = delegate;
    }

    /// Whether this right grants `operation`.
    pub fn can_perform(&self, operation: &str) -> bool {
        if self.kind == WILDCARD {
            return true;
        }
        let operation = operation.to_ascii_lowercase();
        operations(&self.kind).is_some_and(|ops| ops.contains(&operation.as_str()))
    }

    /// Whether this right covers `other`: same kind, a kind granting `*`,
    /// or a kind whose operations include all of `other`'s. A delegatable
    /// `other` also needs this right to be delegatable.
    pub fn is_superset(&self, other: &Right) -> bool {
        if other.delegate && !self.delegate {
            return false;
        }
        if self.kind.eq_ignore_ascii_case(&other.kind) {
            return true;
        }
        let (Some(mine), Some(theirs)) = (operations(&self.kind), operations(&other.kind)) else {
            return false;
        };
        mine.contains(&WILDCARD) || theirs.iter().all(|op| mine.contains(op))
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.delegate {
            write!(f, "{}:1", self.kind)
        } else {
            f.write_str(&self.kind)
        }
    }
}

/// An ordered set of rights, unique by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rights {
    rights: Vec<Right>,
}

impl Rights {
    /// No rights.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `kind[:delegate],...`, where the delegate flag is `1`/`true`
    /// or `0`/`false`. An empty string is no rights.
    ///
    /// # Errors
    ///
    /// - [`RightsError::Malformed`] for an empty kind or unknown flag
    /// - [`RightsError::Duplicate`] when a kind repeats
    pub fn from_string(text: &str) -> Result<Self, RightsError> {
        let mut rights = Self::new();
        for part in text.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            let (kind, delegate) = match part.split_once(':') {
                Some((kind, flag)) => (kind.trim(), parse_flag(flag.trim(), part)?),
                None => (part, false),
            };
            if kind.is_empty() {
                return Err(RightsError::Malformed(part.to_string()));
            }
            rights.add(Right::with_delegate(kind, delegate))?;
        }
        Ok(rights)
    }

    /// Append a right.
    ///
    /// # Errors
    ///
    /// Returns [`RightsError::Duplicate`] if its kind is already present.
    pub fn add(&mut self, right: Right) -> Result<(), RightsError> {
        if self.get(right.kind()).is_some() {
            return Err(RightsError::Duplicate(right.kind));
        }
        self.rights.push(right);
        Ok(())
    }

    /// The right of a kind.
    pub fn get(&self, kind: &str) -> Option<&Right> {
        self.rights
            .iter()
            .find(|right| right.kind.eq_ignore_ascii_case(kind))
    }

    /// Rights in order.
    pub fn iter(&self) -> impl Iterator<Item = &Right> {
        self.rights.iter()
    }

    /// Number of rights.
    pub fn len(&self) -> usize {
        self.rights.len()
    }

    /// Whether there are no rights.
    pub fn is_empty(&self) -> bool {
        self.rights.is_empty()
    }

    /// Whether every right of `other` is covered by some right here.
    pub fn is_superset(&self, other: &Rights) -> bool {
        other
            .rights
            .iter()
            .all(|theirs| self.rights.iter().any(|mine| mine.is_superset(theirs)))
    }

    /// Whether any right grants `operation`.
    pub fn can_perform(&self, operation: &str) -> bool {
        self.rights.iter().any(|right| right.can_perform(operation))
    }

    /// Set every delegate bit.
    pub fn delegate_all(&mut self, delegate: bool) {
        for right in &mut self.rights {
            right.delegate = delegate;
        }
    }

    /// Whether every right is delegatable.
    pub fn all_delegatable(&self) -> bool {
        self.rights.iter().all(Right::can_delegate)
    }

    /// Kinds with a marker for delegatable ones, for logs.
    pub fn pretty(&self) -> String {
        self.rights
            .iter()
            .map(|right| {
                if right.delegate {
                    format!("{} (delegatable)", right.kind)
                } else {
                    right.kind.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.rights.iter().map(Right::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

impl FromIterator<Right> for Rights {
    /// Later duplicates of a kind are dropped.
    fn from_iter<I: IntoIterator<Item = Right>>(iter: I) -> Self {
        let mut rights = Self::new();
        for right in iter {
            let _ = rights.add(right);
        }
        rights
    }
}

/// The privileges an object of type `kind` grants its holder by default.
///
/// Credentials list `*` for this set; it is expanded on decode.
pub fn default_rights_for(kind: &str) -> Rights {
    let kinds: &[&str] = match kind {
        "user" => &["refresh", "resolve", "info"],
        "sa" | "authority+sa" => &["authority", "sa"],
        "ma" | "authority+ma" | "cm" | "authority+cm" | "sm" | "authority+sm" => &["authority", "ma"],
        "authority" => &["authority", "sa", "ma"],
        "slice" => &["refresh", "embed", "bind", "control", "info"],
        "component" => &["operator"],
        _ => &[],
    };
    kinds.iter().map(|kind| Right::new(*kind)).collect()
}

fn parse_flag(flag: &str, part: &str) -> Result<bool, RightsError> {
    match flag.to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(RightsError::Malformed(part.to_string())),
    }
}


#[cfg(test)]
mod proptest_algebra {
    use super::*;
    use proptest::prelude::*;

    fn arb_rights() -> impl Strategy<Value = Rights> {
        let kinds: Vec<&'static str> = PRIVILEGE_TABLE.iter().map(|(kind, _)| *kind).collect();
        proptest::collection::vec((proptest::sample::select(kinds), any::<bool>()), 0..6)
            .prop_map(|entries| {
                entries
                    .into_iter()
                    .map(|(kind, delegate)| Right::with_delegate(kind, delegate))
                    .collect::<Rights>()
            })
    }

    proptest! {
        #[test]
        fn superset_is_reflexive(rights in arb_rights()) {
            prop_assert!(rights.is_superset(&rights));
        }

        #[test]
        fn superset_of_nothing(rights in arb_rights()) {
            prop_assert!(rights.is_superset(&Rights::new()));
        }

        #[test]
        fn delegating_all_never_shrinks(rights in arb_rights()) {
            let mut delegated = rights.clone();
            delegated.delegate_all(true);
            prop_assert!(delegated.is_superset(&rights));
            if rights.all_delegatable() {
                prop_assert!(rights.is_superset(&delegated));
            }
        }

        #[test]
        fn superset_is_transitive(a in arb_rights(), b in arb_rights(), c in arb_rights()) {
            if a.is_superset(&b) && b.is_superset(&c) {
                prop_assert!(a.is_superset(&c));
            }
        }

        #[test]
        fn round_trips_through_text(rights in arb_rights()) {
            prop_assert_eq!(Rights::from_string(&rights.to_string()), Ok(rights));
        }
    }
}
