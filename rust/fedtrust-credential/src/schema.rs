use crate::{
    document::{Document, Element},
    error::DocumentError,
};

/// A shape check run on a credential document before it is trusted.
pub trait DocumentSchema: Send + Sync {
    /// Accept or reject `document`.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentError`] naming the first violation.
    fn validate(&self, document: &Document) -> Result<(), DocumentError>;
}

/// The structure of a signed credential: every `<credential>` in the
/// chain carries its identity fields, an expiration and a privilege list,
/// and each privilege names a kind and a delegate flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialSchema;

const REQUIRED: &[&str] = &[
    "type",
    "serial",
    "owner_gid",
    "owner_urn",
    "target_gid",
    "target_urn",
    "expires",
    "privileges",
];

impl DocumentSchema for CredentialSchema {
    fn validate(&self, document: &Document) -> Result<(), DocumentError> {
        let root = document.root();
        let credential = match root.local_name() {
            "signed-credential" => {
                if root.child("signatures").is_none() {
                    return Err(DocumentError::MissingElement("signatures".into()));
                }
                root.child("credential")
                    .ok_or_else(|| DocumentError::MissingElement("credential".into()))?
            }
            "credential" => root,
            other => {
                return Err(DocumentError::Invalid {
                    element: other.to_string(),
                    reason: "expected signed-credential or credential".into(),
                });
            }
        };
        validate_credential(credential)
    }
}

fn validate_credential(credential: &Element) -> Result<(), DocumentError> {
    for name in REQUIRED {
        if credential.child(name).is_none() {
            return Err(DocumentError::MissingElement((*name).to_string()));
        }
    }
    if credential
        .child_text("type")
        .is_some_and(|kind| kind.trim() != "privilege")
    {
        return Err(DocumentError::Invalid {
            element: "type".into(),
            reason: "only privilege credentials are supported".into(),
        });
    }
    for privilege in credential
        .child("privileges")
        .into_iter()
        .flat_map(|privileges| privileges.children())
    {
        if privilege.local_name() != "privilege" {
            return Err(DocumentError::Invalid {
                element: "privileges".into(),
                reason: format!("unexpected <{}>", privilege.name()),
            });
        }
        for name in ["name", "can_delegate"] {
            if privilege.child(name).is_none() {
                return Err(DocumentError::MissingElement(name.into()));
            }
        }
    }
    match credential.child("parent") {
        Some(parent) => validate_credential(
            parent
                .child("credential")
                .ok_or_else(|| DocumentError::MissingElement("credential".into()))?,
        ),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn it_requires_identity_fields() -> Result<(), DocumentError> {
        let document = Document::parse(
            "<signed-credential><credential><type>privilege</type></credential><signatures/></signed-credential>",
        )?;
        assert_eq!(
            CredentialSchema.validate(&document),
            Err(DocumentError::MissingElement("serial".into()))
        );
        Ok(())
    }

    #[test]
    fn it_rejects_foreign_roots() -> Result<(), DocumentError> {
        let document = Document::parse("<ticket/>")?;
        assert!(matches!(
            CredentialSchema.validate(&document),
            Err(DocumentError::Invalid { .. })
        ));
        Ok(())
    }
}
