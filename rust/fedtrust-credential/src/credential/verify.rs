use chrono::{DateTime, SubsecRound, Utc};
use fedtrust_certificate::{Certificate, hrn_authority_for};

use super::Credential;
use crate::{
    clock::{Clock, SystemClock},
    document::Document,
    error::{CredentialError, DelegationBreach, ToolError},
    schema::DocumentSchema,
    tool::{SignatureTool, signature_id},
};

impl Credential {
    /// Verify the credential against `trusted` roots as of now.
    ///
    /// # Errors
    ///
    /// See [`Credential::verify_at`].
    pub fn verify(
        &self,
        trusted: &[Certificate],
        schema: Option<&dyn DocumentSchema>,
        tool: &dyn SignatureTool,
    ) -> Result<(), CredentialError> {
        self.verify_at(trusted, schema, tool, &SystemClock)
    }

    /// Verify the credential and its whole delegation chain, stopping at
    /// the first failure:
    ///
    /// 1. the document matches `schema`, when given
    /// 2. the credential has not expired, compared in whole seconds
    /// 3. the caller and object GID of every credential in the chain
    ///    verify against `trusted`
    /// 4. every credential's signature verifies through `tool`
    /// 5. every delegated credential stays within its parent
    /// 6. the root credential was signed by the object's signer or by an
    ///    authority over the object's namespace
    ///
    /// # Errors
    ///
    /// - [`CredentialError::MalformedDocument`] for step 1
    /// - [`CredentialError::Expired`] for step 2
    /// - [`CredentialError::GidNotTrusted`] for step 3
    /// - [`CredentialError::SignatureInvalid`],
    ///   [`CredentialError::SigningToolUnavailable`] or
    ///   [`CredentialError::SigningToolTimeout`] for step 4
    /// - [`CredentialError::DelegationInvariant`] for step 5
    /// - [`CredentialError::UntrustedIssuer`] or
    ///   [`CredentialError::GidNotTrusted`] for step 6
    pub fn verify_at(
        &self,
        trusted: &[Certificate],
        schema: Option<&dyn DocumentSchema>,
        tool: &dyn SignatureTool,
        clock: &dyn Clock,
    ) -> Result<(), CredentialError> {
        let now = clock.now();

        if let Some(schema) = schema {
            let document = Document::parse(self.document()?)?;
            schema.validate(&document).map_err(|error| {
                CredentialError::MalformedDocument(format!("{}: {error}", self.pretty_cred()))
            })?;
        }

        if self.expiration < now.trunc_subsecs(0) {
            return Err(CredentialError::Expired(self.expiration));
        }

        let chain = self.credential_list();
        for credential in &chain {
            for gid in [credential.caller(), credential.object()] {
                tracing::debug!(gid = %gid.pretty_cert(), "verifying chain");
                gid.verify_chain_at(trusted, now)
                    .map_err(|source| CredentialError::GidNotTrusted {
                        hrn: gid.hrn().to_string(),
                        source,
                    })?;
            }
        }

        let document = self.document()?;
        for credential in &chain {
            if credential.signature.is_none() {
                return Err(CredentialError::SignatureInvalid {
                    refid: credential.refid.clone(),
                    reason: "credential is not signed".into(),
                });
            }
            tool.verify(document, &signature_id(&credential.refid), trusted)
                .map_err(|error| match error {
                    ToolError::Unavailable(reason) => {
                        CredentialError::SigningToolUnavailable(reason)
                    }
                    ToolError::Timeout(after) => CredentialError::SigningToolTimeout(after),
                    ToolError::Failed(reason) => {
                        tracing::warn!(refid = %credential.refid, %reason, "signature rejected");
                        CredentialError::SignatureInvalid {
                            refid: credential.refid.clone(),
                            reason,
                        }
                    }
                })?;
        }

        if let Some(parent) = self.parent() {
            self.verify_parent(parent)?;
        }

        self.verify_issuer(trusted, now)
    }

    fn document(&self) -> Result<&str, CredentialError> {
        self.xml.as_deref().ok_or_else(|| CredentialError::SignatureInvalid {
            refid: self.refid.clone(),
            reason: "credential has not been encoded".into(),
        })
    }

    /// Check that this credential stays within `parent`, then recurse up
    /// the chain.
    fn verify_parent(&self, parent: &Credential) -> Result<(), CredentialError> {
        let breach = |breach: DelegationBreach| {
            tracing::error!(
                child = %self.pretty_cred(),
                child_refid = %self.refid,
                parent = %parent.pretty_cred(),
                parent_refid = %parent.refid,
                %breach,
                "delegation invariant broken"
            );
            CredentialError::DelegationInvariant {
                refid: self.refid.clone(),
                breach,
            }
        };

        if !parent.privileges.is_superset(&self.privileges) {
            tracing::error!(
                parent = %parent.privileges,
                child = %self.privileges,
                "rights are not a subset of the parent's"
            );
            return Err(breach(DelegationBreach::RightsNotSubset));
        }
        if parent.object.save_to_string(true)? != self.object.save_to_string(true)? {
            return Err(breach(DelegationBreach::ObjectMismatch));
        }
        if parent.expiration < self.expiration {
            return Err(breach(DelegationBreach::ExpirationExceedsParent));
        }
        let signer = self
            .signature
            .as_ref()
            .ok_or_else(|| CredentialError::SignatureInvalid {
                refid: self.refid.clone(),
                reason: "credential is not signed".into(),
            })?
            .issuer_gid();
        if parent.caller.save_to_string(false)? != signer.save_to_string(false)? {
            return Err(breach(DelegationBreach::SignerMismatch));
        }

        match parent.parent() {
            Some(grandparent) => parent.verify_parent(grandparent),
            None => Ok(()),
        }
    }

    /// The root credential's signer must have signed the object's GID, or
    /// be a trusted authority whose namespace holds the object.
    fn verify_issuer(
        &self,
        trusted: &[Certificate],
        now: DateTime<Utc>,
    ) -> Result<(), CredentialError> {
        let chain = self.credential_list();
        let root = chain.last().copied().unwrap_or(self);
        let signer = root
            .signature
            .as_ref()
            .ok_or_else(|| CredentialError::SignatureInvalid {
                refid: root.refid.clone(),
                reason: "credential is not signed".into(),
            })?
            .issuer_gid();
        let object = root.object();

        if object.is_signed_by_cert(signer) {
            return Ok(());
        }

        if trusted.is_empty() {
            tracing::debug!("no trusted roots; skipping the signer chain check");
        } else {
            signer
                .verify_chain_at(trusted, now)
                .map_err(|source| CredentialError::GidNotTrusted {
                    hrn: signer.hrn().to_string(),
                    source,
                })?;
        }

        if signer.is_authority() && hrn_authority_for(signer.hrn(), object.hrn()) {
            return Ok(());
        }

        Err(CredentialError::UntrustedIssuer {
            issuer: signer.hrn().to_string(),
            object: object.hrn().to_string(),
        })
    }
}
