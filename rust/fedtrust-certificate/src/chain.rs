//! Chain of trust verification.
//!
//! A certificate is trusted when some trusted root signed it directly, or
//! when its parent signed it, the parent is a CA, and the parent is trusted
//! by the same rule. Trusted roots are tried in the order given and the
//! first one that signed the certificate decides the outcome.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{certificate::Certificate, error::TrustError};

impl Certificate {
    /// Verify this chain against `trusted` roots as of now.
    ///
    /// Returns the trusted root that anchors the chain.
    ///
    /// # Errors
    ///
    /// See [`Certificate::verify_chain_at`].
    pub fn verify_chain<'a>(
        &self,
        trusted: &'a [Certificate],
    ) -> Result<&'a Certificate, TrustError> {
        self.verify_chain_at(trusted, Utc::now())
    }

    /// Verify this chain against `trusted` roots as of `now`.
    ///
    /// # Errors
    ///
    /// - [`TrustError::Expired`] if this certificate, or the trusted root that
    ///   signed it, is past its validity at `now`
    /// - [`TrustError::MissingParent`] if no trusted root signed it and there is
    ///   no parent
    /// - [`TrustError::NotSignedByParent`] if the parent did not sign it or is
    ///   not a CA
    pub fn verify_chain_at<'a>(
        &self,
        trusted: &'a [Certificate],
        now: DateTime<Utc>,
    ) -> Result<&'a Certificate, TrustError> {
        if self.has_expired_at(now) {
            debug!(cert = %self.pretty_cert(), "chain rejected: certificate has expired");
            return Err(TrustError::Expired {
                subject: self.pretty_cert(),
            });
        }

        for (index, root) in trusted.iter().enumerate() {
            if !self.is_signed_by_cert(root) {
                debug!(
                    cert = %self.pretty_name(),
                    root = index + 1,
                    "not a direct descendant of trusted root"
                );
                continue;
            }
            if root.has_expired_at(now) {
                debug!(
                    cert = %self.pretty_cert(),
                    root = %root.pretty_cert(),
                    "chain rejected: signing trusted root has expired"
                );
                return Err(TrustError::Expired {
                    subject: format!(
                        "{} signer trusted_cert {}",
                        self.pretty_name(),
                        root.pretty_name()
                    ),
                });
            }
            debug!(
                cert = %self.pretty_name(),
                root = %root.pretty_name(),
                "chain accepted: signed by trusted root"
            );
            return Ok(root);
        }

        let Some(parent) = self.parent() else {
            debug!(
                cert = %self.pretty_name(),
                issuer = %self.issuer(),
                trusted = trusted.len(),
                "chain rejected: no trusted signer and no parent"
            );
            return Err(TrustError::MissingParent {
                subject: self.pretty_name(),
                issuer: self.issuer(),
                trusted: trusted.len(),
            });
        };

        if !self.is_signed_by_cert(parent) {
            debug!(
                cert = %self.pretty_name(),
                parent = %parent.pretty_name(),
                "chain rejected: not signed by parent"
            );
            return Err(TrustError::NotSignedByParent {
                subject: self.pretty_name(),
                parent: parent.pretty_name(),
                reason: format!("issuer {}", self.issuer()),
            });
        }

        // Trusted roots may sign without being CAs; intermediates may not.
        if !parent.is_ca() {
            warn!(
                cert = %self.pretty_name(),
                parent = %parent.pretty_name(),
                "chain rejected: parent is not a CA"
            );
            return Err(TrustError::NotSignedByParent {
                subject: self.pretty_name(),
                parent: parent.pretty_name(),
                reason: "parent is not a CA".to_string(),
            });
        }

        parent.verify_chain_at(trusted, now)
    }
}
