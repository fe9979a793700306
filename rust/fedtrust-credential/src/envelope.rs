use serde::{Deserialize, Serialize};

use crate::{
    credential::{CREDENTIAL_TYPE, Credential},
    error::CredentialError,
};

/// Envelope version written for credentials of this crate.
pub const CREDENTIAL_VERSION: &str = "3";

/// The typed wrapper credentials travel in across API calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEnvelope {
    /// Credential format, `geni_sfa` here
    pub geni_type: String,
    /// Format version
    pub geni_version: String,
    /// The signed document
    pub geni_value: String,
}

impl CredentialEnvelope {
    /// Wrap a credential, encoding it first if needed.
    ///
    /// # Errors
    ///
    /// See [`Credential::save_to_string`].
    pub fn wrap(credential: &mut Credential) -> Result<Self, CredentialError> {
        Ok(Self {
            geni_type: CREDENTIAL_TYPE.into(),
            geni_version: credential
                .version()
                .unwrap_or(CREDENTIAL_VERSION)
                .to_string(),
            geni_value: credential.save_to_string()?,
        })
    }

    /// Decode the wrapped credential.
    ///
    /// # Errors
    ///
    /// [`CredentialError::MalformedDocument`] for another credential type,
    /// or see [`Credential::load_from_string`].
    pub fn open(&self) -> Result<Credential, CredentialError> {
        if self.geni_type != CREDENTIAL_TYPE {
            return Err(CredentialError::MalformedDocument(format!(
                "unsupported credential type {}",
                self.geni_type
            )));
        }
        let mut credential = Credential::load_from_string(&self.geni_value)?;
        credential.set_version(Some(self.geni_version.clone()));
        Ok(credential)
    }
}
