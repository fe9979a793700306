//! Provisioning tickets.
//!
//! A ticket is a signed certificate whose `ticketData` extension carries a
//! JSON payload: caller and object GIDs, free-form attributes, a resource
//! description and a delegate flag. Tickets have no delegation chain.

use std::{collections::BTreeMap, fmt::Write as _};

use fedtrust_certificate::{Certificate, Gid, TICKET_DATA};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CredentialError;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    #[serde(default)]
    gid_caller: Option<String>,
    #[serde(default)]
    gid_object: Option<String>,
    #[serde(default)]
    attributes: BTreeMap<String, Value>,
    #[serde(default)]
    rspec: String,
    #[serde(default)]
    delegate: bool,
}

/// A signed provisioning ticket.
#[derive(Debug, Clone)]
pub struct Ticket {
    certificate: Certificate,
    caller: Option<Gid>,
    object: Option<Gid>,
    attributes: BTreeMap<String, Value>,
    rspec: String,
    delegate: bool,
}

impl Ticket {
    /// An empty, unsigned ticket valid for `lifetime_days`.
    ///
    /// # Errors
    ///
    /// See [`Certificate::create`].
    pub fn create(lifetime_days: u32) -> Result<Self, CredentialError> {
        Ok(Self::wrap(Certificate::create(lifetime_days)?))
    }

    fn wrap(certificate: Certificate) -> Self {
        Self {
            certificate,
            caller: None,
            object: None,
            attributes: BTreeMap::new(),
            rspec: String::new(),
            delegate: false,
        }
    }

    /// Read a ticket from its certificate, decoding the payload.
    ///
    /// # Errors
    ///
    /// See [`Ticket::decode`].
    pub fn from_certificate(certificate: Certificate) -> Result<Self, CredentialError> {
        let mut ticket = Self::wrap(certificate);
        ticket.decode()?;
        Ok(ticket)
    }

    /// Load a ticket from PEM text.
    ///
    /// # Errors
    ///
    /// Any certificate load error, or see [`Ticket::decode`].
    pub fn load_from_string(text: &str) -> Result<Self, CredentialError> {
        Self::from_certificate(Certificate::load_from_string(text)?)
    }

    /// PEM text of the signed ticket.
    ///
    /// # Errors
    ///
    /// See [`Certificate::save_to_string`].
    pub fn save_to_string(&self, include_parents: bool) -> Result<String, CredentialError> {
        Ok(self.certificate.save_to_string(include_parents)?)
    }

    /// The underlying certificate.
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// The underlying certificate, for setting subject, key and issuer.
    pub fn certificate_mut(&mut self) -> &mut Certificate {
        &mut self.certificate
    }

    /// Set the GID the ticket is issued to.
    pub fn set_gid_caller(&mut self, gid: Gid) {
        self.caller = Some(gid);
    }

    /// The GID the ticket is issued to.
    pub fn gid_caller(&self) -> Option<&Gid> {
        self.caller.as_ref()
    }

    /// Set the GID the ticket is about.
    pub fn set_gid_object(&mut self, gid: Gid) {
        self.object = Some(gid);
    }

    /// The GID the ticket is about.
    pub fn gid_object(&self) -> Option<&Gid> {
        self.object.as_ref()
    }

    /// Replace the attributes.
    pub fn set_attributes(&mut self, attributes: BTreeMap<String, Value>) {
        self.attributes = attributes;
    }

    /// Free-form attributes.
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Set the resource description.
    pub fn set_rspec(&mut self, rspec: impl Into<String>) {
        self.rspec = rspec.into();
    }

    /// The resource description, uninterpreted.
    pub fn rspec(&self) -> &str {
        &self.rspec
    }

    /// Set whether the ticket may be handed on.
    pub fn set_delegate(&mut self, delegate: bool) {
        self.delegate = delegate;
    }

    /// Whether the ticket may be handed on.
    pub fn delegate(&self) -> bool {
        self.delegate
    }

    /// Store the payload in the `ticketData` extension.
    ///
    /// # Errors
    ///
    /// [`CredentialError::Certificate`] if a GID cannot be serialized or
    /// the extension already holds a different payload.
    pub fn encode(&mut self) -> Result<(), CredentialError> {
        let payload = Payload {
            gid_caller: self
                .caller
                .as_ref()
                .map(|gid| gid.save_to_string(true))
                .transpose()?,
            gid_object: self
                .object
                .as_ref()
                .map(|gid| gid.save_to_string(true))
                .transpose()?,
            attributes: self.attributes.clone(),
            rspec: self.rspec.clone(),
            delegate: self.delegate,
        };
        self.certificate
            .set_data(TICKET_DATA, &serde_json::to_string(&payload)?)?;
        Ok(())
    }

    /// Read the payload back from the `ticketData` extension. A
    /// certificate without one decodes as an empty ticket.
    ///
    /// # Errors
    ///
    /// [`CredentialError::MalformedDocument`] if the payload is not valid
    /// JSON, or any GID load error.
    pub fn decode(&mut self) -> Result<(), CredentialError> {
        let payload: Payload = match self.certificate.get_data(TICKET_DATA) {
            Some(data) => serde_json::from_str(data)?,
            None => Payload::default(),
        };
        self.caller = payload
            .gid_caller
            .as_deref()
            .map(Gid::load_from_string)
            .transpose()?;
        self.object = payload
            .gid_object
            .as_deref()
            .map(Gid::load_from_string)
            .transpose()?;
        self.attributes = payload.attributes;
        self.rspec = payload.rspec;
        self.delegate = payload.delegate;
        Ok(())
    }

    /// Encode the payload and sign the certificate.
    ///
    /// # Errors
    ///
    /// See [`Ticket::encode`] and [`Certificate::sign`].
    pub fn sign(&mut self) -> Result<(), CredentialError> {
        self.encode()?;
        self.certificate.sign()?;
        Ok(())
    }

    /// Multi-line description for diagnostics.
    pub fn dump_string(&self, dump_parents: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "TICKET {}", self.certificate.subject());
        for (label, gid) in [("gidCaller", &self.caller), ("gidObject", &self.object)] {
            let _ = writeln!(out, "  {label}:");
            if let Some(gid) = gid {
                for line in gid.dump_string(false).lines() {
                    let _ = writeln!(out, "        {line}");
                }
            }
        }
        let _ = writeln!(out, "  attributes:");
        for (name, value) in &self.attributes {
            let _ = writeln!(out, "         {name} {value}");
        }
        let _ = writeln!(out, "       rspec:");
        let _ = writeln!(out, "         {}", self.rspec);
        if let (Some(parent), true) = (self.certificate.parent(), dump_parents) {
            let _ = write!(out, "PARENT {}", parent.dump_string(false));
        }
        out
    }
}
