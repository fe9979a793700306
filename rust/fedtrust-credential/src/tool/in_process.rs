use base64::{Engine, prelude::BASE64_STANDARD};
use fedtrust_certificate::{Certificate, Gid};
use fedtrust_keypair::Keypair;
use sha2::{Digest, Sha256};

use super::{SignatureTool, bound_credential, embedded_chain, signature_id, signed_reference};
use crate::{
    document::{Document, Element},
    error::ToolError,
};

/// RSA-SHA256 XML signatures computed in this process.
///
/// The digest covers this crate's serialization of the referenced element
/// and the signature value covers the serialized `SignedInfo`. Documents
/// signed here verify here; they are not canonicalized for other
/// XML-DSig implementations.
///
/// The referenced credential is the one named by the signed `Reference`
/// URI, looked up only along the top-level credential and its parents,
/// which is where decoding reads credentials from.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessSigner;

impl SignatureTool for InProcessSigner {
    fn sign(
        &self,
        document: &str,
        node_id: &str,
        key: &Keypair,
        issuer: &Gid,
    ) -> Result<String, ToolError> {
        let mut document = Document::parse(document).map_err(failed)?;

        let signature = find_signature(document.root(), node_id)?;
        let refid = reference_of(signature, node_id)?;
        let digest = digest_of(document.root(), &refid)?;

        let mut bodies = Vec::new();
        let mut next = Some(issuer.certificate());
        while let Some(certificate) = next {
            bodies.push(BASE64_STANDARD.encode(certificate.to_der().map_err(failed)?));
            next = certificate.parent();
        }

        let signature = document
            .root_mut()
            .find_by_id_mut(node_id)
            .ok_or_else(|| missing(node_id))?;
        let signed_info = signature
            .child_mut("SignedInfo")
            .ok_or_else(|| missing("SignedInfo"))?;
        signed_info
            .child_mut("Reference")
            .and_then(|reference| reference.child_mut("DigestValue"))
            .ok_or_else(|| missing("DigestValue"))?
            .set_text(digest);
        let signed_info = signed_info.to_xml().map_err(failed)?;
        let value = BASE64_STANDARD.encode(key.sign(signed_info.as_bytes()).map_err(failed)?);

        signature
            .child_mut("SignatureValue")
            .ok_or_else(|| missing("SignatureValue"))?
            .set_text(value);
        let x509 = signature
            .child_mut("KeyInfo")
            .and_then(|info| info.child_mut("X509Data"))
            .ok_or_else(|| missing("X509Data"))?;
        if let Some(subject) = x509.child_mut("X509SubjectName") {
            subject.set_text(format!("CN={}", issuer.subject()));
        }
        x509.remove_children("X509Certificate");
        for body in bodies {
            x509.push(Element::text_element("X509Certificate", body));
        }

        tracing::debug!(node_id, signer = issuer.hrn(), "signed in process");
        document.to_xml().map_err(failed)
    }

    fn verify(
        &self,
        document: &str,
        node_id: &str,
        trusted: &[Certificate],
    ) -> Result<(), ToolError> {
        let document = Document::parse(document).map_err(failed)?;
        let signature = find_signature(document.root(), node_id)?;
        let signed_info = signature
            .child("SignedInfo")
            .ok_or_else(|| missing("SignedInfo"))?;

        let refid = reference_of(signature, node_id)?;
        let expected = signed_info
            .child("Reference")
            .and_then(|reference| reference.child_text("DigestValue"))
            .ok_or_else(|| missing("DigestValue"))?;
        if digest_of(document.root(), &refid)? != expected.trim() {
            return Err(ToolError::Failed(format!("digest mismatch for {refid}")));
        }

        let chain = embedded_chain(signature)
            .ok_or_else(|| ToolError::Failed("no certificate in signature".into()))?;
        let signer = Certificate::load_from_string(&chain).map_err(failed)?;
        let value = signature
            .child_text("SignatureValue")
            .ok_or_else(|| missing("SignatureValue"))?;
        let value: String = value.chars().filter(|c| !c.is_whitespace()).collect();
        let value = BASE64_STANDARD.decode(value).map_err(failed)?;
        let signed_info = signed_info.to_xml().map_err(failed)?;
        if !signer
            .pubkey()
            .map_err(failed)?
            .verify(signed_info.as_bytes(), &value)
        {
            return Err(ToolError::Failed(format!(
                "signature value mismatch for {refid}"
            )));
        }

        signer
            .verify_chain(trusted)
            .map_err(|e| ToolError::Failed(format!("signer certificate: {e}")))?;
        Ok(())
    }
}

fn find_signature<'a>(root: &'a Element, node_id: &str) -> Result<&'a Element, ToolError> {
    root.find_by_id(node_id).ok_or_else(|| missing(node_id))
}

fn reference_of(signature: &Element, node_id: &str) -> Result<String, ToolError> {
    let refid = signed_reference(signature)
        .ok_or_else(|| ToolError::Failed(format!("{node_id} references nothing")))?;
    if signature_id(&refid) != node_id {
        return Err(ToolError::Failed(format!("{node_id} references {refid}")));
    }
    Ok(refid)
}

fn digest_of(root: &Element, refid: &str) -> Result<String, ToolError> {
    let element = bound_credential(root, refid).ok_or_else(|| missing(refid))?;
    let xml = element.to_xml().map_err(failed)?;
    Ok(BASE64_STANDARD.encode(Sha256::digest(xml.as_bytes())))
}

fn missing(what: &str) -> ToolError {
    ToolError::Failed(format!("missing node {what}"))
}

fn failed(error: impl std::fmt::Display) -> ToolError {
    ToolError::Failed(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::signature_template;
    use fedtrust_certificate::Certificate;
    use rand::SeedableRng;
    use std::sync::OnceLock;
    use testresult::TestResult;

    fn authority() -> &'static (Keypair, Gid) {
        static AUTHORITY: OnceLock<(Keypair, Gid)> = OnceLock::new();
        AUTHORITY.get_or_init(|| {
            let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(7);
            let key = Keypair::generate_with(&mut rng).expect("generate test key");
            let gid = Gid::create_authority("plc", &key).expect("mint authority");
            (key, gid)
        })
    }

    fn unsigned() -> Result<String, crate::error::DocumentError> {
        Document::new(
            Element::new("signed-credential")
                .with_child(
                    Element::new("credential")
                        .with_attribute("xml:id", "ref0")
                        .with_child(Element::text_element("type", "privilege")),
                )
                .with_child(Element::new("signatures").with_child(signature_template("ref0"))),
        )
        .to_xml()
    }

    #[test]
    fn it_signs_and_verifies_a_node() -> TestResult {
        let (key, gid) = authority();
        let signed = InProcessSigner.sign(&unsigned()?, "Sig_ref0", key, gid)?;
        let trusted: Vec<Certificate> = vec![gid.certificate().clone()];
        InProcessSigner.verify(&signed, "Sig_ref0", &trusted)?;
        Ok(())
    }

    #[test]
    fn it_detects_tampering() -> TestResult {
        let (key, gid) = authority();
        let signed = InProcessSigner.sign(&unsigned()?, "Sig_ref0", key, gid)?;
        let tampered = signed.replace("<type>privilege</type>", "<type>ticket</type>");
        let trusted = vec![gid.certificate().clone()];
        assert!(matches!(
            InProcessSigner.verify(&tampered, "Sig_ref0", &trusted),
            Err(ToolError::Failed(reason)) if reason.starts_with("digest mismatch")
        ));
        Ok(())
    }

    #[test]
    fn it_rejects_untrusted_signers() -> TestResult {
        let (key, gid) = authority();
        let signed = InProcessSigner.sign(&unsigned()?, "Sig_ref0", key, gid)?;
        assert!(matches!(
            InProcessSigner.verify(&signed, "Sig_ref0", &[]),
            Err(ToolError::Failed(reason)) if reason.starts_with("signer certificate")
        ));
        Ok(())
    }

    #[test]
    fn it_ignores_credentials_off_the_parent_chain() -> TestResult {
        let (key, gid) = authority();
        let signed = InProcessSigner.sign(&unsigned()?, "Sig_ref0", key, gid)?;
        let original = signed
            .find("<credential")
            .zip(signed.find("</credential>"))
            .map(|(start, end)| &signed[start..end + "</credential>".len()])
            .ok_or("no credential")?;
        let forged = original
            .replace(" xml:id=\"ref0\"", "")
            .replace("<type>privilege</type>", "<type>ticket</type>");
        let wrapped = signed.replace(original, &format!("<wrap>{original}</wrap>{forged}"));

        let trusted = vec![gid.certificate().clone()];
        assert!(matches!(
            InProcessSigner.verify(&wrapped, "Sig_ref0", &trusted),
            Err(ToolError::Failed(reason)) if reason == "missing node ref0"
        ));
        Ok(())
    }

    #[test]
    fn it_binds_the_signature_to_its_signed_reference() -> TestResult {
        let (key, gid) = authority();
        let signed = InProcessSigner.sign(&unsigned()?, "Sig_ref0", key, gid)?;
        let renamed = signed.replace("xml:id=\"Sig_ref0\"", "xml:id=\"Sig_ref9\"");
        let trusted = vec![gid.certificate().clone()];
        assert!(matches!(
            InProcessSigner.verify(&renamed, "Sig_ref9", &trusted),
            Err(ToolError::Failed(reason)) if reason == "Sig_ref9 references ref0"
        ));
        Ok(())
    }
}
