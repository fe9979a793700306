//! Tickets carry their payload through a signed certificate.
mod ticket {
    use std::{collections::BTreeMap, sync::OnceLock};

    use fedtrust_certificate::{Certificate, Gid, Xrn};
    use fedtrust_credential::Ticket;
    use fedtrust_keypair::Keypair;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use serde_json::json;
    use testresult::TestResult;

    fn key(index: usize) -> &'static Keypair {
        static KEYS: OnceLock<Vec<Keypair>> = OnceLock::new();
        &KEYS.get_or_init(|| {
            (0..2)
                .map(|seed| {
                    let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(400 + seed);
                    Keypair::generate_with(&mut rng).expect("generate test key")
                })
                .collect()
        })[index]
    }

    fn authority() -> &'static Gid {
        static AUTHORITY: OnceLock<Gid> = OnceLock::new();
        AUTHORITY.get_or_init(|| Gid::create_authority("plc", key(0)).expect("mint authority"))
    }

    fn user() -> Result<Gid, Box<dyn std::error::Error>> {
        Ok(Gid::builder(Xrn::from_hrn("plc.alice", Some("user"))?).issue(
            key(1),
            key(0),
            Some(authority()),
        )?)
    }

    fn blank(subject: &str) -> Result<Ticket, Box<dyn std::error::Error>> {
        let mut ticket = Ticket::create(1)?;
        let certificate = ticket.certificate_mut();
        certificate.set_subject(subject)?;
        certificate.set_pubkey(key(1))?;
        certificate.set_issuer_from(key(0).clone(), authority());
        Ok(ticket)
    }

    #[test]
    fn it_carries_its_payload_through_pem() -> TestResult {
        let user = user()?;
        let mut ticket = blank("plc.alice.ticket")?;
        ticket.set_gid_caller(user.clone());
        ticket.set_gid_object(authority().clone());
        ticket.set_attributes(BTreeMap::from([
            ("slivers".to_string(), json!(["node1", "node2"])),
            ("cpu_share".to_string(), json!(32)),
        ]));
        ticket.set_rspec("<rspec type=\"request\"/>");
        ticket.set_delegate(true);
        ticket.sign()?;

        let loaded = Ticket::load_from_string(&ticket.save_to_string(false)?)?;
        assert_eq!(
            loaded.gid_caller().map(Gid::urn),
            Some("urn:publicid:IDN+plc+user+alice")
        );
        assert_eq!(loaded.gid_object().map(Gid::hrn), Some("plc"));
        assert_eq!(loaded.attributes(), ticket.attributes());
        assert_eq!(loaded.rspec(), "<rspec type=\"request\"/>");
        assert!(loaded.delegate());
        assert!(loaded.certificate().is_signed_by_cert(authority()));
        assert!(loaded.dump_string(false).starts_with("TICKET plc.alice.ticket"));
        Ok(())
    }

    #[test]
    fn it_decodes_a_bare_certificate_as_an_empty_ticket() -> TestResult {
        let mut certificate = Certificate::create(1)?;
        certificate.set_subject("plc.empty")?;
        certificate.set_pubkey(key(1))?;
        certificate.set_issuer(key(0).clone(), "plc")?;
        certificate.sign()?;

        let ticket = Ticket::from_certificate(certificate)?;
        assert!(ticket.gid_caller().is_none());
        assert!(ticket.gid_object().is_none());
        assert!(ticket.attributes().is_empty());
        assert_eq!(ticket.rspec(), "");
        assert!(!ticket.delegate());
        Ok(())
    }
}
