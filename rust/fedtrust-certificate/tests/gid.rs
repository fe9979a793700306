//! GID minting, encoding and namespace checks.
mod gid {
    use std::sync::OnceLock;

    use fedtrust_certificate::{Certificate, Gid, TrustError, Xrn};
    use fedtrust_keypair::Keypair;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use testresult::TestResult;
    use uuid::Uuid;

    fn key(index: usize) -> &'static Keypair {
        static KEYS: OnceLock<Vec<Keypair>> = OnceLock::new();
        &KEYS.get_or_init(|| {
            (0..4)
                .map(|seed| {
                    let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(200 + seed);
                    Keypair::generate_with(&mut rng).expect("generate test key")
                })
                .collect()
        })[index]
    }

    fn authority() -> &'static Gid {
        static AUTHORITY: OnceLock<Gid> = OnceLock::new();
        AUTHORITY.get_or_init(|| Gid::create_authority("plc", key(0)).expect("mint authority"))
    }

    fn trusted() -> Vec<Certificate> {
        vec![authority().certificate().clone()]
    }

    #[test]
    fn it_mints_a_self_signed_authority() -> TestResult {
        let authority = authority();
        assert_eq!(authority.hrn(), "plc");
        assert_eq!(authority.urn(), "urn:publicid:IDN+plc+authority+sa");
        assert_eq!(authority.gid_type(), Some("authority"));
        assert!(authority.is_ca());
        assert!(authority.is_signed_by_cert(authority));
        assert!(authority.uuid().is_some());
        authority.verify_chain(&trusted())?;
        Ok(())
    }

    #[test]
    fn it_mints_a_user_under_the_authority() -> TestResult {
        let uuid = Uuid::new_v4();
        let xrn = Xrn::from_hrn("plc.alice", Some("user"))?;
        let user = Gid::create(
            &xrn,
            Some(uuid),
            key(1),
            key(0),
            Some(authority()),
            Some("alice@example.org"),
        )?;

        assert!(!user.is_ca());
        assert!(user.is_pubkey(key(1)));
        assert_eq!(user.issuer(), "plc");
        assert!(user.parent().is_some_and(|parent| parent.is_same(authority())));
        user.verify_chain(&trusted())?;

        let loaded = Gid::load_from_string(&user.save_to_string(true)?)?;
        assert_eq!(loaded.hrn(), "plc.alice");
        assert_eq!(loaded.urn(), "urn:publicid:IDN+plc+user+alice");
        assert_eq!(loaded.gid_type(), Some("user"));
        assert_eq!(loaded.uuid(), Some(&uuid));
        assert_eq!(loaded.email(), Some("alice@example.org"));
        assert!(loaded.parent_gid()?.is_some_and(|parent| parent.is_authority()));
        loaded.verify_chain(&trusted())?;
        Ok(())
    }

    #[test]
    fn it_chains_through_sub_authorities() -> TestResult {
        let site = Gid::builder(Xrn::from_hrn("plc.princeton", Some("authority"))?)
            .issue(key(1), key(0), Some(authority()))?;
        assert!(site.is_ca());

        let user = Gid::builder(Xrn::from_hrn("plc.princeton.alice", Some("user"))?)
            .issue(key(2), key(1), Some(&site))?;

        assert_eq!(user.pretty_chain(), "plc.princeton.alice->plc.princeton->plc");
        user.verify_chain(&trusted())?;
        Ok(())
    }

    #[test]
    fn it_rejects_names_outside_the_signer_namespace() -> TestResult {
        let stranger = Gid::builder(Xrn::from_hrn("ple.bob", Some("user"))?)
            .issue(key(1), key(0), Some(authority()))?;

        assert_eq!(
            stranger.verify_chain(&trusted()).map(|_| ()),
            Err(TrustError::NotAuthorityFor {
                parent: "plc".into(),
                child: "ple.bob".into(),
            })
        );
        Ok(())
    }

    #[test]
    fn it_rejects_signers_that_are_not_authorities() -> TestResult {
        let user = Gid::builder(Xrn::from_hrn("plc.alice", Some("user"))?)
            .ca(true)
            .issue(key(1), key(0), Some(authority()))?;
        let tool = Gid::builder(Xrn::from_hrn("plc.alice.tool", Some("user"))?)
            .issue(key(2), key(1), Some(&user))?;

        assert_eq!(
            tool.verify_chain(&trusted()).map(|_| ()),
            Err(TrustError::NotAnAuthority {
                subject: "plc.alice".into(),
                kind: "user".into(),
            })
        );
        Ok(())
    }

    #[test]
    fn it_is_untrusted_without_roots() -> TestResult {
        let user = Gid::builder(Xrn::from_hrn("plc.alice", Some("user"))?)
            .issue(key(1), key(0), Some(authority()))?;
        assert!(matches!(
            user.verify_chain(&[]),
            Err(TrustError::MissingParent { .. })
        ));
        Ok(())
    }
}
