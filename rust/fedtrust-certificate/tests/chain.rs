//! Chain of trust verification over hand-built certificate chains.
mod chain {
    use std::sync::OnceLock;

    use chrono::{TimeDelta, Utc};
    use fedtrust_certificate::{
        Certificate, CertificateError, DEFAULT_LIFETIME_DAYS, PARENT_SEPARATOR, TrustError,
    };
    use fedtrust_keypair::Keypair;
    use rand::SeedableRng;
    use testresult::TestResult;

    fn key(index: usize) -> &'static Keypair {
        static KEYS: OnceLock<Vec<Keypair>> = OnceLock::new();
        &KEYS.get_or_init(|| {
            (0..4)
                .map(|seed| {
                    let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(100 + seed);
                    Keypair::generate_with(&mut rng).expect("generate test key")
                })
                .collect()
        })[index]
    }

    fn root(name: &str, signer: &Keypair) -> Result<Certificate, CertificateError> {
        let mut certificate = Certificate::create(DEFAULT_LIFETIME_DAYS)?;
        certificate.set_subject(name)?;
        certificate.set_pubkey(signer)?;
        certificate.set_is_ca(true)?;
        certificate.set_issuer(signer.clone(), name)?;
        certificate.sign()?;
        Ok(certificate)
    }

    fn issue(
        name: &str,
        subject_key: &Keypair,
        issuer: &Certificate,
        issuer_key: &Keypair,
        is_ca: bool,
        with_parent: bool,
    ) -> Result<Certificate, CertificateError> {
        let mut certificate = Certificate::create(DEFAULT_LIFETIME_DAYS)?;
        certificate.set_subject(name)?;
        certificate.set_pubkey(subject_key)?;
        certificate.set_is_ca(is_ca)?;
        certificate.set_issuer_from(issuer_key.clone(), issuer);
        if with_parent {
            certificate.set_parent(issuer.clone());
        }
        certificate.sign()?;
        Ok(certificate)
    }

    #[test]
    fn it_trusts_a_trusted_root_itself() -> TestResult {
        let root = root("plc", key(0))?;
        let trusted = [root.clone()];
        let anchor = root.verify_chain(&trusted)?;
        assert!(anchor.is_same(&root));
        Ok(())
    }

    #[test]
    fn it_trusts_a_leaf_signed_directly_by_a_root() -> TestResult {
        let root = root("plc", key(0))?;
        let leaf = issue("plc.alice", key(1), &root, key(0), false, false)?;
        let trusted = [root];
        assert!(leaf.verify_chain(&trusted)?.is_same(&trusted[0]));
        Ok(())
    }

    #[test]
    fn it_walks_ca_parents_to_the_root() -> TestResult {
        let root = root("plc", key(0))?;
        let site = issue("plc.site", key(1), &root, key(0), true, true)?;
        let team = issue("plc.site.team", key(2), &site, key(1), true, true)?;
        let leaf = issue("plc.site.team.alice", key(3), &team, key(2), false, true)?;

        let trusted = [root];
        assert!(leaf.verify_chain(&trusted)?.is_same(&trusted[0]));
        assert_eq!(
            leaf.pretty_chain(),
            "plc.site.team.alice->plc.site.team->plc.site->plc"
        );
        Ok(())
    }

    #[test]
    fn it_rejects_a_parent_that_is_not_a_ca() -> TestResult {
        let root = root("plc", key(0))?;
        let user = issue("plc.alice", key(1), &root, key(0), false, true)?;
        let tool = issue("plc.alice.tool", key(2), &user, key(1), false, true)?;

        let trusted = [root];
        assert!(matches!(
            tool.verify_chain(&trusted),
            Err(TrustError::NotSignedByParent { ref reason, .. }) if reason == "parent is not a CA"
        ));
        Ok(())
    }

    #[test]
    fn it_rejects_a_parent_that_did_not_sign() -> TestResult {
        let root = root("plc", key(0))?;
        let site = issue("plc.site", key(1), &root, key(0), true, true)?;
        let other = issue("plc.other", key(2), &root, key(0), true, true)?;
        let mut leaf = issue("plc.site.alice", key(3), &site, key(1), false, false)?;
        leaf.set_parent(other);

        assert!(matches!(
            leaf.verify_chain(&[root]),
            Err(TrustError::NotSignedByParent { .. })
        ));
        Ok(())
    }

    #[test]
    fn it_reports_a_missing_parent() -> TestResult {
        let root = root("plc", key(0))?;
        let leaf = issue("plc.alice", key(1), &root, key(0), false, false)?;

        assert_eq!(
            leaf.verify_chain(&[]).map(Certificate::subject),
            Err(TrustError::MissingParent {
                subject: "plc.alice".into(),
                issuer: "plc".into(),
                trusted: 0,
            })
        );
        Ok(())
    }

    #[test]
    fn it_rejects_expired_certificates_regardless_of_roots() -> TestResult {
        let root = root("plc", key(0))?;
        let mut leaf = Certificate::create(DEFAULT_LIFETIME_DAYS)?;
        leaf.set_subject("plc.alice")?;
        leaf.set_pubkey(key(1))?;
        leaf.set_validity(
            Utc::now() - TimeDelta::days(10),
            Utc::now() - TimeDelta::days(1),
        )?;
        leaf.set_issuer_from(key(0).clone(), &root);
        leaf.sign()?;

        assert!(matches!(
            leaf.verify_chain(&[root.clone()]),
            Err(TrustError::Expired { .. })
        ));
        assert!(matches!(leaf.verify_chain(&[]), Err(TrustError::Expired { .. })));

        let later = Utc::now() + TimeDelta::days(i64::from(DEFAULT_LIFETIME_DAYS) + 1);
        assert!(matches!(
            root.verify_chain_at(&[root.clone()], later),
            Err(TrustError::Expired { .. })
        ));
        Ok(())
    }

    #[test]
    fn it_stops_at_an_expired_signing_root() -> TestResult {
        let mut expired_root = Certificate::create(DEFAULT_LIFETIME_DAYS)?;
        expired_root.set_subject("plc")?;
        expired_root.set_pubkey(key(0))?;
        expired_root.set_validity(
            Utc::now() - TimeDelta::days(10),
            Utc::now() - TimeDelta::days(1),
        )?;
        expired_root.set_issuer(key(0).clone(), "plc")?;
        expired_root.sign()?;
        let fresh_root = root("plc", key(0))?;

        let leaf = issue("plc.alice", key(1), &fresh_root, key(0), false, false)?;

        // Same key, so the expired root matches first and ends the scan.
        assert!(matches!(
            leaf.verify_chain(&[expired_root.clone(), fresh_root.clone()]),
            Err(TrustError::Expired { .. })
        ));
        assert!(
            leaf.verify_chain(&[fresh_root.clone(), expired_root])?
                .is_same(&fresh_root)
        );
        Ok(())
    }

    #[test]
    fn it_round_trips_a_pem_chain() -> TestResult {
        let root = root("plc", key(0))?;
        let site = issue("plc.site", key(1), &root, key(0), true, true)?;
        let leaf = issue("plc.site.alice", key(2), &site, key(1), false, true)?;

        let text = leaf.save_to_string(true)?;
        assert_eq!(text.matches("-----BEGIN CERTIFICATE-----").count(), 3);

        let loaded = Certificate::load_from_string(&text)?;
        assert!(loaded.is_same(&leaf));
        assert_eq!(loaded.pretty_chain(), "plc.site.alice->plc.site->plc");
        assert!(loaded.parent().is_some_and(|parent| parent.is_ca()));
        assert!(loaded.verify_chain(&[root])?.is_signed());
        Ok(())
    }

    #[test]
    fn it_splits_on_the_parent_separator() -> TestResult {
        let root = root("plc", key(0))?;
        let leaf = issue("plc.alice", key(1), &root, key(0), false, false)?;
        let text = format!(
            "{}{PARENT_SEPARATOR}{}",
            leaf.save_to_string(false)?,
            root.save_to_string(false)?
        );

        let loaded = Certificate::load_from_string(&text)?;
        assert!(loaded.parent().is_some_and(|parent| parent.is_same(&root)));
        Ok(())
    }

    #[test]
    fn it_saves_and_loads_files() -> TestResult {
        let root = root("plc", key(0))?;
        let mut leaf = issue("plc.alice", key(1), &root, key(0), false, true)?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("alice.gid");

        leaf.save_to_file(&path, true)?;
        let loaded = Certificate::load_from_file(&path)?;
        assert_eq!(loaded.filename(), Some(path.as_path()));
        assert_eq!(loaded.pretty_name(), path.display().to_string());
        assert!(loaded.parent().is_some());
        Ok(())
    }
}
