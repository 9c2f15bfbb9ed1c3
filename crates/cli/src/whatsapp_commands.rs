use std::io::Write;

use {anyhow::Result, chatrelay_config::ChatRelayConfig, chatrelay_whatsapp::IdentityStore};

pub fn status(config: &ChatRelayConfig, out: &mut impl Write) -> Result<()> {
    let auth_dir = config.whatsapp.resolved_auth_dir();
    let identity = IdentityStore::open(auth_dir.clone())?;

    match identity.device_id() {
        Some(id) => writeln!(out, "Identity:    paired as {id}")?,
        None => writeln!(out, "Identity:    not paired, the next run shows a pairing code")?,
    }
    writeln!(out, "Auth dir:    {}", auth_dir.display())?;
    writeln!(out, "Sidecar:     {}", config.whatsapp.sidecar_url())?;
    writeln!(out, "Completion:  {}", config.completion.endpoint)?;
    writeln!(
        out,
        "Relay:       {}s deadline, {} in flight",
        config.relay.deadline_secs, config.relay.max_in_flight
    )?;
    if config.relay.allowlist.is_empty() {
        writeln!(out, "Allowlist:   everyone")?;
    } else {
        writeln!(out, "Allowlist:   {}", config.relay.allowlist.join(", "))?;
    }
    Ok(())
}

pub fn logout(config: &ChatRelayConfig, out: &mut impl Write) -> Result<()> {
    let identity = IdentityStore::open(config.whatsapp.resolved_auth_dir())?;
    if identity.clear()? {
        writeln!(
            out,
            "Removed stored identity from {}",
            identity.dir().display()
        )?;
    } else {
        writeln!(out, "No stored identity.")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, std::path::Path};

    fn config(auth_dir: &Path) -> ChatRelayConfig {
        let mut config = ChatRelayConfig::default();
        config.whatsapp.auth_dir = Some(auth_dir.to_path_buf());
        config
    }

    fn pair(auth_dir: &Path) {
        std::fs::create_dir_all(auth_dir).unwrap();
        std::fs::write(
            auth_dir.join("creds.json"),
            r#"{"me": {"id": "491700000000:7@s.whatsapp.net"}}"#,
        )
        .unwrap();
    }

    #[test]
    fn status_reports_identity_and_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let auth = dir.path().join("auth");
        pair(&auth);

        let mut out = Vec::new();
        status(&config(&auth), &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains("paired as 491700000000:7@s.whatsapp.net"));
        assert!(out.contains("http://localhost:5001/chat"));
        assert!(out.contains("Allowlist:   everyone"));
    }

    #[test]
    fn logout_clears_identity_once() {
        let dir = tempfile::tempdir().unwrap();
        let auth = dir.path().join("auth");
        pair(&auth);
        let config = config(&auth);

        let mut out = Vec::new();
        logout(&config, &mut out).unwrap();
        logout(&config, &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.starts_with("Removed stored identity"));
        assert!(out.ends_with("No stored identity.\n"));

        let mut out = Vec::new();
        status(&config, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("not paired"));
    }
}
