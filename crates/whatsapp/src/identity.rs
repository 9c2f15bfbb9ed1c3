use std::{
    fs,
    path::{Path, PathBuf},
};

use {serde::Deserialize, tracing::debug};

use crate::error::{Context, Result};

/// Credentials file the sidecar writes after a successful pairing.
const CREDS_FILE: &str = "creds.json";

#[derive(Deserialize)]
struct Creds {
    me: Option<Me>,
}

#[derive(Deserialize)]
struct Me {
    id: String,
}

/// Read-only view of the device credentials the sidecar keeps on disk.
///
/// The store never writes credentials itself; it only tells whether a
/// paired identity exists and can wipe the directory to force re-pairing.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    dir: PathBuf,
}

impl IdentityStore {
    /// Open (creating if needed) the auth directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("cannot open identity store at {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The paired device JID, if any.
    pub fn device_id(&self) -> Option<String> {
        let path = self.dir.join(CREDS_FILE);
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Creds>(&raw) {
            Ok(creds) => creds.me.map(|me| me.id).filter(|id| !id.is_empty()),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "unreadable credentials");
                None
            },
        }
    }

    pub fn has_identity(&self) -> bool {
        self.device_id().is_some()
    }

    /// Remove all stored credentials. Returns whether anything was removed.
    pub fn clear(&self) -> Result<bool> {
        let had_identity = self.has_identity();
        fs::remove_dir_all(&self.dir)
            .with_context(|| format!("cannot clear {}", self.dir.display()))?;
        fs::create_dir_all(&self.dir)?;
        Ok(had_identity)
    }
}
