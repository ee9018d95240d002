use crate::errors::{AppError, AppResult};
use crate::types::now_ts;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

const TOKEN_FILE_NAME: &str = "token.json";

/// The OAuth credential record as persisted on disk: a flat JSON object with
/// the provider's own field names, so a record written by any standard Google
/// OAuth client can be read back unchanged.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredCredential {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry in milliseconds since the epoch (Google's convention).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl StoredCredential {
    /// Whether the access token is still usable without a refresh exchange.
    /// An unknown expiry counts as expired; we would rather refresh once too
    /// often than send a dead token to the mailbox API.
    pub fn is_fresh(&self) -> bool {
        match self.expiry_date {
            Some(expiry_ms) => now_ts() * 1000 < expiry_ms,
            None => false,
        }
    }

    /// Merge the fields of a refresh response over this record. Providers are
    /// not required to re-issue the refresh token, so the old one is kept
    /// whenever the response omits it.
    pub fn merged_with(&self, fresh: StoredCredential) -> StoredCredential {
        StoredCredential {
            refresh_token: fresh.refresh_token.or_else(|| self.refresh_token.clone()),
            scope: fresh.scope.or_else(|| self.scope.clone()),
            token_type: fresh.token_type.or_else(|| self.token_type.clone()),
            ..fresh
        }
    }
}

/// Durable holder of the single OAuth token record.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(data_dir: &std::path::Path) -> Self {
        Self {
            path: data_dir.join(TOKEN_FILE_NAME),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Load the stored credential. A missing or unreadable file is treated as
    /// "no credential", never as an error; callers signal re-authentication.
    pub fn load(&self) -> Option<StoredCredential> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return None,
        };
        match serde_json::from_str(&raw) {
            Ok(cred) => Some(cred),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Stored credential unreadable; ignoring");
                None
            }
        }
    }

    /// Persist the credential durably: the record is written and fsynced to a
    /// sibling temp file, then renamed over the old one, so a crash mid-write
    /// never destroys the previous record (and its refresh token).
    pub fn save(&self, cred: &StoredCredential) -> AppResult<()> {
        let serialized = serde_json::to_string_pretty(cred)
            .map_err(|e| AppError::Unexpected(format!("serializing credential: {e}")))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::Unexpected(format!("creating credential dir: {e}")))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| AppError::Unexpected(format!("opening credential temp file: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = file.set_permissions(fs::Permissions::from_mode(0o600));
        }

        file.write_all(serialized.as_bytes())
            .map_err(|e| AppError::Unexpected(format!("writing credential file: {e}")))?;
        file.sync_all()
            .map_err(|e| AppError::Unexpected(format!("syncing credential file: {e}")))?;
        drop(file);

        fs::rename(&tmp, &self.path)
            .map_err(|e| AppError::Unexpected(format!("replacing credential file: {e}")))?;
        Ok(())
    }

    pub fn clear(&self) {
        let _ = fs::remove_file(&self.path);
    }
}
