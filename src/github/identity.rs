use jsonwebtoken::EncodingKey;
use std::fmt;
use std::path::Path;

use crate::config::ConfigError;

/// The GitHub App identity: numeric app id, target installation and the
/// RSA private key that proves it.
///
/// The key bytes stay inside this type. `Debug` renders them redacted so
/// the key can never reach logs through formatting.
#[derive(Clone)]
pub struct AppIdentity {
    app_id: String,
    installation_id: u64,
    private_key_pem: String,
}

impl AppIdentity {
    /// Read and validate the private key file, producing a ready-to-sign
    /// identity.
    ///
    /// An unreadable, empty or unparseable key is a fatal configuration
    /// error. Parsing happens here, at startup, so a corrupt key is caught
    /// before the first token exchange needs it.
    pub fn load(
        app_id: String,
        installation_id: u64,
        key_path: &Path,
    ) -> Result<Self, ConfigError> {
        let pem =
            std::fs::read_to_string(key_path).map_err(|source| ConfigError::KeyUnreadable {
                path: key_path.to_path_buf(),
                source,
            })?;

        if pem.trim().is_empty() {
            return Err(ConfigError::KeyEmpty {
                path: key_path.to_path_buf(),
            });
        }

        EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| ConfigError::KeyInvalid {
            path: key_path.to_path_buf(),
            message: e.to_string(),
        })?;

        Ok(Self {
            app_id,
            installation_id,
            private_key_pem: pem,
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn installation_id(&self) -> u64 {
        self.installation_id
    }

    pub(crate) fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }

    #[cfg(test)]
    pub(crate) fn from_parts(app_id: &str, installation_id: u64, private_key_pem: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            installation_id,
            private_key_pem: private_key_pem.to_string(),
        }
    }
}

impl fmt::Debug for AppIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppIdentity")
            .field("app_id", &self.app_id)
            .field("installation_id", &self.installation_id)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}
