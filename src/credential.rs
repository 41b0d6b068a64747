//! API credential handling.
//!
//! The credential is an opaque bearer token. It is resolved once per
//! process, from the environment, then from a deployment-managed secrets
//! file, then interactively. It is never written to disk by Folio and never
//! logged: [`Credential`] has a redacting `Debug` and no `Display`.

use anyhow::{Context, Result};
use std::fmt;
use std::io::{BufRead, Write};
use std::path::Path;

use crate::config::CredentialsConfig;

#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a secret. Blank input is not a credential.
    pub fn new(secret: impl Into<String>) -> Option<Self> {
        let secret = secret.into();
        let trimmed = secret.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// The raw secret, for building request headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Whether a credential is available. Checked before any pipeline work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialState {
    Unconfigured,
    Ready(Credential),
}

impl CredentialState {
    pub fn credential(&self) -> Option<&Credential> {
        match self {
            CredentialState::Ready(c) => Some(c),
            CredentialState::Unconfigured => None,
        }
    }
}

/// Resolve a credential without user interaction: environment variable
/// first, then the secrets file.
pub fn resolve(config: &CredentialsConfig) -> Result<CredentialState> {
    if let Some(c) = std::env::var(&config.env).ok().and_then(Credential::new) {
        tracing::debug!("credential taken from ${}", config.env);
        return Ok(CredentialState::Ready(c));
    }

    if let Some(c) = from_secrets_file(&config.secrets_file, &config.env)? {
        tracing::debug!("credential taken from {}", config.secrets_file.display());
        return Ok(CredentialState::Ready(c));
    }

    Ok(CredentialState::Unconfigured)
}

/// Read `key` from a TOML secrets file. A missing file is not an error.
pub fn from_secrets_file(path: &Path, key: &str) -> Result<Option<Credential>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read secrets file: {}", path.display()))?;
    let table: toml::Table = toml::from_str(&content)
        .with_context(|| format!("Failed to parse secrets file: {}", path.display()))?;

    Ok(table
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(Credential::new))
}

/// Ask for a credential on an interactive stream. An empty answer leaves
/// the session unconfigured.
pub fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<CredentialState> {
    write!(output, "API key (used for this session only): ")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;

    Ok(match Credential::new(line) {
        Some(c) => CredentialState::Ready(c),
        None => CredentialState::Unconfigured,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn debug_output_is_redacted() {
        let c = Credential::new("sk-secret-value").unwrap();
        let shown = format!("{:?}", CredentialState::Ready(c));
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("***"));
    }

    #[test]
    fn blank_secret_is_not_a_credential() {
        assert!(Credential::new("   ").is_none());
        assert_eq!(Credential::new(" k \n").unwrap().expose(), "k");
    }

    #[test]
    fn secrets_file_lookup() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("secrets.toml");
        std::fs::write(&path, "OPENAI_API_KEY = \"sk-file\"\n").unwrap();

        let c = from_secrets_file(&path, "OPENAI_API_KEY").unwrap().unwrap();
        assert_eq!(c.expose(), "sk-file");
        assert!(from_secrets_file(&path, "OTHER").unwrap().is_none());
        assert!(from_secrets_file(&tmp.path().join("missing.toml"), "OPENAI_API_KEY")
            .unwrap()
            .is_none());
    }

    #[test]
    fn resolve_without_sources_is_unconfigured() {
        let tmp = TempDir::new().unwrap();
        let cfg = CredentialsConfig {
            env: "FOLIO_TEST_UNSET_VARIABLE_7f3a".to_string(),
            secrets_file: tmp.path().join("none.toml"),
        };
        assert_eq!(resolve(&cfg).unwrap(), CredentialState::Unconfigured);
    }

    #[test]
    fn prompt_reads_one_line() {
        let mut input = Cursor::new("sk-typed\n");
        let mut output = Vec::new();
        let state = prompt(&mut input, &mut output).unwrap();
        assert_eq!(state.credential().unwrap().expose(), "sk-typed");

        let mut empty = Cursor::new("\n");
        assert_eq!(
            prompt(&mut empty, &mut Vec::new()).unwrap(),
            CredentialState::Unconfigured
        );
    }
}
