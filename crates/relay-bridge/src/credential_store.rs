//! Where a freshly issued session credential goes after login.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use relay_core::write_text_atomic;

pub trait SessionCredentialSink: Send + Sync {
    fn persist(&self, session_token: &str) -> Result<()>;
}

/// Keeps the session credential in a single text file.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored credential, or `None` when no usable file exists yet.
    pub fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read session file {}", self.path.display()))?;
        let token = raw.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
    }
}

impl SessionCredentialSink for FileSessionStore {
    fn persist(&self, session_token: &str) -> Result<()> {
        write_text_atomic(&self.path, &format!("{session_token}\n"))
            .with_context(|| format!("failed to persist session to {}", self.path.display()))
    }
}

/// Sink that drops credentials; used when nothing should touch disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSessionCredentials;

impl SessionCredentialSink for DiscardSessionCredentials {
    fn persist(&self, _session_token: &str) -> Result<()> {
        Ok(())
    }
}
