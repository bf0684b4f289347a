use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::{AppError, AppResult, messages};

/// Source of the bearer token attached to inference gateway requests.
///
/// Acquiring the token (SSO, workload tokens, ...) happens outside this
/// crate; implementations only hand over whatever is current.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> AppResult<String>;
}

#[derive(Deserialize)]
struct JwtFile {
    #[serde(default)]
    access_token: Option<String>,
}

/// Reads `access_token` from the session JWT file the platform keeps on disk.
///
/// The file is re-read on every call so a refreshed token is picked up
/// without restarting the server.
#[derive(Debug, Clone)]
pub struct JwtFileTokenSource {
    path: PathBuf,
}

impl JwtFileTokenSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TokenSource for JwtFileTokenSource {
    async fn access_token(&self) -> AppResult<String> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!("{} not found.", self.path.display());
                return Err(AppError::AuthenticationError(messages::MISSING_JWT.to_string()));
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Failed to read JWT file");
                return Err(AppError::AuthenticationError(messages::MISSING_JWT.to_string()));
            }
        };

        let jwt: JwtFile = serde_json::from_str(&raw).map_err(|e| {
            tracing::error!(path = %self.path.display(), error = %e, "JWT file is not valid JSON");
            AppError::AuthenticationError(messages::MISSING_JWT.to_string())
        })?;

        match jwt.access_token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => {
                tracing::error!("No access token found in {}", self.path.display());
                Err(AppError::AuthenticationError(messages::MISSING_JWT.to_string()))
            }
        }
    }
}

/// A fixed token, for deployments that inject one through configuration.
#[derive(Debug, Clone)]
pub struct StaticTokenSource(pub String);

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> AppResult<String> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn jwt_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_reads_access_token() {
        let file = jwt_file(r#"{"access_token": "abc.def.ghi", "expires_in": 3600}"#);
        let source = JwtFileTokenSource::new(file.path());
        assert_eq!(source.access_token().await.unwrap(), "abc.def.ghi");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = JwtFileTokenSource::new(dir.path().join("jwt"));
        let err = source.access_token().await.unwrap_err();
        assert!(matches!(err, AppError::AuthenticationError(msg) if msg == messages::MISSING_JWT));
    }

    #[tokio::test]
    async fn test_empty_or_absent_token() {
        for contents in [r#"{"access_token": ""}"#, r#"{"refresh_token": "x"}"#, "not json"] {
            let file = jwt_file(contents);
            let source = JwtFileTokenSource::new(file.path());
            assert!(
                matches!(source.access_token().await, Err(AppError::AuthenticationError(_))),
                "contents: {contents}"
            );
        }
    }
}
