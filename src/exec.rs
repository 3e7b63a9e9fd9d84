//! Code-execution service interface.
//!
//! Rooms hold runnable snippets, but execution itself lives behind an HTTP
//! service outside this crate. This module only defines the seam: request
//! and output types plus the [`ExecService`] trait an integration
//! implements. Execution failures surface as output text for the requesting
//! participant and never touch document state.

use serde::{Deserialize, Serialize};

/// A request to run the current room content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRequest {
    /// Language identifier, e.g. `"python"`
    pub language: String,
    /// Language version, e.g. `"3.12"`
    pub version: String,
    /// The source to run (the room's visible text at request time)
    pub source: String,
}

impl ExecRequest {
    pub fn new(
        language: impl Into<String>,
        version: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            language: language.into(),
            version: version.into(),
            source: source.into(),
        }
    }
}

/// Combined stdout/stderr of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub output: String,
}

/// Errors from the execution backend.
#[derive(Debug, Clone)]
pub enum ExecError {
    /// The backend rejected the language/version pair.
    UnsupportedLanguage(String),
    /// The backend could not be reached or errored.
    Backend(String),
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLanguage(lang) => write!(f, "Unsupported language: {lang}"),
            Self::Backend(e) => write!(f, "Execution backend error: {e}"),
        }
    }
}

impl std::error::Error for ExecError {}

/// The execution seam. Implementations live outside this crate.
pub trait ExecService: Send + Sync {
    /// Run a snippet, returning its combined output.
    fn execute(
        &self,
        request: ExecRequest,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<ExecOutput, ExecError>> + Send + '_>,
    >;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoService;

    impl ExecService for EchoService {
        fn execute(
            &self,
            request: ExecRequest,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<ExecOutput, ExecError>> + Send + '_>,
        > {
            Box::pin(async move {
                if request.language != "python" {
                    return Err(ExecError::UnsupportedLanguage(request.language));
                }
                Ok(ExecOutput {
                    output: request.source,
                })
            })
        }
    }

    #[tokio::test]
    async fn test_service_trait_is_object_safe() {
        let service: Box<dyn ExecService> = Box::new(EchoService);
        let out = service
            .execute(ExecRequest::new("python", "3.12", "print(1)"))
            .await
            .unwrap();
        assert_eq!(out.output, "print(1)");
    }

    #[tokio::test]
    async fn test_unsupported_language_is_an_error() {
        let service = EchoService;
        let err = service
            .execute(ExecRequest::new("cobol", "85", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::UnsupportedLanguage(_)));
    }

    #[test]
    fn test_request_roundtrip() {
        let req = ExecRequest::new("python", "3.12", "x = 1");
        let bytes = bincode::serde::encode_to_vec(&req, bincode::config::standard()).unwrap();
        let (decoded, _): (ExecRequest, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        assert_eq!(decoded, req);
    }
}
