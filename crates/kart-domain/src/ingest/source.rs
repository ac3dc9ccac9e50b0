//! Where source files are read from.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DomainError, DomainResult};

/// Default timeout for downloading one remote file.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Location of the compressed source files.
#[derive(Debug, Clone)]
pub enum SourceLocation {
    /// Files in a local directory.
    Local { data_dir: PathBuf },
    /// Files served over HTTP under a base URL.
    Remote { base_url: String, timeout: Duration },
}

impl SourceLocation {
    pub fn local(data_dir: impl Into<PathBuf>) -> Self {
        SourceLocation::Local {
            data_dir: data_dir.into(),
        }
    }

    pub fn remote(base_url: impl Into<String>) -> Self {
        SourceLocation::Remote {
            base_url: base_url.into(),
            timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    /// Path or URL of a file, for logs and errors.
    pub fn describe(&self, file_name: &str) -> String {
        match self {
            SourceLocation::Local { data_dir } => data_dir.join(file_name).display().to_string(),
            SourceLocation::Remote { base_url, .. } => {
                format!("{}/{}", base_url.trim_end_matches('/'), file_name)
            }
        }
    }

    /// Opens a file for reading its raw, still compressed bytes.
    ///
    /// This blocks; call it from a blocking thread. Remote reads must not run
    /// on an async worker thread.
    pub fn open(&self, file_name: &str) -> DomainResult<Box<dyn Read + Send>> {
        let location = self.describe(file_name);
        let unreachable = |message: String| DomainError::SourceUnreachable {
            source_name: location.clone(),
            message,
        };

        match self {
            SourceLocation::Local { data_dir } => {
                let file = File::open(data_dir.join(file_name)).map_err(|e| unreachable(e.to_string()))?;
                Ok(Box::new(file))
            }
            SourceLocation::Remote { timeout, .. } => {
                let client = reqwest::blocking::Client::builder()
                    .timeout(*timeout)
                    .build()
                    .map_err(|e| unreachable(e.to_string()))?;
                let response = client
                    .get(&location)
                    .send()
                    .map_err(|e| unreachable(e.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(unreachable(format!("unexpected HTTP status {status}")));
                }
                Ok(Box::new(response))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_joins_remote_url() {
        let source = SourceLocation::remote("https://files.example.com/");
        assert_eq!(
            source.describe("couponbase1.gz"),
            "https://files.example.com/couponbase1.gz"
        );
    }

    #[test]
    fn test_open_missing_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = SourceLocation::local(dir.path());
        match source.open("missing.gz") {
            Err(DomainError::SourceUnreachable { source_name, .. }) => {
                assert!(source_name.ends_with("missing.gz"));
            }
            other => panic!("expected SourceUnreachable, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_open_local_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.gz"), b"raw").unwrap();
        let source = SourceLocation::local(dir.path());
        let mut contents = Vec::new();
        source
            .open("data.gz")
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b"raw");
    }
}
