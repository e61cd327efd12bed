//! `file:` sources.

use std::path::PathBuf;
use std::time::SystemTime;

use crate::error::ProcessingError;
use crate::source::{absolutize, Source, SourceResolver};

/// Resolves URIs to files on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSourceResolver;

impl SourceResolver for FileSourceResolver {
    fn resolve(&self, uri: &str, base: Option<&str>) -> Result<Box<dyn Source>, ProcessingError> {
        let url = absolutize(uri, base)?;
        let path = url.to_file_path().map_err(|_| ProcessingError::SourceNotFound {
            uri: url.to_string(),
        })?;
        Ok(Box::new(FileSource {
            uri: url.to_string(),
            path,
        }))
    }
}

#[derive(Debug)]
struct FileSource {
    uri: String,
    path: PathBuf,
}

impl Source for FileSource {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn last_modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    fn read(&self) -> Result<Vec<u8>, ProcessingError> {
        std::fs::read(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProcessingError::SourceNotFound {
                uri: self.uri.clone(),
            },
            _ => ProcessingError::Io(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let base = format!("{}/", dir.path().display());

        let source = FileSourceResolver.resolve("a.txt", Some(&base)).unwrap();
        assert!(source.exists());
        assert!(source.last_modified().is_some());
        assert_eq!(source.read_to_string().unwrap(), "hello");
        assert_eq!(source.mime_type().as_deref(), Some("text/plain"));

        let missing = FileSourceResolver.resolve("b.txt", Some(&base)).unwrap();
        assert!(!missing.exists());
        assert!(matches!(missing.read(), Err(ProcessingError::SourceNotFound { .. })));
    }
}
