//! Source resolution.
//!
//! # Responsibilities
//! - Turn a URI (absolute or relative to a base) into a readable [`Source`]
//! - Report existence and last-modified time for staleness checks
//!
//! # Data Flow
//! ```text
//! TreeProcessor ── resolve(sitemap uri) ──▶ Source ─▶ last_modified (staleness)
//!                                                  └▶ read_to_string (build input)
//! stage src ───── resolve(src, base) ────▶ Source ─▶ read (generators, readers)
//! ```
//!
//! # Design Decisions
//! - Relative URIs are joined with the `url` crate, so `../x` behaves like a browser
//! - A bare path without a scheme is treated as `file:`

pub mod file;
pub mod memory;

use std::sync::Arc;
use std::time::SystemTime;

use url::Url;

use crate::error::ProcessingError;

pub use file::FileSourceResolver;
pub use memory::MemorySourceResolver;

/// A resolved resource.
pub trait Source: Send + Sync {
    /// Absolute URI of the resource.
    fn uri(&self) -> &str;

    fn exists(&self) -> bool;

    /// Modification time, when the backing store keeps one.
    fn last_modified(&self) -> Option<SystemTime>;

    fn read(&self) -> Result<Vec<u8>, ProcessingError>;

    fn read_to_string(&self) -> Result<String, ProcessingError> {
        let bytes = self.read()?;
        String::from_utf8(bytes).map_err(|e| {
            ProcessingError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    /// Mime type guessed from the URI extension.
    fn mime_type(&self) -> Option<String> {
        guess_mime_type(self.uri()).map(str::to_string)
    }
}

/// Resolves URIs to sources.
pub trait SourceResolver: Send + Sync {
    fn resolve(&self, uri: &str, base: Option<&str>) -> Result<Box<dyn Source>, ProcessingError>;
}

/// Join `uri` onto `base`, returning an absolute URI.
pub fn absolutize(uri: &str, base: Option<&str>) -> Result<Url, ProcessingError> {
    if let Ok(url) = Url::parse(uri) {
        return Ok(url);
    }
    let invalid = |details: String| ProcessingError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, details));
    match base {
        Some(base) => {
            let base = absolutize(base, None)?;
            base.join(uri)
                .map_err(|e| invalid(format!("cannot resolve '{}' against '{}': {}", uri, base, e)))
        }
        None => {
            let path = std::path::Path::new(uri);
            let absolute = if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()?.join(path)
            };
            // Url::from_file_path drops a trailing separator.
            let mut url = Url::from_file_path(&absolute)
                .map_err(|_| invalid(format!("'{}' is not a valid path", uri)))?;
            if uri.ends_with('/') && !url.path().ends_with('/') {
                let with_slash = format!("{}/", url.path());
                url.set_path(&with_slash);
            }
            Ok(url)
        }
    }
}

fn guess_mime_type(uri: &str) -> Option<&'static str> {
    let ext = uri.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "xml" => "text/xml",
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(mime)
}

/// Dispatches on URI scheme: `memory:` to an in-memory store, everything else to files.
pub struct SchemeResolver {
    file: FileSourceResolver,
    memory: Option<Arc<MemorySourceResolver>>,
}

impl SchemeResolver {
    pub fn new() -> Self {
        Self {
            file: FileSourceResolver,
            memory: None,
        }
    }

    pub fn with_memory(mut self, memory: Arc<MemorySourceResolver>) -> Self {
        self.memory = Some(memory);
        self
    }
}

impl Default for SchemeResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceResolver for SchemeResolver {
    fn resolve(&self, uri: &str, base: Option<&str>) -> Result<Box<dyn Source>, ProcessingError> {
        let target = absolutize(uri, base)?;
        match (&self.memory, target.scheme()) {
            (Some(memory), memory::SCHEME) => memory.resolve(target.as_str(), None),
            _ => self.file.resolve(target.as_str(), None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_resolution() {
        let url = absolutize("../shared/a.xml", Some("memory:/site/sub/sitemap.json")).unwrap();
        assert_eq!(url.as_str(), "memory:/site/shared/a.xml");

        let url = absolutize("docs/", Some("file:///srv/sitemap.json")).unwrap();
        assert_eq!(url.as_str(), "file:///srv/docs/");
    }

    #[test]
    fn test_mime_guess() {
        assert_eq!(guess_mime_type("a/b.XML"), Some("text/xml"));
        assert_eq!(guess_mime_type("a/b"), None);
    }
}
