//! Path admission predicate for the ingestion pipeline.
//!
//! The filter is pure: it decides from the relative path alone, before any
//! byte of the entry is read, so rejected entries cost nothing to skip.

/// File names never ingested regardless of location.
const EXCLUDE_FILENAMES: &[&str] = &["package-lock.json", "yarn.lock", "pnpm-lock.yaml"];

/// Extensions treated as binary/media/archive/executable content.
const BINARY_EXTENSIONS: &[&str] = &[
    ".ico", ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".webp", ".svgz", ".zip", ".tar", ".gz",
    ".tgz", ".bz2", ".xz", ".7z", ".rar", ".exe", ".dll", ".so", ".dylib", ".a", ".o", ".class",
    ".jar", ".war", ".bin", ".dat", ".pdf", ".woff", ".woff2", ".ttf", ".otf", ".eot", ".mp3",
    ".mp4", ".mov", ".avi", ".wasm", ".pyc", ".sqlite", ".db",
];

/// Decides, per relative path, whether an archive entry is ingested.
#[derive(Debug, Clone)]
pub struct PathFilter {
    deny_dirs: Vec<String>,
    /// Legacy mode: when present, a path must end in one of these.
    allowed_extensions: Option<Vec<String>>,
}

impl PathFilter {
    pub fn new(deny_dirs: &[String]) -> Self {
        Self {
            deny_dirs: deny_dirs.to_vec(),
            allowed_extensions: None,
        }
    }

    /// Restrict admission to an explicit extension list (legacy callers).
    pub fn with_allowed_extensions(mut self, extensions: &[String]) -> Self {
        self.allowed_extensions = Some(extensions.to_vec());
        self
    }

    /// `true` when the path should be ingested. No I/O.
    pub fn admit(&self, path: &str) -> bool {
        self.rejection(path).is_none()
    }

    /// The reason a path is rejected, if any. Segment matches are exact:
    /// `src/node_modules/x.js` is rejected, `src/node_modules_extra/x.js`
    /// is not.
    pub fn rejection(&self, path: &str) -> Option<Reject> {
        let mut segments = path.split('/').peekable();
        let mut file_name = "";
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                file_name = segment;
                break;
            }
            if self.deny_dirs.iter().any(|d| d == segment) {
                return Some(Reject::DeniedDirectory);
            }
        }

        let lower = file_name.to_ascii_lowercase();
        if EXCLUDE_FILENAMES.contains(&lower.as_str()) {
            return Some(Reject::ExcludedFilename);
        }
        if BINARY_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            return Some(Reject::BinaryExtension);
        }

        if let Some(allowed) = &self.allowed_extensions {
            if !allowed.iter().any(|ext| path.ends_with(ext.as_str())) {
                return Some(Reject::NotAllowlisted);
            }
        }

        None
    }
}

/// Why a path was refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reject {
    DeniedDirectory,
    ExcludedFilename,
    BinaryExtension,
    NotAllowlisted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestLimits;

    fn filter() -> PathFilter {
        PathFilter::new(&IngestLimits::default().deny_dirs)
    }

    #[test]
    fn test_denied_directory_exact_segment() {
        let f = filter();
        assert!(!f.admit("node_modules/b.js"));
        assert!(!f.admit("src/node_modules/x.js"));
        assert!(f.admit("src/node_modules_extra/x.js"));
    }

    #[test]
    fn test_deny_dir_as_file_name_is_admitted() {
        // Only directory segments match the denylist.
        let f = filter();
        assert!(f.admit("docs/out"));
        assert!(!f.admit("out/index.html"));
    }

    #[test]
    fn test_binary_extensions_rejected() {
        let f = filter();
        assert!(!f.admit("img.png"));
        assert!(!f.admit("assets/Font.WOFF2"));
        assert!(!f.admit("release/tool.exe"));
        assert!(f.admit("src/main.rs"));
    }

    #[test]
    fn test_lockfiles_rejected_at_any_depth() {
        let f = filter();
        assert!(!f.admit("package-lock.json"));
        assert!(!f.admit("web/frontend/yarn.lock"));
        assert!(f.admit("Cargo.lock"));
    }

    #[test]
    fn test_extensionless_files_admitted() {
        let f = filter();
        assert!(f.admit("Makefile"));
        assert!(f.admit("docker/Dockerfile"));
    }

    #[test]
    fn test_legacy_allowlist() {
        let f = filter().with_allowed_extensions(&[".py".to_string(), ".md".to_string()]);
        assert!(f.admit("a.py"));
        assert!(f.admit("docs/readme.md"));
        assert!(!f.admit("src/main.rs"));
    }
}
