//! Filesystem-backed module reader, restricted to the source root.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{CompileError, Result};
use crate::paths::SCHEMA_EXT;

/// Resolves logical import names to absolute paths and reads file bytes.
///
/// Every resolved path must stay inside the source root. Reads of schema
/// files are recorded, in order, so the driver can probe for validator
/// companion files afterwards.
pub struct ModuleReader {
    source_root: PathBuf,
    proto_trail: Vec<PathBuf>,
}

impl ModuleReader {
    /// `source_root` must exist; it is canonicalized so later prefix checks
    /// are reliable.
    pub fn new(source_root: &Path) -> Result<Self> {
        let source_root = fs::canonicalize(source_root).map_err(|e| CompileError::Io {
            path: source_root.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            source_root,
            proto_trail: Vec::new(),
        })
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Map a logical import name to an absolute path.
    ///
    /// Names starting with a separator resolve against the source root;
    /// other names resolve against the directory of `from` (or the source
    /// root when there is no importing module).
    pub fn resolve(&self, name: &str, from: Option<&Path>) -> Result<PathBuf> {
        let unresolved = |reason: &str| CompileError::UnresolvedImport {
            name: name.to_string(),
            from: from
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            reason: reason.to_string(),
        };

        let candidate = if let Some(rooted) = name.strip_prefix('/') {
            self.source_root.join(rooted.trim_start_matches('/'))
        } else {
            let base = from
                .and_then(Path::parent)
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.source_root.clone());
            base.join(name)
        };

        let normalized = normalize(&candidate).ok_or_else(|| unresolved("escapes the root"))?;
        if !normalized.starts_with(&self.source_root) {
            return Err(unresolved("escapes the source root"));
        }
        if !normalized.is_file() {
            return Err(unresolved("no such file"));
        }
        Ok(normalized)
    }

    /// Read a file's bytes. Schema reads are appended to the proto trail.
    pub fn read(&mut self, path: &Path) -> Result<Vec<u8>> {
        let bytes = fs::read(path).map_err(|e| CompileError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(SCHEMA_EXT))
        {
            self.proto_trail.push(path.to_path_buf());
        }
        Ok(bytes)
    }

    /// Schema paths read so far, in open order.
    pub fn proto_trail(&self) -> &[PathBuf] {
        &self.proto_trail
    }

    /// Express an absolute path as a `/`-joined path relative to the
    /// source root (the form schema import paths use).
    pub fn rel_to_root(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.source_root).ok()?;
        let parts: Vec<&str> = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

/// Lexical normalization: strip `.`, fold `..`. Returns `None` when `..`
/// would climb past the path's first component.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;
    use tempfile::tempdir;

    fn project() -> (tempfile::TempDir, ModuleReader) {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("lib")).unwrap();
        let mut f = File::create(src.join("main.pconf")).unwrap();
        writeln!(f, "x = 1").unwrap();
        let mut f = File::create(src.join("lib/util.pconf")).unwrap();
        writeln!(f, "y = 2").unwrap();
        let mut f = File::create(src.join("lib/schema.proto")).unwrap();
        writeln!(f, "syntax = \"proto3\";").unwrap();
        let reader = ModuleReader::new(&src).unwrap();
        (dir, reader)
    }

    #[test]
    fn test_root_relative_resolution() {
        let (_dir, reader) = project();
        let path = reader.resolve("/lib/util.pconf", None).unwrap();
        assert!(path.ends_with("lib/util.pconf"));
    }

    #[test]
    fn test_relative_resolution() {
        let (_dir, reader) = project();
        let main = reader.resolve("/main.pconf", None).unwrap();
        let path = reader.resolve("lib/util.pconf", Some(&main)).unwrap();
        assert!(path.ends_with("lib/util.pconf"));

        let util = reader.resolve("/lib/util.pconf", None).unwrap();
        let sibling = reader.resolve("schema.proto", Some(&util)).unwrap();
        assert!(sibling.ends_with("lib/schema.proto"));
    }

    #[test]
    fn test_missing_file() {
        let (_dir, reader) = project();
        let err = reader.resolve("/nope.pconf", None).unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedImport { .. }));
    }

    #[test]
    fn test_sandbox_escape_rejected() {
        let (_dir, reader) = project();
        let err = reader.resolve("../../etc/passwd", None).unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedImport { .. }));

        let main = reader.resolve("/main.pconf", None).unwrap();
        let err = reader.resolve("../main.pconf", Some(&main)).unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedImport { .. }));
    }

    #[test]
    fn test_parent_dir_within_root() {
        let (_dir, reader) = project();
        let util = reader.resolve("/lib/util.pconf", None).unwrap();
        let path = reader.resolve("../main.pconf", Some(&util)).unwrap();
        assert!(path.ends_with("main.pconf"));
    }

    #[test]
    fn test_proto_trail_records_schema_reads() {
        let (_dir, mut reader) = project();
        let schema = reader.resolve("/lib/schema.proto", None).unwrap();
        let script = reader.resolve("/main.pconf", None).unwrap();
        reader.read(&script).unwrap();
        reader.read(&schema).unwrap();
        assert_eq!(reader.proto_trail(), &[schema]);
    }

    #[test]
    fn test_rel_to_root() {
        let (_dir, reader) = project();
        let schema = reader.resolve("/lib/schema.proto", None).unwrap();
        assert_eq!(reader.rel_to_root(&schema).unwrap(), "lib/schema.proto");
    }
}
