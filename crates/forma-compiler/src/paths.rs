//! Project layout conventions.
//!
//! Everything the compiler reads lives under `<project_root>/src`; every
//! artifact it writes lands under `<project_root>/materialized_config`.

use std::path::{Path, PathBuf};

use crate::error::{CompileError, Result};

/// Directory of configuration sources and schemas, under the project root.
pub const SOURCE_DIR: &str = "src";
/// Directory of compiled artifacts, under the project root.
pub const OUTPUT_DIR: &str = "materialized_config";

/// Extension of single-output configuration sources.
pub const CONFIG_EXT: &str = ".pconf";
/// Extension of multi-output configuration sources.
pub const MULTI_CONFIG_EXT: &str = ".mpconf";
/// Extension of schema files.
pub const SCHEMA_EXT: &str = ".proto";
/// Suffix appended to a schema path to locate its validator companion.
pub const VALIDATOR_SUFFIX: &str = "-validator";
/// Extension of emitted artifacts.
pub const OUTPUT_EXT: &str = ".materialized_JSON";

/// Compilation mode, decided by the source file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `main()` returns one message.
    Single,
    /// `main()` returns a string-keyed mapping of messages.
    Multi,
}

/// Classify a source name by extension.
pub fn classify(source_name: &str) -> Result<Mode> {
    if source_name.ends_with(CONFIG_EXT) {
        Ok(Mode::Single)
    } else if source_name.ends_with(MULTI_CONFIG_EXT) {
        Ok(Mode::Multi)
    } else {
        Err(CompileError::InputClassification(source_name.to_string()))
    }
}

/// `<project_root>/src`.
pub fn source_root(project_root: &Path) -> PathBuf {
    project_root.join(SOURCE_DIR)
}

/// Output path for a single-mode source:
/// `<project_root>/materialized_config/<name without .pconf>.materialized_JSON`.
pub fn single_output_path(project_root: &Path, source_name: &str) -> PathBuf {
    let stem = source_name.strip_suffix(CONFIG_EXT).unwrap_or(source_name);
    project_root
        .join(OUTPUT_DIR)
        .join(format!("{stem}{OUTPUT_EXT}"))
}

/// Output directory for a multi-mode source:
/// `<project_root>/materialized_config/<name without .mpconf>/`.
pub fn multi_output_dir(project_root: &Path, source_name: &str) -> PathBuf {
    let stem = source_name
        .strip_suffix(MULTI_CONFIG_EXT)
        .unwrap_or(source_name);
    project_root.join(OUTPUT_DIR).join(stem)
}

/// Output path for one key of a multi-mode source.
pub fn multi_output_path(output_dir: &Path, key: &str) -> PathBuf {
    output_dir.join(format!("{key}{OUTPUT_EXT}"))
}

/// Keys become file names; reject anything that could land a file outside
/// the output directory.
pub fn valid_output_key(key: &str) -> bool {
    !key.is_empty() && key != "." && key != ".." && !key.contains('/') && !key.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("a.pconf").unwrap(), Mode::Single);
        assert_eq!(classify("dir/b.mpconf").unwrap(), Mode::Multi);
        assert!(matches!(
            classify("c.proto"),
            Err(CompileError::InputClassification(_))
        ));
    }

    #[test]
    fn test_output_paths() {
        let root = Path::new("/proj");
        assert_eq!(
            single_output_path(root, "hi.pconf"),
            PathBuf::from("/proj/materialized_config/hi.materialized_JSON")
        );
        assert_eq!(
            single_output_path(root, "sub/dir/hi.pconf"),
            PathBuf::from("/proj/materialized_config/sub/dir/hi.materialized_JSON")
        );
        let dir = multi_output_dir(root, "multi.mpconf");
        assert_eq!(dir, PathBuf::from("/proj/materialized_config/multi"));
        assert_eq!(
            multi_output_path(&dir, "a"),
            PathBuf::from("/proj/materialized_config/multi/a.materialized_JSON")
        );
    }

    #[test]
    fn test_output_key_validation() {
        assert!(valid_output_key("a"));
        assert!(valid_output_key("a-b_c.1"));
        assert!(!valid_output_key(""));
        assert!(!valid_output_key(".."));
        assert!(!valid_output_key("a/b"));
    }
}
