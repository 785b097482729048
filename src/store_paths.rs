//! Purpose: Local store-directory and store-name path resolution helpers.
//! Exports: `default_store_dir`, `resolve_store_ref`, `store_label`.
//! Role: Keep every CLI command on one naming rule.
//! Invariants: Default store directory remains `~/.recstore/stores`.
//! Invariants: A ref containing a path separator is a path; anything else is a name.

use std::path::{Path, PathBuf};

pub(crate) const STORE_SUFFIX: &str = ".recstore";

pub(crate) fn default_store_dir() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".recstore").join("stores")
}

pub(crate) fn resolve_store_ref(input: &str, store_dir: &Path) -> PathBuf {
    if input.contains('/') || input.contains(std::path::MAIN_SEPARATOR) {
        return PathBuf::from(input);
    }
    if input.ends_with(STORE_SUFFIX) {
        return store_dir.join(input);
    }
    store_dir.join(format!("{input}{STORE_SUFFIX}"))
}

/// Short name used in notices and default export file names.
pub(crate) fn store_label(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    name.strip_suffix(STORE_SUFFIX)
        .map(str::to_string)
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::{resolve_store_ref, store_label};
    use std::path::Path;

    #[test]
    fn names_resolve_under_store_dir() {
        let dir = Path::new("/tmp/stores");
        assert_eq!(resolve_store_ref("grades", dir), dir.join("grades.recstore"));
        assert_eq!(resolve_store_ref("grades.recstore", dir), dir.join("grades.recstore"));
    }

    #[test]
    fn paths_are_used_verbatim() {
        let dir = Path::new("/tmp/stores");
        assert_eq!(resolve_store_ref("./local", dir), Path::new("./local"));
        assert_eq!(resolve_store_ref("/abs/s", dir), Path::new("/abs/s"));
    }

    #[test]
    fn label_strips_suffix() {
        assert_eq!(store_label(Path::new("/x/grades.recstore")), "grades");
        assert_eq!(store_label(Path::new("/x/plain")), "plain");
    }
}
