use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::ProjectError;

/// Names of the project directories under `root`, sorted. A missing root is
/// an empty list.
pub fn list_projects(root: &Path) -> Result<Vec<String>, ProjectError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Resolves a project name to its directory, refusing anything that could
/// escape `root`.
pub fn project_path(root: &Path, name: &str) -> Result<PathBuf, ProjectError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed.contains("..")
        || trimmed.contains('/')
        || trimmed.contains('\\')
    {
        return Err(ProjectError::InvalidName(name.to_string()));
    }
    let path = root.join(trimmed);
    if !path.is_dir() {
        return Err(ProjectError::Unknown(trimmed.to_string()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lists_only_visible_directories() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("zeta")).unwrap();
        fs::create_dir(dir.path().join("alpha")).unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        assert_eq!(list_projects(dir.path()).unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn missing_root_is_empty() {
        let dir = tempdir().unwrap();
        assert!(list_projects(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn project_path_rejects_traversal() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("demo")).unwrap();
        assert_eq!(project_path(dir.path(), "demo").unwrap(), dir.path().join("demo"));
        for bad in ["", "..", "../etc", "a/b", "a\\b"] {
            assert!(matches!(
                project_path(dir.path(), bad),
                Err(ProjectError::InvalidName(_))
            ));
        }
        assert!(matches!(
            project_path(dir.path(), "other"),
            Err(ProjectError::Unknown(_))
        ));
    }
}
