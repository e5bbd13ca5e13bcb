//! Directory browsing for the project picker.

use std::path::Path;

use serde::Serialize;

use crate::error::{Error, Result};

/// One entry in a directory listing.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub path: String,
    pub has_children: bool,
    pub is_git_repo: bool,
}

/// List the subdirectories of `path`, skipping hidden entries.
pub fn browse_directory(path: &str) -> Result<Vec<DirectoryEntry>> {
    let expanded = shellexpand::tilde(path).into_owned();
    let dir = Path::new(&expanded);
    if !dir.is_dir() {
        return Err(Error::validation(format!(
            "not a directory: {}",
            dir.display()
        )));
    }

    let mut entries = Vec::new();
    let read_dir = std::fs::read_dir(dir)
        .map_err(|e| Error::validation(format!("reading {}: {}", dir.display(), e)))?;

    for entry in read_dir.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let entry_path = entry.path();
        if !entry_path.is_dir() {
            continue;
        }

        let has_children = std::fs::read_dir(&entry_path)
            .map(|mut children| {
                children.any(|c| {
                    c.map(|c| {
                        c.path().is_dir() && !c.file_name().to_string_lossy().starts_with('.')
                    })
                    .unwrap_or(false)
                })
            })
            .unwrap_or(false);

        entries.push(DirectoryEntry {
            name,
            path: entry_path.to_string_lossy().into_owned(),
            has_children,
            is_git_repo: entry_path.join(".git").exists(),
        });
    }

    entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browse_flags() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("repo/.git")).unwrap();
        std::fs::create_dir_all(root.join("nested/inner")).unwrap();
        std::fs::create_dir(root.join(".hidden")).unwrap();
        std::fs::write(root.join("file.txt"), "x").unwrap();

        let entries = browse_directory(&root.to_string_lossy()).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["nested", "repo"]);

        let nested = entries.iter().find(|e| e.name == "nested").unwrap();
        assert!(nested.has_children);
        assert!(!nested.is_git_repo);

        let repo = entries.iter().find(|e| e.name == "repo").unwrap();
        assert!(repo.is_git_repo);
    }

    #[test]
    fn test_browse_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, "x").unwrap();
        let err = browse_directory(&file.to_string_lossy()).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
