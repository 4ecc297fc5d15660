//! Workspace file listing for prompt assembly.

use std::path::Path;

/// Directories never descended into or listed.
const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".venv",
    "dist",
    "build",
    "target",
    ".cache",
];

/// File names excluded from the listing.
const SKIP_FILES: &[&str] = &["todo.md"];

fn skipped_file(name: &str) -> bool {
    SKIP_FILES.contains(&name) || name.ends_with(".pyc")
}

/// List files under `root` up to `max_depth` directory levels, capped at
/// `max_entries`, as sorted relative paths.
pub fn list_files(root: &Path, max_depth: usize, max_entries: usize) -> Vec<String> {
    let mut entries = Vec::new();
    walk(root, root, 0, max_depth, &mut entries);
    entries.sort();
    entries.truncate(max_entries);
    entries
}

fn walk(root: &Path, dir: &Path, depth: usize, max_depth: usize, out: &mut Vec<String>) {
    if depth > max_depth {
        return;
    }
    let Ok(read) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in read.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if path.is_dir() {
            if !SKIP_DIRS.contains(&name) {
                walk(root, &path, depth + 1, max_depth, out);
            }
        } else if !skipped_file(name) {
            if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().into_owned());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn temp_root() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("codeact_listing_{}", uuid::Uuid::now_v7()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn lists_files_sorted_and_relative() {
        let root = temp_root();
        fs::write(root.join("b.txt"), "").unwrap();
        fs::write(root.join("a.txt"), "").unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.py"), "").unwrap();

        let files = list_files(&root, 2, 200);
        assert_eq!(files, vec!["a.txt", "b.txt", "src/main.py"]);

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn respects_depth_limit() {
        let root = temp_root();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("a/shallow.txt"), "").unwrap();
        fs::write(root.join("a/b/deep.txt"), "").unwrap();
        fs::write(root.join("a/b/c/deeper.txt"), "").unwrap();

        let files = list_files(&root, 2, 200);
        assert!(files.contains(&"a/shallow.txt".to_owned()));
        assert!(files.contains(&"a/b/deep.txt".to_owned()));
        assert!(!files.iter().any(|f| f.contains("deeper")));

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn skips_noise_directories_and_files() {
        let root = temp_root();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "").unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/config"), "").unwrap();
        fs::write(root.join("todo.md"), "").unwrap();
        fs::write(root.join("mod.pyc"), "").unwrap();
        fs::write(root.join("keep.py"), "").unwrap();

        let files = list_files(&root, 2, 200);
        assert_eq!(files, vec!["keep.py"]);

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn caps_entry_count() {
        let root = temp_root();
        for i in 0..30 {
            fs::write(root.join(format!("f{i:03}.txt")), "").unwrap();
        }
        let files = list_files(&root, 2, 10);
        assert_eq!(files.len(), 10);
        assert_eq!(files[0], "f000.txt");

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn missing_root_yields_empty() {
        let files = list_files(Path::new("/nonexistent/dir"), 2, 200);
        assert!(files.is_empty());
    }
}
