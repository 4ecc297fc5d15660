//! Path restriction.
//!
//! Every filesystem-touching tool resolves its target through
//! [`UserWorkspace::resolve`], which normalizes the path lexically and
//! rejects anything that would land outside `<workspace>/user_<id>/`.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("path '{0}' escapes the workspace")]
    Escapes(String),
    #[error("path '{0}' is not inside the workspace")]
    Outside(String),
    #[error("empty path")]
    Empty,
}

/// The per-user root all tool paths are confined to.
#[derive(Clone, Debug)]
pub struct UserWorkspace {
    user_root: PathBuf,
}

impl UserWorkspace {
    pub fn new(workspace_root: impl Into<PathBuf>, user_id: &str) -> Self {
        Self {
            user_root: workspace_root.into().join(format!("user_{user_id}")),
        }
    }

    pub fn user_root(&self) -> &Path {
        &self.user_root
    }

    /// On-disk directory for one conversation.
    pub fn conversation_dir(&self, conversation_prefix: &str) -> PathBuf {
        self.user_root.join(format!("Conversation_{conversation_prefix}"))
    }

    /// Resolve `path` against the user root. Absolute paths must already be
    /// inside the root; relative paths are joined and normalized, and any
    /// `..` that would climb above the root is rejected.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, PathError> {
        if path.trim().is_empty() {
            return Err(PathError::Empty);
        }

        let candidate = Path::new(path);
        let relative: PathBuf = if candidate.is_absolute() {
            candidate
                .strip_prefix(&self.user_root)
                .map_err(|_| PathError::Outside(path.to_owned()))?
                .to_path_buf()
        } else {
            candidate.to_path_buf()
        };

        let mut normalized = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(PathError::Escapes(path.to_owned()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(PathError::Outside(path.to_owned()));
                }
            }
        }

        Ok(self.user_root.join(normalized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws() -> UserWorkspace {
        UserWorkspace::new("/srv/workspace", "42")
    }

    #[test]
    fn user_root_layout() {
        assert_eq!(ws().user_root(), Path::new("/srv/workspace/user_42"));
        assert_eq!(
            ws().conversation_dir("ab12cd34"),
            PathBuf::from("/srv/workspace/user_42/Conversation_ab12cd34")
        );
    }

    #[test]
    fn relative_path_resolves_under_root() {
        let p = ws().resolve("src/main.py").unwrap();
        assert_eq!(p, PathBuf::from("/srv/workspace/user_42/src/main.py"));
    }

    #[test]
    fn dot_segments_are_normalized() {
        let p = ws().resolve("./src/./a/../main.py").unwrap();
        assert_eq!(p, PathBuf::from("/srv/workspace/user_42/src/main.py"));
    }

    #[test]
    fn traversal_above_root_rejected() {
        assert!(matches!(
            ws().resolve("../outside.txt"),
            Err(PathError::Escapes(_))
        ));
        assert!(matches!(
            ws().resolve("a/../../outside.txt"),
            Err(PathError::Escapes(_))
        ));
    }

    #[test]
    fn absolute_path_inside_root_accepted() {
        let p = ws().resolve("/srv/workspace/user_42/x/y.py").unwrap();
        assert_eq!(p, PathBuf::from("/srv/workspace/user_42/x/y.py"));
    }

    #[test]
    fn absolute_path_outside_root_rejected() {
        assert!(matches!(
            ws().resolve("/etc/passwd"),
            Err(PathError::Outside(_))
        ));
        assert!(matches!(
            ws().resolve("/srv/workspace/user_7/x.py"),
            Err(PathError::Outside(_))
        ));
    }

    #[test]
    fn empty_path_rejected() {
        assert!(matches!(ws().resolve("  "), Err(PathError::Empty)));
    }

    #[test]
    fn absolute_path_with_traversal_rejected() {
        // Inside the root lexically, but climbs out after stripping.
        assert!(ws().resolve("/srv/workspace/user_42/../user_7/a").is_err());
    }
}
