//! Root path helpers.
//!
//! Root paths are absolute (`/`-prefixed). Folder paths end with `/`, file
//! paths never do. The root folder is `/`.

use crate::error::{Error, Result};

/// Root folder path.
pub const ROOT: &str = "/";

/// Validate a root path for a resource, returning it unchanged.
pub fn validate(path: &str, is_folder: bool) -> Result<&str> {
    if !path.starts_with('/') {
        return Err(Error::InvalidInput(format!(
            "path must be absolute: {}",
            path
        )));
    }
    if path == ROOT {
        return Err(Error::InvalidInput("the root folder is fixed".to_string()));
    }
    if path.contains("//") || path.split('/').any(|seg| seg == "." || seg == "..") {
        return Err(Error::InvalidInput(format!("malformed path: {}", path)));
    }
    if is_folder != path.ends_with('/') {
        return Err(Error::InvalidInput(if is_folder {
            format!("folder path must end with '/': {}", path)
        } else {
            format!("file path must not end with '/': {}", path)
        }));
    }
    Ok(path)
}

/// Parent folder of a path (`/` for top-level entries and for `/` itself).
pub fn parent(path: &str) -> &str {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    match trimmed.rfind('/') {
        Some(idx) => &path[..=idx],
        None => ROOT,
    }
}

/// Last path segment without a trailing slash.
pub fn name(path: &str) -> &str {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Whether `path` lies in `folder` (directly, or at any depth when `recursive`).
pub fn is_in_folder(path: &str, folder: &str, recursive: bool) -> bool {
    if path == folder || !path.starts_with(folder) || !folder.ends_with('/') {
        return false;
    }
    recursive || parent(path) == folder
}

/// Rebase `path` from the `from` prefix onto `to` (used when moving folders).
pub fn rebase(path: &str, from: &str, to: &str) -> Option<String> {
    path.strip_prefix(from).map(|rest| format!("{}{}", to, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_files_and_folders() {
        assert!(validate("/a.txt", false).is_ok());
        assert!(validate("/sites/default/", true).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_paths() {
        assert!(validate("a.txt", false).is_err());
        assert!(validate("/", true).is_err());
        assert!(validate("/a//b.txt", false).is_err());
        assert!(validate("/a/../b.txt", false).is_err());
        assert!(validate("/folder", true).is_err());
        assert!(validate("/file/", false).is_err());
    }

    #[test]
    fn test_parent() {
        assert_eq!(parent("/a.txt"), "/");
        assert_eq!(parent("/a/b.txt"), "/a/");
        assert_eq!(parent("/a/b/"), "/a/");
        assert_eq!(parent("/"), "/");
    }

    #[test]
    fn test_name() {
        assert_eq!(name("/a/b.txt"), "b.txt");
        assert_eq!(name("/a/b/"), "b");
    }

    #[test]
    fn test_is_in_folder() {
        assert!(is_in_folder("/a/b.txt", "/a/", false));
        assert!(!is_in_folder("/a/c/b.txt", "/a/", false));
        assert!(is_in_folder("/a/c/b.txt", "/a/", true));
        assert!(!is_in_folder("/a/", "/a/", true));
        assert!(!is_in_folder("/ab/x.txt", "/a/", true));
        assert!(is_in_folder("/x.txt", "/", false));
    }

    #[test]
    fn test_rebase() {
        assert_eq!(
            rebase("/old/x/y.txt", "/old/", "/new/").as_deref(),
            Some("/new/x/y.txt")
        );
        assert_eq!(rebase("/other.txt", "/old/", "/new/"), None);
    }
}
