use std::path::{Path, PathBuf};

pub fn get_current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

pub fn absolute_path(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        get_current_dir().join(path)
    }
}

/// Turns a test display name into a relative directory path that stays below `root`.
pub fn test_directory(root: &Path, name: &str) -> PathBuf {
    let mut dir = root.to_path_buf();
    for part in name.split('/') {
        match part {
            "" | "." => {}
            ".." => dir.push("__"),
            _ => dir.push(part),
        }
    }
    dir
}
