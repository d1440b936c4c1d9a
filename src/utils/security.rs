use std::fmt;
use std::path::{Component, Path, PathBuf};

//===============
// Path Handling
//===============
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathValidationError {
    ContainsParentDir,
    AbsolutePath,
    InvalidComponent,
    NullByte,
    Empty,
}

impl fmt::Display for PathValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathValidationError::ContainsParentDir => {
                write!(f, "Path contains parent directory (..)")
            }
            PathValidationError::AbsolutePath => write!(f, "Path is absolute"),
            PathValidationError::InvalidComponent => write!(f, "Path contains invalid component"),
            PathValidationError::NullByte => write!(f, "Path contains null byte"),
            PathValidationError::Empty => write!(f, "Path is empty"),
        }
    }
}

impl std::error::Error for PathValidationError {}

// Checks shared by remote and local validation:
// empty strings, null bytes, parent directory traversal.
// Remote paths are POSIX so segments are split on '/' rather than
// through std::path, which would treat '\' specially on Windows.
fn validate_segments(path: &str) -> Result<(), PathValidationError> {
    if path.is_empty() {
        return Err(PathValidationError::Empty);
    }

    // rust uses C-style APIs underneath so \0 can end str early
    if path.contains('\0') {
        return Err(PathValidationError::NullByte);
    }

    if path.split('/').any(|segment| segment == "..") {
        return Err(PathValidationError::ContainsParentDir);
    }

    Ok(())
}

/// Validate a path on the remote host. Absolute paths are fine,
/// traversal segments are not.
pub fn validate_remote_path(path: &str) -> Result<(), PathValidationError> {
    validate_segments(path)
}

/// Validate a single file name (no separators at all).
pub fn validate_filename(name: &str) -> Result<(), PathValidationError> {
    validate_segments(name)?;
    if name == "." || name.contains('/') || name.contains('\\') {
        return Err(PathValidationError::InvalidComponent);
    }
    Ok(())
}

/// Validate a client supplied relative path and resolve it under `root`.
/// no: parent dir travel, absolute paths, null bytes
pub fn confine_path(root: &Path, relative: &str) -> Result<PathBuf, PathValidationError> {
    validate_segments(relative)?;

    let trimmed = relative.trim_start_matches("./");
    let path = Path::new(trimmed);
    let mut resolved = root.to_path_buf();

    for component in path.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => continue, // "./" is okay, just redundant
            Component::ParentDir => return Err(PathValidationError::ContainsParentDir),
            Component::RootDir => return Err(PathValidationError::AbsolutePath),
            Component::Prefix(_) => return Err(PathValidationError::InvalidComponent), // Windows
        }
    }

    if resolved == root {
        return Err(PathValidationError::Empty);
    }

    Ok(resolved)
}

//===============
// Remote path helpers
//===============

/// Join a remote directory and an entry name with exactly one '/'.
pub fn join_remote(dir: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if dir.is_empty() || dir == "." {
        return name.to_string();
    }
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Parent directory of a remote path, `None` at the root.
pub fn remote_parent(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        return None;
    }
    match trimmed.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(trimmed[..idx].to_string()),
        None => Some(".".to_string()),
    }
}

/// Last segment of a remote path.
pub fn remote_file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}
