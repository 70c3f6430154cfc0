//! Read-only access to files the host exposes under the component's root.

use std::path::{Component, Path};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::host_ffi::{self, HostImports};

/// Read the whole file at the absolute `path`.
///
/// # Errors
///
/// See [`read_file_with`].
pub fn read_file(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    read_file_with(&host_ffi::host(), path)
}

/// [`read_file`] through an explicit host.
///
/// # Errors
///
/// Returns [`Error::InvalidPath`] for relative paths, paths with `..`, non
/// UTF-8 segments or the root itself (the host is not called), and
/// [`Error::File`] if the host cannot open or read the file.
pub fn read_file_with(host: &Arc<dyn HostImports>, path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = normalize(path.as_ref())?;
    tracing::debug!(path = %path, "reading file");
    host.read_file(&path).map_err(Error::file)
}

/// Canonical `/a/b` form of an absolute path.
fn normalize(path: &Path) -> Result<String> {
    let invalid = |why: &str| Error::InvalidPath(format!("{}: {why}", path.display()));

    let mut components = path.components();
    if components.next() != Some(Component::RootDir) {
        return Err(invalid("not absolute"));
    }

    let mut segments = Vec::new();
    for component in components {
        match component {
            Component::Normal(segment) => {
                segments.push(segment.to_str().ok_or_else(|| invalid("not valid UTF-8"))?);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("leaves the root"));
            }
        }
    }
    if segments.is_empty() {
        return Err(invalid("names a directory"));
    }
    Ok(format!("/{}", segments.join("/")))
}
