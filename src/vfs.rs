//! # Working-Directory Context
//!
//! Thread-associated filesystem-path resolution state. The threading core
//! treats it as an opaque, sharable value: sibling threads may hold the same
//! context through an `Arc`, and a change is always a wholesale replacement
//! of the reference, never an in-place edit, so a concurrent reader can
//! never observe a half-updated path.

use alloc::format;
use alloc::string::String;
use core::fmt;

/// A filesystem path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    inner: String,
}

impl Path {
    /// Create a new path from a string
    ///
    /// Automatically normalizes backslashes to forward slashes.
    pub fn new(s: &str) -> Self {
        Self {
            inner: s.replace('\\', "/"),
        }
    }

    /// The filesystem root
    pub fn root() -> Self {
        Self::new("/")
    }

    /// Get the path as a string slice
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn is_absolute(&self) -> bool {
        self.inner.starts_with('/')
    }

    /// Join this path with a component
    pub fn join(&self, component: &str) -> Self {
        if self.inner.ends_with('/') {
            Path::new(&format!("{}{}", self.inner, component))
        } else {
            Path::new(&format!("{}/{}", self.inner, component))
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

/// Filesystem context shared by sibling threads.
///
/// Lifetime equals the longest holder; replaced wholesale via
/// `Thread::set_working_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDir {
    cwd: Path,
}

impl WorkingDir {
    pub fn new(cwd: Path) -> Self {
        Self { cwd }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }
}

impl Default for WorkingDir {
    /// Threads constructed without an explicit context start at the root.
    fn default() -> Self {
        Self { cwd: Path::root() }
    }
}
