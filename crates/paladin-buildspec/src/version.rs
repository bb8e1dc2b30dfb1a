//! Build version numbers and the version-info file.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BuildSpecError, BuildSpecResult};

/// A four-component build version, `major.minor.branch.patch`.
///
/// Ordering is numeric per component, so `1.2.10.0` sorts after `1.2.3.0`.
/// The derived ordering on the inner array is exactly the tuple ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildVersion([u32; 4]);

impl BuildVersion {
    pub fn new(major: u32, minor: u32, branch: u32, patch: u32) -> Self {
        BuildVersion([major, minor, branch, patch])
    }

    /// Parse `a.b.c.d` with all-numeric components.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = [0u32; 4];
        let mut count = 0;
        for piece in text.split('.') {
            if count == 4 {
                return None;
            }
            parts[count] = piece.parse().ok()?;
            count += 1;
        }
        (count == 4).then_some(BuildVersion(parts))
    }

    pub fn major(&self) -> u32 {
        self.0[0]
    }

    pub fn patch(&self) -> u32 {
        self.0[3]
    }

    /// The `major.minor` directory a spec for this version lives under.
    pub fn dir_prefix(&self) -> String {
        format!("{}.{}", self.0[0], self.0[1])
    }

    pub fn with_incremented_patch(&self) -> Self {
        let mut parts = self.0;
        parts[3] += 1;
        BuildVersion(parts)
    }
}

impl fmt::Display for BuildVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

const KEY_MAJOR: &str = "VERSION_MAJOR";
const KEY_MINOR: &str = "VERSION_MINOR";
const KEY_BRANCH: &str = "VERSION_BRANCH";
const KEY_PATCH: &str = "VERSION_PATCH";

/// A shell-style `KEY=value` version-info file.
///
/// Lines that are not version keys (comments, other settings) are kept
/// verbatim, so saving never clobbers unrelated content.
#[derive(Debug, Clone)]
pub struct VersionFile {
    path: PathBuf,
    lines: Vec<String>,
}

impl VersionFile {
    pub fn load(path: impl Into<PathBuf>) -> BuildSpecResult<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path)?;
        Ok(Self {
            path,
            lines: content.lines().map(str::to_string).collect(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.lines
            .iter()
            .find_map(|l| l.strip_prefix(key)?.strip_prefix('='))
            .map(str::trim)
    }

    fn set(&mut self, key: &str, value: u32) {
        let entry = format!("{key}={value}");
        if let Some(line) = self
            .lines
            .iter_mut()
            .find(|l| l.starts_with(key) && l[key.len()..].starts_with('='))
        {
            *line = entry;
        } else {
            self.lines.push(entry);
        }
    }

    fn component(&self, key: &str) -> BuildSpecResult<u32> {
        let raw = self
            .get(key)
            .ok_or_else(|| BuildSpecError::Version(format!("{key} missing from version file")))?;
        raw.parse()
            .map_err(|_| BuildSpecError::Version(format!("{key}={raw} is not a number")))
    }

    pub fn version(&self) -> BuildSpecResult<BuildVersion> {
        Ok(BuildVersion::new(
            self.component(KEY_MAJOR)?,
            self.component(KEY_MINOR)?,
            self.component(KEY_BRANCH)?,
            self.component(KEY_PATCH)?,
        ))
    }

    pub fn set_version(&mut self, version: BuildVersion) {
        self.set(KEY_MAJOR, version.0[0]);
        self.set(KEY_MINOR, version.0[1]);
        self.set(KEY_BRANCH, version.0[2]);
        self.set(KEY_PATCH, version.0[3]);
    }

    /// Bump the patch component and return the new version.
    pub fn increment_patch(&mut self) -> BuildSpecResult<BuildVersion> {
        let next = self.version()?.with_incremented_patch();
        self.set_version(next);
        Ok(next)
    }

    pub fn save(&self) -> BuildSpecResult<()> {
        let mut content = self.lines.join("\n");
        content.push('\n');
        fs::write(&self.path, content)?;
        Ok(())
    }
}
