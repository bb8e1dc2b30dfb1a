//! The on-disk spec store: buildspec files plus per-builder status links.
//!
//! Layout, relative to the coordination checkout root:
//!
//! ```text
//! buildspecs/<major.minor>/<version>.xml          the specs themselves
//! build-name/<name>/pass/<major.minor>/<v>.xml    relative symlinks into
//! build-name/<name>/fail/<major.minor>/<v>.xml    buildspecs/, one status
//! build-name/<name>/inflight/<major.minor>/<v>.xml   per builder+version
//! ```
//!
//! For a given builder and version at most one of pass/fail/inflight may
//! exist: creating a terminal link always removes the inflight link first.
//! Re-creating an inflight link is allowed as-is, so a builder re-claiming
//! its own crashed run needs no special casing.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::BuildSpecResult;
use crate::version::BuildVersion;

const SPECS_DIR: &str = "buildspecs";
const BUILDERS_DIR: &str = "build-name";

/// Status a builder can record for a spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecStatus {
    Pass,
    Fail,
    InFlight,
}

impl SpecStatus {
    pub fn dir_name(self) -> &'static str {
        match self {
            SpecStatus::Pass => "pass",
            SpecStatus::Fail => "fail",
            SpecStatus::InFlight => "inflight",
        }
    }

    fn is_terminal(self) -> bool {
        !matches!(self, SpecStatus::InFlight)
    }
}

/// View over one builder's slice of the coordination checkout.
#[derive(Debug, Clone)]
pub struct SpecStore {
    root: PathBuf,
    build_name: String,
}

impl SpecStore {
    pub fn new(root: impl Into<PathBuf>, build_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            build_name: build_name.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn spec_rel(version: &BuildVersion) -> String {
        format!("{}/{version}.xml", version.dir_prefix())
    }

    /// Absolute path of the spec file for a version.
    pub fn spec_path(&self, version: &BuildVersion) -> PathBuf {
        self.root.join(SPECS_DIR).join(Self::spec_rel(version))
    }

    fn link_path(&self, status: SpecStatus, version: &BuildVersion) -> PathBuf {
        self.root
            .join(BUILDERS_DIR)
            .join(&self.build_name)
            .join(status.dir_name())
            .join(Self::spec_rel(version))
    }

    /// Write (or overwrite) the spec file for a version.
    pub fn write_spec(&self, version: &BuildVersion, content: &str) -> BuildSpecResult<PathBuf> {
        let path = self.spec_path(version);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(path)
    }

    pub fn read_spec(&self, version: &BuildVersion) -> BuildSpecResult<String> {
        Ok(fs::read_to_string(self.spec_path(version))?)
    }

    /// Every version with a spec file, ascending.
    pub fn all_specs(&self) -> BuildSpecResult<Vec<BuildVersion>> {
        scan_versions(&self.root.join(SPECS_DIR))
    }

    /// Every version this builder has marked with `status`, ascending.
    pub fn specs_for(&self, status: SpecStatus) -> BuildSpecResult<Vec<BuildVersion>> {
        scan_versions(
            &self
                .root
                .join(BUILDERS_DIR)
                .join(&self.build_name)
                .join(status.dir_name()),
        )
    }

    pub fn latest(&self) -> BuildSpecResult<Option<BuildVersion>> {
        Ok(self.all_specs()?.into_iter().max())
    }

    /// Record `status` for a version with a relative symlink.
    ///
    /// Terminal statuses clear the inflight link first, keeping at most one
    /// link alive per builder and version. An existing link of the same
    /// status is silently replaced.
    pub fn set_symlink(&self, status: SpecStatus, version: &BuildVersion) -> BuildSpecResult<()> {
        if status.is_terminal() {
            remove_if_present(&self.link_path(SpecStatus::InFlight, version))?;
        }
        let link = self.link_path(status, version);
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)?;
        }
        remove_if_present(&link)?;
        // From build-name/<name>/<status>/<major.minor>/ back up to the
        // root, then down into buildspecs/.
        let target = format!("../../../../{SPECS_DIR}/{}", Self::spec_rel(version));
        symlink(&target, &link)?;
        debug!(%version, status = status.dir_name(), "recorded spec status");
        Ok(())
    }

    /// Specs this builder has not touched yet, strictly newer than
    /// `last_processed`, ascending.
    pub fn unprocessed(
        &self,
        last_processed: Option<&BuildVersion>,
    ) -> BuildSpecResult<Vec<BuildVersion>> {
        let mut seen = self.specs_for(SpecStatus::Pass)?;
        seen.extend(self.specs_for(SpecStatus::Fail)?);
        seen.extend(self.specs_for(SpecStatus::InFlight)?);
        Ok(self
            .all_specs()?
            .into_iter()
            .filter(|v| !seen.contains(v))
            .filter(|v| last_processed.map_or(true, |last| v > last))
            .collect())
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Collect `<major.minor>/<version>.xml` entries under `dir`, ascending.
/// A missing directory is an empty result, not an error.
fn scan_versions(dir: &Path) -> BuildSpecResult<Vec<BuildVersion>> {
    let mut versions = Vec::new();
    let outer = match fs::read_dir(dir) {
        Ok(iter) => iter,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(versions),
        Err(e) => return Err(e.into()),
    };
    for prefix_entry in outer {
        let prefix_entry = prefix_entry?;
        if !prefix_entry.file_type()?.is_dir() {
            continue;
        }
        for entry in fs::read_dir(prefix_entry.path())? {
            let name = entry?.file_name();
            let Some(stem) = name.to_string_lossy().strip_suffix(".xml").map(str::to_string)
            else {
                continue;
            };
            if let Some(version) = BuildVersion::parse(&stem) {
                versions.push(version);
            }
        }
    }
    versions.sort();
    Ok(versions)
}
