//! KN-020: Resources — the unit of work the scheduler converges.
//!
//! Every kind embeds an [`ItemBase`] carrying the block name, dependencies,
//! guards, optional user, and the baked flag. The kind itself only knows how
//! to bake; readiness, guards, and dependency lookup are shared defaults.

pub mod archive;
pub mod dmg;
pub mod git;
pub mod pkg;
pub mod shell;

use crate::core::guard::{self, Guard};
use crate::core::parser::Attributes;
use crate::core::types::ResourceKind;
use crate::error::{Error, Result};
use crate::fetch::checksum::{self, Checksum};
use crate::fetch::{self, DownloadOutcome, Fetcher};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Attributes every resource kind accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemBase {
    pub name: String,
    pub depends_on: Vec<String>,
    pub only_if: Option<String>,
    pub not_if: Option<String>,
    /// Run privileged steps as this user instead of root.
    pub user: Option<String>,
    baked: bool,
}

impl ItemBase {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Pull the shared attributes out of a block.
    pub fn decode(attrs: &mut Attributes) -> Self {
        Self {
            name: attrs.block().to_string(),
            depends_on: attrs.string_list("depends_on"),
            only_if: attrs.optional_str("only_if"),
            not_if: attrs.optional_str("not_if"),
            user: attrs.optional_str("user"),
            baked: false,
        }
    }
}

/// Everything a bake needs from the run.
pub struct BakeContext<'a> {
    pub tmp_dir: &'a Path,
    pub fetcher: &'a Fetcher,
    /// Deadline for streamed commands.
    pub command_timeout: Option<Duration>,
}

impl BakeContext<'_> {
    /// Create the scratch directory if needed.
    pub fn ensure_tmp_dir(&self) -> Result<()> {
        std::fs::create_dir_all(self.tmp_dir).map_err(|e| Error::io(self.tmp_dir, e))
    }

    /// Make `source` available locally and verified.
    ///
    /// URLs are downloaded to `tmp_dir/<basename>`, reusing a cached copy
    /// that still matches. Local paths are verified in place. Without a
    /// checksum nothing is verified.
    pub fn acquire(&self, source: &str, expected: Option<&Checksum>) -> Result<PathBuf> {
        if fetch::is_remote(source) {
            let basename = fetch::url_basename(source).ok_or_else(|| Error::Transport {
                url: source.to_string(),
                message: "URL has no file name".to_string(),
            })?;
            let destination = self.tmp_dir.join(basename);
            match self.fetcher.fetch(source, &destination, expected)? {
                DownloadOutcome::Reused => {
                    log::info!("using cached {}", destination.display())
                }
                DownloadOutcome::Fetched { bytes, digest } => log::info!(
                    "downloaded {} ({} bytes, digest {})",
                    destination.display(),
                    bytes,
                    digest
                ),
            }
            return Ok(destination);
        }

        let path = PathBuf::from(source);
        if !path.exists() {
            return Err(Error::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "source not found"),
            ));
        }
        if let Some(expected) = expected {
            checksum::verify_file(&path, expected)?;
        }
        Ok(path)
    }
}

/// A declared unit of desired state.
pub trait Item: fmt::Debug {
    fn base(&self) -> &ItemBase;
    fn base_mut(&mut self) -> &mut ItemBase;
    fn kind(&self) -> ResourceKind;

    /// Converge the host toward this resource. Short-circuits when the
    /// resource is already in place.
    fn bake(&self, ctx: &BakeContext) -> Result<()>;

    fn name(&self) -> &str {
        &self.base().name
    }

    fn dependencies(&self) -> &[String] {
        &self.base().depends_on
    }

    fn is_ready(&self) -> bool {
        self.base().baked
    }

    fn mark_baked(&mut self) {
        self.base_mut().baked = true;
    }

    fn guard_skips_only_if(&self) -> bool {
        guard::should_skip(Guard::OnlyIf, self.name(), self.base().only_if.as_deref())
    }

    fn guard_skips_not_if(&self) -> bool {
        guard::should_skip(Guard::NotIf, self.name(), self.base().not_if.as_deref())
    }
}

/// Decode one block into a resource of the kind its `type` names.
pub fn build(mut attrs: Attributes) -> Result<Box<dyn Item>> {
    let keyword = attrs.required_str("type");
    let base = ItemBase::decode(&mut attrs);

    let item: Option<Box<dyn Item>> = match ResourceKind::from_keyword(&keyword) {
        Some(ResourceKind::Dmg) => Some(Box::new(dmg::Dmg::decode(base, &mut attrs))),
        Some(ResourceKind::Pkg) => Some(Box::new(pkg::Pkg::decode(base, &mut attrs))),
        Some(ResourceKind::Shell) => Some(Box::new(shell::Shell::decode(base, &mut attrs))),
        Some(ResourceKind::Archive) => Some(Box::new(archive::Archive::decode(base, &mut attrs))),
        Some(ResourceKind::Git) => Some(Box::new(git::Git::decode(base, &mut attrs))),
        None => {
            if !keyword.is_empty() {
                attrs.diagnostic(format!("unknown resource type '{}'", keyword));
            }
            attrs.consume_all();
            None
        }
    };

    let block = attrs.block().to_string();
    attrs.finish()?;
    item.ok_or(Error::ConfigDecode {
        resource: block,
        diagnostics: vec!["missing required attribute 'type'".to_string()],
    })
}

/// Final path component of `path`, as a string.
pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Context without a command deadline.
    pub fn context<'a>(tmp_dir: &'a Path, fetcher: &'a Fetcher) -> BakeContext<'a> {
        BakeContext {
            tmp_dir,
            fetcher,
            command_timeout: None,
        }
    }

    pub fn attrs(name: &str, yaml: &str) -> Attributes {
        let values = serde_yaml_ng::from_str(yaml).unwrap();
        Attributes::new(name, values)
    }
}
