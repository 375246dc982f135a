//! KN-024: Archive resource — unpack a zip or tarball into a directory.
//!
//! Extraction happens in-process. Entries whose path would land outside the
//! destination (absolute paths, `..`) fail the bake before anything of that
//! entry is written. Symlink entries become symlinks, and their target must
//! resolve inside the destination too.

use super::{file_name, BakeContext, Item, ItemBase};
use crate::core::parser::Attributes;
use crate::core::types::ResourceKind;
use crate::error::{Error, Result};
use crate::fetch::checksum::Checksum;
use crate::transport;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Zip,
    TarGz,
    Tar,
}

impl Format {
    /// Guess from the file name. Anything unrecognised is treated as zip.
    pub fn detect(path: &Path) -> Self {
        let name = file_name(path).to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Self::TarGz
        } else if name.ends_with(".tar") {
            Self::Tar
        } else {
            Self::Zip
        }
    }
}

#[derive(Debug, Clone)]
pub struct Archive {
    base: ItemBase,
    pub source: String,
    pub checksum: Option<Checksum>,
    pub destination: PathBuf,
    /// Path whose presence means the archive is already unpacked.
    pub creates: Option<PathBuf>,
    pub force: bool,
}

impl Archive {
    pub fn decode(base: ItemBase, attrs: &mut Attributes) -> Self {
        Self {
            base,
            source: attrs.required_str("source"),
            checksum: attrs.optional_checksum("checksum"),
            destination: PathBuf::from(attrs.required_str("destination")),
            creates: attrs.optional_str("creates").map(PathBuf::from),
            force: attrs.optional_bool("force", false),
        }
    }

    fn marker(&self) -> &Path {
        self.creates.as_deref().unwrap_or(&self.destination)
    }

    pub fn chown_command(&self, user: &str) -> Vec<String> {
        vec![
            "sudo".to_string(),
            "chown".to_string(),
            "-R".to_string(),
            user.to_string(),
            self.destination.to_string_lossy().into_owned(),
        ]
    }
}

impl Item for Archive {
    fn base(&self) -> &ItemBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ItemBase {
        &mut self.base
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Archive
    }

    fn bake(&self, ctx: &BakeContext) -> Result<()> {
        if !self.force && self.marker().exists() {
            log::info!("{} already exists, skipping", self.marker().display());
            return Ok(());
        }

        let file = ctx.acquire(&self.source, self.checksum.as_ref())?;
        std::fs::create_dir_all(&self.destination).map_err(|e| Error::io(&self.destination, e))?;

        log::info!(
            "extracting {} to {}",
            file.display(),
            self.destination.display()
        );
        let count = extract(&file, &self.destination)?;
        log::debug!("extracted {} entries", count);

        if let Some(user) = &self.base.user {
            transport::run_checked(&self.chown_command(user))?;
        }
        Ok(())
    }
}

/// Unpack `archive` into `destination`. Returns the number of entries.
pub fn extract(archive: &Path, destination: &Path) -> Result<usize> {
    let file = File::open(archive).map_err(|e| Error::io(archive, e))?;
    match Format::detect(archive) {
        Format::Zip => extract_zip(archive, file, destination),
        Format::TarGz => extract_tar(
            archive,
            flate2::read::GzDecoder::new(BufReader::new(file)),
            destination,
        ),
        Format::Tar => extract_tar(archive, BufReader::new(file), destination),
    }
}

/// Relative and free of `..`.
pub fn is_contained(entry: &Path) -> bool {
    !entry.as_os_str().is_empty()
        && entry
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Whether a link at `link` (relative to the destination) pointing at
/// `target` stays inside the destination, resolving `..` lexically.
pub fn link_is_contained(link: &Path, target: &Path) -> bool {
    let mut depth: Vec<&std::ffi::OsStr> = Vec::new();
    let parent = link.parent().unwrap_or(Path::new(""));
    for component in parent.components().chain(target.components()) {
        match component {
            Component::Normal(part) => depth.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth.pop().is_none() {
                    return false;
                }
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

fn escape_error(archive: &Path, entry: &str) -> Error {
    Error::Parse {
        what: format!("archive {}", archive.display()),
        message: format!("entry '{}' escapes the destination", entry),
    }
}

fn archive_error(archive: &Path, e: impl std::fmt::Display) -> Error {
    Error::Parse {
        what: format!("archive {}", archive.display()),
        message: e.to_string(),
    }
}

fn extract_zip(archive: &Path, file: File, destination: &Path) -> Result<usize> {
    let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| archive_error(archive, e))?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| archive_error(archive, e))?;
        let relative = match entry.enclosed_name() {
            Some(p) if is_contained(&p) => p,
            _ => return Err(escape_error(archive, entry.name())),
        };
        let target = destination.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        if entry.unix_mode().is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
            let mut link = String::new();
            entry
                .read_to_string(&mut link)
                .map_err(|e| archive_error(archive, e))?;
            if !link_is_contained(&relative, Path::new(&link)) {
                return Err(escape_error(archive, entry.name()));
            }
            replace_with_symlink(&link, &target)?;
            continue;
        }
        let mut out = File::create(&target).map_err(|e| Error::io(&target, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| Error::io(&target, e))?;

        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode & 0o7777))
                .map_err(|e| Error::io(&target, e))?;
        }
    }

    Ok(zip.len())
}

fn replace_with_symlink(link: &str, target: &Path) -> Result<()> {
    if let Ok(meta) = std::fs::symlink_metadata(target) {
        let removed = if meta.is_dir() {
            std::fs::remove_dir_all(target)
        } else {
            std::fs::remove_file(target)
        };
        removed.map_err(|e| Error::io(target, e))?;
    }
    std::os::unix::fs::symlink(link, target).map_err(|e| Error::io(target, e))
}

fn extract_tar<R: io::Read>(archive: &Path, reader: R, destination: &Path) -> Result<usize> {
    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);
    let mut count = 0;

    for entry in tar.entries().map_err(|e| archive_error(archive, e))? {
        let mut entry = entry.map_err(|e| archive_error(archive, e))?;
        let path = entry
            .path()
            .map_err(|e| archive_error(archive, e))?
            .into_owned();
        if !is_contained(&path) {
            return Err(escape_error(archive, &path.to_string_lossy()));
        }
        let unpacked = entry
            .unpack_in(destination)
            .map_err(|e| Error::io(destination.join(&path), e))?;
        if !unpacked {
            return Err(escape_error(archive, &path.to_string_lossy()));
        }
        count += 1;
    }

    Ok(count)
}
