//! KN-021: Disk image resource.
//!
//! Mounts the image at `/Volumes/<name>`, then copies the `.app` bundle to
//! the destination (or installs a contained package), then unmounts.
//! Unmount is attempted whatever the copy did.

use super::{pkg, BakeContext, Item, ItemBase};
use crate::core::parser::Attributes;
use crate::core::types::ResourceKind;
use crate::error::Result;
use crate::fetch::checksum::Checksum;
use crate::transport;
use std::path::{Path, PathBuf};

const HDIUTIL: &str = "/usr/bin/hdiutil";
const RSYNC: &str = "/usr/bin/rsync";
const DEFAULT_DESTINATION: &str = "/Applications/";
const VOLUMES: &str = "/Volumes";

/// Recursive copy preserving links, modes, ownership and times.
const RSYNC_FLAGS: &[&str] = &[
    "--force",
    "--recursive",
    "--links",
    "--perms",
    "--executability",
    "--owner",
    "--group",
    "--times",
];

/// Programs a disk image bake runs. Each is an argv prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskTools {
    pub hdiutil: Vec<String>,
    pub rsync: Vec<String>,
    /// Run the copy through sudo.
    pub elevate: bool,
}

impl Default for DiskTools {
    fn default() -> Self {
        Self {
            hdiutil: vec![HDIUTIL.to_string()],
            rsync: vec![RSYNC.to_string()],
            elevate: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dmg {
    base: ItemBase,
    pub source: String,
    pub checksum: Option<Checksum>,
    /// Bundle name without `.app`. Defaults to the block name.
    pub app: String,
    /// Package inside the image to install instead of copying the bundle.
    pub pkg: Option<String>,
    /// Always ends with `/`.
    pub destination: String,
    pub accept_eula: bool,
    pub allow_untrusted: bool,
    pub force: bool,
    pub tools: DiskTools,
}

impl Dmg {
    pub fn decode(base: ItemBase, attrs: &mut Attributes) -> Self {
        let app = attrs
            .optional_str("app")
            .unwrap_or_else(|| base.name.clone());
        let destination = normalize_destination(attrs.optional_str("destination"));
        Self {
            source: attrs.required_str("source"),
            checksum: attrs.optional_checksum("checksum"),
            pkg: attrs.optional_str("pkg"),
            accept_eula: attrs.optional_bool("accept_eula", false),
            allow_untrusted: attrs.optional_bool("allow_untrusted", false),
            force: attrs.optional_bool("force", false),
            base,
            app,
            destination,
            tools: DiskTools::default(),
        }
    }

    pub fn mountpoint(&self) -> PathBuf {
        Path::new(VOLUMES).join(&self.base.name)
    }

    /// Where the bundle ends up.
    pub fn installed_path(&self) -> PathBuf {
        PathBuf::from(format!("{}{}.app", self.destination, self.app))
    }

    pub fn mount_command(&self, image: &Path) -> Vec<String> {
        let mut attach = self.tools.hdiutil.clone();
        attach.extend([
            "attach".to_string(),
            image.to_string_lossy().into_owned(),
            "-nobrowse".to_string(),
            "-mountpoint".to_string(),
            self.mountpoint().to_string_lossy().into_owned(),
        ]);
        if !self.accept_eula {
            return attach;
        }
        let quoted: Vec<String> = attach.iter().map(|a| transport::shell_quote(a)).collect();
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("yes | {}", quoted.join(" ")),
        ]
    }

    pub fn copy_command(&self) -> Vec<String> {
        let mut argv = self.tools.rsync.clone();
        argv.extend(RSYNC_FLAGS.iter().map(|f| f.to_string()));
        argv.push(
            self.mountpoint()
                .join(format!("{}.app", self.app))
                .to_string_lossy()
                .into_owned(),
        );
        argv.push(self.destination.clone());
        if self.tools.elevate {
            transport::privileged(argv, self.base.user.as_deref())
        } else {
            transport::as_user(argv, self.base.user.as_deref())
        }
    }

    pub fn unmount_command(&self) -> Vec<String> {
        let mut argv = self.tools.hdiutil.clone();
        argv.extend([
            "unmount".to_string(),
            self.mountpoint().to_string_lossy().into_owned(),
        ]);
        argv
    }

    fn mount(&self, image: &Path) -> Result<()> {
        let argv = self.mount_command(image);
        log::info!("mounting {}", image.display());
        log::trace!("mount command: {}", transport::display_command(&argv));
        let result = transport::run_checked(&argv)?;
        log::trace!("mount response:\n{}", result.formatted());
        Ok(())
    }

    fn copy_app(&self) -> Result<()> {
        let argv = self.copy_command();
        log::info!("installing {}.app to {}", self.app, self.destination);
        log::trace!("install command: {}", transport::display_command(&argv));
        let result = transport::run_checked(&argv)?;
        log::trace!("install response:\n{}", result.formatted());
        Ok(())
    }

    fn unmount(&self) {
        let argv = self.unmount_command();
        match transport::run(&argv) {
            Ok(r) if r.success() => log::debug!("unmounted {}", self.mountpoint().display()),
            Ok(r) => log::warn!(
                "unmount of {} exited {}:\n{}",
                self.mountpoint().display(),
                r.exit_code,
                r.formatted()
            ),
            Err(e) => log::warn!("unmount of {} failed: {}", self.mountpoint().display(), e),
        }
    }
}

fn normalize_destination(destination: Option<String>) -> String {
    match destination {
        Some(d) if !d.is_empty() => {
            if d.ends_with('/') {
                d
            } else {
                format!("{}/", d)
            }
        }
        _ => DEFAULT_DESTINATION.to_string(),
    }
}

impl Item for Dmg {
    fn base(&self) -> &ItemBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ItemBase {
        &mut self.base
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Dmg
    }

    fn bake(&self, ctx: &BakeContext) -> Result<()> {
        let installed = self.installed_path();
        if !self.force && installed.exists() {
            log::info!("{} already exists, skipping", installed.display());
            return Ok(());
        }

        let image = ctx.acquire(&self.source, self.checksum.as_ref())?;
        self.mount(&image)?;

        let outcome = match &self.pkg {
            Some(name) => pkg::install(&self.mountpoint().join(name), "/", self.allow_untrusted),
            None => self.copy_app(),
        };
        self.unmount();
        outcome
    }
}
