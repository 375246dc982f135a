//! KN-022: Package resource — macOS flat installer packages.

use super::{BakeContext, Item, ItemBase};
use crate::core::parser::Attributes;
use crate::core::types::ResourceKind;
use crate::error::Result;
use crate::fetch::checksum::Checksum;
use crate::transport;
use std::path::Path;

const INSTALLER: &str = "/usr/sbin/installer";
const PKGUTIL: &str = "/usr/sbin/pkgutil";

#[derive(Debug, Clone)]
pub struct Pkg {
    base: ItemBase,
    pub source: String,
    pub checksum: Option<Checksum>,
    /// Volume to install onto.
    pub target: String,
    /// Receipt id; when installed, the bake is skipped.
    pub package_id: Option<String>,
    pub allow_untrusted: bool,
    pub force: bool,
}

impl Pkg {
    pub fn decode(base: ItemBase, attrs: &mut Attributes) -> Self {
        Self {
            base,
            source: attrs.required_str("source"),
            checksum: attrs.optional_checksum("checksum"),
            target: attrs.optional_str("target").unwrap_or_else(|| "/".to_string()),
            package_id: attrs.optional_str("package_id"),
            allow_untrusted: attrs.optional_bool("allow_untrusted", false),
            force: attrs.optional_bool("force", false),
        }
    }
}

/// `sudo installer -pkg <file> -target <target> [-allowUntrusted]`.
pub fn install_command(package: &Path, target: &str, allow_untrusted: bool) -> Vec<String> {
    let mut argv = vec![
        "sudo".to_string(),
        INSTALLER.to_string(),
        "-pkg".to_string(),
        package.to_string_lossy().into_owned(),
        "-target".to_string(),
        target.to_string(),
    ];
    if allow_untrusted {
        argv.push("-allowUntrusted".to_string());
    }
    argv
}

pub fn receipt_command(package_id: &str) -> Vec<String> {
    vec![
        PKGUTIL.to_string(),
        "--pkg-info".to_string(),
        package_id.to_string(),
    ]
}

/// Install `package` onto `target`.
pub fn install(package: &Path, target: &str, allow_untrusted: bool) -> Result<()> {
    let argv = install_command(package, target, allow_untrusted);
    log::info!("installing {} to {}", package.display(), target);
    log::trace!("install command: {}", transport::display_command(&argv));
    let result = transport::run_checked(&argv)?;
    log::trace!("install response:\n{}", result.formatted());
    Ok(())
}

impl Item for Pkg {
    fn base(&self) -> &ItemBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ItemBase {
        &mut self.base
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Pkg
    }

    fn bake(&self, ctx: &BakeContext) -> Result<()> {
        if !self.force {
            if let Some(id) = &self.package_id {
                if transport::run(&receipt_command(id))?.success() {
                    log::info!("package {} already installed, skipping", id);
                    return Ok(());
                }
            }
        }

        let file = ctx.acquire(&self.source, self.checksum.as_ref())?;
        install(&file, &self.target, self.allow_untrusted)
    }
}
