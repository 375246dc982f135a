//! KN-023: Shell resource — run an inline script.
//!
//! The script is written to `<tmp_dir>/<digest>.sh`, named by the sha256 of
//! its text, so identical scripts share one file across runs.

use super::{BakeContext, Item, ItemBase};
use crate::core::parser::Attributes;
use crate::core::types::ResourceKind;
use crate::error::{Error, Result};
use crate::fetch::checksum::sha256_hex;
use crate::transport;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const DEFAULT_INTERPRETER: &str = "/bin/bash";
const SCRIPT_MODE: u32 = 0o744;
const DIGEST_PREFIX_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct Shell {
    base: ItemBase,
    pub script: String,
    pub interpreter: String,
    /// Tee output to the console while the script runs.
    pub stream: bool,
}

impl Shell {
    pub fn decode(base: ItemBase, attrs: &mut Attributes) -> Self {
        Self {
            base,
            script: attrs.required_str("script"),
            interpreter: attrs
                .optional_str("interpreter")
                .unwrap_or_else(|| DEFAULT_INTERPRETER.to_string()),
            stream: attrs.optional_bool("stream", false),
        }
    }

    /// Where the script text is written.
    pub fn script_path(&self, tmp_dir: &Path) -> PathBuf {
        let digest = sha256_hex(&self.script);
        tmp_dir.join(format!("{}.sh", &digest[..DIGEST_PREFIX_LEN]))
    }

    pub fn command(&self, script_path: &Path) -> Vec<String> {
        transport::as_user(
            vec![
                self.interpreter.clone(),
                script_path.to_string_lossy().into_owned(),
            ],
            self.base.user.as_deref(),
        )
    }
}

impl Item for Shell {
    fn base(&self) -> &ItemBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ItemBase {
        &mut self.base
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Shell
    }

    fn bake(&self, ctx: &BakeContext) -> Result<()> {
        let path = self.script_path(ctx.tmp_dir);
        std::fs::write(&path, &self.script).map_err(|e| Error::io(&path, e))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(SCRIPT_MODE))
            .map_err(|e| Error::io(&path, e))?;

        log::info!("running script {}", path.display());
        let argv = self.command(&path);
        let result = if self.stream {
            transport::stream_checked("\t", &argv, ctx.command_timeout)?
        } else {
            transport::run_checked(&argv)?
        };

        if result.raw.is_empty() {
            log::debug!("script {} exited {}", path.display(), result.exit_code);
        } else {
            log::debug!("script output:\n{}", result.formatted());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::test_server::direct_fetcher;
    use crate::resources::testing::{attrs, context};

    fn shell(yaml: &str) -> Shell {
        let mut a = attrs("script", yaml);
        let base = ItemBase::decode(&mut a);
        let s = Shell::decode(base, &mut a);
        a.finish().unwrap();
        s
    }

    #[test]
    fn test_kn023_defaults() {
        let s = shell("script: echo hi");
        assert_eq!(s.interpreter, "/bin/bash");
        assert!(!s.stream);
    }

    #[test]
    fn test_kn023_script_path_is_content_addressed() {
        let a = shell("script: echo one");
        let b = shell("script: echo one");
        let c = shell("script: echo two");
        let tmp = Path::new("/tmp/kiln");
        assert_eq!(a.script_path(tmp), b.script_path(tmp));
        assert_ne!(a.script_path(tmp), c.script_path(tmp));
        let name = a.script_path(tmp).file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name.len(), DIGEST_PREFIX_LEN + 3);
        assert!(name.ends_with(".sh"));
    }

    #[test]
    fn test_kn023_command_with_user() {
        let s = shell("script: whoami\nuser: admin");
        assert_eq!(
            s.command(Path::new("/tmp/x.sh")),
            vec!["sudo", "-u", "admin", "/bin/bash", "/tmp/x.sh"]
        );
    }

    #[test]
    fn test_kn023_bake_runs_script() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let s = shell(&format!(
            "script: \"echo baked > '{}'\"\ninterpreter: /bin/sh",
            marker.display()
        ));
        let fetcher = direct_fetcher();
        s.bake(&context(dir.path(), &fetcher)).unwrap();
        assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "baked");

        let mode = std::fs::metadata(s.script_path(dir.path()))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, SCRIPT_MODE);
    }

    #[test]
    fn test_kn023_bake_nonzero_exit_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let s = shell("script: \"echo broken; exit 5\"\ninterpreter: /bin/sh");
        let fetcher = direct_fetcher();
        let err = s.bake(&context(dir.path(), &fetcher)).unwrap_err();
        assert!(matches!(err, Error::CommandFailed { code: 5, .. }));
    }

    #[test]
    fn test_kn023_bake_streamed() {
        let dir = tempfile::tempdir().unwrap();
        let s = shell("script: \"echo streamed\"\ninterpreter: /bin/sh\nstream: true");
        let fetcher = direct_fetcher();
        s.bake(&context(dir.path(), &fetcher)).unwrap();
    }
}
