//! KN-025: Git resource — clone a repository, optionally keep it current.

use super::{BakeContext, Item, ItemBase};
use crate::core::parser::Attributes;
use crate::core::types::ResourceKind;
use crate::error::Result;
use crate::transport;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Git {
    base: ItemBase,
    pub repository: String,
    pub destination: PathBuf,
    pub branch: Option<String>,
    /// Commit, tag or ref checked out after clone or fetch.
    pub revision: Option<String>,
    /// Fetch and move the checkout forward when it already exists.
    pub update: bool,
}

impl Git {
    pub fn decode(base: ItemBase, attrs: &mut Attributes) -> Self {
        Self {
            base,
            repository: attrs.required_str("repository"),
            destination: PathBuf::from(attrs.required_str("destination")),
            branch: attrs.optional_str("branch"),
            revision: attrs.optional_str("revision"),
            update: attrs.optional_bool("update", false),
        }
    }

    fn git(&self, args: &[&str]) -> Vec<String> {
        let mut argv = vec!["git".to_string()];
        argv.extend(args.iter().map(|a| a.to_string()));
        transport::as_user(argv, self.base.user.as_deref())
    }

    fn dest(&self) -> String {
        self.destination.to_string_lossy().into_owned()
    }

    pub fn clone_command(&self) -> Vec<String> {
        let dest = self.dest();
        match &self.branch {
            Some(branch) => self.git(&[
                "clone",
                "--branch",
                branch.as_str(),
                self.repository.as_str(),
                dest.as_str(),
            ]),
            None => self.git(&["clone", self.repository.as_str(), dest.as_str()]),
        }
    }

    pub fn fetch_command(&self) -> Vec<String> {
        let dest = self.dest();
        self.git(&["-C", dest.as_str(), "fetch", "origin"])
    }

    /// Checkout of `revision`, else `branch`. None when neither is set.
    pub fn checkout_command(&self) -> Option<Vec<String>> {
        let target = self.revision.as_deref().or(self.branch.as_deref())?;
        let dest = self.dest();
        Some(self.git(&["-C", dest.as_str(), "checkout", target]))
    }

    /// Fast-forward to the fetched head of `branch`, or of the current
    /// branch's upstream. None when `revision` pins the checkout.
    pub fn fast_forward_command(&self) -> Option<Vec<String>> {
        if self.revision.is_some() {
            return None;
        }
        let dest = self.dest();
        Some(match &self.branch {
            Some(branch) => {
                let upstream = format!("origin/{}", branch);
                self.git(&["-C", dest.as_str(), "merge", "--ff-only", upstream.as_str()])
            }
            None => self.git(&["-C", dest.as_str(), "merge", "--ff-only"]),
        })
    }

    fn exists(&self) -> bool {
        is_checkout(&self.destination)
    }
}

fn is_checkout(path: &Path) -> bool {
    path.join(".git").exists()
}

impl Item for Git {
    fn base(&self) -> &ItemBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ItemBase {
        &mut self.base
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Git
    }

    fn bake(&self, ctx: &BakeContext) -> Result<()> {
        let timeout = ctx.command_timeout;

        if self.exists() {
            if !self.update {
                log::info!("{} already checked out, skipping", self.destination.display());
                return Ok(());
            }
            log::info!("updating {}", self.destination.display());
            transport::stream_checked("\t", &self.fetch_command(), timeout)?;
            if let Some(checkout) = self.checkout_command() {
                transport::stream_checked("\t", &checkout, timeout)?;
            }
            if let Some(merge) = self.fast_forward_command() {
                transport::stream_checked("\t", &merge, timeout)?;
            }
            return Ok(());
        }

        log::info!(
            "cloning {} into {}",
            self.repository,
            self.destination.display()
        );
        transport::stream_checked("\t", &self.clone_command(), timeout)?;
        if self.revision.is_some() {
            if let Some(checkout) = self.checkout_command() {
                transport::stream_checked("\t", &checkout, timeout)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::test_server::direct_fetcher;
    use crate::resources::testing::{attrs, context};

    fn git(yaml: &str) -> Git {
        let mut a = attrs("tools", yaml);
        let base = ItemBase::decode(&mut a);
        let g = Git::decode(base, &mut a);
        a.finish().unwrap();
        g
    }

    fn git_available() -> bool {
        transport::run(&["git", "--version"]).is_ok_and(|r| r.success())
    }

    #[test]
    fn test_kn025_clone_command() {
        let g = git("repository: https://example.com/t.git\ndestination: /opt/t");
        assert_eq!(
            g.clone_command(),
            vec!["git", "clone", "https://example.com/t.git", "/opt/t"]
        );
        let b = git("repository: r\ndestination: /opt/t\nbranch: main\nuser: admin");
        assert_eq!(
            b.clone_command(),
            vec!["sudo", "-u", "admin", "git", "clone", "--branch", "main", "r", "/opt/t"]
        );
    }

    #[test]
    fn test_kn025_checkout_prefers_revision() {
        let g = git("repository: r\ndestination: /d\nbranch: main\nrevision: v1.2.0");
        assert_eq!(
            g.checkout_command().unwrap(),
            vec!["git", "-C", "/d", "checkout", "v1.2.0"]
        );
        let none = git("repository: r\ndestination: /d");
        assert!(none.checkout_command().is_none());
    }

    #[test]
    fn test_kn025_fetch_command() {
        let g = git("repository: r\ndestination: /d");
        assert_eq!(g.fetch_command(), vec!["git", "-C", "/d", "fetch", "origin"]);
    }

    #[test]
    fn test_kn025_fast_forward_command() {
        let b = git("repository: r\ndestination: /d\nbranch: main");
        assert_eq!(
            b.fast_forward_command().unwrap(),
            vec!["git", "-C", "/d", "merge", "--ff-only", "origin/main"]
        );
        let plain = git("repository: r\ndestination: /d");
        assert_eq!(
            plain.fast_forward_command().unwrap(),
            vec!["git", "-C", "/d", "merge", "--ff-only"]
        );
        let pinned = git("repository: r\ndestination: /d\nbranch: main\nrevision: v1");
        assert!(pinned.fast_forward_command().is_none());
    }

    #[test]
    fn test_kn025_existing_checkout_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        // An unreachable repository proves nothing is run.
        let g = git(&format!(
            "repository: /nonexistent/repo\ndestination: {}",
            dir.path().display()
        ));
        let fetcher = direct_fetcher();
        g.bake(&context(dir.path(), &fetcher)).unwrap();
    }

    #[test]
    fn test_kn025_clone_local_repository() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        let setup = format!(
            "cd {} && git init -q && echo hi > f && git add f && \
             git -c user.name=kiln -c user.email=kiln@example.com commit -qm init",
            transport::shell_quote(&src.to_string_lossy())
        );
        transport::run_checked(&["sh", "-c", setup.as_str()]).unwrap();

        let out = dir.path().join("out");
        let g = git(&format!(
            "repository: {}\ndestination: {}",
            src.display(),
            out.display()
        ));
        let fetcher = direct_fetcher();
        g.bake(&context(dir.path(), &fetcher)).unwrap();
        assert_eq!(std::fs::read_to_string(out.join("f")).unwrap().trim(), "hi");
    }

    #[test]
    fn test_kn025_update_advances_branch() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        let quoted = transport::shell_quote(&src.to_string_lossy());
        let commit = "git -c user.name=kiln -c user.email=kiln@example.com commit -q";
        let setup = format!(
            "cd {quoted} && git init -q && git checkout -qb release && echo v1 > f && \
             git add f && {commit} -m one"
        );
        transport::run_checked(&["sh", "-c", setup.as_str()]).unwrap();

        let out = dir.path().join("out");
        let g = git(&format!(
            "repository: {}\ndestination: {}\nbranch: release\nupdate: true",
            src.display(),
            out.display()
        ));
        let fetcher = direct_fetcher();
        let ctx = context(dir.path(), &fetcher);
        g.bake(&ctx).unwrap();
        assert_eq!(std::fs::read_to_string(out.join("f")).unwrap().trim(), "v1");

        let advance = format!("cd {quoted} && echo v2 > f && {commit} -am two");
        transport::run_checked(&["sh", "-c", advance.as_str()]).unwrap();
        g.bake(&ctx).unwrap();
        assert_eq!(std::fs::read_to_string(out.join("f")).unwrap().trim(), "v2");
    }
}
