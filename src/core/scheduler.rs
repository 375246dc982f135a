//! KN-012: Scheduler — demand-driven convergence loop.
//!
//! Resources are visited in declaration order. Before a resource bakes, each
//! of its dependencies that is not yet ready is visited first (depth-first,
//! in `depends_on` order). A stack of resources currently being resolved
//! turns a dependency cycle into [`Error::DependencyCycle`] instead of
//! unbounded recursion.

use super::types::{ErrorPolicy, RunReport};
use crate::error::{Error, Result};
use crate::resources::{BakeContext, Item};
use indexmap::IndexMap;
use std::time::Instant;

/// Resources of one run, owned in declaration order and looked up by name.
#[derive(Debug, Default)]
pub struct ResourceSet {
    items: Vec<Box<dyn Item>>,
    index: IndexMap<String, usize>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource. A later resource with the same name replaces the
    /// lookup entry; recipes cannot produce duplicates.
    pub fn insert(&mut self, item: Box<dyn Item>) {
        let idx = self.items.len();
        self.index.insert(item.name().to_string(), idx);
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Item> {
        self.index.get(name).map(|&i| self.items[i].as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Item> {
        self.items.iter().map(|i| i.as_ref())
    }

    /// Name → declared dependencies, in declaration order.
    pub fn dependency_map(&self) -> IndexMap<String, Vec<String>> {
        self.items
            .iter()
            .map(|i| (i.name().to_string(), i.dependencies().to_vec()))
            .collect()
    }

    /// Order in which a full run first reaches each resource, ignoring
    /// guards and failures.
    pub fn plan(&self) -> Result<Vec<String>> {
        let mut planned = vec![false; self.len()];
        let mut order = Vec::with_capacity(self.len());
        for idx in 0..self.len() {
            self.plan_visit(idx, &mut planned, &mut Vec::new(), &mut order)?;
        }
        Ok(order)
    }

    fn plan_visit(
        &self,
        idx: usize,
        planned: &mut [bool],
        resolving: &mut Vec<usize>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if planned[idx] || self.items[idx].is_ready() {
            return Ok(());
        }
        if resolving.contains(&idx) {
            return Err(Error::DependencyCycle {
                path: self.cycle_path(resolving, idx),
            });
        }

        resolving.push(idx);
        for dep in self.items[idx].dependencies() {
            let dep_idx = self.dependency(idx, dep)?;
            self.plan_visit(dep_idx, planned, resolving, order)?;
        }
        resolving.pop();

        planned[idx] = true;
        order.push(self.name(idx));
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn name(&self, idx: usize) -> String {
        self.items[idx].name().to_string()
    }

    /// Cycle path from the first occurrence of `idx` on `stack`, closed
    /// with `idx` again.
    fn cycle_path(&self, stack: &[usize], idx: usize) -> Vec<String> {
        let start = stack.iter().position(|&i| i == idx).unwrap_or(0);
        let mut path: Vec<String> = stack[start..].iter().map(|&i| self.name(i)).collect();
        path.push(self.name(idx));
        path
    }

    /// Index of `dep`, declared by the resource at `idx`.
    fn dependency(&self, idx: usize, dep: &str) -> Result<usize> {
        self.lookup(dep).ok_or_else(|| Error::UnknownDependency {
            resource: self.name(idx),
            missing: dep.to_string(),
        })
    }
}

/// Drives one run over an owned [`ResourceSet`].
pub struct Scheduler<'a> {
    set: ResourceSet,
    ctx: BakeContext<'a>,
    policy: ErrorPolicy,
    report: RunReport,
}

impl<'a> Scheduler<'a> {
    pub fn new(set: ResourceSet, ctx: BakeContext<'a>, policy: ErrorPolicy) -> Self {
        Self {
            set,
            ctx,
            policy,
            report: RunReport::default(),
        }
    }

    pub fn resources(&self) -> &ResourceSet {
        &self.set
    }

    /// Converge one resource and whatever it depends on.
    pub fn run_item(&mut self, name: &str) -> Result<()> {
        let idx = self
            .set
            .lookup(name)
            .ok_or_else(|| Error::UnknownResource(name.to_string()))?;
        self.ctx.ensure_tmp_dir()?;
        self.visit(idx, &mut Vec::new())
    }

    /// Converge every resource. Structural errors and, under
    /// [`ErrorPolicy::Abort`], the first failed bake stop the run.
    pub fn run_all(&mut self) -> Result<RunReport> {
        let start = Instant::now();
        self.ctx.ensure_tmp_dir()?;
        for idx in 0..self.set.len() {
            self.visit(idx, &mut Vec::new())?;
        }
        self.report.total_duration = start.elapsed();
        log::info!("{}", self.report);
        Ok(self.report.clone())
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    fn visit(&mut self, idx: usize, resolving: &mut Vec<usize>) -> Result<()> {
        if self.set.items[idx].is_ready() {
            return Ok(());
        }
        if resolving.contains(&idx) {
            return Err(Error::DependencyCycle {
                path: self.set.cycle_path(resolving, idx),
            });
        }

        resolving.push(idx);
        let deps = self.set.items[idx].dependencies().to_vec();
        for dep in &deps {
            let dep_idx = self.set.dependency(idx, dep)?;
            if !self.set.items[dep_idx].is_ready() {
                self.visit(dep_idx, resolving)?;
            }
        }
        resolving.pop();

        let item = &self.set.items[idx];
        let name = item.name().to_string();
        if item.guard_skips_only_if() || item.guard_skips_not_if() {
            self.report.record_skip(&name);
            return Ok(());
        }

        log::info!("baking {} '{}'", item.kind(), name);
        let started = Instant::now();
        match item.bake(&self.ctx) {
            Ok(()) => {
                log::debug!("baked '{}' in {:.2}s", name, started.elapsed().as_secs_f64());
                self.report.baked.push(name);
            }
            Err(e) => match self.policy {
                ErrorPolicy::Continue => {
                    log::error!("'{}' failed: {}", name, e);
                    self.report.failed.push((name, e.to_string()));
                }
                ErrorPolicy::Abort => {
                    return Err(Error::BakeFailed {
                        resource: name,
                        source: Box::new(e),
                    });
                }
            },
        }
        self.set.items[idx].mark_baked();
        Ok(())
    }

    /// Visit order [`Scheduler::run_all`] would follow, without guards or bakes.
    pub fn plan(&self) -> Result<Vec<String>> {
        self.set.plan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ResourceKind;
    use crate::fetch::test_server::direct_fetcher;
    use crate::fetch::Fetcher;
    use crate::resources::ItemBase;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Journal = Rc<RefCell<Vec<String>>>;

    /// Records every bake in a shared journal.
    #[derive(Debug)]
    struct Stub {
        base: ItemBase,
        journal: Journal,
        fail: bool,
    }

    impl Item for Stub {
        fn base(&self) -> &ItemBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut ItemBase {
            &mut self.base
        }

        fn kind(&self) -> ResourceKind {
            ResourceKind::Shell
        }

        fn bake(&self, _ctx: &BakeContext) -> Result<()> {
            self.journal.borrow_mut().push(self.base.name.clone());
            if self.fail {
                return Err(Error::CommandFailed {
                    command: "stub".into(),
                    code: 1,
                    output: String::new(),
                });
            }
            Ok(())
        }
    }

    struct Recipe {
        set: ResourceSet,
        journal: Journal,
    }

    impl Recipe {
        fn new() -> Self {
            Self {
                set: ResourceSet::new(),
                journal: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn add(mut self, name: &str, deps: &[&str]) -> Self {
            self.push(name, deps, |_| {});
            self
        }

        fn with(mut self, name: &str, deps: &[&str], tweak: impl FnOnce(&mut Stub)) -> Self {
            self.push(name, deps, tweak);
            self
        }

        fn push(&mut self, name: &str, deps: &[&str], tweak: impl FnOnce(&mut Stub)) {
            let mut base = ItemBase::new(name);
            base.depends_on = deps.iter().map(|d| d.to_string()).collect();
            let mut stub = Stub {
                base,
                journal: Rc::clone(&self.journal),
                fail: false,
            };
            tweak(&mut stub);
            self.set.insert(Box::new(stub));
        }
    }

    fn run(recipe: Recipe, policy: ErrorPolicy) -> (Result<RunReport>, Vec<String>) {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher: Fetcher = direct_fetcher();
        let ctx = BakeContext {
            tmp_dir: tmp.path(),
            fetcher: &fetcher,
            command_timeout: None,
        };
        let mut scheduler = Scheduler::new(recipe.set, ctx, policy);
        let result = scheduler.run_all();
        let journal = recipe.journal.borrow().clone();
        (result, journal)
    }

    #[test]
    fn test_kn012_dependency_runs_first_regardless_of_declaration() {
        let recipe = Recipe::new().add("b", &["a"]).add("a", &[]);
        let (result, journal) = run(recipe, ErrorPolicy::Continue);
        assert_eq!(journal, vec!["a", "b"]);
        assert_eq!(result.unwrap().baked, vec!["a", "b"]);
    }

    #[test]
    fn test_kn012_depends_on_order_is_respected() {
        let recipe = Recipe::new()
            .add("app", &["z", "y"])
            .add("y", &[])
            .add("z", &[]);
        let (_, journal) = run(recipe, ErrorPolicy::Continue);
        assert_eq!(journal, vec!["z", "y", "app"]);
    }

    #[test]
    fn test_kn012_diamond_bakes_each_once() {
        let recipe = Recipe::new()
            .add("bottom", &["left", "right"])
            .add("left", &["top"])
            .add("right", &["top"])
            .add("top", &[]);
        let (_, journal) = run(recipe, ErrorPolicy::Continue);
        assert_eq!(journal, vec!["top", "left", "right", "bottom"]);
    }

    #[test]
    fn test_kn012_only_if_failure_skips_and_leaves_unbaked() {
        let recipe = Recipe::new().with("a", &[], |p| p.base.only_if = Some("false".into()));
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = direct_fetcher();
        let ctx = BakeContext {
            tmp_dir: tmp.path(),
            fetcher: &fetcher,
            command_timeout: None,
        };
        let journal = Rc::clone(&recipe.journal);
        let mut s = Scheduler::new(recipe.set, ctx, ErrorPolicy::Continue);
        let report = s.run_all().unwrap();
        assert!(journal.borrow().is_empty());
        assert_eq!(report.skipped, vec!["a"]);
        assert!(!s.resources().get("a").unwrap().is_ready());
    }

    #[test]
    fn test_kn012_not_if_success_skips() {
        let recipe = Recipe::new()
            .with("a", &[], |p| p.base.not_if = Some("true".into()))
            .with("b", &[], |p| p.base.not_if = Some("false".into()));
        let (result, journal) = run(recipe, ErrorPolicy::Continue);
        assert_eq!(journal, vec!["b"]);
        assert_eq!(result.unwrap().skipped, vec!["a"]);
    }

    #[test]
    fn test_kn012_skipped_dependency_is_reevaluated_not_baked() {
        let recipe = Recipe::new()
            .with("dep", &[], |p| p.base.only_if = Some("false".into()))
            .add("one", &["dep"])
            .add("two", &["dep"]);
        let (result, journal) = run(recipe, ErrorPolicy::Continue);
        assert_eq!(journal, vec!["one", "two"]);
        assert_eq!(result.unwrap().skipped, vec!["dep"]);
    }

    #[test]
    fn test_kn012_second_run_bakes_nothing() {
        let recipe = Recipe::new().add("a", &[]).add("b", &["a"]);
        let journal = Rc::clone(&recipe.journal);
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = direct_fetcher();
        let ctx = BakeContext {
            tmp_dir: tmp.path(),
            fetcher: &fetcher,
            command_timeout: None,
        };
        let mut s = Scheduler::new(recipe.set, ctx, ErrorPolicy::Continue);
        s.run_all().unwrap();
        s.run_all().unwrap();
        s.run_item("b").unwrap();
        assert_eq!(journal.borrow().len(), 2);
    }

    #[test]
    fn test_kn012_cycle_is_an_error() {
        let recipe = Recipe::new().add("a", &["b"]).add("b", &["a"]);
        let (result, journal) = run(recipe, ErrorPolicy::Continue);
        match result.unwrap_err() {
            Error::DependencyCycle { path } => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("unexpected {other}"),
        }
        assert!(journal.is_empty());
    }

    #[test]
    fn test_kn012_self_dependency_is_a_cycle() {
        let recipe = Recipe::new().add("a", &["a"]);
        let (result, _) = run(recipe, ErrorPolicy::Continue);
        assert!(matches!(result, Err(Error::DependencyCycle { .. })));
    }

    #[test]
    fn test_kn012_unknown_dependency_is_named() {
        let recipe = Recipe::new().add("a", &["ghost"]);
        let (result, _) = run(recipe, ErrorPolicy::Continue);
        match result.unwrap_err() {
            Error::UnknownDependency { resource, missing } => {
                assert_eq!(resource, "a");
                assert_eq!(missing, "ghost");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn test_kn012_continue_marks_failed_baked_and_proceeds() {
        let recipe = Recipe::new()
            .with("a", &[], |p| p.fail = true)
            .add("b", &["a"])
            .add("c", &[]);
        let (result, journal) = run(recipe, ErrorPolicy::Continue);
        let report = result.unwrap();
        assert_eq!(journal, vec!["a", "b", "c"]);
        assert_eq!(report.baked, vec!["b", "c"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "a");
        assert!(report.has_failures());
    }

    #[test]
    fn test_kn012_abort_stops_at_first_failure() {
        let recipe = Recipe::new()
            .with("a", &[], |p| p.fail = true)
            .add("b", &[]);
        let (result, journal) = run(recipe, ErrorPolicy::Abort);
        assert!(matches!(
            result,
            Err(Error::BakeFailed { ref resource, .. }) if resource == "a"
        ));
        assert_eq!(journal, vec!["a"]);
    }

    #[test]
    fn test_kn012_run_item_unknown_name() {
        let recipe = Recipe::new().add("a", &[]);
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = direct_fetcher();
        let ctx = BakeContext {
            tmp_dir: tmp.path(),
            fetcher: &fetcher,
            command_timeout: None,
        };
        let mut s = Scheduler::new(recipe.set, ctx, ErrorPolicy::Continue);
        assert!(matches!(s.run_item("nope"), Err(Error::UnknownResource(_))));
    }

    #[test]
    fn test_kn012_run_item_bakes_only_its_subtree() {
        let recipe = Recipe::new().add("a", &[]).add("b", &["a"]).add("c", &[]);
        let journal = Rc::clone(&recipe.journal);
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = direct_fetcher();
        let ctx = BakeContext {
            tmp_dir: tmp.path(),
            fetcher: &fetcher,
            command_timeout: None,
        };
        let mut s = Scheduler::new(recipe.set, ctx, ErrorPolicy::Continue);
        s.run_item("b").unwrap();
        assert_eq!(*journal.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn test_kn012_plan_matches_bake_order() {
        let recipe = Recipe::new()
            .add("b", &["a"])
            .add("c", &["b"])
            .add("a", &[]);
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = direct_fetcher();
        let ctx = BakeContext {
            tmp_dir: tmp.path(),
            fetcher: &fetcher,
            command_timeout: None,
        };
        let s = Scheduler::new(recipe.set, ctx, ErrorPolicy::Continue);
        assert_eq!(s.plan().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_kn012_plan_detects_cycle() {
        let recipe = Recipe::new().add("x", &["y"]).add("y", &["z"]).add("z", &["y"]);
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = direct_fetcher();
        let ctx = BakeContext {
            tmp_dir: tmp.path(),
            fetcher: &fetcher,
            command_timeout: None,
        };
        let s = Scheduler::new(recipe.set, ctx, ErrorPolicy::Continue);
        match s.plan().unwrap_err() {
            Error::DependencyCycle { path } => assert_eq!(path, vec!["y", "z", "y"]),
            other => panic!("unexpected {other}"),
        }
    }
}
