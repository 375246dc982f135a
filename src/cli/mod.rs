//! KN-017: CLI subcommands — init, validate, plan, bake.

use crate::core::config::{self, Settings};
use crate::core::parser;
use crate::core::scheduler::{ResourceSet, Scheduler};
use crate::core::types::{ErrorPolicy, RunReport};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::resources::BakeContext;
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

/// Recipe read when `--recipe` is not given.
pub const DEFAULT_RECIPE_FILE: &str = "recipe.yaml";

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter settings file and recipe
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Decode a recipe and check its dependency graph without baking
    Validate {
        /// Path to the recipe
        #[arg(short, long, default_value = DEFAULT_RECIPE_FILE)]
        recipe: PathBuf,
    },

    /// Show the order resources would be visited in
    Plan {
        /// Path to the recipe
        #[arg(short, long, default_value = DEFAULT_RECIPE_FILE)]
        recipe: PathBuf,
    },

    /// Converge this host to the recipe
    Bake {
        /// Settings file (YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Path to the recipe
        #[arg(short, long, default_value = DEFAULT_RECIPE_FILE)]
        recipe: PathBuf,

        /// Scratch directory for downloads and scripts
        #[arg(short, long)]
        tmp_dir: Option<PathBuf>,

        /// What to do when a resource fails
        #[arg(long, value_enum)]
        on_error: Option<ErrorPolicy>,

        /// Bake only this resource and its dependencies
        #[arg(long)]
        resource: Option<String>,

        /// Do not draw download progress bars
        #[arg(long)]
        no_progress: bool,
    },
}

/// How a successful dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The run finished but some resources failed to bake.
    ResourcesFailed,
}

impl Outcome {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::ResourcesFailed => 2,
        }
    }
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<Outcome> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { recipe } => cmd_validate(&recipe),
        Commands::Plan { recipe } => cmd_plan(&recipe),
        Commands::Bake {
            config,
            recipe,
            tmp_dir,
            on_error,
            resource,
            no_progress,
        } => {
            let mut settings = config::load_settings(config.as_deref())?;
            apply_overrides(&mut settings, tmp_dir, on_error, no_progress);
            cmd_bake(&recipe, &settings, resource.as_deref())
        }
    }
}

/// CLI flags win over the settings file.
fn apply_overrides(
    settings: &mut Settings,
    tmp_dir: Option<PathBuf>,
    on_error: Option<ErrorPolicy>,
    no_progress: bool,
) {
    if let Some(dir) = tmp_dir {
        settings.tmp_dir = dir;
    }
    if let Some(policy) = on_error {
        settings.on_error = policy;
    }
    if no_progress {
        settings.progress = false;
    }
}

const SETTINGS_TEMPLATE: &str = r#"# kiln settings
tmp_dir: /tmp/kiln
on_error: continue
progress: true
"#;

const RECIPE_TEMPLATE: &str = r#"variables: {}

resources:
  hello:
    type: shell
    script: echo "hello from kiln"
    not_if: "false"
"#;

fn cmd_init(path: &Path) -> Result<Outcome> {
    let settings_path = path.join(config::DEFAULT_SETTINGS_FILE);
    let recipe_path = path.join(DEFAULT_RECIPE_FILE);
    for existing in [&settings_path, &recipe_path] {
        if existing.exists() {
            return Err(Error::io(
                existing,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "already exists"),
            ));
        }
    }

    std::fs::create_dir_all(path).map_err(|e| Error::io(path, e))?;
    std::fs::write(&settings_path, SETTINGS_TEMPLATE).map_err(|e| Error::io(&settings_path, e))?;
    std::fs::write(&recipe_path, RECIPE_TEMPLATE).map_err(|e| Error::io(&recipe_path, e))?;

    println!("Initialized kiln project at {}", path.display());
    println!("  Created: {}", settings_path.display());
    println!("  Created: {}", recipe_path.display());
    Ok(Outcome::Success)
}

/// Load and statically check a recipe, printing every problem found.
fn load_checked(recipe: &Path) -> Result<ResourceSet> {
    match parser::load_recipe(recipe) {
        Ok(set) => Ok(set),
        Err(mut errors) => {
            if errors.len() == 1 && !errors[0].is_structural() {
                return Err(errors.remove(0));
            }
            for e in &errors {
                eprintln!("  ERROR: {}", e);
            }
            Err(Error::InvalidRecipe {
                count: errors.len(),
            })
        }
    }
}

fn cmd_validate(recipe: &Path) -> Result<Outcome> {
    let set = load_checked(recipe)?;
    println!("{} {} ({} resources)", "OK:".green(), recipe.display(), set.len());
    Ok(Outcome::Success)
}

fn cmd_plan(recipe: &Path) -> Result<Outcome> {
    let set = load_checked(recipe)?;
    let order = set.plan()?;

    println!("Plan for {}:", recipe.display());
    for (i, name) in order.iter().enumerate() {
        let Some(item) = set.get(name) else { continue };
        let deps = item.dependencies();
        if deps.is_empty() {
            println!("  {:>3}. {} ({})", i + 1, name, item.kind());
        } else {
            println!(
                "  {:>3}. {} ({}) after {}",
                i + 1,
                name,
                item.kind(),
                deps.join(", ")
            );
        }
    }
    println!("{} resource(s)", order.len());
    Ok(Outcome::Success)
}

fn cmd_bake(recipe: &Path, settings: &Settings, resource: Option<&str>) -> Result<Outcome> {
    let set = load_checked(recipe)?;
    log::debug!(
        "baking {} resource(s) from {} (tmp_dir {}, on_error {})",
        set.len(),
        recipe.display(),
        settings.tmp_dir.display(),
        settings.on_error
    );

    let fetcher = Fetcher::new(settings.download_timeout(), settings.progress);
    let ctx = BakeContext {
        tmp_dir: &settings.tmp_dir,
        fetcher: &fetcher,
        command_timeout: settings.command_timeout(),
    };
    let mut scheduler = Scheduler::new(set, ctx, settings.on_error);

    let report = match resource {
        Some(name) => {
            scheduler.run_item(name)?;
            scheduler.report().clone()
        }
        None => scheduler.run_all()?,
    };

    print_report(&report);
    if report.has_failures() {
        Ok(Outcome::ResourcesFailed)
    } else {
        Ok(Outcome::Success)
    }
}

fn print_report(report: &RunReport) {
    for name in &report.skipped {
        println!("  {}  {}", "skipped".yellow(), name);
    }
    for (name, error) in &report.failed {
        eprintln!("  {}   {}: {}", "FAILED".red().bold(), name, error);
    }
    println!("{}", report);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_kn017_init_creates_files() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = cmd_init(dir.path()).unwrap();
        assert_eq!(outcome, Outcome::Success);
        assert!(dir.path().join("kiln.yaml").exists());
        assert!(dir.path().join("recipe.yaml").exists());
        // The starter files are valid.
        config::load_settings(Some(&dir.path().join("kiln.yaml"))).unwrap();
        cmd_validate(&dir.path().join("recipe.yaml")).unwrap();
    }

    #[test]
    fn test_kn017_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "recipe.yaml", "resources: {}\n");
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_kn017_validate_counts_errors() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = write(
            dir.path(),
            "recipe.yaml",
            "resources:\n  a:\n    type: shell\n  b:\n    type: nope\n",
        );
        let err = cmd_validate(&recipe).unwrap_err();
        assert!(matches!(err, Error::InvalidRecipe { count: 2 }));
    }

    #[test]
    fn test_kn017_validate_missing_file_is_io() {
        let err = cmd_validate(Path::new("/nonexistent/recipe.yaml")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_kn017_plan_ok() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = write(
            dir.path(),
            "recipe.yaml",
            "resources:\n  b:\n    type: shell\n    script: \"true\"\n    depends_on: a\n  a:\n    type: shell\n    script: \"true\"\n",
        );
        assert_eq!(cmd_plan(&recipe).unwrap(), Outcome::Success);
    }

    #[test]
    fn test_kn017_overrides_win() {
        let mut s = Settings::default();
        apply_overrides(&mut s, Some(PathBuf::from("/x")), Some(ErrorPolicy::Abort), true);
        assert_eq!(s.tmp_dir, PathBuf::from("/x"));
        assert_eq!(s.on_error, ErrorPolicy::Abort);
        assert!(!s.progress);
    }

    #[test]
    fn test_kn017_bake_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let recipe = write(
            dir.path(),
            "recipe.yaml",
            &format!(
                r#"
variables:
  greeting: hello
resources:
  second:
    type: shell
    interpreter: /bin/sh
    script: "echo {{{{var.greeting}}}} again >> '{out}'"
    depends_on: [first]
  first:
    type: shell
    interpreter: /bin/sh
    script: "echo {{{{var.greeting}}}} >> '{out}'"
  never:
    type: shell
    interpreter: /bin/sh
    script: "echo never >> '{out}'"
    only_if: "false"
"#,
                out = out.display()
            ),
        );
        let settings = Settings {
            tmp_dir: dir.path().join("tmp"),
            progress: false,
            ..Settings::default()
        };
        assert_eq!(cmd_bake(&recipe, &settings, None).unwrap(), Outcome::Success);
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "hello\nhello again\n"
        );
    }

    #[test]
    fn test_kn017_bake_failure_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = write(
            dir.path(),
            "recipe.yaml",
            "resources:\n  bad:\n    type: shell\n    interpreter: /bin/sh\n    script: \"exit 1\"\n",
        );
        let settings = Settings {
            tmp_dir: dir.path().join("tmp"),
            progress: false,
            ..Settings::default()
        };
        let outcome = cmd_bake(&recipe, &settings, None).unwrap();
        assert_eq!(outcome, Outcome::ResourcesFailed);
        assert_eq!(outcome.exit_code(), 2);

        let abort = Settings {
            on_error: ErrorPolicy::Abort,
            ..settings
        };
        assert!(matches!(
            cmd_bake(&recipe, &abort, None),
            Err(Error::BakeFailed { .. })
        ));
    }

    #[test]
    fn test_kn017_bake_single_resource() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let recipe = write(
            dir.path(),
            "recipe.yaml",
            &format!(
                "resources:\n  a:\n    type: shell\n    interpreter: /bin/sh\n    script: \"echo a >> '{out}'\"\n  b:\n    type: shell\n    interpreter: /bin/sh\n    script: \"echo b >> '{out}'\"\n",
                out = out.display()
            ),
        );
        let settings = Settings {
            tmp_dir: dir.path().join("tmp"),
            progress: false,
            ..Settings::default()
        };
        cmd_bake(&recipe, &settings, Some("b")).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "b\n");
        assert!(matches!(
            cmd_bake(&recipe, &settings, Some("zzz")),
            Err(Error::UnknownResource(_))
        ));
    }
}
