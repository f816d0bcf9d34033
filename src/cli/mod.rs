//! CLI subcommands: init, validate, run, revert, log.

use crate::core::executor::{self, RunConfig, RunReport};
use crate::core::history::{FileHistory, HistoryStore};
use crate::core::resolver::{AliasChain, Environment, FillChain, FillMap, PromptFiller};
use crate::core::settings::{self, Settings};
use crate::core::{parser, revert, types};
use crate::drivers::{self, sandbox::Sandbox, SandboxAliases};
use crate::journal::eventlog::{self, RunLog};
use clap::Subcommand;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new kumo project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Parse and lint a template without running it
    Validate {
        /// Path to the template
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Execute a template
    Run {
        /// Path to the template
        #[arg(short, long, required_unless_present = "expr", conflicts_with = "expr")]
        file: Option<PathBuf>,

        /// Template text given inline
        #[arg(short, long)]
        expr: Option<String>,

        /// Validate every statement against the platform without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Pre-supply a hole value (KEY=VALUE, repeatable)
        #[arg(long = "fill", value_name = "KEY=VALUE")]
        fills: Vec<String>,

        /// Fail on unfilled holes instead of prompting
        #[arg(long)]
        no_prompt: bool,

        /// Path to kumo.yaml
        #[arg(short, long, default_value = settings::DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Undo a previous run
    Revert {
        /// Revert ID printed by `kumo run`
        revert_id: String,

        /// Validate the reverted template without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Path to kumo.yaml
        #[arg(short, long, default_value = settings::DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// List recorded runs, or show one
    Log {
        /// Show this record in full
        revert_id: Option<String>,

        /// Print the run-event log instead
        #[arg(long)]
        events: bool,

        /// Path to kumo.yaml
        #[arg(short, long, default_value = settings::DEFAULT_CONFIG)]
        config: PathBuf,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Run {
            file,
            expr,
            dry_run,
            fills,
            no_prompt,
            config,
        } => {
            let source = match (file, expr) {
                (Some(file), _) => Source::File(file),
                (None, Some(text)) => Source::Text(text),
                (None, None) => return Err("either --file or --expr is required".to_string()),
            };
            cmd_run(&source, &config, dry_run, &fills, no_prompt)
        }
        Commands::Revert {
            revert_id,
            dry_run,
            config,
        } => cmd_revert(&revert_id, &config, dry_run),
        Commands::Log {
            revert_id,
            events,
            config,
        } => cmd_log(revert_id.as_deref(), &config, events),
    }
}

/// Where the template text comes from.
enum Source {
    File(PathBuf),
    Text(String),
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join(settings::DEFAULT_CONFIG);
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;
    std::fs::write(&config_path, settings::starter_settings())
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized kumo project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let template = parser::parse_template_file(file).map_err(|e| e.to_string())?;
    let errors = parser::validate_template(&template);

    if errors.is_empty() {
        println!(
            "OK: {} ({} statements, {} expressions)",
            file.display(),
            template.len(),
            template.expressions().count()
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

// ============================================================================
// Workspace
// ============================================================================

/// Settings, sandbox-backed registry, history and event log for one invocation.
struct Workspace {
    settings: Settings,
    registry: crate::core::registry::Registry,
    sandbox: Rc<RefCell<Sandbox>>,
    history: FileHistory,
    log: RunLog,
}

impl Workspace {
    fn open(config: &Path) -> Result<Self, String> {
        let settings = settings::load_settings(config).map_err(|e| e.to_string())?;
        let errors = settings::validate_settings(&settings);
        if !errors.is_empty() {
            for e in &errors {
                eprintln!("  ERROR: {}", e);
            }
            return Err(format!("{}: {} config error(s)", config.display(), errors.len()));
        }

        let state_dir = state_dir_for(config, &settings);
        let (registry, sandbox) = drivers::sandbox_registry(&state_dir).map_err(|e| e.to_string())?;
        let log = if settings.policy.event_log {
            RunLog::to_file(eventlog::event_log_path(&state_dir))
        } else {
            RunLog::disabled()
        };
        Ok(Self {
            settings,
            registry,
            sandbox,
            history: FileHistory::new(state_dir),
            log,
        })
    }

    fn state_dir(&self) -> &Path {
        self.history.state_dir()
    }

    /// Configured aliases first, then sandbox resources by name.
    fn aliases(&self) -> AliasChain {
        AliasChain::new()
            .then(self.settings.aliases.clone())
            .then(SandboxAliases(Rc::clone(&self.sandbox)))
    }

    fn run_config(&self, dry_run: bool) -> RunConfig<'_> {
        RunConfig {
            registry: &self.registry,
            store: Some(&self.history),
            dry_run,
        }
    }
}

/// A relative `state_dir` is taken relative to the config file.
fn state_dir_for(config: &Path, settings: &Settings) -> PathBuf {
    if settings.state_dir.is_absolute() {
        return settings.state_dir.clone();
    }
    match config.parent() {
        Some(parent) => parent.join(&settings.state_dir),
        None => settings.state_dir.clone(),
    }
}

/// Parse `KEY=VALUE` hole fills.
fn parse_fills(fills: &[String]) -> Result<HashMap<String, String>, String> {
    fills
        .iter()
        .map(|fill| match fill.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(format!("invalid --fill '{}': expected KEY=VALUE", fill)),
        })
        .collect()
}

// ============================================================================
// run / revert
// ============================================================================

fn cmd_run(
    source: &Source,
    config: &Path,
    dry_run: bool,
    fills: &[String],
    no_prompt: bool,
) -> Result<(), String> {
    let template = match source {
        Source::File(path) => parser::parse_template_file(path),
        Source::Text(text) => parser::parse_template(text),
    }
    .map_err(|e| e.to_string())?;
    for warning in parser::validate_template(&template) {
        eprintln!("  WARNING: {}", warning);
    }

    let ws = Workspace::open(config)?;

    let mut presupplied: HashMap<String, String> = ws
        .settings
        .holes
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    presupplied.extend(parse_fills(fills)?);
    let mut holes = FillChain::new().then(FillMap(presupplied));
    if !no_prompt {
        holes = holes.then(PromptFiller::stdio());
    }

    let mut env = Environment::new()
        .with_holes(holes)
        .with_aliases(ws.aliases())
        .with_policy(ws.settings.policy.redeclaration)
        .with_log(ws.log.clone());

    let report = executor::run(&template, &mut env, &ws.run_config(dry_run))
        .map_err(|e| e.to_string())?;
    print_report(&report, dry_run);
    finish(report)
}

fn cmd_revert(revert_id: &str, config: &Path, dry_run: bool) -> Result<(), String> {
    let ws = Workspace::open(config)?;
    let record = ws
        .history
        .get_template_execution(revert_id)
        .map_err(|e| e.to_string())?;
    let reverted = revert::revert(&record, &ws.log).map_err(|e| e.to_string())?;

    for d in &reverted.diagnostics {
        eprintln!("  WARNING: {}", d);
    }
    if reverted.template.is_empty() {
        println!("Nothing to revert for {}.", revert_id);
        return Ok(());
    }

    println!("Reverting {}:", revert_id);
    println!("{}", reverted.render());
    println!();

    let report = executor::run_reverted(&reverted, ws.log.clone(), &ws.run_config(dry_run))
        .map_err(|e| e.to_string())?;
    print_report(&report, dry_run);
    finish(report)
}

fn print_report(report: &RunReport, dry_run: bool) {
    for entry in &report.record.entries {
        let result = entry
            .result
            .as_deref()
            .map(|r| format!(" → {}", r))
            .unwrap_or_default();
        println!("  [{}] {}{}: {}", entry.index, entry.statement, result, entry.outcome);
    }

    let succeeded = report.record.succeeded().count();
    let failed = report.record.failed_count();
    println!();
    if dry_run {
        println!("Dry run: {} would succeed, {} would fail. No changes applied.", succeeded, failed);
        return;
    }
    println!("Run {}: {} succeeded, {} failed.", report.record.revert_id, succeeded, failed);
    if report.persisted {
        println!("Revert with: kumo revert {}", report.record.revert_id);
    }
}

fn finish(report: RunReport) -> Result<(), String> {
    report.into_result().map(|_| ()).map_err(|e| e.to_string())
}

// ============================================================================
// log
// ============================================================================

fn cmd_log(revert_id: Option<&str>, config: &Path, events: bool) -> Result<(), String> {
    let ws = Workspace::open(config)?;

    if events {
        let path = eventlog::event_log_path(ws.state_dir());
        for event in eventlog::read_events(&path).map_err(|e| e.to_string())? {
            let line = serde_json::to_string(&event).map_err(|e| format!("JSON error: {}", e))?;
            println!("{}", line);
        }
        return Ok(());
    }

    match revert_id {
        Some(id) => {
            let record = ws
                .history
                .get_template_execution(id)
                .map_err(|e| e.to_string())?;
            print_record(&record);
        }
        None => {
            let ids = ws.history.list().map_err(|e| e.to_string())?;
            if ids.is_empty() {
                println!("No runs recorded in {}.", ws.state_dir().display());
            }
            for id in ids {
                let record = ws
                    .history
                    .get_template_execution(&id)
                    .map_err(|e| e.to_string())?;
                println!(
                    "{}  {}  {} statement(s), {} failed",
                    record.revert_id,
                    record.started_at,
                    record.entries.len(),
                    record.failed_count()
                );
            }
        }
    }
    Ok(())
}

fn print_record(record: &types::ExecutionRecord) {
    println!("Revert ID: {}", record.revert_id);
    println!("  Started:   {}", record.started_at);
    if let Some(done) = &record.completed_at {
        println!("  Completed: {}", done);
    }
    println!("  Digest:    {}", record.digest);
    println!();
    for line in record.template.lines() {
        println!("  | {}", line);
    }
    println!();
    for entry in &record.entries {
        let result = entry.result.as_deref().unwrap_or("-");
        println!("  [{}] {} [{}] {}", entry.index, entry.outcome, result, entry.statement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Project dir with a starter config; returns (dir, config path).
    fn project() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        let config = dir.path().join(settings::DEFAULT_CONFIG);
        (dir, config)
    }

    fn text(s: &str) -> Source {
        Source::Text(s.to_string())
    }

    fn only_record(config: &Path) -> types::ExecutionRecord {
        let ws = Workspace::open(config).unwrap();
        let ids = ws.history.list().unwrap();
        assert_eq!(ids.len(), 1, "{:?}", ids);
        ws.history.get_template_execution(&ids[0]).unwrap()
    }

    #[test]
    fn test_cli_init() {
        let (dir, config) = project();
        assert!(config.exists());
        assert!(dir.path().join("state").is_dir());
    }

    #[test]
    fn test_cli_init_already_exists() {
        let (dir, _) = project();
        let err = cmd_init(dir.path()).unwrap_err();
        assert!(err.contains("already exists"));
    }

    #[test]
    fn test_cli_validate_valid() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("net.kumo");
        std::fs::write(&file, "vpc = create vpc cidr=10.0.0.0/16\ncreate subnet cidr=10.0.1.0/24 vpc=$vpc\n")
            .unwrap();
        cmd_validate(&file).unwrap();
    }

    #[test]
    fn test_cli_validate_undeclared_reference() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("net.kumo");
        std::fs::write(&file, "create subnet cidr=10.0.1.0/24 vpc=$vpc\n").unwrap();
        let err = cmd_validate(&file).unwrap_err();
        assert!(err.contains("1 validation error"));
    }

    #[test]
    fn test_cli_validate_syntax_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("net.kumo");
        std::fs::write(&file, "create vpc cidr=\n").unwrap();
        assert!(cmd_validate(&file).is_err());
    }

    #[test]
    fn test_cli_run_persists_and_reverts() {
        let (dir, config) = project();
        let source = text("vpc = create vpc cidr=10.0.0.0/16\ncreate subnet cidr=10.0.1.0/24 vpc=$vpc\n");
        cmd_run(&source, &config, false, &[], true).unwrap();

        let record = only_record(&config);
        assert_eq!(record.entries.len(), 2);
        assert_eq!(record.entries[0].result.as_deref(), Some("vpc-00000001"));
        assert!(dir.path().join("state/sandbox.yaml").exists());
        assert!(dir.path().join("state/events.jsonl").exists());

        cmd_revert(&record.revert_id, &config, false).unwrap();
        let sandbox = Sandbox::open(&dir.path().join("state")).unwrap();
        assert!(sandbox.state().resources.is_empty());

        // The revert run is recorded too
        let ws = Workspace::open(&config).unwrap();
        assert_eq!(ws.history.list().unwrap().len(), 2);
    }

    #[test]
    fn test_cli_run_dry_run_persists_nothing() {
        let (dir, config) = project();
        cmd_run(&text("create vpc cidr=10.0.0.0/16\n"), &config, true, &[], true).unwrap();
        let ws = Workspace::open(&config).unwrap();
        assert!(ws.history.list().unwrap().is_empty());
        assert!(!dir.path().join("state/sandbox.yaml").exists());
    }

    #[test]
    fn test_cli_run_failure_is_error_but_recorded() {
        let (_dir, config) = project();
        let err = cmd_run(
            &text("create subnet cidr=10.0.1.0/24 vpc=vpc-ffffffff\n"),
            &config,
            false,
            &[],
            true,
        )
        .unwrap_err();
        assert!(err.contains("InvalidVpcID.NotFound"), "{}", err);
        let record = only_record(&config);
        assert_eq!(record.failed_count(), 1);
    }

    #[test]
    fn test_cli_run_with_fill() {
        let (_dir, config) = project();
        let fills = vec!["block=10.9.0.0/16".to_string()];
        cmd_run(&text("create vpc cidr={block}\n"), &config, false, &fills, true).unwrap();
        let record = only_record(&config);
        assert_eq!(
            record.entries[0].resolved["cidr"],
            types::Value::Cidr("10.9.0.0/16".to_string())
        );
    }

    #[test]
    fn test_cli_run_unfilled_hole_without_prompt() {
        let (_dir, config) = project();
        let err = cmd_run(&text("create vpc cidr={block}\n"), &config, false, &[], true).unwrap_err();
        assert!(err.contains("block"), "{}", err);
    }

    #[test]
    fn test_cli_run_config_alias() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join(settings::DEFAULT_CONFIG);
        std::fs::write(&config, "version: \"1.0\"\naliases:\n  office: 10.1.0.0/16\n").unwrap();
        cmd_run(&text("create vpc cidr=@office\n"), &config, false, &[], true).unwrap();
        let record = only_record(&config);
        assert_eq!(
            record.entries[0].resolved["cidr"],
            types::Value::Cidr("10.1.0.0/16".to_string())
        );
    }

    #[test]
    fn test_cli_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join(settings::DEFAULT_CONFIG);
        std::fs::write(&config, "version: \"9.9\"\n").unwrap();
        let err = cmd_run(&text("create vpc cidr=10.0.0.0/16\n"), &config, false, &[], true).unwrap_err();
        assert!(err.contains("config error"));
    }

    #[test]
    fn test_cli_revert_unknown_id() {
        let (_dir, config) = project();
        let err = cmd_revert("01BA7RV6ES86PZYCM3H28WM6KZ", &config, false).unwrap_err();
        assert!(err.contains("01BA7RV6ES86PZYCM3H28WM6KZ"));
    }

    #[test]
    fn test_cli_revert_nothing_to_revert() {
        let (_dir, config) = project();
        cmd_run(&text("# only a comment\n"), &config, false, &[], true).unwrap();
        let record = only_record(&config);
        cmd_revert(&record.revert_id, &config, false).unwrap();
    }

    #[test]
    fn test_cli_log_list_and_show() {
        let (_dir, config) = project();
        cmd_log(None, &config, false).unwrap();
        cmd_run(&text("create bucket name=logs\n"), &config, false, &[], true).unwrap();
        let record = only_record(&config);
        cmd_log(None, &config, false).unwrap();
        cmd_log(Some(&record.revert_id), &config, false).unwrap();
        cmd_log(None, &config, true).unwrap();
    }

    #[test]
    fn test_cli_parse_fills() {
        let fills = parse_fills(&["a=1".to_string(), "b=x=y".to_string()]).unwrap();
        assert_eq!(fills["a"], "1");
        assert_eq!(fills["b"], "x=y");
        assert!(parse_fills(&["novalue".to_string()]).is_err());
        assert!(parse_fills(&["=v".to_string()]).is_err());
    }

    #[test]
    fn test_cli_state_dir_relative_to_config() {
        let settings = Settings::default();
        assert_eq!(
            state_dir_for(Path::new("/srv/proj/kumo.yaml"), &settings),
            PathBuf::from("/srv/proj/state")
        );
        assert_eq!(
            state_dir_for(Path::new("kumo.yaml"), &settings),
            PathBuf::from("state")
        );
    }

    #[test]
    fn test_cli_dispatch_init_and_validate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proj");
        dispatch(Commands::Init { path: path.clone() }).unwrap();
        let file = path.join("t.kumo");
        std::fs::write(&file, "create vpc cidr=10.0.0.0/16\n").unwrap();
        dispatch(Commands::Validate { file }).unwrap();
    }
}
