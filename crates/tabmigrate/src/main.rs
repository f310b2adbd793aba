use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tabmigrate_core::account::{AccountSource, account_source};
use tabmigrate_core::api::{ApiClient, ReqwestTransport};
use tabmigrate_core::compare::{compare_course_snapshots, load_course_snapshot};
use tabmigrate_core::config::{
    DEFAULT_CONFIG_FILENAME, Settings, SettingsOverrides, convert_csv_to_int_list, load_config,
    resolve_settings,
};
use tabmigrate_core::course::{CourseManager, ReplacementPlan};
use tabmigrate_core::logging::init_tracing;
use tabmigrate_core::migration::{self, RunOptions};
use tabmigrate_core::models::{Course, ToolMigration};
use tracing::debug;

#[derive(Debug, Parser)]
#[command(
    name = "tabmigrate",
    version,
    about = "Swap external tool navigation tabs across the courses of a Canvas account"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,
    #[arg(long, global = true, value_name = "URL")]
    api_url: Option<String>,
    #[arg(long, global = true, help = "Print resolved configuration diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Hide each source tool tab and reveal its target in every course")]
    Run(RunArgs),
    #[command(about = "List external tools installed in the account")]
    Tools(AccountArgs),
    #[command(about = "List courses in the given terms as JSON")]
    Courses(CoursesArgs),
    #[command(about = "List external tool tabs of one course")]
    Tabs(TabsArgs),
    #[command(name = "compare-courses", about = "Diff two course snapshots by id")]
    CompareCourses(CompareArgs),
}

#[derive(Debug, Args)]
struct AccountArgs {
    #[arg(long, value_name = "ID")]
    account_id: Option<i64>,
}

#[derive(Debug, Args)]
struct TermArgs {
    #[arg(long, value_name = "CSV", help = "Comma-separated enrollment term ids")]
    term_ids: Option<String>,
    #[arg(long, help = "Maximum number of courses, split across terms")]
    limit: Option<usize>,
    #[arg(long, value_name = "PATH", help = "Read courses from a warehouse snapshot")]
    warehouse_db: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    account: AccountArgs,
    #[command(flatten)]
    terms: TermArgs,
    #[arg(
        long = "migrate",
        value_name = "SOURCE:TARGET",
        value_parser = parse_migration,
        help = "Tool id pair to migrate; repeatable"
    )]
    migrations: Vec<ToolMigration>,
    #[arg(long, help = "Plan each course without changing any tab")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct CoursesArgs {
    #[command(flatten)]
    account: AccountArgs,
    #[command(flatten)]
    terms: TermArgs,
    #[arg(long, value_name = "PATH", help = "Write JSON here instead of stdout")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct TabsArgs {
    #[arg(long, value_name = "ID")]
    course_id: i64,
}

#[derive(Debug, Args)]
struct CompareArgs {
    left: PathBuf,
    right: PathBuf,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    config: Option<PathBuf>,
    log_level: Option<String>,
    api_url: Option<String>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            log_level: cli.log_level.clone(),
            api_url: cli.api_url.clone(),
            diagnostics: cli.diagnostics,
        }
    }

    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            api_url: self.api_url.clone(),
            log_level: self.log_level.clone(),
            ..SettingsOverrides::default()
        }
    }
}

fn parse_migration(value: &str) -> Result<ToolMigration, String> {
    ToolMigration::parse(value).map_err(|error| error.to_string())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Commands::Run(args) => run_migration(&runtime, args),
        Commands::Tools(args) => run_tools(&runtime, args),
        Commands::Courses(args) => run_courses(&runtime, args),
        Commands::Tabs(args) => run_tabs(&runtime, args),
        Commands::CompareCourses(args) => run_compare(&runtime, args),
    }
}

fn load_settings(runtime: &RuntimeOptions, overrides: SettingsOverrides) -> Result<Settings> {
    let config_path = runtime
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    let file = load_config(&config_path)?;
    let settings = resolve_settings(&file, &overrides)?;
    init_tracing(&settings.log_level, &settings.http_log_level);
    debug!(config = %normalize_path(&config_path), "configuration resolved");
    if runtime.diagnostics {
        eprintln!(
            "[diagnostics]\nconfig: {}\n{}",
            normalize_path(&config_path),
            settings.diagnostics()
        );
    }
    Ok(settings)
}

fn term_overrides(
    runtime: &RuntimeOptions,
    account: &AccountArgs,
    terms: &TermArgs,
) -> Result<SettingsOverrides> {
    let term_ids = terms
        .term_ids
        .as_deref()
        .map(convert_csv_to_int_list)
        .transpose()?;
    Ok(SettingsOverrides {
        account_id: account.account_id,
        term_ids,
        limit: terms.limit,
        warehouse_db: terms.warehouse_db.clone(),
        ..runtime.overrides()
    })
}

fn connect(settings: &Settings) -> Result<ApiClient<ReqwestTransport>> {
    let client_config = settings.client_config()?;
    ApiClient::from_config(&client_config)
}

fn accounts(settings: &Settings) -> Result<Box<dyn AccountSource>> {
    account_source(settings.require_account_id()?, settings.warehouse_db.as_deref())
}

fn run_migration(runtime: &RuntimeOptions, args: RunArgs) -> Result<()> {
    let overrides = SettingsOverrides {
        migrations: args.migrations,
        ..term_overrides(runtime, &args.account, &args.terms)?
    };
    let settings = load_settings(runtime, overrides)?;
    let options = RunOptions {
        term_ids: settings.require_term_ids()?.to_vec(),
        limit: settings.limit,
        dry_run: args.dry_run,
    };
    let migrations = settings.require_migrations()?;
    let accounts = accounts(&settings)?;
    let mut api = connect(&settings)?;

    let report = migration::run(&mut api, accounts.as_ref(), migrations, &options)?;

    println!("tool migration {}", if report.dry_run { "plan" } else { "complete" });
    println!("account_id: {}", report.account_id);
    println!("term_ids: {}", join_ids(&report.term_ids));
    println!(
        "migrations: {}",
        migrations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("dry_run: {}", report.dry_run);
    println!("tools_in_account: {}", report.tools_in_account);
    println!("courses: {}", report.courses);
    println!(
        "revealed_and_hidden: {}",
        report.count(|plan| matches!(plan, ReplacementPlan::RevealTargetThenHideSource { .. }))
    );
    println!(
        "hidden_only: {}",
        report.count(|plan| *plan == ReplacementPlan::HideSourceOnly)
    );
    println!(
        "already_migrated: {}",
        report.count(|plan| *plan == ReplacementPlan::Skip)
    );
    println!("requests: {}", report.request_count);
    Ok(())
}

fn run_tools(runtime: &RuntimeOptions, args: AccountArgs) -> Result<()> {
    let overrides = SettingsOverrides {
        account_id: args.account_id,
        ..runtime.overrides()
    };
    let settings = load_settings(runtime, overrides)?;
    let accounts = account_source(settings.require_account_id()?, None)?;
    let mut api = connect(&settings)?;

    let tools = accounts.get_installed_tools(&mut api)?;
    println!("account_id: {}", accounts.account_id());
    println!("tools: {}", tools.len());
    for tool in &tools {
        println!("  - {tool}");
    }
    Ok(())
}

fn run_courses(runtime: &RuntimeOptions, args: CoursesArgs) -> Result<()> {
    let settings = load_settings(runtime, term_overrides(runtime, &args.account, &args.terms)?)?;
    let term_ids = settings.require_term_ids()?.to_vec();
    let accounts = accounts(&settings)?;
    let mut api = connect(&settings)?;

    let courses = accounts.get_courses_in_terms(&mut api, &term_ids, settings.limit)?;
    let json = serde_json::to_string_pretty(&courses).context("failed to serialize courses")?;
    match args.output {
        Some(path) => {
            fs::write(&path, format!("{json}\n"))
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("account_id: {}", accounts.account_id());
            println!("term_ids: {}", join_ids(&term_ids));
            println!("courses: {}", courses.len());
            println!("output: {}", normalize_path(&path));
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run_tabs(runtime: &RuntimeOptions, args: TabsArgs) -> Result<()> {
    let settings = load_settings(runtime, runtime.overrides())?;
    let mut api = connect(&settings)?;
    let course = Course {
        id: args.course_id,
        name: String::new(),
        term_id: None,
    };

    let tabs = CourseManager::new(&course, &mut api).get_tool_tabs()?;
    println!("course_id: {}", course.id);
    println!("tool_tabs: {}", tabs.len());
    for tab in &tabs {
        println!("  - {tab}");
    }
    Ok(())
}

fn run_compare(runtime: &RuntimeOptions, args: CompareArgs) -> Result<()> {
    load_settings(runtime, runtime.overrides())?;
    let left = load_course_snapshot(&args.left)?;
    let right = load_course_snapshot(&args.right)?;
    let comparison = compare_course_snapshots(&left, &right)?;

    println!("left: {}", normalize_path(&args.left));
    println!("right: {}", normalize_path(&args.right));
    println!("left_count: {}", comparison.left_count);
    println!("right_count: {}", comparison.right_count);
    println!("both_count: {}", comparison.both_count);
    println!("only_left: {}", comparison.only_left.len());
    for record in &comparison.only_left {
        println!("  - {record}");
    }
    println!("only_right: {}", comparison.only_right.len());
    for record in &comparison.only_right {
        println!("  - {record}");
    }
    Ok(())
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_repeated_migrations() {
        let cli = Cli::try_parse_from([
            "tabmigrate",
            "run",
            "--account-id",
            "1",
            "--term-ids",
            "7,8",
            "--migrate",
            "1:2",
            "--migrate",
            "3:4",
            "--dry-run",
        ])
        .expect("parse");
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(
            args.migrations,
            vec![ToolMigration::new(1, 2), ToolMigration::new(3, 4)]
        );
        assert!(args.dry_run);
        assert_eq!(args.terms.term_ids.as_deref(), Some("7,8"));
    }

    #[test]
    fn malformed_migration_is_rejected_by_the_parser() {
        let result = Cli::try_parse_from(["tabmigrate", "run", "--migrate", "1-2"]);
        assert!(result.is_err());
    }

    #[test]
    fn global_flags_flow_into_overrides() {
        let cli = Cli::try_parse_from([
            "tabmigrate",
            "tools",
            "--log-level",
            "debug",
            "--api-url",
            "https://canvas.example.edu",
        ])
        .expect("parse");
        let overrides = RuntimeOptions::from_cli(&cli).overrides();
        assert_eq!(overrides.log_level.as_deref(), Some("debug"));
        assert_eq!(overrides.api_url.as_deref(), Some("https://canvas.example.edu"));
    }

    #[test]
    fn term_overrides_reject_bad_csv() {
        let runtime = RuntimeOptions {
            config: None,
            log_level: None,
            api_url: None,
            diagnostics: false,
        };
        let terms = TermArgs {
            term_ids: Some("7,x".to_string()),
            limit: None,
            warehouse_db: None,
        };
        assert!(term_overrides(&runtime, &AccountArgs { account_id: None }, &terms).is_err());
    }
}
