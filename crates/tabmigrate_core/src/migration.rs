use anyhow::Result;
use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::account::AccountSource;
use crate::api::CanvasApi;
use crate::course::{CourseManager, ReplacementPlan, plan_replacement};
use crate::error::MigrationError;
use crate::models::{ExternalTool, ToolMigration, find_entity_by_id};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub term_ids: Vec<i64>,
    pub limit: Option<usize>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseOutcome {
    pub course_id: i64,
    pub course_name: String,
    pub source_tool_id: i64,
    pub target_tool_id: i64,
    pub plan: ReplacementPlan,
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub account_id: i64,
    pub term_ids: Vec<i64>,
    pub dry_run: bool,
    pub tools_in_account: usize,
    pub courses: usize,
    pub outcomes: Vec<CourseOutcome>,
    pub request_count: usize,
}

impl MigrationReport {
    pub fn count(&self, plan: fn(&ReplacementPlan) -> bool) -> usize {
        self.outcomes.iter().filter(|outcome| plan(&outcome.plan)).count()
    }
}

/// Matches every requested migration against the installed tools.
///
/// Fails before anything is mutated, naming every unknown id across the
/// whole request.
pub fn resolve_tool_pairs(
    installed_tools: &[ExternalTool],
    migrations: &[ToolMigration],
) -> Result<Vec<(ExternalTool, ExternalTool)>, MigrationError> {
    let mut missing = Vec::new();
    let mut pairs = Vec::with_capacity(migrations.len());
    for migration in migrations {
        let source = find_entity_by_id(migration.source_id, installed_tools);
        let target = find_entity_by_id(migration.target_id, installed_tools);
        for (id, tool) in [(migration.source_id, source), (migration.target_id, target)] {
            if tool.is_none() && !missing.contains(&id) {
                missing.push(id);
            }
        }
        if let (Some(source), Some(target)) = (source, target) {
            pairs.push((source.clone(), target.clone()));
        }
    }

    if !missing.is_empty() {
        return Err(MigrationError::InvalidToolIds { ids: missing });
    }
    Ok(pairs)
}

/// Replaces each source tool with its target tool in every course of the
/// requested terms.
pub fn run(
    api: &mut dyn CanvasApi,
    accounts: &dyn AccountSource,
    migrations: &[ToolMigration],
    options: &RunOptions,
) -> Result<MigrationReport> {
    let account_id = accounts.account_id();
    let tools = accounts.get_installed_tools(&mut *api)?;
    info!(account_id, tools = tools.len(), "tools found in account");
    let tool_pairs = resolve_tool_pairs(&tools, migrations)?;

    let courses = accounts.get_courses_in_terms(&mut *api, &options.term_ids, options.limit)?;
    info!(account_id, courses = courses.len(), "courses found for terms");
    if options.dry_run {
        warn!("dry run: no course navigation will be changed");
    }

    let mut outcomes = Vec::with_capacity(tool_pairs.len() * courses.len());
    for (source_tool, target_tool) in &tool_pairs {
        info!(source = %source_tool, target = %target_tool, "migrating tool");

        for course in &courses {
            let _span = info_span!("course", course_id = course.id).entered();
            let mut manager = CourseManager::new(course, &mut *api);
            let tabs = manager.get_tool_tabs()?;
            let source_tab = CourseManager::find_tab_by_tool_id(source_tool.id, &tabs);
            let target_tab = CourseManager::find_tab_by_tool_id(target_tool.id, &tabs);
            let (Some(source_tab), Some(target_tab)) = (source_tab, target_tab) else {
                return Err(MigrationError::ToolsMissingInCourse {
                    course_id: course.id,
                    source_tool_id: source_tool.id,
                    target_tool_id: target_tool.id,
                }
                .into());
            };

            let plan = if options.dry_run {
                let plan = plan_replacement(source_tab, target_tab);
                info!(?plan, "planned replacement");
                plan
            } else {
                manager.replace_tool_tab(source_tab, target_tab)?.plan
            };
            outcomes.push(CourseOutcome {
                course_id: course.id,
                course_name: course.name.clone(),
                source_tool_id: source_tool.id,
                target_tool_id: target_tool.id,
                plan,
                applied: !options.dry_run && plan != ReplacementPlan::Skip,
            });
        }
    }

    let report = MigrationReport {
        account_id,
        term_ids: options.term_ids.clone(),
        dry_run: options.dry_run,
        tools_in_account: tools.len(),
        courses: courses.len(),
        outcomes,
        request_count: api.request_count(),
    };
    info!(
        account_id,
        courses = report.courses,
        replaced = report.count(|plan| *plan != ReplacementPlan::Skip),
        requests = report.request_count,
        "migration finished"
    );
    Ok(report)
}
