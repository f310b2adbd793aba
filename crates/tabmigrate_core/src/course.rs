use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::{CanvasApi, DEFAULT_PAGE_SIZE, QueryParams};
use crate::models::{Course, ExternalToolTab, is_external_tab};

/// What `replace_tool_tab` does for one (source, target) tab pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReplacementPlan {
    /// The source tool is already hidden; nothing to migrate away from.
    Skip,
    /// Both tools are visible; only the source gets hidden.
    HideSourceOnly,
    /// Reveal the target at `position`, then hide the source.
    RevealTargetThenHideSource { position: i64 },
}

impl ReplacementPlan {
    pub fn put_count(self) -> usize {
        match self {
            Self::Skip => 0,
            Self::HideSourceOnly => 1,
            Self::RevealTargetThenHideSource { .. } => 2,
        }
    }
}

pub fn plan_replacement(source: &ExternalToolTab, target: &ExternalToolTab) -> ReplacementPlan {
    if source.is_hidden {
        ReplacementPlan::Skip
    } else if !target.is_hidden {
        ReplacementPlan::HideSourceOnly
    } else {
        ReplacementPlan::RevealTargetThenHideSource {
            position: source.position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabReplacement {
    pub source: ExternalToolTab,
    pub target: ExternalToolTab,
    pub plan: ReplacementPlan,
}

/// Navigation tab operations for one course.
pub struct CourseManager<'a> {
    course: &'a Course,
    api: &'a mut dyn CanvasApi,
}

impl<'a> CourseManager<'a> {
    pub fn new(course: &'a Course, api: &'a mut dyn CanvasApi) -> Self {
        Self { course, api }
    }

    pub fn course(&self) -> &Course {
        self.course
    }

    pub fn find_tab_by_tool_id(tool_id: i64, tabs: &[ExternalToolTab]) -> Option<&ExternalToolTab> {
        tabs.iter().find(|tab| tab.tool_id == tool_id)
    }

    pub fn get_tool_tabs(&mut self) -> Result<Vec<ExternalToolTab>> {
        let course_id = self.course.id;
        let results = self
            .api
            .get_all_pages(
                &format!("/courses/{course_id}/tabs"),
                &QueryParams::new(),
                DEFAULT_PAGE_SIZE,
                None,
            )
            .with_context(|| format!("failed to list tabs for course {course_id}"))?;

        let mut tabs = Vec::new();
        for value in results.iter().filter(|value| is_external_tab(value)) {
            debug!(course_id, tab = %value, "external tool tab");
            tabs.push(
                ExternalToolTab::from_value(value)
                    .with_context(|| format!("invalid tool tab in course {course_id}"))?,
            );
        }
        Ok(tabs)
    }

    pub fn update_tab(
        &mut self,
        tab: &ExternalToolTab,
        is_hidden: bool,
        position: Option<i64>,
    ) -> Result<ExternalToolTab> {
        let course_id = self.course.id;
        let mut params = QueryParams::new().with("hidden", is_hidden);
        if let Some(position) = position {
            params.set("position", position);
        }

        let result = self
            .api
            .put(&format!("/courses/{course_id}/tabs/{}", tab.id), &params)
            .with_context(|| {
                format!(
                    "failed to update tab {} (tool {}) in course {course_id}",
                    tab.id, tab.tool_id
                )
            })?;
        debug!(course_id, result = %result, "tab updated");
        ExternalToolTab::from_value(&result)
            .with_context(|| format!("invalid tab returned for course {course_id}"))
    }

    /// Moves the source tool's navigation slot over to the target tool.
    ///
    /// The target is always revealed before the source is hidden, so at
    /// least one of the two stays reachable if the second call fails.
    pub fn replace_tool_tab(
        &mut self,
        source_tab: &ExternalToolTab,
        target_tab: &ExternalToolTab,
    ) -> Result<TabReplacement> {
        let course_id = self.course.id;
        let plan = plan_replacement(source_tab, target_tab);
        debug!(course_id, source = %source_tab, target = %target_tab, ?plan, "replacing tool tab");

        let new_target = match plan {
            ReplacementPlan::Skip => {
                debug!(course_id, "source tool is hidden; skipping replacement");
                return Ok(TabReplacement {
                    source: source_tab.clone(),
                    target: target_tab.clone(),
                    plan,
                });
            }
            ReplacementPlan::HideSourceOnly => {
                warn!(
                    course_id,
                    source = %source_tab,
                    target = %target_tab,
                    "both tools are currently available; rolling back will hide the target tool"
                );
                target_tab.clone()
            }
            ReplacementPlan::RevealTargetThenHideSource { position } => {
                let revealed = self.update_tab(target_tab, false, Some(position))?;
                info!(course_id, tab = %revealed, "made target tool available in course navigation");
                revealed
            }
        };

        let new_source = self.update_tab(source_tab, true, None)?;
        info!(course_id, tab = %new_source, "hid source tool in course navigation");
        Ok(TabReplacement {
            source: new_source,
            target: new_target,
            plan,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockApi, external_tab, internal_tab};

    fn course() -> Course {
        Course {
            id: 1,
            name: "Test Course".to_string(),
            term_id: Some(7),
        }
    }

    fn tab(tool_id: i64, is_hidden: bool, position: i64) -> ExternalToolTab {
        ExternalToolTab::from_value(&external_tab(tool_id, is_hidden, position)).expect("tab")
    }

    fn tabs_for(api: &mut MockApi, course: &Course) -> (ExternalToolTab, ExternalToolTab) {
        let tabs = CourseManager::new(course, api).get_tool_tabs().expect("tabs");
        let source = CourseManager::find_tab_by_tool_id(1, &tabs).cloned().expect("source");
        let target = CourseManager::find_tab_by_tool_id(2, &tabs).cloned().expect("target");
        (source, target)
    }

    #[test]
    fn find_tab_by_tool_id_returns_tab_or_none() {
        let tabs = vec![tab(99999, true, 30)];
        assert!(CourseManager::find_tab_by_tool_id(99999, &tabs).is_some());
        assert!(CourseManager::find_tab_by_tool_id(100000, &tabs).is_none());
    }

    #[test]
    fn tool_tabs_keep_external_entries_only() {
        let course = course();
        let mut api = MockApi::default().with_course_tabs(
            1,
            vec![
                internal_tab("home", 1),
                external_tab(1, false, 2),
                internal_tab("syllabus", 3),
                external_tab(2, true, 5),
            ],
        );
        let tabs = CourseManager::new(&course, &mut api).get_tool_tabs().expect("tabs");
        assert_eq!(tabs.iter().map(|t| t.tool_id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(api.gets[0].0, "/courses/1/tabs");
    }

    #[test]
    fn update_tab_sends_hidden_and_position() {
        let course = course();
        let mut api = MockApi::default().with_course_tabs(1, vec![external_tab(1, true, 9)]);
        let updated = CourseManager::new(&course, &mut api)
            .update_tab(&tab(1, true, 9), false, Some(5))
            .expect("update");
        assert!(!updated.is_hidden);
        assert_eq!(updated.position, 5);

        let (path, params) = &api.puts[0];
        assert_eq!(path, "/courses/1/tabs/context_external_tool_1");
        assert_eq!(params.get("hidden"), Some("false"));
        assert_eq!(params.get("position"), Some("5"));
    }

    #[test]
    fn update_tab_without_position_omits_it() {
        let course = course();
        let mut api = MockApi::default().with_course_tabs(1, vec![external_tab(1, false, 2)]);
        CourseManager::new(&course, &mut api)
            .update_tab(&tab(1, false, 2), true, None)
            .expect("update");
        assert_eq!(api.puts[0].1.get("position"), None);
    }

    #[test]
    fn hidden_source_issues_no_puts() {
        let course = course();
        let mut api = MockApi::default();
        let source = tab(1, true, 2);
        let target = tab(2, true, 5);
        let result = CourseManager::new(&course, &mut api)
            .replace_tool_tab(&source, &target)
            .expect("replace");
        assert_eq!(result.plan, ReplacementPlan::Skip);
        assert_eq!(result.source, source);
        assert_eq!(result.target, target);
        assert!(api.puts.is_empty());
    }

    #[test]
    fn hidden_target_is_revealed_at_source_position_before_source_is_hidden() {
        let course = course();
        let mut api = MockApi::default()
            .with_course_tabs(1, vec![external_tab(1, false, 2), external_tab(2, true, 5)]);
        let (source, target) = tabs_for(&mut api, &course);

        let result = CourseManager::new(&course, &mut api)
            .replace_tool_tab(&source, &target)
            .expect("replace");

        assert_eq!(result.plan, ReplacementPlan::RevealTargetThenHideSource { position: 2 });
        let paths = api.puts.iter().map(|(path, _)| path.as_str()).collect::<Vec<_>>();
        assert_eq!(
            paths,
            vec![
                "/courses/1/tabs/context_external_tool_2",
                "/courses/1/tabs/context_external_tool_1",
            ]
        );
        assert_eq!(api.puts[0].1.get("position"), Some("2"));
        assert!(result.source.is_hidden);
        assert!(!result.target.is_hidden);
        assert_eq!(result.target.position, 2);
    }

    #[test]
    fn visible_target_is_left_alone() {
        let course = course();
        let mut api = MockApi::default()
            .with_course_tabs(1, vec![external_tab(1, false, 2), external_tab(2, false, 6)]);
        let (source, target) = tabs_for(&mut api, &course);

        let result = CourseManager::new(&course, &mut api)
            .replace_tool_tab(&source, &target)
            .expect("replace");

        assert_eq!(result.plan, ReplacementPlan::HideSourceOnly);
        assert_eq!(api.puts.len(), 1);
        assert_eq!(api.puts[0].0, "/courses/1/tabs/context_external_tool_1");
        assert_eq!(result.target, target);
        assert!(result.source.is_hidden);
    }

    #[test]
    fn replacement_is_idempotent() {
        let course = course();
        let mut api = MockApi::default()
            .with_course_tabs(1, vec![external_tab(1, false, 2), external_tab(2, true, 5)]);

        let (source, target) = tabs_for(&mut api, &course);
        CourseManager::new(&course, &mut api)
            .replace_tool_tab(&source, &target)
            .expect("first");
        let after_first = api.course_tabs.clone();
        let puts_after_first = api.puts.len();

        let (source, target) = tabs_for(&mut api, &course);
        let second = CourseManager::new(&course, &mut api)
            .replace_tool_tab(&source, &target)
            .expect("second");

        assert_eq!(second.plan, ReplacementPlan::Skip);
        assert_eq!(api.puts.len(), puts_after_first);
        assert_eq!(api.course_tabs, after_first);
    }

    #[test]
    fn failed_hide_leaves_both_tools_visible_and_rerun_recovers() {
        let course = course();
        let mut api = MockApi::default()
            .with_course_tabs(1, vec![external_tab(1, false, 2), external_tab(2, true, 5)]);
        api.failing_put_paths
            .push("/courses/1/tabs/context_external_tool_1".to_string());

        let (source, target) = tabs_for(&mut api, &course);
        let error = CourseManager::new(&course, &mut api)
            .replace_tool_tab(&source, &target)
            .expect_err("hide fails");
        assert!(format!("{error:#}").contains("course 1"));
        assert_eq!(api.tab(1, 2).expect("target")["hidden"], serde_json::json!(false));
        assert_eq!(api.tab(1, 1).expect("source")["hidden"], serde_json::json!(false));

        api.failing_put_paths.clear();
        let (source, target) = tabs_for(&mut api, &course);
        let rerun = CourseManager::new(&course, &mut api)
            .replace_tool_tab(&source, &target)
            .expect("rerun");
        assert_eq!(rerun.plan, ReplacementPlan::HideSourceOnly);
        assert!(rerun.source.is_hidden);
    }

    #[test]
    fn plan_put_counts() {
        assert_eq!(ReplacementPlan::Skip.put_count(), 0);
        assert_eq!(ReplacementPlan::HideSourceOnly.put_count(), 1);
        assert_eq!(
            ReplacementPlan::RevealTargetThenHideSource { position: 3 }.put_count(),
            2
        );
    }
}
