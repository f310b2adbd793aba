use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{debug, info};

use crate::api::{CanvasApi, DEFAULT_PAGE_SIZE, QueryParams};
use crate::models::{Course, ExternalTool};
use crate::warehouse::WarehouseAccountManager;

/// Where the installed tools and the courses of an account come from.
pub trait AccountSource {
    fn account_id(&self) -> i64;
    fn get_installed_tools(&self, api: &mut dyn CanvasApi) -> Result<Vec<ExternalTool>>;
    fn get_courses_in_terms(
        &self,
        api: &mut dyn CanvasApi,
        term_ids: &[i64],
        limit: Option<usize>,
    ) -> Result<Vec<Course>>;
}

/// Picks the warehouse lookup when a warehouse database is configured.
pub fn account_source(
    account_id: i64,
    warehouse_db: Option<&Path>,
) -> Result<Box<dyn AccountSource>> {
    match warehouse_db {
        Some(path) => Ok(Box::new(WarehouseAccountManager::open(account_id, path)?)),
        None => Ok(Box::new(AccountManager::new(account_id))),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AccountManager {
    account_id: i64,
}

impl AccountManager {
    pub fn new(account_id: i64) -> Self {
        Self { account_id }
    }

    pub fn get_courses_for_term(
        &self,
        api: &mut dyn CanvasApi,
        term_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<Course>> {
        let endpoint = format!("/accounts/{}/courses", self.account_id);
        let params = QueryParams::new().with("enrollment_term_id", term_id);
        let results = api
            .get_all_pages(&endpoint, &params, DEFAULT_PAGE_SIZE, limit)
            .with_context(|| {
                format!(
                    "failed to list courses for term {term_id} in account {}",
                    self.account_id
                )
            })?;
        results
            .iter()
            .map(|value| {
                Course::deserialize(value)
                    .with_context(|| format!("failed to decode course in term {term_id}"))
            })
            .collect()
    }
}

impl AccountSource for AccountManager {
    fn account_id(&self) -> i64 {
        self.account_id
    }

    fn get_installed_tools(&self, api: &mut dyn CanvasApi) -> Result<Vec<ExternalTool>> {
        let endpoint = format!("/accounts/{}/external_tools", self.account_id);
        let params = QueryParams::new().with("include_parents", true);
        let results = api
            .get_all_pages(&endpoint, &params, DEFAULT_PAGE_SIZE, None)
            .with_context(|| format!("failed to list tools in account {}", self.account_id))?;

        let mut tools = Vec::with_capacity(results.len());
        for value in &results {
            let tool = ExternalTool::deserialize(value)
                .context("failed to decode external tool")?;
            tools.push(tool);
        }
        debug!(account_id = self.account_id, tools = tools.len(), "listed installed tools");
        Ok(tools)
    }

    fn get_courses_in_terms(
        &self,
        api: &mut dyn CanvasApi,
        term_ids: &[i64],
        limit: Option<usize>,
    ) -> Result<Vec<Course>> {
        let started = Instant::now();
        let limits = split_limit(limit, term_ids.len())?;

        let mut courses = Vec::new();
        for (term_id, term_limit) in term_ids.iter().zip(limits) {
            if term_limit == Some(0) {
                debug!(term_id, "course limit exhausted; skipping term");
                continue;
            }
            courses.extend(self.get_courses_for_term(api, *term_id, term_limit)?);
        }
        info!(
            account_id = self.account_id,
            terms = ?term_ids,
            courses = courses.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "resolved courses from API"
        );
        Ok(courses)
    }
}

/// Splits `value` into `num_chunks` near-equal parts, larger parts first.
pub fn chunk_integer(value: usize, num_chunks: usize) -> Result<Vec<usize>> {
    if num_chunks == 0 {
        bail!("num_chunks must be a positive integer");
    }
    let floor = value / num_chunks;
    let remainder = value % num_chunks;
    Ok((0..num_chunks)
        .map(|index| if index < remainder { floor + 1 } else { floor })
        .collect())
}

/// Per-term limits for a course lookup spanning `term_count` terms.
pub(crate) fn split_limit(limit: Option<usize>, term_count: usize) -> Result<Vec<Option<usize>>> {
    match limit {
        Some(_) if term_count == 0 => Ok(Vec::new()),
        Some(limit) => Ok(chunk_integer(limit, term_count)?
            .into_iter()
            .map(Some)
            .collect()),
        None => Ok(vec![None; term_count]),
    }
}
