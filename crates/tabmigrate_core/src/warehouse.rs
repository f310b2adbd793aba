use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OpenFlags, params_from_iter};
use serde_json::Value;
use tracing::{debug, info};

use crate::account::{AccountManager, AccountSource, split_limit};
use crate::api::{CanvasApi, DEFAULT_PAGE_SIZE, QueryParams};
use crate::models::{Course, ExternalTool};

/// Course lookup against a bulk warehouse snapshot.
///
/// The snapshot uses the warehouse dimension tables (`course_dim`,
/// `enrollment_term_dim`, `account_dim`), where `id` is the warehouse key
/// and `canvas_id` is the id the REST API uses. Tools and the sub-account
/// tree still come from the API.
pub struct WarehouseAccountManager {
    account: AccountManager,
    connection: Connection,
}

impl WarehouseAccountManager {
    pub fn open(account_id: i64, db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            bail!("warehouse database not found: {}", db_path.display());
        }
        let connection = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        Ok(Self::from_connection(account_id, connection))
    }

    pub fn from_connection(account_id: i64, connection: Connection) -> Self {
        Self {
            account: AccountManager::new(account_id),
            connection,
        }
    }

    pub fn get_subaccount_ids(&self, api: &mut dyn CanvasApi) -> Result<Vec<i64>> {
        let account_id = self.account.account_id();
        let endpoint = format!("/accounts/{account_id}/sub_accounts");
        let params = QueryParams::new().with("recursive", true);
        let results = api
            .get_all_pages(&endpoint, &params, DEFAULT_PAGE_SIZE, None)
            .with_context(|| format!("failed to list sub-accounts of account {account_id}"))?;

        let ids = results
            .iter()
            .map(|value| {
                value
                    .get("id")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| anyhow::anyhow!("sub-account entry without an id: {value}"))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(account_id, sub_accounts = ?ids, "listed sub-accounts");
        Ok(ids)
    }

    fn query_courses(
        &self,
        account_ids: &[i64],
        term_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<Course>> {
        let placeholders = (0..account_ids.len())
            .map(|index| format!("?{}", index + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let limit_clause = limit
            .map(|limit| format!("LIMIT {limit}"))
            .unwrap_or_default();
        let sql = format!(
            "SELECT c.canvas_id, c.name, t.canvas_id
             FROM course_dim c
             LEFT JOIN enrollment_term_dim t ON c.enrollment_term_id = t.id
             LEFT JOIN account_dim a ON c.account_id = a.id
             WHERE t.canvas_id = ?1
               AND a.canvas_id IN ({placeholders})
               AND c.workflow_state != 'deleted'
             ORDER BY c.canvas_id
             {limit_clause}"
        );

        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare warehouse course query")?;
        let bind = std::iter::once(term_id).chain(account_ids.iter().copied());
        let rows = statement
            .query_map(params_from_iter(bind), |row| {
                Ok(Course {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    term_id: row.get(2)?,
                })
            })
            .with_context(|| format!("failed to query warehouse courses for term {term_id}"))?;

        let mut courses = Vec::new();
        for row in rows {
            courses.push(row.context("failed to decode warehouse course row")?);
        }
        Ok(courses)
    }
}

impl AccountSource for WarehouseAccountManager {
    fn account_id(&self) -> i64 {
        self.account.account_id()
    }

    fn get_installed_tools(&self, api: &mut dyn CanvasApi) -> Result<Vec<ExternalTool>> {
        self.account.get_installed_tools(api)
    }

    fn get_courses_in_terms(
        &self,
        api: &mut dyn CanvasApi,
        term_ids: &[i64],
        limit: Option<usize>,
    ) -> Result<Vec<Course>> {
        let started = Instant::now();
        let mut account_ids = vec![self.account_id()];
        account_ids.extend(self.get_subaccount_ids(api)?);

        let limits = split_limit(limit, term_ids.len())?;
        let mut courses = Vec::new();
        for (term_id, term_limit) in term_ids.iter().zip(limits) {
            if term_limit == Some(0) {
                continue;
            }
            courses.extend(self.query_courses(&account_ids, *term_id, term_limit)?);
        }
        info!(
            account_id = self.account_id(),
            accounts = account_ids.len(),
            terms = ?term_ids,
            courses = courses.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "resolved courses from warehouse"
        );
        Ok(courses)
    }
}
