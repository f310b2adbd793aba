use std::collections::BTreeMap;

use reqwest::{Method, StatusCode};
use serde_json::{Value, json};

use crate::api::{CanvasApi, PageResponse, QueryParams};
use crate::error::ApiError;

/// In-memory Canvas: paged listings keyed by path, plus mutable course tabs.
#[derive(Default)]
pub(crate) struct MockApi {
    pub pages: BTreeMap<String, Vec<Value>>,
    pub course_tabs: BTreeMap<i64, Vec<Value>>,
    pub gets: Vec<(String, QueryParams)>,
    pub puts: Vec<(String, QueryParams)>,
    pub failing_put_paths: Vec<String>,
    pub request_count: usize,
}

impl MockApi {
    pub fn with_tools(mut self, account_id: i64, tools: Value) -> Self {
        self.pages.insert(
            format!("/accounts/{account_id}/external_tools"),
            vec![tools],
        );
        self
    }

    pub fn with_pages(mut self, path: &str, pages: Vec<Value>) -> Self {
        self.pages.insert(path.to_string(), pages);
        self
    }

    pub fn with_course_tabs(mut self, course_id: i64, tabs: Vec<Value>) -> Self {
        self.course_tabs.insert(course_id, tabs);
        self
    }

    pub fn tab(&self, course_id: i64, tool_id: i64) -> Option<&Value> {
        let id = tool_tab_id(tool_id);
        self.course_tabs
            .get(&course_id)?
            .iter()
            .find(|tab| tab["id"] == json!(id))
    }

    fn not_found(method: Method, path: &str) -> ApiError {
        ApiError::Status {
            method,
            url: path.to_string(),
            status: StatusCode::NOT_FOUND,
        }
    }
}

pub(crate) fn tool_tab_id(tool_id: i64) -> String {
    format!("context_external_tool_{tool_id}")
}

pub(crate) fn external_tab(tool_id: i64, hidden: bool, position: i64) -> Value {
    json!({
        "id": tool_tab_id(tool_id),
        "html_url": format!("/courses/1/external_tools/{tool_id}"),
        "label": format!("Tool {tool_id}"),
        "type": "external",
        "hidden": hidden,
        "visibility": "public",
        "position": position,
    })
}

pub(crate) fn internal_tab(id: &str, position: i64) -> Value {
    json!({
        "id": id,
        "label": id,
        "type": "internal",
        "position": position,
    })
}

impl CanvasApi for MockApi {
    fn get(&mut self, path: &str, params: &QueryParams) -> Result<PageResponse, ApiError> {
        self.request_count += 1;
        self.gets.push((path.to_string(), params.clone()));

        if let Some(course_id) = path
            .strip_prefix("/courses/")
            .and_then(|rest| rest.strip_suffix("/tabs"))
            .and_then(|id| id.parse::<i64>().ok())
        {
            let tabs = self
                .course_tabs
                .get(&course_id)
                .ok_or_else(|| Self::not_found(Method::GET, path))?;
            return Ok(PageResponse {
                data: Value::Array(tabs.clone()),
                next_page_params: None,
            });
        }

        let pages = self
            .pages
            .get(path)
            .ok_or_else(|| Self::not_found(Method::GET, path))?;
        let page = params
            .get("page")
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(1);
        let data = pages
            .get(page - 1)
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let next_page_params =
            (page < pages.len()).then(|| QueryParams::new().with("page", page + 1));
        Ok(PageResponse {
            data,
            next_page_params,
        })
    }

    fn put(&mut self, path: &str, params: &QueryParams) -> Result<Value, ApiError> {
        self.request_count += 1;
        self.puts.push((path.to_string(), params.clone()));
        if self.failing_put_paths.iter().any(|failing| failing == path) {
            return Err(ApiError::Status {
                method: Method::PUT,
                url: path.to_string(),
                status: StatusCode::INTERNAL_SERVER_ERROR,
            });
        }

        let (course_id, tab_id) = path
            .strip_prefix("/courses/")
            .and_then(|rest| rest.split_once("/tabs/"))
            .and_then(|(course, tab)| Some((course.parse::<i64>().ok()?, tab.to_string())))
            .ok_or_else(|| Self::not_found(Method::PUT, path))?;
        let tab = self
            .course_tabs
            .get_mut(&course_id)
            .and_then(|tabs| tabs.iter_mut().find(|tab| tab["id"] == json!(tab_id)))
            .ok_or_else(|| Self::not_found(Method::PUT, path))?;

        if let Some(hidden) = params.get("hidden") {
            tab["hidden"] = json!(hidden == "true");
        }
        if let Some(position) = params.get("position").and_then(|value| value.parse::<i64>().ok())
        {
            tab["position"] = json!(position);
        }
        Ok(tab.clone())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}
