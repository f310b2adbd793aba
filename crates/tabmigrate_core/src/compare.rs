use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::Value;

/// Difference between two course-list snapshots, keyed by course id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseSetComparison {
    pub left_count: usize,
    pub right_count: usize,
    pub both_count: usize,
    pub only_left: Vec<Value>,
    pub only_right: Vec<Value>,
}

pub fn load_course_snapshot(path: &Path) -> Result<Vec<Value>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: Value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    match parsed {
        Value::Array(items) => Ok(items),
        _ => Err(anyhow!("{} does not contain a JSON array", path.display())),
    }
}

pub fn compare_course_snapshots(left: &[Value], right: &[Value]) -> Result<CourseSetComparison> {
    let left_by_id = index_by_id(left).context("left snapshot")?;
    let right_by_id = index_by_id(right).context("right snapshot")?;

    let left_ids = left_by_id.keys().copied().collect::<BTreeSet<_>>();
    let right_ids = right_by_id.keys().copied().collect::<BTreeSet<_>>();
    let only = |ids: &BTreeSet<i64>, others: &BTreeSet<i64>, records: &BTreeMap<i64, &Value>| {
        ids.difference(others)
            .filter_map(|id| records.get(id).map(|record| (*record).clone()))
            .collect::<Vec<_>>()
    };

    Ok(CourseSetComparison {
        left_count: left_ids.len(),
        right_count: right_ids.len(),
        both_count: left_ids.intersection(&right_ids).count(),
        only_left: only(&left_ids, &right_ids, &left_by_id),
        only_right: only(&right_ids, &left_ids, &right_by_id),
    })
}

// First record wins when an id repeats.
fn index_by_id(records: &[Value]) -> Result<BTreeMap<i64, &Value>> {
    let mut by_id = BTreeMap::new();
    for record in records {
        let id = record
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow!("course record without an integer id: {record}"))?;
        by_id.entry(id).or_insert(record);
    }
    Ok(by_id)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn reports_sizes_and_one_sided_ids() {
        let left = vec![
            json!({"id": 3, "name": "C"}),
            json!({"id": 1, "name": "A"}),
            json!({"id": 2, "name": "B"}),
        ];
        let right = vec![json!({"id": 2, "name": "B"}), json!({"id": 4, "name": "D"})];

        let comparison = compare_course_snapshots(&left, &right).expect("comparison");
        assert_eq!(comparison.left_count, 3);
        assert_eq!(comparison.right_count, 2);
        assert_eq!(comparison.both_count, 1);
        assert_eq!(
            comparison.only_left,
            vec![json!({"id": 1, "name": "A"}), json!({"id": 3, "name": "C"})]
        );
        assert_eq!(comparison.only_right, vec![json!({"id": 4, "name": "D"})]);
    }

    #[test]
    fn duplicate_ids_keep_first_record() {
        let left = vec![json!({"id": 1, "name": "first"}), json!({"id": 1, "name": "second"})];
        let comparison = compare_course_snapshots(&left, &[]).expect("comparison");
        assert_eq!(comparison.left_count, 1);
        assert_eq!(comparison.only_left, vec![json!({"id": 1, "name": "first"})]);
    }

    #[test]
    fn records_without_id_are_rejected() {
        let error = compare_course_snapshots(&[json!({"name": "x"})], &[]).expect_err("must fail");
        assert!(format!("{error:#}").contains("left snapshot"));
    }

    #[test]
    fn snapshot_file_must_hold_an_array() {
        let temp = tempdir().expect("tempdir");
        let good = temp.path().join("left.json");
        fs::write(&good, r#"[{"id": 1}]"#).expect("write");
        assert_eq!(load_course_snapshot(&good).expect("load").len(), 1);

        let bad = temp.path().join("right.json");
        fs::write(&bad, r#"{"id": 1}"#).expect("write");
        assert!(load_course_snapshot(&bad).is_err());
    }
}
