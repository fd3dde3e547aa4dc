//! Document flattening
//!
//! Turns a nested [`SourceDocument`] into one [`FlatRow`] per employee. Pure: no
//! I/O, no clock, no randomness. Rows come out in department order, then employee
//! order, exactly as they appear in the input.

pub mod models;

pub use models::{Department, Employee, FlatRow, Project, SourceDocument};

use crate::error::Result;
use tracing::debug;

/// Separator used when joining list-like fields into a single text column
pub const LIST_SEPARATOR: &str = ", ";

/// Parse raw bytes into a source document.
///
/// Fails with `MalformedDocument` when the bytes are not JSON or do not have the
/// document's shape. Missing fields are not an error.
pub fn parse_document(bytes: &[u8]) -> Result<SourceDocument> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Flatten a document into rows, one per employee
pub fn flatten(document: &SourceDocument) -> Vec<FlatRow> {
    let mut rows = Vec::with_capacity(document.employee_count());

    for (department, info) in &document.departments {
        for (employee_id, employee) in &info.employees {
            rows.push(FlatRow {
                company: document.company.clone(),
                location: document.location.clone(),
                department: department.clone(),
                employee_id: employee_id.clone(),
                name: employee.name.clone(),
                role: employee.role.clone(),
                skills: employee.skills.join(LIST_SEPARATOR),
                campaigns: activity_summary(employee),
            });
        }
    }

    debug!(rows = rows.len(), company = %document.company, "Flattened document");
    rows
}

/// Parse and flatten in one step
pub fn flatten_bytes(bytes: &[u8]) -> Result<Vec<FlatRow>> {
    parse_document(bytes).map(|document| flatten(&document))
}

/// `projects` wins over `campaigns` when both are present
fn activity_summary(employee: &Employee) -> String {
    if let Some(projects) = &employee.projects {
        return projects
            .iter()
            .map(|p| format!("{}: {}", p.name, p.status))
            .collect::<Vec<_>>()
            .join(LIST_SEPARATOR);
    }

    if let Some(campaigns) = &employee.campaigns {
        return campaigns
            .iter()
            .map(|(label, value)| format!("{}: {}", label, render_value(value)))
            .collect::<Vec<_>>()
            .join(LIST_SEPARATOR);
    }

    String::new()
}

/// Strings are rendered bare; any other value is rendered as JSON text
fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    fn rows_for(json: &str) -> Vec<FlatRow> {
        flatten_bytes(json.as_bytes()).unwrap()
    }

    #[test]
    fn test_single_employee_row() {
        let rows = rows_for(
            r#"{"company":"Acme","location":"NY","departments":{"Eng":{"employees":{"E1":{"name":"Jo","role":"Dev","skills":["Go","SQL"]}}}}}"#,
        );

        assert_eq!(
            rows,
            vec![FlatRow {
                company: "Acme".into(),
                location: "NY".into(),
                department: "Eng".into(),
                employee_id: "E1".into(),
                name: "Jo".into(),
                role: "Dev".into(),
                skills: "Go, SQL".into(),
                campaigns: String::new(),
            }]
        );
    }

    #[test]
    fn test_projects_render_name_and_status() {
        let rows = rows_for(
            r#"{"departments":{"Eng":{"employees":{"E1":{"projects":[{"name":"Alpha","status":"done"},{"name":"Beta","status":"active"}]}}}}}"#,
        );
        assert_eq!(rows[0].campaigns, "Alpha: done, Beta: active");
    }

    #[test]
    fn test_campaigns_render_in_input_order() {
        let rows = rows_for(
            r#"{"departments":{"Mkt":{"employees":{"M1":{"campaigns":{"Q3":"planned","Q1":"active","Q2":7}}}}}}"#,
        );
        assert_eq!(rows[0].campaigns, "Q3: planned, Q1: active, Q2: 7");
    }

    #[test]
    fn test_projects_take_precedence_over_campaigns() {
        let rows = rows_for(
            r#"{"departments":{"X":{"employees":{"A":{"projects":[{"name":"P","status":"s"}],"campaigns":{"Q1":"active"}}}}}}"#,
        );
        assert_eq!(rows[0].campaigns, "P: s");
    }

    #[test]
    fn test_empty_projects_still_take_precedence() {
        let rows = rows_for(
            r#"{"departments":{"X":{"employees":{"A":{"projects":[],"campaigns":{"Q1":"active"}}}}}}"#,
        );
        assert_eq!(rows[0].campaigns, "");
    }

    #[test]
    fn test_missing_or_empty_departments() {
        assert!(rows_for(r#"{"company":"Acme"}"#).is_empty());
        assert!(rows_for(r#"{"company":"Acme","departments":{}}"#).is_empty());
        assert!(rows_for(r#"{"departments":{"Eng":{}}}"#).is_empty());
    }

    #[test]
    fn test_null_fields_read_as_missing() {
        let rows = rows_for(
            r#"{"company":"Acme","location":null,"departments":{"Eng":{"employees":{"E1":{"name":"Jo","role":null,"skills":null,"projects":[{"name":"Alpha","status":null}]}}}}}"#,
        );

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].location, "");
        assert_eq!(rows[0].role, "");
        assert_eq!(rows[0].skills, "");
        assert_eq!(rows[0].campaigns, "Alpha: ");

        assert!(rows_for(r#"{"company":"Acme","departments":null}"#).is_empty());
    }

    #[test]
    fn test_non_string_campaign_values_render_as_json() {
        let rows = rows_for(
            r#"{"departments":{"Mkt":{"employees":{"M1":{"campaigns":{"Q1":true,"Q2":3}}}}}}"#,
        );
        assert_eq!(rows[0].campaigns, "Q1: true, Q2: 3");
    }

    #[test]
    fn test_unparseable_input_is_malformed() {
        let err = flatten_bytes(b"{not json").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedDocument(_)));

        let err = flatten_bytes(b"[1, 2, 3]").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedDocument(_)));
    }
}
