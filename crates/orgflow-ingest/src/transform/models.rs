//! Source document shape and the flat row it is reduced to

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// Treat an explicit `null` the same as a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Company organization document as uploaded by the source system.
///
/// Mappings are `IndexMap`s so departments and employees keep the order they
/// have in the input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    #[serde(default, deserialize_with = "null_as_default")]
    pub company: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub location: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub departments: IndexMap<String, Department>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Department {
    /// Keyed by employee identifier
    #[serde(default, deserialize_with = "null_as_default")]
    pub employees: IndexMap<String, Employee>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub role: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub skills: Vec<String>,
    /// Engineering-style activity list
    #[serde(default)]
    pub projects: Option<Vec<Project>>,
    /// Marketing-style activity map; ignored when `projects` is present
    #[serde(default)]
    pub campaigns: Option<IndexMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
}

impl SourceDocument {
    /// Sum of employees across all departments
    pub fn employee_count(&self) -> usize {
        self.departments.values().map(|d| d.employees.len()).sum()
    }
}

/// One denormalized record per employee, matching the destination table column for column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatRow {
    pub company: String,
    pub location: String,
    pub department: String,
    pub employee_id: String,
    pub name: String,
    pub role: String,
    /// Comma-joined skills
    pub skills: String,
    /// Comma-joined "key: value" pairs from either projects or campaigns
    pub campaigns: String,
}

impl FlatRow {
    /// Destination column names, in insert order
    pub const COLUMNS: [&'static str; 8] = [
        "company",
        "location",
        "department",
        "employee_id",
        "name",
        "role",
        "skills",
        "campaigns",
    ];

    /// Column values in [`FlatRow::COLUMNS`] order
    pub fn values(&self) -> [&str; 8] {
        [
            &self.company,
            &self.location,
            &self.department,
            &self.employee_id,
            &self.name,
            &self.role,
            &self.skills,
            &self.campaigns,
        ]
    }
}
