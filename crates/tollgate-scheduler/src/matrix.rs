//! Matrix expansion for parallel job generation.

use std::collections::BTreeMap;
use tollgate_core::workflow::{JobDefinition, MatrixConfig, scalar_to_string};
use tollgate_core::{Error, Result};

/// One combination of an expanded matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixCombination {
    pub index: usize,
    pub values: BTreeMap<String, String>,
    pub display_name: String,
}

/// Expander for matrix configurations.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand a job's matrix into its combinations.
    ///
    /// Returns `Ok(None)` for jobs without a matrix.
    pub fn expand(&self, job: &JobDefinition) -> Result<Option<Vec<MatrixCombination>>> {
        let Some(matrix) = job.matrix.as_ref() else {
            return Ok(None);
        };

        let combinations = self.combinations(matrix);
        if combinations.is_empty() {
            return Err(Error::InvalidWorkflow(format!(
                "matrix of job '{}' expands to no combinations",
                job.name
            )));
        }

        let label = job.label();
        Ok(Some(
            combinations
                .into_iter()
                .enumerate()
                .map(|(index, values)| MatrixCombination {
                    index,
                    display_name: self.format_display_name(label, &values),
                    values,
                })
                .collect(),
        ))
    }

    fn combinations(&self, matrix: &MatrixConfig) -> Vec<BTreeMap<String, String>> {
        let mut combinations = self.generate_combinations(&matrix.dimensions);

        for include in &matrix.include {
            let include = stringify(include);
            if !include.is_empty() && !combinations.contains(&include) {
                combinations.push(include);
            }
        }

        let excludes: Vec<BTreeMap<String, String>> = matrix.exclude.iter().map(stringify).collect();
        combinations.retain(|combo| !excludes.iter().any(|exclude| self.matches_exclude(combo, exclude)));

        combinations
    }

    fn generate_combinations(
        &self,
        dimensions: &BTreeMap<String, Vec<serde_json::Value>>,
    ) -> Vec<BTreeMap<String, String>> {
        if dimensions.is_empty() {
            return Vec::new();
        }

        let mut result = vec![BTreeMap::new()];

        for (key, values) in dimensions {
            let mut new_result = Vec::with_capacity(result.len() * values.len());

            for combo in &result {
                for value in values {
                    let mut new_combo = combo.clone();
                    new_combo.insert(key.clone(), scalar_to_string(value));
                    new_result.push(new_combo);
                }
            }

            result = new_result;
        }

        result
    }

    fn matches_exclude(&self, combo: &BTreeMap<String, String>, exclude: &BTreeMap<String, String>) -> bool {
        !exclude.is_empty() && exclude.iter().all(|(key, value)| combo.get(key) == Some(value))
    }

    fn format_display_name(&self, label: &str, values: &BTreeMap<String, String>) -> String {
        if values.is_empty() {
            return label.to_string();
        }

        let parts: Vec<String> = values.iter().map(|(k, v)| format!("{}={}", k, v)).collect();

        format!("{} ({})", label, parts.join(", "))
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}

fn stringify(values: &BTreeMap<String, serde_json::Value>) -> BTreeMap<String, String> {
    values
        .iter()
        .map(|(k, v)| (k.clone(), scalar_to_string(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(matrix: serde_json::Value) -> JobDefinition {
        serde_json::from_value(json!({
            "name": "test",
            "run": "cargo test",
            "matrix": matrix,
        }))
        .unwrap()
    }

    #[test]
    fn test_matrix_expansion() {
        let job = job(json!({
            "dimensions": {
                "os": ["linux", "macos"],
                "version": ["18", "20", 22],
            }
        }));

        let combos = MatrixExpander::new().expand(&job).unwrap().unwrap();

        assert_eq!(combos.len(), 6); // 2 OS × 3 versions
        assert_eq!(combos[0].index, 0);
        assert_eq!(combos[0].display_name, "test (os=linux, version=18)");
        assert_eq!(combos[5].values["os"], "macos");
        assert_eq!(combos[5].values["version"], "22");
    }

    #[test]
    fn test_matrix_with_exclude_and_include() {
        let job = job(json!({
            "dimensions": {
                "os": ["linux", "macos"],
                "arch": ["amd64", "arm64"],
            },
            "include": [{ "os": "windows", "arch": "amd64" }],
            "exclude": [{ "os": "macos", "arch": "amd64" }],
        }));

        let combos = MatrixExpander::new().expand(&job).unwrap().unwrap();

        // 2x2 = 4, plus 1 included, minus 1 excluded
        assert_eq!(combos.len(), 4);
        assert!(combos.iter().all(|c| !(c.values["os"] == "macos" && c.values["arch"] == "amd64")));
        assert_eq!(combos.last().map(|c| c.values["os"].as_str()), Some("windows"));
        let indices: Vec<usize> = combos.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_job_without_matrix() {
        let job: JobDefinition = serde_json::from_value(json!({ "name": "lint" })).unwrap();
        assert!(MatrixExpander::new().expand(&job).unwrap().is_none());
    }

    #[test]
    fn test_empty_expansion_is_invalid() {
        let job = job(json!({
            "dimensions": { "os": ["linux"] },
            "exclude": [{ "os": "linux" }],
        }));

        let err = MatrixExpander::new().expand(&job).unwrap_err();
        assert!(matches!(err, Error::InvalidWorkflow(_)));
    }
}
