//! Pure query runner for structured device-catalog queries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::{Device, DeviceStore};
use crate::engines::Constraint;

/// Structured query produced by the spec agent or the planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuerySpec {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub filters: Vec<Constraint>,
    #[serde(default)]
    pub device_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub results: Vec<Device>,
    pub summary: String,
}

/// Read a filterable attribute off a device record.
fn field_value(device: &Device, field: &str) -> Option<Value> {
    match field {
        "manufacturer" => Some(Value::String(device.manufacturer.clone())),
        "product_name" => Some(Value::String(device.product_name.clone())),
        "device_name" => Some(Value::String(device.device_name.clone())),
        "category" | "category_type" => Some(Value::String(device.category_type.clone())),
        "conical_category" => Some(Value::String(device.conical_category.clone())),
        "logic_category" => Some(Value::String(device.logic_category.clone())),
        "ID_in" | "inner_diameter_in" => device.specs.inner_diameter.inches.map(Value::from),
        "ID_mm" | "inner_diameter_mm" => device.specs.inner_diameter.mm.map(Value::from),
        "OD_in" | "outer_diameter_distal_in" => {
            device.specs.outer_diameter_distal.inches.map(Value::from)
        }
        "OD_mm" | "outer_diameter_distal_mm" => {
            device.specs.outer_diameter_distal.mm.map(Value::from)
        }
        "OD_proximal_in" | "outer_diameter_proximal_in" => {
            device.specs.outer_diameter_proximal.inches.map(Value::from)
        }
        "length_cm" => device.specs.length_cm.map(Value::from),
        _ => None,
    }
}

fn matches_filter(device: &Device, filter: &Constraint) -> bool {
    let Some(actual) = field_value(device, &filter.field) else {
        return false;
    };

    match filter.operator.as_str() {
        "contains" => {
            let needle = filter.value.as_str().unwrap_or_default().to_lowercase();
            let haystack = actual.as_str().unwrap_or_default().to_lowercase();
            !needle.is_empty() && haystack.contains(&needle)
        }
        "=" | "==" => match (actual.as_f64(), filter.value.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
            _ => {
                actual.as_str().map(|s| s.to_lowercase())
                    == filter.value.as_str().map(|s| s.to_lowercase())
            }
        },
        ">=" => matches!(
            (actual.as_f64(), filter.value.as_f64()),
            (Some(a), Some(b)) if a >= b
        ),
        "<=" => matches!(
            (actual.as_f64(), filter.value.as_f64()),
            (Some(a), Some(b)) if a <= b
        ),
        ">" => matches!(
            (actual.as_f64(), filter.value.as_f64()),
            (Some(a), Some(b)) if a > b
        ),
        "<" => matches!(
            (actual.as_f64(), filter.value.as_f64()),
            (Some(a), Some(b)) if a < b
        ),
        _ => false,
    }
}

fn category_matches(device: &Device, category: &str) -> bool {
    let needle = category.to_lowercase().replace(' ', "_");
    device.category_type.eq_ignore_ascii_case(&needle)
        || device
            .logic_categories()
            .iter()
            .any(|tag| tag.eq_ignore_ascii_case(&needle))
}

pub struct QueryExecutor;

impl QueryExecutor {
    /// Execute a structured query spec against the catalog.
    pub fn execute(spec: &QuerySpec, store: &DeviceStore) -> ExecutionResult {
        match spec.action.as_str() {
            "get_device_specs" => Self::get_device_specs(spec, store),
            "compare_devices" => Self::compare_devices(spec, store),
            // Default action: attribute/category filter.
            _ => Self::filter_by_spec(spec, store),
        }
    }

    fn filter_by_spec(spec: &QuerySpec, store: &DeviceStore) -> ExecutionResult {
        let mut results: Vec<Device> = store
            .iter()
            .filter(|device| {
                spec.category
                    .as_deref()
                    .map(|c| c.is_empty() || category_matches(device, c))
                    .unwrap_or(true)
            })
            .filter(|device| spec.filters.iter().all(|f| matches_filter(device, f)))
            .map(|device| (**device).clone())
            .collect();
        results.sort_by(|a, b| {
            a.product_name
                .cmp(&b.product_name)
                .then_with(|| a.device_name.cmp(&b.device_name))
        });

        let summary = format!(
            "Filtered catalog: {} device(s) matching category={} filters={}",
            results.len(),
            spec.category.as_deref().unwrap_or("any"),
            spec.filters.len()
        );
        ExecutionResult { results, summary }
    }

    fn get_device_specs(spec: &QuerySpec, store: &DeviceStore) -> ExecutionResult {
        let results: Vec<Device> = spec
            .device_ids
            .iter()
            .filter_map(|id| store.get(id))
            .map(|device| (*device).clone())
            .collect();
        let summary = format!(
            "Looked up {} of {} requested device record(s)",
            results.len(),
            spec.device_ids.len()
        );
        ExecutionResult { results, summary }
    }

    fn compare_devices(spec: &QuerySpec, store: &DeviceStore) -> ExecutionResult {
        let mut result = Self::get_device_specs(spec, store);
        result.summary = format!(
            "Comparison across {} device record(s): {}",
            result.results.len(),
            result
                .results
                .iter()
                .map(|d| d.device_name.as_str())
                .collect::<Vec<_>>()
                .join(" vs ")
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{test_support, FitLogic};
    use serde_json::json;

    fn store() -> DeviceStore {
        let mut a = test_support::device("a1", "Phenom 21", "L3", FitLogic::Math);
        a.manufacturer = "Medtronic".to_string();
        a.category_type = "microcatheter".to_string();
        a.specs.inner_diameter.inches = Some(0.021);
        let mut b = test_support::device("b1", "Headway 21", "L3", FitLogic::Math);
        b.manufacturer = "MicroVention".to_string();
        b.category_type = "microcatheter".to_string();
        b.specs.inner_diameter.inches = Some(0.021);
        let mut c = test_support::device("c1", "React 71", "L2", FitLogic::Math);
        c.manufacturer = "Medtronic".to_string();
        c.category_type = "intermediate_catheter".to_string();
        c.specs.inner_diameter.inches = Some(0.071);
        DeviceStore::from_devices(vec![a, b, c])
    }

    #[test]
    fn test_filter_by_manufacturer_and_category() {
        let spec = QuerySpec {
            action: "filter_by_spec".to_string(),
            category: Some("microcatheter".to_string()),
            filters: vec![Constraint {
                field: "manufacturer".to_string(),
                operator: "contains".to_string(),
                value: json!("Medtronic"),
            }],
            device_ids: Vec::new(),
        };
        let result = QueryExecutor::execute(&spec, &store());
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].product_name, "Phenom 21");
    }

    #[test]
    fn test_numeric_filter() {
        let spec = QuerySpec {
            action: "filter_by_spec".to_string(),
            category: None,
            filters: vec![Constraint {
                field: "ID_in".to_string(),
                operator: ">=".to_string(),
                value: json!(0.071),
            }],
            device_ids: Vec::new(),
        };
        let result = QueryExecutor::execute(&spec, &store());
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].product_name, "React 71");
    }

    #[test]
    fn test_get_device_specs_skips_unknown_ids() {
        let spec = QuerySpec {
            action: "get_device_specs".to_string(),
            category: None,
            filters: Vec::new(),
            device_ids: vec!["a1".to_string(), "ghost".to_string()],
        };
        let result = QueryExecutor::execute(&spec, &store());
        assert_eq!(result.results.len(), 1);
        assert!(result.summary.contains("1 of 2"));
    }

    #[test]
    fn test_unknown_field_matches_nothing() {
        let spec = QuerySpec {
            action: "filter_by_spec".to_string(),
            category: None,
            filters: vec![Constraint {
                field: "nonexistent".to_string(),
                operator: "contains".to_string(),
                value: json!("x"),
            }],
            device_ids: Vec::new(),
        };
        let result = QueryExecutor::execute(&spec, &store());
        assert!(result.results.is_empty());
    }
}
