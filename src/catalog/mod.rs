//! Device catalog: read-only snapshot of device records with id lookup,
//! name search, and fuzzy suggestions.
//!
//! The catalog is loaded once at startup and shared immutably. Requests that
//! need synthetic records (generic devices) work through a request-scoped
//! overlay so the shared snapshot is never mutated.

mod fuzzy;
mod search;

pub use fuzzy::Suggestion;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use search::SearchIndex;

/// Per-device flag selecting the compatibility rule family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitLogic {
    Math,
    Compat,
}

/// Diameter unit axis. Compat claims are matched to spec values strictly
/// within the same unit; no conversion is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiameterUnit {
    #[serde(rename = "in")]
    Inches,
    #[serde(rename = "mm")]
    Mm,
    #[serde(rename = "F")]
    French,
}

impl DiameterUnit {
    pub const ALL: [DiameterUnit; 3] = [DiameterUnit::Inches, DiameterUnit::Mm, DiameterUnit::French];

    pub fn label(&self) -> &'static str {
        match self {
            DiameterUnit::Inches => "in",
            DiameterUnit::Mm => "mm",
            DiameterUnit::French => "F",
        }
    }

    /// Preference rank for unit collapse: inches > mm > French.
    pub fn preference(&self) -> u8 {
        match self {
            DiameterUnit::Inches => 0,
            DiameterUnit::Mm => 1,
            DiameterUnit::French => 2,
        }
    }
}

/// A dimensional value recorded redundantly in the three diameter units.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TriUnit {
    pub inches: Option<f64>,
    pub mm: Option<f64>,
    pub french: Option<f64>,
}

impl TriUnit {
    pub fn get(&self, unit: DiameterUnit) -> Option<f64> {
        match unit {
            DiameterUnit::Inches => self.inches,
            DiameterUnit::Mm => self.mm,
            DiameterUnit::French => self.french,
        }
    }
}

/// A compatibility-table claim: a plain number or a `low-high` range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CompatBound {
    Single(f64),
    Range(f64, f64),
}

impl CompatBound {
    /// Parse `"0.021"` or `"0.017-0.021"`. Empty or non-numeric text is None.
    pub fn parse(raw: &str) -> Option<CompatBound> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(single) = raw.parse::<f64>() {
            return Some(CompatBound::Single(single));
        }
        // Range: split on a '-' that is not the leading sign.
        let (dash, _) = raw.char_indices().skip(1).find(|(_, c)| *c == '-')?;
        let low = raw[..dash].trim().parse::<f64>().ok()?;
        let high = raw[dash + 1..].trim().parse::<f64>().ok()?;
        Some(CompatBound::Range(low, high))
    }
}

/// A compatibility claim recorded in the three diameter units, kept raw for
/// display and parsed on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompatTriUnit {
    pub inches: Option<String>,
    pub mm: Option<String>,
    pub french: Option<String>,
}

impl CompatTriUnit {
    pub fn raw(&self, unit: DiameterUnit) -> Option<&str> {
        match unit {
            DiameterUnit::Inches => self.inches.as_deref(),
            DiameterUnit::Mm => self.mm.as_deref(),
            DiameterUnit::French => self.french.as_deref(),
        }
    }

    pub fn bound(&self, unit: DiameterUnit) -> Option<CompatBound> {
        self.raw(unit).and_then(CompatBound::parse)
    }
}

/// Geometric dimensions of a device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSpecs {
    pub inner_diameter: TriUnit,
    pub outer_diameter_distal: TriUnit,
    pub outer_diameter_proximal: TriUnit,
    pub length_cm: Option<f64>,
}

/// Manufacturer-declared compatibility table fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompatTable {
    pub wire_max_od: CompatTriUnit,
    pub catheter_max_od: CompatTriUnit,
    pub catheter_req_id: CompatTriUnit,
    pub guide_min_id: CompatTriUnit,
}

/// One physical device variant. Immutable within a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub product_name: String,
    pub device_name: String,
    pub manufacturer: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub category_type: String,
    pub conical_category: String,
    pub logic_category: String,
    pub fit_logic: FitLogic,
    pub specs: DeviceSpecs,
    pub compat: CompatTable,
}

impl Device {
    /// Numeric nesting level. L0 (outermost) through L5; LW (guidewire) is
    /// the innermost peer.
    pub fn conical_level(&self) -> Option<u8> {
        match self.conical_category.as_str() {
            "LW" => Some(6),
            other => other.strip_prefix('L').and_then(|n| n.parse().ok()),
        }
    }

    /// Space-separated category tags as a set.
    pub fn logic_categories(&self) -> Vec<&str> {
        self.logic_category.split_whitespace().collect()
    }

    /// Compact record shape streamed to the client in device chunks.
    pub fn summary_record(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "product_name": self.product_name,
            "device_name": self.device_name,
            "manufacturer": self.manufacturer,
            "category_type": self.category_type,
            "conical_category": self.conical_category,
            "inner_diameter_in": self.specs.inner_diameter.inches,
            "outer_diameter_distal_in": self.specs.outer_diameter_distal.inches,
            "length_cm": self.specs.length_cm,
        })
    }
}

/// A product name mapped to its size variants and shared conical category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceGroup {
    pub product_name: String,
    pub ids: Vec<String>,
    pub conical_category: String,
}

/// Reference used in engine inputs: product name resolved to variant ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRef {
    pub ids: Vec<String>,
    #[serde(default)]
    pub conical_category: String,
}

/// Shared immutable catalog: id map + search index + product groups.
pub struct DeviceStore {
    devices: HashMap<String, Arc<Device>>,
    groups: BTreeMap<String, DeviceGroup>,
    index: SearchIndex,
}

impl DeviceStore {
    /// Load the startup snapshot: a JSON object of `id -> record` using the
    /// catalog's flat field naming.
    pub fn load_from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read device catalog at {path}"))?;
        let records: BTreeMap<String, Value> =
            serde_json::from_str(&raw).context("Device catalog is not a JSON object of records")?;

        let mut devices = Vec::with_capacity(records.len());
        for (id, record) in records {
            match parse_catalog_record(&id, &record) {
                Ok(device) => devices.push(device),
                Err(e) => tracing::warn!(id = %id, error = %e, "Skipping malformed catalog record"),
            }
        }
        info!("📦 Device catalog loaded: {} records", devices.len());
        Ok(Self::from_devices(devices))
    }

    pub fn from_devices(devices: Vec<Device>) -> Self {
        let mut map: HashMap<String, Arc<Device>> = HashMap::with_capacity(devices.len());
        let mut groups: BTreeMap<String, DeviceGroup> = BTreeMap::new();

        for device in devices {
            let device = Arc::new(device);
            groups
                .entry(device.product_name.clone())
                .and_modify(|g| g.ids.push(device.id.clone()))
                .or_insert_with(|| DeviceGroup {
                    product_name: device.product_name.clone(),
                    ids: vec![device.id.clone()],
                    conical_category: device.conical_category.clone(),
                });
            map.insert(device.id.clone(), device);
        }

        let index = SearchIndex::build(map.values());
        Self {
            devices: map,
            groups,
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.get(id).cloned()
    }

    pub fn group(&self, product_name: &str) -> Option<&DeviceGroup> {
        self.groups.get(product_name)
    }

    pub fn groups(&self) -> impl Iterator<Item = &DeviceGroup> {
        self.groups.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.values()
    }

    /// Free-text product search. Returns matching devices in relevance
    /// order, capped at 100.
    pub fn search(&self, query: &str) -> Vec<Arc<Device>> {
        self.index
            .search(query)
            .into_iter()
            .filter_map(|id| self.devices.get(&id).cloned())
            .collect()
    }

    /// Resolve a list of user-written device names against the catalog.
    /// Found names are grouped by product; unresolved names are returned
    /// verbatim for the clarification flow.
    pub fn resolve_names(&self, names: &[String]) -> (BTreeMap<String, DeviceRef>, Vec<String>) {
        let mut found = BTreeMap::new();
        let mut not_found = Vec::new();

        for name in names {
            let matches = self.search(name);
            if matches.is_empty() {
                not_found.push(name.clone());
                continue;
            }
            for device in matches {
                let entry = found
                    .entry(device.product_name.clone())
                    .or_insert_with(|| DeviceRef {
                        ids: Vec::new(),
                        conical_category: device.conical_category.clone(),
                    });
                if !entry.ids.contains(&device.id) {
                    entry.ids.push(device.id.clone());
                }
            }
        }
        (found, not_found)
    }

    /// Fuzzy suggestions for a name that exact search could not resolve.
    pub fn suggest_close_matches(&self, name: &str, max_suggestions: usize) -> Vec<Suggestion> {
        fuzzy::suggest(self, name, max_suggestions)
    }
}

/// Request-scoped catalog view: the shared snapshot plus synthetic records
/// injected for this request only.
#[derive(Clone)]
pub struct RequestCatalog {
    base: Arc<DeviceStore>,
    overlay: Arc<parking_lot::RwLock<HashMap<String, Arc<Device>>>>,
}

impl RequestCatalog {
    pub fn new(base: Arc<DeviceStore>) -> Self {
        Self {
            base,
            overlay: Arc::new(parking_lot::RwLock::new(HashMap::new())),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Device>> {
        if let Some(device) = self.overlay.read().get(id) {
            return Some(device.clone());
        }
        self.base.get(id)
    }

    pub fn base(&self) -> &Arc<DeviceStore> {
        &self.base
    }

    /// Inject a synthetic device for the lifetime of this request.
    pub fn insert_synthetic(&self, device: Device) -> Arc<Device> {
        let device = Arc::new(device);
        self.overlay
            .write()
            .insert(device.id.clone(), device.clone());
        device
    }

    pub fn synthetic_count(&self) -> usize {
        self.overlay.read().len()
    }
}

// ── Catalog snapshot parsing ──────────────────────────────────────

fn field_str(record: &Value, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn field_num(record: &Value, key: &str) -> Option<f64> {
    match record.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().parse().ok(),
        _ => None,
    }
}

fn field_opt_str(record: &Value, key: &str) -> Option<String> {
    let value = field_str(record, key);
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn tri_unit(record: &Value, stem: &str) -> TriUnit {
    TriUnit {
        inches: field_num(record, &format!("{stem}_in")),
        mm: field_num(record, &format!("{stem}_mm")),
        french: field_num(record, &format!("{stem}_F")),
    }
}

fn compat_tri_unit(record: &Value, stem: &str) -> CompatTriUnit {
    CompatTriUnit {
        inches: field_opt_str(record, &format!("{stem}_in")),
        mm: field_opt_str(record, &format!("{stem}_mm")),
        french: field_opt_str(record, &format!("{stem}_F")),
    }
}

/// Convert one flat catalog record into a typed `Device`.
pub fn parse_catalog_record(id: &str, record: &Value) -> Result<Device> {
    let product_name = field_str(record, "product_name");
    if product_name.is_empty() {
        anyhow::bail!("record has no product_name");
    }

    let fit_logic = match field_str(record, "fit_logic").as_str() {
        "compat" => FitLogic::Compat,
        _ => FitLogic::Math,
    };

    let aliases = match record.get("aliases") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect(),
        _ => Vec::new(),
    };

    Ok(Device {
        id: id.to_string(),
        product_name,
        device_name: field_str(record, "device_name"),
        manufacturer: field_str(record, "manufacturer"),
        aliases,
        category_type: field_str(record, "category_type"),
        conical_category: field_str(record, "conical_category"),
        logic_category: field_str(record, "logic_category"),
        fit_logic,
        specs: DeviceSpecs {
            inner_diameter: tri_unit(record, "specification_inner-diameter"),
            outer_diameter_distal: tri_unit(record, "specification_outer-diameter-distal"),
            outer_diameter_proximal: tri_unit(record, "specification_outer-diameter-proximal"),
            length_cm: field_num(record, "specification_length_cm"),
        },
        compat: CompatTable {
            wire_max_od: compat_tri_unit(record, "compatibility_wire_max_outer-diameter"),
            catheter_max_od: compat_tri_unit(record, "compatibility_catheter_max_outer-diameter"),
            catheter_req_id: compat_tri_unit(record, "compatibility_catheter_req_inner-diameter"),
            guide_min_id: compat_tri_unit(
                record,
                "compatibility_guide_or_catheter_or_sheath_min_inner-diameter",
            ),
        },
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compat_bound_parsing() {
        assert_eq!(CompatBound::parse("0.021"), Some(CompatBound::Single(0.021)));
        assert_eq!(
            CompatBound::parse("0.017-0.021"),
            Some(CompatBound::Range(0.017, 0.021))
        );
        assert_eq!(CompatBound::parse(""), None);
        assert_eq!(CompatBound::parse("  "), None);
        assert_eq!(CompatBound::parse("n/a"), None);
    }

    #[test]
    fn test_conical_level_mapping() {
        let mut d = test_support::device("1", "A", "L0", FitLogic::Math);
        assert_eq!(d.conical_level(), Some(0));
        d.conical_category = "L5".into();
        assert_eq!(d.conical_level(), Some(5));
        d.conical_category = "LW".into();
        assert_eq!(d.conical_level(), Some(6));
        d.conical_category = "unknown".into();
        assert_eq!(d.conical_level(), None);
    }

    #[test]
    fn test_parse_catalog_record_flat_fields() {
        let record = serde_json::json!({
            "product_name": "Vecta 46",
            "device_name": "Vecta 46 0.046in",
            "manufacturer": "TestMed",
            "category_type": "intermediate_catheter",
            "conical_category": "L2",
            "logic_category": "catheter intermediate_catheter",
            "fit_logic": "math",
            "specification_inner-diameter_in": 0.046,
            "specification_outer-diameter-distal_in": "0.058",
            "specification_length_cm": 132,
            "compatibility_catheter_req_inner-diameter_in": "0.017-0.021",
        });
        let device = parse_catalog_record("dev1", &record).unwrap();
        assert_eq!(device.specs.inner_diameter.inches, Some(0.046));
        assert_eq!(device.specs.outer_diameter_distal.inches, Some(0.058));
        assert_eq!(device.specs.length_cm, Some(132.0));
        assert_eq!(
            device.compat.catheter_req_id.bound(DiameterUnit::Inches),
            Some(CompatBound::Range(0.017, 0.021))
        );
        assert_eq!(device.compat.wire_max_od.bound(DiameterUnit::Inches), None);
    }

    #[test]
    fn test_request_catalog_overlay_isolation() {
        let store = Arc::new(DeviceStore::from_devices(vec![test_support::device(
            "base1",
            "Base Product",
            "L1",
            FitLogic::Math,
        )]));

        let request = RequestCatalog::new(store.clone());
        request.insert_synthetic(test_support::device("syn1", "Generic Wire", "LW", FitLogic::Math));

        assert!(request.get("syn1").is_some());
        assert!(request.get("base1").is_some());
        // The shared snapshot never sees the synthetic record.
        assert!(store.get("syn1").is_none());

        let second = RequestCatalog::new(store);
        assert!(second.get("syn1").is_none());
    }

    #[test]
    fn test_groups_collect_variants() {
        let store = DeviceStore::from_devices(vec![
            test_support::device("a1", "Trevo NXT", "L4", FitLogic::Compat),
            test_support::device("a2", "Trevo NXT", "L4", FitLogic::Compat),
            test_support::device("b1", "Headway 21", "L3", FitLogic::Math),
        ]);
        let group = store.group("Trevo NXT").unwrap();
        assert_eq!(group.ids.len(), 2);
        assert_eq!(group.conical_category, "L4");
    }
}
