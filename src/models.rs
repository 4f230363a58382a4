use serde::{Deserialize, Serialize};

/// Manufacturer-table compatibility verdict for a device pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompatStatus {
    #[serde(rename = "pass")]
    Pass,
    #[serde(rename = "fail")]
    Fail,
    #[serde(rename = "NA")]
    Na,
}

impl CompatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompatStatus::Pass => "pass",
            CompatStatus::Fail => "fail",
            CompatStatus::Na => "NA",
        }
    }
}

/// Geometry grade for a single row or a diameter/length subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeoGrade {
    #[serde(rename = "pass")]
    Pass,
    #[serde(rename = "pass_with_warning")]
    PassWithWarning,
    #[serde(rename = "warning")]
    Warning,
    #[serde(rename = "fail")]
    Fail,
    #[serde(rename = "NA")]
    Na,
}

impl GeoGrade {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoGrade::Pass => "pass",
            GeoGrade::PassWithWarning => "pass_with_warning",
            GeoGrade::Warning => "warning",
            GeoGrade::Fail => "fail",
            GeoGrade::Na => "NA",
        }
    }

    /// True for pass and pass_with_warning.
    pub fn is_passing(&self) -> bool {
        matches!(self, GeoGrade::Pass | GeoGrade::PassWithWarning)
    }

    pub fn has_warning(&self) -> bool {
        matches!(self, GeoGrade::PassWithWarning | GeoGrade::Warning)
    }
}

/// The single reconciled verdict consumed by all downstream rollups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverallStatus {
    #[serde(rename = "pass")]
    Pass,
    #[serde(rename = "pass_with_warning")]
    PassWithWarning,
    #[serde(rename = "fail")]
    Fail,
    #[serde(rename = "NA")]
    Na,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Pass => "pass",
            OverallStatus::PassWithWarning => "pass_with_warning",
            OverallStatus::Fail => "fail",
            OverallStatus::Na => "NA",
        }
    }

    pub fn is_passing(&self) -> bool {
        matches!(self, OverallStatus::Pass | OverallStatus::PassWithWarning)
    }
}

/// Which rule produced the overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicType {
    #[serde(rename = "math")]
    Math,
    #[serde(rename = "compat")]
    Compat,
    #[serde(rename = "geometry_fallback")]
    GeometryFallback,
    #[serde(rename = "compat+length_fail")]
    CompatLengthFail,
    #[serde(rename = "compat+geometry_warning")]
    CompatGeometryWarning,
}

impl LogicType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicType::Math => "math",
            LogicType::Compat => "compat",
            LogicType::GeometryFallback => "geometry_fallback",
            LogicType::CompatLengthFail => "compat+length_fail",
            LogicType::CompatGeometryWarning => "compat+geometry_warning",
        }
    }
}

/// Token counts from a single LLM invocation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenTotals {
    pub fn add(&mut self, other: TokenTotals) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Request-level token accounting with a per-sub-agent log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageLog {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub sub_agent_calls: Vec<SubAgentUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentUsage {
    pub agent: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageLog {
    pub fn track(&mut self, agent: &str, usage: TokenTotals) {
        self.total_input_tokens += usage.input_tokens;
        self.total_output_tokens += usage.output_tokens;
        self.sub_agent_calls.push(SubAgentUsage {
            agent: agent.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        });
    }

    pub fn totals(&self) -> TokenTotals {
        TokenTotals {
            input_tokens: self.total_input_tokens,
            output_tokens: self.total_output_tokens,
        }
    }
}

/// One role/content entry in a conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMessage {
    pub role: String,
    pub content: String,
    pub timestamp: String,
}

/// Body of `POST /chat/stream`. Unknown fields are rejected at the wire
/// boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatRequest {
    pub uid: String,
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_serde_round_trip() {
        let json = serde_json::to_string(&GeoGrade::PassWithWarning).unwrap();
        assert_eq!(json, "\"pass_with_warning\"");
        let back: GeoGrade = serde_json::from_str(&json).unwrap();
        assert_eq!(back, GeoGrade::PassWithWarning);

        let na = serde_json::to_string(&CompatStatus::Na).unwrap();
        assert_eq!(na, "\"NA\"");
    }

    #[test]
    fn test_usage_log_accumulates() {
        let mut log = UsageLog::default();
        log.track(
            "intent_classifier",
            TokenTotals {
                input_tokens: 100,
                output_tokens: 20,
            },
        );
        log.track(
            "chain_engine",
            TokenTotals {
                input_tokens: 500,
                output_tokens: 80,
            },
        );
        assert_eq!(log.total_input_tokens, 600);
        assert_eq!(log.total_output_tokens, 100);
        assert_eq!(log.sub_agent_calls.len(), 2);
    }
}
