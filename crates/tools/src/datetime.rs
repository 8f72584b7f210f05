//! Current date/time tool — lets the model anchor "today", "tomorrow",
//! "next Monday" before calling calendar or task tools.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Offset, Utc};

use concierge_core::{Tool, ToolError, ToolOutcome};

pub struct CurrentDateTimeTool;

/// Parse `+05:30`, `-0800`, `Z` or `UTC`.
fn parse_offset(raw: &str) -> Result<FixedOffset, ToolError> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }
    raw.parse::<FixedOffset>()
        .map_err(|e| ToolError::InvalidArguments(format!("invalid utc_offset '{raw}': {e}")))
}

fn describe(now: DateTime<FixedOffset>) -> serde_json::Value {
    serde_json::json!({
        "iso8601": now.to_rfc3339(),
        "date": now.format("%Y-%m-%d").to_string(),
        "time": now.format("%H:%M:%S").to_string(),
        "weekday": now.format("%A").to_string(),
        "utc_offset": now.format("%:z").to_string(),
        "unix": now.timestamp(),
    })
}

#[async_trait]
impl Tool for CurrentDateTimeTool {
    fn name(&self) -> &str {
        "get_current_datetime"
    }

    fn description(&self) -> &str {
        "Get the current date, time and weekday. Use before interpreting relative dates like 'tomorrow' or 'next week'."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "utc_offset": {
                    "type": "string",
                    "description": "UTC offset of the user's timezone, e.g. '+05:30' or '-08:00' (default: UTC)"
                }
            }
        })
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        _context: Option<&serde_json::Value>,
    ) -> Result<ToolOutcome, ToolError> {
        let offset = match input.get("utc_offset").and_then(|v| v.as_str()) {
            Some(raw) => parse_offset(raw)?,
            None => Utc.fix(),
        };
        Ok(ToolOutcome::success(describe(Utc::now().with_timezone(&offset))))
    }
}
