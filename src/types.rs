use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Behaviour when a pipeline is fired while one of its runs is still active.
///
/// - `Queue`: keep the fire and start a fresh run when the current one
///   finishes (default). Up to `queue_length` fires are kept; the oldest is
///   dropped on overflow.
/// - `Coalesce`: keep only the most recent pending fire.
///
/// In both modes the active run is never interrupted and never doubled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapBehaviour {
    Queue,
    Coalesce,
}

impl Default for OverlapBehaviour {
    fn default() -> Self {
        OverlapBehaviour::Queue
    }
}

impl FromStr for OverlapBehaviour {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queue" => Ok(OverlapBehaviour::Queue),
            "coalesce" => Ok(OverlapBehaviour::Coalesce),
            other => Err(format!(
                "invalid overlap behaviour: {other} (expected \"queue\" or \"coalesce\")"
            )),
        }
    }
}

/// Parse a short duration string such as `"500ms"`, `"30s"`, `"5m"` or `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit: u64 = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, h, or d",
                unit
            ));
        }
    };

    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}
