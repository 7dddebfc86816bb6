//! Provider response schema
//!
//! Providers answer with `{"metrics": ...}` (some deployments say `result`),
//! where the metrics object is either inline or a JSON document encoded as a
//! string. [`normalize`] is the only place that knows about the second
//! encoding; everything downstream sees a flat name -> value map.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};

use crate::error::ProviderError;

/// Flat metric map, keyed by the provider's metric names
pub type MetricMap = BTreeMap<String, f64>;

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    #[serde(alias = "result")]
    metrics: Option<MetricsPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MetricsPayload {
    Inline(Map<String, Value>),
    Encoded(String),
}

/// Decode a provider response body into a flat metric map
pub fn normalize(body: &str) -> Result<MetricMap, ProviderError> {
    let response: ProviderResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::InvalidBody(format!("not a metrics document: {}", e)))?;

    let object = match response.metrics {
        Some(MetricsPayload::Inline(object)) => object,
        Some(MetricsPayload::Encoded(text)) => serde_json::from_str(&text)
            .map_err(|e| ProviderError::InvalidBody(format!("metrics string: {}", e)))?,
        None => return Err(ProviderError::InvalidBody("no metrics field".to_string())),
    };

    let mut metrics = MetricMap::new();
    flatten(&object, &mut metrics);
    Ok(metrics)
}

/// Numbers (or numeric strings) by leaf key, visited level by level so a
/// value at a shallower depth wins over any nested one with the same name.
fn flatten(object: &Map<String, Value>, out: &mut MetricMap) {
    let mut level = VecDeque::from([object]);
    while let Some(object) = level.pop_front() {
        for (key, value) in object {
            let number = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                Value::Object(nested) => {
                    level.push_back(nested);
                    None
                }
                _ => None,
            };
            if let Some(number) = number.filter(|n| n.is_finite()) {
                out.entry(key.clone()).or_insert(number);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_metrics() {
        let metrics = normalize(r#"{"metrics": {"fmax_mhz": 125.5, "luts": "312"}}"#).unwrap();
        assert_eq!(metrics.get("fmax_mhz"), Some(&125.5));
        assert_eq!(metrics.get("luts"), Some(&312.0));
    }

    #[test]
    fn test_double_encoded_metrics() {
        let body = serde_json::json!({
            "status": "ok",
            "metrics": "{\"timing\": {\"critical_path_ns\": 4.2}, \"core_area_um2\": 1830.0}"
        })
        .to_string();

        let metrics = normalize(&body).unwrap();
        assert_eq!(metrics.get("critical_path_ns"), Some(&4.2));
        assert_eq!(metrics.get("core_area_um2"), Some(&1830.0));
    }

    #[test]
    fn test_result_alias_and_shallow_values_win() {
        let metrics =
            normalize(r#"{"result": {"score": 91, "detail": {"score": 10, "name": "x"}}}"#).unwrap();
        assert_eq!(metrics.get("score"), Some(&91.0));
        assert!(!metrics.contains_key("name"));
    }

    #[test]
    fn test_shallow_value_beats_earlier_deep_branch() {
        let metrics =
            normalize(r#"{"metrics": {"a": {"x": {"score": 5}}, "b": {"score": 91}}}"#).unwrap();
        assert_eq!(metrics.get("score"), Some(&91.0));
    }

    #[test]
    fn test_invalid_bodies() {
        assert!(matches!(
            normalize("<html>502</html>"),
            Err(ProviderError::InvalidBody(_))
        ));
        assert!(matches!(
            normalize(r#"{"status": "ok"}"#),
            Err(ProviderError::InvalidBody(_))
        ));
        assert!(matches!(
            normalize(r#"{"metrics": "not json"}"#),
            Err(ProviderError::InvalidBody(_))
        ));
    }
}
