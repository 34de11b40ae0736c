use std::collections::HashMap;

/// Parsed form of the structured-output trailer (§6): the fields a parent
/// run actually consumes, already typed instead of raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailerResult {
    pub success: bool,
    pub duration_seconds: f64,
    pub context: HashMap<String, String>,
    pub error: Option<String>,
}

/// Extracts the structured-output trailer from a command's captured
/// output: the last non-empty line, if (and only if) it parses as JSON.
/// Anything before it is treated as human-readable log noise.
pub fn extract_trailer(output: &str) -> Option<serde_json::Value> {
    let last_line = output.lines().rev().find(|l| !l.trim().is_empty())?;
    serde_json::from_str(last_line.trim()).ok()
}

/// Resolves a command's result from its captured output and exit code.
///
/// If the trailer is present and carries a boolean `success` field, its
/// fields win outright — `success` overrides the exit code per §8 property
/// 8. If the trailer is absent or doesn't parse as a result object, the
/// result is synthesized from the exit code alone with no context.
pub fn resolve_trailer(output: &str, exit_code: i32) -> TrailerResult {
    extract_trailer(output)
        .and_then(parse_trailer_fields)
        .unwrap_or(TrailerResult {
            success: exit_code == 0,
            duration_seconds: 0.0,
            context: HashMap::new(),
            error: None,
        })
}

fn parse_trailer_fields(value: serde_json::Value) -> Option<TrailerResult> {
    let success = value.get("success")?.as_bool()?;
    let duration_seconds = value
        .get("duration_seconds")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    let context = value
        .get("context")
        .and_then(|v| v.as_object())
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();
    let error = value.get("error").and_then(|v| v.as_str()).map(String::from);
    Some(TrailerResult {
        success,
        duration_seconds,
        context,
        error,
    })
}

/// Projects a caller-supplied allow-list of context keys out of a parsed
/// result's context map. Unlisted keys are discarded (§6 point 5).
pub fn project_context(context: &HashMap<String, String>, allow_list: &[String]) -> HashMap<String, String> {
    context
        .iter()
        .filter(|(k, _)| allow_list.iter().any(|allowed| allowed == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
