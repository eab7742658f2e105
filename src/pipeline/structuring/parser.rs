use super::StructuringError;

/// Slice out the first-`{`-to-last-`}` span of a model response.
///
/// Greedy and not nesting-aware: any chatter before the first brace and after
/// the last one is dropped, everything in between is kept as-is. Two separate
/// objects in one response therefore yield an unparseable span.
pub fn extract_json_block(raw: &str) -> Result<&str, StructuringError> {
    let start = raw.find('{').ok_or(StructuringError::NoJsonBlock)?;
    let end = raw.rfind('}').ok_or(StructuringError::NoJsonBlock)?;
    if end < start {
        return Err(StructuringError::NoJsonBlock);
    }
    Ok(&raw[start..=end])
}

/// Extract and parse the JSON object embedded in a model response.
pub fn parse_json_block(raw: &str) -> Result<serde_json::Value, StructuringError> {
    let block = extract_json_block(raw)?;
    serde_json::from_str(block).map_err(|e| StructuringError::JsonParsing(e.to_string()))
}
