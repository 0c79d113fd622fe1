//! JSON decoding for Riot API response bodies with readable error locations.

use anyhow::Result;

/// Decode `body`, reporting the JSON path, a short description of the type
/// mismatch and a snippet around the failing position on error.
pub fn parse_body<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let inner = err.inner();
        let (line, column) = (inner.line(), inner.column());
        let path = err.path().to_string();

        let message = inner.to_string();
        let suffix = format!(" at line {line} column {column}");
        let message = message.strip_suffix(&suffix).unwrap_or(&message);

        let mut report = String::new();
        if !path.is_empty() && path != "." {
            report.push_str(&format!("at '{path}': "));
        }
        report.push_str(&describe_mismatch(message));
        report.push_str(&format!(" (line {line} col {column})\n"));
        report.push_str(&snippet(body, line, column, 24));
        anyhow::anyhow!(report)
    })
}

/// Turn `invalid type: null, expected i32` into `expected i32, got null`.
fn describe_mismatch(message: &str) -> String {
    if let Some(rest) = message.strip_prefix("invalid type: ")
        && let Some((actual, expected)) = rest.split_once(", expected ")
    {
        return format!("expected {expected}, got {actual}");
    }
    message.to_string()
}

fn snippet(body: &str, line: usize, column: usize, width: usize) -> String {
    let text = body.lines().nth(line.saturating_sub(1)).unwrap_or("");
    if text.is_empty() {
        return "(empty line)".to_string();
    }

    let at = column.saturating_sub(1).min(text.len());
    let start = floor_char_boundary(text, at.saturating_sub(width / 2));
    let end = floor_char_boundary(text, (at + width / 2).min(text.len()));
    let marker = " ".repeat(at - start) + "^";
    format!("...{}...\n   {marker}", &text[start..end])
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
