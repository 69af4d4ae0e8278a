use bms_events::Event;
use serde_json::Value;

/// Expand `$EVENT_*` tokens in a template against the triggering event.
///
/// Recognized tokens: `$EVENT_TYPE`, `$EVENT_SOURCE`, `$EVENT_JSON`,
/// `$EVENT_PAYLOAD_JSON`, `$EVENT_PAYLOAD`, `$EVENT_PAYLOAD[dotted.path]`.
/// Unknown `$EVENT_…` tokens expand to the empty string. Leaves selected
/// by a path render in JSON-safe scalar form: strings bare, numbers and
/// booleans via their JSON text, null and missing as empty.
pub fn interpolate(template: &str, event: &Event) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find("$EVENT_") {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        let after = &rest["$EVENT_".len()..];
        let name_len = after
            .find(|c: char| !(c.is_ascii_uppercase() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..name_len];
        let mut consumed = "$EVENT_".len() + name_len;

        // Longest names first so PAYLOAD_JSON is not read as PAYLOAD.
        let replacement = match name {
            "TYPE" => event.event_type.clone(),
            "SOURCE" => event.source.clone(),
            "JSON" => serde_json::to_string(event).unwrap_or_default(),
            "PAYLOAD_JSON" => event.payload.to_string(),
            "PAYLOAD" => {
                if after[name_len..].starts_with('[') {
                    match after[name_len..].find(']') {
                        Some(close) => {
                            let path = &after[name_len + 1..name_len + close];
                            consumed += close + 1;
                            payload_path(&event.payload, path)
                        }
                        // Unterminated selector; treat as plain PAYLOAD.
                        None => payload_text(&event.payload),
                    }
                } else {
                    payload_text(&event.payload)
                }
            }
            _ => String::new(),
        };

        out.push_str(&replacement);
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    out
}

/// Payload's default textual representation.
fn payload_text(payload: &Value) -> String {
    match payload {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Dotted-path selection with JSON-safe scalar rendering of the leaf.
fn payload_path(payload: &Value, path: &str) -> String {
    let mut cur = payload;
    for seg in path.split('.') {
        cur = match cur.get(seg) {
            Some(v) => v,
            None => return String::new(),
        };
    }
    match cur {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event() -> Event {
        Event::new(
            "pull.group.complete",
            "accounts",
            json!({"count": 12, "error_count": 0, "nested": {"tag": "ok"}}),
        )
    }

    #[test]
    fn envelope_tokens() {
        let ev = event();
        assert_eq!(interpolate("$EVENT_TYPE", &ev), "pull.group.complete");
        assert_eq!(interpolate("$EVENT_SOURCE", &ev), "accounts");
        assert_eq!(
            interpolate("done: $EVENT_TYPE from $EVENT_SOURCE", &ev),
            "done: pull.group.complete from accounts"
        );
    }

    #[test]
    fn payload_tokens_and_paths() {
        let ev = event();
        assert_eq!(interpolate("$EVENT_PAYLOAD[count]", &ev), "12");
        assert_eq!(interpolate("$EVENT_PAYLOAD[nested.tag]", &ev), "ok");
        assert_eq!(interpolate("$EVENT_PAYLOAD[missing.path]", &ev), "");
        assert!(interpolate("$EVENT_PAYLOAD_JSON", &ev).contains("\"count\":12"));
    }

    #[test]
    fn payload_json_not_misread_as_payload() {
        let ev = event();
        let s = interpolate("$EVENT_PAYLOAD_JSON", &ev);
        assert!(s.starts_with('{'), "got: {s}");
    }

    #[test]
    fn unknown_tokens_expand_to_empty() {
        let ev = event();
        assert_eq!(interpolate("x$EVENT_NOPEy", &ev), "xy");
        assert_eq!(interpolate("$EVENT_", &ev), "");
    }

    #[test]
    fn full_event_json_round_trips() {
        let ev = event();
        let s = interpolate("$EVENT_JSON", &ev);
        let v: Value = serde_json::from_str(&s).unwrap();
        assert_eq!(v["type"], "pull.group.complete");
        assert_eq!(v["payload"]["count"], 12);
    }
}
