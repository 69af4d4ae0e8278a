//! Declarative payload registry.
//!
//! For each event type (optionally narrowed by source) the registry names
//! the dotted field paths its payload record exposes. Configuration UIs
//! call [`PayloadRegistry::event_token_options`] to enumerate what a user
//! can interpolate into an action; nothing here relies on runtime type
//! introspection.

use crate::payloads::types;
use crate::pattern::pattern_matches;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenOption {
    /// The literal token, e.g. `$EVENT_PAYLOAD[count]`.
    pub token: String,
    pub label: String,
}

struct RegistryEntry {
    event_type: &'static str,
    source: Option<&'static str>,
    paths: &'static [&'static str],
}

pub struct PayloadRegistry {
    entries: Vec<RegistryEntry>,
}

impl Default for PayloadRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PayloadRegistry {
    /// Registry covering every event type the engine emits.
    pub fn builtin() -> Self {
        let entries = vec![
            entry(types::PULL_IDS_FETCHED, &["count"]),
            entry(types::PULL_FETCH_DETAIL_START, &["id"]),
            entry(types::PULL_FETCH_DETAIL_SUCCESS, &["id", "data"]),
            entry(types::PULL_STORE_SUCCESS, &["id", "data"]),
            entry(types::PULL_ERROR, &["resource", "id", "message"]),
            entry(types::PULL_GROUP_COMPLETE, &["count", "error_count"]),
            entry(types::PULL_GROUP_ERROR, &["reason"]),
            entry(types::PUSH_SCAN_COMPLETE, &["changes"]),
            entry(
                types::PUSH_ITEM_START,
                &["change_id", "entity_id", "change_type"],
            ),
            entry(
                types::PUSH_ITEM_SUCCESS,
                &["change_id", "entity_id", "change_type"],
            ),
            entry(types::PUSH_ITEM_ERROR, &["change_id", "message"]),
            entry(types::PUSH_COMPLETE, &["error_count"]),
            entry(types::WEBHOOK_RECEIVED, &["route", "entity_id"]),
            entry(types::WEBHOOK_REJECTED, &["route", "reason"]),
            entry(types::JOB_TRIGGERED, &["job_id", "name", "sync_type"]),
            entry(types::JOB_COMPLETED, &["job_id", "name", "sync_type"]),
            entry(types::JOB_FAILED, &["job_id", "name", "attempt", "message"]),
            entry(types::ACTION_ERROR, &["entry", "index", "message"]),
        ];
        Self { entries }
    }

    /// Every token selectable for an (event type, source) pair: the fixed
    /// envelope tokens, one `$EVENT_PAYLOAD[path]` per registered payload
    /// field, and the free-form custom option.
    pub fn event_token_options(&self, event_type: &str, source: &str) -> Vec<TokenOption> {
        let mut out = vec![
            opt("$EVENT_TYPE", "event type"),
            opt("$EVENT_SOURCE", "event source"),
            opt("$EVENT_JSON", "full event as JSON"),
            opt("$EVENT_PAYLOAD_JSON", "payload as JSON"),
            opt("$EVENT_PAYLOAD", "payload, default text form"),
        ];
        for e in &self.entries {
            let type_ok = pattern_matches(e.event_type, event_type, source)
                || e.event_type == event_type;
            let source_ok = e.source.map_or(true, |s| s == source);
            if type_ok && source_ok {
                for path in e.paths {
                    out.push(TokenOption {
                        token: format!("$EVENT_PAYLOAD[{path}]"),
                        label: format!("payload field `{path}`"),
                    });
                }
            }
        }
        out.push(opt("custom", "free-form text with tokens"));
        out
    }
}

fn entry(event_type: &'static str, paths: &'static [&'static str]) -> RegistryEntry {
    RegistryEntry {
        event_type,
        source: None,
        paths,
    }
}

fn opt(token: &str, label: &str) -> TokenOption {
    TokenOption {
        token: token.to_string(),
        label: label.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_include_registered_paths() {
        let reg = PayloadRegistry::builtin();
        let opts = reg.event_token_options(types::PULL_GROUP_COMPLETE, "accounts");
        let tokens: Vec<&str> = opts.iter().map(|o| o.token.as_str()).collect();
        assert!(tokens.contains(&"$EVENT_TYPE"));
        assert!(tokens.contains(&"$EVENT_PAYLOAD[count]"));
        assert!(tokens.contains(&"$EVENT_PAYLOAD[error_count]"));
        assert!(tokens.contains(&"custom"));
    }

    #[test]
    fn unknown_event_still_offers_envelope_tokens() {
        let reg = PayloadRegistry::builtin();
        let opts = reg.event_token_options("nobody.knows", "x");
        assert!(opts.iter().any(|o| o.token == "$EVENT_JSON"));
        assert!(!opts.iter().any(|o| o.token.starts_with("$EVENT_PAYLOAD[")));
    }
}
