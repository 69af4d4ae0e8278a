use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_true() -> bool {
    true
}

/// The three action shapes, discriminated by `type`. Parsed and validated
/// at config load; executed by a dispatch over the tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    /// Host command. With `use_shell` the command string goes to the
    /// shell verbatim; without it, `command` + `args` form an argv and no
    /// shell expansion happens.
    Exec {
        command: String,
        #[serde(default = "default_true")]
        use_shell: bool,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        stop_on_error: bool,
    },
    /// Stored routine invoked through the storage layer; `function` must
    /// resolve to a named command in the SQL bundle.
    Db {
        function: String,
        #[serde(default)]
        stop_on_error: bool,
    },
    /// HTTP call. `data` becomes the query string for GET and the JSON
    /// body otherwise.
    Api {
        endpoint: String,
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        data: BTreeMap<String, String>,
        #[serde(default)]
        stop_on_error: bool,
    },
}

impl Action {
    pub fn stop_on_error(&self) -> bool {
        match self {
            Action::Exec { stop_on_error, .. }
            | Action::Db { stop_on_error, .. }
            | Action::Api { stop_on_error, .. } => *stop_on_error,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Action::Exec {
                command,
                use_shell,
                args,
                ..
            } => {
                if command.trim().is_empty() {
                    return Err("exec action requires a command".into());
                }
                if *use_shell && !args.is_empty() {
                    return Err("exec action with use_shell takes no argv list".into());
                }
                Ok(())
            }
            Action::Db { function, .. } => {
                if function.trim().is_empty() {
                    return Err("db action requires a function".into());
                }
                if !function
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    return Err(format!("db function `{function}` is not a bare identifier"));
                }
                Ok(())
            }
            Action::Api {
                endpoint, method, ..
            } => {
                if endpoint.trim().is_empty() {
                    return Err("api action requires an endpoint".into());
                }
                if let Some(m) = method {
                    match m.to_ascii_uppercase().as_str() {
                        "GET" | "POST" | "PUT" | "PATCH" | "DELETE" => {}
                        other => return Err(format!("api action method `{other}` unsupported")),
                    }
                }
                Ok(())
            }
        }
    }
}

/// Binding of an event pattern (plus optional source narrowing) to an
/// ordered action list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionBinding {
    /// Event-type pattern, exact or wildcard.
    pub event: String,
    #[serde(default)]
    pub source: Option<String>,
    pub run: Vec<Action>,
}

/// Parse and validate a binding list from its config JSON.
pub fn parse_bindings(raw: &serde_json::Value) -> Result<Vec<ActionBinding>, String> {
    let bindings: Vec<ActionBinding> =
        serde_json::from_value(raw.clone()).map_err(|e| format!("action config: {e}"))?;
    for (i, b) in bindings.iter().enumerate() {
        if b.event.trim().is_empty() {
            return Err(format!("binding {i} has an empty event pattern"));
        }
        for (j, action) in b.run.iter().enumerate() {
            action
                .validate()
                .map_err(|e| format!("binding {i} action {j}: {e}"))?;
        }
    }
    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_all_three_shapes() {
        let raw = json!([
            {
                "event": "pull.complete",
                "source": "accounts",
                "run": [
                    {"type": "exec", "command": "notify-send done"},
                    {"type": "db", "function": "create_indexes"},
                    {"type": "api", "endpoint": "https://hooks.example.com/x",
                     "method": "POST", "data": {"msg": "$EVENT_TYPE"}}
                ]
            }
        ]);
        let bindings = parse_bindings(&raw).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].run.len(), 3);
        assert!(matches!(bindings[0].run[0], Action::Exec { use_shell: true, .. }));
    }

    #[test]
    fn rejects_invalid_actions() {
        assert!(parse_bindings(&json!([{"event": "x", "run": [{"type": "exec", "command": ""}]}]))
            .is_err());
        assert!(parse_bindings(
            &json!([{"event": "x", "run": [{"type": "db", "function": "drop table;"}]}])
        )
        .is_err());
        assert!(parse_bindings(
            &json!([{"event": "x", "run": [{"type": "api", "endpoint": "u", "method": "BREW"}]}])
        )
        .is_err());
        assert!(parse_bindings(&json!([{"event": "", "run": []}])).is_err());
    }

    #[test]
    fn shell_and_argv_modes_are_mutually_exclusive() {
        let bad = Action::Exec {
            command: "ls".into(),
            use_shell: true,
            args: vec!["-l".into()],
            stop_on_error: false,
        };
        assert!(bad.validate().is_err());

        let good = Action::Exec {
            command: "ls".into(),
            use_shell: false,
            args: vec!["-l".into()],
            stop_on_error: false,
        };
        assert!(good.validate().is_ok());
    }
}
