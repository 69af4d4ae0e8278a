use crate::config::{Action, ActionBinding};
use crate::tokens::interpolate;
use bms_events::payloads::{types, ActionError};
use bms_events::{pattern_matches, Event, EventBus, Listener, PayloadRegistry, TokenOption};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ActionErr {
    #[error("exec action failed: {0}")]
    Exec(String),

    #[error("db action failed: {0}")]
    Db(#[from] bms_db::DbError),

    #[error("api action failed: {0}")]
    Api(String),
}

/// Executes configured actions in response to bus events. One instance per
/// process, subscribed to `*`.
pub struct ActionEngine {
    bindings: RwLock<Vec<ActionBinding>>,
    registry: PayloadRegistry,
    db: Option<bms_db::Db>,
    http: reqwest::Client,
    bus: EventBus,
}

impl ActionEngine {
    pub fn new(bus: EventBus, db: Option<bms_db::Db>, bindings: Vec<ActionBinding>) -> Arc<Self> {
        Arc::new(Self {
            bindings: RwLock::new(bindings),
            registry: PayloadRegistry::builtin(),
            db,
            http: reqwest::Client::new(),
            bus,
        })
    }

    /// Subscribe the engine to every event. Action-triggered events flow
    /// through the same per-listener FIFO as any other subscriber.
    pub fn attach(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let listener: Listener = Arc::new(move |event: Event| {
            let engine = Arc::clone(&engine);
            Box::pin(async move {
                engine.handle_event(&event).await;
            })
        });
        self.bus.subscribe("*", listener);
    }

    /// Swap the binding list. The change event is dispatched before this
    /// returns, so observers see config changes in order.
    pub fn update_bindings(&self, bindings: Vec<ActionBinding>) {
        let count = bindings.len();
        *self.bindings.write().unwrap() = bindings;
        self.bus.dispatch(Event::new(
            types::ACTION_CONFIG_CHANGED,
            "actions",
            serde_json::json!({ "bindings": count }),
        ));
    }

    /// Tokens a configuration UI may offer for an (event type, source).
    pub fn event_token_options(&self, event_type: &str, source: &str) -> Vec<TokenOption> {
        self.registry.event_token_options(event_type, source)
    }

    /// Run every binding the event matches. Within one binding, actions
    /// run in order; a failure is logged and reported on the bus, and the
    /// remaining actions still run unless the failed one says stop.
    pub async fn handle_event(&self, event: &Event) {
        // Never re-trigger on our own failure reports.
        if event.event_type == types::ACTION_ERROR {
            return;
        }

        let matching: Vec<ActionBinding> = {
            let bindings = self.bindings.read().unwrap();
            bindings
                .iter()
                .filter(|b| {
                    pattern_matches(&b.event, &event.event_type, &event.source)
                        && b.source.as_deref().map_or(true, |s| s == event.source)
                })
                .cloned()
                .collect()
        };

        for binding in matching {
            self.run_actions(&binding.run, event, &binding.event).await;
        }
    }

    /// Run an explicit action list against an event — the post-run hook
    /// for scheduled jobs, and the body of `handle_event`. Failures are
    /// reported on the bus; later actions still run unless the failed one
    /// says stop.
    pub async fn run_actions(&self, actions: &[Action], event: &Event, entry: &str) {
        for (index, action) in actions.iter().enumerate() {
            match self.execute(action, event).await {
                Ok(()) => {
                    info!(
                        event_type = %event.event_type,
                        entry,
                        index,
                        "action completed"
                    );
                }
                Err(e) => {
                    warn!(
                        event_type = %event.event_type,
                        entry,
                        index,
                        error = %e,
                        "action failed"
                    );
                    self.bus.dispatch(Event::new(
                        types::ACTION_ERROR,
                        "actions",
                        ActionError {
                            entry: entry.to_string(),
                            index,
                            message: e.to_string(),
                        },
                    ));
                    if action.stop_on_error() {
                        break;
                    }
                }
            }
        }
    }

    async fn execute(&self, action: &Action, event: &Event) -> Result<(), ActionErr> {
        match action {
            Action::Exec {
                command,
                use_shell,
                args,
                ..
            } => self.execute_exec(command, *use_shell, args, event).await,
            Action::Db { function, .. } => self.execute_db(function).await,
            Action::Api {
                endpoint,
                method,
                data,
                ..
            } => self.execute_api(endpoint, method.as_deref(), data, event).await,
        }
    }

    async fn execute_exec(
        &self,
        command: &str,
        use_shell: bool,
        args: &[String],
        event: &Event,
    ) -> Result<(), ActionErr> {
        let command = interpolate(command, event);
        let output = if use_shell {
            shell_command(&command)
                .output()
                .await
                .map_err(|e| ActionErr::Exec(e.to_string()))?
        } else {
            let args: Vec<String> = args.iter().map(|a| interpolate(a, event)).collect();
            tokio::process::Command::new(&command)
                .args(&args)
                .output()
                .await
                .map_err(|e| ActionErr::Exec(e.to_string()))?
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ActionErr::Exec(format!(
                "exit {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn execute_db(&self, function: &str) -> Result<(), ActionErr> {
        let db = self.db.as_ref().ok_or_else(|| {
            ActionErr::Db(bms_db::DbError::Config(
                "db actions require a connected store".into(),
            ))
        })?;
        db.exec(function, &[]).await?;
        Ok(())
    }

    async fn execute_api(
        &self,
        endpoint: &str,
        method: Option<&str>,
        data: &BTreeMap<String, String>,
        event: &Event,
    ) -> Result<(), ActionErr> {
        let endpoint = interpolate(endpoint, event);
        let method = method.unwrap_or("GET").to_ascii_uppercase();
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| ActionErr::Api(format!("bad method {method}")))?;

        let data: BTreeMap<String, String> = data
            .iter()
            .map(|(k, v)| (k.clone(), interpolate(v, event)))
            .collect();

        let mut req = self.http.request(method.clone(), &endpoint);
        if !data.is_empty() {
            req = if method == reqwest::Method::GET {
                req.query(&data)
            } else {
                req.json(&data)
            };
        }

        let resp = req.send().await.map_err(|e| ActionErr::Api(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ActionErr::Api(format!("status {}", resp.status())));
        }
        Ok(())
    }
}

fn shell_command(command: &str) -> tokio::process::Command {
    #[cfg(windows)]
    {
        let mut cmd = tokio::process::Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}
