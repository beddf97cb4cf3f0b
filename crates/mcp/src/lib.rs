//! MCP server for commitstreak over stdio, newline-delimited JSON-RPC
//! (protocol 2024-11-05). Blocking and single-threaded; tool calls go
//! straight to the [`SyncEngine`].

pub mod tools;

use std::io::{BufRead, Write};
use std::sync::Arc;

use commitstreak_engine::{level_for, milestone, SyncEngine};
use serde_json::{json, Value};
use tools::UserInput;
use tracing::{debug, warn};

/// Run the MCP server, blocking until stdin is closed.
///
/// Tools that take no `user_id` act on `default_user`.
pub fn run_mcp_server(engine: Arc<SyncEngine>, default_user: &str) -> anyhow::Result<()> {
    let server = McpServer::new(engine, default_user);
    server.run_stdio()
}

struct McpServer {
    engine: Arc<SyncEngine>,
    default_user: String,
}

impl McpServer {
    fn new(engine: Arc<SyncEngine>, default_user: &str) -> Self {
        Self {
            engine,
            default_user: default_user.to_string(),
        }
    }

    fn run_stdio(&self) -> anyhow::Result<()> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        let mut out = std::io::BufWriter::new(stdout.lock());

        for line in stdin.lock().lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_message(&line) {
                writeln!(out, "{response}")?;
                out.flush()?;
            }
        }
        Ok(())
    }

    /// Returns `Some(response_json)` for requests and `None` for
    /// notifications.
    fn handle_message(&self, raw: &str) -> Option<String> {
        let msg: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to parse message");
                return None;
            }
        };

        let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let id = msg.get("id").cloned()?;
        debug!(method, "request");

        let response = match method {
            "initialize" => self.handle_initialize(&id),
            "tools/list" => self.handle_tools_list(&id),
            "tools/call" => {
                let params = msg.get("params").cloned().unwrap_or(json!({}));
                self.handle_tools_call(&id, &params)
            }
            other => {
                warn!(method = other, "unknown method");
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": -32601,
                        "message": format!("Method not found: {other}")
                    }
                })
            }
        };

        Some(response.to_string())
    }

    fn handle_initialize(&self, id: &Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "commitstreak", "version": env!("CARGO_PKG_VERSION") }
            }
        })
    }

    fn handle_tools_list(&self, id: &Value) -> Value {
        let user_schema = json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string", "description": "Local user id (defaults to the server's user)" }
            }
        });
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "tools": [
                    {
                        "name": "streak_sync",
                        "description": "Fetch commits from GitHub, recompute the streak and award new badges",
                        "inputSchema": user_schema
                    },
                    {
                        "name": "streak_snapshot",
                        "description": "Last stored streak snapshot with today's status",
                        "inputSchema": user_schema
                    },
                    {
                        "name": "streak_badges",
                        "description": "Earned badges and the next one on the ladder",
                        "inputSchema": user_schema
                    },
                    {
                        "name": "streak_level",
                        "description": "Level and progress derived from the all-time commit count",
                        "inputSchema": user_schema
                    }
                ]
            }
        })
    }

    fn handle_tools_call(&self, id: &Value, params: &Value) -> Value {
        let name = params
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or("");
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        let result = self.user_for(name, &arguments).and_then(|user| match name {
            "streak_sync" => self.call_sync(&user),
            "streak_snapshot" => self.call_snapshot(&user),
            "streak_badges" => self.call_badges(&user),
            "streak_level" => self.call_level(&user),
            other => Err(format!("Unknown tool: {other}")),
        });

        let (text, is_error) = match result {
            Ok(text) => (text, false),
            Err(msg) => (msg, true),
        };
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "content": [{ "type": "text", "text": text }],
                "isError": is_error
            }
        })
    }

    fn user_for(&self, tool: &str, arguments: &Value) -> Result<String, String> {
        let input: UserInput = serde_json::from_value(arguments.clone())
            .map_err(|e| format!("Invalid arguments for {tool}: {e}"))?;
        Ok(input.user_id.unwrap_or_else(|| self.default_user.clone()))
    }

    fn call_sync(&self, user: &str) -> Result<String, String> {
        let report = self.engine.sync(user).map_err(|e| e.to_string())?;
        serde_json::to_string(&report).map_err(|e| e.to_string())
    }

    fn call_snapshot(&self, user: &str) -> Result<String, String> {
        let snapshot = self.engine.snapshot(user).map_err(|e| e.to_string())?;
        let today = self.engine.today();
        let body = json!({
            "today": today,
            "status": snapshot.status(today),
            "effective_current_streak": snapshot.effective_current_streak(today),
            "has_committed_today": snapshot.has_committed_today(today),
            "snapshot": snapshot,
        });
        Ok(body.to_string())
    }

    fn call_badges(&self, user: &str) -> Result<String, String> {
        let ledger = self.engine.badges(user).map_err(|e| e.to_string())?;
        let snapshot = self.engine.snapshot(user).map_err(|e| e.to_string())?;
        let earned: Vec<Value> = ledger
            .iter()
            .map(|id| match milestone::badge(id) {
                Some(badge) => json!(badge),
                None => json!({ "id": id }),
            })
            .collect();
        let body = json!({
            "earned": earned,
            "next": milestone::next_badge(snapshot.longest_streak),
        });
        Ok(body.to_string())
    }

    fn call_level(&self, user: &str) -> Result<String, String> {
        let snapshot = self.engine.snapshot(user).map_err(|e| e.to_string())?;
        let progress = level_for(snapshot.total_commits);
        let body = json!({
            "total_commits": snapshot.total_commits,
            "level": progress.level,
            "into_level": progress.into_level,
            "level_span": progress.level_span,
            "next_level_at": progress.next_level_at,
            "percent": progress.percent(),
        });
        Ok(body.to_string())
    }
}
