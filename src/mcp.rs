//! Model Context Protocol front end.
//!
//! `POST /mcp` takes one JSON-RPC 2.0 message. `initialize`, `ping`,
//! `tools/list` and `tools/call` are answered; notifications get `202`.
//! Every tool is one of the HTTP routes, called with its arguments as the
//! query string, and its text content is that route's JSON body.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;

use crate::server::{self, AppState};
use crate::version;

const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

const INSTANCE_ID: Arg = ("instanceId", "string", "Id of a loaded instance.");
const CLASS_NAME: Arg = (
    "className",
    "string",
    "Class as a descriptor (`Lcom/example/Main;`) or Java name (`com.example.Main`).",
);
const METHOD_NAME: Arg = (
    "methodName",
    "string",
    "Full JVM method signature, e.g. `Lcom/example/Main;->run(Ljava/lang/String;I)V`.",
);

/// Name, JSON type and description of one required argument.
type Arg = (&'static str, &'static str, &'static str);

struct Tool {
    name: &'static str,
    description: &'static str,
    args: &'static [Arg],
}

const TOOLS: &[Tool] = &[
    Tool { name: "health", description: "Health check; returns the daemon base URL.", args: &[] },
    Tool { name: "version", description: "Build version of the daemon.", args: &[] },
    Tool { name: "instances", description: "List loaded instances.", args: &[] },
    Tool {
        name: "load",
        description: "Load a single APK, DEX, JAR or class file as a new instance.",
        args: &[INSTANCE_ID, ("filePath", "string", "Full path of the file.")],
    },
    Tool {
        name: "load_dir",
        description: "Load every APK, DEX, JAR and class file under a directory as one instance.",
        args: &[INSTANCE_ID, ("dirPath", "string", "Full path of the directory.")],
    },
    Tool { name: "unload", description: "Unload an instance.", args: &[INSTANCE_ID] },
    Tool { name: "unload_all", description: "Unload every instance.", args: &[] },
    Tool { name: "get_manifest", description: "Decoded AndroidManifest.xml text.", args: &[INSTANCE_ID] },
    Tool {
        name: "get_all_exported_activities",
        description: "Exported activity names from the manifest.",
        args: &[INSTANCE_ID],
    },
    Tool {
        name: "get_all_exported_services",
        description: "Exported service names from the manifest.",
        args: &[INSTANCE_ID],
    },
    Tool {
        name: "get_all_exported_receivers",
        description: "Exported receiver names from the manifest.",
        args: &[INSTANCE_ID],
    },
    Tool {
        name: "get_all_exported_providers",
        description: "Exported provider names from the manifest.",
        args: &[INSTANCE_ID],
    },
    Tool {
        name: "get_method_decompiled_code",
        description: "Java source of one method.",
        args: &[INSTANCE_ID, METHOD_NAME],
    },
    Tool {
        name: "get_class_decompiled_code",
        description: "Java source of a class.",
        args: &[INSTANCE_ID, CLASS_NAME],
    },
    Tool { name: "get_class_smali_code", description: "Smali listing of a class.", args: &[INSTANCE_ID, CLASS_NAME] },
    Tool { name: "get_superclass", description: "Superclass of a class.", args: &[INSTANCE_ID, CLASS_NAME] },
    Tool { name: "get_interfaces", description: "Interfaces a class implements.", args: &[INSTANCE_ID, CLASS_NAME] },
    Tool { name: "get_class_methods", description: "Methods declared by a class.", args: &[INSTANCE_ID, CLASS_NAME] },
    Tool { name: "get_class_fields", description: "Fields declared by a class.", args: &[INSTANCE_ID, CLASS_NAME] },
    Tool {
        name: "get_method_callers",
        description: "Methods that call the given method.",
        args: &[INSTANCE_ID, METHOD_NAME],
    },
    Tool {
        name: "get_class_callers",
        description: "Methods and classes that reference the given class.",
        args: &[INSTANCE_ID, CLASS_NAME],
    },
    Tool {
        name: "get_method_overrides",
        description: "Methods the given method overrides or is overridden by.",
        args: &[INSTANCE_ID, METHOD_NAME],
    },
    Tool {
        name: "update_max_instance_count",
        description: "Change how many instances may be loaded at once. Large values use a lot of memory.",
        args: &[("count", "integer", "New limit, at least 1.")],
    },
];

impl Tool {
    fn describe(&self) -> Value {
        let properties: Map<String, Value> = self
            .args
            .iter()
            .map(|(name, ty, description)| (name.to_string(), json!({ "type": ty, "description": description })))
            .collect();
        let required: Vec<&str> = self.args.iter().map(|(name, _, _)| *name).collect();
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": { "type": "object", "properties": properties, "required": required },
        })
    }
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    jsonrpc: Option<String>,
    /// Absent for notifications.
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn rpc_error(status: StatusCode, id: Value, err: RpcError) -> Response {
    let body = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": err.code, "message": err.message },
    });
    (status, Json(body)).into_response()
}

pub async fn handle_mcp(State(state): State<AppState>, body: Bytes) -> Response {
    if body.iter().all(u8::is_ascii_whitespace) {
        return rpc_error(StatusCode::BAD_REQUEST, Value::Null, RpcError::new(PARSE_ERROR, "Request body is empty"));
    }
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            warn!("Rejecting MCP request: {err}");
            return rpc_error(
                StatusCode::BAD_REQUEST,
                Value::Null,
                RpcError::new(PARSE_ERROR, format!("Failed to parse JSON request body: {err}")),
            );
        }
    };
    let Some(id) = request.id.clone() else {
        debug!("MCP notification {}", request.method);
        return StatusCode::ACCEPTED.into_response();
    };
    if request.jsonrpc.as_deref() != Some("2.0") {
        return rpc_error(StatusCode::OK, id, RpcError::new(INVALID_REQUEST, "jsonrpc must be \"2.0\""));
    }

    debug!("MCP {}", request.method);
    match respond(state, request).await {
        Ok(result) => Json(json!({ "jsonrpc": "2.0", "id": id, "result": result })).into_response(),
        Err(err) => rpc_error(StatusCode::OK, id, err),
    }
}

async fn respond(state: AppState, request: RpcRequest) -> Result<Value, RpcError> {
    match request.method.as_str() {
        "initialize" => {
            let requested = request.params.get("protocolVersion").and_then(Value::as_str);
            Ok(json!({
                "protocolVersion": requested.unwrap_or(PROTOCOL_VERSION),
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": { "name": "dex-daemon", "version": version::build_version() },
            }))
        }
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": TOOLS.iter().map(Tool::describe).collect::<Vec<_>>() })),
        "tools/call" => {
            let call: CallParams = serde_json::from_value(request.params)
                .map_err(|err| RpcError::new(INVALID_PARAMS, format!("Invalid tools/call params: {err}")))?;
            call_tool(state, call).await
        }
        other => Err(RpcError::new(METHOD_NOT_FOUND, format!("Method not found: {other}"))),
    }
}

async fn call_tool(state: AppState, call: CallParams) -> Result<Value, RpcError> {
    if !TOOLS.iter().any(|tool| tool.name == call.name) {
        return Err(RpcError::new(INVALID_PARAMS, format!("Unknown tool: {}", call.name)));
    }
    let params = query_params(call.arguments)?;
    let Some(outcome) = server::dispatch(state, &call.name, params).await else {
        return Err(RpcError::new(INVALID_PARAMS, format!("Unknown tool: {}", call.name)));
    };
    let (body, is_error) = match outcome {
        Ok(Json(body)) => (body, false),
        Err(err) => (json!({ "error": err.to_string() }), true),
    };
    Ok(json!({
        "content": [{ "type": "text", "text": body.to_string() }],
        "isError": is_error,
    }))
}

/// Tool arguments as the string query parameters the routes read.
fn query_params(arguments: Map<String, Value>) -> Result<HashMap<String, String>, RpcError> {
    arguments
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(RpcError::new(
                        INVALID_PARAMS,
                        format!("Argument `{key}` must be a string or number, got {other}"),
                    ));
                }
            };
            Ok((key, text))
        })
        .collect()
}
