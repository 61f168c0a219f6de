use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;

use super::jsonrpc::{
    JsonRpcRequest, JsonRpcResponse, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
use super::tools::{self, ToolCall};
use crate::api::FleetApi;

const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Serve MCP on the process's stdin/stdout
pub async fn serve_stdio(api: FleetApi) -> std::io::Result<()> {
    run(api, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve MCP over any line-oriented byte stream until the reader hits EOF.
///
/// Each `tools/call` runs on its own task; all replies go through a single
/// writer task so lines never interleave. Returns once every in-flight call
/// has been answered.
pub async fn run<R, W>(api: FleetApi, reader: R, writer: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
    let writer_task = tokio::spawn(write_responses(writer, rx));

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let request = match parse_request(&line) {
            Ok(request) => request,
            Err(response) => {
                let _ = tx.send(*response);
                continue;
            }
        };

        let Some(id) = request.id.clone() else {
            tracing::debug!(method = %request.method, "Received notification");
            continue;
        };

        tracing::debug!(method = %request.method, id = %id, "Received request");

        match request.method.as_str() {
            "tools/call" => {
                let (name, arguments) = match call_params(request.params) {
                    Ok(params) => params,
                    Err(message) => {
                        let _ = tx.send(JsonRpcResponse::failure(id, INVALID_PARAMS, message));
                        continue;
                    }
                };

                let call = match ToolCall::parse(&name, arguments) {
                    Ok(call) => call,
                    Err(message) => {
                        let _ = tx.send(JsonRpcResponse::failure(id, INVALID_PARAMS, message));
                        continue;
                    }
                };

                let api = api.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    tracing::info!(tool = %name, "Calling tool");
                    let result = call.execute(&api).await;
                    let value = serde_json::to_value(&result).unwrap_or_else(|_| json!({}));
                    let _ = tx.send(JsonRpcResponse::success(id, value));
                });
            }
            method => {
                let _ = tx.send(handle_method(id, method, request.params.as_ref()));
            }
        }
    }

    tracing::info!("Input closed, waiting for in-flight tool calls");
    drop(tx);
    writer_task
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
}

fn parse_request(line: &str) -> Result<JsonRpcRequest, Box<JsonRpcResponse>> {
    let value: Value = serde_json::from_str(line).map_err(|e| {
        tracing::warn!("Unparsable message: {}", e);
        Box::new(JsonRpcResponse::failure(
            Value::Null,
            PARSE_ERROR,
            format!("Parse error: {}", e),
        ))
    })?;

    let id = value.get("id").cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| {
        Box::new(JsonRpcResponse::failure(
            id,
            INVALID_REQUEST,
            format!("Invalid request: {}", e),
        ))
    })
}

fn call_params(params: Option<Value>) -> Result<(String, Option<Value>), String> {
    let mut params = match params {
        Some(Value::Object(map)) => map,
        _ => return Err("tools/call requires params with a tool name".to_string()),
    };

    let name = match params.remove("name") {
        Some(Value::String(name)) => name,
        _ => return Err("tools/call requires a string 'name'".to_string()),
    };

    Ok((name, params.remove("arguments")))
}

fn handle_method(id: Value, method: &str, params: Option<&Value>) -> JsonRpcResponse {
    match method {
        "initialize" => {
            let protocol_version = params
                .and_then(|p| p.get("protocolVersion"))
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_PROTOCOL_VERSION);

            JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": protocol_version,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": "tesla-mcp",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            )
        }
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => JsonRpcResponse::success(id, json!({ "tools": tools::definitions() })),
        other => JsonRpcResponse::failure(
            id,
            METHOD_NOT_FOUND,
            format!("Unknown method: {}", other),
        ),
    }
}

async fn write_responses<W>(
    writer: W,
    mut rx: mpsc::UnboundedReceiver<JsonRpcResponse>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);
    while let Some(response) = rx.recv().await {
        let line = serde_json::to_string(&response)?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}
