use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use crate::api::FleetApi;
use crate::error::ApiError;
use crate::models::TelemetryQuery;

/// A tool advertised in `tools/list`
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// A single content block of a tool result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

/// Result of `tools/call`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallResult {
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl CallResult {
    fn json(value: &Value) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        Self {
            content: vec![ContentBlock::Text { text }],
            is_error: false,
        }
    }

    fn error(err: &ApiError) -> Self {
        Self {
            content: vec![ContentBlock::Text {
                text: err.to_string(),
            }],
            is_error: true,
        }
    }
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Every tool this server exposes
pub fn definitions() -> Vec<ToolDefinition> {
    let vehicle_id = json!({"type": "string", "description": "Vehicle id from get_vehicles"});
    let site_id = json!({"type": "string", "description": "Energy site id from get_solar_systems"});
    let command = json!({"type": "string", "description": "Command name, e.g. honk_horn"});
    let parameters = json!({"type": "object", "description": "Command parameters"});

    vec![
        ToolDefinition {
            name: "get_vehicles",
            description: "Get list of all vehicles.",
            input_schema: object_schema(json!({}), &[]),
        },
        ToolDefinition {
            name: "get_vehicle",
            description: "Get detailed information about a specific vehicle.",
            input_schema: object_schema(json!({ "vehicle_id": vehicle_id }), &["vehicle_id"]),
        },
        ToolDefinition {
            name: "send_command",
            description: "Send a command to a vehicle.",
            input_schema: object_schema(
                json!({
                    "vehicle_id": vehicle_id,
                    "command": command,
                    "parameters": parameters,
                }),
                &["vehicle_id", "command"],
            ),
        },
        ToolDefinition {
            name: "get_solar_systems",
            description: "Get list of all solar systems with site details.",
            input_schema: object_schema(json!({}), &[]),
        },
        ToolDefinition {
            name: "get_solar_system",
            description: "Get live status of a solar system.",
            input_schema: object_schema(json!({ "site_id": site_id }), &["site_id"]),
        },
        ToolDefinition {
            name: "get_solar_history",
            description: "Get history of a solar system.",
            input_schema: object_schema(
                json!({
                    "site_id": site_id,
                    "period": {
                        "type": "string",
                        "enum": crate::api::HISTORY_PERIODS,
                        "default": "day"
                    },
                }),
                &["site_id"],
            ),
        },
        ToolDefinition {
            name: "get_solar_telemetry",
            description: "Get telemetry history of a solar system.",
            input_schema: object_schema(
                json!({
                    "site_id": site_id,
                    "kind": {"type": "string", "default": "charge"},
                    "time_zone": {"type": "string", "default": "UTC"},
                    "start_date": {"type": "string", "description": "RFC 3339 start time"},
                    "end_date": {"type": "string", "description": "RFC 3339 end time"},
                }),
                &["site_id"],
            ),
        },
        ToolDefinition {
            name: "send_solar_command",
            description: "Send a command to a solar system.",
            input_schema: object_schema(
                json!({
                    "site_id": site_id,
                    "command": command,
                    "parameters": parameters,
                }),
                &["site_id", "command"],
            ),
        },
        ToolDefinition {
            name: "get_system_summary",
            description: "Get a summary of all Tesla vehicles and solar systems.",
            input_schema: object_schema(json!({}), &[]),
        },
    ]
}

/// Accept ids as JSON strings or numbers
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct VehicleArgs {
    #[serde(deserialize_with = "id_string")]
    vehicle_id: String,
}

#[derive(Debug, Deserialize)]
struct VehicleCommandArgs {
    #[serde(deserialize_with = "id_string")]
    vehicle_id: String,
    command: String,
    #[serde(default)]
    parameters: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct SiteArgs {
    #[serde(deserialize_with = "id_string")]
    site_id: String,
}

#[derive(Debug, Deserialize)]
struct SiteHistoryArgs {
    #[serde(deserialize_with = "id_string")]
    site_id: String,
    #[serde(default)]
    period: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SiteTelemetryArgs {
    #[serde(deserialize_with = "id_string")]
    site_id: String,
    #[serde(flatten)]
    query: TelemetryQuery,
}

#[derive(Debug, Deserialize)]
struct SiteCommandArgs {
    #[serde(deserialize_with = "id_string")]
    site_id: String,
    command: String,
    #[serde(default)]
    parameters: Option<Map<String, Value>>,
}

/// A parsed `tools/call` request
#[derive(Debug)]
pub enum ToolCall {
    GetVehicles,
    GetVehicle(String),
    SendCommand {
        vehicle_id: String,
        command: String,
        parameters: Value,
    },
    GetSolarSystems,
    GetSolarSystem(String),
    GetSolarHistory {
        site_id: String,
        period: Option<String>,
    },
    GetSolarTelemetry {
        site_id: String,
        query: TelemetryQuery,
    },
    SendSolarCommand {
        site_id: String,
        command: String,
        parameters: Value,
    },
    GetSystemSummary,
}

impl ToolCall {
    /// Resolve a tool name and its arguments.
    ///
    /// Unknown tools and arguments that do not fit the tool's schema are
    /// reported as the error message for an invalid-params reply.
    pub fn parse(name: &str, arguments: Option<Value>) -> Result<Self, String> {
        let args = match arguments {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(v) => v,
        };

        fn from<T: serde::de::DeserializeOwned>(name: &str, args: Value) -> Result<T, String> {
            serde_json::from_value(args)
                .map_err(|e| format!("Invalid arguments for {}: {}", name, e))
        }

        let call = match name {
            "get_vehicles" => ToolCall::GetVehicles,
            "get_vehicle" => ToolCall::GetVehicle(from::<VehicleArgs>(name, args)?.vehicle_id),
            "send_command" => {
                let a: VehicleCommandArgs = from(name, args)?;
                ToolCall::SendCommand {
                    vehicle_id: a.vehicle_id,
                    command: a.command,
                    parameters: Value::Object(a.parameters.unwrap_or_default()),
                }
            }
            "get_solar_systems" => ToolCall::GetSolarSystems,
            "get_solar_system" => ToolCall::GetSolarSystem(from::<SiteArgs>(name, args)?.site_id),
            "get_solar_history" => {
                let a: SiteHistoryArgs = from(name, args)?;
                ToolCall::GetSolarHistory {
                    site_id: a.site_id,
                    period: a.period,
                }
            }
            "get_solar_telemetry" => {
                let a: SiteTelemetryArgs = from(name, args)?;
                ToolCall::GetSolarTelemetry {
                    site_id: a.site_id,
                    query: a.query,
                }
            }
            "send_solar_command" => {
                let a: SiteCommandArgs = from(name, args)?;
                ToolCall::SendSolarCommand {
                    site_id: a.site_id,
                    command: a.command,
                    parameters: Value::Object(a.parameters.unwrap_or_default()),
                }
            }
            "get_system_summary" => ToolCall::GetSystemSummary,
            other => return Err(format!("Unknown tool: {}", other)),
        };

        Ok(call)
    }

    /// Run the call against the Fleet API. Failures become an error result.
    pub async fn execute(self, api: &FleetApi) -> CallResult {
        let result = match self {
            ToolCall::GetVehicles => api.list_vehicles().await.map(Value::Array),
            ToolCall::GetVehicle(id) => api.get_vehicle(&id).await,
            ToolCall::SendCommand {
                vehicle_id,
                command,
                parameters,
            } => {
                api.send_vehicle_command(&vehicle_id, &command, &parameters)
                    .await
            }
            ToolCall::GetSolarSystems => api.list_solar_systems().await.map(Value::Array),
            ToolCall::GetSolarSystem(id) => api.get_solar_status(&id).await,
            ToolCall::GetSolarHistory { site_id, period } => {
                api.get_solar_history(&site_id, period.as_deref()).await
            }
            ToolCall::GetSolarTelemetry { site_id, query } => {
                api.get_solar_telemetry(&site_id, &query).await
            }
            ToolCall::SendSolarCommand {
                site_id,
                command,
                parameters,
            } => api.send_solar_command(&site_id, &command, &parameters).await,
            ToolCall::GetSystemSummary => api.get_system_summary().await.and_then(|summary| {
                serde_json::to_value(summary).map_err(|e| ApiError::Internal(e.into()))
            }),
        };

        match result {
            Ok(value) => CallResult::json(&value),
            Err(e) => {
                tracing::error!("Tool call failed: {}", e);
                CallResult::error(&e)
            }
        }
    }
}
