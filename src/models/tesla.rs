use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ==================================================================================================
// Request bodies and query strings
// ==================================================================================================

/// Body of `POST /vehicles/{id}/commands` and `POST /solar/{id}/commands`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
}

impl CommandRequest {
    /// Parameters as the vendor request body; `{}` when none were given
    pub fn body(&self) -> Value {
        Value::Object(self.parameters.clone().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub period: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryQuery {
    pub kind: Option<String>,
    pub time_zone: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl TelemetryQuery {
    /// Query parameters with vendor defaults filled in
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("kind", self.kind.clone().unwrap_or_else(|| "charge".to_string())),
            (
                "time_zone",
                self.time_zone.clone().unwrap_or_else(|| "UTC".to_string()),
            ),
        ];
        if let Some(start) = self.start_date.as_ref().filter(|s| !s.is_empty()) {
            params.push(("start_date", start.clone()));
        }
        if let Some(end) = self.end_date.as_ref().filter(|s| !s.is_empty()) {
            params.push(("end_date", end.clone()));
        }
        params
    }
}

// ==================================================================================================
// System summary
// ==================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleSummary {
    pub id: Value,
    pub name: Option<String>,
    pub state: Option<String>,
    pub battery_level: Option<f64>,
}

impl VehicleSummary {
    /// Pick the summary fields out of a vehicle object from the vendor.
    pub fn from_vehicle(vehicle: &Value) -> Self {
        let battery_level = vehicle
            .get("battery_level")
            .or_else(|| vehicle.pointer("/charge_state/battery_level"))
            .and_then(Value::as_f64);

        Self {
            id: first_present(vehicle, &["id_s", "id"]),
            name: string_field(vehicle, &["display_name"]),
            state: string_field(vehicle, &["state"]),
            battery_level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteSummary {
    pub id: Value,
    pub name: Option<String>,
    pub status: Option<String>,
    pub total_power: Option<f64>,
    pub battery_level: Option<f64>,
}

impl SiteSummary {
    /// Pick the summary fields out of an energy site object from the vendor.
    pub fn from_site(site: &Value) -> Self {
        Self {
            id: first_present(site, &["id", "energy_site_id"]),
            name: string_field(site, &["site_name"]),
            status: string_field(site, &["status", "grid_status"]),
            total_power: number_field(site, &["total_power", "solar_power"]),
            battery_level: number_field(site, &["battery_level", "percentage_charged"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSummary {
    /// RFC 3339, UTC
    pub timestamp: String,
    pub vehicles: Vec<VehicleSummary>,
    pub solar_systems: Vec<SiteSummary>,
}

impl SystemSummary {
    pub fn new(vehicles: &[Value], sites: &[Value]) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            vehicles: vehicles.iter().map(VehicleSummary::from_vehicle).collect(),
            solar_systems: sites.iter().map(SiteSummary::from_site).collect(),
        }
    }
}

fn first_present(value: &Value, keys: &[&str]) -> Value {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or(Value::Null)
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(*k).and_then(Value::as_str))
        .next()
        .map(str::to_string)
}

fn number_field(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|k| value.get(*k).and_then(Value::as_f64))
        .next()
}
