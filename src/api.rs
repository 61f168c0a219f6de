// Fleet API operations shared by the MCP tools, REST routes and CLI

use serde_json::Value;

use crate::error::{ApiError, Result};
use crate::http_client::TeslaHttpClient;
use crate::models::{SystemSummary, TelemetryQuery};

pub const HISTORY_PERIODS: &[&str] = &["day", "week", "month", "year"];

/// Typed front for the Fleet API endpoints
#[derive(Clone)]
pub struct FleetApi {
    client: TeslaHttpClient,
}

impl FleetApi {
    pub fn new(client: TeslaHttpClient) -> Self {
        Self { client }
    }

    // ==============================================================================================
    // Vehicles
    // ==============================================================================================

    pub async fn list_vehicles(&self) -> Result<Vec<Value>> {
        let data = self.client.get_json("/api/1/vehicles", &[]).await?;
        Ok(response_list(data))
    }

    pub async fn get_vehicle(&self, vehicle_id: &str) -> Result<Value> {
        validate_id("vehicle_id", vehicle_id)?;
        let data = self
            .client
            .get_json(&format!("/api/1/vehicles/{}", vehicle_id), &[])
            .await?;
        Ok(response_body(data))
    }

    pub async fn send_vehicle_command(
        &self,
        vehicle_id: &str,
        command: &str,
        parameters: &Value,
    ) -> Result<Value> {
        validate_id("vehicle_id", vehicle_id)?;
        validate_command(command)?;
        tracing::info!(vehicle_id, command, "Sending vehicle command");
        self.client
            .post_json(
                &format!("/api/1/vehicles/{}/command/{}", vehicle_id, command),
                parameters,
            )
            .await
    }

    // ==============================================================================================
    // Energy sites
    // ==============================================================================================

    /// List energy sites, expanded to each site's detail record
    pub async fn list_solar_systems(&self) -> Result<Vec<Value>> {
        let data = self.client.get_json("/api/1/energy_sites", &[]).await?;

        let mut sites = Vec::new();
        for product in response_list(data) {
            let Some(site_id) = site_id_of(&product) else {
                tracing::debug!("Skipping energy product without a site id");
                continue;
            };
            let detail = self
                .client
                .get_json(&format!("/api/1/energy_sites/{}", site_id), &[])
                .await?;
            sites.push(response_body(detail));
        }

        Ok(sites)
    }

    pub async fn get_solar_status(&self, site_id: &str) -> Result<Value> {
        validate_id("site_id", site_id)?;
        let data = self
            .client
            .get_json(&format!("/api/1/energy_sites/{}/live_status", site_id), &[])
            .await?;
        Ok(response_body(data))
    }

    pub async fn get_solar_history(&self, site_id: &str, period: Option<&str>) -> Result<Value> {
        validate_id("site_id", site_id)?;
        let period = period.unwrap_or("day");
        if !HISTORY_PERIODS.contains(&period) {
            return Err(ApiError::Validation(format!(
                "period must be one of {}, got '{}'",
                HISTORY_PERIODS.join(", "),
                period
            )));
        }

        self.client
            .get_json(
                &format!("/api/1/energy_sites/{}/history", site_id),
                &[("period", period.to_string())],
            )
            .await
    }

    pub async fn get_solar_telemetry(&self, site_id: &str, query: &TelemetryQuery) -> Result<Value> {
        validate_id("site_id", site_id)?;
        self.client
            .get_json(
                &format!("/api/1/energy_sites/{}/telemetry_history", site_id),
                &query.to_params(),
            )
            .await
    }

    pub async fn send_solar_command(
        &self,
        site_id: &str,
        command: &str,
        parameters: &Value,
    ) -> Result<Value> {
        validate_id("site_id", site_id)?;
        validate_command(command)?;
        tracing::info!(site_id, command, "Sending energy site command");
        self.client
            .post_json(
                &format!("/api/1/energy_sites/{}/command/{}", site_id, command),
                parameters,
            )
            .await
    }

    /// Condensed view of every vehicle and energy site
    pub async fn get_system_summary(&self) -> Result<SystemSummary> {
        let vehicles = self.list_vehicles().await?;
        let sites = self.list_solar_systems().await?;
        Ok(SystemSummary::new(&vehicles, &sites))
    }
}

/// The vendor wraps payloads in `{"response": ...}`
fn response_body(mut data: Value) -> Value {
    match data.get_mut("response") {
        Some(inner) => inner.take(),
        None => data,
    }
}

fn response_list(data: Value) -> Vec<Value> {
    match response_body(data) {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

fn site_id_of(product: &Value) -> Option<String> {
    ["energy_site_id", "id"]
        .iter()
        .filter_map(|k| product.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Path segment ids must be non-empty and carry no URL structure
pub fn validate_id(field: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(ApiError::Validation(format!("{} must not be empty", field)));
    }
    if id
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#'))
    {
        return Err(ApiError::Validation(format!(
            "{} contains invalid characters: '{}'",
            field, id
        )));
    }
    Ok(())
}

pub fn validate_command(command: &str) -> Result<()> {
    if command.is_empty() || !command.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ApiError::Validation(format!(
            "command must be letters, digits and underscores, got '{}'",
            command
        )));
    }
    Ok(())
}
