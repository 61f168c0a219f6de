// Data models for the Fleet API surface

pub mod tesla;

pub use tesla::{CommandRequest, HistoryQuery, SiteSummary, SystemSummary, TelemetryQuery, VehicleSummary};
