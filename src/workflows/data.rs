//! Partially-collected workflow data.
//!
//! One record type per workflow instead of an open-ended map. Fields start as
//! `None` and are filled once; a later input never overwrites an earlier one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::fields::FieldSpec;
use super::model::Workflow;

/// Durable reference to an ingested photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRef {
    pub attachment_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationData {
    pub phone: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopVisit {
    pub location: GeoPoint,
    pub arrived_at: DateTime<Utc>,
    #[serde(default)]
    pub photos: Vec<PhotoRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteData {
    pub route_id: Option<String>,
    pub start_mileage: Option<f64>,
    #[serde(default)]
    pub stops: Vec<StopVisit>,
    /// Stop the driver has arrived at but not yet completed.
    pub current_stop: Option<StopVisit>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiveData {
    pub item_code: Option<String>,
    pub quantity: Option<f64>,
    pub confirmation_photo: Option<PhotoRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BunkerReading {
    pub bunker_id: String,
    pub old_quantity: f64,
    pub new_quantity: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemainsData {
    pub machine_id: String,
    pub bunkers: Vec<BunkerReading>,
}

impl RemainsData {
    /// Index of the first bunker still waiting for a reading.
    pub fn current_index(&self) -> Option<usize> {
        self.bunkers.iter().position(|b| b.new_quantity.is_none())
    }

    pub fn is_complete(&self) -> bool {
        !self.bunkers.is_empty() && self.current_index().is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskReportData {
    pub machine_id: Option<String>,
    pub description: Option<String>,
    pub photo: Option<PhotoRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "workflow", rename_all = "snake_case")]
pub enum SessionData {
    #[default]
    Empty,
    Registration(RegistrationData),
    DriverRoute(RouteData),
    WarehouseReceive(ReceiveData),
    RemainsAdjustment(RemainsData),
    TaskReport(TaskReportData),
}

impl SessionData {
    pub fn empty_for(workflow: Workflow) -> Self {
        match workflow {
            Workflow::Registration => SessionData::Registration(RegistrationData::default()),
            Workflow::DriverRoute => SessionData::DriverRoute(RouteData::default()),
            Workflow::WarehouseReceive => SessionData::WarehouseReceive(ReceiveData::default()),
            Workflow::RemainsAdjustment => SessionData::RemainsAdjustment(RemainsData::default()),
            Workflow::TaskReport => SessionData::TaskReport(TaskReportData::default()),
        }
    }

    pub fn workflow(&self) -> Option<Workflow> {
        match self {
            SessionData::Empty => None,
            SessionData::Registration(_) => Some(Workflow::Registration),
            SessionData::DriverRoute(_) => Some(Workflow::DriverRoute),
            SessionData::WarehouseReceive(_) => Some(Workflow::WarehouseReceive),
            SessionData::RemainsAdjustment(_) => Some(Workflow::RemainsAdjustment),
            SessionData::TaskReport(_) => Some(Workflow::TaskReport),
        }
    }

    fn has_field(&self, name: &str) -> bool {
        match (self, name) {
            (SessionData::Registration(d), "phone") => d.phone.is_some(),
            (SessionData::DriverRoute(d), "start_mileage") => d.start_mileage.is_some(),
            (SessionData::DriverRoute(d), "stops") => !d.stops.is_empty(),
            (SessionData::DriverRoute(d), "arrival_location") => d.current_stop.is_some(),
            (SessionData::WarehouseReceive(d), "item_code") => d.item_code.is_some(),
            (SessionData::WarehouseReceive(d), "quantity") => d.quantity.is_some(),
            (SessionData::WarehouseReceive(d), "confirmation_photo") => {
                d.confirmation_photo.is_some()
            }
            (SessionData::RemainsAdjustment(d), "machine_id") => !d.machine_id.is_empty(),
            (SessionData::RemainsAdjustment(d), "new_quantity") => d.is_complete(),
            (SessionData::TaskReport(d), "description") => d.description.is_some(),
            (SessionData::TaskReport(d), "photo") => d.photo.is_some(),
            _ => false,
        }
    }

    /// Names from `checklist` that have not been collected yet.
    pub fn missing_fields(&self, checklist: &[FieldSpec]) -> Vec<&'static str> {
        checklist
            .iter()
            .filter(|field| !self.has_field(field.name))
            .map(|field| field.name)
            .collect()
    }

    /// Log-safe view: attachments by reference id only, phone numbers masked.
    pub fn redacted(&self) -> serde_json::Value {
        fn photo(p: &Option<PhotoRef>) -> serde_json::Value {
            p.as_ref()
                .map(|p| json!({ "attachment_id": p.attachment_id }))
                .unwrap_or(serde_json::Value::Null)
        }

        match self {
            SessionData::Empty => json!({}),
            SessionData::Registration(d) => json!({
                "phone": d.phone.as_deref().map(mask_phone),
                "display_name": d.display_name,
            }),
            SessionData::DriverRoute(d) => json!({
                "route_id": d.route_id,
                "start_mileage": d.start_mileage,
                "stops": d.stops.len(),
                "stop_photos": d
                    .stops
                    .iter()
                    .flat_map(|s| s.photos.iter().map(|p| p.attachment_id.clone()))
                    .collect::<Vec<_>>(),
                "at_stop": d.current_stop.is_some(),
            }),
            SessionData::WarehouseReceive(d) => json!({
                "item_code": d.item_code,
                "quantity": d.quantity,
                "confirmation_photo": photo(&d.confirmation_photo),
            }),
            SessionData::RemainsAdjustment(d) => json!({
                "machine_id": d.machine_id,
                "bunkers": d.bunkers,
            }),
            SessionData::TaskReport(d) => json!({
                "machine_id": d.machine_id,
                "description_len": d.description.as_ref().map(|s| s.chars().count()),
                "photo": photo(&d.photo),
            }),
        }
    }
}

/// Write `value` into `slot` only when it is still empty. Returns whether the
/// slot was written.
pub fn fill_once<T>(slot: &mut Option<T>, value: T) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(value);
    true
}

fn mask_phone(phone: &str) -> String {
    let visible: String = phone
        .chars()
        .rev()
        .take(2)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{visible}")
}
