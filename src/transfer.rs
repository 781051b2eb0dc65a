//! JSON import and export of service lists.
//!
//! The wire format is a JSON array restricted to the user-editable fields.
//! Identity and runtime status never travel: every imported record becomes a
//! brand new service with a fresh id and no check history.

use crate::db::{DbError, Service, Store};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Db(#[from] DbError),
}

/// Wire representation of a service's user-editable fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceExport {
    pub name: String,
    pub url: String,
    pub interval: i64,
    pub headers: String,
    pub method: String,
    pub body: String,
    pub response_pattern: String,
    pub use_regex_pattern: bool,
    pub sha1_certificate: String,
    pub position: i64,
    pub group_name: String,
}

impl Default for ServiceExport {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            interval: 15,
            headers: String::new(),
            method: String::new(),
            body: String::new(),
            response_pattern: String::new(),
            use_regex_pattern: false,
            sha1_certificate: String::new(),
            position: 0,
            group_name: String::new(),
        }
    }
}

impl From<&Service> for ServiceExport {
    fn from(service: &Service) -> Self {
        Self {
            name: service.name.clone(),
            url: service.url.clone(),
            interval: service.interval,
            headers: service.headers.clone(),
            method: service.method.clone(),
            body: service.body.clone(),
            response_pattern: service.response_pattern.clone(),
            use_regex_pattern: service.use_regex_pattern,
            sha1_certificate: service.sha1_certificate.clone(),
            position: service.position,
            group_name: service.group_name.clone(),
        }
    }
}

impl ServiceExport {
    /// Build a fresh service from wire data; id and runtime fields start empty.
    fn into_service(self) -> Service {
        Service {
            id: 0,
            name: self.name,
            url: self.url,
            interval: self.interval,
            headers: self.headers,
            method: self.method,
            body: self.body,
            response_pattern: self.response_pattern,
            use_regex_pattern: self.use_regex_pattern,
            sha1_certificate: self.sha1_certificate,
            position: self.position,
            group_name: self.group_name,
            ..Default::default()
        }
    }
}

/// Serialize a service list to the wire format.
pub fn export_json(services: &[Service]) -> Result<String, serde_json::Error> {
    let wire: Vec<ServiceExport> = services.iter().map(ServiceExport::from).collect();
    serde_json::to_string_pretty(&wire)
}

/// Parse the wire format into fresh, not-yet-persisted services.
pub fn import_json(json: &str) -> Result<Vec<Service>, serde_json::Error> {
    let wire: Vec<ServiceExport> = serde_json::from_str(json)?;
    Ok(wire.into_iter().map(ServiceExport::into_service).collect())
}

/// Import a service list, inserting each record as a new service.
/// Returns the assigned ids. Existing services are untouched; the caller is
/// expected to reschedule afterwards.
///
/// Wire positions are offset past the highest existing position, preserving
/// the imported list's relative order without colliding with services already
/// in the store. Records without a position get the next free slot.
pub fn import_services(store: &Store, json: &str) -> Result<Vec<i64>, TransferError> {
    let base = store
        .get_all()?
        .iter()
        .map(|s| s.position)
        .max()
        .unwrap_or(0);

    let mut ids = Vec::new();
    for mut service in import_json(json)? {
        if service.position > 0 {
            service.position += base;
        }
        ids.push(store.insert_service(&mut service)?);
    }
    Ok(ids)
}
