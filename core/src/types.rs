//! Domain DTOs for the maize platform API.
//!
//! # Design
//! These mirror the backend's camelCase JSON. Read models are lenient
//! (`#[serde(default)]` on everything but the id) because several endpoints
//! return partial projections; write models serialize only the fields that are
//! set so updates stay partial.
//!
//! List endpoints do not agree on a shape: some return a bare array, others a
//! Spring-style page. [`ListShape`] fixes the shape per endpoint instead of
//! sniffing it on every response.

use std::fmt;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Farmer,
    Analyst,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: Role,
}

#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Serialize)]
pub struct Registration {
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
    /// Session lifetime in seconds, when the backend reports one.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Clone, Serialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: Role,
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("email", &self.email)
            .field("role", &self.role)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Farm {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub size_hectares: Option<f64>,
    #[serde(default)]
    pub owner_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFarm {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_hectares: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_hectares: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantingSession {
    pub id: i64,
    pub farm_id: i64,
    #[serde(default)]
    pub variety: String,
    pub planted_on: NaiveDate,
    #[serde(default)]
    pub expected_harvest: Option<NaiveDate>,
    /// Predicted yield in tonnes per hectare.
    #[serde(default)]
    pub predicted_yield: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlantingSession {
    pub farm_id: i64,
    pub variety: String,
    pub planted_on: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_harvest: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantingSessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variety: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_harvest: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_yield: Option<f64>,
}

/// Dashboard counters. Older backends do not expose this endpoint, so the
/// client falls back to the all-zero default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardSummary {
    pub total_farms: u64,
    pub total_users: u64,
    pub active_sessions: u64,
    pub average_predicted_yield: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    #[serde(default)]
    pub total_elements: usize,
    #[serde(default)]
    pub page: usize,
    #[serde(default)]
    pub size: usize,
}

/// Response shape of a list endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListShape {
    /// `[item, ...]`
    Array,
    /// `{"content": [item, ...], "totalElements": n, ...}`
    Paged,
}

impl ListShape {
    /// Decodes a list body of this shape into a [`Page`]. Bare arrays become a
    /// single page holding every item.
    pub fn decode<T: DeserializeOwned>(self, value: Value) -> Result<Page<T>, serde_json::Error> {
        match self {
            ListShape::Array => {
                let content: Vec<T> = serde_json::from_value(value)?;
                let total = content.len();
                Ok(Page {
                    content,
                    total_elements: total,
                    page: 0,
                    size: total,
                })
            }
            ListShape::Paged => serde_json::from_value(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn farm_accepts_id_only_projection() {
        let farm: Farm = serde_json::from_value(json!({ "id": 1 })).unwrap();
        assert_eq!(farm.id, 1);
        assert!(farm.name.is_empty());
        assert!(farm.owner_id.is_none());
    }

    #[test]
    fn unknown_role_maps_to_other() {
        let user: User = serde_json::from_value(json!({ "id": 4, "username": "x", "role": "agronomist" })).unwrap();
        assert_eq!(user.role, Role::Other);
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let debug = format!("{:?}", Credentials::new("u", "hunter2"));
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn new_user_debug_redacts_password() {
        let user = NewUser {
            username: "grace".to_string(),
            password: "s3cret-pass".to_string(),
            email: Some("grace@example.com".to_string()),
            role: Role::Analyst,
        };
        let debug = format!("{user:?}");
        assert!(debug.contains("grace"));
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("s3cret-pass"));
    }

    #[test]
    fn partial_update_omits_unset_fields() {
        let update = PlantingSessionUpdate {
            predicted_yield: Some(5.5),
            ..Default::default()
        };
        let body = serde_json::to_value(&update).unwrap();
        assert_eq!(body, json!({ "predictedYield": 5.5 }));
    }

    #[test]
    fn planting_session_dates_parse() {
        let session: PlantingSession = serde_json::from_value(json!({
            "id": 9,
            "farmId": 3,
            "variety": "H614",
            "plantedOn": "2024-03-15",
            "expectedHarvest": "2024-08-01"
        }))
        .unwrap();
        assert_eq!(session.planted_on, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert!(session.predicted_yield.is_none());
    }

    #[test]
    fn array_shape_becomes_single_page() {
        let page: Page<Farm> = ListShape::Array.decode(json!([{ "id": 1 }, { "id": 2 }])).unwrap();
        assert_eq!(page.total_elements, 2);
        assert_eq!(page.content[1].id, 2);
    }

    #[test]
    fn paged_shape_reads_content() {
        let page: Page<User> = ListShape::Paged
            .decode(json!({
                "content": [{ "id": 1, "username": "admin", "role": "admin" }],
                "totalElements": 12,
                "page": 0,
                "size": 1
            }))
            .unwrap();
        assert_eq!(page.total_elements, 12);
        assert_eq!(page.content[0].username, "admin");
    }

    #[test]
    fn paged_shape_rejects_bare_array() {
        let result: Result<Page<Farm>, _> = ListShape::Paged.decode(json!([{ "id": 1 }]));
        assert!(result.is_err());
    }

    #[test]
    fn dashboard_summary_defaults_missing_fields() {
        let summary: DashboardSummary = serde_json::from_value(json!({ "totalFarms": 3 })).unwrap();
        assert_eq!(summary.total_farms, 3);
        assert_eq!(summary.active_sessions, 0);
    }
}
