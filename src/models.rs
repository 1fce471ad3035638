use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct PushKeys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p256dh: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub endpoint: String,
    #[serde(default)]
    pub keys: PushKeys,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub endpoint: String,
    #[serde(default)]
    pub keys: PushKeys,
}

#[derive(Serialize)]
pub struct SubscribeResponse {
    pub id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub public_key: String,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub notice_id: Option<String>,
    #[serde(default)]
    pub broadcast: Option<bool>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice_id: Option<String>,
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    Success,
    Expired,
    Failed,
    Error,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    pub subscription_id: String,
    pub status: DeliveryStatus,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Serialize, Clone, Debug)]
pub struct DispatchReport {
    pub success: bool,
    pub sent: usize,
    pub failed: usize,
    pub total: usize,
    pub results: Vec<DeliveryOutcome>,
}

impl DispatchReport {
    pub fn from_outcomes(results: Vec<DeliveryOutcome>) -> Self {
        let sent = results
            .iter()
            .filter(|outcome| outcome.status == DeliveryStatus::Success)
            .count();
        let total = results.len();

        Self {
            success: true,
            sent,
            failed: total - sent,
            total,
            results,
        }
    }
}
