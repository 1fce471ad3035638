use std::{sync::Arc, time::Duration};

use futures_util::stream::{self, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use tracing::{info, warn};

use crate::{
    codec::{decode_b64url, encode_b64url},
    encrypt::encrypt_payload,
    error::PushError,
    models::{DeliveryOutcome, DeliveryStatus, DispatchReport, NotificationPayload, Subscription},
    store::SubscriptionStore,
    vapid::{VapidKeyPair, VapidSigner},
};

const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Clone, Debug)]
pub struct DispatchOptions {
    pub ttl_secs: u64,
    pub timeout: Duration,
    pub concurrency: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            ttl_secs: 86_400,
            timeout: Duration::from_secs(5),
            concurrency: 8,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    store: Arc<dyn SubscriptionStore>,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn SubscriptionStore>, options: DispatchOptions) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| PushError::Configuration(format!("http client: {err}")))?;

        Ok(Self {
            client,
            store,
            options: DispatchOptions {
                concurrency: options.concurrency.max(1),
                ..options
            },
        })
    }

    /// Sends `payload` to every subscription and reports per-recipient results
    /// in input order. Only a broken VAPID configuration fails the whole call.
    pub async fn dispatch(
        &self,
        vapid: &VapidKeyPair,
        payload: &NotificationPayload,
        subscriptions: Vec<Subscription>,
    ) -> Result<DispatchReport, PushError> {
        let signer = VapidSigner::new(vapid).map_err(|err| PushError::Configuration(err.to_string()))?;
        let body = serde_json::to_vec(payload)
            .map_err(|err| PushError::Configuration(format!("notification payload: {err}")))?;

        let outcomes = stream::iter(subscriptions)
            .map(|subscription| self.deliver(&signer, &body, subscription))
            .buffered(self.options.concurrency)
            .collect::<Vec<_>>()
            .await;

        let report = DispatchReport::from_outcomes(outcomes);
        info!(
            sent = report.sent,
            failed = report.failed,
            total = report.total,
            "dispatch finished"
        );
        Ok(report)
    }

    async fn deliver(&self, signer: &VapidSigner, body: &[u8], subscription: Subscription) -> DeliveryOutcome {
        let result = self.send(signer, body, &subscription).await;
        let (status, detail) = match result {
            Ok(()) => (DeliveryStatus::Success, None),
            Err(err @ PushError::SubscriptionExpired(_)) => (DeliveryStatus::Expired, Some(err.to_string())),
            Err(err @ PushError::Network(_)) => (DeliveryStatus::Error, Some(err.to_string())),
            Err(err) => (DeliveryStatus::Failed, Some(err.to_string())),
        };

        if let (Some(detail), true) = (&detail, is_failure(status)) {
            warn!(
                subscription_id = %subscription.id,
                endpoint = %subscription.endpoint,
                status = ?status,
                "push delivery failed: {detail}"
            );
        }

        DeliveryOutcome {
            subscription_id: subscription.id,
            status,
            detail,
        }
    }

    async fn send(&self, signer: &VapidSigner, body: &[u8], subscription: &Subscription) -> Result<(), PushError> {
        let (Some(p256dh), Some(auth)) = (
            non_empty(subscription.keys.p256dh.as_deref()),
            non_empty(subscription.keys.auth.as_deref()),
        ) else {
            return Err(PushError::MissingKeys);
        };

        let public_key =
            decode_b64url(p256dh).map_err(|err| PushError::InvalidKey(format!("p256dh: {err}")))?;
        let auth_secret =
            decode_b64url(auth).map_err(|err| PushError::InvalidKey(format!("auth: {err}")))?;

        let encrypted = encrypt_payload(body, &public_key, &auth_secret)?;
        let token = signer.sign(&subscription.endpoint)?;

        let response = self
            .client
            .post(subscription.endpoint.as_str())
            .timeout(self.options.timeout)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_ENCODING, "aesgcm")
            .header("Encryption", format!("salt={}", encode_b64url(&encrypted.salt)))
            .header(
                "Crypto-Key",
                format!(
                    "dh={};p256ecdsa={}",
                    encode_b64url(&encrypted.ephemeral_public_key),
                    token.public_key_b64
                ),
            )
            .header(AUTHORIZATION, token.authorization())
            .header("TTL", self.options.ttl_secs.to_string())
            .body(encrypted.ciphertext)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    PushError::Network(format!("timed out after {:?}", self.options.timeout))
                } else {
                    PushError::Network(err.to_string())
                }
            })?;

        let status = response.status().as_u16();
        match status {
            200..=299 => Ok(()),
            404 | 410 => {
                self.remove_expired(&subscription.id, status);
                Err(PushError::SubscriptionExpired(status))
            }
            _ => {
                let text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<failed to read response body>".to_string());
                Err(PushError::Delivery {
                    status,
                    body: truncate(&text, MAX_ERROR_BODY_CHARS),
                })
            }
        }
    }

    fn remove_expired(&self, id: &str, status: u16) {
        match self.store.delete_by_id(id) {
            Ok(()) => info!(subscription_id = %id, status, "removed expired subscription"),
            Err(err) => warn!(subscription_id = %id, "failed to remove expired subscription: {err}"),
        }
    }
}

// Expired subscriptions are routine cleanup, logged by `remove_expired`.
fn is_failure(status: DeliveryStatus) -> bool {
    matches!(status, DeliveryStatus::Failed | DeliveryStatus::Error)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn truncate(input: &str, max_chars: usize) -> String {
    let mut chars = input.chars();
    let mut out: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        out.push('…');
    }
    out
}
