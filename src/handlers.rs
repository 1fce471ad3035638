use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode, Uri},
    Json,
};
use chrono::Utc;
use tracing::info;

use crate::{
    codec::decode_b64url,
    config::Config,
    error::AppError,
    keys::validate_recipient_keys,
    models::{
        ConfigResponse, DispatchReport, NotificationPayload, NotifyRequest, SubscribeRequest,
        SubscribeResponse, Subscription,
    },
    state::AppState,
    store::SubscriptionStore,
};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        public_key: state.vapid.public_key_b64(),
    })
}

pub async fn subscribe(
    State(state): State<AppState>,
    Json(request): Json<SubscribeRequest>,
) -> Result<Json<SubscribeResponse>, AppError> {
    validate_subscription(&request, &state.cfg.allowed_push_hosts)?;

    let id = state.store.generate_id()?;
    let subscription = Subscription {
        id: id.clone(),
        session_id: request.session_id,
        endpoint: request.endpoint.trim().to_string(),
        keys: request.keys,
        created_at: Utc::now(),
    };
    state.store.put(&subscription)?;
    info!(subscription_id = %id, "subscription stored");

    Ok(Json(SubscribeResponse { id }))
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.store.remove(&id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::new(
            StatusCode::NOT_FOUND,
            "subscription not found",
        ))
    }
}

pub async fn notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NotifyRequest>,
) -> Result<Json<DispatchReport>, AppError> {
    authorize_notify(&state.cfg, &headers)?;
    if request.title.trim().is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "title required"));
    }

    let recipients = select_recipients(state.store.list()?, &request)?;
    let payload = build_payload(&state.cfg, request);

    let report = state
        .dispatcher
        .dispatch(&state.vapid, &payload, recipients)
        .await
        .map_err(|err| AppError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;

    Ok(Json(report))
}

fn authorize_notify(cfg: &Config, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = cfg.notify_token.as_deref() else {
        return Ok(());
    };

    let provided = headers
        .get("x-notify-token")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if provided.is_empty() {
        return Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "notify token required",
        ));
    }
    if provided != expected {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            "invalid notify token",
        ));
    }

    Ok(())
}

fn select_recipients(
    subscriptions: Vec<Subscription>,
    request: &NotifyRequest,
) -> Result<Vec<Subscription>, AppError> {
    if request.broadcast.unwrap_or(true) {
        return Ok(subscriptions);
    }

    let session_id = request
        .session_id
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            AppError::new(
                StatusCode::BAD_REQUEST,
                "sessionId required when broadcast is false",
            )
        })?;

    Ok(subscriptions
        .into_iter()
        .filter(|subscription| subscription.session_id.as_deref() == Some(session_id))
        .collect())
}

fn build_payload(cfg: &Config, request: NotifyRequest) -> NotificationPayload {
    NotificationPayload {
        title: request.title,
        body: request.body,
        icon: cfg.notification_icon.clone(),
        badge: cfg.notification_badge.clone(),
        // Same notice replaces its earlier notification on the device.
        tag: request.notice_id.clone(),
        url: request.url,
        notice_id: request.notice_id,
    }
}

fn validate_subscription(
    request: &SubscribeRequest,
    allowed_hosts: &[String],
) -> Result<(), AppError> {
    let endpoint = request.endpoint.trim();
    if endpoint.is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "endpoint required"));
    }
    if endpoint.len() > 2048 {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "endpoint too long"));
    }
    let uri: Uri = endpoint
        .parse()
        .map_err(|_| AppError::new(StatusCode::BAD_REQUEST, "invalid endpoint url"))?;
    let scheme = uri.scheme_str().unwrap_or("");
    if !scheme.eq_ignore_ascii_case("https") {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "endpoint must be https",
        ));
    }
    let host = uri
        .host()
        .ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, "endpoint host missing"))?;
    if !host_allowed(host, allowed_hosts) {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "endpoint host not allowed",
        ));
    }

    let (Some(p256dh), Some(auth)) = (request.keys.p256dh.as_deref(), request.keys.auth.as_deref())
    else {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "subscription keys required",
        ));
    };
    if p256dh.len() > 256 || auth.len() > 128 {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "subscription keys too long",
        ));
    }

    let p256dh_bytes = decode_b64url(p256dh)
        .map_err(|_| AppError::new(StatusCode::BAD_REQUEST, "invalid p256dh"))?;
    let auth_bytes = decode_b64url(auth)
        .map_err(|_| AppError::new(StatusCode::BAD_REQUEST, "invalid auth"))?;
    validate_recipient_keys(&p256dh_bytes, &auth_bytes)
        .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, err.to_string()))?;

    Ok(())
}

fn host_allowed(host: &str, allowed_hosts: &[String]) -> bool {
    if allowed_hosts.is_empty() || allowed_hosts.iter().any(|item| item == "*") {
        return true;
    }

    allowed_hosts
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(host))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::encode_b64url, models::PushKeys};

    fn make_request(endpoint: &str, p256dh_bytes: usize, auth_bytes: usize) -> SubscribeRequest {
        let mut p256dh = vec![1u8; p256dh_bytes];
        if let Some(first) = p256dh.first_mut() {
            *first = 0x04;
        }
        SubscribeRequest {
            session_id: Some("session-1".to_string()),
            endpoint: endpoint.to_string(),
            keys: PushKeys {
                p256dh: Some(encode_b64url(&p256dh)),
                auth: Some(encode_b64url(&vec![2u8; auth_bytes])),
            },
        }
    }

    fn test_config(notify_token: Option<&str>) -> Config {
        Config {
            bind_addr: "127.0.0.1:0".to_string(),
            db_path: "unused.redb".to_string(),
            cors_allow_any: true,
            cors_origins: Vec::new(),
            allowed_push_hosts: vec!["example.com".to_string()],
            vapid_public_key: String::new(),
            vapid_private_key: String::new(),
            vapid_subject: "mailto:ops@example.com".to_string(),
            push_timeout_ms: 5000,
            push_ttl_secs: 86_400,
            dispatch_concurrency: 8,
            notify_token: notify_token.map(str::to_string),
            notification_icon: Some("/icons/192.png".to_string()),
            notification_badge: None,
        }
    }

    fn notify_request(broadcast: Option<bool>, session_id: Option<&str>) -> NotifyRequest {
        NotifyRequest {
            title: "Routine updated".to_string(),
            body: "Check the new schedule".to_string(),
            url: Some("/routine".to_string()),
            notice_id: Some("notice-9".to_string()),
            broadcast,
            session_id: session_id.map(str::to_string),
        }
    }

    fn stored(id: &str, session_id: Option<&str>) -> Subscription {
        Subscription {
            id: id.to_string(),
            session_id: session_id.map(str::to_string),
            endpoint: "https://example.com/endpoint".to_string(),
            keys: PushKeys::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn validate_subscription_accepts_valid() {
        let request = make_request("https://example.com/endpoint", 65, 16);
        let allowed = vec!["example.com".to_string()];
        assert!(validate_subscription(&request, &allowed).is_ok());
    }

    #[test]
    fn validate_subscription_rejects_http() {
        let request = make_request("http://example.com/endpoint", 65, 16);
        let allowed = vec!["example.com".to_string()];
        assert!(validate_subscription(&request, &allowed).is_err());
    }

    #[test]
    fn validate_subscription_rejects_unknown_host() {
        let request = make_request("https://evil.example.net/endpoint", 65, 16);
        let allowed = vec!["example.com".to_string()];
        assert!(validate_subscription(&request, &allowed).is_err());
    }

    #[test]
    fn validate_subscription_rejects_invalid_p256dh() {
        let mut request = make_request("https://example.com/endpoint", 65, 16);
        request.keys.p256dh = Some("not-base64!".to_string());
        let allowed = vec!["example.com".to_string()];
        assert!(validate_subscription(&request, &allowed).is_err());
    }

    #[test]
    fn validate_subscription_rejects_invalid_lengths() {
        let request = make_request("https://example.com/endpoint", 64, 15);
        let allowed = vec!["example.com".to_string()];
        assert!(validate_subscription(&request, &allowed).is_err());
    }

    #[test]
    fn validate_subscription_rejects_missing_keys() {
        let mut request = make_request("https://example.com/endpoint", 65, 16);
        request.keys.auth = None;
        let allowed = vec!["example.com".to_string()];
        let err = validate_subscription(&request, &allowed).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn broadcast_by_default() {
        let subs = vec![stored("a", Some("s1")), stored("b", None)];
        let selected = select_recipients(subs, &notify_request(None, None)).unwrap();
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn targeted_notify_filters_by_session() {
        let subs = vec![
            stored("a", Some("s1")),
            stored("b", Some("s2")),
            stored("c", Some("s1")),
        ];
        let selected = select_recipients(subs, &notify_request(Some(false), Some("s1"))).unwrap();
        let ids: Vec<&str> = selected.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn targeted_notify_requires_session() {
        let err = select_recipients(Vec::new(), &notify_request(Some(false), None)).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn payload_uses_configured_icon_and_notice_tag() {
        let payload = build_payload(&test_config(None), notify_request(None, None));
        assert_eq!(payload.icon.as_deref(), Some("/icons/192.png"));
        assert_eq!(payload.tag.as_deref(), Some("notice-9"));
        assert_eq!(payload.notice_id.as_deref(), Some("notice-9"));
        assert_eq!(payload.url.as_deref(), Some("/routine"));
    }

    #[test]
    fn notify_token_is_enforced_when_configured() {
        let mut headers = HeaderMap::new();
        assert!(authorize_notify(&test_config(None), &headers).is_ok());

        let cfg = test_config(Some("s3cret"));
        assert_eq!(
            authorize_notify(&cfg, &headers).unwrap_err().status,
            StatusCode::UNAUTHORIZED
        );

        headers.insert("x-notify-token", "wrong".parse().unwrap());
        assert_eq!(
            authorize_notify(&cfg, &headers).unwrap_err().status,
            StatusCode::FORBIDDEN
        );

        headers.insert("x-notify-token", "s3cret".parse().unwrap());
        assert!(authorize_notify(&cfg, &headers).is_ok());
    }
}
