use std::{env, time::Duration};

use crate::{dispatch::DispatchOptions, vapid::VapidKeyPair};

#[derive(Clone)]
pub struct Config {
    pub bind_addr: String,
    pub db_path: String,
    pub cors_allow_any: bool,
    pub cors_origins: Vec<String>,
    pub allowed_push_hosts: Vec<String>,
    pub vapid_public_key: String,
    pub vapid_private_key: String,
    pub vapid_subject: String,
    pub push_timeout_ms: u64,
    pub push_ttl_secs: u64,
    pub dispatch_concurrency: usize,
    pub notify_token: Option<String>,
    pub notification_icon: Option<String>,
    pub notification_badge: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = env_or("BIND_ADDR", "0.0.0.0:3000");
        let db_path = env_or("DB_PATH", "pushcast.redb");
        let cors_raw = env_or("CORS_ORIGINS", "http://localhost:3000");
        let (cors_allow_any, cors_origins) = parse_cors_origins(&cors_raw);
        // Host allowlist prevents SSRF against arbitrary endpoints.
        let allowed_push_hosts_raw = env_or(
            "ALLOWED_PUSH_HOSTS",
            "fcm.googleapis.com,updates.push.services.mozilla.com,wns.windows.com,notify.windows.com,web.push.apple.com",
        );
        let allowed_push_hosts = parse_list(&allowed_push_hosts_raw);
        let vapid_public_key = env::var("VAPID_PUBLIC_KEY")
            .map_err(|_| anyhow::anyhow!("VAPID_PUBLIC_KEY is required"))?;
        let vapid_private_key = env::var("VAPID_PRIVATE_KEY")
            .map_err(|_| anyhow::anyhow!("VAPID_PRIVATE_KEY is required"))?;
        let vapid_subject = env_or("VAPID_SUBJECT", "mailto:admin@example.com");
        let push_timeout_ms = env_or_parse("PUSH_TIMEOUT_MS", 5000)?;
        let push_ttl_secs = env_or_parse("PUSH_TTL_SECS", 86_400)?;
        let dispatch_concurrency = env_or_parse("DISPATCH_CONCURRENCY", 8)?;
        let notify_token = env_opt("NOTIFY_TOKEN");
        let notification_icon = env_opt("NOTIFICATION_ICON");
        let notification_badge = env_opt("NOTIFICATION_BADGE");

        if push_timeout_ms == 0 {
            return Err(anyhow::anyhow!("PUSH_TIMEOUT_MS must be > 0"));
        }
        if dispatch_concurrency == 0 {
            return Err(anyhow::anyhow!("DISPATCH_CONCURRENCY must be > 0"));
        }

        Ok(Self {
            bind_addr,
            db_path,
            cors_allow_any,
            cors_origins,
            allowed_push_hosts,
            vapid_public_key,
            vapid_private_key,
            vapid_subject,
            push_timeout_ms,
            push_ttl_secs,
            dispatch_concurrency,
            notify_token,
            notification_icon,
            notification_badge,
        })
    }

    pub fn vapid_keys(&self) -> anyhow::Result<VapidKeyPair> {
        Ok(VapidKeyPair::from_base64(
            &self.vapid_public_key,
            &self.vapid_private_key,
            &self.vapid_subject,
        )?)
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            ttl_secs: self.push_ttl_secs,
            timeout: Duration::from_millis(self.push_timeout_ms),
            concurrency: self.dispatch_concurrency,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => Ok(value.trim().parse()?),
        Err(_) => Ok(default),
    }
}

fn parse_cors_origins(value: &str) -> (bool, Vec<String>) {
    let origins = parse_list(value);

    if origins.iter().any(|item| item == "*") {
        (true, Vec::new())
    } else {
        (false, origins)
    }
}

pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list_trims_and_drops_empty() {
        assert_eq!(
            parse_list(" fcm.googleapis.com, ,web.push.apple.com,"),
            vec!["fcm.googleapis.com", "web.push.apple.com"]
        );
    }

    #[test]
    fn wildcard_cors_allows_any() {
        assert_eq!(parse_cors_origins("https://a.example, *"), (true, Vec::new()));
        assert_eq!(
            parse_cors_origins("https://a.example"),
            (false, vec!["https://a.example".to_string()])
        );
    }
}
