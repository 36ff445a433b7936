use std::{env, fmt::Display, str::FromStr, sync::Arc, time::Duration as StdDuration};

use chrono::Duration;
use log::*;
use payflow_common::{helpers::parse_boolean_flag, Secret};
use payflow_engine::{
    payment_api::{
        payment_flow_api::{PaymentFlowConfig, DEFAULT_PAYMENT_EXPIRY_MINUTES},
        reconciliation_api::{ReconciliationConfig, DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY},
        security_gate::GateConfig,
    },
    providers::{
        alipay::{AlipayAdapter, AlipayConfig},
        wechat::{WechatConfig, WechatPayAdapter, WechatSignType},
        ProviderRegistry,
    },
};

use crate::errors::ServerError;

const DEFAULT_PAYFLOW_HOST: &str = "127.0.0.1";
const DEFAULT_PAYFLOW_PORT: u16 = 8460;
const DEFAULT_USER_HEADER: &str = "X-User-Id";
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ALIPAY_GATEWAY: &str = "https://openapi.alipay.com/gateway.do";
const DEFAULT_WECHAT_GATEWAY: &str = "https://api.mch.weixin.qq.com";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Accept `localhost` origins and requests that carry neither `Origin` nor `Referer`. **Never in production.**
    pub dev_mode: bool,
    /// If true, the X-Forwarded-For header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_x_forwarded_for: bool,
    /// If true, the Forwarded header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_forwarded: bool,
    /// The header the fronting auth proxy puts the caller's user id in.
    pub user_header: String,
    /// How long a payment URL stays valid.
    pub payment_expiry: Duration,
    /// Time between reconciliation batches.
    pub reconcile_interval: StdDuration,
    pub reconciliation: ReconciliationConfig,
    /// Timeout for every outbound provider call.
    pub provider_timeout: StdDuration,
    pub status_push: StatusPushConfig,
    pub alipay: Option<AlipaySettings>,
    pub wechat: Option<WechatSettings>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_PAYFLOW_HOST.to_string(),
            port: DEFAULT_PAYFLOW_PORT,
            database_url: String::default(),
            dev_mode: false,
            use_x_forwarded_for: false,
            use_forwarded: false,
            user_header: DEFAULT_USER_HEADER.to_string(),
            payment_expiry: Duration::minutes(DEFAULT_PAYMENT_EXPIRY_MINUTES),
            reconcile_interval: StdDuration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
            reconciliation: ReconciliationConfig::default(),
            provider_timeout: StdDuration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
            status_push: StatusPushConfig::default(),
            alipay: None,
            wechat: None,
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("PAYFLOW_HOST").ok().unwrap_or_else(|| DEFAULT_PAYFLOW_HOST.into());
        let port = parse_env_or_default("PAYFLOW_PORT", DEFAULT_PAYFLOW_PORT);
        let database_url = env::var("PAYFLOW_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ PAYFLOW_DATABASE_URL is not set. Please set it to the URL for the Payflow database.");
            String::default()
        });
        let dev_mode = parse_boolean_flag(env::var("PAYFLOW_DEV_MODE").ok(), false);
        if dev_mode {
            warn!("🚨️ PAYFLOW_DEV_MODE is on. Origin checks are relaxed. Do not run production like this. 🚨️");
        }
        let use_x_forwarded_for = parse_boolean_flag(env::var("PAYFLOW_USE_X_FORWARDED_FOR").ok(), false);
        let use_forwarded = parse_boolean_flag(env::var("PAYFLOW_USE_FORWARDED").ok(), false);
        let user_header = env::var("PAYFLOW_USER_HEADER")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_USER_HEADER.to_string());
        let payment_expiry =
            Duration::minutes(parse_env_or_default("PAYFLOW_PAYMENT_EXPIRY", DEFAULT_PAYMENT_EXPIRY_MINUTES).max(1));
        let reconcile_interval = StdDuration::from_secs(
            parse_env_or_default("PAYFLOW_RECONCILE_INTERVAL", DEFAULT_RECONCILE_INTERVAL_SECS).max(1),
        );
        let reconciliation = ReconciliationConfig {
            batch_size: parse_env_or_default("PAYFLOW_RECONCILE_BATCH_SIZE", DEFAULT_BATCH_SIZE).max(1),
            concurrency: parse_env_or_default("PAYFLOW_RECONCILE_CONCURRENCY", DEFAULT_CONCURRENCY).max(1),
        };
        let provider_timeout =
            StdDuration::from_secs(parse_env_or_default("PAYFLOW_PROVIDER_TIMEOUT", DEFAULT_PROVIDER_TIMEOUT_SECS));
        let status_push = StatusPushConfig::from_env_or_default();
        let alipay = AlipaySettings::from_env();
        let wechat = WechatSettings::from_env();
        if alipay.is_none() && wechat.is_none() {
            warn!("🪛️ Neither Alipay nor WeChat Pay is configured. No payments can be taken.");
        }
        Self {
            host,
            port,
            database_url,
            dev_mode,
            use_x_forwarded_for,
            use_forwarded,
            user_header,
            payment_expiry,
            reconcile_interval,
            reconciliation,
            provider_timeout,
            status_push,
            alipay,
            wechat,
        }
    }

    pub fn payment_flow_config(&self) -> PaymentFlowConfig {
        PaymentFlowConfig {
            gate: GateConfig::default().with_dev_mode(self.dev_mode),
            payment_expiry: self.payment_expiry,
        }
    }

    /// Builds an adapter for every configured provider. A provider that is configured but whose keys or URLs are
    /// unusable is an error, rather than being silently left out.
    pub fn provider_registry(&self) -> Result<ProviderRegistry, ServerError> {
        let mut registry = ProviderRegistry::new();
        if let Some(settings) = &self.alipay {
            let adapter = AlipayAdapter::new(settings.adapter_config(self.provider_timeout))
                .map_err(|e| ServerError::ConfigurationError(format!("Alipay: {e}")))?;
            registry = registry.with_adapter(Arc::new(adapter));
            info!("🪛️ Alipay payments enabled");
        }
        if let Some(settings) = &self.wechat {
            let adapter = WechatPayAdapter::new(settings.adapter_config(self.provider_timeout))
                .map_err(|e| ServerError::ConfigurationError(format!("WeChat Pay: {e}")))?;
            registry = registry.with_adapter(Arc::new(adapter));
            info!("🪛️ WeChat Pay payments enabled");
        }
        Ok(registry)
    }
}

//-------------------------------------------------  StatusPushConfig  -------------------------------------------------
#[derive(Clone, Debug)]
pub struct StatusPushConfig {
    /// Key for the HMAC-SHA256 signature on status pushes
    pub secret: Secret<String>,
    /// If false, status pushes are accepted without checking the signature. **DANGER**
    pub hmac_checks: bool,
}

impl Default for StatusPushConfig {
    fn default() -> Self {
        Self { secret: Secret::default(), hmac_checks: true }
    }
}

impl StatusPushConfig {
    pub fn from_env_or_default() -> Self {
        let secret = env::var("PAYFLOW_STATUS_PUSH_SECRET").ok().unwrap_or_default();
        let hmac_checks = parse_boolean_flag(env::var("PAYFLOW_STATUS_PUSH_HMAC_CHECKS").ok(), true);
        match (hmac_checks, secret.is_empty()) {
            (true, true) => warn!(
                "🪛️ PAYFLOW_STATUS_PUSH_SECRET is not set. Every status push will be rejected until it is configured."
            ),
            (false, _) => warn!("🚨️ Status push HMAC checks are disabled. Anyone can push payment results. 🚨️"),
            _ => {},
        }
        Self { secret: Secret::from(secret), hmac_checks }
    }
}

//-------------------------------------------------  Providers  --------------------------------------------------------
#[derive(Clone, Debug)]
pub struct AlipaySettings {
    pub app_id: String,
    pub gateway_url: String,
    pub private_key: Secret<String>,
    pub public_key: String,
    pub notify_url: String,
    pub return_url: Option<String>,
}

impl AlipaySettings {
    /// `None` if Alipay is not configured, or is missing a required value.
    pub fn from_env() -> Option<Self> {
        let Ok(app_id) = env::var("PAYFLOW_ALIPAY_APP_ID") else {
            info!("🪛️ PAYFLOW_ALIPAY_APP_ID is not set. Alipay payments are disabled.");
            return None;
        };
        let private_key = required_env("PAYFLOW_ALIPAY_PRIVATE_KEY", "Alipay")?;
        let public_key = required_env("PAYFLOW_ALIPAY_PUBLIC_KEY", "Alipay")?;
        let notify_url = required_env("PAYFLOW_ALIPAY_NOTIFY_URL", "Alipay")?;
        let gateway_url = env::var("PAYFLOW_ALIPAY_GATEWAY_URL").unwrap_or_else(|_| DEFAULT_ALIPAY_GATEWAY.to_string());
        let return_url = env::var("PAYFLOW_ALIPAY_RETURN_URL").ok();
        Some(Self { app_id, gateway_url, private_key: Secret::new(private_key), public_key, notify_url, return_url })
    }

    pub fn adapter_config(&self, timeout: StdDuration) -> AlipayConfig {
        AlipayConfig {
            app_id: self.app_id.clone(),
            gateway_url: self.gateway_url.clone(),
            private_key: self.private_key.clone(),
            alipay_public_key: self.public_key.clone(),
            notify_url: self.notify_url.clone(),
            return_url: self.return_url.clone(),
            timeout,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WechatSettings {
    pub app_id: String,
    pub mch_id: String,
    pub api_key: Secret<String>,
    pub sign_type: WechatSignType,
    pub gateway_url: String,
    pub notify_url: String,
}

impl WechatSettings {
    /// `None` if WeChat Pay is not configured, or is missing a required value.
    pub fn from_env() -> Option<Self> {
        let Ok(mch_id) = env::var("PAYFLOW_WECHAT_MCH_ID") else {
            info!("🪛️ PAYFLOW_WECHAT_MCH_ID is not set. WeChat Pay payments are disabled.");
            return None;
        };
        let app_id = required_env("PAYFLOW_WECHAT_APP_ID", "WeChat Pay")?;
        let api_key = required_env("PAYFLOW_WECHAT_API_KEY", "WeChat Pay")?;
        let notify_url = required_env("PAYFLOW_WECHAT_NOTIFY_URL", "WeChat Pay")?;
        let sign_type = match env::var("PAYFLOW_WECHAT_SIGN_TYPE") {
            Ok(s) => s.parse::<WechatSignType>().unwrap_or_else(|e| {
                warn!("🪛️ {e}. Using MD5 instead.");
                WechatSignType::Md5
            }),
            Err(_) => WechatSignType::default(),
        };
        let gateway_url = env::var("PAYFLOW_WECHAT_GATEWAY_URL").unwrap_or_else(|_| DEFAULT_WECHAT_GATEWAY.to_string());
        Some(Self { app_id, mch_id, api_key: Secret::new(api_key), sign_type, gateway_url, notify_url })
    }

    pub fn adapter_config(&self, timeout: StdDuration) -> WechatConfig {
        WechatConfig {
            app_id: self.app_id.clone(),
            mch_id: self.mch_id.clone(),
            api_key: self.api_key.clone(),
            sign_type: self.sign_type,
            gateway_url: self.gateway_url.clone(),
            notify_url: self.notify_url.clone(),
            timeout,
        }
    }
}

fn required_env(name: &str, provider: &str) -> Option<String> {
    match env::var(name) {
        Ok(s) if !s.trim().is_empty() => Some(s),
        _ => {
            error!("🪛️ {name} is not set. {provider} payments are disabled until it is.");
            None
        },
    }
}

fn parse_env_or_default<T>(name: &str, default: T) -> T
where
    T: FromStr + Display + Copy,
    T::Err: Display,
{
    match env::var(name) {
        Ok(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            error!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}, instead.");
            default
        }),
        Err(_) => {
            debug!("🪛️ {name} is not set. Using the default value of {default}.");
            default
        },
    }
}

//-------------------------------------------------  ServerOptions  ----------------------------------------------------
/// A subset of the server configuration that the route handlers need. Secrets are kept out of it, so that it can be
/// shared freely as app data.
#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub use_x_forwarded_for: bool,
    pub use_forwarded: bool,
    pub user_header: String,
}

impl ServerOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            use_x_forwarded_for: config.use_x_forwarded_for,
            use_forwarded: config.use_forwarded,
            user_header: config.user_header.clone(),
        }
    }
}
