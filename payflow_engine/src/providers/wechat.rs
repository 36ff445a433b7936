//! WeChat Pay (API v2) adapter.
//!
//! Everything travels as a flat `<xml>` document. The signature is MD5 or HMAC-SHA256 over the canonical parameter
//! string with `&key=<merchant API key>` appended, rendered as uppercase hex. Amounts (`total_fee`) are integer fen.
use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use log::*;
use md5::{Digest, Md5};
use payflow_common::{Cents, Secret};
use rand::{distributions::Alphanumeric, Rng};
use sha2::Sha256;

use crate::{
    db_types::{PaymentMethod, PaymentProvider},
    providers::{
        canonical_string,
        format_china_time,
        parse_china_time,
        xml::{parse_flat_xml, to_cdata_xml},
        AckKind,
        ProviderAck,
        ProviderAdapter,
        ProviderError,
        ProviderNotification,
        ProviderStatusReport,
        QueryOutcome,
        RedirectRequest,
        SignedParams,
    },
};

pub const WECHAT_SUCCESS: &str = "SUCCESS";
const WECHAT_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WechatSignType {
    #[default]
    Md5,
    HmacSha256,
}

impl WechatSignType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WechatSignType::Md5 => "MD5",
            WechatSignType::HmacSha256 => "HMAC-SHA256",
        }
    }
}

impl FromStr for WechatSignType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MD5" => Ok(Self::Md5),
            "HMAC-SHA256" | "HMAC_SHA256" => Ok(Self::HmacSha256),
            other => Err(ProviderError::ConfigurationError(format!("Unsupported WeChat sign type: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WechatConfig {
    pub app_id: String,
    pub mch_id: String,
    pub api_key: Secret<String>,
    pub sign_type: WechatSignType,
    /// Base URL of the merchant API, e.g. `https://api.mch.weixin.qq.com`
    pub gateway_url: String,
    pub notify_url: String,
    pub timeout: Duration,
}

pub struct WechatPayAdapter {
    config: WechatConfig,
    client: reqwest::Client,
}

impl WechatPayAdapter {
    pub fn new(config: WechatConfig) -> Result<Self, ProviderError> {
        if config.api_key.is_empty() {
            return Err(ProviderError::ConfigurationError("The WeChat Pay API key is empty".to_string()));
        }
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        debug!("💳️ WeChat Pay adapter configured for merchant {}", config.mch_id);
        Ok(Self { config, client })
    }

    /// Signs with an explicit sign type. Requests and callbacks are always signed with the configured one.
    pub fn sign_with(&self, params: &SignedParams, sign_type: WechatSignType) -> Result<String, ProviderError> {
        let key = self.config.api_key.reveal();
        let message = format!("{}&key={key}", canonical_string(params, &["sign"]));
        let digest = match sign_type {
            WechatSignType::Md5 => Md5::digest(message.as_bytes()).to_vec(),
            WechatSignType::HmacSha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
                    .map_err(|e| ProviderError::SigningError(e.to_string()))?;
                mac.update(message.as_bytes());
                mac.finalize().into_bytes().to_vec()
            },
        };
        Ok(to_upper_hex(&digest))
    }

    /// A declared `sign_type` must be the configured one. Callbacks in MD5 mode usually leave it out.
    fn declares_configured_sign_type(&self, params: &SignedParams) -> bool {
        match params.get("sign_type") {
            None => true,
            Some(declared) => match declared.parse::<WechatSignType>() {
                Ok(sign_type) if sign_type == self.config.sign_type => true,
                _ => {
                    warn!(
                        "💳️ WeChat Pay message declares sign type {declared}, but {} is configured",
                        self.config.sign_type.as_str()
                    );
                    false
                },
            },
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.gateway_url.trim_end_matches('/'))
    }

    fn base_params(&self) -> SignedParams {
        let mut params = SignedParams::new();
        params.insert("appid".into(), self.config.app_id.clone());
        params.insert("mch_id".into(), self.config.mch_id.clone());
        params.insert("nonce_str".into(), nonce());
        params.insert("sign_type".into(), self.config.sign_type.as_str().into());
        params
    }

    async fn post_xml(&self, path: &str, mut params: SignedParams) -> Result<SignedParams, ProviderError> {
        let sign = self.sign(&params)?;
        params.insert("sign".into(), sign);
        let body = to_cdata_xml(&params)?;
        let response = self
            .client
            .post(self.endpoint(path))
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .body(body)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        trace!("💳️ WeChat Pay {path} response: {response}");
        parse_flat_xml(&response)
    }

    /// Checks the communication-level result and the signature of an API response.
    fn check_response(&self, response: &SignedParams) -> Result<(), ProviderError> {
        if response.get("return_code").map(String::as_str) != Some(WECHAT_SUCCESS) {
            let msg = response.get("return_msg").cloned().unwrap_or_default();
            return Err(ProviderError::Rejected(format!("WeChat Pay returned FAIL: {msg}")));
        }
        match response.get("sign") {
            Some(sign) if self.verify(response, sign) => Ok(()),
            _ => Err(ProviderError::InvalidSignature),
        }
    }

    /// Interprets a verified or unverified `orderquery` response.
    pub fn interpret_query_response(&self, response: &SignedParams) -> QueryOutcome {
        if let Err(e) = self.check_response(response) {
            return QueryOutcome::Unknown(e.to_string());
        }
        if response.get("result_code").map(String::as_str) != Some(WECHAT_SUCCESS) {
            let code = response.get("err_code").cloned().unwrap_or_default();
            let desc = response.get("err_code_des").cloned().unwrap_or_default();
            return QueryOutcome::Unknown(format!("WeChat Pay query failed. {code} {desc}"));
        }
        let Some(external_status) = response.get("trade_state").cloned() else {
            return QueryOutcome::Unknown("WeChat Pay response has no trade_state".to_string());
        };
        QueryOutcome::Found(ProviderStatusReport {
            external_status,
            paid_amount: response.get("total_fee").and_then(|f| parse_fen(f)),
            paid_at: response.get("time_end").and_then(|t| parse_china_time(t, WECHAT_TIME_FORMAT)),
            failure_detail: response.get("trade_state_desc").cloned(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for WechatPayAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Wechat
    }

    fn sign(&self, params: &SignedParams) -> Result<String, ProviderError> {
        self.sign_with(params, self.config.sign_type)
    }

    fn verify(&self, params: &SignedParams, signature: &str) -> bool {
        if !self.declares_configured_sign_type(params) {
            return false;
        }
        match self.sign(params) {
            Ok(expected) => constant_time_eq(expected.as_bytes(), signature.trim().to_ascii_uppercase().as_bytes()),
            Err(_) => false,
        }
    }

    fn parse_notification(
        &self,
        body: &[u8],
        _content_type: Option<&str>,
    ) -> Result<ProviderNotification, ProviderError> {
        let xml = std::str::from_utf8(body).map_err(|e| ProviderError::ParseError(e.to_string()))?;
        let fields = parse_flat_xml(xml)?;
        let system_ok = fields.get("return_code").map(String::as_str) == Some(WECHAT_SUCCESS);
        let external_status = fields.get("trade_state").or_else(|| fields.get("result_code")).cloned();
        let failure_detail = fields.get("err_code_des").or_else(|| fields.get("err_code")).cloned();
        Ok(ProviderNotification {
            system_ok,
            system_message: fields.get("return_msg").cloned(),
            signature: fields.get("sign").cloned(),
            external_id: fields.get("out_trade_no").cloned(),
            external_status,
            paid_amount: fields.get("total_fee").and_then(|f| parse_fen(f)),
            provider_trade_no: fields.get("transaction_id").cloned(),
            paid_at: fields.get("time_end").and_then(|t| parse_china_time(t, WECHAT_TIME_FORMAT)),
            failure_detail,
            fields,
        })
    }

    fn ack(&self, kind: AckKind) -> ProviderAck {
        let (code, msg) = match &kind {
            AckKind::Success => (WECHAT_SUCCESS, "OK".to_string()),
            AckKind::Rejected(reason) => ("FAIL", reason.clone()),
            AckKind::NotFound => ("FAIL", "ORDER_NOT_FOUND".to_string()),
            AckKind::Retry => ("FAIL", "SYSTEM_ERROR".to_string()),
        };
        let mut params = SignedParams::new();
        params.insert("return_code".into(), code.into());
        params.insert("return_msg".into(), msg);
        let body = to_cdata_xml(&params).unwrap_or_else(|e| {
            error!("💳️ Could not render WeChat Pay acknowledgement. {e}");
            format!("<xml><return_code><![CDATA[{code}]]></return_code></xml>")
        });
        ProviderAck { status: kind.http_status(), content_type: "text/xml; charset=utf-8", body }
    }

    async fn create_redirect(&self, request: RedirectRequest<'_>) -> Result<String, ProviderError> {
        let tx = request.transaction;
        if tx.payment_method != PaymentMethod::WechatNative {
            let method = tx.payment_method;
            return Err(ProviderError::Rejected(format!("{method} payments cannot be made through WeChat Pay")));
        }
        let mut params = self.base_params();
        params.insert("body".into(), request.subject.into());
        params.insert("out_trade_no".into(), request.external_id.into());
        params.insert("total_fee".into(), tx.amount.value().to_string());
        params.insert("spbill_create_ip".into(), tx.request_context.ip.clone());
        params.insert("notify_url".into(), self.config.notify_url.clone());
        params.insert("trade_type".into(), "NATIVE".into());
        params.insert("product_id".into(), tx.solution_id.clone());
        params.insert("time_expire".into(), format_china_time(request.expires_at, WECHAT_TIME_FORMAT));
        let response = self.post_xml("/pay/unifiedorder", params).await?;
        self.check_response(&response)?;
        if response.get("result_code").map(String::as_str) != Some(WECHAT_SUCCESS) {
            let desc = response.get("err_code_des").or_else(|| response.get("err_code")).cloned().unwrap_or_default();
            return Err(ProviderError::Rejected(format!("WeChat Pay unified order failed: {desc}")));
        }
        let code_url = response
            .get("code_url")
            .cloned()
            .ok_or_else(|| ProviderError::ParseError("Unified order response has no code_url".to_string()))?;
        debug!("💳️ WeChat Pay code URL created for {}", request.external_id);
        Ok(code_url)
    }

    async fn query_status(&self, external_id: &str) -> QueryOutcome {
        let mut params = self.base_params();
        params.insert("out_trade_no".into(), external_id.into());
        match self.post_xml("/pay/orderquery", params).await {
            Ok(response) => self.interpret_query_response(&response),
            Err(e) => {
                warn!("💳️ WeChat Pay status query for {external_id} failed. {e}");
                QueryOutcome::Unknown(e.to_string())
            },
        }
    }
}

fn parse_fen(s: &str) -> Option<Cents> {
    s.trim().parse::<i64>().ok().map(Cents::from)
}

fn nonce() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(32).map(char::from).collect()
}

fn to_upper_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::providers::params_from;

    const API_KEY: &str = "192006250b4c09247ec02edce69f6a2d";

    fn adapter(sign_type: WechatSignType) -> WechatPayAdapter {
        WechatPayAdapter::new(WechatConfig {
            app_id: "wxd930ea5d5a258f4f".into(),
            mch_id: "10000100".into(),
            api_key: Secret::new(API_KEY.into()),
            sign_type,
            gateway_url: "https://api.mch.weixin.qq.com".into(),
            notify_url: "https://pay.example.com/payments/webhook/wechat".into(),
            timeout: Duration::from_secs(10),
        })
        .unwrap()
    }

    fn sample_params() -> SignedParams {
        params_from([
            ("appid", "wxd930ea5d5a258f4f"),
            ("mch_id", "10000100"),
            ("device_info", "1000"),
            ("body", "test"),
            ("nonce_str", "ibuaiVcKdpRxkhJA"),
        ])
    }

    #[test]
    fn md5_signature() {
        let wechat = adapter(WechatSignType::Md5);
        let sign = wechat.sign(&sample_params()).unwrap();
        assert_eq!(sign, "9A0A8659F005D6984697E2CA0A9CF3B7");
        assert!(wechat.verify(&sample_params(), "9a0a8659f005d6984697e2ca0a9cf3b7"));
        assert!(!wechat.verify(&sample_params(), "9A0A8659F005D6984697E2CA0A9CF3B8"));
    }

    #[test]
    fn hmac_sha256_signature() {
        let wechat = adapter(WechatSignType::HmacSha256);
        let sign = wechat.sign_with(&sample_params(), WechatSignType::HmacSha256).unwrap();
        assert_eq!(sign, "6A9AE1657590FD6257D693A078E1C3E4BB6BA4DC30B23E0EE2496E54170DACD6");
    }

    #[test]
    fn only_the_configured_sign_type_verifies() {
        let md5 = adapter(WechatSignType::Md5);
        let hmac = adapter(WechatSignType::HmacSha256);
        let params = sample_params();
        let md5_sign = md5.sign(&params).unwrap();
        assert!(!hmac.verify(&params, &md5_sign));

        let mut declared_md5 = sample_params();
        declared_md5.insert("sign_type".into(), "MD5".into());
        let md5_sign = md5.sign(&declared_md5).unwrap();
        assert!(md5.verify(&declared_md5, &md5_sign));
        assert!(!hmac.verify(&declared_md5, &md5_sign));

        let mut declared_hmac = sample_params();
        declared_hmac.insert("sign_type".into(), "HMAC-SHA256".into());
        let hmac_sign = hmac.sign(&declared_hmac).unwrap();
        assert!(hmac.verify(&declared_hmac, &hmac_sign));
        // A genuine HMAC signature still fails on an adapter that expects MD5
        assert!(!md5.verify(&declared_hmac, &hmac_sign));
    }

    #[test]
    fn notification_parsing() {
        let wechat = adapter(WechatSignType::Md5);
        let mut fields = params_from([
            ("return_code", "SUCCESS"),
            ("result_code", "SUCCESS"),
            ("out_trade_no", "PF20240501123000ABCDEF0123456789"),
            ("transaction_id", "4200000001"),
            ("total_fee", "10000"),
            ("time_end", "20240501203000"),
        ]);
        let sign = wechat.sign(&fields).unwrap();
        fields.insert("sign".into(), sign);
        let body = to_cdata_xml(&fields).unwrap();
        let n = wechat.parse_notification(body.as_bytes(), Some("text/xml")).unwrap();
        assert!(n.system_ok);
        assert!(wechat.verify_notification(&n));
        assert_eq!(n.external_status.as_deref(), Some("SUCCESS"));
        assert_eq!(n.paid_amount, Some(Cents::from(10_000)));
        assert_eq!(n.provider_trade_no.as_deref(), Some("4200000001"));

        let failed = "<xml><return_code><![CDATA[FAIL]]></return_code><return_msg>bad sign</return_msg></xml>";
        let n = wechat.parse_notification(failed.as_bytes(), None).unwrap();
        assert!(!n.system_ok);
        assert!(!wechat.verify_notification(&n));
    }

    #[test]
    fn acks() {
        let wechat = adapter(WechatSignType::Md5);
        let ack = wechat.ack(AckKind::Success);
        assert_eq!(ack.status, 200);
        assert_eq!(
            ack.body,
            "<xml><return_code><![CDATA[SUCCESS]]></return_code><return_msg><![CDATA[OK]]></return_msg></xml>"
        );
        let ack = wechat.ack(AckKind::Retry);
        assert_eq!(ack.status, 500);
        assert!(ack.body.contains("<![CDATA[FAIL]]>"));
    }

    #[test]
    fn query_responses() {
        let wechat = adapter(WechatSignType::Md5);
        let mut response = params_from([
            ("return_code", "SUCCESS"),
            ("result_code", "SUCCESS"),
            ("trade_state", "NOTPAY"),
            ("total_fee", "500"),
        ]);
        let unsigned = wechat.interpret_query_response(&response);
        assert!(matches!(unsigned, QueryOutcome::Unknown(_)));
        let sign = wechat.sign(&response).unwrap();
        response.insert("sign".into(), sign);
        match wechat.interpret_query_response(&response) {
            QueryOutcome::Found(report) => {
                assert_eq!(report.external_status, "NOTPAY");
                assert_eq!(report.paid_amount, Some(Cents::from(500)));
            },
            other => panic!("Unexpected outcome {other:?}"),
        }
    }
}
