//! Alipay Open Platform adapter.
//!
//! Requests and callbacks are signed with RSA2 (SHA256withRSA, PKCS#1 v1.5, base64) over the canonical parameter
//! string, excluding `sign` and `sign_type`. We sign with the merchant's private key and verify with Alipay's public
//! key. Synchronous API responses are signed over the exact JSON text of the `*_response` object.
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use log::*;
use payflow_common::{Cents, Secret};
use rsa::{
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey},
    pkcs1v15::{Signature, SigningKey, VerifyingKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    signature::{SignatureEncoding, Signer, Verifier},
    RsaPrivateKey,
    RsaPublicKey,
};
use serde::Deserialize;
use serde_json::{json, value::RawValue, Value};
use sha2::Sha256;
use url::Url;

use crate::{
    db_types::{PaymentMethod, PaymentProvider},
    providers::{
        canonical_string,
        format_china_time,
        parse_china_time,
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

pub const ALIPAY_SUCCESS_CODE: &str = "10000";
const ALIPAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SIGNATURE_EXCLUDED_KEYS: [&str; 2] = ["sign", "sign_type"];

#[derive(Debug, Clone)]
pub struct AlipayConfig {
    pub app_id: String,
    pub gateway_url: String,
    /// The merchant's RSA private key, PEM or bare base64 DER (PKCS#8 or PKCS#1)
    pub private_key: Secret<String>,
    /// Alipay's RSA public key, PEM or bare base64 DER
    pub alipay_public_key: String,
    pub notify_url: String,
    pub return_url: Option<String>,
    pub timeout: Duration,
}

pub struct AlipayAdapter {
    config: AlipayConfig,
    signing_key: SigningKey<Sha256>,
    verifying_key: VerifyingKey<Sha256>,
    client: reqwest::Client,
}

impl AlipayAdapter {
    pub fn new(config: AlipayConfig) -> Result<Self, ProviderError> {
        let private_key = load_private_key(config.private_key.reveal())?;
        let public_key = load_public_key(&config.alipay_public_key)?;
        Url::parse(&config.gateway_url)
            .map_err(|e| ProviderError::ConfigurationError(format!("Invalid Alipay gateway URL: {e}")))?;
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        debug!("💳️ Alipay adapter configured for app {}", config.app_id);
        Ok(Self {
            config,
            signing_key: SigningKey::<Sha256>::new(private_key),
            verifying_key: VerifyingKey::<Sha256>::new(public_key),
            client,
        })
    }

    /// Checks an RSA2 signature over an arbitrary message.
    pub fn verify_message(&self, message: &str, signature: &str) -> bool {
        let Ok(bytes) = BASE64.decode(signature.trim()) else {
            return false;
        };
        let Ok(signature) = Signature::try_from(bytes.as_slice()) else {
            return false;
        };
        self.verifying_key.verify(message.as_bytes(), &signature).is_ok()
    }

    fn sign_message(&self, message: &str) -> Result<String, ProviderError> {
        let signature =
            self.signing_key.try_sign(message.as_bytes()).map_err(|e| ProviderError::SigningError(e.to_string()))?;
        Ok(BASE64.encode(signature.to_bytes()))
    }

    /// The public parameters every Open Platform request carries.
    fn common_params(&self, method: &str, biz_content: String) -> SignedParams {
        let mut params = SignedParams::new();
        params.insert("app_id".into(), self.config.app_id.clone());
        params.insert("method".into(), method.into());
        params.insert("format".into(), "JSON".into());
        params.insert("charset".into(), "utf-8".into());
        params.insert("sign_type".into(), "RSA2".into());
        params.insert("timestamp".into(), format_china_time(Utc::now(), ALIPAY_TIME_FORMAT));
        params.insert("version".into(), "1.0".into());
        params.insert("biz_content".into(), biz_content);
        params
    }

    fn signed(&self, mut params: SignedParams) -> Result<SignedParams, ProviderError> {
        let sign = self.sign(&params)?;
        params.insert("sign".into(), sign);
        Ok(params)
    }

    async fn try_query(&self, external_id: &str) -> Result<QueryOutcome, ProviderError> {
        let biz_content = json!({ "out_trade_no": external_id }).to_string();
        let params = self.signed(self.common_params("alipay.trade.query", biz_content))?;
        let body = self
            .client
            .post(&self.config.gateway_url)
            .form(&params)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        trace!("💳️ Alipay query response for {external_id}: {body}");
        self.parse_query_response(&body)
    }

    /// Verifies and interprets an `alipay.trade.query` response.
    pub fn parse_query_response(&self, body: &str) -> Result<QueryOutcome, ProviderError> {
        #[derive(Deserialize)]
        struct Envelope<'a> {
            #[serde(borrow)]
            alipay_trade_query_response: &'a RawValue,
            sign: Option<String>,
        }
        #[derive(Deserialize)]
        struct QueryResponse {
            code: String,
            msg: Option<String>,
            sub_msg: Option<String>,
            trade_status: Option<String>,
            total_amount: Option<String>,
            send_pay_date: Option<String>,
        }
        let envelope: Envelope =
            serde_json::from_str(body).map_err(|e| ProviderError::ParseError(format!("Alipay response: {e}")))?;
        let raw = envelope.alipay_trade_query_response.get();
        match envelope.sign {
            Some(sign) if self.verify_message(raw, &sign) => {},
            _ => return Err(ProviderError::InvalidSignature),
        }
        let response: QueryResponse =
            serde_json::from_str(raw).map_err(|e| ProviderError::ParseError(format!("Alipay response: {e}")))?;
        if response.code != ALIPAY_SUCCESS_CODE {
            let msg = response.sub_msg.or(response.msg).unwrap_or_default();
            return Ok(QueryOutcome::Unknown(format!("Alipay returned code {}: {msg}", response.code)));
        }
        let external_status = response
            .trade_status
            .ok_or_else(|| ProviderError::ParseError("Alipay response has no trade_status".to_string()))?;
        let paid_amount = response.total_amount.and_then(|a| a.parse::<Cents>().ok());
        let paid_at = response.send_pay_date.and_then(|d| parse_china_time(&d, ALIPAY_TIME_FORMAT));
        Ok(QueryOutcome::Found(ProviderStatusReport { external_status, paid_amount, paid_at, failure_detail: None }))
    }
}

#[async_trait]
impl ProviderAdapter for AlipayAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Alipay
    }

    fn sign(&self, params: &SignedParams) -> Result<String, ProviderError> {
        self.sign_message(&canonical_string(params, &SIGNATURE_EXCLUDED_KEYS))
    }

    fn verify(&self, params: &SignedParams, signature: &str) -> bool {
        self.verify_message(&canonical_string(params, &SIGNATURE_EXCLUDED_KEYS), signature)
    }

    fn parse_notification(
        &self,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<ProviderNotification, ProviderError> {
        let is_json = match content_type {
            Some(ct) => ct.contains("json"),
            None => body.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{'),
        };
        let fields = if is_json { json_fields(body)? } else { form_fields(body) };
        let code = fields.get("code").cloned();
        let system_ok = code.as_deref().map(|c| c == ALIPAY_SUCCESS_CODE).unwrap_or(true);
        let system_message = fields.get("sub_msg").or_else(|| fields.get("msg")).cloned();
        let paid_amount = fields.get("total_amount").and_then(|a| a.parse::<Cents>().ok());
        let paid_at = fields.get("gmt_payment").and_then(|d| parse_china_time(d, ALIPAY_TIME_FORMAT));
        Ok(ProviderNotification {
            system_ok,
            system_message,
            signature: fields.get("sign").cloned(),
            external_id: fields.get("out_trade_no").cloned(),
            external_status: fields.get("trade_status").cloned(),
            paid_amount,
            provider_trade_no: fields.get("trade_no").cloned(),
            paid_at,
            failure_detail: None,
            fields,
        })
    }

    fn ack(&self, kind: AckKind) -> ProviderAck {
        let body = match kind {
            AckKind::Success => "success",
            _ => "failure",
        };
        ProviderAck { status: kind.http_status(), content_type: "text/plain; charset=utf-8", body: body.to_string() }
    }

    async fn create_redirect(&self, request: RedirectRequest<'_>) -> Result<String, ProviderError> {
        let (method, product_code) = match request.transaction.payment_method {
            PaymentMethod::AlipayWap => ("alipay.trade.wap.pay", "QUICK_WAP_WAY"),
            PaymentMethod::AlipayPage => ("alipay.trade.page.pay", "FAST_INSTANT_TRADE_PAY"),
            other => {
                return Err(ProviderError::Rejected(format!("{other} payments cannot be made through Alipay")));
            },
        };
        let biz_content = json!({
            "out_trade_no": request.external_id,
            "total_amount": request.transaction.amount.to_string(),
            "subject": request.subject,
            "product_code": product_code,
            "time_expire": format_china_time(request.expires_at, ALIPAY_TIME_FORMAT),
        })
        .to_string();
        let mut params = self.common_params(method, biz_content);
        params.insert("notify_url".into(), self.config.notify_url.clone());
        if let Some(return_url) = &self.config.return_url {
            params.insert("return_url".into(), return_url.clone());
        }
        let params = self.signed(params)?;
        let mut url = Url::parse(&self.config.gateway_url)
            .map_err(|e| ProviderError::ConfigurationError(format!("Invalid Alipay gateway URL: {e}")))?;
        url.query_pairs_mut().extend_pairs(params.iter());
        debug!("💳️ Alipay cashier URL created for {}", request.external_id);
        Ok(url.to_string())
    }

    async fn query_status(&self, external_id: &str) -> QueryOutcome {
        match self.try_query(external_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("💳️ Alipay status query for {external_id} failed. {e}");
                QueryOutcome::Unknown(e.to_string())
            },
        }
    }
}

fn json_fields(body: &[u8]) -> Result<SignedParams, ProviderError> {
    let map: serde_json::Map<String, Value> =
        serde_json::from_slice(body).map_err(|e| ProviderError::ParseError(format!("Alipay notification: {e}")))?;
    let fields = map
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::Null => None,
            Value::String(s) => Some((k, s)),
            other => Some((k, other.to_string())),
        })
        .collect();
    Ok(fields)
}

fn form_fields(body: &[u8]) -> SignedParams {
    url::form_urlencoded::parse(body).map(|(k, v)| (k.into_owned(), v.into_owned())).collect()
}

fn is_pem(key: &str) -> bool {
    key.trim_start().starts_with("-----BEGIN")
}

fn decode_der(key: &str) -> Result<Vec<u8>, ProviderError> {
    let compact: String = key.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64.decode(compact).map_err(|e| ProviderError::ConfigurationError(format!("Key is not valid base64: {e}")))
}

fn load_private_key(key: &str) -> Result<RsaPrivateKey, ProviderError> {
    let key = key.trim();
    let parsed = if is_pem(key) {
        RsaPrivateKey::from_pkcs8_pem(key)
            .map_err(|e| e.to_string())
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(key).map_err(|e| e.to_string()))
    } else {
        let der = decode_der(key)?;
        RsaPrivateKey::from_pkcs8_der(&der)
            .map_err(|e| e.to_string())
            .or_else(|_| RsaPrivateKey::from_pkcs1_der(&der).map_err(|e| e.to_string()))
    };
    parsed.map_err(|e| ProviderError::ConfigurationError(format!("Invalid Alipay merchant private key: {e}")))
}

fn load_public_key(key: &str) -> Result<RsaPublicKey, ProviderError> {
    let key = key.trim();
    let parsed = if is_pem(key) {
        RsaPublicKey::from_public_key_pem(key)
            .map_err(|e| e.to_string())
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(key).map_err(|e| e.to_string()))
    } else {
        let der = decode_der(key)?;
        RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| e.to_string())
            .or_else(|_| RsaPublicKey::from_pkcs1_der(&der).map_err(|e| e.to_string()))
    };
    parsed.map_err(|e| ProviderError::ConfigurationError(format!("Invalid Alipay public key: {e}")))
}
