use std::{net::IpAddr, str::FromStr};

use actix_web::{http::header, HttpRequest};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use log::{debug, trace};
use payflow_engine::{
    db_types::RequestContext,
    payment_objects::{ClientRequest, CsrfHeaders},
};
use regex::Regex;
use sha2::Sha256;

use crate::{config::ServerOptions, errors::ServerError};

/// Stands in for the client address when none can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Get the remote IP address from the request. It uses 3 sources to determine the IP address, in decreasing order
/// of preference:
/// 1. The `X-Forwarded-For` header, iif `use_x_forwarded_for` is set to true in the configuration.
/// 2. The `Forwarded` header, iif `use_forwarded` is set to true in the configuration.
/// 3. The peer address from the connection info.
pub fn get_remote_ip(req: &HttpRequest, use_x_forwarded_for: bool, use_forwarded: bool) -> Option<IpAddr> {
    let mut result = None;
    if use_x_forwarded_for {
        trace!("Checking X-Forwarded-For header");
        // The left-most entry is the original client
        result = req
            .headers()
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| IpAddr::from_str(s.trim()).ok());
        if let Some(ip) = result {
            debug!("Using X-Forwarded-For header for remote address: {ip}");
        }
    }
    if use_forwarded && result.is_none() {
        trace!("Checking Forwarded header");
        result = req.headers().get("Forwarded").and_then(|v| v.to_str().ok()).and_then(forwarded_for);
        if let Some(ip) = result {
            debug!("Using Forwarded header for remote address: {ip}");
        }
    }
    result.or_else(|| {
        let peer_addr = req.connection_info().peer_addr().map(|a| a.to_string());
        trace!("Using Peer address for remote address: {:?}", peer_addr);
        peer_addr.and_then(|s| IpAddr::from_str(&s).ok())
    })
}

/// Extracts the `for=` address from a `Forwarded` header value, e.g. `for="[2001:db8::1]";proto=https`.
fn forwarded_for(value: &str) -> Option<IpAddr> {
    let re = Regex::new(r#"(?i)for=(?P<ip>[^;,]+)"#).ok()?;
    let ip = re.captures(value)?.name("ip")?.as_str();
    let ip = ip.trim().trim_matches('"').trim_start_matches('[');
    // IPv6 is bracketed and may carry a port: [2001:db8::1]:4711
    let ip = match ip.split_once(']') {
        Some((addr, _)) => addr,
        None => ip,
    };
    IpAddr::from_str(ip).ok()
}

/// Identifies the caller. The user id is set by the fronting auth proxy; a request without one is not authenticated.
pub fn client_request(req: &HttpRequest, options: &ServerOptions) -> Result<ClientRequest, ServerError> {
    let user_id = header_value(req, &options.user_header)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ServerError::Unauthenticated(format!("The {} header is missing", options.user_header)))?;
    let ip = get_remote_ip(req, options.use_x_forwarded_for, options.use_forwarded)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_IP.to_string());
    let mut context = RequestContext::new(ip);
    if let Some(agent) = header_value(req, header::USER_AGENT.as_str()) {
        context = context.with_user_agent(agent);
    }
    let csrf = CsrfHeaders {
        origin: header_value(req, header::ORIGIN.as_str()),
        referer: header_value(req, header::REFERER.as_str()),
        host: header_value(req, header::HOST.as_str()).or_else(|| Some(req.connection_info().host().to_string())),
    };
    Ok(ClientRequest::new(user_id.trim(), context).with_csrf_headers(csrf))
}

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers().get(name).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

/// Base64-encoded HMAC-SHA256 of `data`.
pub fn calculate_hmac(secret: &str, data: &[u8]) -> String {
    // HMAC takes keys of any length, so this cannot fail
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::default(),
    };
    mac.update(data);
    BASE64.encode(mac.finalize().into_bytes())
}

/// Checks a base64-encoded HMAC-SHA256 signature in constant time.
pub fn verify_hmac(secret: &str, data: &[u8], signature: &str) -> bool {
    let Ok(expected) = BASE64.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(data);
    mac.verify_slice(&expected).is_ok()
}
