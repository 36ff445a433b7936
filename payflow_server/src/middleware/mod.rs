mod hmac;

pub use hmac::{HmacMiddlewareFactory, HmacMiddlewareService, STATUS_PUSH_HMAC_HEADER};
