//! # Payflow server
//! The HTTP front end of the payment engine. It is responsible for:
//! * Creating payment attempts for the caller's orders and handing out the provider payment URL.
//! * Reporting payment status, syncing with the provider first when the result is still outstanding.
//! * Receiving provider callbacks (Alipay and WeChat Pay) and replying in each provider's own format.
//! * Accepting status pushes from trusted internal services, authenticated with an HMAC.
//! * Bounded retries of failed payments.
//! * Running the reconciliation worker, which polls the providers for payments whose callback never arrived.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! * `GET /health`
//! * `POST /payments`
//! * `GET /payments/{id}/status`
//! * `POST /payments/{id}/status` (HMAC authenticated)
//! * `GET /payments/{id}/retry` and `POST /payments/{id}/retry`
//! * `POST /payments/webhook/{provider}`
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod helpers;
pub mod middleware;
pub mod reconciliation_worker;
pub mod routes;
pub mod server;
