//! Append-only client for the Tinybird Events API.
//!
//! Accepted event batches are serialized as NDJSON and posted to the
//! configured datasource. Server errors are retried with exponential
//! backoff; client errors fail immediately.

pub mod client;
pub mod transport;

pub use client::{to_ndjson, DeliveryError, RetryPolicy, TinybirdClient};
pub use transport::{EventsTransport, ReqwestTransport, TransportResponse};
