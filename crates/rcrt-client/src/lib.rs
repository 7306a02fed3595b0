/*!
 * RCRT bus client.
 *
 * The sole ingress/egress to the breadcrumb store for both runners:
 * bearer-token auth, breadcrumb CRUD with optimistic updates, the SSE
 * event stream with selector side-filtering, and the secret surface.
 */

mod client;
mod secrets;
mod sse;

pub use client::{ListQuery, RcrtClient};
pub use secrets::{SecretManager, SecretRef, SecretResolution, SecretValue};
pub use sse::{BusEvent, EventStream, StreamHandle, StreamOptions};
