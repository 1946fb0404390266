//! Wire-level types exchanged between host handlers and a compiled routing core.
//!
//! Everything that crosses the boundary is plain JSON. Request bodies are carried as a
//! [`Body`] inside the crate and only turned into their JSON-safe marker form at the
//! edges, through [`Body::from_wire`] and [`Body::to_wire`].
//!
//! # Modules
//!
//! - [`body`]: the body sum type and its marker encoding
//! - [`codec`]: body classification into [`BodyMetadata`] and materialization back into typed views
//! - [`WirePayload`]: the request payload the core hands to handlers
//! - [`Request`]: the per-request facade handlers receive
//! - [`StructuredResponse`]: the `{status, headers, body}` shape every handler result is normalized into
//!
//! # Example
//!
//! ```
//! use micro_wire::{Body, Request, WirePayload};
//! use serde_json::json;
//!
//! let payload = WirePayload {
//!     method: "POST".into(),
//!     path: "/items".into(),
//!     body: json!({"name": "widget"}),
//!     ..WirePayload::default()
//! };
//!
//! let request = Request::from_payload(payload).unwrap();
//! assert_eq!(request.json().unwrap(), json!({"name": "widget"}));
//! assert!(matches!(request.body(), Body::Json(_)));
//! ```

pub mod body;
pub mod codec;
mod error;
mod facade;
mod payload;
mod response;

pub use body::{Body, BodyKind, MultipartFile};
pub use codec::{BodyMetadata, Materialized};
pub use error::WireError;
pub use facade::Request;
pub use payload::WirePayload;
pub use response::StructuredResponse;
