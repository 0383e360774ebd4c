//! Envoy external processing filter for gRPC payloads.
//!
//! The proxy streams request/response headers and bodies to this service.
//! Bodies of `POST` exchanges are split into length-delimited frames, each
//! frame is decoded against a protobuf schema loaded at startup, rewritten
//! by the mutation rules, and re-encoded back into the body.

pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod grpc_service;
pub mod health;
pub mod phase;
pub mod policy;
pub mod registry;
pub mod rewrite;
pub mod stream_handler;
pub mod utils;

pub use error::{FilterError, Result};
