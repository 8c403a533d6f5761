//! # Rpcurl Core
//!
//! `rpcurl-core` is the foundational library powering the Rpcurl CLI. It provides
//! everything needed to call any gRPC server without compile-time knowledge of its
//! Protobuf schema.
//!
//! ## Key Components
//!
//! * **[`target`]:** Turns the address typed by the user (`host:port`, `https://host/path`,
//!   `unix:///tmp/sock`...) into a structured [`target::ParsedTarget`].
//! * **[`transport`]:** Negotiates exactly one transport security mode (plaintext, TLS or ALTS)
//!   and dials the server.
//! * **[`source`]:** The [`source::DescriptorSource`] abstraction, with a server reflection
//!   backed source, a file backed source and a composite of both.
//! * **[`invoke`]:** Drives a single dynamic RPC through a descriptor source and reports
//!   what happened to an [`invoke::InvocationEventHandler`].
//!
//! ## Internal clients
//!
//! * **[`GrpcClient`](grpc::client::GrpcClient):** A dynamic gRPC client moving
//!   `prost_reflect::DynamicMessage` values through a custom codec.
//! * **[`ReflectionClient`](reflection::client::ReflectionClient):** A gRPC Reflection client
//!   speaking `grpc.reflection.v1` and falling back to `v1alpha` on older servers.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod format;
pub mod grpc;
pub mod invoke;
pub mod metadata;
pub mod protoset;
pub mod reflection;
pub mod source;
pub mod status;
pub mod target;
pub mod timing;
pub mod transport;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
