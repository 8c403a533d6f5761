//! # Server Reflection
//!
//! This module contains the logic necessary to interact with the gRPC Server Reflection Protocol.
//!
//! It enables the client to query a server for its own Protobuf schema at runtime, allowing
//! `rpcurl` to function without local descriptor files.
//!
//! Both `grpc.reflection.v1` and the older `grpc.reflection.v1alpha` services are supported.
//! They share the same wire format, so the `v1` message types are used for both.
pub mod client;
