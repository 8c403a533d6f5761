//! # Generic gRPC Client
//!
//! This module wraps a standard `tonic` client to provide a generic interface for
//! gRPC communication. It is agnostic to the specific Protobuf messages being exchanged.
//!
//! ## How it works
//!
//! The [`GrpcClient`] utilizes the [`super::codec::DynamicCodec`] to handle serialization.
//! It only needs the `MethodDescriptor` to build the HTTP/2 path and to decode responses.
//!
//! Responses are returned whole (`tonic::Response`), so callers can observe the response
//! headers, and for streaming calls the trailers once the stream is drained.
use super::codec::DynamicCodec;
use crate::BoxError;
use futures_util::Stream;
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::str::FromStr;
use std::time::Duration;
use tonic::{
    Request, Response, Status, Streaming, client::GrpcService, metadata::MetadataMap,
    transport::Channel,
};

#[derive(thiserror::Error, Debug)]
pub enum GrpcRequestError {
    #[error("Internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),
    #[error("Method '{0}' does not map to a valid gRPC path")]
    InvalidPath(String),
}

/// The outcome of a call that reached the server: a response or the status it failed with.
pub type CallResult<T> = Result<Response<T>, Status>;

/// A gRPC client for methods whose types are only known at runtime.
pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        let client = tonic::client::Grpc::new(service);
        Self { client }
    }

    /// Caps the size of decoded response messages.
    pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
        self.client = self.client.max_decoding_message_size(limit);
        self
    }

    /// Performs a Unary gRPC call (Single Request -> Single Response).
    ///
    /// # Returns
    /// * `Ok(Ok(Response))` - Successful RPC execution.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(GrpcRequestError)` - Failed to send the request.
    pub async fn unary(
        &mut self,
        method: &MethodDescriptor,
        request: Request<DynamicMessage>,
    ) -> Result<CallResult<DynamicMessage>, GrpcRequestError> {
        self.ready().await?;
        let path = http_path(method)?;
        let codec = DynamicCodec::new(method.output());

        Ok(self.client.unary(request, path, codec).await)
    }

    /// Performs a Server Streaming gRPC call (Single Request -> Stream of Responses).
    pub async fn server_streaming(
        &mut self,
        method: &MethodDescriptor,
        request: Request<DynamicMessage>,
    ) -> Result<CallResult<Streaming<DynamicMessage>>, GrpcRequestError> {
        self.ready().await?;
        let path = http_path(method)?;
        let codec = DynamicCodec::new(method.output());

        Ok(self.client.server_streaming(request, path, codec).await)
    }

    /// Performs a Client Streaming gRPC call (Stream of Requests -> Single Response).
    pub async fn client_streaming(
        &mut self,
        method: &MethodDescriptor,
        request: Request<impl Stream<Item = DynamicMessage> + Send + 'static>,
    ) -> Result<CallResult<DynamicMessage>, GrpcRequestError> {
        self.ready().await?;
        let path = http_path(method)?;
        let codec = DynamicCodec::new(method.output());

        Ok(self.client.client_streaming(request, path, codec).await)
    }

    /// Performs a Bidirectional Streaming gRPC call (Stream of Requests -> Stream of Responses).
    pub async fn bidirectional_streaming(
        &mut self,
        method: &MethodDescriptor,
        request: Request<impl Stream<Item = DynamicMessage> + Send + 'static>,
    ) -> Result<CallResult<Streaming<DynamicMessage>>, GrpcRequestError> {
        self.ready().await?;
        let path = http_path(method)?;
        let codec = DynamicCodec::new(method.output());

        Ok(self.client.streaming(request, path, codec).await)
    }

    async fn ready(&mut self) -> Result<(), GrpcRequestError> {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))
    }
}

/// Wraps a payload into a request carrying `metadata` and an optional gRPC timeout.
pub fn build_request<T>(
    payload: T,
    metadata: MetadataMap,
    timeout: Option<Duration>,
) -> Request<T> {
    let mut request = Request::new(payload);
    *request.metadata_mut() = metadata;
    if let Some(timeout) = timeout {
        request.set_timeout(timeout);
    }
    request
}

fn http_path(method: &MethodDescriptor) -> Result<http::uri::PathAndQuery, GrpcRequestError> {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::from_str(&path).map_err(|_| GrpcRequestError::InvalidPath(path))
}
