//! # Dynamic Invocation
//!
//! Drives a single RPC whose schema comes from a [`DescriptorSource`]:
//!
//! 1. The method symbol (`package.Service/Method` or `package.Service.Method`) is resolved.
//! 2. Known extensions of the request and response types are loaded, so they can be parsed
//!    and printed.
//! 3. Request messages are read from a [`RequestParser`] and sent according to the
//!    streaming shape of the method.
//! 4. Every step is reported to an [`InvocationEventHandler`].
//!
//! The terminal status of the RPC, whatever it is, is delivered through
//! [`InvocationEventHandler::on_receive_trailers`]. [`invoke`] only fails for problems that
//! prevent the RPC from being attempted at all.
use crate::BoxError;
use crate::format::{FormatError, RequestParser};
use crate::grpc::client::{GrpcClient, GrpcRequestError, build_request};
use crate::source::{Descriptor, DescriptorSource, SourceError};
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor};
use std::time::Duration;
use tonic::client::GrpcService;
use tonic::metadata::MetadataMap;
use tonic::{Status, Streaming};

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error(
        "given method name \"{0}\" is not in expected format: 'service/method' or 'service.method'"
    )]
    InvalidSymbol(String),
    #[error("target server does not expose service \"{0}\"")]
    ServiceNotExposed(String),
    #[error("\"{0}\" is not a service")]
    NotAService(String),
    #[error("service \"{service}\" does not include a method named \"{method}\"")]
    MethodNotFound { service: String, method: String },
    #[error("method \"{0}\" takes a single request, but request data contained more than 1 message")]
    TooManyRequests(String),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("error getting request data: {0}")]
    Format(#[from] FormatError),
    #[error(transparent)]
    Request(#[from] GrpcRequestError),
}

/// Callbacks observing the progress of an invocation.
pub trait InvocationEventHandler {
    /// The method was resolved.
    fn on_resolve_method(&mut self, method: &MethodDescriptor);
    /// Request metadata is about to be sent.
    fn on_send_headers(&mut self, metadata: &MetadataMap);
    /// Response headers were received.
    fn on_receive_headers(&mut self, metadata: &MetadataMap);
    fn on_receive_response(&mut self, message: &DynamicMessage);
    /// The RPC completed with `status`.
    fn on_receive_trailers(&mut self, status: &Status, trailers: &MetadataMap);
}

/// Splits a method symbol into its service and method names.
///
/// The separator is the last `/` when there is one, otherwise the last `.`.
pub fn parse_method_symbol(symbol: &str) -> Result<(&str, &str), InvokeError> {
    let trimmed = symbol.strip_prefix('.').unwrap_or(symbol);

    trimmed
        .rsplit_once('/')
        .or_else(|| trimmed.rsplit_once('.'))
        .filter(|(service, method)| !service.is_empty() && !method.is_empty())
        .ok_or_else(|| InvokeError::InvalidSymbol(symbol.to_string()))
}

/// Invokes `method_name`, reading requests from `requests` and reporting to `handler`.
pub async fn invoke<D, S>(
    source: &mut D,
    client: &mut GrpcClient<S>,
    method_name: &str,
    metadata: MetadataMap,
    timeout: Option<Duration>,
    handler: &mut impl InvocationEventHandler,
    requests: &mut RequestParser,
) -> Result<(), InvokeError>
where
    D: DescriptorSource,
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    let (service, method) = parse_method_symbol(method_name)?;

    let resolved = resolve_method(source, service, method).await?;
    load_extensions(source, &resolved.input()).await;
    load_extensions(source, &resolved.output()).await;
    // Loading extensions may have grown the pool behind the source, resolve again so
    // the descriptors know about them.
    let method = resolve_method(source, service, method).await?;

    handler.on_resolve_method(&method);
    handler.on_send_headers(&metadata);

    match (method.is_client_streaming(), method.is_server_streaming()) {
        (false, false) => {
            let payload = single_request(&method, requests)?;
            let request = build_request(payload, metadata, timeout);

            match client.unary(&method, request).await? {
                Ok(response) => {
                    handler.on_receive_headers(response.metadata());
                    handler.on_receive_response(response.get_ref());
                    // tonic merges the trailers of a single response into its metadata.
                    handler.on_receive_trailers(&Status::ok(""), response.metadata());
                }
                Err(status) => handler.on_receive_trailers(&status, status.metadata()),
            }
        }
        (false, true) => {
            let payload = single_request(&method, requests)?;
            let request = build_request(payload, metadata, timeout);

            match client.server_streaming(&method, request).await? {
                Ok(response) => {
                    handler.on_receive_headers(response.metadata());
                    drain(response.into_inner(), handler).await;
                }
                Err(status) => handler.on_receive_trailers(&status, status.metadata()),
            }
        }
        (true, false) => {
            let payload = all_requests(&method.input(), requests)?;
            let request = build_request(futures_util::stream::iter(payload), metadata, timeout);

            match client.client_streaming(&method, request).await? {
                Ok(response) => {
                    handler.on_receive_headers(response.metadata());
                    handler.on_receive_response(response.get_ref());
                    // tonic merges the trailers of a single response into its metadata.
                    handler.on_receive_trailers(&Status::ok(""), response.metadata());
                }
                Err(status) => handler.on_receive_trailers(&status, status.metadata()),
            }
        }
        (true, true) => {
            let payload = all_requests(&method.input(), requests)?;
            let request = build_request(futures_util::stream::iter(payload), metadata, timeout);

            match client.bidirectional_streaming(&method, request).await? {
                Ok(response) => {
                    handler.on_receive_headers(response.metadata());
                    drain(response.into_inner(), handler).await;
                }
                Err(status) => handler.on_receive_trailers(&status, status.metadata()),
            }
        }
    }

    Ok(())
}

async fn resolve_method(
    source: &mut impl DescriptorSource,
    service: &str,
    method: &str,
) -> Result<MethodDescriptor, InvokeError> {
    let descriptor = source.find_symbol(service).await.map_err(|err| match err {
        SourceError::NotFound(_) => InvokeError::ServiceNotExposed(service.to_string()),
        err => InvokeError::Source(err),
    })?;

    let Descriptor::Service(service_descriptor) = descriptor else {
        return Err(InvokeError::NotAService(service.to_string()));
    };

    service_descriptor
        .methods()
        .find(|m| m.name() == method)
        .ok_or_else(|| InvokeError::MethodNotFound {
            service: service.to_string(),
            method: method.to_string(),
        })
}

async fn load_extensions(source: &mut impl DescriptorSource, message: &MessageDescriptor) {
    match source.all_extensions_for_type(message.full_name()).await {
        Ok(extensions) => {
            tracing::debug!(
                message = message.full_name(),
                count = extensions.len(),
                "loaded extensions"
            );
        }
        Err(err) => {
            tracing::debug!(message = message.full_name(), %err, "could not load extensions");
        }
    }
}

/// The one request of a unary or server streaming call. Empty input sends an empty message.
fn single_request(
    method: &MethodDescriptor,
    requests: &mut RequestParser,
) -> Result<DynamicMessage, InvokeError> {
    let input = method.input();
    let payload = requests
        .next(&input)?
        .unwrap_or_else(|| DynamicMessage::new(input.clone()));

    if requests.next(&input)?.is_some() {
        return Err(InvokeError::TooManyRequests(method.full_name().to_string()));
    }

    Ok(payload)
}

fn all_requests(
    input: &MessageDescriptor,
    requests: &mut RequestParser,
) -> Result<Vec<DynamicMessage>, InvokeError> {
    let mut payload = Vec::new();
    while let Some(message) = requests.next(input)? {
        payload.push(message);
    }
    Ok(payload)
}

async fn drain(mut stream: Streaming<DynamicMessage>, handler: &mut impl InvocationEventHandler) {
    loop {
        match stream.message().await {
            Ok(Some(message)) => handler.on_receive_response(&message),
            Ok(None) => break,
            Err(status) => {
                handler.on_receive_trailers(&status, status.metadata());
                return;
            }
        }
    }

    match stream.trailers().await {
        Ok(trailers) => {
            handler.on_receive_trailers(&Status::ok(""), &trailers.unwrap_or_default())
        }
        Err(status) => handler.on_receive_trailers(&status, status.metadata()),
    }
}
