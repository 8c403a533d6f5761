//! # Reflection Client
//!
//! A client implementation for `grpc.reflection.v1`, falling back to `grpc.reflection.v1alpha`
//! when the server does not implement the newer service.
//!
//! File descriptor requests resolve the complete schema tree: the client inspects the imports
//! of every returned file and recursively fetches missing ones on the same stream until all
//! transitive dependencies are known.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)
use crate::BoxError;
use http_body::Body as HttpBody;
use prost::Message;
use prost_types::FileDescriptorProto;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::client::{Grpc, GrpcService};
use tonic::metadata::MetadataMap;
use tonic::transport::Channel;
use tonic::{Code, Request, Status, Streaming};
use tonic_prost::ProstCodec;
use tonic_reflection::pb::v1::{
    ExtensionRequest, ServerReflectionRequest, ServerReflectionResponse,
    server_reflection_request::MessageRequest, server_reflection_response::MessageResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum ReflectionResolveError {
    #[error("Internal error, the reflection client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),

    #[error(
        "Failed to start a stream request with the reflection server, reflection might not be supported: '{0}'"
    )]
    ServerStreamInitFailed(#[source] Status),

    #[error("The server stream returned an error status: '{0}'")]
    ServerStreamFailure(#[source] Status),

    #[error("Reflection stream closed unexpectedly")]
    StreamClosed,

    #[error("Internal error: Failed to send request to stream")]
    SendFailed,

    #[error("Server returned reflection error code {code}: {message}")]
    ServerError { code: i32, message: String },

    #[error("Protocol error: Received unexpected response type: {0}")]
    UnexpectedResponseType(String),

    #[error("Failed to decode FileDescriptorProto: {0}")]
    DecodeError(#[from] prost::DecodeError),
}

impl ReflectionResolveError {
    /// Whether the server reported that the requested element does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ServerError { code, .. } => *code == Code::NotFound as i32,
            Self::ServerStreamFailure(status) => status.code() == Code::NotFound,
            _ => false,
        }
    }

    /// Whether the server does not implement server reflection at all.
    pub fn is_unimplemented(&self) -> bool {
        match self {
            Self::ServerStreamInitFailed(status) | Self::ServerStreamFailure(status) => {
                status.code() == Code::Unimplemented
            }
            _ => false,
        }
    }
}

/// The reflection service flavour spoken with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectionVersion {
    V1,
    V1Alpha,
}

impl ReflectionVersion {
    fn path(self) -> http::uri::PathAndQuery {
        match self {
            Self::V1 => http::uri::PathAndQuery::from_static(
                "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo",
            ),
            Self::V1Alpha => http::uri::PathAndQuery::from_static(
                "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo",
            ),
        }
    }
}

// The host defined in the reflection requests doesn't seem to be a mandatory field
// and there is no documentation about what it is about.
// So we won't enforce it from the user.
const EMPTY_HOST: &str = "";

const STREAM_BUFFER: usize = 100;

type ResponseStream = Streaming<ServerReflectionResponse>;
type RequestSender = mpsc::Sender<ServerReflectionRequest>;

/// A generic client for the gRPC Server Reflection Protocol.
pub struct ReflectionClient<S = Channel> {
    grpc: Grpc<S>,
    metadata: MetadataMap,
    version: Option<ReflectionVersion>,
}

impl<S> ReflectionClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        Self {
            grpc: Grpc::new(service),
            metadata: MetadataMap::new(),
            version: None,
        }
    }

    /// Sets the metadata sent with every reflection stream.
    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Caps the size of decoded reflection responses.
    pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
        self.grpc = self.grpc.max_decoding_message_size(limit);
        self
    }

    /// The reflection version in use, once a stream has been opened successfully.
    pub fn version(&self) -> Option<ReflectionVersion> {
        self.version
    }

    /// Lists all services exposed by the server.
    pub async fn list_services(&mut self) -> Result<Vec<String>, ReflectionResolveError> {
        let response = self
            .single(MessageRequest::ListServices(String::new()))
            .await?;

        match response {
            MessageResponse::ListServicesResponse(resp) => {
                Ok(resp.service.into_iter().map(|s| s.name).collect())
            }
            other => Err(unexpected(other)),
        }
    }

    /// Asks for the file defining `symbol` (e.g. `my.package.MyService`), together with every
    /// file it transitively imports.
    pub async fn file_containing_symbol(
        &mut self,
        symbol: &str,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionResolveError> {
        tracing::debug!(symbol, "requesting file containing symbol");
        self.resolve_files(MessageRequest::FileContainingSymbol(symbol.to_string()))
            .await
    }

    /// Asks for the file defining extension `number` of `containing_type`.
    pub async fn file_containing_extension(
        &mut self,
        containing_type: &str,
        number: i32,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionResolveError> {
        tracing::debug!(containing_type, number, "requesting file containing extension");
        self.resolve_files(MessageRequest::FileContainingExtension(ExtensionRequest {
            containing_type: containing_type.to_string(),
            extension_number: number,
        }))
        .await
    }

    /// Lists the tag numbers of every known extension of `message_type`.
    pub async fn all_extension_numbers_of_type(
        &mut self,
        message_type: &str,
    ) -> Result<Vec<i32>, ReflectionResolveError> {
        let response = self
            .single(MessageRequest::AllExtensionNumbersOfType(
                message_type.to_string(),
            ))
            .await?;

        match response {
            MessageResponse::AllExtensionNumbersResponse(resp) => Ok(resp.extension_number),
            other => Err(unexpected(other)),
        }
    }

    /// Sends one request and reads its single response.
    async fn single(
        &mut self,
        request: MessageRequest,
    ) -> Result<MessageResponse, ReflectionResolveError> {
        let (_tx, mut response_stream) = self.open(request).await?;
        next_response(&mut response_stream).await
    }

    async fn resolve_files(
        &mut self,
        request: MessageRequest,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionResolveError> {
        let (tx, mut response_stream) = self.open(request).await?;
        let files = collect_descriptors(&mut response_stream, tx).await?;
        Ok(files.into_values().collect())
    }

    /// Opens a reflection stream whose first request is already queued.
    ///
    /// The first request is buffered before the call starts because some servers only send
    /// response headers after reading a request.
    async fn open(
        &mut self,
        request: MessageRequest,
    ) -> Result<(RequestSender, ResponseStream), ReflectionResolveError> {
        let first = ServerReflectionRequest {
            host: EMPTY_HOST.to_string(),
            message_request: Some(request),
        };

        let version = self.version.unwrap_or(ReflectionVersion::V1);

        let (version, result) = match self.try_open(version, first.clone()).await? {
            Err(status) if self.version.is_none() && status.code() == Code::Unimplemented => {
                tracing::debug!("server does not implement grpc.reflection.v1, trying v1alpha");
                let result = self.try_open(ReflectionVersion::V1Alpha, first).await?;
                (ReflectionVersion::V1Alpha, result)
            }
            result => (version, result),
        };

        let opened = result.map_err(ReflectionResolveError::ServerStreamInitFailed)?;
        self.version = Some(version);
        Ok(opened)
    }

    async fn try_open(
        &mut self,
        version: ReflectionVersion,
        first: ServerReflectionRequest,
    ) -> Result<Result<(RequestSender, ResponseStream), Status>, ReflectionResolveError> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tx.send(first)
            .await
            .map_err(|_| ReflectionResolveError::SendFailed)?;

        self.grpc
            .ready()
            .await
            .map_err(|e| ReflectionResolveError::ClientNotReady(e.into()))?;

        let mut request = Request::new(ReceiverStream::new(rx));
        *request.metadata_mut() = self.metadata.clone();

        let result = self
            .grpc
            .streaming(request, version.path(), ProstCodec::default())
            .await;

        Ok(result.map(|response| (tx, response.into_inner())))
    }
}

async fn next_response(
    response_stream: &mut ResponseStream,
) -> Result<MessageResponse, ReflectionResolveError> {
    let response = response_stream
        .message()
        .await
        .map_err(ReflectionResolveError::ServerStreamFailure)?
        .ok_or(ReflectionResolveError::StreamClosed)?;

    match response.message_response {
        Some(MessageResponse::ErrorResponse(e)) => Err(ReflectionResolveError::ServerError {
            code: e.error_code,
            message: e.error_message,
        }),
        Some(other) => Ok(other),
        None => Err(ReflectionResolveError::UnexpectedResponseType(
            "Empty Message".into(),
        )),
    }
}

fn unexpected(response: MessageResponse) -> ReflectionResolveError {
    ReflectionResolveError::UnexpectedResponseType(format!("{response:?}"))
}

async fn collect_descriptors(
    response_stream: &mut ResponseStream,
    request_channel: RequestSender,
) -> Result<HashMap<String, FileDescriptorProto>, ReflectionResolveError> {
    let mut inflight = 1;
    let mut collected_files = HashMap::new();
    let mut requested = HashSet::new();

    while inflight > 0 {
        let response = next_response(response_stream).await?;
        inflight -= 1;

        match response {
            MessageResponse::FileDescriptorResponse(res) => {
                inflight += process_descriptor_batch(
                    res.file_descriptor_proto,
                    &mut collected_files,
                    &mut requested,
                    &request_channel,
                )
                .await?;
            }
            other => return Err(unexpected(other)),
        }
    }

    Ok(collected_files)
}

async fn process_descriptor_batch(
    raw_protos: Vec<Vec<u8>>,
    collected_files: &mut HashMap<String, FileDescriptorProto>,
    requested: &mut HashSet<String>,
    tx: &RequestSender,
) -> Result<usize, ReflectionResolveError> {
    let mut sent_count = 0;

    for raw in raw_protos {
        let fd = FileDescriptorProto::decode(raw.as_ref())?;

        if let Some(name) = &fd.name
            && !collected_files.contains_key(name)
        {
            // Mark the file itself as requested so a later import of it is not re-fetched.
            requested.insert(name.clone());
            sent_count += queue_dependencies(&fd, collected_files, requested, tx).await?;
            collected_files.insert(name.clone(), fd);
        }
    }

    Ok(sent_count)
}

async fn queue_dependencies(
    fd: &FileDescriptorProto,
    collected_files: &HashMap<String, FileDescriptorProto>,
    requested: &mut HashSet<String>,
    tx: &RequestSender,
) -> Result<usize, ReflectionResolveError> {
    let mut count = 0;

    for dep in &fd.dependency {
        if !collected_files.contains_key(dep) && requested.insert(dep.clone()) {
            let req = ServerReflectionRequest {
                host: EMPTY_HOST.to_string(),
                message_request: Some(MessageRequest::FileByFilename(dep.clone())),
            };

            tx.send(req)
                .await
                .map_err(|_| ReflectionResolveError::SendFailed)?;
            count += 1;
        }
    }

    Ok(count)
}
