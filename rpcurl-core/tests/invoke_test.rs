use echo_service::{EchoServiceServer, FILE_DESCRIPTOR_SET};
use echo_service_impl::{EchoServiceImpl, FAIL_MESSAGE};
use rpcurl_core::format::{Format, FormatOptions, RequestParser};
use rpcurl_core::grpc::client::GrpcClient;
use rpcurl_core::invoke::{InvocationEventHandler, InvokeError, invoke};
use rpcurl_core::prost_reflect::{DynamicMessage, MethodDescriptor};
use rpcurl_core::reflection::client::ReflectionClient;
use rpcurl_core::source::ReflectionSource;
use tonic::metadata::MetadataMap;
use tonic::service::Routes;
use tonic::{Code, Status};


#[derive(Default)]
struct RecordingHandler {
    method: Option<String>,
    sent_headers: usize,
    headers: Option<MetadataMap>,
    responses: Vec<String>,
    status: Option<(Code, MetadataMap)>,
}

impl InvocationEventHandler for RecordingHandler {
    fn on_resolve_method(&mut self, method: &MethodDescriptor) {
        self.method = Some(method.full_name().to_string());
    }

    fn on_send_headers(&mut self, metadata: &MetadataMap) {
        self.sent_headers = metadata.len();
    }

    fn on_receive_headers(&mut self, metadata: &MetadataMap) {
        self.headers = Some(metadata.clone());
    }

    fn on_receive_response(&mut self, message: &DynamicMessage) {
        let text = message
            .get_field_by_name("message")
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default();
        self.responses.push(text);
    }

    fn on_receive_trailers(&mut self, status: &Status, trailers: &MetadataMap) {
        assert!(self.status.is_none(), "trailers reported twice");
        self.status = Some((status.code(), trailers.clone()));
    }
}

fn setup() -> (ReflectionSource<Routes>, GrpcClient<Routes>) {
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
        .expect("Failed to setup Reflection Service");

    let service =
        Routes::new(reflection_service).add_service(EchoServiceServer::new(EchoServiceImpl));

    (
        ReflectionSource::new(ReflectionClient::new(service.clone())),
        GrpcClient::new(service),
    )
}

fn json(input: &str) -> RequestParser {
    RequestParser::new(Format::Json, input, FormatOptions::default())
}

async fn run(
    method: &str,
    metadata: MetadataMap,
    input: &str,
) -> (Result<(), InvokeError>, RecordingHandler) {
    let (mut source, mut client) = setup();
    let mut handler = RecordingHandler::default();
    let mut requests = json(input);

    let result = invoke(
        &mut source,
        &mut client,
        method,
        metadata,
        None,
        &mut handler,
        &mut requests,
    )
    .await;

    (result, handler)
}

#[tokio::test]
async fn test_unary_call() {
    let (result, handler) = run(
        "echo.EchoService/UnaryEcho",
        MetadataMap::new(),
        r#"{"message": "hello"}"#,
    )
    .await;

    result.unwrap();
    assert_eq!(handler.method.as_deref(), Some("echo.EchoService.UnaryEcho"));
    assert_eq!(handler.responses, vec!["hello"]);
    assert_eq!(handler.status.map(|(code, _)| code), Some(Code::Ok));
}

#[tokio::test]
async fn test_unary_call_with_dotted_symbol_and_empty_input() {
    let (result, handler) = run("echo.EchoService.UnaryEcho", MetadataMap::new(), "").await;

    result.unwrap();
    assert_eq!(handler.responses, vec![""]);
}

#[tokio::test]
async fn test_request_headers_are_sent() {
    let mut metadata = MetadataMap::new();
    metadata.insert("x-echo", "ping".parse().unwrap());

    let (result, handler) = run(
        "echo.EchoService/UnaryEcho",
        metadata,
        r#"{"message": "hi"}"#,
    )
    .await;

    result.unwrap();
    assert_eq!(handler.sent_headers, 1);
    let headers = handler.headers.expect("response headers");
    assert_eq!(headers.get("x-echo").unwrap(), "ping");
}

#[tokio::test]
async fn test_unary_trailers_carry_the_response_metadata() {
    let mut metadata = MetadataMap::new();
    metadata.insert("x-echo", "ping".parse().unwrap());

    let (result, handler) = run(
        "echo.EchoService/UnaryEcho",
        metadata,
        r#"{"message": "hi"}"#,
    )
    .await;

    result.unwrap();
    let (code, trailers) = handler.status.expect("terminal status");
    assert_eq!(code, Code::Ok);
    assert!(!trailers.is_empty());
    assert_eq!(trailers.get("x-echo").unwrap(), "ping");
}

#[tokio::test]
async fn test_error_status_is_reported_through_trailers() {
    let (result, handler) = run(
        "echo.EchoService/UnaryEcho",
        MetadataMap::new(),
        &format!(r#"{{"message": "{FAIL_MESSAGE}"}}"#),
    )
    .await;

    result.unwrap();
    assert!(handler.responses.is_empty());
    let (code, trailers) = handler.status.expect("status");
    assert_eq!(code, Code::InvalidArgument);
    assert_eq!(trailers.get("x-failure").unwrap(), "requested");
}

#[tokio::test]
async fn test_server_streaming_call() {
    let (result, handler) = run(
        "echo.EchoService/ServerStreamingEcho",
        MetadataMap::new(),
        r#"{"message": "stream"}"#,
    )
    .await;

    result.unwrap();
    assert_eq!(
        handler.responses,
        vec!["stream - seq 0", "stream - seq 1", "stream - seq 2"]
    );
    assert_eq!(handler.status.map(|(code, _)| code), Some(Code::Ok));
}

#[tokio::test]
async fn test_client_streaming_call() {
    let (result, handler) = run(
        "echo.EchoService/ClientStreamingEcho",
        MetadataMap::new(),
        r#"{"message": "a"} {"message": "b"}{"message": "c"}"#,
    )
    .await;

    result.unwrap();
    assert_eq!(handler.responses, vec!["abc"]);
    assert_eq!(handler.status.map(|(code, _)| code), Some(Code::Ok));
}

#[tokio::test]
async fn test_bidirectional_streaming_call() {
    let (result, handler) = run(
        "echo.EchoService/BidirectionalEcho",
        MetadataMap::new(),
        r#"{"message": "one"}
           {"message": "two"}"#,
    )
    .await;

    result.unwrap();
    assert_eq!(handler.responses, vec!["echo: one", "echo: two"]);
    assert_eq!(handler.status.map(|(code, _)| code), Some(Code::Ok));
}

#[tokio::test]
async fn test_unary_call_rejects_many_requests() {
    let (result, handler) = run(
        "echo.EchoService/UnaryEcho",
        MetadataMap::new(),
        r#"{"message": "a"}{"message": "b"}"#,
    )
    .await;

    assert!(matches!(result, Err(InvokeError::TooManyRequests(_))));
    assert!(handler.status.is_none());
}

#[tokio::test]
async fn test_unknown_method() {
    let (result, _) = run("echo.EchoService/Missing", MetadataMap::new(), "").await;

    match result {
        Err(InvokeError::MethodNotFound { service, method }) => {
            assert_eq!(service, "echo.EchoService");
            assert_eq!(method, "Missing");
        }
        other => panic!("Expected MethodNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_service() {
    let (result, _) = run("echo.Nope/Call", MetadataMap::new(), "").await;

    assert!(matches!(result, Err(InvokeError::ServiceNotExposed(ref s)) if s == "echo.Nope"));
}

#[tokio::test]
async fn test_invalid_request_data() {
    let (result, _) = run(
        "echo.EchoService/UnaryEcho",
        MetadataMap::new(),
        r#"{"unknown": 1}"#,
    )
    .await;

    assert!(matches!(result, Err(InvokeError::Format(_))));
}
