use echo_service::{EchoServiceServer, FILE_DESCRIPTOR_SET};
use echo_service_impl::EchoServiceImpl;
use rpcurl_core::reflection::client::ReflectionClient;
use rpcurl_core::source::{
    Descriptor, DescriptorSource, FileSource, ReflectionSource, SchemaSource, SourceError,
    compose, list_methods,
};
use tonic::service::Routes;


fn reflection_source() -> ReflectionSource<Routes> {
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
        .expect("Failed to setup Reflection Service");

    let service =
        Routes::new(reflection_service).add_service(EchoServiceServer::new(EchoServiceImpl));

    ReflectionSource::new(ReflectionClient::new(service))
}

#[tokio::test]
async fn test_reflection_source_finds_service() {
    let mut source = reflection_source();

    let descriptor = source.find_symbol("echo.EchoService").await.unwrap();

    let Descriptor::Service(service) = descriptor else {
        panic!("Expected a service, got {descriptor:?}");
    };
    assert_eq!(service.methods().count(), 4);
    assert!(source.pool().get_file_by_name("echo.proto").is_some());
}

#[tokio::test]
async fn test_reflection_source_finds_message_and_method() {
    let mut source = reflection_source();

    let message = source.find_symbol(".echo.EchoRequest").await.unwrap();
    assert!(matches!(message, Descriptor::Message(ref m) if m.full_name() == "echo.EchoRequest"));

    let method = source.find_symbol("echo.EchoService.UnaryEcho").await.unwrap();
    assert!(matches!(method, Descriptor::Method(ref m) if m.name() == "UnaryEcho"));
}

#[tokio::test]
async fn test_reflection_source_reports_unknown_symbol() {
    let mut source = reflection_source();

    let err = source.find_symbol("echo.Missing").await.unwrap_err();

    assert!(err.is_not_found(), "expected NotFound, got {err:?}");
}

#[tokio::test]
async fn test_reflection_source_lists_methods() {
    let mut source = reflection_source();

    let methods = list_methods(&mut source, "echo.EchoService").await.unwrap();

    assert_eq!(
        methods,
        vec![
            "echo.EchoService.UnaryEcho",
            "echo.EchoService.ServerStreamingEcho",
            "echo.EchoService.ClientStreamingEcho",
            "echo.EchoService.BidirectionalEcho",
        ]
    );
}

#[tokio::test]
async fn test_file_source_lists_services_from_descriptor_set() {
    let mut source = FileSource::from_bytes(FILE_DESCRIPTOR_SET).unwrap();

    let services = source.list_services().await.unwrap();

    assert_eq!(services, vec!["echo.EchoService"]);
}

#[tokio::test]
async fn test_composite_falls_back_when_server_lacks_reflection() {
    // No reflection service on this server, only the echo service.
    let client = ReflectionClient::new(EchoServiceServer::new(EchoServiceImpl));
    let reflection = ReflectionSource::new(client);
    let file = FileSource::from_bytes(FILE_DESCRIPTOR_SET).unwrap();

    let mut source = compose(Some(reflection), Some(file)).unwrap();
    assert!(matches!(source, SchemaSource::Composite(_)));

    let descriptor = source.find_symbol("echo.EchoResponse").await.unwrap();
    assert!(matches!(descriptor, Descriptor::Message(_)));

    let err = source.list_services().await.unwrap_err();
    assert!(matches!(err, SourceError::ReflectionUnsupported));
}
