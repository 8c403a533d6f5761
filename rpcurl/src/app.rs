//! One run of the tool: build the schema source, then list, describe or invoke.
use crate::config::{Config, FileSchema, Verb};
use crate::error::{CliError, Outcome};
use crate::formatter::{DescriptorText, FormattedString, MethodList, ServiceList, StatusText};
use crate::handler::DefaultEventHandler;
use crate::session::Session;
use anyhow::Context;
use rpcurl_core::format::{
    FormatOptions, RequestParser, ResponseFormatter, make_template, status_message,
};
use rpcurl_core::grpc::client::GrpcClient;
use rpcurl_core::invoke::{InvokeError, invoke};
use rpcurl_core::metadata::{ROUTING_PATH_HEADER, expand_headers, metadata_from_headers};
use rpcurl_core::protoset;
use rpcurl_core::reflection::client::ReflectionClient;
use rpcurl_core::source::{
    Descriptor, DescriptorSource, FileSource, ReflectionSource, SchemaSource, compose,
    list_methods,
};
use rpcurl_core::timing::Timing;
use rpcurl_core::tonic::Code;
use rpcurl_core::tonic::metadata::MetadataMap;
use rpcurl_core::tonic::transport::Channel;
use rpcurl_core::transport::dial;
use std::path::Path;
use tokio::time::Instant;

/// Metadata for reflection requests and for the RPC.
struct RequestMetadata {
    reflection: MetadataMap,
    rpc: MetadataMap,
}

pub async fn run(
    config: &Config,
    session: &mut Session,
    timing: &Timing,
    deadline: Option<Instant>,
) -> Result<Outcome, CliError> {
    let metadata = request_metadata(config)?;

    let file = file_source(&config.file_schema)?;
    let reflection = if config.use_reflection {
        let channel = channel(config, session, timing).await?;
        let mut client = ReflectionClient::new(channel).with_metadata(metadata.reflection);
        if let Some(limit) = config.transport.max_recv_msg_size {
            client = client.max_decoding_message_size(limit);
        }
        Some(ReflectionSource::new(client))
    } else {
        None
    };

    let source = compose(reflection, file).ok_or_else(|| {
        CliError::Usage("No host:port specified, no protoset specified, and no proto sources specified.".into())
    })?;
    session.set_source(source);

    match &config.verb {
        Verb::List { service } => {
            let source = session_source(session)?;
            list(config, source, service.as_deref()).await
        }
        Verb::Describe { symbol } => {
            let source = session_source(session)?;
            describe(config, source, symbol.as_deref()).await
        }
        Verb::Invoke { method } => {
            let channel = channel(config, session, timing).await?;
            let source = session_source(session)?;
            invoke_method(config, source, channel, method, metadata.rpc, timing, deadline).await
        }
    }
}

fn session_source(session: &mut Session) -> Result<&mut SchemaSource, CliError> {
    session
        .source()
        .ok_or_else(|| CliError::Fatal(anyhow::anyhow!("No schema source is configured")))
}

fn request_metadata(config: &Config) -> Result<RequestMetadata, CliError> {
    let headers = &config.headers;
    let (mut common, mut rpc, mut reflection) = (
        headers.common.clone(),
        headers.rpc.clone(),
        headers.reflection.clone(),
    );

    if headers.expand {
        common = expand_headers(&common).context("Failed to expand additional headers")?;
        rpc = expand_headers(&rpc).context("Failed to expand rpc headers")?;
        reflection = expand_headers(&reflection).context("Failed to expand reflection headers")?;
    }

    // Reverse proxies route on the original URL path.
    if let Some(path) = config.target.as_ref().and_then(|t| t.routing_path()) {
        common.push(format!("{ROUTING_PATH_HEADER}: {path}"));
    }

    let reflection = [common.as_slice(), reflection.as_slice()].concat();
    let rpc = [common.as_slice(), rpc.as_slice()].concat();

    Ok(RequestMetadata {
        reflection: metadata_from_headers(&reflection).context("Invalid reflection headers")?,
        rpc: metadata_from_headers(&rpc).context("Invalid rpc headers")?,
    })
}

fn file_source(schema: &FileSchema) -> Result<Option<FileSource>, CliError> {
    let source = match schema {
        FileSchema::None => return Ok(None),
        FileSchema::Protosets(paths) => FileSource::from_descriptor_sets(paths)
            .context("Failed to process proto descriptor sets")?,
        FileSchema::Protos {
            import_paths,
            files,
        } => FileSource::from_source_files(import_paths, files)
            .context("Failed to process proto source files")?,
    };
    Ok(Some(source))
}

/// Dials the target the first time it is needed.
async fn channel(
    config: &Config,
    session: &mut Session,
    timing: &Timing,
) -> Result<Channel, CliError> {
    if let Some(transport) = session.transport() {
        return Ok(transport.channel());
    }

    let target = config
        .target
        .as_ref()
        .ok_or_else(|| CliError::Usage("No host:port specified.".into()))?;

    tracing::debug!(
        address = %target.address,
        mode = config.transport.mode.name(),
        "dialing target"
    );
    let transport = dial(&config.transport, target, timing).await?;
    let channel = transport.channel();
    session.set_transport(transport);
    Ok(channel)
}

async fn list(
    config: &Config,
    source: &mut SchemaSource,
    service: Option<&str>,
) -> Result<Outcome, CliError> {
    let symbols = match service {
        None => {
            let mut services = source
                .list_services()
                .await
                .context("Failed to list services")?;
            services.sort();
            println!("{}", FormattedString::from(ServiceList(services.clone())));
            services
        }
        Some(service) => {
            let methods = list_methods(source, service)
                .await
                .with_context(|| format!("Failed to list methods for service \"{service}\""))
                .map_err(CliError::Schema)?;
            println!("{}", FormattedString::from(MethodList(methods)));
            vec![service.to_string()]
        }
    };

    write_protoset(source, config.protoset_out.as_deref(), &symbols).await?;
    Ok(Outcome::Success)
}

async fn describe(
    config: &Config,
    source: &mut SchemaSource,
    symbol: Option<&str>,
) -> Result<Outcome, CliError> {
    let symbols = match symbol {
        Some(symbol) => vec![symbol.to_string()],
        None => {
            let services = source
                .list_services()
                .await
                .context("Failed to list services")?;
            if services.is_empty() {
                println!("Server returned an empty list of exposed services");
            }
            services
        }
    };

    for symbol in &symbols {
        let name = symbol.strip_prefix('.').unwrap_or(symbol);
        let descriptor = resolve(source, name).await?;

        let extensions = match &descriptor {
            Descriptor::Message(message) => source
                .all_extensions_for_type(message.full_name())
                .await
                .unwrap_or_else(|err| {
                    tracing::debug!(message = message.full_name(), %err, "no extensions");
                    Vec::new()
                }),
            _ => Vec::new(),
        };

        println!("{} is {}:", descriptor.full_name(), descriptor.kind());
        println!(
            "{}",
            FormattedString::from(DescriptorText {
                descriptor: &descriptor,
                extensions: &extensions,
            })
        );

        if config.msg_template
            && let Descriptor::Message(message) = &descriptor
        {
            // Templates always show every field, so users see the whole request shape.
            let options = FormatOptions {
                emit_defaults: true,
                ..Default::default()
            };
            let template = ResponseFormatter::new(config.format, options)
                .format(&make_template(message))
                .with_context(|| format!("Failed to print template for message {name}"))?;
            println!("\nMessage template:\n{template}");
        }
    }

    write_protoset(source, config.protoset_out.as_deref(), &symbols).await?;
    Ok(Outcome::Success)
}

async fn invoke_method(
    config: &Config,
    source: &mut SchemaSource,
    channel: Channel,
    method: &str,
    metadata: MetadataMap,
    timing: &Timing,
    deadline: Option<Instant>,
) -> Result<Outcome, CliError> {
    let mut client = GrpcClient::new(channel);
    if let Some(limit) = config.transport.max_recv_msg_size {
        client = client.max_decoding_message_size(limit);
    }

    let mut requests = match config.data.as_deref() {
        Some("@") => RequestParser::from_reader(
            config.format,
            std::io::stdin().lock(),
            config.format_options,
        )
        .context("Failed to read request data from standard input")?,
        data => RequestParser::new(
            config.format,
            data.unwrap_or_default(),
            config.format_options,
        ),
    };

    let formatter = ResponseFormatter::new(config.format, config.format_options);
    let mut handler = DefaultEventHandler::new(std::io::stdout(), formatter, config.verbosity);
    let timeout = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));

    let invoke_timing = timing.child("InvokeRPC");
    let result = invoke(
        source,
        &mut client,
        method,
        metadata,
        timeout,
        &mut handler,
        &mut requests,
    )
    .await;
    invoke_timing.done();

    result.map_err(|err| {
        let schema_error = matches!(
            err,
            InvokeError::ServiceNotExposed(_)
                | InvokeError::NotAService(_)
                | InvokeError::MethodNotFound { .. }
        );
        let err = anyhow::Error::new(err).context(format!("Error invoking method \"{method}\""));
        if schema_error {
            CliError::Schema(err)
        } else {
            CliError::Fatal(err)
        }
    })?;

    if config.verbosity > 0 {
        println!(
            "{}",
            rpcurl_core::status::summary(requests.num_requests(), handler.num_responses())
        );
    }

    if let Some(method) = handler.method().cloned() {
        let descriptors = [Descriptor::Method(method)];
        save_protoset(config.protoset_out.as_deref(), &descriptors)?;
    }

    match handler.status() {
        Some(status) if status.code() != Code::Ok => {
            print_status(config, status);
            Ok(Outcome::Status(status.code()))
        }
        _ => Ok(Outcome::Success),
    }
}

fn print_status(config: &Config, status: &rpcurl_core::tonic::Status) {
    if !config.format_error {
        eprintln!("{}", FormattedString::from(StatusText(status)));
        return;
    }

    let formatted = status_message(status).and_then(|message| {
        ResponseFormatter::new(config.format, config.format_options).format(&message)
    });
    match formatted {
        Ok(text) => eprintln!("{text}"),
        Err(err) => eprintln!("ERROR: {err}"),
    }
}

async fn resolve(source: &mut SchemaSource, name: &str) -> Result<Descriptor, CliError> {
    source
        .find_symbol(name)
        .await
        .with_context(|| format!("Failed to resolve symbol \"{name}\""))
        .map_err(CliError::Schema)
}

async fn write_protoset(
    source: &mut SchemaSource,
    path: Option<&Path>,
    symbols: &[String],
) -> Result<(), CliError> {
    if path.is_none() {
        return Ok(());
    }

    let mut descriptors = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let name = symbol.strip_prefix('.').unwrap_or(symbol);
        descriptors.push(resolve(source, name).await?);
    }

    save_protoset(path, &descriptors)
}

fn save_protoset(path: Option<&Path>, descriptors: &[Descriptor]) -> Result<(), CliError> {
    let Some(path) = path else {
        return Ok(());
    };

    protoset::write_protoset(path, descriptors)
        .with_context(|| format!("Failed to write protoset to {}", path.display()))?;
    Ok(())
}
