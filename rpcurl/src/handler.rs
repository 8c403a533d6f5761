//! Prints the progress of an invocation.
use crate::formatter::{DescriptorText, FormattedString, MetadataText};
use rpcurl_core::format::ResponseFormatter;
use rpcurl_core::invoke::InvocationEventHandler;
use rpcurl_core::prost::Message;
use rpcurl_core::prost_reflect::{DynamicMessage, MethodDescriptor};
use rpcurl_core::source::Descriptor;
use rpcurl_core::tonic::metadata::MetadataMap;
use rpcurl_core::tonic::{Code, Status};
use std::io::Write;

/// Writes responses to `out`, and with verbosity also the method, the metadata in both
/// directions and the trailers.
pub struct DefaultEventHandler<W> {
    out: W,
    formatter: ResponseFormatter,
    verbosity: u8,
    method: Option<MethodDescriptor>,
    num_responses: usize,
    status: Option<Status>,
}

impl<W: Write> DefaultEventHandler<W> {
    pub fn new(out: W, formatter: ResponseFormatter, verbosity: u8) -> Self {
        Self {
            out,
            formatter,
            verbosity,
            method: None,
            num_responses: 0,
            status: None,
        }
    }

    pub fn num_responses(&self) -> usize {
        self.num_responses
    }

    /// The resolved method, once the invocation got that far.
    pub fn method(&self) -> Option<&MethodDescriptor> {
        self.method.as_ref()
    }

    /// The terminal status of the RPC, if it completed.
    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn status_code(&self) -> Code {
        self.status.as_ref().map_or(Code::Ok, Status::code)
    }

    fn verbose_section(&mut self, title: &str, body: FormattedString) {
        if self.verbosity > 0 {
            let _ = writeln!(self.out, "\n{title}:\n{body}");
        }
    }
}

impl<W: Write> InvocationEventHandler for DefaultEventHandler<W> {
    fn on_resolve_method(&mut self, method: &MethodDescriptor) {
        self.method = Some(method.clone());

        let descriptor = Descriptor::Method(method.clone());
        let text = FormattedString::from(DescriptorText {
            descriptor: &descriptor,
            extensions: &[],
        });
        self.verbose_section("Resolved method descriptor", text);
    }

    fn on_send_headers(&mut self, metadata: &MetadataMap) {
        self.verbose_section(
            "Request metadata to send",
            FormattedString::from(MetadataText(metadata)),
        );
    }

    fn on_receive_headers(&mut self, metadata: &MetadataMap) {
        self.verbose_section(
            "Response headers received",
            FormattedString::from(MetadataText(metadata)),
        );
    }

    fn on_receive_response(&mut self, message: &DynamicMessage) {
        self.num_responses += 1;

        if self.verbosity > 1 {
            let _ = writeln!(
                self.out,
                "\nEstimated response size: {} bytes",
                message.encoded_len()
            );
        }
        if self.verbosity > 0 {
            let _ = writeln!(self.out, "\nResponse contents:");
        }

        match self.formatter.format(message) {
            Ok(text) => {
                let _ = writeln!(self.out, "{text}");
            }
            Err(err) => tracing::warn!(%err, "failed to format response"),
        }
    }

    fn on_receive_trailers(&mut self, status: &Status, trailers: &MetadataMap) {
        self.status = Some(status.clone());
        self.verbose_section(
            "Response trailers received",
            FormattedString::from(MetadataText(trailers)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpcurl_core::format::{Format, FormatOptions, status_message};

    fn handler(verbosity: u8) -> DefaultEventHandler<Vec<u8>> {
        colored::control::set_override(false);
        DefaultEventHandler::new(
            Vec::new(),
            ResponseFormatter::new(Format::Json, FormatOptions::default()),
            verbosity,
        )
    }

    fn output(handler: DefaultEventHandler<Vec<u8>>) -> String {
        String::from_utf8(handler.out).unwrap()
    }

    fn response() -> DynamicMessage {
        status_message(&Status::new(Code::NotFound, "gone")).unwrap()
    }

    #[test]
    fn quiet_handler_only_prints_responses() {
        let mut handler = handler(0);

        handler.on_send_headers(&MetadataMap::new());
        handler.on_receive_response(&response());
        handler.on_receive_trailers(&Status::ok(""), &MetadataMap::new());

        assert_eq!(handler.num_responses(), 1);
        assert_eq!(handler.status_code(), Code::Ok);
        assert_eq!(
            output(handler),
            "{\n  \"code\": 5,\n  \"message\": \"gone\"\n}\n"
        );
    }

    #[test]
    fn verbose_handler_prints_metadata_sections() {
        let mut handler = handler(1);
        let mut metadata = MetadataMap::new();
        metadata.insert("x-token", "abc".parse().unwrap());

        handler.on_send_headers(&metadata);
        handler.on_receive_response(&response());
        handler.on_receive_trailers(&Status::not_found("gone"), &MetadataMap::new());

        let text = output(handler);
        assert!(text.contains("\nRequest metadata to send:\nx-token: abc\n"));
        assert!(text.contains("\nResponse contents:\n{"));
        assert!(text.contains("\nResponse trailers received:\n(empty)\n"));
        assert!(!text.contains("Estimated response size"));
    }

    #[test]
    fn very_verbose_handler_estimates_sizes() {
        let mut handler = handler(2);
        handler.on_receive_response(&response());

        assert!(output(handler).contains("Estimated response size: "));
    }

    #[test]
    fn failing_status_is_kept() {
        let mut handler = handler(0);
        handler.on_receive_trailers(&Status::unavailable("down"), &MetadataMap::new());

        assert_eq!(handler.status_code(), Code::Unavailable);
        assert_eq!(handler.status().map(Status::message), Some("down"));
        assert!(handler.method().is_none());
    }
}
