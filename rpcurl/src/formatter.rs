use crate::error::CliError;
use colored::*;
use rpcurl_core::prost_reflect::{
    Cardinality, EnumDescriptor, ExtensionDescriptor, FieldDescriptor, Kind, MessageDescriptor,
    MethodDescriptor, OneofDescriptor, ServiceDescriptor,
};
use rpcurl_core::source::Descriptor;
use rpcurl_core::tonic::Status;
use rpcurl_core::tonic::metadata::MetadataMap;
use std::fmt::Write;

/// A wrapper struct for a formatted, colored string.
///
/// Implements `Display` so it can be printed directly.
pub struct FormattedString(pub String);

pub struct ServiceList(pub Vec<String>);

pub struct MethodList(pub Vec<String>);

pub struct Warning<'a>(pub &'a str);

/// The definition of a symbol, plus the extensions known for it when it is a message.
pub struct DescriptorText<'a> {
    pub descriptor: &'a Descriptor,
    pub extensions: &'a [ExtensionDescriptor],
}

pub struct MetadataText<'a>(pub &'a MetadataMap);

pub struct StatusText<'a>(pub &'a Status);

impl std::fmt::Display for FormattedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&CliError> for FormattedString {
    fn from(err: &CliError) -> Self {
        match err {
            CliError::Usage(message) => FormattedString(format!(
                "{}\nTry 'rpcurl --help' for more details.",
                message
            )),
            CliError::Config(err) => {
                FormattedString(format!("{} {}", "Invalid configuration:".red().bold(), err))
            }
            CliError::Connect(err) => {
                FormattedString(format!("{} {}", "Connection Error:".red().bold(), err))
            }
            CliError::Schema(err) => {
                FormattedString(format!("{} {:#}", "Symbol Lookup Failed:".red().bold(), err))
            }
            CliError::Fatal(err) => {
                FormattedString(format!("{} {:#}", "Error:".red().bold(), err))
            }
        }
    }
}

impl From<Warning<'_>> for FormattedString {
    fn from(Warning(message): Warning<'_>) -> Self {
        FormattedString(format!("{} {}", "Warning:".yellow().bold(), message))
    }
}

impl From<ServiceList> for FormattedString {
    fn from(ServiceList(mut services): ServiceList) -> Self {
        if services.is_empty() {
            return FormattedString("(No services)".to_string());
        }

        services.sort();
        let lines: Vec<String> = services.iter().map(|svc| svc.green().to_string()).collect();
        FormattedString(lines.join("\n"))
    }
}

impl From<MethodList> for FormattedString {
    fn from(MethodList(methods): MethodList) -> Self {
        if methods.is_empty() {
            return FormattedString("(No methods)".to_string());
        }

        let lines: Vec<String> = methods.iter().map(|m| m.green().to_string()).collect();
        FormattedString(lines.join("\n"))
    }
}

impl From<MetadataText<'_>> for FormattedString {
    fn from(MetadataText(metadata): MetadataText<'_>) -> Self {
        // Binary values are kept base64 encoded in their header form.
        let headers = metadata.clone().into_headers();
        let mut lines: Vec<String> = headers
            .iter()
            .map(|(key, value)| {
                format!(
                    "{}: {}",
                    key.as_str().cyan(),
                    value.to_str().unwrap_or("<non-ascii value>")
                )
            })
            .collect();

        if lines.is_empty() {
            return FormattedString("(empty)".to_string());
        }

        lines.sort();
        FormattedString(lines.join("\n"))
    }
}

impl From<StatusText<'_>> for FormattedString {
    fn from(StatusText(status): StatusText<'_>) -> Self {
        FormattedString(format!(
            "{}\n  Code: {:?}\n  Message: {}",
            "ERROR:".red().bold(),
            status.code(),
            status.message()
        ))
    }
}

impl From<DescriptorText<'_>> for FormattedString {
    fn from(text: DescriptorText<'_>) -> Self {
        let mut out = String::new();

        match text.descriptor {
            Descriptor::Service(service) => service_text(service, &mut out),
            Descriptor::Method(method) => out.push_str(&method_line(method)),
            Descriptor::Message(message) => match map_field_of(message) {
                Some(field) => out.push_str(&field_line(&field)),
                None => {
                    message_text(message, 0, &mut out);
                    extensions_text(text.extensions, &mut out);
                }
            },
            Descriptor::Field(field) => out.push_str(&field_line(field)),
            Descriptor::Oneof(oneof) => oneof_text(oneof, 0, &mut out),
            Descriptor::Enum(enum_desc) => enum_text(enum_desc, 0, &mut out),
            Descriptor::EnumValue(value) => out.push_str(&format!(
                "{} = {};",
                value.name(),
                value.number().to_string().purple()
            )),
            Descriptor::Extension(extension) => {
                extensions_text(std::slice::from_ref(extension), &mut out)
            }
        }

        FormattedString(out.trim().to_string())
    }
}

/// A map entry type is shown as the map field using it.
fn map_field_of(message: &MessageDescriptor) -> Option<FieldDescriptor> {
    if !message.is_map_entry() {
        return None;
    }

    message.parent_message()?.fields().find(|field| {
        field.is_map() && matches!(field.kind(), Kind::Message(entry) if &entry == message)
    })
}

fn service_text(service: &ServiceDescriptor, out: &mut String) {
    let _ = writeln!(out, "{} {} {{", "service".cyan(), service.name().green());

    for method in service.methods() {
        let _ = writeln!(out, "  {}", method_line(&method));
    }
    out.push('}');
}

fn method_line(method: &MethodDescriptor) -> String {
    let stream = |streaming: bool| {
        if streaming {
            format!("{} ", "stream".cyan())
        } else {
            String::new()
        }
    };

    format!(
        "{} {}({}{}) {} ({}{});",
        "rpc".cyan(),
        method.name().green(),
        stream(method.is_client_streaming()),
        method.input().full_name().yellow(),
        "returns".cyan(),
        stream(method.is_server_streaming()),
        method.output().full_name().yellow()
    )
}

fn message_text(message: &MessageDescriptor, level: usize, out: &mut String) {
    let indent = "  ".repeat(level);
    let _ = writeln!(
        out,
        "{indent}{} {} {{",
        "message".cyan(),
        message.name().green()
    );

    for field in message.fields() {
        if field.containing_oneof().is_some_and(|oneof| !oneof.is_synthetic()) {
            continue;
        }
        let _ = writeln!(out, "{indent}  {}", field_line(&field));
    }

    for oneof in message.oneofs().filter(|oneof| !oneof.is_synthetic()) {
        oneof_text(&oneof, level + 1, out);
        out.push('\n');
    }

    for nested in message.child_messages().filter(|m| !m.is_map_entry()) {
        message_text(&nested, level + 1, out);
        out.push('\n');
    }

    for nested in message.child_enums() {
        enum_text(&nested, level + 1, out);
        out.push('\n');
    }

    let _ = write!(out, "{indent}}}");
}

fn oneof_text(oneof: &OneofDescriptor, level: usize, out: &mut String) {
    let indent = "  ".repeat(level);
    let _ = writeln!(out, "{indent}{} {} {{", "oneof".cyan(), oneof.name().green());

    for field in oneof.fields() {
        let _ = writeln!(out, "{indent}  {}", field_line(&field));
    }
    let _ = write!(out, "{indent}}}");
}

fn enum_text(enum_desc: &EnumDescriptor, level: usize, out: &mut String) {
    let indent = "  ".repeat(level);
    let _ = writeln!(out, "{indent}{} {} {{", "enum".cyan(), enum_desc.name().green());

    for value in enum_desc.values() {
        let _ = writeln!(
            out,
            "{indent}  {} = {};",
            value.name(),
            value.number().to_string().purple()
        );
    }
    let _ = write!(out, "{indent}}}");
}

fn extensions_text(extensions: &[ExtensionDescriptor], out: &mut String) {
    let mut extended: Vec<String> = extensions
        .iter()
        .map(|ext| ext.containing_message().full_name().to_string())
        .collect();
    extended.dedup();

    for message in extended {
        let _ = writeln!(out, "\n{} {} {{", "extend".cyan(), message.yellow());
        for ext in extensions
            .iter()
            .filter(|ext| ext.containing_message().full_name() == message)
        {
            let label = ext_label(ext).map(|l| format!("{} ", l.cyan())).unwrap_or_default();
            let _ = writeln!(
                out,
                "  {label}{} {} = {};",
                type_name(&ext.kind(), ext.is_map()).yellow(),
                ext.full_name(),
                ext.number()
            );
        }
        out.push('}');
    }
}

fn field_line(field: &FieldDescriptor) -> String {
    let label = field_label(field)
        .map(|l| format!("{} ", l.cyan()))
        .unwrap_or_default();

    format!(
        "{label}{} {} = {};",
        type_name(&field.kind(), field.is_map()).yellow(),
        field.name(),
        field.number()
    )
}

fn field_label(field: &FieldDescriptor) -> Option<&'static str> {
    if field.is_map() {
        return None;
    }

    match field.cardinality() {
        Cardinality::Repeated => Some("repeated"),
        Cardinality::Required => Some("required"),
        Cardinality::Optional => {
            let proto = field.field_descriptor_proto();
            let proto2 = field.parent_message().parent_file().file_descriptor_proto().syntax()
                != "proto3";
            let explicit = proto.proto3_optional()
                || (proto2 && field.containing_oneof().is_none());
            explicit.then_some("optional")
        }
    }
}

fn ext_label(ext: &ExtensionDescriptor) -> Option<&'static str> {
    match ext.cardinality() {
        Cardinality::Repeated => Some("repeated"),
        Cardinality::Required => Some("required"),
        Cardinality::Optional => Some("optional"),
    }
}

fn type_name(kind: &Kind, is_map: bool) -> String {
    if is_map && let Kind::Message(entry) = kind {
        return format!(
            "map<{}, {}>",
            type_name(&entry.map_entry_key_field().kind(), false),
            type_name(&entry.map_entry_value_field().kind(), false)
        );
    }

    match kind {
        Kind::Double => "double".to_string(),
        Kind::Float => "float".to_string(),
        Kind::Int32 => "int32".to_string(),
        Kind::Int64 => "int64".to_string(),
        Kind::Uint32 => "uint32".to_string(),
        Kind::Uint64 => "uint64".to_string(),
        Kind::Sint32 => "sint32".to_string(),
        Kind::Sint64 => "sint64".to_string(),
        Kind::Fixed32 => "fixed32".to_string(),
        Kind::Fixed64 => "fixed64".to_string(),
        Kind::Sfixed32 => "sfixed32".to_string(),
        Kind::Sfixed64 => "sfixed64".to_string(),
        Kind::Bool => "bool".to_string(),
        Kind::String => "string".to_string(),
        Kind::Bytes => "bytes".to_string(),
        Kind::Message(m) => m.full_name().to_string(),
        Kind::Enum(e) => e.full_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpcurl_core::prost_reflect::DescriptorPool;
    use rpcurl_core::source::{FileSource, find_in_pool};
    use rpcurl_core::tonic::Code;

    const SCHEMA: &str = r#"
        syntax = "proto3";
        package shop;

        service Orders {
          rpc Get(GetOrder) returns (Order);
          rpc Watch(GetOrder) returns (stream Order);
        }

        message GetOrder {
          string id = 1;
          optional int32 version = 2;
        }

        message Order {
          string id = 1;
          repeated string items = 2;
          map<string, int64> totals = 3;
          oneof payment {
            string card = 4;
            string voucher = 5;
          }
          State state = 6;

          enum State {
            OPEN = 0;
            CLOSED = 1;
          }
        }
    "#;

    fn plain() {
        colored::control::set_override(false);
    }

    fn pool() -> DescriptorPool {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("shop.proto"), SCHEMA).unwrap();

        FileSource::from_source_files(&[dir.path().to_path_buf()], &["shop.proto".into()])
            .unwrap()
            .pool()
            .clone()
    }

    fn render(symbol: &str) -> String {
        plain();
        let descriptor = find_in_pool(&pool(), symbol).unwrap();
        FormattedString::from(DescriptorText {
            descriptor: &descriptor,
            extensions: &[],
        })
        .0
    }

    #[test]
    fn renders_services_with_streaming_methods() {
        assert_eq!(
            render("shop.Orders"),
            "service Orders {\n  rpc Get(shop.GetOrder) returns (shop.Order);\n  rpc Watch(shop.GetOrder) returns (stream shop.Order);\n}"
        );
    }

    #[test]
    fn renders_messages_with_labels_oneofs_and_nested_types() {
        let text = render("shop.Order");

        assert!(text.starts_with("message Order {\n  string id = 1;\n"));
        assert!(text.contains("  repeated string items = 2;\n"));
        assert!(text.contains("  map<string, int64> totals = 3;\n"));
        assert!(text.contains("  oneof payment {\n    string card = 4;\n    string voucher = 5;\n  }"));
        assert!(text.contains("  shop.Order.State state = 6;\n"));
        assert!(text.contains("  enum State {\n    OPEN = 0;\n    CLOSED = 1;\n  }"));
        assert!(text.ends_with('}'));
    }

    #[test]
    fn proto3_optional_is_labelled() {
        let text = render("shop.GetOrder");
        assert!(text.contains("  optional int32 version = 2;"));
        assert!(!text.contains("oneof"));
    }

    #[test]
    fn renders_single_elements() {
        assert_eq!(render("shop.Order.items"), "repeated string items = 2;");
        assert_eq!(render("shop.Order.CLOSED"), "CLOSED = 1;");
        assert_eq!(
            render("shop.Orders.Get"),
            "rpc Get(shop.GetOrder) returns (shop.Order);"
        );
    }

    #[test]
    fn lists_are_sorted_or_marked_empty() {
        plain();
        assert_eq!(
            FormattedString::from(ServiceList(vec!["b.B".into(), "a.A".into()])).0,
            "a.A\nb.B"
        );
        assert_eq!(FormattedString::from(ServiceList(vec![])).0, "(No services)");
        assert_eq!(FormattedString::from(MethodList(vec![])).0, "(No methods)");
    }

    #[test]
    fn renders_metadata_and_status() {
        plain();
        let mut metadata = MetadataMap::new();
        assert_eq!(FormattedString::from(MetadataText(&metadata)).0, "(empty)");

        metadata.insert("b-key", "2".parse().unwrap());
        metadata.insert("a-key", "1".parse().unwrap());
        assert_eq!(
            FormattedString::from(MetadataText(&metadata)).0,
            "a-key: 1\nb-key: 2"
        );

        let status = Status::new(Code::NotFound, "no such order");
        assert_eq!(
            FormattedString::from(StatusText(&status)).0,
            "ERROR:\n  Code: NotFound\n  Message: no such order"
        );
    }

    #[test]
    fn usage_errors_point_at_help() {
        plain();
        let err = CliError::Usage("Too few arguments.".into());
        assert_eq!(
            FormattedString::from(&err).0,
            "Too few arguments.\nTry 'rpcurl --help' for more details."
        );
    }
}
