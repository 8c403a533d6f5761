//! # Message Formats
//!
//! Request messages are read from JSON or from the Protobuf text format, and response
//! messages are written back in the same format.
//!
//! * **JSON** input is a sequence of concatenated JSON values, one per request message.
//! * **Text** input is a sequence of text format messages separated by the ASCII record
//!   separator `0x1E`.
//!
//! Messages are parsed lazily: the message type is only known once the method has been
//! resolved, so the parser is handed the descriptor on every call.
use prost_reflect::text_format::FormatOptions as TextFormatOptions;
use prost_reflect::{
    DescriptorPool, DeserializeOptions, DynamicMessage, FieldDescriptor, Kind, MapKey,
    MessageDescriptor, SerializeOptions, Value,
};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::str::FromStr;

/// Separates text format messages in a stream.
pub const TEXT_SEPARATOR: char = '\u{1e}';

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("The --format option must be 'json' or 'text', got '{0}'")]
    UnknownFormat(String),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid text format: {0}")]
    Text(#[from] prost_reflect::text_format::ParseError),
    #[error("Failed to read request data: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode status details: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("The google.rpc.Status message type is not available")]
    MissingStatusType,
    #[error("Failed to build status descriptors: {0}")]
    Descriptor(#[from] prost_reflect::DescriptorError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Json,
    Text,
}

impl FromStr for Format {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Format::Json),
            "text" => Ok(Format::Text),
            other => Err(FormatError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Include fields with default values in JSON output.
    pub emit_defaults: bool,
    /// Ignore unknown fields in JSON input instead of failing.
    pub allow_unknown_fields: bool,
    /// Separate text format output messages with [`TEXT_SEPARATOR`].
    pub include_text_separator: bool,
}

/// Reads request messages one by one.
pub struct RequestParser {
    format: Format,
    options: FormatOptions,
    input: String,
    offset: usize,
    count: usize,
}

impl RequestParser {
    pub fn new(format: Format, input: impl Into<String>, options: FormatOptions) -> Self {
        Self {
            format,
            options,
            input: input.into(),
            offset: 0,
            count: 0,
        }
    }

    /// Reads the whole input up front.
    pub fn from_reader(
        format: Format,
        mut reader: impl Read,
        options: FormatOptions,
    ) -> Result<Self, FormatError> {
        let mut input = String::new();
        reader.read_to_string(&mut input)?;
        Ok(Self::new(format, input, options))
    }

    /// Number of messages parsed so far.
    pub fn num_requests(&self) -> usize {
        self.count
    }

    /// Parses the next message as `descriptor`. Returns `None` once the input is exhausted.
    pub fn next(
        &mut self,
        descriptor: &MessageDescriptor,
    ) -> Result<Option<DynamicMessage>, FormatError> {
        let message = match self.format {
            Format::Json => self.next_json(descriptor)?,
            Format::Text => self.next_text(descriptor)?,
        };

        if message.is_some() {
            self.count += 1;
        }
        Ok(message)
    }

    fn next_json(
        &mut self,
        descriptor: &MessageDescriptor,
    ) -> Result<Option<DynamicMessage>, FormatError> {
        let rest = &self.input[self.offset..];
        let mut values =
            serde_json::Deserializer::from_str(rest).into_iter::<serde_json::Value>();

        let Some(value) = values.next().transpose()? else {
            self.offset = self.input.len();
            return Ok(None);
        };
        self.offset += values.byte_offset();

        let options =
            DeserializeOptions::new().deny_unknown_fields(!self.options.allow_unknown_fields);
        let message =
            DynamicMessage::deserialize_with_options(descriptor.clone(), value, &options)?;

        Ok(Some(message))
    }

    fn next_text(
        &mut self,
        descriptor: &MessageDescriptor,
    ) -> Result<Option<DynamicMessage>, FormatError> {
        while self.offset < self.input.len() {
            let rest = &self.input[self.offset..];
            let (record, consumed) = match rest.find(TEXT_SEPARATOR) {
                Some(end) => (&rest[..end], end + TEXT_SEPARATOR.len_utf8()),
                None => (rest, rest.len()),
            };
            self.offset += consumed;

            if !record.trim().is_empty() {
                let message = DynamicMessage::parse_text_format(descriptor.clone(), record)?;
                return Ok(Some(message));
            }
        }

        Ok(None)
    }
}

/// Renders response messages.
pub struct ResponseFormatter {
    format: Format,
    options: FormatOptions,
    count: usize,
}

impl ResponseFormatter {
    pub fn new(format: Format, options: FormatOptions) -> Self {
        Self {
            format,
            options,
            count: 0,
        }
    }

    pub fn format(&mut self, message: &DynamicMessage) -> Result<String, FormatError> {
        let formatted = match self.format {
            Format::Json => self.format_json(message)?,
            Format::Text => self.format_text(message),
        };
        self.count += 1;
        Ok(formatted)
    }

    fn format_json(&self, message: &DynamicMessage) -> Result<String, FormatError> {
        let options = SerializeOptions::new().skip_default_fields(!self.options.emit_defaults);
        let mut serializer = serde_json::Serializer::pretty(Vec::new());
        message.serialize_with_options(&mut serializer, &options)?;

        Ok(String::from_utf8_lossy(&serializer.into_inner()).into_owned())
    }

    fn format_text(&self, message: &DynamicMessage) -> String {
        let text = message.to_text_format_with_options(&TextFormatOptions::new().pretty(true));

        if self.options.include_text_separator && self.count > 0 {
            format!("{TEXT_SEPARATOR}{text}")
        } else {
            text
        }
    }
}

/// Builds an instance of `descriptor` with every field populated, to show users the shape
/// of a request.
///
/// Repeated fields get one element, maps one entry, and only the first field of each one-of
/// is set. Recursive message types are left empty on their second occurrence.
///
/// `google.protobuf.Any` fields are left unset, and the JSON well-known types hold a short
/// description of what they accept.
pub fn make_template(descriptor: &MessageDescriptor) -> DynamicMessage {
    make_template_inner(descriptor, &mut HashSet::new())
}

fn make_template_inner(
    descriptor: &MessageDescriptor,
    path: &mut HashSet<String>,
) -> DynamicMessage {
    let mut message = DynamicMessage::new(descriptor.clone());

    if !path.insert(descriptor.full_name().to_string()) {
        return message;
    }

    for field in descriptor.fields() {
        if let Some(oneof) = field.containing_oneof()
            && oneof.fields().next().is_some_and(|first| first != field)
        {
            continue;
        }

        let value = if field.is_map() {
            map_template(&field, path)
        } else if field.is_list() {
            template_value(&field.kind(), path).map(|value| Value::List(vec![value]))
        } else {
            template_value(&field.kind(), path)
        };

        if let Some(value) = value {
            message.set_field(&field, value);
        }
    }

    path.remove(descriptor.full_name());
    message
}

fn map_template(field: &FieldDescriptor, path: &mut HashSet<String>) -> Option<Value> {
    let Kind::Message(entry) = field.kind() else {
        return None;
    };

    let key = MapKey::default_value(&entry.map_entry_key_field().kind());
    let value = template_value(&entry.map_entry_value_field().kind(), path)?;

    Some(Value::Map(HashMap::from([(key, value)])))
}

const ANY: &str = "google.protobuf.Any";
const JSON_VALUE: &str = "google.protobuf.Value";
const JSON_STRUCT: &str = "google.protobuf.Struct";
const JSON_LIST: &str = "google.protobuf.ListValue";

/// `None` leaves the field unset.
fn template_value(kind: &Kind, path: &mut HashSet<String>) -> Option<Value> {
    let Kind::Message(message) = kind else {
        return Some(Value::default_value(kind));
    };
    let pool = message.parent_pool();

    match message.full_name() {
        // An Any without a type URL has no JSON form.
        ANY => None,
        JSON_VALUE => {
            let inner = json_struct(pool, JSON_VALUE, "supports arbitrary JSON")?;
            json_value(pool, "struct_value", Value::Message(inner))
        }
        JSON_STRUCT => {
            json_struct(pool, JSON_STRUCT, "supports arbitrary JSON objects").map(Value::Message)
        }
        JSON_LIST => {
            let inner = json_struct(pool, JSON_LIST, "is an array of arbitrary JSON values")?;
            let element = json_value(pool, "struct_value", Value::Message(inner))?;
            let mut list = DynamicMessage::new(message.clone());
            list.set_field_by_name("values", Value::List(vec![element]));
            Some(Value::Message(list))
        }
        _ => Some(Value::Message(make_template_inner(message, path))),
    }
}

/// A `google.protobuf.Value` with `kind` set.
fn json_value(pool: &DescriptorPool, kind: &str, value: Value) -> Option<Value> {
    let mut message = DynamicMessage::new(pool.get_message_by_name(JSON_VALUE)?);
    message.set_field_by_name(kind, value);
    Some(Value::Message(message))
}

/// A `google.protobuf.Struct` holding the single string entry `key: text`.
fn json_struct(pool: &DescriptorPool, key: &str, text: &str) -> Option<DynamicMessage> {
    let text = json_value(pool, "string_value", Value::String(text.to_string()))?;
    let mut message = DynamicMessage::new(pool.get_message_by_name(JSON_STRUCT)?);
    message.set_field_by_name(
        "fields",
        Value::Map(HashMap::from([(MapKey::String(key.to_string()), text)])),
    );
    Some(message)
}

const STATUS_FILE: &str = "google/rpc/status.proto";
const STATUS_MESSAGE: &str = "google.rpc.Status";

/// Converts a gRPC status into a `google.rpc.Status` message.
///
/// When the server attached rich details (`grpc-status-details-bin`), they are decoded as is.
pub fn status_message(status: &tonic::Status) -> Result<DynamicMessage, FormatError> {
    let descriptor = status_pool()?
        .get_message_by_name(STATUS_MESSAGE)
        .ok_or(FormatError::MissingStatusType)?;

    if !status.details().is_empty() {
        return Ok(DynamicMessage::decode(descriptor, status.details())?);
    }

    let mut message = DynamicMessage::new(descriptor);
    message.set_field_by_name("code", Value::I32(status.code() as i32));
    message.set_field_by_name("message", Value::String(status.message().to_string()));
    Ok(message)
}

fn status_pool() -> Result<DescriptorPool, FormatError> {
    let field = |name: &str, number: i32, r#type: Type, label: Label, type_name: Option<&str>| {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(label as i32),
            r#type: Some(r#type as i32),
            type_name: type_name.map(str::to_string),
            json_name: Some(name.to_string()),
            ..Default::default()
        }
    };

    let any = FileDescriptorProto {
        name: Some("google/protobuf/any.proto".to_string()),
        package: Some("google.protobuf".to_string()),
        syntax: Some("proto3".to_string()),
        message_type: vec![DescriptorProto {
            name: Some("Any".to_string()),
            field: vec![
                field("type_url", 1, Type::String, Label::Optional, None),
                field("value", 2, Type::Bytes, Label::Optional, None),
            ],
            ..Default::default()
        }],
        ..Default::default()
    };

    let status = FileDescriptorProto {
        name: Some(STATUS_FILE.to_string()),
        package: Some("google.rpc".to_string()),
        syntax: Some("proto3".to_string()),
        dependency: vec!["google/protobuf/any.proto".to_string()],
        message_type: vec![DescriptorProto {
            name: Some("Status".to_string()),
            field: vec![
                field("code", 1, Type::Int32, Label::Optional, None),
                field("message", 2, Type::String, Label::Optional, None),
                field(
                    "details",
                    3,
                    Type::Message,
                    Label::Repeated,
                    Some(".google.protobuf.Any"),
                ),
            ],
            ..Default::default()
        }],
        ..Default::default()
    };

    let mut pool = DescriptorPool::new();
    pool.add_file_descriptor_protos([any, status])?;
    Ok(pool)
}
