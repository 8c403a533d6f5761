//! # Descriptor Sources
//!
//! A [`DescriptorSource`] answers schema questions: which services exist, what a fully
//! qualified symbol refers to, and which extensions are known for a message type.
//!
//! Three implementations exist:
//!
//! * [`ReflectionSource`]: asks a live server through the reflection service and caches what it
//!   learns.
//! * [`FileSource`]: serves an in-memory pool built from encoded `FileDescriptorSet` files or
//!   compiled `.proto` sources.
//! * [`CompositeSource`]: prefers reflection and falls back to files.
//!
//! [`SchemaSource`] wraps whichever of these was configured, see [`compose`].
mod composite;
mod file;
mod reflection;

pub use composite::{CompositeSource, SchemaSource, Tagged, compose, merge_extensions};
pub use file::FileSource;
pub use reflection::ReflectionSource;

use crate::reflection::client::ReflectionResolveError;
use prost_reflect::{
    DescriptorError, DescriptorPool, EnumDescriptor, EnumValueDescriptor, ExtensionDescriptor,
    FieldDescriptor, FileDescriptor, MessageDescriptor, MethodDescriptor, OneofDescriptor,
    ServiceDescriptor,
};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Symbol not found: {0}")]
    NotFound(String),
    #[error("Server does not support the reflection API")]
    ReflectionUnsupported,
    #[error("Reflection resolution failed: '{0}'")]
    Reflection(#[source] ReflectionResolveError),
    #[error("Failed to build descriptor pool: '{0}'")]
    Descriptor(#[from] DescriptorError),
    #[error("Failed to decode descriptor set: '{0}'")]
    Decode(#[from] prost::DecodeError),
    #[error("Could not read descriptor file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not parse proto sources: {0}")]
    Compile(#[from] protox::Error),
}

impl SourceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound(_))
    }
}

impl From<ReflectionResolveError> for SourceError {
    fn from(err: ReflectionResolveError) -> Self {
        if err.is_unimplemented() {
            SourceError::ReflectionUnsupported
        } else {
            SourceError::Reflection(err)
        }
    }
}

/// Anything that can answer schema questions.
#[allow(async_fn_in_trait)]
pub trait DescriptorSource {
    /// Fully qualified names of every known service.
    async fn list_services(&mut self) -> Result<Vec<String>, SourceError>;

    /// Resolves a fully qualified symbol.
    async fn find_symbol(&mut self, name: &str) -> Result<Descriptor, SourceError>;

    /// Every known extension of the message `type_name`.
    async fn all_extensions_for_type(
        &mut self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError>;
}

/// A generic wrapper for the different kinds of Protobuf descriptors a symbol can name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    Service(ServiceDescriptor),
    Method(MethodDescriptor),
    Message(MessageDescriptor),
    Field(FieldDescriptor),
    Oneof(OneofDescriptor),
    Enum(EnumDescriptor),
    EnumValue(EnumValueDescriptor),
    Extension(ExtensionDescriptor),
}

impl Descriptor {
    /// Returns the full_name (e.g.,`my.package.v1.MyMessage`) of the inner descriptor
    pub fn full_name(&self) -> &str {
        match self {
            Descriptor::Service(v) => v.full_name(),
            Descriptor::Method(v) => v.full_name(),
            Descriptor::Message(v) => v.full_name(),
            Descriptor::Field(v) => v.full_name(),
            Descriptor::Oneof(v) => v.full_name(),
            Descriptor::Enum(v) => v.full_name(),
            Descriptor::EnumValue(v) => v.full_name(),
            Descriptor::Extension(v) => v.full_name(),
        }
    }

    /// The file in which the element is defined.
    pub fn parent_file(&self) -> FileDescriptor {
        match self {
            Descriptor::Service(v) => v.parent_file(),
            Descriptor::Method(v) => v.parent_service().parent_file(),
            Descriptor::Message(v) => v.parent_file(),
            Descriptor::Field(v) => v.parent_message().parent_file(),
            Descriptor::Oneof(v) => v.parent_message().parent_file(),
            Descriptor::Enum(v) => v.parent_file(),
            Descriptor::EnumValue(v) => v.parent_enum().parent_file(),
            Descriptor::Extension(v) => v.parent_file(),
        }
    }

    /// A human readable description of the element kind, e.g. `a message`.
    pub fn kind(&self) -> &'static str {
        match self {
            Descriptor::Service(_) => "a service",
            Descriptor::Method(_) => "a method",
            Descriptor::Message(m) if m.is_map_entry() => "the entry type for a map field",
            Descriptor::Message(_) => "a message",
            Descriptor::Field(f) if f.is_group() => "a group field",
            Descriptor::Field(_) => "a field",
            Descriptor::Oneof(_) => "a one-of",
            Descriptor::Enum(_) => "an enum",
            Descriptor::EnumValue(_) => "an enum value",
            Descriptor::Extension(_) => "an extension",
        }
    }
}

/// Looks a fully qualified symbol up in `pool`.
///
/// Services, messages, enums and extensions are looked up directly. Methods, fields, one-ofs
/// and enum values are looked up through their parent element.
pub fn find_in_pool(pool: &DescriptorPool, symbol: &str) -> Option<Descriptor> {
    let symbol = symbol.strip_prefix('.').unwrap_or(symbol);

    if let Some(descriptor) = pool.get_service_by_name(symbol) {
        return Some(Descriptor::Service(descriptor));
    }
    if let Some(descriptor) = pool.get_message_by_name(symbol) {
        return Some(Descriptor::Message(descriptor));
    }
    if let Some(descriptor) = pool.get_enum_by_name(symbol) {
        return Some(Descriptor::Enum(descriptor));
    }
    if let Some(descriptor) = pool.get_extension_by_name(symbol) {
        return Some(Descriptor::Extension(descriptor));
    }

    let (parent, name) = symbol.rsplit_once('.').unwrap_or(("", symbol));

    if let Some(service) = pool.get_service_by_name(parent) {
        return service
            .methods()
            .find(|m| m.name() == name)
            .map(Descriptor::Method);
    }

    if let Some(message) = pool.get_message_by_name(parent) {
        if let Some(field) = message.get_field_by_name(name) {
            return Some(Descriptor::Field(field));
        }
        if let Some(oneof) = message.oneofs().find(|o| o.name() == name) {
            return Some(Descriptor::Oneof(oneof));
        }
        // Enum values are scoped as siblings of their enum.
        return message
            .child_enums()
            .find_map(|e| e.get_value_by_name(name))
            .map(Descriptor::EnumValue);
    }

    pool.all_enums()
        .filter(|e| e.parent_message().is_none() && e.package_name() == parent)
        .find_map(|e| e.get_value_by_name(name))
        .map(Descriptor::EnumValue)
}

/// Lists the fully qualified names of the methods of `service`.
pub async fn list_methods(
    source: &mut impl DescriptorSource,
    service: &str,
) -> Result<Vec<String>, SourceError> {
    match source.find_symbol(service).await? {
        Descriptor::Service(service) => Ok(service
            .methods()
            .map(|m| m.full_name().to_string())
            .collect()),
        other => Err(SourceError::NotFound(format!(
            "{} is not a service",
            other.full_name()
        ))),
    }
}
