//! Combines the reflection and the file sources.
use super::{Descriptor, DescriptorSource, FileSource, ReflectionSource, SourceError};
use crate::BoxError;
use http_body::Body as HttpBody;
use prost_reflect::ExtensionDescriptor;
use std::collections::HashSet;
use tonic::client::GrpcService;
use tonic::transport::Channel;

/// Anything identified by a field tag number.
pub trait Tagged {
    fn tag(&self) -> u32;
}

impl Tagged for ExtensionDescriptor {
    fn tag(&self) -> u32 {
        self.number()
    }
}

/// Merges extension lists from a primary and a fallback lookup.
///
/// * primary failed: the fallback result, whatever it is.
/// * fallback failed: the primary result.
/// * both succeeded: the primary items, then fallback items whose tag is not already present.
pub fn merge_extensions<T: Tagged, E>(
    primary: Result<Vec<T>, E>,
    fallback: Result<Vec<T>, E>,
) -> Result<Vec<T>, E> {
    let mut merged = match primary {
        Ok(items) => items,
        Err(_) => return fallback,
    };

    let Ok(extra) = fallback else {
        return Ok(merged);
    };

    let mut tags: HashSet<u32> = merged.iter().map(Tagged::tag).collect();
    merged.extend(extra.into_iter().filter(|item| tags.insert(item.tag())));

    Ok(merged)
}

/// Asks `primary` first and `fallback` when it fails.
pub struct CompositeSource<P, F> {
    primary: P,
    fallback: F,
}

impl<P, F> CompositeSource<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

impl<P, F> DescriptorSource for CompositeSource<P, F>
where
    P: DescriptorSource,
    F: DescriptorSource,
{
    /// Only the primary source is asked, services from files may not exist on the server.
    async fn list_services(&mut self) -> Result<Vec<String>, SourceError> {
        self.primary.list_services().await
    }

    async fn find_symbol(&mut self, name: &str) -> Result<Descriptor, SourceError> {
        match self.primary.find_symbol(name).await {
            Ok(descriptor) => Ok(descriptor),
            Err(err) => {
                tracing::debug!(symbol = name, %err, "primary source failed, using fallback");
                self.fallback.find_symbol(name).await
            }
        }
    }

    async fn all_extensions_for_type(
        &mut self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError> {
        let primary = self.primary.all_extensions_for_type(type_name).await;
        let fallback = self.fallback.all_extensions_for_type(type_name).await;
        merge_extensions(primary, fallback)
    }
}

/// The configured schema source.
pub enum SchemaSource<S = Channel> {
    Reflection(ReflectionSource<S>),
    File(FileSource),
    Composite(CompositeSource<ReflectionSource<S>, FileSource>),
}

/// Builds the schema source out of whichever sources are configured.
///
/// Returns `None` when neither is.
pub fn compose<S>(
    reflection: Option<ReflectionSource<S>>,
    file: Option<FileSource>,
) -> Option<SchemaSource<S>> {
    match (reflection, file) {
        (Some(reflection), Some(file)) => Some(SchemaSource::Composite(CompositeSource::new(
            reflection, file,
        ))),
        (Some(reflection), None) => Some(SchemaSource::Reflection(reflection)),
        (None, Some(file)) => Some(SchemaSource::File(file)),
        (None, None) => None,
    }
}

impl<S> DescriptorSource for SchemaSource<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    async fn list_services(&mut self) -> Result<Vec<String>, SourceError> {
        match self {
            SchemaSource::Reflection(source) => source.list_services().await,
            SchemaSource::File(source) => source.list_services().await,
            SchemaSource::Composite(source) => source.list_services().await,
        }
    }

    async fn find_symbol(&mut self, name: &str) -> Result<Descriptor, SourceError> {
        match self {
            SchemaSource::Reflection(source) => source.find_symbol(name).await,
            SchemaSource::File(source) => source.find_symbol(name).await,
            SchemaSource::Composite(source) => source.find_symbol(name).await,
        }
    }

    async fn all_extensions_for_type(
        &mut self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError> {
        match self {
            SchemaSource::Reflection(source) => source.all_extensions_for_type(type_name).await,
            SchemaSource::File(source) => source.all_extensions_for_type(type_name).await,
            SchemaSource::Composite(source) => source.all_extensions_for_type(type_name).await,
        }
    }
}
