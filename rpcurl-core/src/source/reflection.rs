//! Descriptor source backed by the server reflection service.
use super::{Descriptor, DescriptorSource, SourceError, find_in_pool};
use crate::BoxError;
use crate::reflection::client::{ReflectionClient, ReflectionResolveError};
use http_body::Body as HttpBody;
use prost_reflect::{DescriptorPool, ExtensionDescriptor};
use prost_types::FileDescriptorProto;
use tonic::client::GrpcService;
use tonic::transport::Channel;

/// Resolves descriptors lazily through server reflection.
///
/// Every file the server sends is kept in a growing pool, so a symbol is never requested twice.
pub struct ReflectionSource<S = Channel> {
    client: ReflectionClient<S>,
    pool: DescriptorPool,
}

impl<S> ReflectionSource<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(client: ReflectionClient<S>) -> Self {
        Self {
            client,
            pool: DescriptorPool::new(),
        }
    }

    /// Every file learned from the server so far.
    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    fn add_files(&mut self, files: Vec<FileDescriptorProto>) -> Result<(), SourceError> {
        let new_files: Vec<_> = files
            .into_iter()
            .filter(|file| self.pool.get_file_by_name(file.name()).is_none())
            .collect();

        if !new_files.is_empty() {
            tracing::debug!(count = new_files.len(), "caching reflected files");
            self.pool.add_file_descriptor_protos(new_files)?;
        }
        Ok(())
    }

    async fn fetch_symbol(&mut self, name: &str) -> Result<(), SourceError> {
        let files = self
            .client
            .file_containing_symbol(name)
            .await
            .map_err(|err| not_found_or(err, name))?;
        self.add_files(files)
    }
}

impl<S> DescriptorSource for ReflectionSource<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    async fn list_services(&mut self) -> Result<Vec<String>, SourceError> {
        let services = self.client.list_services().await?;
        tracing::debug!(
            version = ?self.client.version(),
            count = services.len(),
            "listed services through reflection"
        );
        Ok(services)
    }

    async fn find_symbol(&mut self, name: &str) -> Result<Descriptor, SourceError> {
        let name = name.strip_prefix('.').unwrap_or(name);

        if let Some(descriptor) = find_in_pool(&self.pool, name) {
            return Ok(descriptor);
        }

        match self.fetch_symbol(name).await {
            Ok(()) => {}
            // Not every server indexes methods, fields and enum values. Retry with the
            // enclosing element, which brings the whole file in.
            Err(SourceError::NotFound(_)) if name.contains('.') => {
                let (parent, _) = name.rsplit_once('.').unwrap_or((name, ""));
                tracing::debug!(symbol = name, parent, "retrying reflection with parent symbol");
                self.fetch_symbol(parent)
                    .await
                    .map_err(|err| match err {
                        SourceError::NotFound(_) => SourceError::NotFound(name.to_string()),
                        err => err,
                    })?;
            }
            Err(err) => return Err(err),
        }

        find_in_pool(&self.pool, name).ok_or_else(|| SourceError::NotFound(name.to_string()))
    }

    async fn all_extensions_for_type(
        &mut self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError> {
        let numbers = self
            .client
            .all_extension_numbers_of_type(type_name)
            .await
            .map_err(|err| not_found_or(err, type_name))?;

        if self.pool.get_message_by_name(type_name).is_none() {
            self.fetch_symbol(type_name).await?;
        }

        for number in &numbers {
            let known = self
                .pool
                .get_message_by_name(type_name)
                .and_then(|message| message.get_extension(*number as u32))
                .is_some();

            if !known {
                let files = self
                    .client
                    .file_containing_extension(type_name, *number)
                    .await
                    .map_err(|err| not_found_or(err, type_name))?;
                self.add_files(files)?;
            }
        }

        let message = self
            .pool
            .get_message_by_name(type_name)
            .ok_or_else(|| SourceError::NotFound(type_name.to_string()))?;

        Ok(message
            .extensions()
            .filter(|ext| numbers.contains(&(ext.number() as i32)))
            .collect())
    }
}

fn not_found_or(err: ReflectionResolveError, symbol: &str) -> SourceError {
    if err.is_not_found() {
        SourceError::NotFound(symbol.to_string())
    } else {
        err.into()
    }
}
