//! Descriptor source backed by local files.
use super::{Descriptor, DescriptorSource, SourceError, find_in_pool};
use prost::Message;
use prost_reflect::{DescriptorPool, ExtensionDescriptor};
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Serves descriptors from an in-memory pool.
#[derive(Debug, Clone)]
pub struct FileSource {
    pool: DescriptorPool,
}

impl FileSource {
    pub fn from_pool(pool: DescriptorPool) -> Self {
        Self { pool }
    }

    /// Decodes a single encoded `FileDescriptorSet`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SourceError> {
        Ok(Self::from_pool(DescriptorPool::decode(bytes)?))
    }

    /// Loads and merges encoded `FileDescriptorSet` files, as produced by
    /// `protoc --include_imports --descriptor_set_out`.
    ///
    /// Files present in several sets are kept once.
    pub fn from_descriptor_sets(paths: &[PathBuf]) -> Result<Self, SourceError> {
        let mut seen = HashSet::new();
        let mut files: Vec<FileDescriptorProto> = Vec::new();

        for path in paths {
            let bytes = std::fs::read(path).map_err(|source| SourceError::ReadFile {
                path: path.clone(),
                source,
            })?;
            let set = FileDescriptorSet::decode(bytes.as_slice())?;

            for file in set.file {
                if seen.insert(file.name().to_string()) {
                    files.push(file);
                }
            }
        }

        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_protos(files)?;

        tracing::debug!(files = pool.files().count(), "loaded descriptor sets");
        Ok(Self::from_pool(pool))
    }

    /// Compiles `.proto` sources. Imports are resolved against `import_paths`, or the current
    /// directory when none are given.
    pub fn from_source_files(
        import_paths: &[PathBuf],
        files: &[PathBuf],
    ) -> Result<Self, SourceError> {
        let import_paths: Vec<&Path> = if import_paths.is_empty() {
            vec![Path::new(".")]
        } else {
            import_paths.iter().map(PathBuf::as_path).collect()
        };

        // Proto file names are relative to an import path.
        let files: Vec<PathBuf> = files
            .iter()
            .map(|file| {
                import_paths
                    .iter()
                    .map(|dir| dir.join(file))
                    .find(|candidate| candidate.is_file())
                    .unwrap_or_else(|| file.clone())
            })
            .collect();

        let mut compiler = protox::Compiler::new(&import_paths)?;
        compiler.include_imports(true).include_source_info(true);
        compiler.open_files(&files)?;

        let pool = compiler.descriptor_pool();
        tracing::debug!(files = pool.files().count(), "compiled proto sources");
        Ok(Self::from_pool(pool))
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }
}

impl DescriptorSource for FileSource {
    async fn list_services(&mut self) -> Result<Vec<String>, SourceError> {
        Ok(self
            .pool
            .services()
            .map(|s| s.full_name().to_string())
            .collect())
    }

    async fn find_symbol(&mut self, name: &str) -> Result<Descriptor, SourceError> {
        find_in_pool(&self.pool, name).ok_or_else(|| SourceError::NotFound(name.to_string()))
    }

    async fn all_extensions_for_type(
        &mut self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError> {
        self.pool
            .get_message_by_name(type_name)
            .map(|message| message.extensions().collect())
            .ok_or_else(|| SourceError::NotFound(type_name.to_string()))
    }
}
