//! Writes the schema of described or invoked elements as an encoded `FileDescriptorSet`.
use crate::source::Descriptor;
use prost::Message;
use prost_reflect::FileDescriptor;
use prost_types::FileDescriptorSet;
use std::collections::HashSet;
use std::path::Path;

/// Collects the files defining `descriptors` and all of their transitive dependencies.
///
/// Dependencies always come before the files importing them.
pub fn file_descriptor_set(descriptors: &[Descriptor]) -> FileDescriptorSet {
    let mut seen = HashSet::new();
    let mut file = Vec::new();

    for descriptor in descriptors {
        add_file(descriptor.parent_file(), &mut seen, &mut file);
    }

    FileDescriptorSet { file }
}

fn add_file(
    file: FileDescriptor,
    seen: &mut HashSet<String>,
    out: &mut Vec<prost_types::FileDescriptorProto>,
) {
    if !seen.insert(file.name().to_string()) {
        return;
    }

    for dependency in file.dependencies() {
        add_file(dependency, seen, out);
    }

    out.push(file.file_descriptor_proto().clone());
}

/// Writes the encoded set for `descriptors` to `path`.
pub fn write_protoset(path: &Path, descriptors: &[Descriptor]) -> std::io::Result<()> {
    let set = file_descriptor_set(descriptors);
    tracing::debug!(files = set.file.len(), path = %path.display(), "writing protoset");
    std::fs::write(path, set.encode_to_vec())
}
