//! Encode/decode between binary field payloads and AVP attachments.
//!
//! A field holding files is persisted as an attachments map on its AVP
//! document, with the JSON `data` left null. Bodies are base64 inline,
//! so attachment-bearing AVPs replicate like any other document.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::documents::Attachment;
use crate::error::{DataError, Result};

/// One binary payload attached to a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileData {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Random name for a file that arrived without one.
pub fn generate_file_name() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Build the attachments map for an AVP document.
///
/// Unnamed or duplicate-named files get a generated name so no payload
/// is silently dropped.
pub fn files_to_attachments(files: &[FileData]) -> BTreeMap<String, Attachment> {
    let mut map = BTreeMap::new();
    for file in files {
        let mut name = if file.name.is_empty() {
            generate_file_name()
        } else {
            file.name.clone()
        };
        if map.contains_key(&name) {
            name = format!("{}-{}", name, generate_file_name());
        }
        map.insert(
            name,
            Attachment {
                content_type: file.content_type.clone(),
                data: BASE64.encode(&file.bytes),
            },
        );
    }
    map
}

/// Rehydrate the files stored on an AVP document, ordered by name.
pub fn attachments_to_files(map: &BTreeMap<String, Attachment>) -> Result<Vec<FileData>> {
    map.iter()
        .map(|(name, attachment)| {
            let bytes = BASE64
                .decode(&attachment.data)
                .map_err(|e| DataError::Attachment(format!("{}: {}", name, e)))?;
            Ok(FileData {
                name: name.clone(),
                content_type: attachment.content_type.clone(),
                bytes,
            })
        })
        .collect()
}
