//! Content addressing.
//!
//! Every hash is SHA-256 over a canonical byte form, so equal logical content
//! on different devices yields equal digests regardless of platform line
//! endings or in-memory ordering.

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::{ClipboardPayload, ContentHash, SnippetCollection, SyncError};

/// Canonical text form: CRLF and lone CR become LF, surrounding whitespace is trimmed.
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Hash raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
    ContentHash::from_digest(&Sha256::digest(bytes))
}

/// Hash text after normalization.
pub fn hash_text(text: &str) -> ContentHash {
    hash_bytes(normalize_text(text).as_bytes())
}

/// Hash a file reference by its path string, normalized like text.
///
/// Fails with [`SyncError::Encoding`] when the path is not valid UTF-8.
pub fn hash_path(path: &Path) -> Result<ContentHash, SyncError> {
    let text = path
        .to_str()
        .ok_or_else(|| SyncError::Encoding(path.to_string_lossy().into_owned()))?;
    Ok(hash_text(text))
}

/// Hash a clipboard payload.
pub fn hash_payload(payload: &ClipboardPayload) -> Result<ContentHash, SyncError> {
    match payload {
        ClipboardPayload::Text(text) => Ok(hash_text(text)),
        ClipboardPayload::Image(bytes)
        | ClipboardPayload::RichText(bytes)
        | ClipboardPayload::Pdf(bytes) => Ok(hash_bytes(bytes)),
        ClipboardPayload::FileRef(path) => hash_path(path),
    }
}

/// Hash a snippet collection.
///
/// Folders are sorted by id, snippets within a folder by id; each contributes
/// one `F|id|title|enabled` or `S|id|title|content` line, lines are joined by
/// `\n`.
pub fn hash_collection(collection: &SnippetCollection) -> ContentHash {
    let mut folders: Vec<_> = collection.folders.iter().collect();
    folders.sort_by_key(|f| f.id);

    let mut lines = Vec::new();
    for folder in folders {
        lines.push(format!(
            "F|{}|{}|{}",
            folder.id, folder.title, folder.is_enabled
        ));
        let mut snippets: Vec<_> = folder.snippets.iter().collect();
        snippets.sort_by_key(|s| s.id);
        for snippet in snippets {
            lines.push(format!(
                "S|{}|{}|{}",
                snippet.id, snippet.title, snippet.content
            ));
        }
    }
    hash_bytes(lines.join("\n").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Snippet, SnippetFolder};
    use uuid::Uuid;

    // =========================================================================
    // Text
    // =========================================================================

    #[test]
    fn line_endings_and_whitespace_hash_identically() {
        let variants = [
            "Hello\nWorld",
            "Hello\r\nWorld",
            "Hello\rWorld",
            "  Hello\r\nWorld\n\n",
            "\tHello\nWorld ",
        ];
        let expected = hash_text(variants[0]);
        for v in &variants[1..] {
            assert_eq!(hash_text(v), expected, "variant {v:?}");
        }
    }

    #[test]
    fn different_text_hashes_differently() {
        assert_ne!(hash_text("Hello World"), hash_text("Hello  World"));
    }

    #[test]
    fn known_sha256_vector() {
        assert_eq!(
            hash_text("abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn interior_whitespace_is_preserved() {
        assert_eq!(normalize_text(" a \r\n b "), "a \n b");
    }

    // =========================================================================
    // Payloads
    // =========================================================================

    #[test]
    fn binary_payloads_hash_raw_bytes() {
        let bytes = vec![1u8, 2, 3];
        let hash = hash_payload(&ClipboardPayload::Image(bytes.clone())).unwrap();
        assert_eq!(hash, hash_bytes(&bytes));
    }

    #[test]
    fn file_ref_hashes_path_string() {
        let payload = ClipboardPayload::FileRef("/tmp/report.txt".into());
        assert_eq!(hash_payload(&payload).unwrap(), hash_text("/tmp/report.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_path_is_encoding_error() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let path = Path::new(OsStr::from_bytes(b"/tmp/\xff\xfe"));
        assert!(matches!(hash_path(path), Err(SyncError::Encoding(_))));
    }

    // =========================================================================
    // Collections
    // =========================================================================

    fn snippet(id: u128, title: &str) -> Snippet {
        Snippet {
            id: Uuid::from_u128(id),
            title: title.into(),
            content: format!("{title} body"),
        }
    }

    fn folder(id: u128, snippets: Vec<Snippet>) -> SnippetFolder {
        SnippetFolder {
            id: Uuid::from_u128(id),
            title: format!("folder {id}"),
            is_enabled: true,
            snippets,
        }
    }

    #[test]
    fn collection_hash_ignores_ordering() {
        let a = SnippetCollection::new(vec![
            folder(1, vec![snippet(10, "x"), snippet(11, "y")]),
            folder(2, vec![snippet(20, "z")]),
        ]);
        let b = SnippetCollection::new(vec![
            folder(2, vec![snippet(20, "z")]),
            folder(1, vec![snippet(11, "y"), snippet(10, "x")]),
        ]);
        assert_eq!(hash_collection(&a), hash_collection(&b));
    }

    #[test]
    fn collection_hash_sees_enabled_flag() {
        let mut a = SnippetCollection::new(vec![folder(1, vec![])]);
        let before = hash_collection(&a);
        a.folders[0].is_enabled = false;
        assert_ne!(hash_collection(&a), before);
    }

    #[test]
    fn collection_hash_matches_canonical_form() {
        let c = SnippetCollection::new(vec![folder(1, vec![snippet(2, "t")])]);
        let canonical = format!(
            "F|{}|folder 1|true\nS|{}|t|t body",
            Uuid::from_u128(1),
            Uuid::from_u128(2)
        );
        assert_eq!(hash_collection(&c), hash_bytes(canonical.as_bytes()));
    }
}
