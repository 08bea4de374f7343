//! Sender-side chunk planning.
//!
//! Chunk size is picked from the file size, the inter-chunk delay from the
//! chunk length, and compression eligibility from the file name and the
//! first bytes of content.

use std::path::Path;
use std::time::Duration;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// How many leading bytes [`is_plausibly_text`] inspects.
pub const SNIFF_LEN: usize = 1024;

/// Chunk size for a file of `file_size` bytes.
///
/// | file size   | chunk   |
/// |-------------|---------|
/// | < 1 MiB     | 256 KiB |
/// | < 10 MiB    | 512 KiB |
/// | otherwise   | 1 MiB   |
pub fn chunk_size_for(file_size: u64) -> usize {
    if file_size < MIB {
        (256 * KIB) as usize
    } else if file_size < 10 * MIB {
        (512 * KIB) as usize
    } else {
        MIB as usize
    }
}

/// Number of chunks a file of `file_size` bytes is split into.
///
/// Never zero: an empty file is sent as a single empty chunk.
pub fn chunk_count(file_size: u64, chunk_size: usize) -> u64 {
    let chunk_size = chunk_size.max(1) as u64;
    file_size.div_ceil(chunk_size).max(1)
}

/// Inter-chunk delay: a fixed cost per started block of payload, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    /// Delay charged per started block
    pub per_block: Duration,
    /// Block size in bytes
    pub block_size: usize,
    /// Upper bound on the delay
    pub cap: Duration,
}

impl Throttle {
    /// No delay at all.
    pub fn disabled() -> Self {
        Self {
            per_block: Duration::ZERO,
            block_size: 64 * KIB as usize,
            cap: Duration::ZERO,
        }
    }

    /// Delay to wait after sending a chunk of `chunk_len` bytes.
    pub fn delay_for(&self, chunk_len: usize) -> Duration {
        let blocks = chunk_len.div_ceil(self.block_size.max(1)) as u32;
        self.per_block.saturating_mul(blocks).min(self.cap)
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self {
            per_block: Duration::from_millis(2),
            block_size: 64 * KIB as usize,
            cap: Duration::from_millis(20),
        }
    }
}

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "csv", "tsv", "log", "json", "xml", "yaml", "yml", "toml",
    "ini", "cfg", "conf", "html", "htm", "css", "js", "ts", "jsx", "tsx", "rs", "c", "h", "cpp",
    "hpp", "cc", "java", "kt", "swift", "py", "rb", "go", "sh", "bash", "zsh", "sql", "svg",
    "tex", "rtf",
];

const BINARY_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "webp", "heic", "heif", "ico", "psd",
    // audio / video
    "mp3", "aac", "m4a", "flac", "wav", "ogg", "opus", "mp4", "m4v", "mov", "avi", "mkv", "webm",
    // archives
    "zip", "gz", "tgz", "bz2", "xz", "zst", "7z", "rar", "tar", "dmg", "iso", "jar", "apk",
    // documents and executables
    "pdf", "docx", "xlsx", "pptx", "key", "pages", "numbers", "exe", "dll", "so", "dylib", "bin",
    "wasm", "o", "a",
];

/// Whether a file is plausibly text, and so a candidate for compression.
///
/// Known binary, media and archive extensions are always rejected; known
/// text extensions are always accepted. Anything else is decided by
/// sniffing `head` (the first [`SNIFF_LEN`] bytes): a null byte rejects,
/// otherwise at least 90% printable ASCII or common whitespace accepts.
pub fn is_plausibly_text(file_name: &str, head: &[u8]) -> bool {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    if let Some(ext) = extension.as_deref() {
        if BINARY_EXTENSIONS.contains(&ext) {
            return false;
        }
        if TEXT_EXTENSIONS.contains(&ext) {
            return true;
        }
    }

    let head = &head[..head.len().min(SNIFF_LEN)];
    if head.is_empty() || head.contains(&0) {
        return false;
    }
    let printable = head
        .iter()
        .filter(|&&b| matches!(b, 0x20..=0x7E | b'\t' | b'\n' | b'\r'))
        .count();
    printable * 10 >= head.len() * 9
}
