use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/webp",
    "application/pdf",
    "text/plain",
    "text/markdown",
    "application/zip",
    "application/x-tar",
    "application/gzip",
];

pub const ALLOWED_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp", ".pdf", ".doc", ".docx", ".txt", ".md",
    ".log", ".zip", ".tar", ".gz",
];

#[derive(Debug, Error, PartialEq)]
pub enum AttachmentError {
    #[error("file name is missing")]
    MissingName,
    #[error("file is empty")]
    Empty,
    #[error("file type '{0}' is not allowed")]
    MimeNotAllowed(String),
    #[error("file extension '{0}' is not allowed")]
    ExtensionNotAllowed(String),
    #[error("file is too large: {size} bytes, limit is {max} bytes")]
    TooLarge { size: usize, max: usize },
    #[error("failed to store file: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub filename: String,
    pub original_filename: String,
    pub file_path: String,
    pub file_size: usize,
    pub content_type: String,
}

/// Last path component of a client-supplied name, with both separators stripped.
pub fn sanitize_original_name(raw: &str) -> String {
    raw.rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Lowercased extension including the dot, e.g. `.png`.
fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
}

/// `image/PNG; charset=x` -> `image/png`
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Check one upload. Returns the normalized (original name, extension, MIME).
pub fn check_upload(
    raw_name: &str,
    content_type: &str,
    size: usize,
    max_size: usize,
) -> Result<(String, String, String), AttachmentError> {
    let original = sanitize_original_name(raw_name);
    if original.is_empty() {
        return Err(AttachmentError::MissingName);
    }
    if size == 0 {
        return Err(AttachmentError::Empty);
    }
    if size > max_size {
        return Err(AttachmentError::TooLarge { size, max: max_size });
    }
    let mime = essence(content_type);
    if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
        return Err(AttachmentError::MimeNotAllowed(mime));
    }
    let ext = extension_of(&original).unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(AttachmentError::ExtensionNotAllowed(ext));
    }
    Ok((original, ext, mime))
}

/// `YYYY/MM/DD` directory for an upload date.
pub fn dated_dir(root: &Path, at: DateTime<Utc>) -> PathBuf {
    root.join(at.format("%Y").to_string())
        .join(at.format("%m").to_string())
        .join(at.format("%d").to_string())
}

/// Validate and write one file under `root/YYYY/MM/DD/<uuid><ext>`.
pub async fn store(
    root: &Path,
    raw_name: &str,
    content_type: &str,
    bytes: &[u8],
    max_size: usize,
    now: DateTime<Utc>,
) -> Result<StoredFile, AttachmentError> {
    let (original, ext, mime) = check_upload(raw_name, content_type, bytes.len(), max_size)?;

    let dir = dated_dir(root, now);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| AttachmentError::Io(e.to_string()))?;

    let filename = format!("{}{}", Uuid::new_v4(), ext);
    let path = dir.join(&filename);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| AttachmentError::Io(e.to_string()))?;

    Ok(StoredFile {
        filename,
        original_filename: original,
        file_path: path.to_string_lossy().into_owned(),
        file_size: bytes.len(),
        content_type: mime,
    })
}

/// Best-effort removal of stored files; failures are only logged.
pub async fn remove_files(paths: &[String]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!("Failed to remove attachment file {}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn original_names_lose_path_components() {
        assert_eq!(sanitize_original_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_original_name("C:\\Users\\me\\shot.PNG"), "shot.PNG");
        assert_eq!(sanitize_original_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_original_name("dir/"), "");
    }

    #[test]
    fn uploads_are_checked_against_allow_lists() {
        assert_eq!(
            check_upload("shot.PNG", "image/png", 10, 100),
            Ok(("shot.PNG".to_string(), ".png".to_string(), "image/png".to_string()))
        );
        assert_eq!(
            check_upload("notes.txt", "Text/Plain; charset=utf-8", 10, 100).unwrap().2,
            "text/plain"
        );
        assert_eq!(
            check_upload("run.exe", "application/x-msdownload", 10, 100),
            Err(AttachmentError::MimeNotAllowed("application/x-msdownload".to_string()))
        );
        assert_eq!(
            check_upload("page.html", "text/plain", 10, 100),
            Err(AttachmentError::ExtensionNotAllowed(".html".to_string()))
        );
        assert_eq!(
            check_upload("big.zip", "application/zip", 101, 100),
            Err(AttachmentError::TooLarge { size: 101, max: 100 })
        );
        assert_eq!(check_upload("a.txt", "text/plain", 0, 100), Err(AttachmentError::Empty));
        assert_eq!(check_upload("", "text/plain", 1, 100), Err(AttachmentError::MissingName));
    }

    #[test]
    fn files_are_grouped_by_upload_date() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 23, 59, 0).unwrap();
        assert_eq!(dated_dir(Path::new("uploads"), at), PathBuf::from("uploads/2024/03/07"));
    }

    #[tokio::test]
    async fn store_writes_under_a_uuid_name() {
        let root = std::env::temp_dir().join(format!("attachments-{}", Uuid::new_v4()));
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();

        let stored = store(&root, "logs/app.LOG", "text/plain", b"boom", 1024, at)
            .await
            .unwrap();
        assert_eq!(stored.original_filename, "app.LOG");
        assert!(stored.filename.ends_with(".log"));
        assert_eq!(stored.filename.len(), 36 + 4);
        assert!(stored.file_path.contains("2024"));
        assert_eq!(tokio::fs::read(&stored.file_path).await.unwrap(), b"boom");

        remove_files(&[stored.file_path.clone()]).await;
        assert!(tokio::fs::metadata(&stored.file_path).await.is_err());
        let _ = tokio::fs::remove_dir_all(&root).await;
    }
}
