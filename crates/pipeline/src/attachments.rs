//! Where document PDFs come from.
//!
//! Retrieving and cleaning up the files is someone else's job; the pipeline
//! only reads what is already there.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::warn;

use billnotify_channel::Attachment;
use billnotify_invoicing::Document;

use crate::error::AttachmentError;

#[async_trait]
pub trait AttachmentSource: Send + Sync {
    /// The attachment for `document`, or `None` when there is none.
    async fn fetch(&self, document: &Document) -> Result<Option<Attachment>, AttachmentError>;
}

/// Send text only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAttachments;

#[async_trait]
impl AttachmentSource for NoAttachments {
    async fn fetch(&self, _document: &Document) -> Result<Option<Attachment>, AttachmentError> {
        Ok(None)
    }
}

/// Reads `<dir>/<document number>.pdf`.
#[derive(Debug, Clone)]
pub struct DirectoryAttachments {
    dir: PathBuf,
}

impl DirectoryAttachments {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, number: &str) -> Option<PathBuf> {
        let safe = !number.is_empty()
            && !number.contains(['/', '\\'])
            && number != "."
            && number != "..";
        safe.then(|| self.dir.join(format!("{number}.pdf")))
    }
}

#[async_trait]
impl AttachmentSource for DirectoryAttachments {
    async fn fetch(&self, document: &Document) -> Result<Option<Attachment>, AttachmentError> {
        let Some(path) = self.path_for(&document.number) else {
            warn!(document_id = %document.id, number = %document.number, "document number is not a usable file name");
            return Ok(None);
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(Attachment::pdf(format!("{}.pdf", document.number), bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(AttachmentError { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billnotify_core::{CustomerId, DocumentId};
    use billnotify_invoicing::Money;
    use chrono::NaiveDate;

    fn doc(number: &str) -> Document {
        Document::new(
            DocumentId::new(1),
            number,
            CustomerId::new(1),
            Money(100),
            "MXN",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        )
    }

    #[tokio::test]
    async fn reads_pdf_named_after_the_document_number() {
        let dir = std::env::temp_dir().join(format!("billnotify-att-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("9008535.pdf"), b"%PDF").unwrap();

        let source = DirectoryAttachments::new(&dir);
        let found = source.fetch(&doc("9008535")).await.unwrap().unwrap();
        assert_eq!(found.file_name, "9008535.pdf");
        assert_eq!(found.bytes, b"%PDF".to_vec());

        assert!(source.fetch(&doc("1234567")).await.unwrap().is_none());
        assert!(source.fetch(&doc("../etc/passwd")).await.unwrap().is_none());
        let _ = std::fs::remove_dir_all(dir);
    }
}
