use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::cache::ArtifactCache;
use crate::core::document::{
    ArxivNormalizer, Document, DocumentNormalizer, DocumentSource, PdfNormalizer, PdfTextExtractor,
    ScienceDirectNormalizer,
};
use crate::core::error::{PapercastError, Result};
use crate::core::llm::Generator;

/// Turns a user-supplied identifier into a cached, validated [`Document`].
pub struct DocumentResolver {
    cache: ArtifactCache,
    generator: Arc<dyn Generator>,
    extractor: Arc<dyn PdfTextExtractor>,
    pdf_dir: PathBuf,
    client: Client,
}

impl DocumentResolver {
    pub fn new(
        cache: ArtifactCache,
        cache_root: impl AsRef<Path>,
        generator: Arc<dyn Generator>,
        extractor: Arc<dyn PdfTextExtractor>,
    ) -> Self {
        Self {
            cache,
            generator,
            extractor,
            pdf_dir: cache_root.as_ref().join("pdfs"),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(300))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    pub async fn resolve(&self, input: &str, use_cache: bool) -> Result<Document> {
        let source = DocumentSource::sniff(input)?;
        let doc_id = source.doc_id();

        if use_cache {
            if let Some(doc) = self.cache.documents.load::<Document>(&doc_id).await? {
                return Ok(doc);
            }
        }

        let doc = match &source {
            DocumentSource::Arxiv { id } => self.resolve_arxiv(id).await?,
            DocumentSource::ScienceDirect { url, article_id } => {
                ScienceDirectNormalizer::new(url.clone(), article_id.clone())
                    .to_document()
                    .await?
            }
            DocumentSource::Pdf { path } => self.pdf_normalizer(path.clone()).to_document().await?,
        };

        if doc.content.trim().is_empty() {
            return Err(PapercastError::unavailable(&doc_id, "normalized document has no content"));
        }
        self.cache.documents.save(&doc.doc_id, &doc).await?;
        Ok(doc)
    }

    fn pdf_normalizer(&self, path: PathBuf) -> PdfNormalizer {
        PdfNormalizer::new(path, self.extractor.clone(), self.generator.clone())
    }

    /// HTML rendition first; papers without one go through the PDF reader.
    async fn resolve_arxiv(&self, id: &str) -> Result<Document> {
        let normalizer = ArxivNormalizer::new(id);
        match normalizer.to_document().await {
            Ok(doc) => Ok(doc),
            Err(PapercastError::SourceUnavailable { reason, .. }) => {
                log::warn!("arXiv {} HTML unavailable ({}), falling back to PDF", id, reason);
                let path = self.pdf_dir.join(format!("{}.pdf", id.replace('/', "_")));
                download(&self.client, &normalizer.pdf_url(), &path)
                    .await
                    .map_err(|e| PapercastError::unavailable(id, e.to_string()))?;
                let mut doc = self.pdf_normalizer(path).to_document().await?;
                doc.doc_id = id.to_string();
                Ok(doc)
            }
            Err(e) => Err(e),
        }
    }
}

async fn download(client: &Client, url: &str, dest: &Path) -> anyhow::Result<()> {
    if tokio::fs::try_exists(dest).await.unwrap_or(false) {
        log::info!("Using downloaded {}", dest.display());
        return Ok(());
    }
    log::info!("Downloading {} -> {}", url, dest.display());
    let res = client.get(url).send().await?;
    if !res.status().is_success() {
        return Err(anyhow::anyhow!("GET {} returned {}", url, res.status()));
    }
    let bytes = res.bytes().await?;
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = dest.with_extension("pdf.part");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, dest).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::GenerationRequest;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PageText(&'static str);

    #[async_trait]
    impl PdfTextExtractor for PageText {
        async fn extract_text(&self, _path: &Path) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct CountingReader {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Generator for CountingReader {
        async fn generate(&self, _request: &GenerationRequest) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(r#"Here you go: {"title": "Working Memory", "authors": ["N. Cowan"],
                "abstract": "Capacity limits.", "full_text": {"Introduction": "Intro"}}"#
                .to_string())
        }
    }

    #[tokio::test]
    async fn pdf_is_normalized_once_then_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let reader = Arc::new(CountingReader { calls: AtomicUsize::new(0) });
        let resolver = DocumentResolver::new(
            ArtifactCache::new(dir.path()),
            dir.path(),
            reader.clone(),
            Arc::new(PageText("Working Memory\nN. Cowan\nIntro")),
        );

        let first = resolver.resolve("pdfs/cowan-2024.pdf", true).await.unwrap();
        assert_eq!(first.doc_id, "cowan-2024");
        assert_eq!(first.sections.as_ref().unwrap()["Introduction"].anchor_id, "S1");
        assert!(dir.path().join("documents").join("cowan-2024.json").exists());

        let second = resolver.resolve("pdfs/cowan-2024.pdf", true).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(reader.calls.load(Ordering::SeqCst), 1);

        resolver.resolve("pdfs/cowan-2024.pdf", false).await.unwrap();
        assert_eq!(reader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_pdf_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = DocumentResolver::new(
            ArtifactCache::new(dir.path()),
            dir.path(),
            Arc::new(CountingReader { calls: AtomicUsize::new(0) }),
            Arc::new(PageText("")),
        );
        let err = resolver.resolve("scan.pdf", true).await.unwrap_err();
        assert!(matches!(err, PapercastError::SourceUnavailable { .. }));
        assert!(!dir.path().join("documents").join("scan.json").exists());
    }

    #[tokio::test]
    async fn unsupported_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = DocumentResolver::new(
            ArtifactCache::new(dir.path()),
            dir.path(),
            Arc::new(CountingReader { calls: AtomicUsize::new(0) }),
            Arc::new(PageText("text")),
        );
        assert!(resolver.resolve("https://example.org/paper", true).await.is_err());
    }
}
