//! Canonical paper record and the per-source normalizers that build it.

use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::error::{PapercastError, Result};
use crate::core::llm::{extract_json_object, GenerationRequest, Generator};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub text: String,
    #[serde(default)]
    pub anchor_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sections: Option<BTreeMap<String, Section>>,
}

impl Document {
    /// Names of required fields that are empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.title.trim().is_empty() {
            missing.push("title");
        }
        if self.authors.iter().all(|a| a.trim().is_empty()) {
            missing.push("authors");
        }
        if self.abstract_text.trim().is_empty() {
            missing.push("abstract");
        }
        if self.content.trim().is_empty() {
            missing.push("content");
        }
        missing
    }

    pub fn validate(&self) -> Result<()> {
        let fields = self.missing_fields();
        if fields.is_empty() {
            Ok(())
        } else {
            Err(PapercastError::MissingField { fields })
        }
    }

    /// Authors in display order, `; ` separated.
    pub fn authors_line(&self) -> String {
        self.authors.join("; ")
    }

    /// Each section's title followed by its text, or `None` for sources
    /// without structured sections.
    pub fn section_digest(&self) -> Option<String> {
        let sections = self.sections.as_ref().filter(|s| !s.is_empty())?;
        Some(
            sections
                .iter()
                .map(|(title, section)| format!("{}\n{}", title, section.text.trim()))
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    }
}

/// Where a paper comes from, sniffed from the identifier the user gave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    Arxiv { id: String },
    ScienceDirect { url: String, article_id: String },
    Pdf { path: PathBuf },
}

impl DocumentSource {
    pub fn sniff(input: &str) -> Result<Self> {
        let input = input.trim();
        if let Some(id) = arxiv_id(input) {
            return Ok(Self::Arxiv { id });
        }
        if input.contains("sciencedirect.com/") {
            let article_id = input
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string();
            if article_id.is_empty() {
                return Err(PapercastError::unavailable(input, "no article id in ScienceDirect URL"));
            }
            return Ok(Self::ScienceDirect {
                url: input.to_string(),
                article_id,
            });
        }
        if input.starts_with("http://") || input.starts_with("https://") {
            return Err(PapercastError::unavailable(input, "unsupported document host"));
        }
        let path = PathBuf::from(input);
        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        {
            return Ok(Self::Pdf { path });
        }
        Err(PapercastError::unavailable(input, "expected an arXiv/ScienceDirect URL or a .pdf path"))
    }

    /// Stable cache key for the source.
    pub fn doc_id(&self) -> String {
        match self {
            Self::Arxiv { id } => id.clone(),
            Self::ScienceDirect { article_id, .. } => article_id.clone(),
            Self::Pdf { path } => pdf_doc_id(path),
        }
    }
}

/// Extract the arXiv id from an `abs`, `pdf` or `html` URL.
pub fn arxiv_id(url: &str) -> Option<String> {
    for marker in ["arxiv.org/abs/", "arxiv.org/pdf/", "arxiv.org/html/"] {
        if let Some(idx) = url.find(marker) {
            let id = url[idx + marker.len()..]
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .trim_end_matches('/')
                .trim_end_matches(".pdf");
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    None
}

/// File stem of a PDF path, e.g. `pdfs/1-s2.0-S0079-main.pdf` → `1-s2.0-S0079-main`.
pub fn pdf_doc_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Drop quoted lines (`> ...`) that readers emit for figures and banners.
pub fn strip_quoted_lines(content: &str) -> String {
    content
        .lines()
        .filter(|line| !line.starts_with('>'))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
pub trait DocumentNormalizer: Send + Sync {
    async fn to_document(&self) -> Result<Document>;
}

fn http_client() -> Client {
    Client::builder()
        .user_agent("papercast/0.1 (+https://arxiv.org/help/api)")
        .timeout(std::time::Duration::from_secs(120))
        .build()
        .unwrap_or_else(|_| Client::new())
}

async fn fetch_text(client: &Client, url: &str) -> anyhow::Result<String> {
    log::info!("Fetching {}", url);
    let res = client.get(url).send().await?;
    if !res.status().is_success() {
        return Err(anyhow::anyhow!("GET {} returned {}", url, res.status()));
    }
    Ok(res.text().await?)
}

fn meta_contents(html: &str, name: &str) -> Vec<String> {
    let pattern = format!(
        r#"<meta\s+name="{}"\s+content="([^"]*)"\s*/?>"#,
        regex::escape(name)
    );
    let re = Regex::new(&pattern).unwrap();
    re.captures_iter(html)
        .map(|c| decode_entities(c[1].trim()))
        .collect()
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Title, authors and abstract from the `citation_*` meta tags of an arXiv
/// abstract page.
pub fn parse_arxiv_meta(html: &str) -> (String, Vec<String>, String) {
    let title = meta_contents(html, "citation_title").into_iter().next().unwrap_or_default();
    let authors = meta_contents(html, "citation_author");
    let abstract_text = meta_contents(html, "citation_abstract")
        .into_iter()
        .next()
        .unwrap_or_default();
    (title, authors, abstract_text)
}

/// arXiv paper: metadata from the abstract page, body from the rendered HTML
/// version converted to markdown.
pub struct ArxivNormalizer {
    id: String,
    client: Client,
    base_url: String,
}

impl ArxivNormalizer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            client: http_client(),
            base_url: "https://arxiv.org".to_string(),
        }
    }

    pub fn pdf_url(&self) -> String {
        format!("{}/pdf/{}", self.base_url, self.id)
    }
}

#[async_trait]
impl DocumentNormalizer for ArxivNormalizer {
    async fn to_document(&self) -> Result<Document> {
        let abs_url = format!("{}/abs/{}", self.base_url, self.id);
        let abs_html = fetch_text(&self.client, &abs_url)
            .await
            .map_err(|e| PapercastError::unavailable(&self.id, e.to_string()))?;
        let (title, authors, abstract_text) = parse_arxiv_meta(&abs_html);

        let html_url = format!("{}/html/{}", self.base_url, self.id);
        let content = match fetch_text(&self.client, &html_url).await {
            Ok(html) => strip_quoted_lines(&html2md::parse_html(&html)),
            Err(e) => {
                log::warn!("No HTML rendition for {}: {}", self.id, e);
                String::new()
            }
        };
        if content.trim().is_empty() {
            return Err(PapercastError::unavailable(&self.id, "HTML rendition has no content"));
        }

        Ok(Document {
            doc_id: self.id.clone(),
            title,
            authors,
            abstract_text,
            content,
            sections: None,
        })
    }
}

/// Title and abstract from the plain-text rendering of a ScienceDirect page.
pub fn parse_sciencedirect_text(text: &str) -> (String, String) {
    let title = Regex::new(r"Title:\s*(.*)")
        .unwrap()
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_default();
    let abstract_text = Regex::new(r"(?s)Abstract\s*-*\s*(.*)")
        .unwrap()
        .captures(text)
        .map(|c| {
            c[1].split("Introduction")
                .next()
                .unwrap_or_default()
                .trim_end_matches(|ch: char| ch == '#' || ch.is_whitespace())
                .trim()
                .to_string()
        })
        .unwrap_or_default();
    (title, abstract_text)
}

/// Build a ScienceDirect document from the article page. Authors come from
/// the `citation_author` meta tags; title and abstract from the page text,
/// falling back to `citation_title` and `citation_abstract`.
pub fn sciencedirect_document(article_id: &str, html: &str) -> Result<Document> {
    let text = html2text::from_read(html.as_bytes(), 120)
        .map_err(|e| PapercastError::unavailable(article_id, e.to_string()))?;
    let content = strip_quoted_lines(&text);
    if content.trim().is_empty() {
        return Err(PapercastError::unavailable(article_id, "page has no text"));
    }

    let (mut title, mut abstract_text) = parse_sciencedirect_text(&content);
    if title.is_empty() {
        title = meta_contents(html, "citation_title").into_iter().next().unwrap_or_default();
    }
    if abstract_text.is_empty() {
        abstract_text = meta_contents(html, "citation_abstract")
            .into_iter()
            .next()
            .unwrap_or_default();
    }

    Ok(Document {
        doc_id: article_id.to_string(),
        title,
        authors: meta_contents(html, "citation_author"),
        abstract_text,
        content,
        sections: None,
    })
}

pub struct ScienceDirectNormalizer {
    url: String,
    article_id: String,
    client: Client,
}

impl ScienceDirectNormalizer {
    pub fn new(url: impl Into<String>, article_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            article_id: article_id.into(),
            client: http_client(),
        }
    }
}

#[async_trait]
impl DocumentNormalizer for ScienceDirectNormalizer {
    async fn to_document(&self) -> Result<Document> {
        let html = fetch_text(&self.client, &self.url)
            .await
            .map_err(|e| PapercastError::unavailable(&self.article_id, e.to_string()))?;
        sciencedirect_document(&self.article_id, &html)
    }
}

/// Raw text extraction from a PDF file.
#[async_trait]
pub trait PdfTextExtractor: Send + Sync {
    async fn extract_text(&self, path: &Path) -> anyhow::Result<String>;
}

/// Runs poppler's `pdftotext` on the file.
pub struct PdftotextExtractor {
    program: String,
}

impl Default for PdftotextExtractor {
    fn default() -> Self {
        Self {
            program: "pdftotext".to_string(),
        }
    }
}

#[async_trait]
impl PdfTextExtractor for PdftotextExtractor {
    async fn extract_text(&self, path: &Path) -> anyhow::Result<String> {
        let output = tokio::process::Command::new(&self.program)
            .arg("-layout")
            .arg(path)
            .arg("-")
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program))?;
        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

const PDF_READER_PROMPT: &str = "You are a helpful PDF reader bot designed to output JSON for scientific articles. \
From the following text extracted from a PDF, extract the title as \"title\", the abstract as \"abstract\", \
the authors as \"authors\" in a list, and the full text as \"full_text\", a JSON object mapping each section title \
to its text. The full text should include the introduction, methods, results and conclusion sections. \
Limit the JSON to 4096 tokens.";

#[derive(Debug, Deserialize)]
struct PdfFields {
    #[serde(default)]
    title: String,
    #[serde(default)]
    authors: AuthorField,
    #[serde(default, rename = "abstract")]
    abstract_text: String,
    #[serde(default)]
    full_text: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum AuthorField {
    List(Vec<String>),
    Line(String),
    #[default]
    Missing,
}

impl AuthorField {
    fn into_list(self) -> Vec<String> {
        match self {
            AuthorField::List(list) => list,
            AuthorField::Line(line) => line
                .split([';', ','])
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
            AuthorField::Missing => Vec::new(),
        }
    }
}

/// Structure the model's JSON answer into a document around the raw text.
pub fn document_from_pdf_json(doc_id: &str, json: &str, raw_text: String) -> Result<Document> {
    let fields: PdfFields = serde_json::from_str(json)?;
    let sections = fields
        .full_text
        .into_iter()
        .enumerate()
        .map(|(idx, (title, value))| {
            let text = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (title, Section { text, anchor_id: format!("S{}", idx + 1) })
        })
        .collect::<BTreeMap<_, _>>();
    Ok(Document {
        doc_id: doc_id.to_string(),
        title: fields.title,
        authors: fields.authors.into_list(),
        abstract_text: fields.abstract_text,
        content: raw_text,
        sections: if sections.is_empty() { None } else { Some(sections) },
    })
}

/// Local PDF: raw text from the extractor, fields and sections from one
/// JSON-mode generation call.
pub struct PdfNormalizer {
    path: PathBuf,
    extractor: Arc<dyn PdfTextExtractor>,
    generator: Arc<dyn Generator>,
}

impl PdfNormalizer {
    pub fn new(path: impl Into<PathBuf>, extractor: Arc<dyn PdfTextExtractor>, generator: Arc<dyn Generator>) -> Self {
        Self {
            path: path.into(),
            extractor,
            generator,
        }
    }
}

#[async_trait]
impl DocumentNormalizer for PdfNormalizer {
    async fn to_document(&self) -> Result<Document> {
        let doc_id = pdf_doc_id(&self.path);
        let raw_text = self
            .extractor
            .extract_text(&self.path)
            .await
            .map_err(|e| PapercastError::unavailable(&doc_id, e.to_string()))?;
        if raw_text.trim().is_empty() {
            return Err(PapercastError::unavailable(&doc_id, "PDF has no extractable text"));
        }

        let request = GenerationRequest::chat(PDF_READER_PROMPT, raw_text.clone())
            .temperature(0.1)
            .max_tokens(2048)
            .json();
        let response = self
            .generator
            .generate(&request)
            .await
            .map_err(|e| PapercastError::unavailable(&doc_id, format!("PDF field extraction failed: {}", e)))?;
        let json = extract_json_object(&response)
            .ok_or_else(|| PapercastError::unavailable(&doc_id, "PDF field extraction returned no JSON"))?;
        document_from_pdf_json(&doc_id, json, raw_text)
    }
}
