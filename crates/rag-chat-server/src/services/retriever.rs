use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info};

use crate::services::aws::SigV4Signer;
use crate::utils::error::ChatError;

/// Kendra rejects queries longer than this many characters.
const MAX_QUERY_CHARS: usize = 999;

const RETRIEVE_TARGET: &str = "AWSKendraFrontendService.Retrieve";
const QUERY_TARGET: &str = "AWSKendraFrontendService.Query";

/// A document returned by the search index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceDocument {
    /// Text placed into the prompt context.
    pub page_content: String,
    /// Document locator (URI), used for citations.
    pub source: String,
    pub title: Option<String>,
}

impl SourceDocument {
    pub fn new(page_content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            source: source.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Search step of the chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<SourceDocument>, ChatError>;
}

/// Body shared by the `Retrieve` and `Query` calls.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SearchRequest<'a> {
    index_id: &'a str,
    query_text: &'a str,
    page_size: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RetrieveResponse {
    #[serde(default)]
    result_items: Vec<RetrieveResultItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RetrieveResultItem {
    #[serde(default)]
    document_id: Option<String>,
    #[serde(default)]
    document_title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, rename = "DocumentURI")]
    document_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryResponse {
    #[serde(default)]
    result_items: Vec<QueryResultItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryResultItem {
    #[serde(default)]
    document_id: Option<String>,
    #[serde(default)]
    document_title: Option<TextWithHighlights>,
    #[serde(default)]
    document_excerpt: Option<TextWithHighlights>,
    #[serde(default, rename = "DocumentURI")]
    document_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TextWithHighlights {
    #[serde(default)]
    text: Option<String>,
}

/// Amazon Kendra client. Uses `Retrieve` and falls back to `Query` when
/// `Retrieve` finds nothing.
pub struct KendraRetriever {
    client: Client,
    signer: SigV4Signer,
    endpoint: Url,
    index_id: String,
    top_k: usize,
}

impl KendraRetriever {
    pub fn new(
        client: Client,
        signer: SigV4Signer,
        endpoint: Option<&str>,
        index_id: impl Into<String>,
        top_k: usize,
    ) -> Result<Self, ChatError> {
        let endpoint = match endpoint {
            Some(url) => url.to_string(),
            None => format!("https://kendra.{}.amazonaws.com/", signer.region()),
        };
        let endpoint = Url::parse(&endpoint).map_err(|e| {
            ChatError::Configuration(format!("Invalid Kendra endpoint `{}`: {}", endpoint, e))
        })?;

        Ok(Self {
            client,
            signer,
            endpoint,
            index_id: index_id.into(),
            top_k: top_k.max(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, target: &str, query_text: &str) -> Result<T, ChatError> {
        let body = serde_json::to_vec(&SearchRequest {
            index_id: &self.index_id,
            query_text,
            page_size: self.top_k,
        })
        .map_err(|e| ChatError::Provider(format!("Failed to encode Kendra request: {}", e)))?;

        let response = self
            .signer
            .post(
                &self.client,
                self.endpoint.clone(),
                &[
                    ("Content-Type", "application/x-amz-json-1.1"),
                    ("X-Amz-Target", target),
                ],
                body,
            )
            .await?;

        response.json().await.map_err(|e| {
            ChatError::MalformedResult(format!("Failed to parse Kendra response: {}", e))
        })
    }
}

#[async_trait]
impl Retriever for KendraRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<SourceDocument>, ChatError> {
        let query_text: String = query.trim().chars().take(MAX_QUERY_CHARS).collect();

        info!("Retrieving from index {} (page size {})", self.index_id, self.top_k);

        let retrieved: RetrieveResponse = self.call(RETRIEVE_TARGET, &query_text).await?;
        if !retrieved.result_items.is_empty() {
            let documents: Vec<SourceDocument> = retrieved
                .result_items
                .into_iter()
                .map(into_source_document)
                .collect();
            debug!("Retrieved {} documents", documents.len());
            return Ok(documents);
        }

        debug!("Retrieve found nothing, falling back to Query");
        let queried: QueryResponse = self.call(QUERY_TARGET, &query_text).await?;
        let documents: Vec<SourceDocument> = queried
            .result_items
            .into_iter()
            .map(query_item_into_source_document)
            .collect();

        debug!("Query returned {} documents", documents.len());
        Ok(documents)
    }
}

fn into_source_document(item: RetrieveResultItem) -> SourceDocument {
    let source = item.document_uri.or(item.document_id).unwrap_or_default();
    build_document(
        item.document_title.unwrap_or_default(),
        item.content.unwrap_or_default(),
        source,
    )
}

/// `Query` excerpts arrive with layout whitespace, so it is collapsed.
fn query_item_into_source_document(item: QueryResultItem) -> SourceDocument {
    let title = item.document_title.and_then(|t| t.text).unwrap_or_default();
    let excerpt = item
        .document_excerpt
        .and_then(|e| e.text)
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();
    let source = item.document_uri.or(item.document_id).unwrap_or_default();
    build_document(title, excerpt, source)
}

fn build_document(title: String, content: String, source: String) -> SourceDocument {
    let page_content = format!(
        "Document Title: {}\nDocument Excerpt: \n{}\n",
        title, content
    );

    let document = SourceDocument::new(page_content, source);
    if title.is_empty() {
        document
    } else {
        document.with_title(title)
    }
}
