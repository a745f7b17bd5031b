//! Retrieval tools used by the interview expert
//!
//! Both tools take `{"query": "..."}` and return a JSON array of documents.
//! Web results are `{url, content}`; encyclopedia results are
//! `{source, page, content}`.

use crate::config::SearchSettings;
use crate::error::{ResearchError, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use stategraph_core::{Tool, ToolError, ToolRegistry, ToolResult};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

pub const WEB_SEARCH_TOOL: &str = "web_search";
pub const WIKIPEDIA_TOOL: &str = "wikipedia";

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

fn query_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"query": {"type": "string"}},
        "required": ["query"]
    })
}

fn query_arg(tool: &str, args: &Value) -> std::result::Result<String, ToolError> {
    args.get("query")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: tool.to_string(),
            error: "missing string field 'query'".to_string(),
        })
}

fn failed(tool: &str, error: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed {
        tool: tool.to_string(),
        error: error.to_string(),
    }
}

/// Registry with the search tools the settings allow.
///
/// Web search needs a Tavily key and is left out without one.
pub fn search_registry(settings: &SearchSettings) -> Result<ToolRegistry> {
    let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
    let mut registry = ToolRegistry::new();
    registry.register(wikipedia_tool(
        client.clone(),
        settings.wikipedia_api_url.clone(),
        settings.wikipedia_max_docs,
    ));
    match &settings.tavily_api_key {
        Some(key) => registry.register(web_search_tool(client, key.clone(), settings.web_max_results)),
        None => info!("No Tavily API key configured, web search disabled"),
    }
    Ok(registry)
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    #[serde(default)]
    content: String,
}

/// Web search through the Tavily API
pub fn web_search_tool(client: Client, api_key: String, max_results: usize) -> Tool {
    Tool::new(
        WEB_SEARCH_TOOL,
        "Search the web and return the top results with their page content",
        query_schema(),
        move |args: Value| {
            let client = client.clone();
            let api_key = api_key.clone();
            async move {
                let query = query_arg(WEB_SEARCH_TOOL, &args)?;
                debug!(%query, "Web search");
                let response = client
                    .post(TAVILY_SEARCH_URL)
                    .json(&json!({"api_key": api_key, "query": query, "max_results": max_results}))
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| failed(WEB_SEARCH_TOOL, e))?;
                let body: TavilyResponse = response.json().await.map_err(|e| failed(WEB_SEARCH_TOOL, e))?;
                Ok(Value::Array(
                    body.results
                        .into_iter()
                        .take(max_results)
                        .map(|r| json!({"url": r.url, "content": r.content}))
                        .collect(),
                ))
            }
        },
    )
}

#[derive(Debug, Deserialize)]
struct WikiResponse {
    #[serde(default)]
    query: Option<WikiQuery>,
}

#[derive(Debug, Deserialize)]
struct WikiQuery {
    #[serde(default)]
    pages: HashMap<String, WikiPage>,
}

#[derive(Debug, Deserialize)]
struct WikiPage {
    title: String,
    #[serde(default)]
    index: usize,
    #[serde(default)]
    extract: String,
    #[serde(default)]
    fullurl: Option<String>,
}

/// Encyclopedia lookup through the MediaWiki query API
pub fn wikipedia_tool(client: Client, api_url: String, max_docs: usize) -> Tool {
    Tool::new(
        WIKIPEDIA_TOOL,
        "Look up encyclopedia articles matching a query",
        query_schema(),
        move |args: Value| {
            let client = client.clone();
            let api_url = api_url.clone();
            async move {
                let query = query_arg(WIKIPEDIA_TOOL, &args)?;
                debug!(%query, "Encyclopedia search");
                let limit = max_docs.to_string();
                let response = client
                    .get(&api_url)
                    .query(&[
                        ("action", "query"),
                        ("format", "json"),
                        ("generator", "search"),
                        ("gsrsearch", query.as_str()),
                        ("gsrlimit", limit.as_str()),
                        ("prop", "extracts|info"),
                        ("inprop", "url"),
                        ("explaintext", "1"),
                        ("exlimit", "max"),
                    ])
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| failed(WIKIPEDIA_TOOL, e))?;
                let body: WikiResponse = response.json().await.map_err(|e| failed(WIKIPEDIA_TOOL, e))?;
                Ok(wiki_documents(body))
            }
        },
    )
}

fn wiki_documents(body: WikiResponse) -> Value {
    let mut pages: Vec<WikiPage> = body.query.map(|q| q.pages.into_values().collect()).unwrap_or_default();
    pages.sort_by_key(|p| p.index);
    Value::Array(
        pages
            .into_iter()
            .map(|p| {
                json!({
                    "source": p.fullurl.unwrap_or_else(|| p.title.clone()),
                    "page": "",
                    "content": p.extract,
                })
            })
            .collect(),
    )
}

fn field<'a>(doc: &'a Value, key: &str) -> &'a str {
    doc.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn documents(tool: &str, result: &Value) -> Result<Vec<Value>> {
    result
        .as_array()
        .cloned()
        .ok_or_else(|| ResearchError::Search(format!("{} returned {} instead of a document list", tool, result)))
}

/// Render web results as `<Document href=...>` blocks
pub fn format_web_documents(result: &Value) -> Result<String> {
    Ok(documents(WEB_SEARCH_TOOL, result)?
        .iter()
        .map(|doc| format!("<Document href=\"{}\"/>\n{}\n</Document>", field(doc, "url"), field(doc, "content")))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n"))
}

/// Render encyclopedia results as `<Document source=... page=...>` blocks
pub fn format_wiki_documents(result: &Value) -> Result<String> {
    Ok(documents(WIKIPEDIA_TOOL, result)?
        .iter()
        .map(|doc| {
            format!(
                "<Document source=\"{}\" page=\"{}\"/>\n{}\n</Document>",
                field(doc, "source"),
                field(doc, "page"),
                field(doc, "content")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n"))
}

/// Run a search tool by name, mapping dispatch failures into graph errors
pub async fn run_search(registry: &ToolRegistry, tool: &str, query: &str) -> stategraph_core::Result<Value> {
    let result: ToolResult = registry.call(tool, json!({"query": query})).await;
    Ok(result?)
}
