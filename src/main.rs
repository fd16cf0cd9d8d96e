//! scrapeflow CLI - browser-backed search and content extraction.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use scrapeflow::cdp::{LocalBrowserPool, LocalPoolConfig};
use scrapeflow::ops::content::{ContentParams, ExtractJsonParams};
use scrapeflow::ops::markdown::MarkdownParams;
use scrapeflow::ops::pdf::{PdfParams, PdfPayload};
use scrapeflow::ops::screenshot::ScreenshotParams;
use scrapeflow::ops::OperationOutcome;
use scrapeflow::storage::{MemoryMetadataStore, MemoryObjectStore};
use scrapeflow::{ImageFormat, ScrapeService};

/// scrapeflow - browser-backed search and content extraction CLI
#[derive(Parser)]
#[command(name = "scrapeflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the Chrome/Chromium executable
    #[arg(long, global = true)]
    chrome: Option<String>,

    /// Proxy URL (e.g., http://127.0.0.1:8080)
    #[arg(long, global = true)]
    proxy: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Search across engines with tiered fallback
    Search(SearchArgs),

    /// Extract a page as cleaned Markdown
    Markdown(UrlArgs),

    /// Capture a screenshot
    Screenshot(ScreenshotArgs),

    /// Render a page to PDF
    Pdf(PdfArgs),

    /// List all http(s) links on a page
    Links(UrlArgs),

    /// Extract a JSON object via field=selector mappings
    Json(JsonArgs),

    /// List available search engines
    Engines,
}

#[derive(Parser)]
struct SearchArgs {
    /// Search query
    query: String,

    /// Maximum number of results
    #[arg(short, long, default_value = "10")]
    limit: usize,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,
}

#[derive(Parser)]
struct UrlArgs {
    /// Page URL
    url: String,

    /// Settle delay after load, in milliseconds
    #[arg(short, long)]
    wait: Option<u64>,
}

#[derive(Parser)]
struct ScreenshotArgs {
    /// Page URL
    url: String,

    /// Image format
    #[arg(short, long, default_value = "png")]
    format: CliImageFormat,

    /// Capture the full scrollable page
    #[arg(long)]
    full_page: bool,

    /// Output file; base64 is printed to stdout when omitted
    #[arg(short, long)]
    output: Option<String>,
}

#[derive(Parser)]
struct PdfArgs {
    /// Page URL
    url: String,

    /// Landscape orientation
    #[arg(long)]
    landscape: bool,

    /// Output file
    #[arg(short, long, default_value = "page.pdf")]
    output: String,
}

#[derive(Parser)]
struct JsonArgs {
    /// Page URL
    url: String,

    /// Field mappings, e.g. -m title=h1 -m price=.price
    #[arg(short = 'm', long = "map", value_parser = parse_field_mapping)]
    mappings: Vec<(String, String)>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliImageFormat {
    Png,
    Jpeg,
    Webp,
}

impl From<CliImageFormat> for ImageFormat {
    fn from(format: CliImageFormat) -> Self {
        match format {
            CliImageFormat::Png => ImageFormat::Png,
            CliImageFormat::Jpeg => ImageFormat::Jpeg,
            CliImageFormat::Webp => ImageFormat::Webp,
        }
    }
}

fn parse_field_mapping(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(field, selector)| (field.to_string(), selector.to_string()))
        .ok_or_else(|| format!("expected field=selector, got '{}'", s))
}

/// Truncation counts characters, not bytes; snippets carry multi-byte
/// punctuation and slicing at a byte index can split a codepoint.
fn truncate_snippet(snippet: &str, max_chars: usize) -> String {
    if snippet.chars().count() <= max_chars {
        return snippet.to_string();
    }
    let truncated: String = snippet.chars().take(max_chars).collect();
    format!("{}...", truncated)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let service = build_service(&cli);

    match cli.command {
        Commands::Search(args) => run_search(&service, args).await,
        Commands::Markdown(args) => run_markdown(&service, args).await,
        Commands::Screenshot(args) => run_screenshot(&service, args).await,
        Commands::Pdf(args) => run_pdf(&service, args).await,
        Commands::Links(args) => run_links(&service, args).await,
        Commands::Json(args) => run_json(&service, args).await,
        Commands::Engines => list_engines(),
    }
}

fn build_service(cli: &Cli) -> ScrapeService {
    let pool = Arc::new(LocalBrowserPool::new(LocalPoolConfig {
        chrome_path: cli.chrome.clone(),
        proxy_url: cli.proxy.clone(),
        ..LocalPoolConfig::default()
    }));
    ScrapeService::new(
        pool,
        Arc::new(MemoryObjectStore::new()),
        Arc::new(MemoryMetadataStore::new()),
    )
    .with_spawner(tokio::runtime::Handle::current())
}

fn list_engines() -> Result<()> {
    println!("Available search engines:\n");
    println!("  Fast tier (always queried):");
    println!("    duckduckgo - DuckDuckGo HTML endpoint");
    println!("    startpage  - Startpage web search");
    println!();
    println!("  Fallback tier (queried when the fast tier comes up short):");
    println!("    bing       - Bing web search");
    println!();
    println!("Usage: scrapeflow search \"query\" -l 10");
    Ok(())
}

fn unwrap_outcome<T>(outcome: OperationOutcome<T>) -> Result<T> {
    if let Some(data) = outcome.data {
        return Ok(data);
    }
    let message = outcome
        .error
        .map(|e| e.message)
        .unwrap_or_else(|| "operation failed".to_string());
    anyhow::bail!(message)
}

async fn run_search(service: &ScrapeService, args: SearchArgs) -> Result<()> {
    let response = unwrap_outcome(service.search(&args.query, args.limit).await)?;

    match args.format {
        OutputFormat::Text => {
            println!(
                "\nSearch results for \"{}\" ({} results):\n",
                args.query,
                response.results.len()
            );
            for (i, result) in response.results.iter().enumerate() {
                println!("{}. {}", i + 1, result.title);
                println!("   URL: {}", result.url);
                if !result.snippet.is_empty() {
                    println!("   {}", truncate_snippet(&result.snippet, 150));
                }
                println!("   Source: {}", result.source);
                println!();
            }
            for status in &response.debug.engines {
                println!(
                    "engine {}: {:?} ({} results, {}ms)",
                    status.engine, status.state, status.results, status.duration_ms
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}

async fn run_markdown(service: &ScrapeService, args: UrlArgs) -> Result<()> {
    let result = unwrap_outcome(
        service
            .extract_markdown(MarkdownParams {
                url: args.url,
                wait_after_load_ms: args.wait,
            })
            .await,
    )?;
    if let Some(title) = &result.title {
        eprintln!("# {} ({} words)\n", title, result.word_count);
    }
    println!("{}", result.markdown);
    Ok(())
}

async fn run_screenshot(service: &ScrapeService, args: ScreenshotArgs) -> Result<()> {
    let stored = unwrap_outcome(
        service
            .screenshot(ScreenshotParams {
                url: args.url,
                format: args.format.into(),
                full_page: args.full_page,
                quality: None,
                viewport: None,
                wait_after_load_ms: None,
            })
            .await,
    )?;

    match args.output {
        Some(path) => {
            use base64::engine::general_purpose::STANDARD;
            use base64::Engine as _;
            let bytes = STANDARD.decode(&stored.screenshot.data)?;
            std::fs::write(&path, bytes)?;
            eprintln!(
                "wrote {} ({} bytes, artifact {})",
                path, stored.screenshot.size, stored.record.id
            );
        }
        None => println!("{}", stored.screenshot.data),
    }
    Ok(())
}

async fn run_pdf(service: &ScrapeService, args: PdfArgs) -> Result<()> {
    let stored = unwrap_outcome(
        service
            .generate_pdf(PdfParams {
                url: args.url,
                landscape: args.landscape,
                base64: false,
                wait_after_load_ms: None,
            })
            .await,
    )?;

    let PdfPayload::Binary(bytes) = &stored.pdf.payload else {
        anyhow::bail!("expected binary pdf payload");
    };
    std::fs::write(&args.output, bytes)?;
    eprintln!(
        "wrote {} ({} bytes, artifact {})",
        args.output, stored.pdf.metadata.size, stored.record.id
    );
    Ok(())
}

async fn run_links(service: &ScrapeService, args: UrlArgs) -> Result<()> {
    let links = unwrap_outcome(
        service
            .extract_links(ContentParams {
                url: args.url,
                wait_after_load_ms: args.wait,
            })
            .await,
    )?;
    for link in links {
        println!("{}\t{}", link.href, link.text);
    }
    Ok(())
}

async fn run_json(service: &ScrapeService, args: JsonArgs) -> Result<()> {
    let fields: BTreeMap<String, String> = args.mappings.into_iter().collect();
    let value = unwrap_outcome(
        service
            .extract_json(ExtractJsonParams {
                url: args.url,
                fields,
                wait_after_load_ms: None,
            })
            .await,
    )?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_snippet_passes_short_text_through() {
        assert_eq!(truncate_snippet("short snippet", 150), "short snippet");
    }

    #[test]
    fn test_truncate_snippet_counts_chars_not_bytes() {
        // 100 chars but 200 bytes; a byte cutoff would land mid-codepoint.
        let snippet = "é".repeat(100);
        assert_eq!(truncate_snippet(&snippet, 150), snippet);

        let truncated = truncate_snippet(&snippet, 75);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), 78);
        assert!(truncated.starts_with(&"é".repeat(75)));
    }
}
