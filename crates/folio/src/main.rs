//! Search for a book and stream a long-form analysis report to the
//! terminal.
//!
//! Reads its backend token from the `FOLIO_API_KEY` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # Look up a book in the catalog
//! folio search "The Remains of the Day"
//!
//! # Stream a report, enriching the prompt with catalog metadata
//! folio report "The Remains of the Day" --lookup
//!
//! # Pin the subject manually and save the report to a file
//! folio report "beloved" --title "Beloved" --author "Toni Morrison" --output beloved.md
//!
//! # Check backend health
//! folio status
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::warn;

use folio::books::BookSearchClient;
use folio::config::AppConfig;
use folio::net::{BackoffPolicy, RequestTracker, ResilientClient, StreamEvent};
use folio::prompt::ReportSubject;
use folio::report::start_report;
use folio::{ApiClient, net::RequestOptions};

/// Stream AI-generated book analysis reports.
#[derive(Parser)]
#[command(name = "folio")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search the book catalog
    Search {
        /// Title, author, or free-text query
        query: String,

        /// Maximum number of results
        #[arg(long, default_value_t = 8)]
        max_results: u32,
    },

    /// Generate and stream an analysis report
    Report {
        /// The book to analyze
        query: String,

        /// Pin the exact title (otherwise the query is used as-is)
        #[arg(long)]
        title: Option<String>,

        /// Pin the author
        #[arg(long)]
        author: Option<String>,

        /// Pin the ISBN
        #[arg(long)]
        isbn: Option<String>,

        /// Enrich the prompt with the top catalog search hit
        #[arg(long)]
        lookup: bool,

        /// Also write the finished report to this file
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Query backend health and print the status JSON
    Status,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("folio=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = AppConfig::from_env()?;

    match cli.command {
        Command::Search { query, max_results } => {
            let books = BookSearchClient::new(&config)
                .map_err(|e| e.to_string())?
                .search(&query, max_results)
                .await
                .map_err(|e| e.to_string())?;
            if books.is_empty() {
                println!("no results for {query:?}");
                return Ok(());
            }
            for book in books {
                let authors = book.authors.join(", ");
                println!("{} — {} ({})", book.title, authors, book.published_date);
                if !book.isbn.is_empty() {
                    println!("  ISBN {}", book.isbn);
                }
                if !book.description.is_empty() {
                    println!("  {}", book.description);
                }
            }
            Ok(())
        }

        Command::Report {
            query,
            title,
            author,
            isbn,
            lookup,
            output,
        } => {
            let mut subject = ReportSubject::from_query(&query);
            subject.title = title;
            subject.author = author;
            subject.isbn = isbn;

            if lookup && subject.title.is_none() {
                // Search failures degrade to the bare query; they should
                // not block report generation.
                match BookSearchClient::new(&config) {
                    Ok(client) => match client.search(&query, 1).await {
                        Ok(books) => {
                            if let Some(book) = books.first() {
                                subject = ReportSubject::from_summary(&query, book);
                            }
                        }
                        Err(e) => warn!("catalog lookup failed: {e}"),
                    },
                    Err(e) => warn!("catalog client unavailable: {e}"),
                }
            }

            stream_report(&config, subject, output).await
        }

        Command::Status => {
            let api = ApiClient::new(&config);
            let (url, options) = api.status_request();
            let body = simple_get(&url, options).await?;
            println!("{body}");
            Ok(())
        }
    }
}

/// Drive a report stream to completion, echoing deltas as they arrive.
async fn stream_report(
    config: &AppConfig,
    subject: ReportSubject,
    output: Option<PathBuf>,
) -> Result<(), String> {
    let tracker = RequestTracker::new();
    let sweeper = tracker.spawn_sweeper();
    let client =
        ResilientClient::new(tracker, BackoffPolicy::default()).map_err(|e| e.to_string())?;
    let api = ApiClient::new(config);

    let mut stream = start_report(client, api, subject).map_err(|e| e.to_string())?;

    let mut report = String::new();
    let mut outcome = Ok(());
    let mut stdout = std::io::stdout();
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Delta(text) => {
                print!("{text}");
                let _ = stdout.flush();
                report.push_str(&text);
            }
            StreamEvent::Done => {
                println!();
                break;
            }
            StreamEvent::Error(message) => {
                outcome = Err(message);
                break;
            }
        }
    }
    sweeper.abort();

    if let Some(path) = output
        && !report.is_empty()
    {
        std::fs::write(&path, &report)
            .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
        eprintln!("saved to {}", path.display());
    }
    outcome
}

/// One-shot resilient GET returning the response body.
async fn simple_get(url: &str, options: RequestOptions) -> Result<String, String> {
    let client = ResilientClient::new(RequestTracker::new(), BackoffPolicy::default())
        .map_err(|e| e.to_string())?;
    let response = client
        .fetch_with_retry(url, options, None)
        .await
        .map_err(|e| e.to_string())?;
    response
        .text()
        .await
        .map_err(|e| format!("failed to read response: {e}"))
}
