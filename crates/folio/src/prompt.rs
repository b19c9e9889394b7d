//! Report prompt construction.
//!
//! There is exactly one prompt builder, [`report_prompt`], called from
//! wherever the request is actually issued. Keeping a single source
//! prevents the request path and any preview path from drifting apart.

use crate::books::BookSummary;

/// What the report should be about: the raw user query, optionally
/// enriched with catalog metadata from a search hit.
#[derive(Debug, Clone)]
pub struct ReportSubject {
    pub query: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
}

impl ReportSubject {
    /// A subject from a bare search query, with no catalog metadata.
    pub fn from_query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            title: None,
            author: None,
            isbn: None,
        }
    }

    /// A subject enriched with a catalog search hit.
    pub fn from_summary(query: impl Into<String>, book: &BookSummary) -> Self {
        Self {
            query: query.into(),
            title: Some(book.title.clone()),
            author: book.authors.first().cloned(),
            isbn: if book.isbn.is_empty() {
                None
            } else {
                Some(book.isbn.clone())
            },
        }
    }

    /// The display name used to pin the model to the right book.
    fn designation(&self) -> String {
        match (&self.title, &self.author) {
            (Some(title), Some(author)) => {
                let isbn = self
                    .isbn
                    .as_deref()
                    .map(|i| format!(" (ISBN: {i})"))
                    .unwrap_or_default();
                format!("\"{title}\" by {author}{isbn}")
            }
            _ => format!("\"{}\"", self.query),
        }
    }
}

/// Build the full report prompt for a subject.
pub fn report_prompt(subject: &ReportSubject) -> String {
    let designation = subject.designation();
    format!(
        "I love the book {designation} and want to understand it more deeply. \
Drawing on published scholarly sources, write an in-depth interpretive report \
of roughly 5,000 words (no fewer than 3,000), output in full in a single \
response without pausing or asking whether to continue.

**Make certain the book you analyze is {designation}, not any other work with \
a similar title or theme.**

The report must contain these sections:

1. About the Author
2. Chapter Overview
3. Core Themes
4. Principal Characters
5. Historical Resonance
6. Notable Passages
7. Closing Remarks

- About the Author: ~200 words. May cover the author's life, motivation for \
writing, and the meaning of the title.
- Chapter Overview: ~2,000 words.
- Core Themes: ~1,000 words.
- Principal Characters: ~300 words. Introduce the characters and their \
relationships; present the relationships as a table.
- Historical Resonance: ~1,000 words. The work's social backdrop, its place \
in literary history, and its influence on later readers and writers.
- Notable Passages: ~400 words. Select the three most representative \
passages and discuss each.
- Closing Remarks: ~200 words.
- Each section may vary somewhat, but keep the whole report between 3,000 \
and 6,000 words.

**Rules:**
- Mark each section with its own Markdown level-2 heading, e.g. \
\"## 1. About the Author\".
- Keep each section close to its word budget.
- Everything must be accurate and of scholarly value; never fabricate.
- If you cannot find reliable information about {designation}, do not \
improvise from thin material — reply exactly: \"Sorry, I haven't read this \
book yet...\" and nothing else.
- The analysis should be professional and substantial, aimed at readers \
already somewhat familiar with the work.
- Output everything in one response, close to 5,000 words in total.
- Stay strictly on the named book throughout."
    )
}
