// src/extractors/detail_page.rs
use once_cell::sync::Lazy;
use reqwest::Url;
use scraper::{Html, Selector};

use crate::utils::error::ParseError;

// --- CSS Selectors (Lazy Static) ---
// The filing index page lists documents in `<table class="tableFile">`; the
// first data row (second <tr>, after the header) is the primary document and
// its third cell holds the link.
static FILE_TABLE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("table.tableFile").expect("Failed to compile FILE_TABLE_SELECTOR")
});

static ROW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tr").expect("Failed to compile ROW_SELECTOR"));

static CELL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td").expect("Failed to compile CELL_SELECTOR"));

static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("Failed to compile LINK_SELECTOR"));

const PRIMARY_ROW: usize = 1;
const LINK_CELL: usize = 2;

/// Finds the primary document link on a filing index page and resolves it
/// against `document_host`.
pub fn extract_document_url(html: &str, page_url: &str, document_host: &str) -> Result<String, ParseError> {
    let missing = |what: &'static str| ParseError::MissingElement {
        url: page_url.to_string(),
        what,
    };

    let document = Html::parse_document(html);
    let table = document
        .select(&FILE_TABLE_SELECTOR)
        .next()
        .ok_or_else(|| missing("table.tableFile"))?;
    let row = table
        .select(&ROW_SELECTOR)
        .nth(PRIMARY_ROW)
        .ok_or_else(|| missing("document row"))?;
    let cell = row
        .select(&CELL_SELECTOR)
        .nth(LINK_CELL)
        .ok_or_else(|| missing("document cell"))?;
    let href = cell
        .select(&LINK_SELECTOR)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .ok_or_else(|| missing("document link"))?;

    let absolute = Url::parse(document_host)
        .and_then(|host| host.join(href))
        .map_err(|_| missing("resolvable document link"))?;
    Ok(absolute.to_string())
}
