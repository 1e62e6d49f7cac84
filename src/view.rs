use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::cell::CellValue;
use crate::dataset::{ColumnKind, Row, TabularDataset};

/// Rows shown per page.
pub const PAGE_SIZE: usize = 30;

/// Filter, search and page parameters for one table view.
///
/// Setting a filter or search term resets the page to 1. An empty value
/// removes the constraint for that column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ViewQuery {
    filters: BTreeMap<String, String>,
    search_terms: BTreeMap<String, String>,
    page: usize,
}

impl Default for ViewQuery {
    fn default() -> Self {
        ViewQuery {
            filters: BTreeMap::new(),
            search_terms: BTreeMap::new(),
            page: 1,
        }
    }
}

impl ViewQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact-match constraint on `column`.
    pub fn set_filter(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        let column = column.into();
        if value.is_empty() {
            self.filters.remove(&column);
        } else {
            self.filters.insert(column, value);
        }
        self.page = 1;
    }

    /// Case-insensitive substring constraint on `column`.
    pub fn set_search(&mut self, column: impl Into<String>, term: impl Into<String>) {
        let term = term.into();
        let column = column.into();
        if term.is_empty() {
            self.search_terms.remove(&column);
        } else {
            self.search_terms.insert(column, term);
        }
        self.page = 1;
    }

    pub fn with_filter(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_filter(column, value);
        self
    }

    pub fn with_search(mut self, column: impl Into<String>, term: impl Into<String>) -> Self {
        self.set_search(column, term);
        self
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    /// Requested page; it is clamped when the query is evaluated.
    pub fn set_page(&mut self, page: usize) {
        self.page = page;
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn filters(&self) -> &BTreeMap<String, String> {
        &self.filters
    }

    pub fn search_terms(&self) -> &BTreeMap<String, String> {
        &self.search_terms
    }

    /// Drop every filter and search term and go back to page 1.
    pub fn reset(&mut self) {
        self.filters.clear();
        self.search_terms.clear();
        self.page = 1;
    }

    pub fn is_unconstrained(&self) -> bool {
        self.filters.is_empty() && self.search_terms.is_empty()
    }

    /// Every row that satisfies all filters and all search terms, in dataset order.
    pub fn matching<'a>(&self, dataset: &'a TabularDataset) -> Vec<&'a Row> {
        let compiled = CompiledQuery::new(self);
        let matches: Vec<&Row> = dataset
            .rows()
            .iter()
            .filter(|row| compiled.accepts(row))
            .collect();
        debug!(
            "query matched {} of {} rows ({} filters, {} search terms)",
            matches.len(),
            dataset.len(),
            self.filters.len(),
            self.search_terms.len()
        );
        matches
    }

    /// Evaluate the query and slice out the requested page.
    pub fn evaluate<'a>(&self, dataset: &'a TabularDataset) -> ViewPage<'a> {
        paginate(self.matching(dataset), self.page)
    }
}

/// Filter values parsed once per evaluation rather than once per row.
struct CompiledQuery<'q> {
    filters: Vec<(&'q str, &'q str, Option<f64>)>,
    search_terms: Vec<(&'q str, String)>,
}

impl<'q> CompiledQuery<'q> {
    fn new(query: &'q ViewQuery) -> Self {
        CompiledQuery {
            filters: query
                .filters
                .iter()
                .map(|(c, v)| (c.as_str(), v.as_str(), parse_number(v)))
                .collect(),
            search_terms: query
                .search_terms
                .iter()
                .map(|(c, t)| (c.as_str(), t.to_lowercase()))
                .collect(),
        }
    }

    fn accepts(&self, row: &Row) -> bool {
        let filters_pass = self.filters.iter().all(|(column, wanted, wanted_number)| {
            match row.get(column) {
                Some(CellValue::Number(n)) => *wanted_number == Some(*n),
                Some(value) => value.to_string() == *wanted,
                None => false,
            }
        });

        filters_pass
            && self.search_terms.iter().all(|(column, needle)| {
                row.get(column)
                    .map(|value| value.to_string().to_lowercase().contains(needle.as_str()))
                    .unwrap_or(false)
            })
    }
}

/// Numeric reading of a filter value. Surrounding whitespace is ignored and
/// blank or non-numeric input never equals a number.
fn parse_number(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// One page of a filtered view.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ViewPage<'a> {
    pub rows: Vec<&'a Row>,
    /// Clamped page actually returned.
    pub page: usize,
    pub total_pages: usize,
    pub match_count: usize,
}

pub fn total_pages(match_count: usize) -> usize {
    match_count.div_ceil(PAGE_SIZE).max(1)
}

/// Slice `[(page-1)*PAGE_SIZE, page*PAGE_SIZE)` out of `matches`, clamping
/// `page` to `[1, total_pages]`.
pub fn paginate<'a>(matches: Vec<&'a Row>, page: usize) -> ViewPage<'a> {
    let match_count = matches.len();
    let total_pages = total_pages(match_count);
    let page = page.clamp(1, total_pages);
    let start = (page - 1) * PAGE_SIZE;
    let rows = matches.into_iter().skip(start).take(PAGE_SIZE).collect();
    ViewPage {
        rows,
        page,
        total_pages,
        match_count,
    }
}

/// Distinct present values of `column`, for building a filter option list.
///
/// Sorted numerically when the column is entirely numeric, otherwise by
/// string form.
pub fn column_domain(dataset: &TabularDataset, column: &str) -> Vec<CellValue> {
    let numeric = dataset.column_kind(column) == ColumnKind::Numeric;
    let mut values: Vec<CellValue> = dataset
        .rows()
        .iter()
        .filter_map(|row| row.get(column).cloned())
        .collect();
    values.sort_by(|a, b| a.domain_cmp(b, numeric));
    values.dedup();
    values
}
