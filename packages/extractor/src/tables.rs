//! Table detection over extracted page text.

use std::sync::LazyLock;

use jobs_core::TableData;
use regex::Regex;

/// Cells are separated by a tab or by two or more whitespace characters.
static CELL_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\t|\s{2,}").expect("cell separator pattern is valid"));

/// Fewest consecutive rows that count as a table.
const MIN_ROWS: usize = 2;
/// Fewest cells a line needs to be a row.
const MIN_CELLS: usize = 2;

fn split_row(line: &str) -> Option<Vec<String>> {
    let cells: Vec<String> = CELL_SEPARATOR
        .split(line.trim())
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .map(String::from)
        .collect();
    (cells.len() >= MIN_CELLS).then_some(cells)
}

/// Every table found in `text`, in reading order.
///
/// A table is a run of at least two consecutive lines that each split into at
/// least two cells.
pub fn tables_from_text(text: &str) -> Vec<TableData> {
    let mut tables = Vec::new();
    let mut run: Vec<Vec<String>> = Vec::new();

    for line in text.lines() {
        match split_row(line) {
            Some(row) => run.push(row),
            None => {
                if run.len() >= MIN_ROWS {
                    tables.push(TableData::new(std::mem::take(&mut run)));
                } else {
                    run.clear();
                }
            }
        }
    }
    if run.len() >= MIN_ROWS {
        tables.push(TableData::new(run));
    }

    tables
}

/// First table across `pages`, scanned in order.
pub fn first_table<I, S>(pages: I) -> Option<TableData>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    pages
        .into_iter()
        .find_map(|page| tables_from_text(page.as_ref()).into_iter().next())
}
