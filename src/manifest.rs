//! Manifest spreadsheet decoding and line-item normalization.

use crate::models::ManifestItem;
use calamine::{Data, Reader, open_workbook_auto_from_rs};
use std::{cmp::Ordering, collections::HashMap, io::Cursor};
use thiserror::Error;
use tracing::{debug, warn};

const UPC_HEADERS: &[&str] = &["upc"];
const NAME_HEADERS: &[&str] = &["productname", "item", "description"];
const QUANTITY_HEADERS: &[&str] = &["quantity", "qty"];
const RETAIL_HEADERS: &[&str] = &["origretail", "unitretail", "price"];

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("workbook has no sheets")]
    NoSheets,
    #[error("unreadable workbook: {0}")]
    Workbook(String),
    #[error("unreadable csv: {0}")]
    Csv(String),
    #[error("no product name or retail column among {0:?}")]
    NoItemColumns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(text) => text.trim().is_empty(),
            Cell::Number(_) => false,
        }
    }

    fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(text) => text.clone(),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Cell::Number(n) => n.to_string(),
        }
    }
}

impl From<&Data> for Cell {
    fn from(value: &Data) -> Self {
        match value {
            Data::Empty | Data::Error(_) => Cell::Empty,
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }
}

/// Header row plus data rows of the first sheet.
#[derive(Debug, Clone, Default)]
pub struct ManifestTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// Decodes and normalizes a manifest. Unreadable input yields no items.
pub fn parse(buffer: &[u8]) -> Vec<ManifestItem> {
    match read_table(buffer) {
        Ok(table) => {
            let items = items_from_table(&table);
            debug!(
                target = "tl.manifest",
                columns = ?table.headers,
                items = items.len(),
                "manifest_parsed"
            );
            items
        }
        Err(err) => {
            warn!(target = "tl.manifest", error = %err, bytes = buffer.len(), "manifest_unreadable");
            Vec::new()
        }
    }
}

/// First sheet of a workbook, or CSV text. A table without a product name or retail
/// column is not a manifest.
pub fn read_table(buffer: &[u8]) -> Result<ManifestTable, ManifestError> {
    let table = match read_workbook(buffer) {
        Ok(table) => table,
        Err(workbook_err) => match std::str::from_utf8(buffer) {
            Ok(text) => read_csv(text)?,
            Err(_) => return Err(workbook_err),
        },
    };
    let has_item_columns = table.headers.iter().any(|header| {
        let header = normalize_header(header);
        NAME_HEADERS.contains(&header.as_str()) || RETAIL_HEADERS.contains(&header.as_str())
    });
    if !has_item_columns {
        return Err(ManifestError::NoItemColumns(table.headers));
    }
    Ok(table)
}

fn read_workbook(buffer: &[u8]) -> Result<ManifestTable, ManifestError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(buffer.to_vec()))
        .map_err(|err| ManifestError::Workbook(err.to_string()))?;
    let first = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(ManifestError::NoSheets)?;
    let range = workbook
        .worksheet_range(&first)
        .map_err(|err| ManifestError::Workbook(err.to_string()))?;

    let mut rows = range.rows();
    let headers = rows
        .next()
        .map(|header| header.iter().map(|cell| Cell::from(cell).as_text()).collect())
        .unwrap_or_default();
    let rows = rows
        .map(|row| row.iter().map(Cell::from).collect())
        .collect();
    Ok(ManifestTable { headers, rows })
}

fn read_csv(text: &str) -> Result<ManifestTable, ManifestError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|err| ManifestError::Csv(err.to_string()))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| ManifestError::Csv(err.to_string()))?;
        rows.push(
            record
                .iter()
                .map(|value| {
                    if value.is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(value.to_string())
                    }
                })
                .collect(),
        );
    }
    Ok(ManifestTable { headers, rows })
}

/// `"Orig. Retail"` and `"orig_retail"` both become `"origretail"`.
fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn items_from_table(table: &ManifestTable) -> Vec<ManifestItem> {
    let mut columns: HashMap<String, usize> = HashMap::new();
    for (index, header) in table.headers.iter().enumerate() {
        columns.entry(normalize_header(header)).or_insert(index);
    }

    let lookup = |row: &[Cell], aliases: &[&str]| -> Option<Cell> {
        aliases.iter().find_map(|alias| {
            let cell = row.get(*columns.get(*alias)?)?;
            (!cell.is_blank()).then(|| cell.clone())
        })
    };

    let mut items: Vec<ManifestItem> = table
        .rows
        .iter()
        .filter(|row| row.iter().any(|cell| !cell.is_blank()))
        .map(|row| ManifestItem {
            upc: lookup(row, UPC_HEADERS)
                .map(|cell| cell.as_text().trim().to_string())
                .unwrap_or_default(),
            product_name: lookup(row, NAME_HEADERS)
                .map(|cell| cell.as_text().trim().to_string())
                .unwrap_or_default(),
            quantity: lookup(row, QUANTITY_HEADERS)
                .and_then(|cell| parse_quantity(&cell))
                .unwrap_or(1),
            unit_retail: lookup(row, RETAIL_HEADERS)
                .and_then(|cell| parse_retail(&cell))
                .unwrap_or(0.0),
        })
        .collect();

    sort_items(&mut items);
    items
}

fn parse_quantity(cell: &Cell) -> Option<u32> {
    match cell {
        Cell::Number(n) if *n >= 0.0 => Some(n.trunc() as u32),
        Cell::Number(_) | Cell::Empty => None,
        Cell::Text(text) => {
            let digits: String = text
                .trim()
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        }
    }
}

fn parse_retail(cell: &Cell) -> Option<f64> {
    let value = match cell {
        Cell::Number(n) => *n,
        Cell::Empty => return None,
        Cell::Text(text) => text
            .replace(['$', ','], "")
            .trim()
            .parse::<f64>()
            .ok()?,
    };
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Highest unit retail first; equal prices ordered by name, case-insensitively.
pub fn sort_items(items: &mut [ManifestItem]) {
    items.sort_by(|a, b| {
        b.unit_retail
            .partial_cmp(&a.unit_retail)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                a.product_name
                    .to_uppercase()
                    .cmp(&b.product_name.to_uppercase())
            })
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MANIFEST_CSV;
    use rust_xlsxwriter::Workbook;

    fn text(value: &str) -> Cell {
        Cell::Text(value.to_string())
    }

    fn table(headers: &[&str], rows: Vec<Vec<Cell>>) -> ManifestTable {
        ManifestTable {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn sorts_by_retail_then_name() {
        let table = table(
            &["Product Name", "Unit Retail"],
            vec![
                vec![text("B"), Cell::Number(5.0)],
                vec![text("A"), Cell::Number(10.0)],
                vec![text("C"), Cell::Number(10.0)],
            ],
        );
        let order: Vec<(f64, String)> = items_from_table(&table)
            .into_iter()
            .map(|item| (item.unit_retail, item.product_name))
            .collect();
        assert_eq!(
            order,
            vec![
                (10.0, "A".to_string()),
                (10.0, "C".to_string()),
                (5.0, "B".to_string())
            ]
        );
    }

    #[test]
    fn name_tiebreak_ignores_case() {
        let table = table(
            &["Item", "Price"],
            vec![
                vec![text("banana"), text("$3.00")],
                vec![text("Apple"), text("$3.00")],
                vec![text("cherry"), text("$3.00")],
            ],
        );
        let names: Vec<String> = items_from_table(&table)
            .into_iter()
            .map(|item| item.product_name)
            .collect();
        assert_eq!(names, vec!["Apple", "banana", "cherry"]);
    }

    #[test]
    fn header_aliases_and_defaults() {
        let table = table(
            &["upc", "Description", "Qty", "Orig. Retail", "Ext. Retail"],
            vec![
                vec![
                    Cell::Number(600603123456.0),
                    text(" Wireless Mouse "),
                    text("abc"),
                    text("$1,299.99"),
                    text("$2,599.98"),
                ],
                vec![text("0001"), text("Cable"), Cell::Empty, Cell::Empty, Cell::Empty],
                vec![text("0002"), text("Hub"), Cell::Number(4.0), text("n/a"), Cell::Empty],
            ],
        );
        let items = items_from_table(&table);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].upc, "600603123456");
        assert_eq!(items[0].product_name, "Wireless Mouse");
        assert_eq!(items[0].quantity, 1);
        assert_eq!(items[0].unit_retail, 1299.99);
        let hub = items.iter().find(|i| i.product_name == "Hub").unwrap();
        assert_eq!(hub.quantity, 4);
        assert_eq!(hub.unit_retail, 0.0);
        let cable = items.iter().find(|i| i.product_name == "Cable").unwrap();
        assert_eq!(cable.quantity, 1);
        assert_eq!(cable.upc, "0001");
    }

    #[test]
    fn first_non_blank_alias_wins() {
        let table = table(
            &["Product Name", "Item", "Quantity", "Unit Retail"],
            vec![vec![Cell::Empty, text("Fallback Name"), text("2 units"), text("-5")]],
        );
        let items = items_from_table(&table);
        assert_eq!(items[0].product_name, "Fallback Name");
        assert_eq!(items[0].quantity, 2);
        assert_eq!(items[0].unit_retail, 0.0);
    }

    #[test]
    fn blank_rows_are_skipped() {
        let table = table(
            &["Item", "Price"],
            vec![vec![Cell::Empty, text("  ")], vec![text("Lamp"), text("12")]],
        );
        assert_eq!(items_from_table(&table).len(), 1);
    }

    #[test]
    fn parses_csv_buffers() {
        let items = parse(MANIFEST_CSV.as_bytes());
        let names: Vec<&str> = items.iter().map(|i| i.product_name.as_str()).collect();
        assert_eq!(names, vec!["Soundbar", "HDMI Cable", "hdmi switch", "Remote"]);
        assert_eq!(items[0].quantity, 1);
        assert_eq!(items[0].unit_retail, 1299.99);
        assert_eq!(items[1].quantity, 3);
    }

    #[test]
    fn html_error_page_is_not_a_manifest() {
        let page = b"<!doctype html>\n<html>\n<head><title>Sign in</title></head>\n<body>\n\
            <p>Please log in</p>\n<a href=\"/login\">Login</a>\n</body>\n</html>\n";
        assert!(parse(page).is_empty());
        assert!(read_table(page).is_err());
    }

    #[test]
    fn csv_without_item_columns_is_rejected() {
        assert!(parse(b"Lot,Pallets\nA,2\nB,3\n").is_empty());
    }

    #[test]
    fn parses_xlsx_workbooks() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, header) in ["UPC", "Item", "Qty", "Orig. Retail"].into_iter().enumerate() {
            sheet.write_string(0, col as u16, header).unwrap();
        }
        sheet.write_number(1, 0, 600603123456.0).unwrap();
        sheet.write_string(1, 1, "Wireless Mouse").unwrap();
        sheet.write_number(1, 2, 2.0).unwrap();
        sheet.write_number(1, 3, 19.99).unwrap();
        sheet.write_string(2, 0, "0042").unwrap();
        sheet.write_string(2, 1, "cable").unwrap();
        sheet.write_string(2, 2, "3").unwrap();
        sheet.write_string(2, 3, "$5.00").unwrap();
        sheet.write_number(3, 0, 77.0).unwrap();
        sheet.write_string(3, 1, "Adapter").unwrap();
        sheet.write_number(3, 3, 19.99).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let items = parse(&bytes);
        let names: Vec<&str> = items.iter().map(|i| i.product_name.as_str()).collect();
        assert_eq!(names, vec!["Adapter", "Wireless Mouse", "cable"]);
        assert_eq!(items[0].upc, "77");
        assert_eq!(items[0].quantity, 1);
        assert_eq!(items[1].upc, "600603123456");
        assert_eq!(items[1].quantity, 2);
        assert_eq!(items[1].unit_retail, 19.99);
        assert_eq!(items[2].upc, "0042");
        assert_eq!(items[2].quantity, 3);
        assert_eq!(items[2].unit_retail, 5.0);
    }

    #[test]
    fn unreadable_buffer_degrades_to_empty() {
        assert!(parse(&[0xff, 0xfe, 0x00, 0x9c, 0x80]).is_empty());
        assert!(parse(b"").is_empty());
    }
}
