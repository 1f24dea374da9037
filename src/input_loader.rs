use calamine::{open_workbook, Reader, Xlsx};
use log::{info, warn};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::{CheckError, Result};
use crate::record::{BallotInfo, Identity, PersonRecord, VerificationResult};

pub const FIRST_NAME: &str = "FIRST_NAME";
pub const LAST_NAME: &str = "LAST_NAME";
pub const YEAR_OF_BIRTH: &str = "YEAR_OF_BIRTH";
pub const ZIP_CODE: &str = "ZIP_CODE";

pub const BIRTH_MONTH: &str = "BIRTH_MONTH";
pub const REGISTERED: &str = "REGISTERED";
pub const ABSENTEE: &str = "ABSENTEE";
pub const ELECTION_DATE: &str = "ELECTION_DATE";
pub const APPLICATION_RECEIVED: &str = "APPLICATION_RECEIVED";
pub const BALLOT_SENT: &str = "BALLOT_SENT";
pub const BALLOT_RECEIVED: &str = "BALLOT_RECEIVED";
pub const CHECKED: &str = "CHECKED";

/// Column positions of everything the checker reads or writes.
#[derive(Debug, Clone, PartialEq)]
struct Columns {
    first_name: usize,
    last_name: usize,
    year_of_birth: usize,
    zip_code: usize,
    birth_month: usize,
    registered: usize,
    absentee: usize,
    election_date: usize,
    application_received: usize,
    ballot_sent: usize,
    ballot_received: usize,
    checked: usize,
}

/// The full person table with its header row. Columns the checker does not
/// manage are carried through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordTable {
    headers: Vec<String>,
    columns: Columns,
    /// Whether the source file already had a CHECKED column.
    had_checked_column: bool,
    pub records: Vec<PersonRecord>,
}

impl RecordTable {
    /// Builds a table from a header row and raw string rows, adding any
    /// missing output columns with their defaults.
    pub fn from_rows(mut headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        for h in headers.iter_mut() {
            *h = h.trim().to_string();
        }

        let required = |headers: &[String], name: &'static str| {
            find(headers, name).ok_or(CheckError::MissingColumn(name))
        };
        let first_name = required(&headers, FIRST_NAME)?;
        let last_name = required(&headers, LAST_NAME)?;
        let year_of_birth = required(&headers, YEAR_OF_BIRTH)?;
        let zip_code = required(&headers, ZIP_CODE)?;
        let had_checked_column = find(&headers, CHECKED).is_some();

        let mut ensure = |name: &str| match find(&headers, name) {
            Some(idx) => idx,
            None => {
                headers.push(name.to_string());
                headers.len() - 1
            }
        };
        let columns = Columns {
            first_name,
            last_name,
            year_of_birth,
            zip_code,
            birth_month: ensure(BIRTH_MONTH),
            registered: ensure(REGISTERED),
            absentee: ensure(ABSENTEE),
            election_date: ensure(ELECTION_DATE),
            application_received: ensure(APPLICATION_RECEIVED),
            ballot_sent: ensure(BALLOT_SENT),
            ballot_received: ensure(BALLOT_RECEIVED),
            checked: ensure(CHECKED),
        };

        let width = headers.len();
        let records = rows
            .into_iter()
            .map(|mut cells| {
                cells.resize(width, String::new());
                parse_record(cells, &columns, had_checked_column)
            })
            .collect();

        Ok(RecordTable {
            headers,
            columns,
            had_checked_column,
            records,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Renders one record back into a full row, managed columns included.
    pub fn render_row(&self, record: &PersonRecord) -> Vec<String> {
        let c = &self.columns;
        let mut row = record.cells.clone();
        row.resize(self.headers.len(), String::new());

        let r = &record.result;
        row[c.birth_month] = r.resolved_month.to_string();
        row[c.registered] = bool_cell(r.registered);
        row[c.absentee] = bool_cell(r.absentee_requested);
        let info = r.ballot_info.as_ref();
        row[c.election_date] = info.map(|i| i.election_date.clone()).unwrap_or_default();
        row[c.application_received] = info.map(|i| i.application_received.clone()).unwrap_or_default();
        row[c.ballot_sent] = info.map(|i| i.ballot_sent.clone()).unwrap_or_default();
        row[c.ballot_received] = info.map(|i| i.ballot_received.clone()).unwrap_or_default();
        row[c.checked] = bool_cell(record.checked);
        row
    }

    /// Writes the header and the given records as CSV.
    pub fn write_csv<'a, W, I>(&self, writer: W, records: I) -> Result<()>
    where
        W: Write,
        I: IntoIterator<Item = &'a PersonRecord>,
    {
        let mut csv_writer = csv::WriterBuilder::new().from_writer(writer);
        csv_writer.write_record(&self.headers)?;
        for record in records {
            csv_writer.write_record(self.render_row(record))?;
        }
        csv_writer
            .flush()
            .map_err(|e| CheckError::io("<csv writer>", e))?;
        Ok(())
    }
}

fn find(headers: &[String], name: &str) -> Option<usize> {
    headers.iter().position(|h| h.eq_ignore_ascii_case(name))
}

fn bool_cell(b: bool) -> String {
    let text = if b { "True" } else { "False" };
    text.to_string()
}

fn parse_bool(cell: &str) -> bool {
    matches!(
        cell.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y"
    )
}

/// Accepts "6" as well as the "6.0" a spreadsheet round-trip tends to produce.
fn parse_month(cell: &str) -> u8 {
    let cell = cell.trim();
    if cell.is_empty() {
        return 0;
    }
    let value = cell
        .parse::<i64>()
        .ok()
        .or_else(|| cell.parse::<f64>().ok().map(|f| f as i64));
    match value {
        Some(m) if (1..=12).contains(&m) => m as u8,
        Some(m) if m <= 0 => 0,
        _ => {
            warn!("Ignoring invalid BIRTH_MONTH value '{}'", cell);
            0
        }
    }
}

fn parse_record(cells: Vec<String>, c: &Columns, had_checked_column: bool) -> PersonRecord {
    let cell = |idx: usize| cells[idx].trim().to_string();

    let identity = Identity {
        first_name: cell(c.first_name),
        last_name: cell(c.last_name),
        birth_year: cell(c.year_of_birth),
        zip_code: cell(c.zip_code),
    };

    let resolved_month = parse_month(&cells[c.birth_month]);
    let absentee_requested = parse_bool(&cells[c.absentee]);
    let detail = [
        cell(c.election_date),
        cell(c.application_received),
        cell(c.ballot_sent),
        cell(c.ballot_received),
    ];
    let ballot_info = if absentee_requested && detail.iter().any(|d| !d.is_empty()) {
        let [election_date, application_received, ballot_sent, ballot_received] = detail;
        Some(BallotInfo {
            election_date,
            application_received,
            ballot_sent,
            ballot_received,
        })
    } else {
        None
    };

    let checked = if had_checked_column {
        parse_bool(&cells[c.checked]) || resolved_month > 0
    } else {
        resolved_month > 0
    };

    PersonRecord {
        identity,
        result: VerificationResult {
            resolved_month,
            registered: parse_bool(&cells[c.registered]),
            absentee_requested,
            ballot_info,
        },
        checked,
        cells,
    }
}

/// Loads a person table from CSV, or from the first worksheet of an `.xlsx`.
pub fn load_table<P: AsRef<Path>>(filename: P) -> Result<RecordTable> {
    let path = filename.as_ref();
    let is_excel = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("xlsx"));

    let table = if is_excel {
        load_excel(path)?
    } else {
        load_csv(path)?
    };
    if !table.had_checked_column {
        info!("{:?} has no {} column; deriving it from {}.", path, CHECKED, BIRTH_MONTH);
    }
    Ok(table)
}

fn load_csv(path: &Path) -> Result<RecordTable> {
    let file = File::open(path).map_err(|e| CheckError::io(path, e))?;
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(file);

    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for result in rdr.records() {
        match result {
            Ok(record) => rows.push(record.iter().map(str::to_string).collect()),
            Err(e) => warn!("Skipping unreadable CSV row: {}", e),
        }
    }

    let table = RecordTable::from_rows(headers, rows)?;
    info!("Loaded {} records from CSV {:?}", table.len(), path);
    Ok(table)
}

fn load_excel(path: &Path) -> Result<RecordTable> {
    let mut excel =
        open_workbook::<Xlsx<_>, _>(path).map_err(|e| CheckError::Excel(format!("{:?}: {}", path, e)))?;

    let worksheets = excel.worksheets();
    let (_name, range) = worksheets
        .first()
        .ok_or_else(|| CheckError::Excel(format!("{:?} has no worksheets", path)))?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(|c| c.to_string()).collect::<Vec<String>>());
    let headers = rows.next().unwrap_or_default();
    let rows: Vec<Vec<String>> = rows.filter(|r| r.iter().any(|c| !c.is_empty())).collect();

    let table = RecordTable::from_rows(headers, rows)?;
    info!("Loaded {} records from Excel {:?}", table.len(), path);
    Ok(table)
}
