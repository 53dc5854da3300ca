//! Server-side Cursor Reader
//!
//! Streams the result of a query into a [`RowFormatter`] in bounded chunks so
//! a table of any size is dumped with constant memory:
//!
//! ```text
//! BEGIN
//! DECLARE ferry_cursor NO SCROLL CURSOR FOR <query>
//! FETCH <n> FROM ferry_cursor   -- until a short or empty chunk
//! CLOSE ferry_cursor
//! COMMIT
//! ```
//!
//! The transaction is closed on every exit path: if reading fails part way,
//! dropping the guard issues `ROLLBACK`.

use crate::driver::Driver;
use crate::error::Result;
use crate::format::{FormatMetadata, RowFormatter};

const CURSOR_NAME: &str = "ferry_cursor";

/// Bytes a single fetch should carry
const TARGET_FETCH_BYTES: u64 = 4 * 1024 * 1024;

/// Fetch size used when nothing is known about the table
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Rows per fetch for an estimated row width, clamped to `100..=10000`
#[must_use]
pub fn chunk_size_for_width(row_width: Option<u64>) -> usize {
    match row_width {
        Some(width) if width > 0 => (TARGET_FETCH_BYTES / width).clamp(100, 10_000) as usize,
        _ => DEFAULT_CHUNK_SIZE,
    }
}

/// Open transaction; rolled back on drop unless committed
struct Transaction<'a> {
    driver: &'a mut dyn Driver,
    open: bool,
}

impl<'a> Transaction<'a> {
    fn begin(driver: &'a mut dyn Driver) -> Result<Self> {
        driver.execute("BEGIN")?;
        Ok(Self { driver, open: true })
    }

    fn commit(mut self) -> Result<()> {
        self.open = false;
        self.driver.execute("COMMIT")
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.driver.execute("ROLLBACK") {
                tracing::warn!(error = %e, "rollback after failed cursor read");
            }
        }
    }
}

/// Reads one query through a server-side cursor
pub struct CursorReader<'d> {
    driver: &'d mut dyn Driver,
    sql: String,
    chunk_size: usize,
}

impl<'d> CursorReader<'d> {
    pub fn new(driver: &'d mut dyn Driver, sql: impl Into<String>) -> Self {
        Self { driver, sql: sql.into(), chunk_size: DEFAULT_CHUNK_SIZE }
    }

    /// Rows per `FETCH`; zero keeps the current size
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        if chunk_size > 0 {
            self.chunk_size = chunk_size;
        }
        self
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Stream every row into `formatter`; returns the number of rows read
    pub fn read_into(&mut self, formatter: &mut dyn RowFormatter, meta: &FormatMetadata) -> Result<u64> {
        let fields = self.driver.describe(&self.sql)?;
        let chunk = self.chunk_size;

        let mut tx = Transaction::begin(&mut *self.driver)?;
        tx.driver.execute(&format!("DECLARE {CURSOR_NAME} NO SCROLL CURSOR FOR {}", self.sql))?;

        formatter.write_header(&fields, meta)?;
        let total = match fetch_all(&mut *tx.driver, formatter, chunk) {
            Ok(total) => total,
            Err(e) => {
                // the header is out: close the block so the script stays parseable
                formatter.write_footer()?;
                return Err(e);
            }
        };
        formatter.write_footer()?;

        tx.driver.execute(&format!("CLOSE {CURSOR_NAME}"))?;
        tx.commit()?;

        tracing::debug!(rows = total, chunk, "cursor read complete");
        Ok(total)
    }
}

fn fetch_all(driver: &mut dyn Driver, formatter: &mut dyn RowFormatter, chunk: usize) -> Result<u64> {
    let mut total = 0u64;
    loop {
        let set = driver.select_set(&format!("FETCH {chunk} FROM {CURSOR_NAME}"))?;
        for row in set.rows() {
            formatter.write_row(row.values())?;
        }
        total += set.len() as u64;
        if set.len() < chunk {
            return Ok(total);
        }
    }
}
