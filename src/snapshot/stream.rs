// ABOUTME: Streaming access to snapshot files - JSON arrays too large to hold in memory
// ABOUTME: Writer appends page-at-a-time, reader yields one record at a time

use anyhow::{bail, Context, Result};
use std::io::{BufRead, Write};

use crate::store::Record;

/// Streams records into a JSON array without buffering the full result set.
///
/// The caller feeds pages as they arrive from the source store; `finish`
/// closes the array and hands the underlying writer back for durability
/// handling.
pub struct SnapshotFileWriter<W: Write> {
    out: W,
    records_written: u64,
}

impl<W: Write> SnapshotFileWriter<W> {
    pub fn new(mut out: W) -> Result<Self> {
        out.write_all(b"[")
            .context("Failed to start snapshot array")?;
        Ok(Self {
            out,
            records_written: 0,
        })
    }

    /// Append one page of records to the array.
    pub fn write_page(&mut self, records: &[Record]) -> Result<()> {
        for record in records {
            if self.records_written > 0 {
                self.out.write_all(b",")?;
            }
            serde_json::to_writer(&mut self.out, record)
                .context("Failed to serialize snapshot record")?;
            self.records_written += 1;
        }
        Ok(())
    }

    /// Close the array and return the writer with the record count.
    pub fn finish(mut self) -> Result<(W, u64)> {
        self.out.write_all(b"]")?;
        self.out
            .flush()
            .context("Failed to flush snapshot array")?;
        Ok((self.out, self.records_written))
    }
}

enum ReaderState {
    Start,
    FirstElement,
    NextElement,
    Done,
}

/// Incremental parser over a snapshot file's JSON array.
///
/// Lazy, finite, and non-restartable: each call to `next_record` scans exactly
/// one element off the input, so arbitrarily large snapshots are processed in
/// O(record) memory. A truncated array (process died mid-write, which the
/// rename discipline normally prevents) surfaces as an error rather than a
/// silently short read.
pub struct JsonArrayReader<R: BufRead> {
    input: R,
    state: ReaderState,
    element: Vec<u8>,
}

impl<R: BufRead> JsonArrayReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            state: ReaderState::Start,
            element: Vec::new(),
        }
    }

    /// Pull the next record, or `None` once the closing bracket is reached.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            match self.state {
                ReaderState::Start => {
                    let first = self.next_nonspace()?;
                    if first != b'[' {
                        bail!("Snapshot file does not start with a JSON array");
                    }
                    self.state = ReaderState::FirstElement;
                }
                ReaderState::FirstElement => {
                    let byte = self.next_nonspace()?;
                    if byte == b']' {
                        self.state = ReaderState::Done;
                        return Ok(None);
                    }
                    self.state = ReaderState::NextElement;
                    return self.read_record(byte).map(Some);
                }
                ReaderState::NextElement => {
                    let byte = self.next_nonspace()?;
                    match byte {
                        b']' => {
                            self.state = ReaderState::Done;
                            return Ok(None);
                        }
                        b',' => {
                            let first = self.next_nonspace()?;
                            return self.read_record(first).map(Some);
                        }
                        other => bail!(
                            "Malformed snapshot array: expected ',' or ']', found '{}'",
                            other as char
                        ),
                    }
                }
                ReaderState::Done => return Ok(None),
            }
        }
    }

    /// Drain the remaining records, returning how many there were.
    pub fn count_remaining(mut self) -> Result<u64> {
        let mut total = 0u64;
        while self.next_record()?.is_some() {
            total += 1;
        }
        Ok(total)
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let buf = self
            .input
            .fill_buf()
            .context("Failed to read snapshot file")?;
        if buf.is_empty() {
            return Ok(None);
        }
        let byte = buf[0];
        self.input.consume(1);
        Ok(Some(byte))
    }

    fn next_nonspace(&mut self) -> Result<u8> {
        loop {
            match self.read_byte()? {
                None => bail!("Unexpected end of snapshot file"),
                Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') => continue,
                Some(byte) => return Ok(byte),
            }
        }
    }

    /// Scan one object element into the reusable buffer and deserialize it.
    ///
    /// Tracks brace/bracket depth and string state by hand because element
    /// boundaries must be found without parsing the whole array.
    fn read_record(&mut self, first: u8) -> Result<Record> {
        if first != b'{' {
            bail!("Snapshot element is not a JSON object");
        }
        self.element.clear();
        self.element.push(first);

        let mut depth = 1u32;
        let mut in_string = false;
        let mut escaped = false;
        while depth > 0 {
            let byte = match self.read_byte()? {
                Some(byte) => byte,
                None => bail!("Unexpected end of snapshot file inside a record"),
            };
            self.element.push(byte);
            if in_string {
                if escaped {
                    escaped = false;
                } else if byte == b'\\' {
                    escaped = true;
                } else if byte == b'"' {
                    in_string = false;
                }
            } else {
                match byte {
                    b'"' => in_string = true,
                    b'{' | b'[' => depth += 1,
                    b'}' | b']' => depth -= 1,
                    _ => {}
                }
            }
        }

        serde_json::from_slice(&self.element).context("Failed to parse snapshot record")
    }
}
