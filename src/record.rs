//! Comma-separated record helpers shared by every row format.

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};

use crate::error::SimError;

/// Parses one row into its fields. Blank rows yield `None`.
pub(crate) fn parse(row: &str) -> Result<Option<StringRecord>, SimError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(row.as_bytes());
    let mut record = StringRecord::new();
    if reader.read_record(&mut record)? {
        Ok(Some(record))
    } else {
        Ok(None)
    }
}

/// Formats fields as a single row without the line terminator.
pub(crate) fn format<I, T>(fields: I) -> Result<String, SimError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| SimError::Io(e.into_error()))?;
    let row = String::from_utf8(bytes).map_err(|e| SimError::malformed(e.to_string()))?;
    Ok(row.trim_end_matches(['\r', '\n']).to_owned())
}

/// Strips an optional `0x`/`0X` prefix.
pub(crate) fn hex_digits(field: &str) -> &str {
    field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field)
}

/// Parses a hexadecimal field with an optional `0x` prefix.
pub fn parse_hex(field: &str) -> Result<u64, SimError> {
    u64::from_str_radix(hex_digits(field), 16)
        .map_err(|e| SimError::malformed(format!("{field:?} is not hexadecimal: {e}")))
}

/// Parses a decimal integer field.
pub(crate) fn parse_int<T>(field: &str) -> Result<T, SimError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    field
        .parse()
        .map_err(|e| SimError::malformed(format!("{field:?} is not an integer: {e}")))
}

/// Reads field 0 of a row as a decimal integer; blank rows read as zero.
pub(crate) fn leading_int(row: Option<&str>) -> Result<u32, SimError> {
    let Some(row) = row else { return Ok(0) };
    match parse(row)? {
        Some(record) => parse_int(record.get(0).unwrap_or_default()),
        None => Ok(0),
    }
}
