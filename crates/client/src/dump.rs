use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};

use bzwire::{CaptureReader, CaptureRecord};

/// Prints every record of a capture file, then a per-code summary.
pub fn dump_capture(path: &Path, show_payload: bool) -> Result<()> {
    let reader = CaptureReader::open(path)
        .with_context(|| format!("cannot open capture {}", path.display()))?;

    let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for record in reader {
        let record = record.with_context(|| format!("corrupt capture {}", path.display()))?;
        println!("{}", describe(&record));
        if show_payload && !record.payload.is_empty() {
            println!("{}", hex_lines(&record.payload));
        }
        let entry = counts.entry(record.code.to_string()).or_default();
        entry.0 += 1;
        entry.1 += record.payload.len();
    }

    println!();
    for (name, (count, bytes)) in &counts {
        println!("{name:<24} {count:>6} messages {bytes:>9} bytes");
    }
    Ok(())
}

fn describe(record: &CaptureRecord) -> String {
    format!(
        "{:>10.3}s {:<24} {:>5} bytes",
        record.millis as f64 / 1000.0,
        record.code,
        record.payload.len()
    )
}

fn hex_lines(payload: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in payload.chunks(16).enumerate() {
        if row > 0 {
            out.push('\n');
        }
        let _ = write!(out, "    {:04x}:", row * 16);
        for byte in chunk {
            let _ = write!(out, " {byte:02x}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzwire::MsgCode;

    #[test]
    fn test_describe_record() {
        let record = CaptureRecord {
            millis: 1500,
            code: MsgCode::Accept,
            payload: vec![1, 2, 3],
        };
        let line = describe(&record);
        assert!(line.contains("1.500s"));
        assert!(line.contains("MsgAccept"));
        assert!(line.ends_with("3 bytes"));
    }

    #[test]
    fn test_hex_rows() {
        let payload: Vec<u8> = (0..20).collect();
        let text = hex_lines(&payload);
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("    0000: 00 01"));
        assert_eq!(rows[1], "    0010: 10 11 12 13");
    }
}
