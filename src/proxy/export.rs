//! CSV and TXT writers for batch results
//!
//! Exporters only serialize endpoints with `reachable == true`; the rest
//! of the run stays in memory for display.

use crate::proxy::models::BatchRun;
use crate::Result;
use std::fs;
use std::path::Path;

/// Write the reachable entries of a run as CSV.
///
/// Starts with a UTF-8 BOM so spreadsheet tools detect the encoding.
/// Returns how many rows were written.
pub fn write_csv<P: AsRef<Path>>(run: &BatchRun, path: P) -> Result<usize> {
    let mut out = String::from("\u{feff}");
    out.push_str("proxy,egress_ip,country,region,latency_ms,tcp,udp\n");

    let mut rows = 0;
    for entry in run.reachable() {
        let outcome = &entry.outcome;
        let fields = [
            entry.endpoint.to_full_string(),
            outcome.egress_ip.clone().unwrap_or_default(),
            outcome.country.clone().unwrap_or_default(),
            outcome.region.clone().unwrap_or_default(),
            outcome
                .latency_ms
                .map(|ms| ms.to_string())
                .unwrap_or_default(),
            yes_no(outcome.tcp_supported),
            yes_no(outcome.udp_supported),
        ];
        let row: Vec<String> = fields.iter().map(|f| escape_field(f)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
        rows += 1;
    }

    fs::write(path, out)?;
    Ok(rows)
}

/// Write the reachable endpoints as plain text, one `host:port[:user:pass]`
/// per line, in input order. Returns how many lines were written.
pub fn write_txt<P: AsRef<Path>>(run: &BatchRun, path: P) -> Result<usize> {
    let lines: Vec<String> = run
        .reachable()
        .map(|entry| entry.endpoint.to_full_string())
        .collect();
    let count = lines.len();
    fs::write(path, lines.join("\n"))?;
    Ok(count)
}

fn yes_no(flag: Option<bool>) -> String {
    match flag {
        Some(true) => "yes".to_string(),
        Some(false) => "no".to_string(),
        None => String::new(),
    }
}

fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
