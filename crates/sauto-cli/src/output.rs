use sauto_core::inventory::QueryResult;
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let line = |cells: Vec<String>| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:w$}", c, w = widths.get(i).copied().unwrap_or(0)))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    println!("{}", line(headers.iter().map(|h| h.to_string()).collect()));
    println!("{}", line(widths.iter().map(|&w| "-".repeat(w)).collect()));
    for row in rows {
        println!("{}", line(row));
    }
}

/// Render one JSON cell for a table: strings bare, NULL empty.
fn cell(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Print the result of a raw statement as a table, or the affected row
/// count when it returned no columns.
pub fn print_query(result: &QueryResult) {
    if result.columns.is_empty() {
        println!("{} row(s) affected", result.affected);
        return;
    }
    let headers: Vec<&str> = result.columns.iter().map(String::as_str).collect();
    let rows = result
        .rows
        .iter()
        .map(|row| result.columns.iter().map(|c| cell(row.get(c))).collect())
        .collect();
    print_table(&headers, rows);
}
