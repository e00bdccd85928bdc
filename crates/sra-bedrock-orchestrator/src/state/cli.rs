//! CLI rendering of ledger contents

use super::ledger::StateLedger;
use super::types::ManagedResource;
use anyhow::Result;
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

/// Render records as a table; removed records are hidden unless requested
pub fn render_records(records: &[ManagedResource], include_removed: bool) -> Option<Table> {
    let visible: Vec<_> = records
        .iter()
        .filter(|r| include_removed || !r.is_removed())
        .collect();
    if visible.is_empty() {
        return None;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Service"),
            Cell::new("Type"),
            Cell::new("Name"),
            Cell::new("Account"),
            Cell::new("Region"),
            Cell::new("State"),
            Cell::new("Updated"),
        ]);

    for record in visible {
        table.add_row(vec![
            Cell::new(record.attrs.service.as_ref()),
            Cell::new(record.attrs.component_type.as_ref()),
            Cell::new(&record.attrs.component_name),
            Cell::new(&record.attrs.account),
            Cell::new(&record.attrs.region),
            Cell::new(record.attrs.component_state.as_ref()),
            Cell::new(record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }

    Some(table)
}

/// Print every record of a solution's partition
pub async fn list_records<L: StateLedger>(
    ledger: &L,
    partition: &str,
    include_removed: bool,
) -> Result<()> {
    let records = ledger.list(partition).await?;

    match render_records(&records, include_removed) {
        Some(table) => println!("{table}"),
        None => println!("No tracked resources"),
    }

    Ok(())
}
