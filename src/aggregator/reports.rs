//! Report writers: pure functions of the aggregated `ReasonCounter` map, shared by the live
//! `audit` run and the standalone `generate-output` path so both produce identical output.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use comfy_table::{presets, Table};

use super::{JournalRow, ReasonCounter};
use crate::model::check::INTERNAL_ERROR_PREFIX;

/// Which optional report groups to (re)generate; all true for a live run, selectable for
/// `generate-output`.
#[derive(Debug, Clone, Copy)]
pub struct ReportOptions {
    pub logs: bool,
    pub bad_items: bool,
    pub tables: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            logs: true,
            bad_items: true,
            tables: true,
        }
    }
}

pub fn write_reports(
    output_root: &Path,
    counters: &HashMap<String, ReasonCounter>,
    rows: &[JournalRow],
    options: ReportOptions,
) -> crate::Result<()> {
    if options.logs {
        write_line_log(output_root, "skipped_items.log", rows, |r| {
            r.state == crate::model::CheckState::ItemSkipped
        })?;
        write_line_log(output_root, "failed_checks.log", rows, |r| {
            r.state == crate::model::CheckState::Failed
        })?;
        write_line_log(output_root, "skipped_checks.log", rows, |r| {
            r.state == crate::model::CheckState::ItemSkipped && !r.description.starts_with(INTERNAL_ERROR_PREFIX)
        })?;
    }

    if options.bad_items {
        write_bad_items_csv(output_root, rows)?;
    }

    if options.tables {
        write_table(output_root, "results_all.txt", counters, TableStyle::All)?;
        write_table(output_root, "results_condensed.txt", counters, TableStyle::Condensed)?;
        write_table(output_root, "results_jira.txt", counters, TableStyle::Jira)?;
        print_terminal_table(counters);
    }

    Ok(())
}

fn write_line_log(
    output_root: &Path,
    filename: &str,
    rows: &[JournalRow],
    predicate: impl Fn(&JournalRow) -> bool,
) -> crate::Result<()> {
    let file = File::create(output_root.join(filename))?;
    let mut writer = BufWriter::new(file);
    for row in rows.iter().filter(|r| predicate(r)) {
        writeln!(writer, "{}\t{}", row.mbid, row.description)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_bad_items_csv(output_root: &Path, rows: &[JournalRow]) -> crate::Result<()> {
    use std::collections::BTreeMap;
    use std::collections::BTreeSet;

    let mut descriptions: BTreeSet<String> = BTreeSet::new();
    let mut per_mbid: BTreeMap<String, HashMap<String, u64>> = BTreeMap::new();

    for row in rows {
        if row.state != crate::model::CheckState::Failed {
            continue;
        }
        descriptions.insert(row.description.clone());
        *per_mbid
            .entry(row.mbid.clone())
            .or_default()
            .entry(row.description.clone())
            .or_insert(0) += 1;
    }

    let mut writer = csv::Writer::from_path(output_root.join("bad_items.csv"))?;
    let mut header = vec!["mbid".to_string()];
    header.extend(descriptions.iter().cloned());
    writer.write_record(&header)?;

    for (mbid, counts) in &per_mbid {
        let mut record = vec![mbid.clone()];
        for desc in &descriptions {
            record.push(counts.get(desc).copied().unwrap_or(0).to_string());
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

enum TableStyle {
    All,
    Condensed,
    Jira,
}

fn build_table(counters: &HashMap<String, ReasonCounter>, style: &TableStyle) -> Table {
    let mut table = Table::new();
    match style {
        TableStyle::Jira => {
            table.load_preset(presets::ASCII_MARKDOWN);
        }
        _ => {
            table.load_preset(presets::UTF8_FULL);
        }
    }
    table.set_header(vec!["name", "#checks", "#checked rels", "#failed (%)", "#failed rels (%)"]);

    let mut names: Vec<&String> = counters.keys().filter(|k| !k.starts_with(INTERNAL_ERROR_PREFIX)).collect();
    names.sort();

    let mut skipped_section: Vec<(String, u64)> = Vec::new();

    for name in names {
        let counter = &counters[name];
        if counter.skipped > 0 {
            skipped_section.push((name.clone(), counter.skipped));
        }
        if matches!(style, TableStyle::Condensed | TableStyle::Jira) && counter.failed == 0 {
            continue;
        }
        let checks = counter.passed + counter.failed + counter.skipped;
        let checked_rels = counter.all_mbids.len() as u64;
        let failed_pct = percentage(counter.failed, checks);
        let failed_rels_pct = percentage(counter.failed_mbids.len() as u64, checked_rels);
        table.add_row(vec![
            name.clone(),
            checks.to_string(),
            checked_rels.to_string(),
            format!("{} ({failed_pct:.1}%)", counter.failed),
            format!("{} ({failed_rels_pct:.1}%)", counter.failed_mbids.len()),
        ]);
    }

    if !skipped_section.is_empty() {
        table.add_row(vec!["SKIPPED ITEMS".to_string(), String::new(), String::new(), String::new(), String::new()]);
        for (name, count) in skipped_section {
            table.add_row(vec![name, count.to_string(), String::new(), String::new(), String::new()]);
        }
    }

    table
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * part as f64 / total as f64
    }
}

fn write_table(
    output_root: &Path,
    filename: &str,
    counters: &HashMap<String, ReasonCounter>,
    style: TableStyle,
) -> crate::Result<()> {
    let table = build_table(counters, &style);
    std::fs::write(output_root.join(filename), table.to_string())?;
    Ok(())
}

fn print_terminal_table(counters: &HashMap<String, ReasonCounter>) {
    let rendered = build_table(counters, &TableStyle::All);
    println!("{rendered}");
}
