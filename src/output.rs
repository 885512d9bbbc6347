use crate::ledger::report;
use crate::scanner::TokenReport;
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "table" => OutputFormat::Table,
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Text,
        }
    }
}

pub fn format_reports(reports: &[TokenReport], format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format_reports_text(reports),
        OutputFormat::Table => format_reports_table(reports),
        OutputFormat::Json => format_reports_json(reports),
        OutputFormat::Csv => format_reports_csv(reports),
    }
}

fn format_reports_text(reports: &[TokenReport]) -> String {
    let mut out = String::new();
    for token_report in reports {
        out.push_str(&format!("Token address: {}\n", token_report.token));
        for holder in &token_report.holders {
            out.push_str(&format!(
                "Address: {}, Balance: {}\n",
                holder.address,
                report(&holder.balance, token_report.decimals)
            ));
        }
    }
    out
}

fn format_reports_table(reports: &[TokenReport]) -> String {
    if reports.is_empty() {
        return "No tokens scanned.".to_string();
    }

    let mut sections = Vec::with_capacity(reports.len());
    for token_report in reports {
        let label = token_report
            .symbol
            .as_deref()
            .map_or_else(|| token_report.token.to_string(), |symbol| {
                format!("{symbol} ({})", token_report.token)
            });
        let summary = format!(
            "{label}: {} holder(s), {} transfer(s) in blocks {}, {} negative balance(s)",
            token_report.holders.len(),
            token_report.stats.transfers_applied,
            token_report.range,
            token_report.deficits.len()
        );

        if token_report.holders.is_empty() {
            sections.push(format!("{summary}\nNo holders found."));
            continue;
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec!["Rank", "Address", "Balance", "Balance (Raw)"]);

        for (i, holder) in token_report.holders.iter().enumerate() {
            table.add_row(vec![
                Cell::new(i + 1),
                Cell::new(holder.address),
                Cell::new(report(&holder.balance, token_report.decimals)),
                Cell::new(holder.balance.to_string()),
            ]);
        }

        sections.push(format!("{summary}\n{table}"));
    }

    sections.join("\n\n")
}

fn format_reports_json(reports: &[TokenReport]) -> String {
    let json_reports: Vec<_> = reports
        .iter()
        .map(|r| {
            let holders: Vec<_> = r
                .holders
                .iter()
                .enumerate()
                .map(|(i, holder)| {
                    json!({
                        "rank": i + 1,
                        "address": holder.address.to_string(),
                        "balance": report(&holder.balance, r.decimals),
                        "balance_raw": holder.balance.to_string(),
                    })
                })
                .collect();
            let deficits: Vec<_> = r
                .deficits
                .iter()
                .map(|(address, balance)| {
                    json!({
                        "address": address.to_string(),
                        "balance_raw": balance.to_string(),
                    })
                })
                .collect();

            json!({
                "token": r.token.to_string(),
                "symbol": r.symbol,
                "decimals": r.decimals,
                "from_block": r.range.from,
                "to_block": r.range.to,
                "holders": holders,
                "negative_balances": deficits,
                "stats": {
                    "logs_seen": r.stats.logs_seen,
                    "transfers_applied": r.stats.transfers_applied,
                    "skipped_missing_topics": r.stats.skipped_missing_topics,
                    "skipped_foreign_events": r.stats.skipped_foreign_events,
                    "duplicates_dropped": r.stats.duplicates_dropped,
                },
            })
        })
        .collect();

    serde_json::to_string_pretty(&json_reports).unwrap_or_else(|_| "[]".to_string())
}

fn format_reports_csv(reports: &[TokenReport]) -> String {
    let mut wtr = Writer::from_writer(vec![]);

    let _ = wtr.write_record(["token", "rank", "address", "balance", "balance_raw"]);

    for r in reports {
        let token = r.token.to_string();
        for (i, holder) in r.holders.iter().enumerate() {
            let _ = wtr.write_record([
                &token,
                &(i + 1).to_string(),
                &holder.address.to_string(),
                &report(&holder.balance, r.decimals),
                &holder.balance.to_string(),
            ]);
        }
    }

    String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlockRange;
    use crate::ledger::Holder;
    use crate::scanner::ReplayStats;
    use alloy_primitives::{Address, address};
    use num_bigint::BigInt;
    use std::collections::BTreeMap;

    const TOKEN: Address = address!("0xdAC17F958D2ee523a2206206994597C13D831ec7");
    const HOLDER: Address = address!("0x0000000000000000000000000000000000000012");

    fn sample() -> TokenReport {
        TokenReport {
            token: TOKEN,
            symbol: Some("USDT".to_string()),
            decimals: 6,
            range: BlockRange {
                from: 17081000,
                to: 17081327,
            },
            holders: vec![Holder {
                address: HOLDER,
                balance: BigInt::from(1_500_000),
            }],
            deficits: BTreeMap::new(),
            stats: ReplayStats {
                logs_seen: 1,
                transfers_applied: 1,
                ..ReplayStats::default()
            },
        }
    }

    #[test]
    fn parses_format_names() {
        assert_eq!(OutputFormat::from("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from("csv"), OutputFormat::Csv);
        assert_eq!(OutputFormat::from("table"), OutputFormat::Table);
        assert_eq!(OutputFormat::from("anything"), OutputFormat::Text);
    }

    #[test]
    fn text_output_uses_checksummed_addresses() {
        let out = format_reports(&[sample()], OutputFormat::Text);
        assert_eq!(
            out,
            "Token address: 0xdAC17F958D2ee523a2206206994597C13D831ec7\n\
             Address: 0x0000000000000000000000000000000000000012, Balance: 1.500000\n"
        );
    }

    #[test]
    fn json_output_carries_raw_and_scaled_balances() {
        let out = format_reports(&[sample()], OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value[0]["symbol"], "USDT");
        assert_eq!(value[0]["holders"][0]["balance"], "1.500000");
        assert_eq!(value[0]["holders"][0]["balance_raw"], "1500000");
        assert_eq!(value[0]["stats"]["transfers_applied"], 1);
    }

    #[test]
    fn csv_output_has_one_row_per_holder() {
        let out = format_reports(&[sample()], OutputFormat::Csv);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "token,rank,address,balance,balance_raw");
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with(",1,0x0000000000000000000000000000000000000012,1.500000,1500000"));
    }

    #[test]
    fn table_output_mentions_every_holder() {
        let out = format_reports(&[sample()], OutputFormat::Table);
        assert!(out.starts_with("USDT (0xdAC17F958D2ee523a2206206994597C13D831ec7): 1 holder(s)"));
        assert!(out.contains("1.500000"));
        assert_eq!(format_reports(&[], OutputFormat::Table), "No tokens scanned.");
    }
}
