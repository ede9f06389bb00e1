use crate::models::{Measurement, Station};
use crate::scraper::cleaner::RecordError;
use scraper::{ElementRef, Html, Selector};
use std::fmt;
use thiserror::Error;

// ── Errors ────────────────────────────────────────────────────────────────────

/// One row that could not be turned into records.
#[derive(Debug, Error)]
#[error("row {index} ({row_id}): {source}")]
pub struct RowError {
    pub index: usize,
    pub row_id: String,
    #[source]
    pub source: RecordError,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid row selector for prefix {prefix:?}: {reason}")]
    Selector { prefix: String, reason: String },

    #[error("no table rows with id prefix {prefix:?} found")]
    NoRows { prefix: String },

    #[error("{} of {total} rows failed to parse: {}", .errors.len(), RowErrors(.errors))]
    Rows { total: usize, errors: Vec<RowError> },
}

struct RowErrors<'a>(&'a [RowError]);

impl fmt::Display for RowErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

/// Everything read from one copy of the page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageRecords {
    pub stations: Vec<Station>,
    pub measurements: Vec<Measurement>,
}

// ── Table page ────────────────────────────────────────────────────────────────

/// Extract one station and one measurement per `<tr>` whose `id` starts
/// with `row_id_prefix`.
///
/// All rows must parse. If any row fails, nothing is returned and the error
/// lists every failing row.
pub fn extract(html: &str, row_id_prefix: &str) -> Result<PageRecords, ExtractError> {
    let doc = Html::parse_document(html);

    let row_sel = row_selector(row_id_prefix)?;

    let mut records = PageRecords::default();
    let mut errors = Vec::new();
    let mut total = 0usize;

    for (index, tr) in doc.select(&row_sel).enumerate() {
        total += 1;
        let cells = row_cells(tr);

        let parsed = Station::from_cells(&cells)
            .and_then(|s| Measurement::from_cells(&cells).map(|m| (s, m)));

        match parsed {
            Ok((station, measurement)) => {
                records.stations.push(station);
                records.measurements.push(measurement);
            }
            Err(source) => errors.push(RowError {
                index,
                row_id: tr.value().id().unwrap_or_default().to_string(),
                source,
            }),
        }
    }

    if total == 0 {
        return Err(ExtractError::NoRows {
            prefix: row_id_prefix.to_string(),
        });
    }
    if !errors.is_empty() {
        return Err(ExtractError::Rows { total, errors });
    }
    Ok(records)
}

fn row_selector(prefix: &str) -> Result<Selector, ExtractError> {
    let escaped = prefix.replace('\\', "\\\\").replace('"', "\\\"");
    Selector::parse(&format!(r#"tr[id^="{}"]"#, escaped)).map_err(|e| ExtractError::Selector {
        prefix: prefix.to_string(),
        reason: e.to_string(),
    })
}

/// Text of each direct `<td>` child, whitespace-trimmed. Cells of tables
/// nested inside a cell stay part of that cell's text.
fn row_cells(tr: ElementRef<'_>) -> Vec<String> {
    tr.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "td")
        .map(|td| td.text().collect::<String>().trim().to_string())
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;

    pub(crate) const PREFIX: &str = "ctl00_MainContent_rgMesswerte_ctl00__";

    pub(crate) fn tr(i: usize, website_id: &str, date: &str, nhn: &str, gok: &str) -> String {
        format!(
            r#"<tr id="{PREFIX}{i}" class="rgRow">
                <td><a href="/Messstelle/{website_id}">Station {i}</a></td>
                <td>{website_id}</td><td>97{i:05}</td><td>Geest</td>
                <td>NLWKN</td><td>{date}</td><td>{nhn}</td><td>{gok}</td>
                <td>hoch</td><td>52.{i}1</td><td>9.{i}2</td>
            </tr>"#
        )
    }

    pub(crate) fn page(rows: &[String]) -> String {
        format!(
            r#"<html><body><table id="ctl00_MainContent_rgMesswerte_ctl00">
                <thead><tr><th>Name</th></tr></thead>
                <tbody>{}</tbody>
                <tfoot><tr id="pager"><td>1</td></tr></tfoot>
            </table></body></html>"#,
            rows.join("\n")
        )
    }

    #[test]
    fn extracts_matching_rows_only() {
        let html = page(&[
            tr(0, "100", "01.03.2024", "71,23", "2,10"),
            tr(1, "200", "01.03.2024", "-", "-"),
        ]);

        let records = extract(&html, PREFIX).unwrap();
        assert_eq!(records.stations.len(), 2);
        assert_eq!(records.measurements.len(), 2);

        let s = &records.stations[0];
        assert_eq!(s.website_id, "100");
        assert_eq!(s.name.as_deref(), Some("Station 0"));
        assert_eq!(s.location.latitude, 52.01);

        let m = &records.measurements[1];
        assert_eq!(m.station, "200");
        assert_eq!(m.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(m.water_level_nhn, None);
        assert_eq!(m.water_level_gok, None);
        assert_eq!(m.classification.as_deref(), Some("hoch"));
    }

    #[test]
    fn one_bad_row_fails_the_whole_page() {
        let html = page(&[
            tr(0, "100", "01.03.2024", "71,23", "2,10"),
            tr(1, "200", "2024-03-01", "70,00", "1,00"),
            tr(2, "300", "01.03.2024", "69,00", "0,90"),
        ]);

        match extract(&html, PREFIX) {
            Err(ExtractError::Rows { total, errors }) => {
                assert_eq!(total, 3);
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].index, 1);
                assert_eq!(errors[0].row_id, format!("{PREFIX}1"));
            }
            other => panic!("expected row errors, got {:?}", other),
        }
    }

    #[test]
    fn all_row_errors_are_reported() {
        let html = page(&[
            tr(0, "100", "bad", "71,23", "2,10"),
            tr(1, "200", "01.03.2024", "x", "1,00"),
        ]);

        let err = extract(&html, PREFIX).unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("2 of 2 rows failed"), "{msg}");
        assert!(msg.contains("row 0"), "{msg}");
        assert!(msg.contains("row 1"), "{msg}");
    }

    #[test]
    fn page_without_rows_is_an_error() {
        let html = page(&[]);
        assert!(matches!(
            extract(&html, PREFIX),
            Err(ExtractError::NoRows { .. })
        ));
    }

    #[test]
    fn nested_table_does_not_shift_columns() {
        let row = format!(
            r#"<tr id="{PREFIX}0">
                <td><table><tr><td>Info</td></tr></table>Station 0</td>
                <td>100</td><td>9700000</td><td>Geest</td>
                <td>NLWKN</td><td>01.03.2024</td><td>71,23</td><td>2,10</td>
                <td>hoch</td><td>52.01</td><td>9.02</td>
            </tr>"#
        );

        let records = extract(&page(&[row]), PREFIX).unwrap();
        assert_eq!(records.stations[0].website_id, "100");
        assert_eq!(records.measurements[0].water_level_gok, Some(2.10));
    }

    #[test]
    fn prefix_must_match_from_the_start() {
        let html = page(&[tr(0, "100", "01.03.2024", "1", "1")]);
        assert!(matches!(
            extract(&html, "MainContent_rgMesswerte"),
            Err(ExtractError::NoRows { .. })
        ));
    }
}
