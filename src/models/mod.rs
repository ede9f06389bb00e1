use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::scraper::cleaner::{
    RecordError, cell, parse_coordinate, parse_date, parse_level, parse_optional_text,
    parse_required_text,
};

// ── Column layout ─────────────────────────────────────────────────────────────

/// Fixed cell positions of a measurement row on the source page.
pub mod columns {
    pub const NAME: usize = 0;
    pub const WEBSITE_ID: usize = 1;
    pub const PUBLIC_ID: usize = 2;
    pub const OPERATOR: usize = 4;
    pub const DATE: usize = 5;
    pub const WATER_LEVEL_NHN: usize = 6;
    pub const WATER_LEVEL_GOK: usize = 7;
    pub const CLASSIFICATION: usize = 8;
    pub const LATITUDE: usize = 9;
    pub const LONGITUDE: usize = 10;
}

// ── Point ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub latitude: f64,
    pub longitude: f64,
}

impl Point {
    /// Well-known text, x = longitude, y = latitude.
    pub fn to_wkt(&self) -> String {
        format!("POINT({} {})", self.longitude, self.latitude)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}N {:.5}E", self.latitude, self.longitude)
    }
}

// ── Station ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Station {
    /// Identifier used internally by the source site; natural key.
    pub website_id: String,
    pub public_id: String,
    pub name: Option<String>,
    pub operator: Option<String>,
    pub location: Point,
}

impl Station {
    /// Build a station from the ordered cell texts of one table row.
    pub fn from_cells(cells: &[String]) -> Result<Self, RecordError> {
        use columns::*;

        let name = parse_optional_text(cell(cells, NAME, "name")?);
        let website_id = parse_required_text(cell(cells, WEBSITE_ID, "website_id")?, "website_id")?;
        let public_id = parse_required_text(cell(cells, PUBLIC_ID, "public_id")?, "public_id")?;
        let operator = parse_optional_text(cell(cells, OPERATOR, "operator")?);
        let latitude = parse_coordinate(cell(cells, LATITUDE, "latitude")?, "latitude")?;
        let longitude = parse_coordinate(cell(cells, LONGITUDE, "longitude")?, "longitude")?;

        Ok(Self {
            website_id,
            public_id,
            name,
            operator,
            location: Point { latitude, longitude },
        })
    }
}

// ── Measurement ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Measurement {
    /// `Station::website_id` of the station that took the reading.
    pub station: String,
    pub date: NaiveDate,
    /// Water level class as published by the source, kept verbatim.
    pub classification: Option<String>,
    /// Metres relative to sea level (NHN).
    pub water_level_nhn: Option<f64>,
    /// Metres below terrain (GOK).
    pub water_level_gok: Option<f64>,
}

impl Measurement {
    /// Build a measurement from the ordered cell texts of one table row.
    pub fn from_cells(cells: &[String]) -> Result<Self, RecordError> {
        use columns::*;

        let station = parse_required_text(cell(cells, WEBSITE_ID, "website_id")?, "website_id")?;
        let date = parse_date(cell(cells, DATE, "date")?, "date")?;
        let water_level_nhn = parse_level(
            cell(cells, WATER_LEVEL_NHN, "water_level_nhn")?,
            "water_level_nhn",
        )?;
        let water_level_gok = parse_level(
            cell(cells, WATER_LEVEL_GOK, "water_level_gok")?,
            "water_level_gok",
        )?;
        let classification = parse_optional_text(cell(cells, CLASSIFICATION, "classification")?);

        Ok(Self {
            station,
            date,
            classification,
            water_level_nhn,
            water_level_gok,
        })
    }

    /// Both water levels are known.
    pub fn is_complete(&self) -> bool {
        self.water_level_nhn.is_some() && self.water_level_gok.is_some()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn row(nhn: &str, gok: &str, date: &str) -> Vec<String> {
        [
            "Adenstedt",
            "100000123",
            "9700123",
            "",
            "NLWKN Betriebsstelle Hannover",
            date,
            nhn,
            gok,
            "normal",
            "52.0123",
            "9.8765",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn station_from_cells() {
        let s = Station::from_cells(&row("71,23", "2,10", "01.03.2024")).unwrap();
        assert_eq!(s.website_id, "100000123");
        assert_eq!(s.public_id, "9700123");
        assert_eq!(s.name.as_deref(), Some("Adenstedt"));
        assert_eq!(s.operator.as_deref(), Some("NLWKN Betriebsstelle Hannover"));
        assert_eq!(s.location, Point { latitude: 52.0123, longitude: 9.8765 });
        assert_eq!(s.location.to_wkt(), "POINT(9.8765 52.0123)");
    }

    #[test]
    fn station_fails_on_either_coordinate() {
        let mut cells = row("1", "1", "01.03.2024");
        cells[columns::LONGITUDE] = "east".into();
        assert!(matches!(
            Station::from_cells(&cells),
            Err(RecordError::InvalidCoordinate { column: "longitude", .. })
        ));
    }

    #[test]
    fn measurement_from_cells() {
        let m = Measurement::from_cells(&row("71,23", "2,10", "01.03.2024")).unwrap();
        assert_eq!(m.station, "100000123");
        assert_eq!(m.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(m.classification.as_deref(), Some("normal"));
        assert_eq!(m.water_level_nhn, Some(71.23));
        assert_eq!(m.water_level_gok, Some(2.10));
        assert!(m.is_complete());
    }

    #[test]
    fn measurement_dash_is_null() {
        let m = Measurement::from_cells(&row("-", "3,5", "02.03.2024")).unwrap();
        assert_eq!(m.water_level_nhn, None);
        assert_eq!(m.water_level_gok, Some(3.5));
        assert!(!m.is_complete());

        let m = Measurement::from_cells(&row("-", "-", "02.03.2024")).unwrap();
        assert_eq!((m.water_level_nhn, m.water_level_gok), (None, None));
    }

    #[test]
    fn measurement_rejects_other_date_formats() {
        assert!(matches!(
            Measurement::from_cells(&row("1", "1", "2024-03-01")),
            Err(RecordError::InvalidDate { .. })
        ));
    }

    #[test]
    fn short_row_is_rejected() {
        let cells: Vec<String> = row("1", "1", "01.03.2024").into_iter().take(9).collect();
        assert!(matches!(
            Station::from_cells(&cells),
            Err(RecordError::MissingCell { index: 9, .. })
        ));
        // Measurement only reads up to column 8
        assert!(Measurement::from_cells(&cells).is_ok());
    }
}
