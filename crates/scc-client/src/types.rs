//! Request and response types of the SCC API.

use std::fmt;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::lifecycle::MeasurementState;

/// Status code SCC uses for a successfully produced product.
pub const STATUS_OK: i32 = 127;

/// A measurement as reported by `api/v1/measurements/`.
///
/// Product fields hold SCC status codes: `127` done, `0` not run, negative
/// values are errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementInfo {
    pub id: String,
    #[serde(default)]
    pub station_id: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub stop: Option<String>,
    #[serde(default)]
    pub upload: i32,
    #[serde(default)]
    pub hirelpp: i32,
    #[serde(default)]
    pub cloudmask: i32,
    #[serde(default)]
    pub elpp: i32,
    #[serde(default)]
    pub elda: i32,
    #[serde(default)]
    pub elic: i32,
    #[serde(default)]
    pub is_running: bool,
}

impl MeasurementInfo {
    /// Lifecycle state implied by the reported status codes.
    pub fn state(&self) -> MeasurementState {
        let products = [self.hirelpp, self.cloudmask, self.elpp, self.elda, self.elic];
        if self.upload < 0 {
            MeasurementState::Failed
        } else if self.is_running {
            MeasurementState::Processing
        } else if self.upload != STATUS_OK {
            MeasurementState::Submitted
        } else if products.iter().any(|&s| s < 0) {
            MeasurementState::Failed
        } else {
            MeasurementState::Done
        }
    }

    /// Products that finished successfully and can be downloaded.
    pub fn available_products(&self) -> Vec<Product> {
        Product::ALL
            .into_iter()
            .filter(|p| p.status(self) == STATUS_OK)
            .collect()
    }
}

/// Downloadable processing products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Product {
    HiRelpp,
    Cloudmask,
    Elpp,
    Optical,
    Elic,
}

impl Product {
    pub const ALL: [Product; 5] = [
        Product::HiRelpp,
        Product::Cloudmask,
        Product::Elpp,
        Product::Optical,
        Product::Elic,
    ];

    /// Path segment of `data_processing/measurements/<id>/download-<segment>/`
    pub fn url_segment(&self) -> &'static str {
        match self {
            Product::HiRelpp => "hirelpp",
            Product::Cloudmask => "cloudmask",
            Product::Elpp => "preprocessed",
            Product::Optical => "optical",
            Product::Elic => "elic",
        }
    }

    /// Directory below `<out>/<id>/` the archive is extracted to.
    pub fn directory(&self) -> &'static str {
        match self {
            Product::HiRelpp => "hirelpp",
            Product::Cloudmask => "cloudmask",
            Product::Elpp => "scc_preprocessed",
            Product::Optical => "scc_optical",
            Product::Elic => "elic",
        }
    }

    fn status(&self, info: &MeasurementInfo) -> i32 {
        match self {
            Product::HiRelpp => info.hirelpp,
            Product::Cloudmask => info.cloudmask,
            Product::Elpp => info.elpp,
            Product::Optical => info.elda,
            Product::Elic => info.elic,
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directory())
    }
}

/// Filter for [`crate::SccClient::search`]. Both dates are inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCriteria {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub station: Option<String>,
    pub id_prefix: Option<String>,
}

impl SearchCriteria {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            station: None,
            id_prefix: None,
        }
    }

    pub fn station(mut self, station: impl Into<String>) -> Self {
        self.station = Some(station.into());
        self
    }

    pub fn id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = Some(prefix.into());
        self
    }

    pub(crate) fn query(&self, page: &Page) -> Vec<(&'static str, String)> {
        let end = self.end + Duration::days(1);
        let mut query = vec![
            ("start__gte", format!("{} 00:00:00", self.start.format("%Y-%m-%d"))),
            ("start__lt", format!("{} 00:00:00", end.format("%Y-%m-%d"))),
            ("limit", page.limit.to_string()),
            ("offset", page.offset.to_string()),
        ];
        if let Some(station) = &self.station {
            query.push(("station_id", station.clone()));
        }
        if let Some(prefix) = &self.id_prefix {
            query.push(("id__startswith", prefix.clone()));
        }
        query
    }
}

/// Where a search starts. Later pages follow the service's `next` links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PageMeta {
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub total_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListResponse<T> {
    pub meta: Option<PageMeta>,
    pub objects: Vec<T>,
}

/// Ancillary file (sounding, overlap, lidar ratio) known to SCC.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AncillaryFile {
    #[serde(default)]
    pub id: Option<i64>,
    pub filename: String,
    #[serde(default)]
    pub status: String,
}

impl AncillaryFile {
    pub fn already_on_scc(&self) -> bool {
        self.status != "missing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(json: &str) -> MeasurementInfo {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_state_from_status_codes() {
        assert_eq!(
            info(r#"{"id":"A","upload":0}"#).state(),
            MeasurementState::Submitted
        );
        assert_eq!(
            info(r#"{"id":"A","upload":127,"is_running":true}"#).state(),
            MeasurementState::Processing
        );
        assert_eq!(
            info(r#"{"id":"A","upload":127,"elpp":127,"elda":127}"#).state(),
            MeasurementState::Done
        );
        assert_eq!(
            info(r#"{"id":"A","upload":127,"elpp":127,"elda":-2}"#).state(),
            MeasurementState::Failed
        );
        assert_eq!(
            info(r#"{"id":"A","upload":-1}"#).state(),
            MeasurementState::Failed
        );
    }

    #[test]
    fn test_available_products() {
        let m = info(r#"{"id":"A","upload":127,"elpp":127,"elda":127,"hirelpp":0}"#);
        assert_eq!(m.available_products(), vec![Product::Elpp, Product::Optical]);
    }

    #[test]
    fn test_search_query() {
        let criteria = SearchCriteria::new(
            NaiveDate::from_ymd_opt(2023, 5, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 5, 31).unwrap(),
        )
        .station("ABC");
        let query = criteria.query(&Page::default());
        assert!(query.contains(&("start__lt", "2023-06-01 00:00:00".to_string())));
        assert!(query.contains(&("station_id", "ABC".to_string())));
        assert!(!query.iter().any(|(k, _)| *k == "id__startswith"));
    }
}
