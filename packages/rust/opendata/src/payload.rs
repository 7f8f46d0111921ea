//! Wire shapes of the search and record APIs.
//!
//! Every field is optional: the API omits keys freely and a missing field must
//! never reject the whole payload.

use serde::Deserialize;
use serde_json::Value;

/// `GET search_ocds` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub data: Vec<SearchHit>,
}

/// One search result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub ocid: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "buyerName")]
    pub buyer_name: Option<String>,
    #[serde(default)]
    pub internal_type: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

impl SearchHit {
    /// Title and description joined, whichever are present.
    pub fn summary(&self) -> String {
        let title = self.title.as_deref().map(str::trim).unwrap_or_default();
        let description = self.description.as_deref().map(str::trim).unwrap_or_default();
        match (title.is_empty(), description.is_empty()) {
            (false, false) if title != description => format!("{title}. {description}"),
            (false, _) => title.to_string(),
            (true, _) => description.to_string(),
        }
    }
}

/// `GET record` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordResponse {
    #[serde(default)]
    pub records: Vec<RecordEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordEntry {
    #[serde(default)]
    pub releases: Vec<Release>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub tender: Option<Tender>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Tender {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "tenderPeriod")]
    pub tender_period: Option<Period>,
    #[serde(default)]
    pub value: Option<Amount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Period {
    #[serde(default, rename = "endDate")]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Amount {
    /// Number or numeric string, depending on the publisher.
    #[serde(default)]
    pub amount: Option<Value>,
}

/// The tender fields the pipeline keeps from a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TenderSummary {
    pub status: Option<String>,
    pub deadline: Option<String>,
    pub budget: Option<f64>,
}

impl RecordResponse {
    /// Tender of the first release of the first record.
    pub fn tender_summary(&self) -> TenderSummary {
        let Some(tender) = self
            .records
            .first()
            .and_then(|r| r.releases.first())
            .and_then(|r| r.tender.as_ref())
        else {
            return TenderSummary::default();
        };

        TenderSummary {
            status: tender.status.clone(),
            deadline: tender
                .tender_period
                .as_ref()
                .and_then(|p| p.end_date.clone()),
            budget: tender
                .value
                .as_ref()
                .and_then(|v| v.amount.as_ref())
                .and_then(amount_as_f64),
        }
    }
}

fn amount_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_extracts_first_tender() {
        let json = r#"{"records":[{"releases":[{"tender":{
            "status":"active",
            "tenderPeriod":{"endDate":"2025-06-01T17:00:00-05:00"},
            "value":{"amount":"45000.50"}
        }}]}]}"#;
        let record: RecordResponse = serde_json::from_str(json).unwrap();
        let summary = record.tender_summary();
        assert_eq!(summary.status.as_deref(), Some("active"));
        assert_eq!(summary.deadline.as_deref(), Some("2025-06-01T17:00:00-05:00"));
        assert_eq!(summary.budget, Some(45000.5));
    }

    #[test]
    fn empty_record_is_tolerated() {
        let record: RecordResponse = serde_json::from_str(r#"{"records":[]}"#).unwrap();
        assert_eq!(record.tender_summary(), TenderSummary::default());
    }

    #[test]
    fn summary_joins_title_and_description() {
        let hit = SearchHit {
            title: Some("Sistema de gestión".into()),
            description: Some("Implementación del sistema".into()),
            ..SearchHit::default()
        };
        assert_eq!(hit.summary(), "Sistema de gestión. Implementación del sistema");

        let hit = SearchHit {
            description: Some("Solo descripción".into()),
            ..SearchHit::default()
        };
        assert_eq!(hit.summary(), "Solo descripción");
    }
}
