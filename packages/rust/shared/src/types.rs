//! Core domain types for procurement opportunities.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, TenderScopeError};

/// Action text used by sentinel assessments.
pub const NEEDS_MANUAL_REVIEW: &str = "NeedsManualReview";

/// Application status a stored opportunity starts with.
pub const DEFAULT_APPLICATION_STATUS: &str = "Por Revisar";

// ---------------------------------------------------------------------------
// ContractCode
// ---------------------------------------------------------------------------

static CONTRACT_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^NIC-[0-9]+-[0-9]+-[0-9]+$").expect("valid regex"));

/// Portal-issued contract identifier, `NIC-<digits>-<digits>-<digits>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContractCode(String);

impl ContractCode {
    /// Validate and wrap a contract code. Returns `None` on any format mismatch.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        CONTRACT_CODE_RE
            .is_match(trimmed)
            .then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContractCode {
    type Error = TenderScopeError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| {
            TenderScopeError::validation(format!("invalid contract code: {value}"))
        })
    }
}

impl From<ContractCode> for String {
    fn from(code: ContractCode) -> Self {
        code.0
    }
}

impl std::fmt::Display for ContractCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// LineItem
// ---------------------------------------------------------------------------

/// One product/service entry from a contract detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Row number as printed on the detail page.
    pub index: String,
    /// CPC classification code.
    pub classification_code: String,
    pub description: String,
    pub unit: String,
    /// Quantity text as printed (locale formatting preserved).
    pub quantity: String,
}

// ---------------------------------------------------------------------------
// RelevanceAssessment
// ---------------------------------------------------------------------------

/// Priority bucket assigned by the external assessment service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    #[serde(alias = "high", alias = "Alta")]
    High,
    #[serde(alias = "medium", alias = "Media")]
    Medium,
    #[serde(alias = "low", alias = "Baja")]
    Low,
    #[serde(alias = "Revisar Manualmente")]
    NeedsManualReview,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::NeedsManualReview => NEEDS_MANUAL_REVIEW,
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = TenderScopeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| TenderScopeError::validation(format!("unknown priority: {s}")))
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relevance assessment for one opportunity. Immutable once attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceAssessment {
    /// 0–10.
    pub score: f64,
    pub priority: Priority,
    pub rationale: String,
    pub recommended_action: String,
    pub assessed_at: DateTime<Utc>,
    /// Model that produced the assessment.
    pub model: String,
}

impl RelevanceAssessment {
    /// Placeholder used when the external call fails or its reply is malformed.
    pub fn sentinel(reason: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            score: 0.0,
            priority: Priority::NeedsManualReview,
            rationale: reason.into(),
            recommended_action: NEEDS_MANUAL_REVIEW.to_string(),
            assessed_at: Utc::now(),
            model: model.into(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.priority == Priority::NeedsManualReview
            && self.score == 0.0
            && self.recommended_action == NEEDS_MANUAL_REVIEW
    }
}

// ---------------------------------------------------------------------------
// Opportunity
// ---------------------------------------------------------------------------

/// Where an opportunity was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// The paginated, rendered listing.
    Listing,
    /// The open-data search/record API.
    OpenData,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::OpenData => "open_data",
        }
    }
}

impl std::str::FromStr for Source {
    type Err = TenderScopeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "listing" => Ok(Self::Listing),
            "open_data" => Ok(Self::OpenData),
            other => Err(TenderScopeError::validation(format!(
                "unknown source: {other}"
            ))),
        }
    }
}

/// A procurement opportunity as it moves through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    /// Site-assigned need code (listing) or OCID (open data).
    pub id: String,
    pub source: Source,
    pub need_type: String,
    pub published_at: String,
    pub province_canton: String,
    pub description: String,
    pub status: String,
    /// Submission deadline as published.
    pub deadline: String,
    pub buyer: String,
    pub delivery_address: String,
    pub contact: String,
    /// Detail-page reference, possibly relative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_ref: Option<String>,
    /// Reference budget reported by the record API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
    /// Keyword whose search surfaced this record (open data only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_code: Option<ContractCode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line_items: Vec<LineItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<RelevanceAssessment>,
    /// When this version of the record was produced. Recency key for merges.
    pub produced_at: DateTime<Utc>,
    /// Manual tracking, edited by people and never by a run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Opportunity {
    /// An empty opportunity with only identity fields set.
    pub fn new(id: impl Into<String>, source: Source) -> Self {
        Self {
            id: id.into(),
            source,
            need_type: String::new(),
            published_at: String::new(),
            province_canton: String::new(),
            description: String::new(),
            status: String::new(),
            deadline: String::new(),
            buyer: String::new(),
            delivery_address: String::new(),
            contact: String::new(),
            detail_ref: None,
            budget: None,
            search_keyword: None,
            contract_code: None,
            line_items: Vec::new(),
            category: None,
            matched_keywords: Vec::new(),
            assessment: None,
            produced_at: Utc::now(),
            application_status: None,
            owner: None,
            notes: None,
        }
    }

    pub fn is_assessed(&self) -> bool {
        self.assessment.is_some()
    }

    /// Text sent to the relevance service: description, then line items.
    pub fn scoring_text(&self) -> String {
        let mut text = self.description.trim().to_string();
        for item in &self.line_items {
            let desc = item.description.trim();
            if desc.is_empty() {
                continue;
            }
            text.push_str("\n- ");
            text.push_str(desc);
        }
        text
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Why a page or record was demoted to "skipped".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipReason {
    pub kind: FailureKind,
    pub detail: String,
}

impl SkipReason {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl From<&TenderScopeError> for SkipReason {
    fn from(err: &TenderScopeError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// Result of one pipeline step on one page or record.
#[derive(Debug)]
pub enum Outcome<T> {
    Ok(T),
    Skipped(SkipReason),
    Fatal(TenderScopeError),
}

impl<T> Outcome<T> {
    /// Demote a per-item error: fatal classes stay fatal, the rest are skipped.
    pub fn from_error(err: TenderScopeError) -> Self {
        if err.is_fatal() {
            Self::Fatal(err)
        } else {
            Self::Skipped(SkipReason::from(&err))
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

impl<T> From<crate::Result<T>> for Outcome<T> {
    fn from(result: crate::Result<T>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(e) => Self::from_error(e),
        }
    }
}
