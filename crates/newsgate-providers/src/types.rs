use newsgate_core::FetchSlot;

const DEFAULT_MAX_RESULTS: u32 = 10;

/// What one provider call asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchParams {
    pub region: String,
    pub topic: String,
    pub language: String,
    pub max_results: u32,
}

impl From<&FetchSlot> for FetchParams {
    fn from(slot: &FetchSlot) -> Self {
        Self {
            region: slot.region.clone(),
            topic: slot.topic.clone(),
            language: slot.language.clone(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

/// Parses provider timestamps: RFC 3339, or `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let raw = raw.trim();
    if let Ok(t) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&chrono::Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|t| t.and_utc())
}

/// Trims a provider string field, mapping blanks to `None`.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
