use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// One slot of the fetch rotation: which region/topic a cycle asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchSlot {
    /// ISO 3166 alpha-2 country code, lowercase.
    pub region: String,
    pub topic: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

/// Contents of `config/ingest.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestFile {
    /// Fixed rotation table advanced once per fetch cycle.
    pub slots: Vec<FetchSlot>,
    /// Case-insensitive phrases that mark a candidate as junk for free.
    #[serde(default)]
    pub junk_keywords: Vec<String>,
    /// Domains rejected before any AI call, in addition to learned bans.
    #[serde(default)]
    pub banned_domains: Vec<String>,
    /// Domains whose query strings identify content and survive canonicalization.
    #[serde(default)]
    pub query_domains: Vec<String>,
}

/// Load and validate the ingest configuration from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_ingest_file(path: &Path) -> Result<IngestFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IngestFileIo {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_ingest_file(&content)
}

/// Parse and validate ingest configuration from YAML text.
///
/// # Errors
///
/// Returns `ConfigError` if the text cannot be parsed or fails validation.
pub fn parse_ingest_file(content: &str) -> Result<IngestFile, ConfigError> {
    let mut file: IngestFile =
        serde_yaml::from_str(content).map_err(ConfigError::IngestFileParse)?;
    validate_ingest_file(&file)?;

    for slot in &mut file.slots {
        slot.region = slot.region.trim().to_ascii_lowercase();
        slot.topic = slot.topic.trim().to_ascii_lowercase();
        slot.language = slot.language.trim().to_ascii_lowercase();
    }
    file.banned_domains = normalize_domains(&file.banned_domains);
    file.query_domains = normalize_domains(&file.query_domains);
    file.junk_keywords = file
        .junk_keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();

    Ok(file)
}

fn validate_ingest_file(file: &IngestFile) -> Result<(), ConfigError> {
    if file.slots.is_empty() {
        return Err(ConfigError::Validation(
            "rotation must contain at least one slot".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for slot in &file.slots {
        if slot.region.trim().is_empty() || slot.topic.trim().is_empty() {
            return Err(ConfigError::Validation(
                "rotation slot region and topic must be non-empty".to_string(),
            ));
        }
        let key = (
            slot.region.trim().to_ascii_lowercase(),
            slot.topic.trim().to_ascii_lowercase(),
            slot.language.trim().to_ascii_lowercase(),
        );
        if !seen.insert(key) {
            return Err(ConfigError::Validation(format!(
                "duplicate rotation slot: {}/{}/{}",
                slot.region, slot.topic, slot.language
            )));
        }
    }

    Ok(())
}

fn normalize_domains(domains: &[String]) -> Vec<String> {
    let mut out: Vec<String> = domains
        .iter()
        .map(|d| d.trim().trim_start_matches("www.").to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
slots:
  - region: US
    topic: Business
  - region: gb
    topic: technology
    language: en
junk_keywords:
  - ' Horoscope '
  - ''
banned_domains:
  - www.Spam.example
  - spam.example
query_domains:
  - news.ycombinator.com
";

    #[test]
    fn parse_normalizes_fields() {
        let file = parse_ingest_file(SAMPLE).unwrap();
        assert_eq!(file.slots.len(), 2);
        assert_eq!(file.slots[0].region, "us");
        assert_eq!(file.slots[0].topic, "business");
        assert_eq!(file.slots[0].language, "en");
        assert_eq!(file.junk_keywords, vec!["horoscope"]);
        assert_eq!(file.banned_domains, vec!["spam.example"]);
        assert_eq!(file.query_domains, vec!["news.ycombinator.com"]);
    }

    #[test]
    fn empty_rotation_rejected() {
        let err = parse_ingest_file("slots: []").unwrap_err();
        assert!(err.to_string().contains("at least one slot"));
    }

    #[test]
    fn duplicate_slot_rejected() {
        let yaml = "slots:\n  - {region: us, topic: world}\n  - {region: US, topic: World}\n";
        let err = parse_ingest_file(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate rotation slot"));
    }

    #[test]
    fn blank_topic_rejected() {
        let yaml = "slots:\n  - {region: us, topic: ' '}\n";
        assert!(parse_ingest_file(yaml).is_err());
    }

    #[test]
    fn repository_ingest_file_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/ingest.yaml");
        let file = load_ingest_file(&path).expect("config/ingest.yaml should load");
        assert!(!file.slots.is_empty());
    }
}
