use std::collections::HashSet;
use std::path::Path;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use url::Url;

/// One named CSS selector to read per page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub field_name: String,
    pub css_selector: String,
}

impl FieldSpec {
    pub fn new(field_name: impl Into<String>, css_selector: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            css_selector: css_selector.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<i64>,
}

impl PaginationPolicy {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn next(selector: impl Into<String>, max_pages: i64) -> Self {
        Self {
            enabled: true,
            next_selector: Some(selector.into()),
            max_pages: Some(max_pages),
        }
    }

    /// Number of page visits allowed. Never below one.
    pub fn effective_max_pages(&self) -> usize {
        if !self.enabled {
            return 1;
        }
        let max = self.max_pages.unwrap_or(1).max(1);
        usize::try_from(max).unwrap_or(usize::MAX)
    }

    /// The next-page selector, if pagination can advance at all.
    pub fn active_next_selector(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.next_selector
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionJob {
    pub target_url: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub pagination: PaginationPolicy,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("target URL `{0}` is not a valid http(s) URL")]
    InvalidUrl(String),
    #[error("at least one field is required")]
    NoFields,
    #[error("field #{0} has an empty name")]
    EmptyFieldName(usize),
    #[error("field `{0}` has an empty selector")]
    EmptySelector(String),
    #[error("field name `{0}` is used more than once")]
    DuplicateField(String),
    #[error("pagination is enabled but no next-page selector is set")]
    MissingNextSelector,
    #[error("pagination is enabled but no page limit is set")]
    MissingMaxPages,
    #[error("page limit must be at least 1, got {0}")]
    InvalidMaxPages(i64),
}

impl ExtractionJob {
    pub fn new(target_url: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            target_url: target_url.into(),
            fields,
            pagination: PaginationPolicy::disabled(),
        }
    }

    pub fn with_pagination(mut self, pagination: PaginationPolicy) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid job file {}", path.display()))
    }

    /// Checks done before a job is handed to the walker. The walker itself
    /// tolerates jobs that fail these.
    pub fn validate(&self) -> Result<(), JobError> {
        match Url::parse(&self.target_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => return Err(JobError::InvalidUrl(self.target_url.clone())),
        }

        if self.fields.is_empty() {
            return Err(JobError::NoFields);
        }
        let mut names = HashSet::new();
        for (i, field) in self.fields.iter().enumerate() {
            let name = field.field_name.trim();
            if name.is_empty() {
                return Err(JobError::EmptyFieldName(i + 1));
            }
            if field.css_selector.trim().is_empty() {
                return Err(JobError::EmptySelector(name.to_string()));
            }
            if !names.insert(name) {
                return Err(JobError::DuplicateField(name.to_string()));
            }
        }

        let p = &self.pagination;
        if p.enabled {
            if p.active_next_selector().is_none() {
                return Err(JobError::MissingNextSelector);
            }
            match p.max_pages {
                None => return Err(JobError::MissingMaxPages),
                Some(n) if n < 1 => return Err(JobError::InvalidMaxPages(n)),
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// One extracted row. Keeps field-list order; a repeated name overwrites
/// the earlier value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, Option<String>)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn has_data(&self) -> bool {
        self.fields.iter().any(|(_, v)| v.is_some())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_deref()))
    }
}

impl<K: Into<String>> FromIterator<(K, Option<String>)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, Option<String>)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Records in page-visit order.
pub type RunResult = Vec<Record>;

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ExtractionJob {
        ExtractionJob::new(
            "https://example.com/list",
            vec![FieldSpec::new("title", "h1"), FieldSpec::new("price", ".price")],
        )
    }

    #[test]
    fn parses_camel_case_job() {
        let job = ExtractionJob::from_json(
            r#"{
                "targetUrl": "https://example.com/list",
                "fields": [{"fieldName": "title", "cssSelector": "h1"}],
                "pagination": {"enabled": true, "nextSelector": "a.next", "maxPages": 3}
            }"#,
        )
        .unwrap();
        assert_eq!(job.fields[0], FieldSpec::new("title", "h1"));
        assert_eq!(job.pagination, PaginationPolicy::next("a.next", 3));
        assert!(job.validate().is_ok());
    }

    #[test]
    fn pagination_defaults_to_disabled() {
        let job = ExtractionJob::from_json(
            r#"{"targetUrl": "https://example.com", "fields": [{"fieldName": "t", "cssSelector": "h1"}]}"#,
        )
        .unwrap();
        assert!(!job.pagination.enabled);
        assert_eq!(job.pagination.effective_max_pages(), 1);
    }

    #[test]
    fn effective_max_pages_is_never_zero() {
        assert_eq!(PaginationPolicy::next("a", 5).effective_max_pages(), 5);
        assert_eq!(PaginationPolicy::next("a", 0).effective_max_pages(), 1);
        assert_eq!(PaginationPolicy::next("a", -4).effective_max_pages(), 1);

        let mut no_limit = PaginationPolicy::next("a", 1);
        no_limit.max_pages = None;
        assert_eq!(no_limit.effective_max_pages(), 1);

        let mut off = PaginationPolicy::next("a", 9);
        off.enabled = false;
        assert_eq!(off.effective_max_pages(), 1);
        assert_eq!(off.active_next_selector(), None);
    }

    #[test]
    fn validation_rules() {
        assert_eq!(job().validate(), Ok(()));

        let mut bad = job();
        bad.target_url = "not a url".into();
        assert_eq!(bad.validate(), Err(JobError::InvalidUrl("not a url".into())));

        let mut bad = job();
        bad.target_url = "ftp://example.com".into();
        assert!(matches!(bad.validate(), Err(JobError::InvalidUrl(_))));

        let mut bad = job();
        bad.fields.clear();
        assert_eq!(bad.validate(), Err(JobError::NoFields));

        let mut bad = job();
        bad.fields.push(FieldSpec::new("title", "h2"));
        assert_eq!(bad.validate(), Err(JobError::DuplicateField("title".into())));

        let mut bad = job();
        bad.fields[1].css_selector = "  ".into();
        assert_eq!(bad.validate(), Err(JobError::EmptySelector("price".into())));

        let mut bad = job();
        bad.fields[0].field_name = "".into();
        assert_eq!(bad.validate(), Err(JobError::EmptyFieldName(1)));

        let bad = job().with_pagination(PaginationPolicy {
            enabled: true,
            next_selector: None,
            max_pages: Some(2),
        });
        assert_eq!(bad.validate(), Err(JobError::MissingNextSelector));

        let bad = job().with_pagination(PaginationPolicy {
            enabled: true,
            next_selector: Some("a.next".into()),
            max_pages: None,
        });
        assert_eq!(bad.validate(), Err(JobError::MissingMaxPages));

        let bad = job().with_pagination(PaginationPolicy::next("a.next", 0));
        assert_eq!(bad.validate(), Err(JobError::InvalidMaxPages(0)));
    }

    #[test]
    fn record_overwrites_duplicates_in_place() {
        let mut r = Record::new();
        r.insert("a", Some("1".into()));
        r.insert("b", None);
        r.insert("a", Some("2".into()));
        assert_eq!(r.len(), 2);
        assert_eq!(r.get("a"), Some("2"));
        assert_eq!(r.get("b"), None);
        assert!(r.has_data());

        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"{"a":"2","b":null}"#);
    }

    #[test]
    fn all_absent_record_has_no_data() {
        let r: Record = [("a", None), ("b", None)].into_iter().collect();
        assert!(!r.has_data());
    }
}
