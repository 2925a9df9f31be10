use std::time::Duration;

use tracing::{debug, warn};

use crate::job::{FieldSpec, Record};
use crate::session::PageSession;

pub const DEFAULT_FIELD_TIMEOUT: Duration = Duration::from_secs(10);

/// What one field produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldOutcome {
    pub field_name: String,
    pub value: Option<String>,
    pub warning: Option<String>,
}

impl FieldOutcome {
    fn value(field_name: &str, value: Option<String>) -> Self {
        Self {
            field_name: field_name.to_string(),
            value,
            warning: None,
        }
    }

    fn absent(field_name: &str, warning: String) -> Self {
        Self {
            field_name: field_name.to_string(),
            value: None,
            warning: Some(warning),
        }
    }
}

/// Result of extracting one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageExtraction {
    /// `None` when every field came back absent.
    pub record: Option<Record>,
    pub warnings: Vec<String>,
}

/// Extracts every field of `fields` from the current page.
pub async fn extract<S>(page: &S, fields: &[FieldSpec], timeout: Duration) -> PageExtraction
where
    S: PageSession + ?Sized,
{
    let outcomes = extract_fields(page, fields, timeout).await;
    merge(outcomes)
}

/// Per-field outcomes in field-list order. Fields run one after another on
/// the shared session.
pub async fn extract_fields<S>(
    page: &S,
    fields: &[FieldSpec],
    timeout: Duration,
) -> Vec<FieldOutcome>
where
    S: PageSession + ?Sized,
{
    let mut outcomes = Vec::with_capacity(fields.len());
    for spec in fields {
        let outcome = extract_field(page, spec, timeout).await;
        if let Some(w) = &outcome.warning {
            warn!("Field `{}` left empty: {}", outcome.field_name, w);
        }
        outcomes.push(outcome);
    }
    outcomes
}

async fn extract_field<S>(page: &S, spec: &FieldSpec, timeout: Duration) -> FieldOutcome
where
    S: PageSession + ?Sized,
{
    let name = spec.field_name.as_str();
    let selector = spec.css_selector.trim();
    if selector.is_empty() {
        return FieldOutcome::absent(name, "selector is empty".to_string());
    }

    debug!("Waiting for `{}` ({})", selector, name);
    if let Err(e) = page.wait_for_selector(selector, timeout).await {
        return FieldOutcome::absent(name, format!("`{}` did not appear: {}", selector, e));
    }

    match page.query_text(selector).await {
        Ok(Some(text)) => FieldOutcome::value(name, normalize(&text)),
        Ok(None) => FieldOutcome::absent(name, format!("`{}` vanished before it was read", selector)),
        Err(e) => FieldOutcome::absent(name, format!("reading `{}` failed: {}", selector, e)),
    }
}

fn normalize(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn merge(outcomes: Vec<FieldOutcome>) -> PageExtraction {
    let mut record = Record::new();
    let mut warnings = Vec::new();
    for outcome in outcomes {
        record.insert(outcome.field_name, outcome.value);
        warnings.extend(outcome.warning);
    }
    PageExtraction {
        record: record.has_data().then_some(record),
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fixture::{FixtureLauncher, FixtureState};
    use crate::session::{PageSession, SessionLauncher, SessionOptions, WaitUntil};

    const TIMEOUT: Duration = Duration::from_millis(50);

    async fn loaded(state: FixtureState) -> impl PageSession {
        let session = FixtureLauncher::new(state)
            .launch(&SessionOptions::default())
            .await
            .unwrap();
        session
            .navigate("https://example.com", WaitUntil::NetworkIdle)
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn reads_trimmed_first_match() {
        let page = loaded(FixtureState::with_pages([
            "<h1>\n  Hello  </h1><p class='p'>one</p><p class='p'>two</p>",
        ]))
        .await;
        let fields = [FieldSpec::new("title", "h1"), FieldSpec::new("para", "p.p")];

        let out = extract(&page, &fields, TIMEOUT).await;
        let record = out.record.unwrap();
        assert_eq!(record.get("title"), Some("Hello"));
        assert_eq!(record.get("para"), Some("one"));
        assert!(out.warnings.is_empty());
    }

    #[tokio::test]
    async fn failing_field_does_not_affect_others() {
        let page = loaded(FixtureState::with_pages(["<h1>Hello</h1><span>x</span>"])).await;
        let fields = [
            FieldSpec::new("missing", ".nope"),
            FieldSpec::new("title", "h1"),
            FieldSpec::new("blank", "   "),
            FieldSpec::new("broken", "div[["),
        ];

        let outcomes = extract_fields(&page, &fields, TIMEOUT).await;
        let names: Vec<_> = outcomes.iter().map(|o| o.field_name.as_str()).collect();
        assert_eq!(names, ["missing", "title", "blank", "broken"]);
        assert_eq!(outcomes[0].value, None);
        assert!(outcomes[0].warning.is_some());
        assert_eq!(outcomes[1].value.as_deref(), Some("Hello"));
        assert!(outcomes[1].warning.is_none());
        assert!(outcomes[2].warning.is_some());
        assert!(outcomes[3].warning.is_some());
    }

    #[tokio::test]
    async fn text_read_failure_is_absorbed() {
        let mut state = FixtureState::with_pages(["<h1>Hello</h1><b>bold</b>"]);
        state.broken_text = Some("b".into());
        let page = loaded(state).await;
        let fields = [FieldSpec::new("bold", "b"), FieldSpec::new("title", "h1")];

        let out = extract(&page, &fields, TIMEOUT).await;
        let record = out.record.unwrap();
        assert_eq!(record.get("bold"), None);
        assert_eq!(record.get("title"), Some("Hello"));
        assert_eq!(out.warnings.len(), 1);
    }

    #[tokio::test]
    async fn all_absent_page_yields_no_record() {
        let page = loaded(FixtureState::with_pages(["<h1>   </h1>"])).await;
        let fields = [FieldSpec::new("title", "h1"), FieldSpec::new("price", ".price")];

        let out = extract(&page, &fields, TIMEOUT).await;
        assert_eq!(out.record, None);
        assert_eq!(out.warnings.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_names_keep_last_value() {
        let page = loaded(FixtureState::with_pages(["<h1>A</h1><h2>B</h2>"])).await;
        let fields = [FieldSpec::new("t", "h1"), FieldSpec::new("t", "h2")];

        let record = extract(&page, &fields, TIMEOUT).await.record.unwrap();
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("t"), Some("B"));
    }
}
