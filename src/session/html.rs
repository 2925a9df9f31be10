use scraper::{Html, Selector};

use super::SessionError;

fn parse_selector(selector: &str) -> Result<Selector, SessionError> {
    Selector::parse(selector).map_err(|_| SessionError::Selector(selector.to_string()))
}

pub fn matches(html: &str, selector: &str) -> Result<bool, SessionError> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let found = document.select(&selector).next().is_some();
    Ok(found)
}

/// Untrimmed text of the first match.
pub fn first_text(html: &str, selector: &str) -> Result<Option<String>, SessionError> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let text = document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>());
    Ok(text)
}

/// Attribute of the first match. The outer `None` means no element matched.
pub fn first_attr(
    html: &str,
    selector: &str,
    attr: &str,
) -> Result<Option<Option<String>>, SessionError> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let value = document
        .select(&selector)
        .next()
        .map(|el| el.value().attr(attr).map(String::from));
    Ok(value)
}
