use scraper::{Html, Selector};

const EXECUTION_SELECTOR: &str = r#"input[name="execution"]"#;

/// Values of every `<input name="execution">` in document order, entity-decoded.
///
/// An input with an empty value yields `""`; one without a `value` attribute is skipped.
/// Empty when the page has none, which happens when an active session is reused.
pub fn find_execution_tokens(html: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(EXECUTION_SELECTOR) else {
        return Vec::new();
    };
    Html::parse_document(html)
        .select(&selector)
        .filter_map(|element| element.value().attr("value"))
        .map(str::to_string)
        .collect()
}
