//! Structured extraction: the model proposes CSS selectors, `scraper` evaluates them.

use crate::aggregate::strip_code_fence;
use html_scraper::{ElementRef, Html, Selector};
use pagemark_core::{format_cost, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Leading characters of the body markup shown to the model.
pub const EXTRACT_HTML_CHARS: usize = 30_000;

pub const EXTRACT_PROMPT: &str = r#"You write CSS extraction plans. The user wants to extract data from a webpage.
Return ONLY JSON, no markdown, no explanation, in this shape:
{"records": "<css selector of one repeated item, or null>",
 "fields": [{"name": "<output key>", "selector": "<css selector>", "attr": "<attribute to read, or null for text>"}]}

With "records", every field selector is relative to one record and the result is a list of objects.
Without "records", every field collects all matches on the page.

Example output for "extract all links":
{"records": "a[href]", "fields": [{"name": "text", "selector": null, "attr": null}, {"name": "href", "selector": null, "attr": "href"}]}"#;

/// One output key and where its value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    /// Relative to the record when the plan has `records`; missing means the record itself.
    #[serde(default)]
    pub selector: Option<String>,
    /// Attribute to read instead of the element text.
    #[serde(default)]
    pub attr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractPlan {
    #[serde(default)]
    pub records: Option<String>,
    pub fields: Vec<FieldRule>,
}

pub fn user_prompt(query: &str, page_html: &str) -> String {
    format!("Extract: \"{query}\"\n\nPage HTML (truncated):\n{page_html}")
}

/// The first `max` chars of `s`.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

fn blank_to_none(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Parse a model reply into a plan. Blank selectors and attributes count as absent.
pub fn parse_plan(content: &str) -> Result<ExtractPlan> {
    let body = strip_code_fence(content);
    let mut plan: ExtractPlan = serde_json::from_str(body)
        .map_err(|e| Error::Parse(format!("extraction plan: {e}")))?;
    plan.records = blank_to_none(plan.records);
    for f in &mut plan.fields {
        f.name = f.name.trim().to_string();
        f.selector = blank_to_none(f.selector.take());
        f.attr = blank_to_none(f.attr.take());
    }
    if plan.fields.is_empty() {
        return Err(Error::Parse("extraction plan has no fields".to_string()));
    }
    if let Some(f) = plan.fields.iter().find(|f| f.name.is_empty()) {
        return Err(Error::Parse(format!(
            "extraction plan field without a name (selector {:?})",
            f.selector
        )));
    }
    Ok(plan)
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| Error::Parse(format!("selector {selector:?}: {e}")))
}

fn read_field(el: ElementRef<'_>, attr: Option<&str>) -> Option<String> {
    match attr {
        Some(a) => el.value().attr(a).map(str::to_string),
        None => Some(
            el.text()
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        ),
    }
}

/// Evaluate `plan` against `page`.
///
/// With `records` the result is an array of objects (missing values are `null`); without
/// it, an object mapping each field name to every value found on the page.
pub fn apply_plan(page: &Html, plan: &ExtractPlan) -> Result<Value> {
    let fields = plan
        .fields
        .iter()
        .map(|f| -> Result<(&FieldRule, Option<Selector>)> {
            let sel = f.selector.as_deref().map(compile).transpose()?;
            Ok((f, sel))
        })
        .collect::<Result<Vec<_>>>()?;

    let Some(records) = plan.records.as_deref() else {
        let mut out = Map::new();
        for (f, sel) in &fields {
            let sel = sel.as_ref().ok_or_else(|| {
                Error::Parse(format!("field {:?} needs a selector without records", f.name))
            })?;
            let values = page
                .select(sel)
                .filter_map(|el| read_field(el, f.attr.as_deref()))
                .map(Value::String)
                .collect();
            out.insert(f.name.clone(), Value::Array(values));
        }
        return Ok(Value::Object(out));
    };

    let records = compile(records)?;
    let rows = page
        .select(&records)
        .map(|item| {
            let mut row = Map::new();
            for (f, sel) in &fields {
                let target = match sel {
                    Some(sel) => item.select(sel).next(),
                    None => Some(item),
                };
                let value = target
                    .and_then(|el| read_field(el, f.attr.as_deref()))
                    .map_or(Value::Null, Value::String);
                row.insert(f.name.clone(), value);
            }
            Value::Object(row)
        })
        .collect();
    Ok(Value::Array(rows))
}

/// Status line for a finished extraction.
pub fn summarize_extract(data: &Value, cost: f64) -> String {
    let (n, noun) = match data {
        Value::Array(rows) => (rows.len(), "record"),
        Value::Object(m) => (
            m.values().filter_map(Value::as_array).map(Vec::len).sum(),
            "value",
        ),
        _ => (0, "value"),
    };
    let plural = if n == 1 { "" } else { "s" };
    let cost_suffix = if cost > 0.0 {
        format!(" ({})", format_cost(cost))
    } else {
        String::new()
    };
    format!("Extracted {n} {noun}{plural}{cost_suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAGE: &str = r#"<html><body>
        <ul>
          <li class="item"><a href="/a">Alpha</a> <span class="price">$3</span></li>
          <li class="item"><a href="/b">Beta
             two</a></li>
        </ul>
        <p>Contact: <a href="mailto:x@y.z">mail</a></p>
    </body></html>"#;

    #[test]
    fn records_become_rows_with_nulls_for_missing_fields() {
        let plan = parse_plan(
            r#"```json
            {"records": "li.item", "fields": [
              {"name": "title", "selector": "a"},
              {"name": "url", "selector": "a", "attr": "href"},
              {"name": "price", "selector": ".price", "attr": ""}
            ]}
            ```"#,
        )
        .unwrap();
        assert_eq!(plan.fields[2].attr, None);
        let data = apply_plan(&Html::parse_document(PAGE), &plan).unwrap();
        assert_eq!(
            data,
            json!([
                {"title": "Alpha", "url": "/a", "price": "$3"},
                {"title": "Beta two", "url": "/b", "price": null}
            ])
        );
        assert_eq!(summarize_extract(&data, 0.0), "Extracted 2 records");
    }

    #[test]
    fn without_records_each_field_collects_every_match() {
        let plan =
            parse_plan(r#"{"fields": [{"name": "links", "selector": "a[href]", "attr": "href"}]}"#)
                .unwrap();
        let data = apply_plan(&Html::parse_document(PAGE), &plan).unwrap();
        assert_eq!(data, json!({"links": ["/a", "/b", "mailto:x@y.z"]}));
        assert_eq!(summarize_extract(&data, 0.002), "Extracted 3 values ($0.0020)");
    }

    #[test]
    fn bad_plans_are_parse_errors() {
        assert!(matches!(parse_plan("return links;"), Err(Error::Parse(_))));
        assert!(matches!(parse_plan(r#"{"fields": []}"#), Err(Error::Parse(_))));
        assert!(matches!(
            parse_plan(r#"{"fields": [{"name": " ", "selector": "a"}]}"#),
            Err(Error::Parse(_))
        ));

        let page = Html::parse_document(PAGE);
        let bad_selector =
            parse_plan(r#"{"fields": [{"name": "x", "selector": "a[["}]}"#).unwrap();
        assert!(matches!(apply_plan(&page, &bad_selector), Err(Error::Parse(_))));
        let unanchored = parse_plan(r#"{"fields": [{"name": "x"}]}"#).unwrap();
        let e = apply_plan(&page, &unanchored).unwrap_err().to_string();
        assert!(e.contains("needs a selector"), "{e}");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert!(user_prompt("links", "<a>").starts_with("Extract: \"links\""));
    }
}
