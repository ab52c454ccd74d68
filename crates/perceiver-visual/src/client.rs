//! Vision locator port, prompt construction and response parsing.

use async_trait::async_trait;
use relocator_core_types::{Point, Rect, Viewport};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::VisionError;
use crate::models::{VisionQuery, VisionResult};

#[async_trait]
pub trait VisionLocator: Send + Sync {
    /// Locate the described element in the query screenshot.
    async fn locate(
        &self,
        query: &VisionQuery,
        cancel: &CancellationToken,
    ) -> Result<VisionResult, VisionError>;

    fn name(&self) -> &str {
        "vision"
    }
}

pub fn build_prompt(query: &VisionQuery) -> String {
    let Viewport { width, height } = query.viewport;
    let mut prompt = format!(
        "You are analyzing a webpage screenshot to locate a specific element.\n\n\
         **Target Element:** {}\n\n\
         **Viewport Size:** {width}x{height}\n\n",
        query.description
    );

    let mut section = |title: &str, lines: Vec<String>| {
        if lines.is_empty() {
            return;
        }
        prompt.push_str(&format!("**{title}:**\n"));
        for line in lines {
            prompt.push_str(&format!("- {line}\n"));
        }
        prompt.push('\n');
    };
    section("Visual Cues", query.visual_cues.clone());
    section("Nearby Elements (for reference)", query.nearby_elements.clone());
    section(
        "Expected Properties",
        query
            .expected
            .iter()
            .map(|(key, value)| format!("{key}: {value}"))
            .collect(),
    );

    prompt.push_str(
        "**Your Task:**\n\
         1. Locate the target element in the screenshot\n\
         2. Provide the center coordinates [x, y] in pixels\n\
         3. Provide the bounding box [x, y, width, height]\n\
         4. Rate your confidence (0.0 to 1.0)\n\
         5. Suggest the best CSS selector or XPath to find this element\n\
         6. Explain your reasoning\n\n\
         **Response Format (JSON):**\n\
         ```json\n\
         {\n\
           \"found\": true/false,\n\
           \"coordinates\": [x, y],\n\
           \"bounding_box\": {\"x\": int, \"y\": int, \"width\": int, \"height\": int},\n\
           \"confidence\": 0.0-1.0,\n\
           \"element_description\": \"Detailed description of what you see\",\n\
           \"suggested_locator\": {\"type\": \"css/xpath/id/class\", \"value\": \"selector string\"},\n\
           \"reasoning\": \"Why you think this is the correct element\"\n\
         }\n\
         ```\n\n",
    );
    prompt.push_str(&format!(
        "**Important:**\n\
         - Coordinates must be within viewport bounds (0 to {width}, 0 to {height})\n\
         - Be precise with coordinates (center of clickable area)\n\
         - Provide actionable selector in suggested_locator\n"
    ));
    prompt
}

/// First JSON object in free-form model output: the whole text when it
/// parses as-is, else a fenced block, else the first balanced `{...}`.
pub fn extract_json_object(raw: &str) -> Option<String> {
    let whole = raw.trim();
    if whole.starts_with('{') && serde_json::from_str::<Value>(whole).is_ok() {
        return Some(whole.to_string());
    }

    let fence = "```";
    if let Some(start) = raw.find(fence) {
        let after_fence = &raw[start + fence.len()..];
        let after_lang = after_fence.trim_start_matches(|c: char| c.is_alphanumeric() || c == '_');
        if let Some(end) = after_lang.find(fence) {
            let block = &after_lang[..end];
            if block.contains('{') {
                return Some(trim_symmetric(block));
            }
        }
    }

    let start = raw.find('{')?;
    let rest = &raw[start..];
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in rest.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(trim_symmetric(&rest[..=idx]));
                }
            }
            _ => {}
        }
    }
    None
}

fn trim_symmetric(value: &str) -> String {
    value.trim().trim_matches('`').trim().to_string()
}

/// Finite numbers only; `"NaN"` and `"inf"` strings count as missing.
fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|n: &f64| n.is_finite())
}

fn parse_point(value: &Value) -> Option<Point> {
    match value {
        Value::Array(items) if items.len() >= 2 => Some(Point::new(number(&items[0])?, number(&items[1])?)),
        Value::Object(map) => Some(Point::new(number(map.get("x")?)?, number(map.get("y")?)?)),
        _ => None,
    }
}

fn parse_rect(value: &Value) -> Option<Rect> {
    match value {
        Value::Array(items) if items.len() == 4 => Some(Rect::new(
            number(&items[0])?,
            number(&items[1])?,
            number(&items[2])?,
            number(&items[3])?,
        )),
        Value::Object(map) => Some(Rect::new(
            number(map.get("x")?)?,
            number(map.get("y")?)?,
            number(map.get("width")?)?,
            number(map.get("height")?)?,
        )),
        _ => None,
    }
}

/// `"css: #id"` style string from either a plain string or `{type, value}`.
fn parse_locator(value: &Value) -> Option<String> {
    let locator = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Object(map) => {
            let selector = map.get("value").and_then(Value::as_str)?.trim();
            match map.get("type").and_then(Value::as_str).map(str::trim) {
                Some(kind) if !kind.is_empty() => format!("{kind}: {selector}"),
                _ => selector.to_string(),
            }
        }
        _ => return None,
    };
    (!locator.is_empty()).then_some(locator)
}

fn text_field(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Turn model output into a [`VisionResult`].
pub fn parse_response(raw: &str) -> Result<VisionResult, VisionError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| VisionError::InvalidResponse("no JSON object in response".to_string()))?;
    let data: Value = serde_json::from_str(&json)
        .map_err(|err| VisionError::InvalidResponse(format!("malformed JSON: {err}")))?;
    if !data.is_object() {
        return Err(VisionError::InvalidResponse("response is not an object".to_string()));
    }

    let found = match data.get("found") {
        Some(Value::Bool(found)) => *found,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };
    let confidence = data
        .get("confidence")
        .and_then(number)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);

    Ok(VisionResult {
        found,
        coordinates: data.get("coordinates").and_then(parse_point),
        bounding_box: data.get("bounding_box").and_then(parse_rect),
        confidence,
        reasoning: text_field(&data, "reasoning"),
        element_description: text_field(&data, "element_description"),
        suggested_locator: data.get("suggested_locator").and_then(parse_locator),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use relocator_core_types::Screenshot;

    #[test]
    fn extracts_from_fenced_block() {
        let input = "Here it is:\n```json\n{\"found\": true}\n```";
        assert_eq!(extract_json_object(input).unwrap(), "{\"found\": true}");
    }

    #[test]
    fn extracts_first_balanced_object_ignoring_braces_in_strings() {
        let input = "text { \"reasoning\": \"a } b\", \"x\": {\"y\": 1} } trailing {}";
        assert_eq!(
            extract_json_object(input).unwrap(),
            "{ \"reasoning\": \"a } b\", \"x\": {\"y\": 1} }"
        );
        assert!(extract_json_object("no braces").is_none());
    }

    #[test]
    fn parses_array_coordinates_and_object_locator() {
        let raw = r#"Sure. {"found": true, "coordinates": [1625, 14],
            "bounding_box": {"x": 1600, "y": 0, "width": 50, "height": 28},
            "confidence": 0.92, "element_description": "magnifier button",
            "suggested_locator": {"type": "css", "value": "button.search-button"},
            "reasoning": "Top right search icon"}"#;
        let result = parse_response(raw).unwrap();
        assert!(result.found);
        assert_eq!(result.coordinates, Some(Point::new(1625.0, 14.0)));
        assert_eq!(result.bounding_box, Some(Rect::new(1600.0, 0.0, 50.0, 28.0)));
        assert_eq!(result.suggested_locator.as_deref(), Some("css: button.search-button"));
        assert!((result.confidence - 0.92).abs() < 1e-9);
    }

    #[test]
    fn parses_object_coordinates_and_string_locator() {
        let raw = r##"{"found": false, "coordinates": {"x": "10", "y": 20},
            "confidence": "0.3", "suggested_locator": "#search-btn"}"##;
        let result = parse_response(raw).unwrap();
        assert!(!result.found);
        assert_eq!(result.coordinates, Some(Point::new(10.0, 20.0)));
        assert_eq!(result.suggested_locator.as_deref(), Some("#search-btn"));
    }

    #[test]
    fn object_followed_by_prose_is_still_parsed() {
        let result =
            parse_response("{\"found\": true, \"confidence\": 0.9} hope this helps").unwrap();
        assert!(result.found);
        assert_eq!(result.confidence, 0.9);

        let nested = "{\"found\": true, \"coordinates\": {\"x\": 3, \"y\": 4}}\nLet me know {if} needed";
        let result = parse_response(nested).unwrap();
        assert_eq!(result.coordinates, Some(Point::new(3.0, 4.0)));
    }

    #[test]
    fn garbage_confidence_never_becomes_full_confidence() {
        let nan = parse_response("{\"found\": true, \"confidence\": \"NaN\"}").unwrap();
        assert_eq!(nan.confidence, 0.0);

        let negative = parse_response("{\"found\": true, \"confidence\": -0.4}").unwrap();
        assert_eq!(negative.confidence, 0.0);

        let inflated = parse_response("{\"found\": true, \"confidence\": \"7\"}").unwrap();
        assert_eq!(inflated.confidence, 1.0);

        let result = parse_response("{\"found\": true, \"coordinates\": [\"inf\", 2]}").unwrap();
        assert!(result.coordinates.is_none());
    }

    #[test]
    fn rejects_output_without_json() {
        assert!(matches!(
            parse_response("I could not find it"),
            Err(VisionError::InvalidResponse(_))
        ));
    }

    #[test]
    fn prompt_lists_context_sections() {
        let query = VisionQuery::new(
            "Search button",
            Screenshot::new(vec![1, 2, 3], 1920, 1080),
            Viewport::new(1920, 1080),
        )
        .with_visual_cues(vec!["magnifier icon".to_string()])
        .with_expected("tag", "button");
        let prompt = build_prompt(&query);
        assert!(prompt.contains("**Target Element:** Search button"));
        assert!(prompt.contains("**Viewport Size:** 1920x1080"));
        assert!(prompt.contains("- magnifier icon"));
        assert!(prompt.contains("- tag: button"));
        assert!(!prompt.contains("Nearby Elements"));
    }
}
