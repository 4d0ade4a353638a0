use serde_json::{Map, Value};

use crate::domain::{label::clamp_score, Label, ScoreSet};

/// Returns the first balanced `{...}` span in `text`, skipping braces that
/// appear inside JSON strings. Runs in a single pass.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
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
                    let end = start + offset + ch.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Turns a raw model reply into scores.
///
/// Every required label must be a JSON number or the whole reply is rejected.
/// Optional labels are read leniently: numeric strings parse, anything else
/// scores 0. Unknown keys are dropped.
pub fn parse_scores(reply: &str) -> Option<ScoreSet> {
    let candidate = first_json_object(reply)?;
    let object: Map<String, Value> = serde_json::from_str(candidate).ok()?;

    let complete = Label::ALL
        .iter()
        .filter(|label| label.is_required())
        .all(|label| object.get(label.as_str()).is_some_and(Value::is_number));
    if !complete {
        return None;
    }

    let mut scores = ScoreSet::new();
    for label in Label::ALL {
        if let Some(value) = object.get(label.as_str()) {
            scores.insert(label, lenient_score(value));
        }
    }
    Some(scores)
}

fn lenient_score(value: &Value) -> f32 {
    let raw = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    clamp_score(raw as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str =
        r#"{"cynical": 0.7, "sarcastic": 0.2, "aggressive": 0.0, "threatening": 0.1}"#;

    #[test]
    fn finds_object_wrapped_in_prose() {
        let reply = format!("Sure! Here is the analysis:\n{FULL}\nLet me know if you need more.");
        assert_eq!(first_json_object(&reply), Some(FULL));
        let scores = parse_scores(&reply).expect("scores");
        assert_eq!(scores.get(Label::Cynical), Some(0.7));
    }

    #[test]
    fn stops_at_first_balanced_object() {
        let reply = r#"{"a": {"b": 1}} trailing {"c": 2}"#;
        assert_eq!(first_json_object(reply), Some(r#"{"a": {"b": 1}}"#));
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let reply = r#"note {"why": "a } and a \" {", "n": 1} end"#;
        assert_eq!(
            first_json_object(reply),
            Some(r#"{"why": "a } and a \" {", "n": 1}"#)
        );
    }

    #[test]
    fn reply_without_object_yields_none() {
        assert_eq!(first_json_object("no json here"), None);
        assert_eq!(first_json_object("{ never closed"), None);
        assert!(parse_scores("I cannot rate this text.").is_none());
    }

    #[test]
    fn missing_required_label_rejects_reply() {
        let reply = r#"{"cynical": 0.7, "sarcastic": 0.2, "aggressive": 0.0}"#;
        assert!(parse_scores(reply).is_none());
    }

    #[test]
    fn non_numeric_required_label_rejects_reply() {
        let reply = r#"{"cynical": "0.7", "sarcastic": 0.2, "aggressive": 0.0, "threatening": 0.1}"#;
        assert!(parse_scores(reply).is_none());
    }

    #[test]
    fn scores_are_clamped_into_unit_range() {
        let reply = r#"{"cynical": 1.8, "sarcastic": -0.4, "aggressive": 0.5,
            "threatening": 0, "politics": "0.9", "racism": "lots", "extra": 3}"#;
        let scores = parse_scores(reply).expect("scores");
        assert_eq!(scores.get(Label::Cynical), Some(1.0));
        assert_eq!(scores.get(Label::Sarcastic), Some(0.0));
        assert_eq!(scores.get(Label::Aggressive), Some(0.5));
        assert_eq!(scores.get(Label::Politics), Some(0.9));
        assert_eq!(scores.get(Label::Racism), Some(0.0));
        assert_eq!(scores.iter().count(), 6);
        assert!(scores.iter().all(|(_, s)| (0.0..=1.0).contains(&s)));
    }
}
