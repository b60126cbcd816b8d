//! Tolerant parsing of the planner's JSON task arrays.

use crate::error::LlmError;
use crate::tasks::{TaskNode, generate_task_id};
use serde_json::Value;
use std::collections::HashMap;

/// Strip a wrapping Markdown code fence, with or without a language tag.
/// Models add these despite being told not to.
pub fn strip_json_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence line.
    match body.split_once('\n') {
        Some((first_line, remainder)) if first_line.trim().chars().all(char::is_alphanumeric) => {
            remainder.trim()
        }
        _ => body.trim(),
    }
}

/// Parse the reply into task nodes.
///
/// The reply must be a JSON array of objects, each carrying at least a
/// `kind`. Unknown kinds pass through untouched so new kinds are purely
/// additive. A reply that is not an array of objects is a malformed
/// (retryable) error.
pub fn parse_task_list(reply: &str) -> Result<Vec<TaskNode>, LlmError> {
    let payload = strip_json_fence(reply);
    if payload.is_empty() {
        return Ok(Vec::new());
    }

    let parsed: Value = serde_json::from_str(payload)
        .map_err(|e| LlmError::Malformed(format!("reply is not valid JSON: {e}")))?;
    let Value::Array(items) = parsed else {
        return Err(LlmError::Malformed(
            "reply must be a JSON array of task objects".into(),
        ));
    };

    let mut tasks = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(mut object) = item else {
            return Err(LlmError::Malformed(format!(
                "task #{} is not a JSON object",
                index + 1
            )));
        };

        let kind = object
            .get("kind")
            .and_then(Value::as_str)
            .map(|k| k.trim().to_ascii_lowercase())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LlmError::Malformed(format!("task #{} missing 'kind'", index + 1)))?;

        let id = match object.remove("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => generate_task_id(&kind),
        };

        let depends_on = match object.remove("depends_on") {
            Some(Value::Array(deps)) => deps
                .into_iter()
                .filter_map(|dep| match dep {
                    Value::String(s) => Some(s),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            Some(Value::String(dep)) => vec![dep],
            _ => Vec::new(),
        };

        object.remove("kind");
        tasks.push(
            TaskNode::new(&kind, object)
                .with_id(id)
                .with_depends_on(depends_on),
        );
    }
    Ok(tasks)
}

/// Drop duplicate source identifiers, keeping the last occurrence of each.
pub fn dedupe_by_identifier(tasks: Vec<TaskNode>) -> Vec<TaskNode> {
    let mut last_index: HashMap<String, usize> = HashMap::new();
    for (index, task) in tasks.iter().enumerate() {
        last_index.insert(task.id.clone(), index);
    }
    tasks
        .into_iter()
        .enumerate()
        .filter(|(index, task)| last_index.get(&task.id) == Some(index))
        .map(|(_, task)| task)
        .collect()
}

/// Replace model-chosen identifiers with globally-unique ones, rewriting
/// `depends_on` references consistently.
pub fn assign_generated_ids(tasks: &mut [TaskNode]) {
    let mut mapping: HashMap<String, String> = HashMap::new();
    for task in tasks.iter() {
        mapping
            .entry(task.id.clone())
            .or_insert_with(|| generate_task_id(&task.kind));
    }
    for task in tasks.iter_mut() {
        task.id = mapping[&task.id].clone();
        for dep in &mut task.depends_on {
            if let Some(renamed) = mapping.get(dep) {
                *dep = renamed.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences_with_and_without_language() {
        assert_eq!(strip_json_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_json_fence("```\n[1]\n```"), "[1]");
        assert_eq!(strip_json_fence("  [1] "), "[1]");
        assert_eq!(strip_json_fence("```[1]```"), "[1]");
    }

    #[test]
    fn parses_tasks_preserving_params_and_deps() {
        let reply = r#"[
            {"kind": "send", "id": "s1", "message": "hi"},
            {"kind": "wait", "id": "w1", "duration": 5, "depends_on": ["s1"]},
            {"kind": "somenewkind", "payload": 7}
        ]"#;
        let tasks = parse_task_list(reply).unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].kind, "send");
        assert_eq!(tasks[0].param_str("message"), Some("hi"));
        assert_eq!(tasks[1].depends_on, vec!["s1"]);
        // Unknown kinds pass through for registry dispatch.
        assert_eq!(tasks[2].kind, "somenewkind");
        assert!(tasks[2].id.starts_with("somenewkind-"));
    }

    #[test]
    fn kind_is_case_folded() {
        let tasks = parse_task_list(r#"[{"kind": "Send", "message": "x"}]"#).unwrap();
        assert_eq!(tasks[0].kind, "send");
    }

    #[test]
    fn non_array_reply_is_malformed() {
        assert!(matches!(
            parse_task_list(r#"{"kind": "send"}"#),
            Err(LlmError::Malformed(_))
        ));
        assert!(matches!(
            parse_task_list("[1, 2]"),
            Err(LlmError::Malformed(_))
        ));
        assert!(matches!(
            parse_task_list("not json"),
            Err(LlmError::Malformed(_))
        ));
    }

    #[test]
    fn missing_kind_is_malformed() {
        assert!(matches!(
            parse_task_list(r#"[{"id": "x"}]"#),
            Err(LlmError::Malformed(_))
        ));
    }

    #[test]
    fn empty_reply_is_no_tasks() {
        assert!(parse_task_list("").unwrap().is_empty());
        assert!(parse_task_list("```json\n```").unwrap().is_empty());
    }

    #[test]
    fn dedupe_keeps_last_occurrence() {
        let tasks = parse_task_list(
            r#"[
                {"kind": "send", "id": "a", "message": "first"},
                {"kind": "send", "id": "b", "message": "other"},
                {"kind": "send", "id": "a", "message": "second"}
            ]"#,
        )
        .unwrap();
        let deduped = dedupe_by_identifier(tasks);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[1].id, "a");
        assert_eq!(deduped[1].param_str("message"), Some("second"));
    }

    #[test]
    fn generated_ids_rewrite_dependencies() {
        let mut tasks = parse_task_list(
            r#"[
                {"kind": "send", "id": "one", "message": "x"},
                {"kind": "send", "id": "two", "depends_on": ["one"], "message": "y"}
            ]"#,
        )
        .unwrap();
        assign_generated_ids(&mut tasks);
        assert_ne!(tasks[0].id, "one");
        assert!(tasks[0].id.starts_with("send-"));
        assert_eq!(tasks[1].depends_on, vec![tasks[0].id.clone()]);
    }
}
