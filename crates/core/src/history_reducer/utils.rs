//! Index arithmetic shared by the reducers

use crate::contents::{AuthorRole, ChatMessage, FunctionContent};
use std::collections::HashMap;

/// Index of the first message that is not a summary.
///
/// Summaries produced by earlier reductions sit at the head of the history;
/// the returned index is where fresh content begins. Equals `history.len()`
/// when every message is a summary.
pub fn locate_summarization_boundary(history: &[ChatMessage]) -> usize {
    history
        .iter()
        .position(|message| !message.is_summary())
        .unwrap_or(history.len())
}

/// Index at which the history can be cut so that roughly `target_count`
/// messages remain.
///
/// The cut never lands on a message carrying function content, so a call and
/// its result are kept or dropped together. Within the threshold window a
/// user message is preferred as the first retained message. Returns `None`
/// when the history is not long enough past `offset_count` or no safe cut
/// exists.
pub fn locate_safe_reduction_index(
    history: &[ChatMessage],
    target_count: usize,
    threshold_count: usize,
    offset_count: usize,
) -> Option<usize> {
    let total_count = history.len();
    let threshold_index = total_count.checked_sub(threshold_count + target_count)?;
    if threshold_index <= offset_count {
        return None;
    }

    let start = (total_count - target_count).min(total_count - 1);
    let target_index = (offset_count..=start)
        .rev()
        .find(|&index| !history[index].has_function_content())?;

    if target_index >= threshold_index {
        if let Some(user_index) = (threshold_index..=target_index)
            .rev()
            .find(|&index| history[index].role == AuthorRole::User)
        {
            return Some(user_index);
        }
    }

    Some(target_index)
}

/// Pairs of (call index, result index) matched by function call id
pub fn get_call_result_pairs(history: &[ChatMessage]) -> Vec<(usize, usize)> {
    let mut open_calls: HashMap<&str, usize> = HashMap::new();
    let mut pairs = Vec::new();

    for (index, message) in history.iter().enumerate() {
        for item in &message.items {
            match item {
                FunctionContent::Call { id, .. } if !id.is_empty() => {
                    open_calls.insert(id.as_str(), index);
                }
                FunctionContent::Result { id, .. } => {
                    if let Some(call_index) = open_calls.remove(id.as_str()) {
                        pairs.push((call_index, index));
                    }
                }
                _ => {}
            }
        }
    }

    pairs
}

/// Copy `history[start..end]`.
///
/// With `exclude_function_content` every message carrying function content is
/// skipped. With `preserve_pairs` a call or result is only kept when its
/// partner also falls inside the range.
pub fn extract_range(
    history: &[ChatMessage],
    start: usize,
    end: usize,
    exclude_function_content: bool,
    preserve_pairs: bool,
) -> Vec<ChatMessage> {
    let end = end.min(history.len());
    if start >= end {
        return Vec::new();
    }

    let partners: HashMap<usize, usize> = if preserve_pairs {
        get_call_result_pairs(history)
            .into_iter()
            .flat_map(|(call, result)| [(call, result), (result, call)])
            .collect()
    } else {
        HashMap::new()
    };

    (start..end)
        .filter(|&index| {
            let message = &history[index];
            if exclude_function_content && message.has_function_content() {
                return false;
            }
            match partners.get(&index) {
                Some(&partner) => (start..end).contains(&partner),
                None => true,
            }
        })
        .map(|index| history[index].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contents::SUMMARY_METADATA_KEY;
    use serde_json::json;

    fn alternating(count: usize) -> Vec<ChatMessage> {
        (0..count)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("u{i}"))
                } else {
                    ChatMessage::assistant(format!("a{i}"))
                }
            })
            .collect()
    }

    fn call(id: &str) -> ChatMessage {
        ChatMessage::assistant("").with_item(FunctionContent::call(id, "lookup", json!({})))
    }

    fn result(id: &str) -> ChatMessage {
        ChatMessage::tool("").with_item(FunctionContent::result(id, "lookup", json!("ok")))
    }

    #[test]
    fn test_boundary_after_leading_summaries() {
        let mut history = alternating(4);
        assert_eq!(locate_summarization_boundary(&history), 0);

        history[0].metadata.insert(SUMMARY_METADATA_KEY.to_string(), json!(true));
        history[1].metadata.insert(SUMMARY_METADATA_KEY.to_string(), json!(true));
        assert_eq!(locate_summarization_boundary(&history), 2);
    }

    #[test]
    fn test_boundary_all_summaries() {
        let history = vec![ChatMessage::assistant("s").with_metadata(SUMMARY_METADATA_KEY, true)];
        assert_eq!(locate_summarization_boundary(&history), 1);
    }

    #[test]
    fn test_safe_index_prefers_user_message() {
        // u0 a1 u2 a3 u4 a5: start at 3 (assistant), window down to 2 holds a user message
        let history = alternating(6);
        assert_eq!(locate_safe_reduction_index(&history, 3, 1, 0), Some(2));
    }

    #[test]
    fn test_safe_index_without_threshold() {
        let history = alternating(6);
        assert_eq!(locate_safe_reduction_index(&history, 2, 0, 0), Some(4));
        assert_eq!(locate_safe_reduction_index(&history, 3, 0, 0), Some(3));
    }

    #[test]
    fn test_safe_index_too_short() {
        let history = alternating(4);
        assert_eq!(locate_safe_reduction_index(&history, 3, 1, 0), None);
        assert_eq!(locate_safe_reduction_index(&history, 5, 0, 0), None);
        // offset pushes the window out of reach
        assert_eq!(locate_safe_reduction_index(&alternating(6), 3, 1, 2), None);
    }

    #[test]
    fn test_safe_index_skips_function_content() {
        // u0 a1 call2 result3 a4 a5 -> cut at 3 would split the pair; walk back to 1
        let history = vec![
            ChatMessage::user("u0"),
            ChatMessage::assistant("a1"),
            call("c1"),
            result("c1"),
            ChatMessage::assistant("a4"),
            ChatMessage::assistant("a5"),
        ];
        assert_eq!(locate_safe_reduction_index(&history, 3, 0, 0), Some(1));
    }

    #[test]
    fn test_safe_index_no_clean_message() {
        let history = vec![call("c1"), result("c1"), call("c2"), result("c2"), ChatMessage::user("u")];
        assert_eq!(locate_safe_reduction_index(&history, 2, 0, 0), None);
    }

    #[test]
    fn test_call_result_pairs() {
        let history = vec![call("c1"), ChatMessage::user("x"), result("c1"), result("orphan")];
        assert_eq!(get_call_result_pairs(&history), vec![(0, 2)]);
    }

    #[test]
    fn test_extract_range_filters() {
        let history = vec![ChatMessage::user("u0"), call("c1"), result("c1"), ChatMessage::assistant("a3")];

        let plain = extract_range(&history, 0, 4, true, false);
        assert_eq!(plain.len(), 2);
        assert_eq!(plain[1].content, "a3");

        // result outside the range: the call is dropped as well
        let paired = extract_range(&history, 0, 2, false, true);
        assert_eq!(paired, vec![ChatMessage::user("u0")]);

        let both = extract_range(&history, 0, 3, false, true);
        assert_eq!(both.len(), 3);
    }

    #[test]
    fn test_extract_range_empty() {
        assert!(extract_range(&alternating(3), 2, 2, false, false).is_empty());
        assert!(extract_range(&alternating(3), 5, 9, false, false).is_empty());
    }
}
