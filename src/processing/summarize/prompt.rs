//! Prompt assembly, context trimming, and the excerpt fallback.

use crate::completion::CompletionRequest;

use super::SummarySettings;

const SYSTEM_PROMPT: &str = "You are an expert at creating concise, informative summaries.";
const CONTEXT_HEADER: &str = "Previous chunk summaries:\n- ";

/// Rough token estimate: four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Keep the newest summaries whose estimated size fits `budget`, in original order.
pub fn truncate_context(previous: &[String], budget: usize) -> Vec<&str> {
    let mut kept = Vec::new();
    let mut used = 0usize;
    for summary in previous.iter().rev() {
        let estimated = estimate_tokens(summary);
        if used + estimated > budget {
            break;
        }
        used += estimated;
        kept.push(summary.as_str());
    }
    kept.reverse();
    kept
}

/// Render summaries as the context preamble; `None` when there is nothing to show.
pub(crate) fn render_context(summaries: &[&str]) -> Option<String> {
    if summaries.is_empty() {
        None
    } else {
        Some(format!("{CONTEXT_HEADER}{}\n\n", summaries.join("\n- ")))
    }
}

/// Build the provider request for one chunk.
pub fn build_summary_prompt(
    text: &str,
    context: Option<&str>,
    settings: &SummarySettings,
) -> CompletionRequest {
    let fragment: String = text.chars().take(settings.max_input_chars).collect();
    let mut user_prompt = String::new();
    if let Some(context) = context {
        user_prompt.push_str(context);
    }
    user_prompt.push_str(
        "Generate a short and informative summary of the following text suitable for metadata. \
         The summary should be no more than 20 words and clearly reflect the main content and \
         meaning of the passage. Keep mathematical notation as written.\n\n",
    );
    user_prompt.push_str("Text: ");
    user_prompt.push_str(fragment.trim());
    user_prompt.push_str("\n\nSummary:");

    CompletionRequest {
        system_prompt: SYSTEM_PROMPT.to_string(),
        user_prompt,
        temperature: settings.temperature,
        max_tokens: settings.max_tokens,
    }
}

/// First `max_words` words of `text` followed by an ellipsis.
pub fn build_excerpt(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().take(max_words).collect();
    format!("{}...", words.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_newest_summaries_within_budget() {
        let previous = vec![
            "a".repeat(40),
            "b".repeat(40),
            "c".repeat(40),
        ];
        let kept = truncate_context(&previous, 20);
        assert_eq!(kept, vec!["b".repeat(40), "c".repeat(40)]);
        assert!(truncate_context(&previous, 5).is_empty());
    }

    #[test]
    fn prompt_caps_input_and_carries_parameters() {
        let settings = SummarySettings {
            max_input_chars: 10,
            ..SummarySettings::default()
        };
        let context = render_context(&["earlier summary"]);
        let request = build_summary_prompt("0123456789ABCDEF", context.as_deref(), &settings);

        assert!(
            request
                .user_prompt
                .starts_with("Previous chunk summaries:\n- earlier summary\n\n")
        );
        assert!(request.user_prompt.contains("Text: 0123456789\n\nSummary:"));
        assert!(!request.user_prompt.contains('A'));
        assert_eq!(request.max_tokens, 60);
        assert!((request.temperature - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn excerpt_keeps_first_words() {
        let text = (1..=40).map(|n| n.to_string()).collect::<Vec<_>>().join(" ");
        let excerpt = build_excerpt(&text, 30);
        assert!(excerpt.starts_with("1 2 3"));
        assert!(excerpt.ends_with("30..."));
        assert_eq!(build_excerpt("short text", 30), "short text...");
    }

    #[test]
    fn empty_context_renders_nothing() {
        assert!(render_context(&[]).is_none());
    }
}
