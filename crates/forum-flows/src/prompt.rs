//! Plain-text prompt renderer.

use forum_core::{Comment, Discussion, PromptRenderer};

/// Renders prompts from fixed templates.
#[derive(Debug, Clone, Default)]
pub struct PlainPromptRenderer {
    /// Text the model must answer with when it cannot help.
    pub unknown_answer: String,
}

impl PlainPromptRenderer {
    pub fn new(unknown_answer: impl Into<String>) -> Self {
        Self {
            unknown_answer: unknown_answer.into(),
        }
    }
}

impl PromptRenderer for PlainPromptRenderer {
    fn answer_prompt(&self, discussion: &Discussion) -> String {
        format!(
            "You are the community assistant of a developer forum.\n\
             Answer the question below concisely. If you cannot answer it, \
             reply with exactly: {}\n\n\
             Title: {}\n\n{}",
            self.unknown_answer, discussion.title, discussion.content
        )
    }

    fn summary_prompt(&self, discussion: &Discussion) -> String {
        format!(
            "Summarize the following article in at most three sentences. \
             Reply with the summary only.\n\n\
             Title: {}\n\n{}",
            discussion.title, discussion.content
        )
    }

    fn escalation_prompt(&self, bot_comment: &Comment, reply: &Comment) -> String {
        format!(
            "An assistant answered a forum question and a user replied.\n\n\
             Assistant answer:\n{}\n\n\
             User reply:\n{}\n\n\
             Is the user asking to talk to a human, or saying the answer did \
             not solve the problem? Reply with yes or no.",
            bot_comment.content, reply.content
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use forum_core::DiscussionType;
    use uuid::Uuid;

    #[test]
    fn test_answer_prompt_carries_sentinel_and_question() {
        let renderer = PlainPromptRenderer::new("I don't know.");
        let now = Utc::now();
        let discussion = Discussion {
            id: 1,
            uuid: Uuid::nil(),
            user_id: 2,
            kind: DiscussionType::Qa,
            title: "How to pin a future?".to_string(),
            content: "Details".to_string(),
            summary: None,
            rag_id: None,
            accepted_comment_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let prompt = renderer.answer_prompt(&discussion);
        assert!(prompt.contains("I don't know."));
        assert!(prompt.contains("How to pin a future?"));
    }
}
