//! Deterministic local responder.

use super::{GenerationRequest, Generator};
use crate::Result;
use crate::features::GENERAL_TOPIC;

const TEMPLATES: [&str; 4] = [
    "I don't have a good answer about {topic} right now. Could you tell me more about what you need?",
    "I'm still learning about {topic}. Can you rephrase or add some detail?",
    "Let me come back to {topic} in a moment. What part matters most to you?",
    "I can't reach my knowledge source for {topic} at the moment. Please try again shortly.",
];

/// Always-available responder used when the generator cannot answer.
///
/// The reply depends only on the topic, so repeated degradations for the same
/// topic read the same.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateResponder;

impl TemplateResponder {
    /// Creates the responder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Renders the reply for a topic.
    #[must_use]
    pub fn respond(&self, topic: &str) -> String {
        let topic = if topic.trim().is_empty() {
            GENERAL_TOPIC
        } else {
            topic.trim()
        };
        let index = topic.bytes().map(usize::from).sum::<usize>() % TEMPLATES.len();
        TEMPLATES[index].replace("{topic}", topic)
    }
}

impl Generator for TemplateResponder {
    fn name(&self) -> &'static str {
        "template"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        Ok(self.respond(request.topic.as_deref().unwrap_or(GENERAL_TOPIC)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    #[test]
    fn test_reply_is_deterministic_and_mentions_topic() {
        let responder = TemplateResponder::new();
        let first = responder.respond("python");
        assert_eq!(first, responder.respond("python"));
        assert!(first.contains("python"));
    }

    #[test]
    fn test_blank_topic_falls_back_to_general() {
        assert!(TemplateResponder.respond("  ").contains(GENERAL_TOPIC));
    }

    #[test]
    fn test_generate_uses_request_topic() {
        let request = GenerationRequest::new("prompt", &GatewayConfig::default()).with_topic("rust");
        let text = TemplateResponder.generate(&request).expect("template never fails");
        assert!(text.contains("rust"));
    }
}
