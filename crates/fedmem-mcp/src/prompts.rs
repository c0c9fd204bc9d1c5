//! Prompt catalog.
//!
//! Small static catalog backing `prompts/list` and `prompts/get`.

use std::collections::HashMap;

use crate::protocol::messages::{
    ContentBlock, GetPromptResult, PromptArgument, PromptDescription, PromptMessage,
};

pub fn list() -> Vec<PromptDescription> {
    vec![
        PromptDescription {
            name: "memory-recap".to_string(),
            description: "Summarize what is stored about a topic across all memory modules."
                .to_string(),
            arguments: vec![PromptArgument {
                name: "topic".to_string(),
                description: "Topic to recap".to_string(),
                required: true,
            }],
        },
        PromptDescription {
            name: "store-guidelines".to_string(),
            description: "Guidance on writing memories that classify and retrieve well."
                .to_string(),
            arguments: vec![],
        },
    ]
}

pub fn get(name: &str, arguments: Option<&HashMap<String, String>>) -> Option<GetPromptResult> {
    match name {
        "memory-recap" => {
            let topic = arguments
                .and_then(|args| args.get("topic"))
                .map(String::as_str)
                .unwrap_or("everything");
            Some(GetPromptResult {
                description: format!("Recap stored memories about: {topic}"),
                messages: vec![user_message(format!(
                    "Search the federated memory for \"{topic}\" with searchMemory, then \
                     summarize the results grouped by module. Mention which modules held \
                     the strongest matches."
                ))],
            })
        }
        "store-guidelines" => Some(GetPromptResult {
            description: "How to store memories that route and retrieve well".to_string(),
            messages: vec![user_message(
                "When storing memories: put the key fact in the first line (it becomes the \
                 title), set metadata.type or metadata.category when you know the topic so \
                 routing is exact, and attach tags for anything you may filter by later. \
                 Let unlabelled content fall through to content-based classification."
                    .to_string(),
            )],
        }),
        _ => None,
    }
}

fn user_message(text: String) -> PromptMessage {
    PromptMessage {
        role: "user".to_string(),
        content: ContentBlock {
            block_type: "text".to_string(),
            text,
        },
    }
}
