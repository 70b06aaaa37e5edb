//! Prompt construction: dialogue templates and chat formats
//!
//! Two prompting styles are used across the pipeline:
//!
//! - **Dialogue**: a narrated exchange ending inside an open quote,
//!   `Mary said, "The teacher likes the student", and John replied, "`
//! - **Chat**: the model's own chat markup with a fixed system instruction,
//!   the sentence as the user turn, and either an empty assistant turn
//!   (generation prompt) or an open assistant turn holding a reply prefix.

use std::fmt;

/// System instruction for chat-formatted prompts
pub const INSTRUCTION: &str = "Please respond to the following message as naturally as possible, using a single sentence, as if we were talking to each other. Please keep it short.";

/// Reply prefix used for rejection-primed sampling
pub const REJECTION: &str = "No, that's not true!";

/// Rejection headers scored by the rejection evaluator
pub const NO_HEADER: &str = "No, that's not true!";
pub const HEYWAIT_HEADER: &str = "Hey, wait a minute!";

/// Chat markup families the crate knows how to render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatFormat {
    /// `<|im_start|>role\n...<|im_end|>` (Qwen2, SmolLM2)
    ChatMl,
    /// `<|start_header_id|>role<|end_header_id|>\n\n...<|eot_id|>` (Llama 3)
    Llama3,
}

impl ChatFormat {
    /// Detect the chat format from the special tokens a tokenizer defines
    pub fn detect(has_token: impl Fn(&str) -> bool) -> Option<Self> {
        if has_token("<|start_header_id|>") && has_token("<|eot_id|>") {
            Some(ChatFormat::Llama3)
        } else if has_token("<|im_start|>") && has_token("<|im_end|>") {
            Some(ChatFormat::ChatMl)
        } else {
            None
        }
    }

    /// End-of-turn marker, used as a stop token during sampling
    pub fn end_of_turn(&self) -> &'static str {
        match self {
            ChatFormat::ChatMl => "<|im_end|>",
            ChatFormat::Llama3 => "<|eot_id|>",
        }
    }

    /// Render system + user turns and the assistant turn.
    ///
    /// With `assistant_prefix == None` the output ends with the assistant
    /// header (a generation prompt). With a prefix, the assistant turn is left
    /// open after the prefix so the model continues the same message.
    pub fn render(&self, system: &str, user: &str, assistant_prefix: Option<&str>) -> String {
        match self {
            ChatFormat::ChatMl => {
                let mut out = format!(
                    "<|im_start|>system\n{system}<|im_end|>\n<|im_start|>user\n{user}<|im_end|>\n<|im_start|>assistant\n"
                );
                if let Some(prefix) = assistant_prefix {
                    out.push_str(prefix);
                }
                out
            }
            ChatFormat::Llama3 => {
                let mut out = format!(
                    "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n{}<|eot_id|><|start_header_id|>user<|end_header_id|>\n\n{}<|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n",
                    system.trim(),
                    user.trim()
                );
                if let Some(prefix) = assistant_prefix {
                    out.push_str(prefix.trim());
                }
                out
            }
        }
    }
}

impl fmt::Display for ChatFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatFormat::ChatMl => f.write_str("chatml"),
            ChatFormat::Llama3 => f.write_str("llama3"),
        }
    }
}

/// How a stimulus is turned into model input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    Dialogue,
    Chat(ChatFormat),
}

impl PromptStyle {
    /// Build a prompt where `name1` says `utterance` and `name2` replies.
    ///
    /// `reply` is appended to the dialogue, or becomes the open assistant
    /// message in chat style.
    pub fn build(&self, name1: &str, name2: &str, utterance: &str, reply: Option<&str>) -> String {
        match self {
            PromptStyle::Dialogue => dialogue_prompt(name1, name2, utterance, reply),
            PromptStyle::Chat(format) => format.render(INSTRUCTION, utterance, reply),
        }
    }
}

/// `{name1} said, "{utterance}", and {name2} replied, "` plus the optional reply
pub fn dialogue_prompt(name1: &str, name2: &str, utterance: &str, reply: Option<&str>) -> String {
    let mut out = format!("{name1} said, \"{utterance}\", and {name2} replied, \"");
    if let Some(reply) = reply {
        out.push_str(reply);
    }
    out
}

/// Join a prompt and a sampled continuation with exactly one separating space
pub fn join_continuation(prompt: &str, continuation: &str) -> String {
    if continuation.starts_with(' ') {
        format!("{prompt}{continuation}")
    } else {
        format!("{prompt} {continuation}")
    }
}
