//! Prompt templates for summarization and grounded answering.

use crate::models::FileMatch;

/// Answer returned without a model call when retrieval finds nothing.
pub const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "I don't have enough information in this repository's index to answer that question.";

/// Which call site's prompt to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptStyle {
    /// Single-shot dashboard Q&A: one user prompt with context and question blocks.
    #[default]
    Qa,
    /// Conversational chat: system prompt with context and question history.
    Chat,
}

impl PromptStyle {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "qa" => Some(PromptStyle::Qa),
            "chat" => Some(PromptStyle::Chat),
            _ => None,
        }
    }
}

/// A fully assembled model request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptParts {
    pub system: Option<String>,
    pub user: String,
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn source_summary_prompt(path: &str, code: &str) -> String {
    format!(
        "You are an expert programmer and senior software engineer who specializes in onboarding \
junior software engineers onto projects. You are onboarding a junior software engineer and \
explaining to them the purpose of the {path} file.

Here is the code:
---
{code}
---

Give a summary of no more than 100 words that explains:
- The main purpose of this file
- Key functionality it implements
- How it fits into the broader system
- Any critical dependencies or patterns to understand"
    )
}

pub fn commit_summary_prompt(diff: &str) -> String {
    format!(
        "You are an expert programmer and you are trying to summarize a git diff.
Reminders about the git diff format:
For every file, there are a few metadata lines, for example:
```
diff --git a/lib/index.js b/lib/index.js
index 0123456..abcdef0 100644
--- a/lib/index.js
+++ b/lib/index.js
```
This means that the file lib/index.js was changed. This is only an example.
In the diff content:
- Lines starting with \"-\" were removed
- Lines starting with \"+\" were added
- Lines without \"-\" or \"+\" are context lines (not part of the change)

INSTRUCTIONS:
1. Create a bullet-point summary (max 5-7 points) of the most significant changes
2. Focus on functional changes over formatting changes
3. For each change, include:
    - A clear description of what changed (function added, bug fixed, etc.)
    - Relevant file path(s) in [square brackets] only when helpful for context
    - If more than 5 files were modified for a single type of change, mention it without listing all files

EXAMPLE SUMMARY:
```
- Raised the amount of returned recordings from `10` to `100` [packages/server/api/routers/recordings.ts], [packages/server/constants.ts]
- Fixed a typo in the github action name [.github/workflows/ci.yml]
- Lowered numeric tolerance for test files
```
Do not include parts of the example in your summary.

Please summarize the following git diff:

{diff}"
    )
}

/// Concatenate matches into the context block shared by both prompt styles.
pub fn context_block(matches: &[FileMatch]) -> String {
    let mut context = String::new();
    for m in matches {
        context.push_str(&format!(
            "source {} \n code content {} \n summary {} \n\n",
            m.path, m.content, m.summary
        ));
    }
    context
}

/// Numbered list of the last `window` previous questions.
pub fn history_block(history: &[String], window: usize) -> String {
    if history.is_empty() || window == 0 {
        return "This is the first question in the conversation.".to_string();
    }
    let start = history.len().saturating_sub(window);
    history[start..]
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}. {}", i + 1, q))
        .collect::<Vec<_>>()
        .join("\n")
}

fn qa_prompt(context: &str, question: &str) -> String {
    format!(
        "You are an AI code assistant who answers questions about the codebase. Your target \
audience is a technical intern or junior software engineer.
The AI code assistant is helpful, honest, and detail oriented. If the question is about the code \
or a specific file, it gives a detailed answer with step by step instructions.

START CONTEXT BLOCK
{context}
END OF CONTEXT BLOCK

START QUESTION BLOCK
{question}
END OF QUESTION BLOCK

The AI assistant takes into account the CONTEXT BLOCK provided above.
If the context does not provide the answer to the question, the AI assistant will answer \
\"I am sorry, I don't know the answer to that question\".
The AI assistant will not invent anything that is not drawn directly from the context.
Answer in markdown syntax, with code snippets if needed. Be as detailed as possible."
    )
}

fn chat_system_prompt(context: &str, history: &str) -> String {
    format!(
        "You are an expert software engineering assistant specializing in explaining and \
answering questions about codebases. Base your answers solely on the provided context and \
conversation history.

## Guidelines
- Address the specific question first, then explain which files inform the answer
- Reference specific files, functions, and classes from the context
- Distinguish direct evidence from reasonable inferences
- Format responses in markdown, with code blocks where relevant

## Context Information
{context}

## User's Question History
{history}

If the provided context does not contain information relevant to the question, clearly state \
that you don't have enough information rather than speculating. Suggest what additional context \
or related files would help answer the question."
    )
}

/// Build the model request for a grounded answer.
pub fn answer_prompt(
    style: PromptStyle,
    question: &str,
    matches: &[FileMatch],
    history: &[String],
    history_window: usize,
) -> PromptParts {
    let context = context_block(matches);
    match style {
        PromptStyle::Qa => PromptParts {
            system: None,
            user: qa_prompt(&context, question),
        },
        PromptStyle::Chat => PromptParts {
            system: Some(chat_system_prompt(
                &context,
                &history_block(history, history_window),
            )),
            user: question.to_string(),
        },
    }
}
