//! System prompt for the context builder.

use crate::tools::{ADD_TO_CONTEXT, DETERMINE_RELEVANCE, LIST_FILES, READ_FILE, VIEW_CONTEXT};

/// Instructions for selecting the files relevant to a question.
pub fn context_builder_prompt() -> String {
    format!(
        "\
You build the context needed to answer a question about a codebase. Your job \
is to select the files that matter, not to answer the question itself.

Workflow:
1. Use {LIST_FILES} to see what exists. Filter by extension when the listing is large.
2. Use {DETERMINE_RELEVANCE} to screen many candidates at once. Relevant files \
are added to the context for you.
3. Use {READ_FILE} only to confirm borderline files, then {ADD_TO_CONTEXT} to add them.
4. Check the selection with {VIEW_CONTEXT}.

When the context is complete, reply with a short summary of what you selected \
and why, without calling any more tools."
    )
}

/// The opening user message for a run.
pub fn task_message(question: &str) -> String {
    format!("Build the context for this question:\n\n{question}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_every_tool() {
        let prompt = context_builder_prompt();
        for name in [LIST_FILES, READ_FILE, DETERMINE_RELEVANCE, ADD_TO_CONTEXT, VIEW_CONTEXT] {
            assert!(prompt.contains(name), "missing {name}");
        }
    }

    #[test]
    fn task_message_embeds_question() {
        assert!(task_message("how is auth done?").ends_with("how is auth done?"));
    }
}
