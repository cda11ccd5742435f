//! Prompt templates for orchestrated tasks
//!
//! Builders return the user turn; the session's system prompt is prepended
//! by [`crate::inference::session::ChatSession`].

/// Direct summary of text that fits the context window
pub fn summarize_prompt(text: &str, max_sentences: usize) -> String {
    format!(
        "Summarize the following text in at most {} sentence{}. \
Reply with the summary only.\n\nText:\n{}",
        max_sentences,
        plural(max_sentences),
        text
    )
}

/// Map step: summary of one chunk of a longer document
pub fn chunk_summary_prompt(chunk: &str, index: usize, total: usize) -> String {
    format!(
        "This is part {} of {} of a longer document. \
Summarize it in 1-2 sentences. Reply with the summary only.\n\nText:\n{}",
        index + 1,
        total,
        chunk
    )
}

/// Reduce step: merge partial summaries
pub fn combine_summaries_prompt(partials: &str, max_sentences: usize) -> String {
    format!(
        "Combine these partial summaries of one document into a single summary of \
at most {} sentence{}. Remove repetition. Reply with the summary only.\n\nSummaries:\n{}",
        max_sentences,
        plural(max_sentences),
        partials
    )
}

const CATEGORY_RULES: &str = "Answer with exactly one category name from the list and nothing else.";

/// Single-item categorization
pub fn categorize_prompt(title: &str, url: &str, categories: &[String]) -> String {
    format!(
        "Categorize this page.\n\nTitle: {}\nURL: {}\n\nCategories: {}\n\n{}",
        title,
        url,
        categories.join(", "),
        CATEGORY_RULES
    )
}

/// Numbered batch categorization, one answer line per item
pub fn batch_categorize_prompt<'a, I>(items: I, categories: &[String]) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut prompt = String::from("Categorize each page below.\n\n");
    let mut count = 0usize;
    for (i, (title, url)) in items.into_iter().enumerate() {
        prompt.push_str(&format!("{}. {} ({})\n", i + 1, title, url));
        count = i + 1;
    }
    prompt.push_str(&format!(
        "\nCategories: {}\n\n\
Reply with exactly {} line{}, one per page in the same order, formatted as \
\"<number>. <category>\". Use only category names from the list.",
        categories.join(", "),
        count,
        plural(count)
    ));
    prompt
}

/// Natural-language command to a JSON action
pub fn parse_command_prompt(command: &str, actions: &[String]) -> String {
    format!(
        "Convert the user's command into a JSON object.\n\
The \"action\" field must be one of: {}.\n\
Put any arguments in extra fields (for example \"query\", \"url\" or \"target\").\n\
If the command matches no action, use \"unknown\".\n\
Reply with the JSON object only, no explanation.\n\n\
Command: {}",
        actions.join(", "),
        command
    )
}

/// Question answered strictly from supplied content
pub fn answer_question_prompt(question: &str, content: &str) -> String {
    format!(
        "Answer the question using only the content below. \
If the content does not contain the answer, say that it does not.\n\n\
Content:\n{}\n\nQuestion: {}",
        content, question
    )
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
