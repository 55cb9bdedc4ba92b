use crate::loader::Document;

const QA_PREAMBLE: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

/// Builds the single QA prompt: document texts separated by a blank line,
/// then the question. Nothing is truncated.
pub fn build_stuff_prompt(documents: &[Document], question: &str) -> String {
    let context = documents
        .iter()
        .map(|doc| doc.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "{}\n\n{}\n\nQuestion: {}\nHelpful Answer:",
        QA_PREAMBLE, context, question
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_matches_qa_template() {
        let docs = vec![
            Document::new("name: Bob\nage: 25"),
            Document::new("name: Alice\nage: 30"),
        ];
        let prompt = build_stuff_prompt(&docs, "How old is Bob?");
        assert_eq!(
            prompt,
            "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n\
name: Bob\nage: 25\n\nname: Alice\nage: 30\n\n\
Question: How old is Bob?\nHelpful Answer:"
        );
    }

    #[test]
    fn empty_context_still_asks_the_question() {
        let prompt = build_stuff_prompt(&[], "Anything?");
        assert!(prompt.ends_with("\n\n\n\nQuestion: Anything?\nHelpful Answer:"));
    }
}
