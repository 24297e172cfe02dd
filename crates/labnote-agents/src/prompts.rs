//! Prompt text for the drafter and judge roles.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever preamble or template
//! content changes, so loop reports can be traced back to the wording that
//! produced them.

use coordination::{extract_section, Draft, TaskContext};

use crate::retrieval::is_no_context;

/// Prompt version. Bump on any preamble or template change.
pub const PROMPT_VERSION: &str = "1.2.0";

/// System prompt shared by every draft model.
pub const DRAFTER_PREAMBLE: &str = "\
You are a specialized scientific assistant. Your task is to generate a comprehensive and \
well-structured response for a specific section of a lab note, using the provided context. \
The response should be clear, detailed, and directly applicable to the experiment. \
Your answer MUST be only the list or method itself, without any extra conversation or explanation.";

/// System prompt for the judge model.
pub const JUDGE_PREAMBLE: &str =
    "You are an expert lab note reviewer. Your output must be a valid JSON array of objects.";

const DRAFT_SEPARATOR: &str = "\n\n---\n\n";

/// Query sent to the context retriever for this task.
pub fn retrieval_query(task: &TaskContext) -> String {
    format!(
        "Find the specific procedure or list of items for the '{}' section of the unit operation '{}' related to the experiment: {}",
        task.section, task.unit, task.query
    )
}

/// User prompt for one generation cycle.
///
/// The context block is omitted when `formatted_context` carries the
/// no-context sentinel; the revision block only appears with non-empty feedback.
pub fn draft_user_prompt(task: &TaskContext, formatted_context: &str, feedback: &str) -> String {
    let inputs = extract_section(&task.source_block, "Input");
    let outputs = extract_section(&task.source_block, "Output");

    let mut prompt = format!(
        "\n- **Experiment Goal**: '{}'\n- **Unit Operation**: '{}'\n- **Section to Write**: '{}'\n- **Inputs**: '{}'\n- **Expected Output**: '{}'\n",
        task.query, task.unit, task.section, inputs, outputs
    );

    if !is_no_context(formatted_context) {
        prompt.push_str(&format!(
            "\n--- **Relevant SOP Context** ---\n{formatted_context}\n---"
        ));
    }

    if !feedback.is_empty() {
        prompt.push_str(&format!(
            "\n**IMPORTANT FEEDBACK FOR REVISION**: {feedback}\nPlease regenerate the content reflecting this feedback."
        ));
    }

    prompt
}

/// Judge prompt embedding every draft, labelled by index and model.
pub fn evaluation_prompt(section: &str, drafts: &[Draft]) -> String {
    let draft_texts = drafts
        .iter()
        .enumerate()
        .map(|(i, d)| format!("**Draft {i} (from {})**:\n{}", d.model, d.content))
        .collect::<Vec<_>>()
        .join(DRAFT_SEPARATOR);

    format!(
        r#"
You are a highly experienced principal investigator reviewing lab notes. Evaluate the following drafts for the '{section}' section of a protocol. For each draft, provide a score (out of 10) and a brief justification based on these criteria:
1.  **Structural Integrity**: Is the format (e.g., Markdown list, numbered steps) clear and well-organized?
2.  **Specificity and Detail**: Does it include specific, quantitative details like reagent concentrations, times, equipment models, etc.?
3.  **SOP Relevance**: How well does it incorporate information from the provided SOP context?

**Format your response strictly as a JSON array, like this example:**
[
  {{"draft_index": 0, "model": "biollama3", "score": 8.5, "justification": "Clear steps, but lacks specific buffer concentrations."}},
  {{"draft_index": 1, "model": "mixtral", "score": 7.0, "justification": "Too generic and misses key details from the SOP."}},
  {{"draft_index": 2, "model": "llama3:70b", "score": 9.2, "justification": "Excellent detail and structure, accurately reflects the SOP."}}
]

--- DRAFTS TO EVALUATE ---
{draft_texts}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::NO_CONTEXT_SENTINEL;
    use coordination::UnitOperation;

    fn task() -> TaskContext {
        TaskContext {
            query: "Clone lacZ into pUC19".into(),
            section: "Method".into(),
            source_block: "### [UHW100 Thermocycling]\n#### Input\n- Purified template DNA\n\n#### Output\n(amplicon)\n".into(),
            unit: UnitOperation {
                id: "UHW100".into(),
                name: "Thermocycling".into(),
            },
        }
    }

    #[test]
    fn test_retrieval_query_names_unit_and_section() {
        assert_eq!(
            retrieval_query(&task()),
            "Find the specific procedure or list of items for the 'Method' section of the unit operation 'UHW100: Thermocycling' related to the experiment: Clone lacZ into pUC19"
        );
    }

    #[test]
    fn test_first_cycle_prompt_has_no_revision_block() {
        let prompt = draft_user_prompt(&task(), NO_CONTEXT_SENTINEL, "");
        assert!(prompt.contains("- **Experiment Goal**: 'Clone lacZ into pUC19'"));
        assert!(prompt.contains("- **Unit Operation**: 'UHW100: Thermocycling'"));
        assert!(prompt.contains("- **Inputs**: '- Purified template DNA'"));
        assert!(prompt.contains("- **Expected Output**: '(not specified)'"));
        assert!(!prompt.contains("Relevant SOP Context"));
        assert!(!prompt.contains("IMPORTANT FEEDBACK"));
    }

    #[test]
    fn test_context_block_included_when_present() {
        let prompt = draft_user_prompt(&task(), "[Source: pcr.md]\nAnneal at 60C.", "");
        assert!(prompt.contains("--- **Relevant SOP Context** ---\n[Source: pcr.md]\nAnneal at 60C.\n---"));
    }

    #[test]
    fn test_feedback_appended_verbatim() {
        let feedback = "The previous drafts were not detailed enough (top score was 7).";
        let prompt = draft_user_prompt(&task(), NO_CONTEXT_SENTINEL, feedback);
        assert!(prompt.ends_with(&format!(
            "**IMPORTANT FEEDBACK FOR REVISION**: {feedback}\nPlease regenerate the content reflecting this feedback."
        )));
    }

    #[test]
    fn test_evaluation_prompt_labels_drafts() {
        let drafts = vec![
            Draft::new("biollama3", "1. Mix"),
            Draft::new("mixtral", "1. Heat"),
        ];
        let prompt = evaluation_prompt("Method", &drafts);
        assert!(prompt.contains("for the 'Method' section"));
        assert!(prompt.contains(
            "**Draft 0 (from biollama3)**:\n1. Mix\n\n---\n\n**Draft 1 (from mixtral)**:\n1. Heat"
        ));
        assert!(prompt.contains(r#"{"draft_index": 0, "model": "biollama3""#));
    }
}
