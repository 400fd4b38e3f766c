//! Prompt templates for the five elicitations.
//!
//! Templates use `{name}` placeholders. Rendering is a single pass, so
//! substituted text (rule descriptions, model output) is never re-expanded.

use crate::gateway::Message;

/// Rendered prompt ready for the gateway.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub template_slug: &'static str,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::user(&self.user)]
    }
}

/// A prompt template with `{name}` placeholders.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub body: &'static str,
}

impl PromptTemplate {
    /// Substitute `vars` into the template. Braces whose contents are not a
    /// known variable name are emitted unchanged.
    pub fn render(&self, vars: &[(&str, &str)]) -> PromptInstance {
        let src = self.body;
        let mut out = String::with_capacity(src.len() + vars.iter().map(|(_, v)| v.len()).sum::<usize>());
        let mut rest = src;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let key_end = after.find('}');
            let value = key_end.and_then(|end| {
                let key = &after[..end];
                vars.iter().find(|(k, _)| *k == key).map(|(_, v)| (*v, end))
            });
            match value {
                Some((v, end)) => {
                    out.push_str(v);
                    rest = &after[end + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);

        PromptInstance {
            template_slug: self.slug,
            user: out,
        }
    }
}

// =============================================================================
// Generation
// =============================================================================

pub const GENERATE: PromptTemplate = PromptTemplate {
    slug: "generate_v1",
    body: r#"You are producing labeled data for a binary classification task.

Two worked rules show the expected format.

Rule: Starts with the word "lizard"
True:
- lizard dog cat bird mouse
- lizard apple tree stone bridge
- lizard river valley mountain sky
False:
- dog lizard cat bird mouse
- apple tree stone bridge water
- river valley mountain sky cloud

Rule: Ends with the word "ocean"
True:
- wave sand beach tide ocean
- ship sail wind blue ocean
- coral reef fish deep ocean
False:
- wave sand beach tide pool
- ship sail wind blue water
- coral reef fish deep water

Format requirements:
- Every example is exactly 5 space-separated tokens.
- Every token is a lowercase word or a single digit (0-9).
- True examples satisfy the rule; False examples violate it.

Avoid spurious patterns. The rule must be the only systematic difference between True and False:
- When a rule involves several features, place each feature independently across all 5 positions.
- For "contains X and Y", mix adjacent and distant placements, X before Y and Y before X.
- For a rule about one position, vary every other position as much as possible.
- Vary vocabulary widely in both classes.

Now generate examples for this rule:

Rule: {rule_description}

Produce exactly {per_label} True examples and exactly {per_label} False examples ({total} total).

Return only a JSON array of {total} objects:
[
  {"text": "word1 word2 word3 word4 word5", "label": true},
  {"text": "word1 word2 word3 word4 word5", "label": false}
]"#,
};

// =============================================================================
// Classification
// =============================================================================

pub const CLASSIFY: PromptTemplate = PromptTemplate {
    slug: "classify_v1",
    body: r#"The following inputs are labelled 'True' if they match a pattern and 'False' otherwise. The pattern is known to be very simple and explainable in plain English. Label the remaining inputs according to the pattern.

IMPORTANT: Respond with ONLY the word "True" or "False", nothing else.

{few_shot_examples}
Input: {input}
Label:"#,
};

// =============================================================================
// Articulation
// =============================================================================

/// Marker preceding the one-sentence rule in an articulation.
pub const FINAL_RULE_MARKER: &str = "**FINAL RULE:**";

pub const ARTICULATE: PromptTemplate = PromptTemplate {
    slug: "articulate_v1",
    body: r#"The following inputs are labelled 'True' if they match a pattern and 'False' otherwise. The pattern is known to be very simple and explainable in plain English.

{few_shot_examples}

Question: What is the most likely pattern being used to label the inputs above?

Give your reasoning first. Then, as the very last line, state the pattern in exactly this format:

**FINAL RULE:** [one clear, concise sentence stating the pattern]"#,
};

// =============================================================================
// Judging
// =============================================================================

pub const JUDGE: PromptTemplate = PromptTemplate {
    slug: "judge_v1",
    body: r#"You are deciding whether a model's statement of a classification rule is the same rule as the actual one.

Actual rule:
{actual_rule}

Model's statement:
{articulated_rule}

Two statements match if and only if they select exactly the same set of inputs. Wording, phrasing and how the matched token class is named do not matter. Dropping a necessary condition, adding one, or narrowing the rule does break a match.

Matching:
- Actual: "Contains a digit"
  Statement: "The input is True if it contains a single-digit number (0-9)"
  -> match (same inputs selected)
- Actual: "Starts with the word lizard"
  Statement: "The first word is 'lizard'"
  -> match (same inputs selected)

Not matching:
- Actual: "Contains a digit"
  Statement: "The third word is a digit"
  -> no match (narrower than the actual rule)
- Actual: "Repeats the word frog"
  Statement: "Contains the word frog"
  -> no match (drops the repetition requirement)

Return only a JSON object:
{"match": true or false, "explanation": "one or two sentences"}"#,
};

// =============================================================================
// Training consistency
// =============================================================================

pub const CONSISTENCY: PromptTemplate = PromptTemplate {
    slug: "consistency_v1",
    body: r#"You are checking whether a stated rule agrees with the labeled examples it was derived from.

Stated rule:
{articulated_rule}

Labeled examples ({total} total: {true_count} TRUE, {false_count} FALSE):
{examples}

Apply the stated rule to every example, exactly as written, and compare its verdict with the example's label.

Return only a JSON object:
{
  "matches": <number of examples whose label agrees with the stated rule>,
  "total": {total},
  "mismatches": [
    {
      "example": "<example text>",
      "training_label": "<true or false>",
      "articulation_says": "<true or false>",
      "reason": "<short explanation>"
    }
  ]
}

Check every example. Be precise."#,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_known_keys_only() {
        let p = CLASSIFY.render(&[("few_shot_examples", "Input: a\nLabel: True\n"), ("input", "b c d e f")]);
        assert_eq!(p.template_slug, "classify_v1");
        assert!(p.user.ends_with("Input: a\nLabel: True\n\nInput: b c d e f\nLabel:"));
        assert!(!p.user.contains("{input}"));
    }

    #[test]
    fn json_braces_survive_rendering() {
        let p = JUDGE.render(&[("actual_rule", "Repeats the word frog"), ("articulated_rule", "Contains the word frog")]);
        assert!(p.user.contains(r#"{"match": true or false, "explanation": "one or two sentences"}"#));
        assert!(p.user.contains("Repeats the word frog"));
        assert!(p.user.contains("drops the repetition requirement"));
    }

    #[test]
    fn substituted_values_are_not_reexpanded() {
        let p = JUDGE.render(&[("actual_rule", "{articulated_rule}"), ("articulated_rule", "x")]);
        assert!(p.user.contains("Actual rule:\n{articulated_rule}\n"));
    }

    #[test]
    fn generate_prompt_states_counts() {
        let p = GENERATE.render(&[("rule_description", "contains a digit"), ("per_label", "48"), ("total", "96")]);
        assert!(p.user.contains("Rule: contains a digit"));
        assert!(p.user.contains("exactly 48 True examples and exactly 48 False examples (96 total)"));
        assert_eq!(p.to_messages().len(), 1);
    }

    #[test]
    fn articulation_prompt_carries_marker() {
        assert!(ARTICULATE.body.contains(FINAL_RULE_MARKER));
    }
}
