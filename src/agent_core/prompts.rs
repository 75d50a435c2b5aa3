//! Prompt text for each step of the analysis loop.

/// Verdict format the model is asked to produce.
const VERDICT_SCHEMA: &str = r#"{
  "isPhishing": true | false,
  "confidenceScore": 0-100,
  "suspiciousPoints": ["short finding", "..."],
  "explanation": "why you reached this verdict",
  "riskLevel": "low" | "medium" | "high"
}"#;

/// System prompt for an analysis.
///
/// With tools enabled the model is told it may gather evidence first; the
/// verdict format is the same either way.
pub fn system_prompt(tools_enabled: bool) -> String {
    let mut prompt = String::from(
        "You are an email security analyst. Decide whether the email you are \
         given is a phishing attempt.\n\n\
         Look at the sender and headers, links and their domains, attachments, \
         urgency or threats, requests for credentials or payment, and \
         impersonation of known organisations.\n\n",
    );

    if tools_enabled {
        prompt.push_str(
            "You have analysis tools available. Call them when the email \
             contains links, domains, headers or attachments worth checking. \
             Only call a tool when its result could change your verdict. When \
             you have enough evidence, stop calling tools and answer.\n\n",
        );
    }

    prompt.push_str("Answer with a single JSON object and nothing else, in this format:\n");
    prompt.push_str(VERDICT_SCHEMA);
    prompt
}

/// First user message: the email itself.
pub fn analysis_prompt(email_content: &str) -> String {
    format!(
        "Analyze the following email for phishing.\n\n\
         --- EMAIL START ---\n{email_content}\n--- EMAIL END ---"
    )
}

/// Sent after a round of tool results.
pub fn continue_prompt(round: u32, round_cap: u32) -> String {
    let remaining = round_cap.saturating_sub(round);
    if remaining == 0 {
        return "The tool results are above. No more tool calls are available; \
                reply with your verdict as the JSON object described earlier."
            .to_string();
    }
    format!(
        "The tool results are above (round {round} of at most {round_cap}). \
         If more evidence is needed, call further tools. Otherwise reply with \
         your verdict as the JSON object described earlier."
    )
}

/// Sent when the loop is forced to conclude.
pub fn final_prompt() -> String {
    format!(
        "Based on the email and all tool results above, give your final \
         verdict now. Do not call any tools. Reply with exactly one JSON \
         object in this format:\n{VERDICT_SCHEMA}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_mentions_tools_only_when_enabled() {
        assert!(system_prompt(true).contains("analysis tools"));
        assert!(!system_prompt(false).contains("analysis tools"));
        assert!(system_prompt(false).contains("\"riskLevel\""));
    }

    #[test]
    fn analysis_prompt_wraps_email() {
        let prompt = analysis_prompt("Dear customer, verify your account");
        assert!(prompt.contains("--- EMAIL START ---\nDear customer"));
    }

    #[test]
    fn continue_prompt_reports_remaining_rounds() {
        assert!(continue_prompt(2, 5).contains("round 2 of at most 5"));
        assert!(continue_prompt(5, 5).contains("No more tool calls"));
    }

    #[test]
    fn final_prompt_forbids_tools() {
        let prompt = final_prompt();
        assert!(prompt.contains("Do not call any tools"));
        assert!(prompt.contains("\"isPhishing\""));
    }
}
