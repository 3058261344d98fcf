//! Prompt construction and response parsing for the document pipeline.

use serde::Deserialize;

use crate::apply::profile::UserProfile;
use crate::gateway::extract_json_object;
use crate::jobs::model::{DocumentType, Job};

/// Auditor decision on a draft.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditVerdict {
    Approved,
    /// Specific revision feedback for the next draft.
    Revise(String),
}

/// Build the Thinker drafting prompt.
///
/// `feedback` carries the auditor's revision notes from the previous
/// iteration, when there was one.
pub fn build_draft_prompt(
    doc_type: DocumentType,
    job: &Job,
    profile: &UserProfile,
    research: Option<&str>,
    feedback: Option<&str>,
) -> String {
    let mut prompt = String::with_capacity(2048);

    prompt.push_str(&format!(
        "Write a tailored {} for the position below. Output only the document text, \
         no commentary.\n\n",
        doc_type.label()
    ));
    prompt.push_str(&format!("Position: {} at {}\n", job.title, job.company));

    if !job.description.is_empty() {
        let description: String = job.description.chars().take(6000).collect();
        prompt.push_str(&format!("\nJob description:\n{}\n", description));
    }

    prompt.push_str(&format!("\nCandidate profile:\n{}\n", profile.summary_block()));

    if let Some(research) = research {
        let research: String = research.chars().take(2000).collect();
        prompt.push_str(&format!("\nCompany research:\n{}\n", research));
    }

    if let Some(feedback) = feedback {
        prompt.push_str(&format!(
            "\nA reviewer rejected the previous draft. Address every point:\n{}\n",
            feedback
        ));
    }

    prompt
}

/// Build the Auditor review prompt.
pub fn build_audit_prompt(doc_type: DocumentType, job: &Job, draft: &str) -> String {
    format!(
        "You are reviewing a {} written for the position \"{}\" at {}.\n\
         Check it against these criteria:\n\
         - Tailored to the listing, not generic boilerplate\n\
         - ATS-friendly: plain structure, relevant keywords from the listing\n\
         - Factually consistent with the candidate profile, no invented experience\n\
         - Professional tone, no filler\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"verdict\": \"approved\"}} or {{\"verdict\": \"revise\", \"feedback\": \"...\"}}\n\n\
         Feedback must be specific and actionable (which section, what to change).\n\n\
         Draft:\n{}",
        doc_type.label(),
        job.title,
        job.company,
        draft
    )
}

#[derive(Deserialize)]
struct AuditResponse {
    verdict: String,
    #[serde(default)]
    feedback: String,
}

/// Parse the auditor's response into a verdict.
///
/// Falls back to scanning for an APPROVED token when the model ignores the
/// JSON instruction; anything else unparseable counts as a revision request
/// with the raw response as feedback, so the loop stays bounded.
pub fn parse_audit_response(raw: &str) -> AuditVerdict {
    let json_str = extract_json_object(raw);
    if let Ok(response) = serde_json::from_str::<AuditResponse>(&json_str) {
        return match response.verdict.to_ascii_lowercase().as_str() {
            "approved" | "approve" => AuditVerdict::Approved,
            _ => AuditVerdict::Revise(if response.feedback.is_empty() {
                "Reviewer requested revision without details".to_string()
            } else {
                response.feedback
            }),
        };
    }

    if raw.to_ascii_uppercase().contains("APPROVED") {
        AuditVerdict::Approved
    } else {
        AuditVerdict::Revise(raw.trim().chars().take(500).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        let mut job = Job::new("https://example.com/j/1", "Rust Engineer", "Acme", 80);
        job.description = "We need someone who knows tokio.".into();
        job
    }

    #[test]
    fn draft_prompt_includes_job_and_profile() {
        let job = sample_job();
        let profile = UserProfile {
            name: "Jo Doe".into(),
            email: "jo@example.com".into(),
            title: "Engineer".into(),
            ..Default::default()
        };
        let prompt = build_draft_prompt(DocumentType::Cv, &job, &profile, None, None);
        assert!(prompt.contains("Rust Engineer"));
        assert!(prompt.contains("Acme"));
        assert!(prompt.contains("tokio"));
        assert!(prompt.contains("Jo Doe"));
        assert!(!prompt.contains("reviewer rejected"));
    }

    #[test]
    fn draft_prompt_threads_revision_feedback() {
        let job = sample_job();
        let profile = UserProfile::default();
        let prompt = build_draft_prompt(
            DocumentType::CoverLetter,
            &job,
            &profile,
            None,
            Some("Opening paragraph is generic"),
        );
        assert!(prompt.contains("Opening paragraph is generic"));
    }

    #[test]
    fn parse_approved_json() {
        assert_eq!(
            parse_audit_response(r#"{"verdict": "approved"}"#),
            AuditVerdict::Approved
        );
    }

    #[test]
    fn parse_revise_json_keeps_feedback() {
        let verdict =
            parse_audit_response(r#"{"verdict": "revise", "feedback": "Tighten the summary"}"#);
        assert_eq!(verdict, AuditVerdict::Revise("Tighten the summary".into()));
    }

    #[test]
    fn parse_bare_approved_token() {
        assert_eq!(parse_audit_response("APPROVED — looks good"), AuditVerdict::Approved);
    }

    #[test]
    fn parse_garbage_counts_as_revision() {
        let verdict = parse_audit_response("I am not sure about this one.");
        assert!(matches!(verdict, AuditVerdict::Revise(_)));
    }

    #[test]
    fn parse_markdown_wrapped_json() {
        let raw = "Here you go:\n```json\n{\"verdict\": \"revise\", \"feedback\": \"x\"}\n```";
        assert_eq!(parse_audit_response(raw), AuditVerdict::Revise("x".into()));
    }
}
