use mailbrief::summarize::{fallback_results, parse_results, strip_code_fences};
use mailbrief::types::MailboxMessage;

fn message(id: &str, body: &str) -> MailboxMessage {
    MailboxMessage {
        id: id.to_string(),
        from: "alice@example.com".to_string(),
        subject: "Quarterly review".to_string(),
        date: "Mon, 10 Mar 2025 09:30:00 +0000".to_string(),
        body: body.to_string(),
    }
}

#[test]
fn code_fenced_response_is_parsed() {
    let messages = vec![message("m1", "hello")];
    let content = "```json\n{\"emails\":[{\"id\":1,\"emailId\":\"m1\",\"summary\":[\"x\"],\"events\":[],\"links\":[]}]}\n```";

    let results = parse_results(content, &messages).expect("fenced JSON should parse");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].external_id, "m1");
    assert_eq!(results[0].bullet_summary, vec!["x".to_string()]);
    assert!(results[0].events.is_empty());
    assert!(results[0].links.is_empty());
}

#[test]
fn bare_fences_are_stripped() {
    let content = "```\n{\"emails\":[]}\n```";
    assert_eq!(strip_code_fences(content), "{\"emails\":[]}");
}

#[test]
fn prose_response_fails_parsing() {
    let messages = vec![message("m1", "hello")];
    let content = "Here are your summaries! The first email is about a review.";
    assert!(parse_results(content, &messages).is_none());
}

#[test]
fn hallucinated_ids_are_discarded() {
    let messages = vec![message("m1", "hello"), message("m2", "world")];
    let content = r#"{"emails":[
        {"emailId":"m1","summary":["a"],"events":[],"links":[]},
        {"emailId":"does-not-exist","summary":["b"],"events":[],"links":[]}
    ]}"#;

    let results = parse_results(content, &messages).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].external_id, "m1");
}

#[test]
fn missing_result_fields_default_to_empty() {
    let messages = vec![message("m1", "hello")];
    let content = r#"{"emails":[{"emailId":"m1"}]}"#;

    let results = parse_results(content, &messages).unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].bullet_summary.is_empty());
    assert!(results[0].events.is_empty());
}

#[test]
fn fallback_covers_every_message() {
    let messages = vec![
        message("m1", "first body"),
        message("m2", "second body"),
        message("m3", ""),
    ];

    let results = fallback_results(&messages);
    assert_eq!(results.len(), messages.len());
    for (result, original) in results.iter().zip(&messages) {
        assert_eq!(result.external_id, original.id);
        assert!(!result.bullet_summary.is_empty());
        assert!(result.events.is_empty());
        assert!(result.links.is_empty());
    }
}

#[test]
fn fallback_preview_is_bounded_and_handles_empty_body() {
    let long_body = "x".repeat(500);
    let results = fallback_results(&[message("m1", &long_body), message("m2", "")]);

    let preview = &results[0].bullet_summary[2];
    assert!(preview.starts_with("Content preview: "));
    assert!(preview.len() < 150);

    // Empty body still produces a complete three-line summary.
    assert_eq!(results[1].bullet_summary.len(), 3);
    assert_eq!(results[1].bullet_summary[2], "Content preview: ...");
}
