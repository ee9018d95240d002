use mailbrief::storage::{flatten_summary, parse_message_date, Database};
use mailbrief::types::{EventDetail, MailboxMessage, SummaryResult};

const USER: &str = "user@example.com";

fn message(id: &str) -> MailboxMessage {
    MailboxMessage {
        id: id.to_string(),
        from: "alice@example.com".to_string(),
        subject: format!("Subject for {id}"),
        date: "Mon, 10 Mar 2025 09:30:00 +0000".to_string(),
        body: "body text".to_string(),
    }
}

fn result(id: &str) -> SummaryResult {
    SummaryResult {
        external_id: id.to_string(),
        bullet_summary: vec!["point one".to_string(), "point two".to_string()],
        events: Vec::new(),
        links: Vec::new(),
    }
}

#[tokio::test]
async fn persist_is_idempotent() {
    let db = Database::new_in_memory().await.unwrap();
    let messages = vec![message("m1"), message("m2")];
    let results = vec![result("m1"), result("m2")];

    let first = db.persist_batch(&results, &messages, USER).await.unwrap();
    assert_eq!(first, 2);

    let second = db.persist_batch(&results, &messages, USER).await.unwrap();
    assert_eq!(second, 0);

    assert_eq!(db.list_inbox(USER).await.unwrap().len(), 2);
}

#[tokio::test]
async fn existing_row_edits_survive_repersist() {
    let db = Database::new_in_memory().await.unwrap();
    let messages = vec![message("m1")];
    let results = vec![result("m1")];

    db.persist_batch(&results, &messages, USER).await.unwrap();
    assert!(db.set_read("m1", true).await.unwrap());

    // Overlapping batch: the existing row, including the read flag, is left
    // untouched.
    db.persist_batch(&results, &messages, USER).await.unwrap();
    let row = db.load_by_email_id("m1").await.unwrap().unwrap();
    assert!(row.read);
}

#[tokio::test]
async fn summary_without_source_message_is_skipped() {
    let db = Database::new_in_memory().await.unwrap();
    let messages = vec![message("m1")];
    let results = vec![result("m1"), result("orphan")];

    let inserted = db.persist_batch(&results, &messages, USER).await.unwrap();
    assert_eq!(inserted, 1);
    assert!(db.load_by_email_id("orphan").await.unwrap().is_none());
}

#[tokio::test]
async fn trashed_invariant_holds_across_lifecycle() {
    let db = Database::new_in_memory().await.unwrap();
    db.persist_batch(&[result("m1")], &[message("m1")], USER)
        .await
        .unwrap();

    let row = db.load_by_email_id("m1").await.unwrap().unwrap();
    assert!(!row.is_trashed);
    assert!(row.deleted_date.is_none());

    assert!(db.move_to_trash("m1", USER).await.unwrap());
    let row = db.load_by_email_id("m1").await.unwrap().unwrap();
    assert!(row.is_trashed);
    assert!(row.deleted_date.is_some());

    assert!(db.restore_from_trash("m1", USER).await.unwrap());
    let row = db.load_by_email_id("m1").await.unwrap().unwrap();
    assert!(!row.is_trashed);
    assert!(row.deleted_date.is_none());
}

#[tokio::test]
async fn purge_only_touches_trashed_rows() {
    let db = Database::new_in_memory().await.unwrap();
    db.persist_batch(&[result("m1")], &[message("m1")], USER)
        .await
        .unwrap();

    assert!(!db.purge("m1", USER).await.unwrap());
    assert!(db.load_by_email_id("m1").await.unwrap().is_some());

    db.move_to_trash("m1", USER).await.unwrap();
    assert!(db.purge("m1", USER).await.unwrap());
    assert!(db.load_by_email_id("m1").await.unwrap().is_none());
}

#[tokio::test]
async fn empty_trash_reports_deleted_count() {
    let db = Database::new_in_memory().await.unwrap();
    let messages = vec![message("m1"), message("m2"), message("m3")];
    let results = vec![result("m1"), result("m2"), result("m3")];
    db.persist_batch(&results, &messages, USER).await.unwrap();

    db.move_to_trash("m1", USER).await.unwrap();
    db.move_to_trash("m2", USER).await.unwrap();

    assert_eq!(db.empty_trash(USER).await.unwrap(), 2);
    assert_eq!(db.list_inbox(USER).await.unwrap().len(), 1);
    assert!(db.list_trashed(USER).await.unwrap().is_empty());
}

#[tokio::test]
async fn trash_is_scoped_to_the_owning_user() {
    let db = Database::new_in_memory().await.unwrap();
    db.persist_batch(&[result("m1")], &[message("m1")], USER)
        .await
        .unwrap();

    assert!(!db.move_to_trash("m1", "other@example.com").await.unwrap());
    let row = db.load_by_email_id("m1").await.unwrap().unwrap();
    assert!(!row.is_trashed);
}

#[test]
fn flatten_omits_empty_sections() {
    let text = flatten_summary(&result("m1"));
    assert_eq!(text, "Summary:\n- point one\n- point two");
    assert!(!text.contains("Events:"));
    assert!(!text.contains("Links:"));
}

#[test]
fn flatten_renders_events_and_links() {
    let mut full = result("m1");
    full.events.push(EventDetail {
        name: "Standup".to_string(),
        date: "2025-03-11".to_string(),
        time: "09:00".to_string(),
        venue: "Room 4".to_string(),
    });
    full.links.push("https://example.com/doc".to_string());

    let text = flatten_summary(&full);
    assert!(text.starts_with("Summary:\n- point one"));
    assert!(text.contains("\n\nEvents:\n- Standup: 2025-03-11 09:00 at Room 4"));
    assert!(text.contains("\n\nLinks:\n- https://example.com/doc"));
}

#[test]
fn message_dates_parse_with_fallback() {
    assert_eq!(
        parse_message_date("Mon, 10 Mar 2025 09:30:00 +0000"),
        1741599000
    );
    assert_eq!(parse_message_date("2025-03-10T09:30:00+00:00"), 1741599000);

    // Garbage dates fall back to "now" rather than failing the row.
    let now = chrono::Utc::now().timestamp();
    let parsed = parse_message_date("not a date");
    assert!((parsed - now).abs() < 5);
}
