use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use mailbrief::errors::AppError;
use mailbrief::gmail::GmailClient;
use mailbrief::summarize::Summarizer;
use mailbrief::types::MailboxMessage;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    (listener, base)
}

fn json_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn status_response(status_line: &str) -> String {
    format!("HTTP/1.1 {status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
}

/// Serve `connections` requests, answering each by path. One read per request
/// is enough for the GET/POST bodies these clients send.
fn serve<F>(listener: TcpListener, connections: usize, respond: F)
where
    F: Fn(&str) -> String + Send + 'static,
{
    tokio::spawn(async move {
        for _ in 0..connections {
            let (mut stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let mut buf = [0u8; 8192];
            let n = stream.read(&mut buf).await.unwrap_or(0);
            let req = String::from_utf8_lossy(&buf[..n]);
            let path = req
                .lines()
                .next()
                .and_then(|line| line.split_whitespace().nth(1))
                .unwrap_or("/")
                .to_string();
            let _ = stream.write_all(respond(&path).as_bytes()).await;
        }
    });
}

fn message_json(id: &str) -> String {
    let body = URL_SAFE_NO_PAD.encode(format!("body of {id}"));
    format!(
        r#"{{"id":"{id}","payload":{{"headers":[{{"name":"From","value":"alice@example.com"}},{{"name":"Subject","value":"Subject {id}"}},{{"name":"Date","value":"Mon, 10 Mar 2025 09:30:00 +0000"}}],"body":{{"data":"{body}"}}}}}}"#
    )
}

fn message(id: &str) -> MailboxMessage {
    MailboxMessage {
        id: id.to_string(),
        from: "alice@example.com".to_string(),
        subject: format!("Subject {id}"),
        date: "Mon, 10 Mar 2025 09:30:00 +0000".to_string(),
        body: "body text".to_string(),
    }
}

fn summarizer(base: String, timeout_secs: u64) -> Summarizer {
    std::env::set_var("OPENROUTER_API_KEY", "test-key");
    Summarizer::new("test-model", timeout_secs)
        .unwrap()
        .with_base_url(base)
}

#[tokio::test]
async fn failed_message_get_is_skipped_without_failing_the_batch() {
    let (listener, base) = bind().await;
    // One listing plus five per-id gets; the get for m3 answers 500.
    serve(listener, 6, |path| {
        if path.starts_with("/?") {
            json_response(
                r#"{"messages":[{"id":"m1"},{"id":"m2"},{"id":"m3"},{"id":"m4"},{"id":"m5"}]}"#,
            )
        } else if path.starts_with("/m3") {
            status_response("500 Internal Server Error")
        } else {
            let id = path.trim_start_matches('/').split('?').next().unwrap();
            json_response(&message_json(id))
        }
    });

    let client = GmailClient::with_base_url(base);
    let labels = vec!["INBOX".to_string()];
    let messages = client.fetch_batch("token", &labels, 5).await.unwrap();

    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2", "m4", "m5"]);
    assert_eq!(messages[0].body, "body of m1");
}

#[tokio::test]
async fn rejected_token_surfaces_as_auth_required() {
    let (listener, base) = bind().await;
    serve(listener, 1, |_| status_response("401 Unauthorized"));

    let client = GmailClient::with_base_url(base);
    let labels = vec!["INBOX".to_string()];
    match client.fetch_batch("revoked-token", &labels, 5).await {
        Err(AppError::AuthRequired) => {}
        other => panic!("expected AuthRequired, got {other:?}"),
    }
}

#[tokio::test]
async fn dropped_gateway_connection_degrades_to_fallback() {
    let (listener, base) = bind().await;
    tokio::spawn(async move {
        // Accept and hang up before sending any response.
        if let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });

    let messages = vec![message("m1"), message("m2")];
    let results = summarizer(base, 5).summarize(&messages).await;

    assert_eq!(results.len(), messages.len());
    for (result, original) in results.iter().zip(&messages) {
        assert_eq!(result.external_id, original.id);
        assert_eq!(result.bullet_summary[0], "Email from: alice@example.com");
    }
}

#[tokio::test]
async fn stalled_gateway_times_out_into_fallback() {
    let (listener, base) = bind().await;
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 8192];
            let _ = stream.read(&mut buf).await;
            // Never answer; the client's timeout has to cut this off.
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    });

    let messages = vec![message("m1")];
    let results = summarizer(base, 1).summarize(&messages).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].external_id, "m1");
    assert!(!results[0].bullet_summary.is_empty());
    assert!(results[0].events.is_empty());
}
