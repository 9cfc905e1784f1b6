//! End-to-end tests: SMTP in, provider API calls out.
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use pretty_assertions::assert_eq;
use serde_json::json;
use support::{Harness, bodies, sendgrid_responds, unisender_responds};

const SIMPLE: &str = "From: Shop <shop@example.com>\r\n\
                      To: someone-else@example.com\r\n\
                      Subject: Hello\r\n\
                      X-Campaign: spring\r\n\
                      \r\n\
                      Hello there\r\n\
                      ..this line started with a dot\r\n";

#[tokio::test]
async fn delivered_by_primary_provider() {
    let harness = Harness::start().await;
    unisender_responds(&harness.unisender, 200).await;

    let mut client = harness.greeted().await;
    assert_eq!(
        client
            .mail("shop@example.com", &["rcpt@example.com"], SIMPLE)
            .await,
        "250 Ok: message accepted for delivery"
    );

    let requests = bodies(&harness.unisender).await;
    assert_eq!(requests.len(), 1);

    let message = &requests[0]["message"];
    assert_eq!(message["subject"], "Hello");
    assert_eq!(message["from_email"], "shop@example.com");
    assert_eq!(message["from_name"], "Shop");
    // Envelope recipients win over the To header
    assert_eq!(
        message["recipients"],
        json!([{ "email": "rcpt@example.com" }])
    );
    assert_eq!(message["headers"]["X-Campaign"], "spring");

    let text = message["body"]["plaintext"].as_str().unwrap();
    assert!(text.contains("Hello there"));
    assert!(text.contains("\n.this line started with a dot"));

    assert!(bodies(&harness.sendgrid).await.is_empty());

    assert_eq!(client.command("QUIT").await, "221 Bye");
    harness.shutdown().await;
}

#[tokio::test]
async fn fails_over_after_retrying_server_errors() {
    let harness = Harness::start().await;
    unisender_responds(&harness.unisender, 500).await;
    sendgrid_responds(&harness.sendgrid, 202).await;

    let mut client = harness.greeted().await;
    assert_eq!(
        client
            .mail("shop@example.com", &["rcpt@example.com"], SIMPLE)
            .await,
        "250 Ok: message accepted for delivery"
    );

    assert_eq!(bodies(&harness.unisender).await.len(), 2);

    let requests = bodies(&harness.sendgrid).await;
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0]["personalizations"][0]["to"][0]["email"],
        "rcpt@example.com"
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn rejected_everywhere_is_permanent() {
    let harness = Harness::start().await;
    unisender_responds(&harness.unisender, 400).await;
    sendgrid_responds(&harness.sendgrid, 400).await;

    let mut client = harness.greeted().await;
    let reply = client
        .mail("shop@example.com", &["rcpt@example.com"], SIMPLE)
        .await;
    assert!(reply.starts_with("554 "), "{reply}");
    assert!(!reply.contains("provider says no"));

    // Rejections fail over without retrying
    assert_eq!(bodies(&harness.unisender).await.len(), 1);
    assert_eq!(bodies(&harness.sendgrid).await.len(), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn unavailable_everywhere_is_temporary() {
    let harness = Harness::start().await;
    unisender_responds(&harness.unisender, 503).await;
    sendgrid_responds(&harness.sendgrid, 503).await;

    let mut client = harness.greeted().await;
    let reply = client
        .mail("shop@example.com", &["rcpt@example.com"], SIMPLE)
        .await;
    assert!(reply.starts_with("451 "), "{reply}");

    assert_eq!(bodies(&harness.unisender).await.len(), 2);
    assert_eq!(bodies(&harness.sendgrid).await.len(), 2);

    // The connection stays usable
    assert_eq!(client.command("NOOP").await, "250 Ok");
    harness.shutdown().await;
}

#[tokio::test]
async fn malformed_message_is_rejected_locally() {
    let harness = Harness::start().await;
    unisender_responds(&harness.unisender, 200).await;

    let mut client = harness.greeted().await;
    let reply = client
        .mail("shop@example.com", &["rcpt@example.com"], "Subject: no body separator")
        .await;
    assert!(reply.starts_with("554 "), "{reply}");
    assert!(bodies(&harness.unisender).await.is_empty());

    harness.shutdown().await;
}

#[tokio::test]
async fn oversized_message_then_another_on_same_connection() {
    let harness = Harness::start().await;
    unisender_responds(&harness.unisender, 200).await;

    let mut client = harness.greeted().await;
    let line = format!("{}\r\n", "z".repeat(78));
    let large = format!("Subject: big\r\n\r\n{}", line.repeat(80));

    let reply = client
        .mail("shop@example.com", &["rcpt@example.com"], &large)
        .await;
    assert!(reply.starts_with("552 "), "{reply}");
    assert!(bodies(&harness.unisender).await.is_empty());

    assert_eq!(
        client
            .mail("shop@example.com", &["rcpt@example.com"], SIMPLE)
            .await,
        "250 Ok: message accepted for delivery"
    );
    assert_eq!(bodies(&harness.unisender).await.len(), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn ehlo_advertises_size() {
    let harness = Harness::start().await;

    let mut client = harness.connect().await;
    client.line().await;
    client.send("EHLO client.test").await;

    let reply = client.reply().await;
    assert_eq!(reply[0], "250-gateway.test says hello to client.test");
    assert!(reply.contains(&String::from("250-SIZE 4096")));
    assert_eq!(reply.last().map(String::as_str), Some("250 HELP"));

    harness.shutdown().await;
}

#[tokio::test]
async fn sequence_errors_then_too_many_errors() {
    let harness = Harness::start().await;

    let mut client = harness.connect().await;
    client.line().await;

    assert_eq!(
        client.command("MAIL FROM:<shop@example.com>").await,
        "503 Send HELO/EHLO first"
    );
    assert_eq!(client.command("HELO client.test").await.get(..3), Some("250"));
    assert_eq!(
        client.command("DATA").await,
        "503 Need MAIL before DATA"
    );
    assert_eq!(client.command("FOO").await, "500 Unrecognised command");
    assert_eq!(
        client.command("BAR").await,
        "421 gateway.test too many errors, closing connection"
    );
    assert!(client.closed().await);

    harness.shutdown().await;
}

#[tokio::test]
async fn idle_client_times_out() {
    let harness = Harness::start_with(|config| config.smtp.timeouts.command_secs = 1).await;

    let mut client = harness.greeted().await;
    assert_eq!(
        client.line().await,
        "421 gateway.test Timeout waiting for client"
    );
    assert!(client.closed().await);

    harness.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_idle_sessions() {
    let harness = Harness::start().await;
    let mut client = harness.greeted().await;

    harness.shutdown().await;

    assert_eq!(
        client.line().await,
        "421 gateway.test Server shutting down, closing connection"
    );
    assert!(client.closed().await);
}

#[tokio::test]
async fn attachment_reaches_provider() {
    let harness = Harness::start().await;
    unisender_responds(&harness.unisender, 200).await;

    let message = "From: shop@example.com\r\n\
                   Subject: Invoice\r\n\
                   MIME-Version: 1.0\r\n\
                   Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
                   \r\n\
                   --b1\r\n\
                   Content-Type: text/plain; charset=utf-8\r\n\
                   \r\n\
                   See attached\r\n\
                   --b1\r\n\
                   Content-Type: application/pdf; name=\"invoice.pdf\"\r\n\
                   Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n\
                   Content-Transfer-Encoding: base64\r\n\
                   \r\n\
                   JVBERi0xLjQ=\r\n\
                   --b1--\r\n";

    let mut client = harness.greeted().await;
    assert_eq!(
        client
            .mail("shop@example.com", &["rcpt@example.com"], message)
            .await,
        "250 Ok: message accepted for delivery"
    );

    let requests = bodies(&harness.unisender).await;
    assert_eq!(
        requests[0]["message"]["attachments"],
        json!([{ "type": "application/pdf", "name": "invoice.pdf", "content": "JVBERi0xLjQ=" }])
    );

    harness.shutdown().await;
}
