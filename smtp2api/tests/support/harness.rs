//! End-to-end test harness for the gateway
//!
//! Starts a complete gateway on an ephemeral port, with both configured
//! providers pointed at `wiremock` servers, and talks to it over raw SMTP.

use std::{net::SocketAddr, time::Duration};

use serde_json::{Value, json};
use smtp2api::{Config, Gateway};
use smtp2api_common::Signal;
use smtp2api_dispatch::{ProviderConfig, ProviderKind};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::broadcast,
    task::JoinHandle,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const UNISENDER_PATH: &str = "/en/transactional/api/v1/email/send.json";
pub const SENDGRID_PATH: &str = "/v3/mail/send";

pub struct Harness {
    address: SocketAddr,
    shutdown: broadcast::Sender<Signal>,
    server: JoinHandle<()>,

    /// The primary provider
    pub unisender: MockServer,

    /// The failover provider
    pub sendgrid: MockServer,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start a gateway, letting `configure` adjust the configuration first
    pub async fn start_with(configure: impl FnOnce(&mut Config)) -> Self {
        let unisender = MockServer::start().await;
        let sendgrid = MockServer::start().await;

        let mut config = Config::from_ron(
            r#"(
                smtp: (listen: "127.0.0.1:0", banner: "gateway.test", max_message_size: 4096),
                email_defaults: (sender_name: "Gateway", sender_email: "noreply@gateway.test"),
                dispatch: (send_timeout_secs: 5, retry: (retries_per_provider: 1, backoff_ms: 0)),
            )"#,
        )
        .expect("harness configuration");

        config.api_providers = vec![
            ProviderConfig {
                sys_name: String::from("unisender"),
                host_name: unisender.uri(),
                api_key: String::from("uni-key"),
                kind: None,
            },
            ProviderConfig {
                sys_name: String::from("backup"),
                host_name: sendgrid.uri(),
                api_key: String::from("sg-key"),
                kind: Some(ProviderKind::SendGrid),
            },
        ];
        configure(&mut config);

        let gateway = Gateway::bind(&config).await.expect("gateway binds");
        let address = gateway.local_addr().expect("bound address");
        let shutdown = gateway.shutdown_handle();
        let server = tokio::spawn(gateway.serve());

        Self {
            address,
            shutdown,
            server,
            unisender,
            sendgrid,
        }
    }

    pub async fn connect(&self) -> SmtpClient {
        let stream = TcpStream::connect(self.address)
            .await
            .expect("connect to gateway");
        let (reader, writer) = stream.into_split();

        SmtpClient {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Open a connection and complete the greeting and EHLO
    pub async fn greeted(&self) -> SmtpClient {
        let mut client = self.connect().await;
        assert!(client.line().await.starts_with("220 gateway.test"));
        client.send("EHLO client.test").await;
        let ehlo = client.reply().await;
        assert!(ehlo.last().is_some_and(|line| line.starts_with("250 ")));
        client
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(Signal::Shutdown);
        tokio::time::timeout(Duration::from_secs(10), self.server)
            .await
            .expect("gateway stops")
            .expect("gateway task");
    }
}

/// Answer every Unisender call with `status`
pub async fn unisender_responds(server: &MockServer, status: u16) {
    let template = if status == 200 {
        ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "job_id": "job-1",
            "emails": ["rcpt@example.com"],
        }))
    } else {
        ResponseTemplate::new(status).set_body_json(json!({
            "status": "error",
            "message": "provider says no",
        }))
    };

    Mock::given(method("POST"))
        .and(path(UNISENDER_PATH))
        .respond_with(template)
        .mount(server)
        .await;
}

/// Answer every SendGrid call with `status`
pub async fn sendgrid_responds(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path(SENDGRID_PATH))
        .respond_with(ResponseTemplate::new(status).insert_header("X-Message-Id", "sg-1"))
        .mount(server)
        .await;
}

/// JSON bodies of every request `server` received
pub async fn bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| serde_json::from_slice(&request.body).expect("JSON request body"))
        .collect()
}

pub struct SmtpClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl SmtpClient {
    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("write to gateway");
    }

    pub async fn line(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(30), self.reader.read_line(&mut line))
            .await
            .expect("reply within 30 seconds")
            .expect("read from gateway");
        line.trim_end().to_string()
    }

    /// Every line of a (possibly multi-line) reply
    pub async fn reply(&mut self) -> Vec<String> {
        let mut lines = vec![self.line().await];
        while lines
            .last()
            .is_some_and(|line| line.as_bytes().get(3) == Some(&b'-'))
        {
            lines.push(self.line().await);
        }
        lines
    }

    /// Send a command and return the final line of its reply
    pub async fn command(&mut self, line: &str) -> String {
        self.send(line).await;
        self.reply().await.pop().unwrap_or_default()
    }

    /// Run a whole mail transaction, returning the reply to the end of data
    pub async fn mail(&mut self, from: &str, to: &[&str], data: &str) -> String {
        assert_eq!(self.command(&format!("MAIL FROM:<{from}>")).await, "250 Ok");
        for recipient in to {
            assert_eq!(self.command(&format!("RCPT TO:<{recipient}>")).await, "250 Ok");
        }
        assert!(self.command("DATA").await.starts_with("354"));

        for line in data.lines() {
            self.send(line).await;
        }
        self.command(".").await
    }

    /// Whether the gateway closed the connection
    pub async fn closed(&mut self) -> bool {
        let mut rest = String::new();
        matches!(
            tokio::time::timeout(Duration::from_secs(30), self.reader.read_line(&mut rest)).await,
            Ok(Ok(0) | Err(_))
        )
    }
}
