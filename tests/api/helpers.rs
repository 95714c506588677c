use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex};

use async_trait::async_trait;
use bulk_mailer::{
    configuration::DispatchSettings,
    domain::SenderCredentials,
    relay::{MailRelay, OutgoingEmail, RelayError, RelaySession},
    startup::run,
    telemetry::{get_subscriber, init_subscriber},
};
use tokio::net::TcpListener;

// Ensure that the `tracing` stack is only initialised once
static TRACING: LazyLock<()> = LazyLock::new(|| {
    let default_filter_level = "info".to_string();
    let subscriber_name = "test".to_string();
    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::stdout);
        init_subscriber(subscriber);
    } else {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::sink);
        init_subscriber(subscriber);
    }
});

#[derive(Default)]
struct FakeRelayState {
    reject_auth_for: HashSet<String>,
    reject_delivery_to: HashSet<String>,
    sessions: Vec<String>,
    deliveries: Vec<OutgoingEmail>,
}

/// Stands in for the SMTP relay: records every session and delivery, and can
/// be scripted to refuse authentication or individual deliveries.
#[derive(Default)]
pub struct FakeRelay {
    state: Arc<Mutex<FakeRelayState>>,
}

impl FakeRelay {
    pub fn refuse_authentication_for(&self, sender: &str) {
        self.state
            .lock()
            .unwrap()
            .reject_auth_for
            .insert(sender.to_string());
    }

    pub fn refuse_delivery_to(&self, recipient: &str) {
        self.state
            .lock()
            .unwrap()
            .reject_delivery_to
            .insert(recipient.to_string());
    }

    /// Sender emails in the order their sessions were opened.
    pub fn sessions(&self) -> Vec<String> {
        self.state.lock().unwrap().sessions.clone()
    }

    pub fn deliveries(&self) -> Vec<OutgoingEmail> {
        self.state.lock().unwrap().deliveries.clone()
    }
}

#[async_trait]
impl MailRelay for FakeRelay {
    async fn authenticate(
        &self,
        credentials: &SenderCredentials,
    ) -> Result<Box<dyn RelaySession>, RelayError> {
        let mut state = self.state.lock().unwrap();
        if state.reject_auth_for.contains(credentials.email.as_ref()) {
            return Err(RelayError::Authentication(
                "535 authentication credentials invalid".to_string(),
            ));
        }
        state.sessions.push(credentials.email.as_ref().to_owned());
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<FakeRelayState>>,
}

#[async_trait]
impl RelaySession for FakeSession {
    async fn submit(&mut self, email: &OutgoingEmail) -> Result<(), RelayError> {
        let mut state = self.state.lock().unwrap();
        if state.reject_delivery_to.contains(&email.to_email) {
            return Err(RelayError::Delivery(
                "550 mailbox unavailable".to_string(),
            ));
        }
        state.deliveries.push(email.clone());
        Ok(())
    }
}

pub struct TestApp {
    pub address: String,
    pub relay: Arc<FakeRelay>,
    pub api_client: reqwest::Client,
}

impl TestApp {
    pub async fn post_send_emails(&self, body: &serde_json::Value) -> reqwest::Response {
        self.api_client
            .post(format!("{}/send_emails", &self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }
}

pub async fn spawn_app() -> TestApp {
    LazyLock::force(&TRACING);

    let relay = Arc::new(FakeRelay::default());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind a random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let dispatch = DispatchSettings {
        default_quota: 20,
        send_delay_seconds: 0,
    };
    let server = run(listener, relay.clone(), dispatch, Vec::new())
        .await
        .expect("Failed to build the application.");
    tokio::spawn(async move { server.await });

    TestApp {
        address,
        relay,
        api_client: reqwest::Client::new(),
    }
}
