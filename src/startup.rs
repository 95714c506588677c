use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    extract::Request,
    http::HeaderValue,
    response::Response,
    routing::{get, post},
    serve::Serve,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use uuid::Uuid;

use crate::{
    configuration::{DispatchSettings, Settings},
    dispatcher::BatchDispatcher,
    relay::{MailRelay, SmtpRelay},
    routes::{health_check, send_emails},
};

pub struct AppState {
    pub dispatcher: BatchDispatcher,
    pub default_quota: usize,
}

pub async fn run(
    listener: TcpListener,
    relay: Arc<dyn MailRelay>,
    dispatch: DispatchSettings,
    allowed_origins: Vec<String>,
) -> anyhow::Result<Serve<TcpListener, Router, Router>> {
    // Wrapped in an Arc pointer to allow cheap cloning of AppState across
    // handlers; the dispatcher itself holds the relay behind another Arc.
    let app_state = Arc::new(AppState {
        default_quota: dispatch.default_quota,
        dispatcher: BatchDispatcher::new(relay, dispatch.send_delay()),
    });

    let origins = allowed_origins
        .iter()
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health_check", get(health_check))
        .route("/send_emails", post(send_emails))
        .with_state(app_state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let request_id = Uuid::new_v4();
                    info_span!(
                        "http_request",
                        method = ?request.method(),
                        uri = ?request.uri(),
                        version = ?request.version(),
                        request_id = ?request_id,
                    )
                })
                .on_response(|response: &Response, latency: Duration, span: &Span| {
                    let status = response.status();
                    let headers = response.headers();
                    span.record("status", &status.as_u16());
                    info!(parent: span, ?status, ?headers, ?latency, "Response sent");
                }),
        );

    Ok(axum::serve(listener, app))
}

pub struct Application {
    port: u16,
    server: Serve<TcpListener, Router, Router>,
}

impl Application {
    // build is the one that invokes the `run()` function
    // then any fn invokes `run_until_stopped`
    pub async fn build(configuration: Settings) -> anyhow::Result<Self> {
        let relay: Arc<dyn MailRelay> = Arc::new(SmtpRelay::new(
            configuration.relay.host.clone(),
            configuration.relay.port,
            configuration.relay.timeout(),
        ));

        let listener = TcpListener::bind(format!(
            "{}:{}",
            configuration.application.host, configuration.application.port
        ))
        .await?;
        let port = listener.local_addr()?.port();

        let server = run(
            listener,
            relay,
            configuration.dispatch,
            configuration.application.allowed_origins,
        )
        .await?;

        Ok(Self { server, port })
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        Ok(self.server.await?)
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
