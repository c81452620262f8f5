use std::{io::ErrorKind, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
};
use tracing::{info, warn};

use hydro_common::{
    CommandInbox, HttpCommand, HttpReply, RuntimeConfig, Scheduler, SystemClock, TransportAdapter,
    WirelessLink,
};

use crate::links::{ChannelInbox, DriverLink, FileStore, UdpWireless};

/// How long an HTTP client waits for the control loop to pick up its command.
const COMMAND_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

type CommandQueue = mpsc::UnboundedSender<HttpCommand>;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_runtime_config()?;

    let driver = DriverLink::open(&config.serial).context("failed to open driver serial port")?;
    let transport = TransportAdapter::new(
        driver,
        config.serial.response_timeout(),
        config.serial.read_buffer_bytes,
    );
    let store = FileStore::new(&config.data_dir);
    let scheduler = Scheduler::new(&config.control, store, transport, SystemClock);

    let mut wireless = if config.wireless.enabled {
        let link = UdpWireless::bind(&config.wireless.bind_addr, config.wireless.max_chunk_bytes)
            .with_context(|| {
                format!(
                    "failed to bind wireless endpoint at {}",
                    config.wireless.bind_addr
                )
            })?;
        info!("wireless endpoint listening on {}", link.local_addr()?);
        Some(link)
    } else {
        None
    };

    let mut inbox = None;
    if config.http.enabled {
        let (queue, rx) = mpsc::unbounded_channel();
        inbox = Some(ChannelInbox::new(rx));
        spawn_http_server(config.http.port, queue).await?;
    }

    let delay = config.control.main_loop_delay();
    let control_loop = tokio::task::spawn_blocking(move || {
        scheduler.run_forever(
            wireless
                .as_mut()
                .map(|link| link as &mut dyn WirelessLink),
            inbox.as_mut().map(|inbox| inbox as &mut dyn CommandInbox),
            delay,
        );
    });

    control_loop.await.context("control loop terminated")?;
    Ok(())
}

/// `POST /command` only; every other path or method is a 404.
fn router(queue: CommandQueue) -> Router {
    Router::new()
        .route("/command", post(handle_command))
        .method_not_allowed_fallback(handle_not_found)
        .fallback(handle_not_found)
        .with_state(queue)
}

async fn spawn_http_server(port: u16, queue: CommandQueue) -> anyhow::Result<()> {
    let app = router(queue);
    let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind http server at {addr}"))?;

    info!("http command endpoint on http://{addr}/command");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            warn!("http server stopped: {err}");
        }
    });
    Ok(())
}

async fn handle_command(State(queue): State<CommandQueue>, body: Bytes) -> Response {
    let (reply_tx, reply_rx) = oneshot::channel();
    let command = HttpCommand::new(body.to_vec(), move |reply| {
        let _ = reply_tx.send(reply);
    });

    if queue.send(command).is_err() {
        return text_response(StatusCode::SERVICE_UNAVAILABLE, "Control loop unavailable");
    }

    match tokio::time::timeout(COMMAND_REPLY_TIMEOUT, reply_rx).await {
        Ok(Ok(reply)) => reply_response(&reply),
        Ok(Err(_)) | Err(_) => {
            warn!("control loop did not answer http command in time");
            text_response(StatusCode::SERVICE_UNAVAILABLE, "Control loop unavailable")
        }
    }
}

async fn handle_not_found() -> Response {
    text_response(StatusCode::NOT_FOUND, "Not Found")
}

fn reply_response(reply: &HttpReply) -> Response {
    let status = match reply {
        HttpReply::Ok => StatusCode::OK,
        HttpReply::BadRequest(_) => StatusCode::BAD_REQUEST,
    };
    text_response(status, reply.body())
}

fn text_response(status: StatusCode, body: &str) -> Response {
    (status, body.to_string()).into_response()
}

fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let path = std::env::var("HYDRO_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./hydro.json"));

    let mut config = match std::fs::read(&path) {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))?,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!("no config at {}, using defaults", path.display());
            RuntimeConfig::default()
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()))
        }
    };

    apply_env_overrides(&mut config);
    config.sanitize();
    Ok(config)
}

fn apply_env_overrides(config: &mut RuntimeConfig) {
    if let Ok(dir) = std::env::var("HYDRO_DATA_DIR") {
        config.data_dir = dir;
    }
    if let Ok(path) = std::env::var("HYDRO_SERIAL_PORT") {
        config.serial.path = Some(path).filter(|path| !path.is_empty());
    }
    if let Some(port) = std::env::var("HYDRO_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.http.port = port;
    }
    if let Some(enabled) = std::env::var("HYDRO_HTTP_ENABLED")
        .ok()
        .and_then(|value| value.parse::<bool>().ok())
    {
        config.http.enabled = enabled;
    }
    if let Ok(addr) = std::env::var("HYDRO_WIRELESS_ADDR") {
        config.wireless.bind_addr = addr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_replies_map_to_http_statuses() {
        assert_eq!(reply_response(&HttpReply::Ok).status(), StatusCode::OK);
        assert_eq!(
            reply_response(&HttpReply::BadRequest("No payload".to_string())).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn command_handler_waits_for_the_loop() {
        let (queue, mut rx) = mpsc::unbounded_channel::<HttpCommand>();
        let responder = tokio::spawn(async move {
            let command = rx.recv().await.expect("command queued");
            assert_eq!(command.body, b"START".to_vec());
            command.respond(HttpReply::Ok);
        });

        let response = handle_command(State(queue), Bytes::from_static(b"START")).await;
        assert_eq!(response.status(), StatusCode::OK);
        responder.await.unwrap();
    }

    async fn status_line(request: &'static str) -> String {
        use std::io::{Read, Write};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (queue, _rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router(queue)).await;
        });

        tokio::task::spawn_blocking(move || {
            let mut stream = std::net::TcpStream::connect(addr).unwrap();
            stream.write_all(request.as_bytes()).unwrap();
            let mut raw = String::new();
            stream.read_to_string(&mut raw).unwrap();
            raw.lines().next().unwrap_or_default().to_string()
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn only_post_command_is_routed() {
        assert_eq!(
            status_line("GET /command HTTP/1.1\r\nHost: hydro\r\nConnection: close\r\n\r\n").await,
            "HTTP/1.1 404 Not Found"
        );
        assert_eq!(
            status_line("POST /status HTTP/1.1\r\nHost: hydro\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await,
            "HTTP/1.1 404 Not Found"
        );
    }
}
