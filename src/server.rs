//! A small HTTP/1.1 front end for the [`Timer`]
//!
//! Every request is a `GET` whose path names the operation, so that a phone
//! browser or a remote-control shortcut can drive the timer:
//!
//! | Path                      | Operation           |
//! |---------------------------|---------------------|
//! | `/`                       | index page          |
//! | `/timer`                  | [`Timer::status`]   |
//! | `/timer/<duration>/start` | [`Timer::start`]    |
//! | `/timer/stop`             | [`Timer::stop`]     |
//! | `/timer/restart`          | [`Timer::restart`]  |
//! | `/timer/<duration>/extend`| [`Timer::extend`]   |
//!
//! Connections serve a single request and are closed afterwards.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::action::Action;
use crate::timer::{self, Timer};

/// Longest request head we are willing to read, in bytes
const MAX_HEAD_LEN: usize = 8 * 1024;

/// How long a client gets to send its request head
const READ_TIMEOUT: Duration = Duration::from_secs(10);

static START_ROUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/timer/(?P<duration>[.0-9a-zA-Z]+)/start$").unwrap());
static EXTEND_ROUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/timer/(?P<duration>[.0-9a-zA-Z]+)/extend$").unwrap());

const INDEX: &str = r#"<!DOCTYPE html>
<html>
    <head>
        <title>MPD Auto Stop</title>
        <style>
            body {
                font-family: sans-serif, verdana;
            }
        </style>
    </head>
    <body>
        <h1>MPD Auto Stop</h1>
        <div>The following actions are available,</div>
        <ul>
            <li>Status - /timer</li>
            <li>Start Timer - /timer/&lt;time&gt;/start. Ex: /timer/3600s/start, /timer/1h/start, /timer/60m/start</li>
            <li>Stop Timer - /timer/stop</li>
            <li>Restart Timer - /timer/restart</li>
            <li>Extend Timer - /timer/&lt;time&gt;/extend. Ex: /timer/1800s/extend, /timer/0.5h/extend, /timer/30m/extend</li>
        </ul>
    </body>
</html>
"#;

/// Problems with the bytes a client sent
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("malformed request line")]
    BadRequestLine,
    #[error("request head is too large")]
    HeadTooLarge,
    #[error("connection closed before the request was complete")]
    Incomplete,
}

/// Which timer operation a path asks for
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Route<'a> {
    Index,
    Status,
    Start(&'a str),
    Stop,
    Restart,
    Extend(&'a str),
    NotFound,
}

impl<'a> Route<'a> {
    /// Match a request path, ignoring any query string
    pub fn parse(target: &'a str) -> Self {
        let path = target
            .split(['?', '#'])
            .next()
            .unwrap_or_default();

        match path {
            "" | "/" => return Self::Index,
            "/timer" => return Self::Status,
            "/timer/stop" => return Self::Stop,
            "/timer/restart" => return Self::Restart,
            _ => {}
        }

        if let Some(caps) = START_ROUTE.captures(path) {
            if let Some(duration) = caps.name("duration") {
                return Self::Start(duration.as_str());
            }
        }

        if let Some(caps) = EXTEND_ROUTE.captures(path) {
            if let Some(duration) = caps.name("duration") {
                return Self::Extend(duration.as_str());
            }
        }

        Self::NotFound
    }
}

/// An HTTP response, ready to be written out
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    fn html(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "text/html",
            body: body.to_string(),
        }
    }

    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.to_string(),
        }
    }

    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(err) => Self::error(500, &err.to_string()),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: json!({ "error": message }).to_string(),
        }
    }

    fn from_result<T: Serialize>(result: Result<T, timer::Error>) -> Self {
        match result {
            Ok(value) => Self::json(200, &value),
            Err(err) => Self::error(400, &err.to_string()),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            500 => "Internal Server Error",
            _ => "",
        }
    }

    /// Format as a complete HTTP/1.1 message
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len()
        )
        .into_bytes();

        head.extend_from_slice(self.body.as_bytes());
        head
    }
}

/// Run the timer operation a route asks for
pub async fn respond<A: Action>(timer: &Timer<A>, route: Route<'_>) -> Response {
    match route {
        Route::Index => Response::html(INDEX),
        Route::Status => Response::json(200, &timer.status().await),
        Route::Start(duration) => Response::from_result(timer.start(duration).await),
        Route::Stop => Response::json(200, &timer.stop().await),
        Route::Restart => Response::from_result(timer.restart().await),
        Route::Extend(duration) => Response::from_result(timer.extend(duration).await),
        Route::NotFound => Response::text(404, "Not found"),
    }
}

/// Parse a request line: `GET /timer HTTP/1.1`
fn parse_request_line(line: &str) -> Result<(&str, &str), HttpError> {
    let mut parts = line.split_whitespace();
    let method = parts.next().ok_or(HttpError::BadRequestLine)?;
    let target = parts.next().ok_or(HttpError::BadRequestLine)?;
    let version = parts.next().ok_or(HttpError::BadRequestLine)?;

    if !version.starts_with("HTTP/1.") || parts.next().is_some() {
        return Err(HttpError::BadRequestLine);
    }

    Ok((method, target))
}

/// Read the request line and skip over the headers that follow it
///
/// Never buffers more than [`MAX_HEAD_LEN`] bytes of head, even when the
/// client never sends a newline.
async fn read_request_head<R: AsyncRead + Unpin>(stream: R) -> Result<String, HttpError> {
    let mut reader = BufReader::new(stream);
    let mut request_line: Option<Vec<u8>> = None;
    let mut total = 0;

    loop {
        let mut line = Vec::new();
        let limit = (MAX_HEAD_LEN - total) as u64;
        let read = (&mut reader)
            .take(limit)
            .read_until(b'\n', &mut line)
            .await
            .map_err(|_| HttpError::Incomplete)?;

        total += read;

        if !line.ends_with(b"\n") {
            return Err(if total >= MAX_HEAD_LEN {
                HttpError::HeadTooLarge
            } else {
                HttpError::Incomplete
            });
        }

        if request_line.is_none() {
            request_line = Some(line);
        } else if line.trim_ascii().is_empty() {
            let first = request_line.unwrap_or_default();

            return String::from_utf8(first).map_err(|_| HttpError::BadRequestLine);
        }
    }
}

async fn handle_connection<A: Action>(
    mut stream: TcpStream,
    peer: SocketAddr,
    timer: &Timer<A>,
) -> Result<()> {
    let response = match tokio::time::timeout(READ_TIMEOUT, read_request_head(&mut stream)).await {
        Err(_) => Response::text(408, "Request timed out"),
        Ok(Err(HttpError::Incomplete)) => return Ok(()),
        Ok(Err(err)) => Response::text(400, &err.to_string()),
        Ok(Ok(request_line)) => match parse_request_line(&request_line) {
            Err(err) => Response::text(400, &err.to_string()),
            Ok((method, target)) => {
                debug!("{} \"{} {}\"", peer, method, target);

                if method == "GET" {
                    respond(timer, Route::parse(target)).await
                } else {
                    Response::text(405, "Method not allowed")
                }
            }
        },
    };

    debug!("{} {}", peer, response.status);

    stream
        .write_all(&response.to_bytes())
        .await
        .with_context(|| format!("Failed to write response to {}", peer))?;
    stream.shutdown().await.ok();

    Ok(())
}

/// Serve HTTP requests for `timer` until `shutdown` completes
pub async fn serve<A, F>(listener: TcpListener, timer: Timer<A>, shutdown: F) -> Result<()>
where
    A: Action,
    F: Future<Output = ()>,
{
    let address = listener
        .local_addr()
        .with_context(|| "Unable to determine listening address")?;

    info!(
        "Starting server @ {}, use <Ctrl-C> to stop",
        address.to_string().cyan()
    );

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!("Failed to accept connection: {}", err);
                        continue;
                    }
                };

                let timer = timer.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, peer, &timer).await {
                        warn!("{:#}", err);
                    }
                });
            }
        }
    }

    timer.stop().await;

    info!("Stopped...");

    Ok(())
}

#[cfg(test)]
mod test {
    use anyhow::Result;

    use crate::action::Action;
    use std::io::Cursor;

    use crate::server::{
        parse_request_line, read_request_head, respond, HttpError, Response, Route, MAX_HEAD_LEN,
    };
    use crate::timer::Timer;

    struct Noop;

    impl Action for Noop {
        async fn invoke(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn route_index() {
        assert_eq!(Route::parse("/"), Route::Index);
        assert_eq!(Route::parse(""), Route::Index);
    }

    #[test]
    fn route_timer_operations() {
        assert_eq!(Route::parse("/timer"), Route::Status);
        assert_eq!(Route::parse("/timer/stop"), Route::Stop);
        assert_eq!(Route::parse("/timer/restart"), Route::Restart);
        assert_eq!(Route::parse("/timer/30m/start"), Route::Start("30m"));
        assert_eq!(Route::parse("/timer/.5h/extend"), Route::Extend(".5h"));
    }

    #[test]
    fn route_ignores_query() {
        assert_eq!(Route::parse("/timer?ts=123"), Route::Status);
        assert_eq!(Route::parse("/timer/1h/start?from=phone"), Route::Start("1h"));
    }

    #[test]
    fn route_passes_bad_durations_through() {
        assert_eq!(Route::parse("/timer/soon/start"), Route::Start("soon"));
    }

    #[test]
    fn route_not_found() {
        assert_eq!(Route::parse("/timer/"), Route::NotFound);
        assert_eq!(Route::parse("/timer/1 h/start"), Route::NotFound);
        assert_eq!(Route::parse("/timer/stop/now"), Route::NotFound);
        assert_eq!(Route::parse("/favicon.ico"), Route::NotFound);
    }

    #[test]
    fn request_line() {
        assert_eq!(
            parse_request_line("GET /timer HTTP/1.1\r\n").unwrap(),
            ("GET", "/timer")
        );
    }

    #[test]
    fn request_line_errors() {
        for line in ["", "GET", "GET /timer", "GET /timer SPDY/3", "GET /a b HTTP/1.1"] {
            assert!(matches!(
                parse_request_line(line),
                Err(HttpError::BadRequestLine)
            ));
        }
    }

    #[tokio::test]
    async fn request_head_skips_headers() {
        let request = b"GET /timer HTTP/1.1\r\nHost: localhost\r\nAccept: */*\r\n\r\n";

        let line = read_request_head(&request[..]).await.unwrap();

        assert_eq!(line, "GET /timer HTTP/1.1\r\n");
    }

    #[tokio::test]
    async fn request_head_without_newline_is_bounded() {
        let mut client = Cursor::new(vec![b'A'; 16 * 1024 * 1024]);

        let err = read_request_head(&mut client).await.unwrap_err();

        assert!(matches!(err, HttpError::HeadTooLarge));
        assert!(client.position() <= 2 * MAX_HEAD_LEN as u64);
    }

    #[tokio::test]
    async fn request_head_with_too_many_headers() {
        let mut request = b"GET /timer HTTP/1.1\r\n".to_vec();
        for _ in 0..1000 {
            request.extend_from_slice(b"X-Filler: 0123456789\r\n");
        }
        request.extend_from_slice(b"\r\n");

        let err = read_request_head(&request[..]).await.unwrap_err();

        assert!(matches!(err, HttpError::HeadTooLarge));
    }

    #[tokio::test]
    async fn request_head_not_utf8() {
        let request = b"GET /timer\xff HTTP/1.1\r\n\r\n";

        let err = read_request_head(&request[..]).await.unwrap_err();

        assert!(matches!(err, HttpError::BadRequestLine));
    }

    #[tokio::test]
    async fn request_head_cut_short() {
        let request = b"GET /timer HTTP/1.1\r\nHost: loc";

        let err = read_request_head(&request[..]).await.unwrap_err();

        assert!(matches!(err, HttpError::Incomplete));
    }

    #[test]
    fn timeout_response() {
        let response = Response::text(408, "Request timed out");

        let bytes = String::from_utf8(response.to_bytes()).unwrap();

        assert!(bytes.starts_with("HTTP/1.1 408 Request Timeout\r\n"));
    }

    #[test]
    fn response_bytes() {
        let response = Response::text(404, "Not found");

        let bytes = String::from_utf8(response.to_bytes()).unwrap();

        assert_eq!(
            bytes,
            "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 9\r\nConnection: close\r\n\r\nNot found"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn respond_status() {
        let timer = Timer::new(Noop);

        let response = respond(&timer, Route::Status).await;

        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, "application/json");
        assert_eq!(response.body, r#"{"status":"stopped"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn respond_start_and_stop() {
        let timer = Timer::new(Noop);

        let started = respond(&timer, Route::Start("100s")).await;
        let stopped = respond(&timer, Route::Stop).await;

        assert_eq!(started.status, 200);
        assert_eq!(started.body, r#"{"remaining_time":"100.0 seconds"}"#);
        assert_eq!(stopped.status, 200);
        assert_eq!(stopped.body, "{}");
    }

    #[tokio::test(start_paused = true)]
    async fn respond_bad_duration() {
        let timer = Timer::new(Noop);

        let response = respond(&timer, Route::Start("soon")).await;

        assert_eq!(response.status, 400);
        assert_eq!(response.body, r#"{"error":"Invalid duration: soon"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn respond_invalid_state() {
        let timer = Timer::new(Noop);

        let restart = respond(&timer, Route::Restart).await;
        let extend = respond(&timer, Route::Extend("10m")).await;

        assert_eq!(restart.status, 400);
        assert_eq!(restart.body, r#"{"error":"Can't restart a stopped timer"}"#);
        assert_eq!(extend.status, 400);
        assert_eq!(extend.body, r#"{"error":"Can't extend a stopped timer"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn respond_index_and_not_found() {
        let timer = Timer::new(Noop);

        let index = respond(&timer, Route::Index).await;
        let missing = respond(&timer, Route::NotFound).await;

        assert_eq!(index.status, 200);
        assert_eq!(index.content_type, "text/html");
        assert!(index.body.contains("/timer/&lt;time&gt;/start"));
        assert_eq!(missing.status, 404);
        assert_eq!(missing.body, "Not found");
    }
}
