//! Loopback redirect listener
//!
//! [`RedirectListener`] binds a local port, waits for the browser to follow
//! the provider's redirect back to `http://<host>:<port><path>`, answers it
//! with a small HTML page, and hands the parsed [`RedirectResult`] to the
//! single waiter.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --listen()--> Listening --redirect--> Completed
//!                        |  \--accept error--> Failed
//!                        \--stop()--> Idle (waiter sees Cancelled)
//! ```
//!
//! Exactly one matching request is accepted per listen cycle.  The socket is
//! closed before the result is delivered, so later connections are refused
//! until the next `listen()`.  Requests for other paths (a browser asking
//! for `/favicon.ico`, for instance) get a 404 and do not end the cycle.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{AuthError, Result};

/// Default redirect path.
pub const DEFAULT_REDIRECT_PATH: &str = "/callback";

/// Page served when no callback text is configured: it navigates the tab
/// away immediately.
pub const AUTO_CLOSE_PAGE: &str =
    r#"<html><head><script language="javascript">self.location="about:blank";</script></head><body></body></html>"#;

/// Upper bound on the request head read from the browser.
const MAX_REQUEST_HEAD: usize = 8 * 1024;

/// How long a connected client may take to send its request head.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Observable state of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStatus {
    Idle,
    Listening,
    Completed,
    Failed,
}

/// Outcome of one listen cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectResult {
    /// The provider issued an authorization code.
    Code { code: String, state: Option<String> },
    /// The provider sent an `error` parameter, or the query was malformed
    /// (`"malformed_response"`).
    Error(String),
    /// The listener was stopped before a redirect arrived.
    Cancelled,
}

#[derive(Debug)]
struct Inner {
    status: ListenerStatus,
    port: Option<u16>,
    cancel: Option<CancellationToken>,
    result_rx: Option<oneshot::Receiver<RedirectResult>>,
    /// Incremented per listen cycle so a finishing serve task never clobbers
    /// the state of a newer cycle.
    generation: u64,
    callback_html: String,
}

// ---------------------------------------------------------------------------
// RedirectListener
// ---------------------------------------------------------------------------

/// One-shot loopback HTTP listener for OAuth redirects.
///
/// Cloning yields another handle to the same listener.
///
/// # Examples
///
/// ```no_run
/// use autoauth::auth::listener::{RedirectListener, RedirectResult};
///
/// # async fn example() -> autoauth::error::Result<()> {
/// let listener = RedirectListener::new("/callback");
/// let port = listener.listen(0).await?;
/// println!("redirect_uri = http://127.0.0.1:{port}/callback");
/// match listener.wait().await {
///     RedirectResult::Code { code, .. } => println!("code: {code}"),
///     RedirectResult::Error(reason) => eprintln!("denied: {reason}"),
///     RedirectResult::Cancelled => {}
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RedirectListener {
    redirect_path: String,
    inner: Arc<Mutex<Inner>>,
}

impl RedirectListener {
    /// Creates an idle listener that accepts redirects on `redirect_path`.
    pub fn new(redirect_path: impl Into<String>) -> Self {
        let mut redirect_path = redirect_path.into();
        if !redirect_path.starts_with('/') {
            redirect_path.insert(0, '/');
        }
        Self {
            redirect_path,
            inner: Arc::new(Mutex::new(Inner {
                status: ListenerStatus::Idle,
                port: None,
                cancel: None,
                result_rx: None,
                generation: 0,
                callback_html: AUTO_CLOSE_PAGE.to_string(),
            })),
        }
    }

    pub fn redirect_path(&self) -> &str {
        &self.redirect_path
    }

    /// Sets the page served to the browser.  Empty text selects
    /// [`AUTO_CLOSE_PAGE`].  Takes effect for the next redirect served,
    /// including one in the current cycle.
    pub fn set_callback_text(&self, text: &str) {
        self.inner.lock().callback_html = if text.is_empty() {
            AUTO_CLOSE_PAGE.to_string()
        } else {
            text.to_string()
        };
    }

    pub fn callback_text(&self) -> String {
        self.inner.lock().callback_html.clone()
    }

    pub fn status(&self) -> ListenerStatus {
        self.inner.lock().status
    }

    pub fn is_listening(&self) -> bool {
        self.status() == ListenerStatus::Listening
    }

    /// The bound port while listening.
    pub fn port(&self) -> Option<u16> {
        let inner = self.inner.lock();
        (inner.status == ListenerStatus::Listening)
            .then_some(inner.port)
            .flatten()
    }

    /// Binds `0.0.0.0:port` and starts accepting redirects.
    ///
    /// With `port == 0` the OS picks a free port; the chosen port is
    /// returned.  Calling `listen` while already listening returns the
    /// current port without rebinding.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Bind`] if the port cannot be bound.
    pub async fn listen(&self, port: u16) -> Result<u16> {
        if let Some(current) = self.port() {
            return Ok(current);
        }

        let listener = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                // A concurrent listen() on the same handle may have won.
                if let Some(current) = self.port() {
                    return Ok(current);
                }
                return Err(AuthError::Bind {
                    port,
                    message: e.to_string(),
                });
            }
        };
        let bound = listener
            .local_addr()
            .map_err(|e| AuthError::Bind {
                port,
                message: e.to_string(),
            })?
            .port();

        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        let generation = {
            let mut inner = self.inner.lock();
            if inner.status == ListenerStatus::Listening {
                if let Some(current) = inner.port {
                    return Ok(current);
                }
            }
            inner.generation += 1;
            inner.status = ListenerStatus::Listening;
            inner.port = Some(bound);
            inner.cancel = Some(cancel.clone());
            inner.result_rx = Some(rx);
            inner.generation
        };

        tracing::debug!(port = bound, path = %self.redirect_path, "redirect listener started");
        tokio::spawn(serve(
            listener,
            self.redirect_path.clone(),
            Arc::clone(&self.inner),
            cancel,
            tx,
            generation,
        ));
        Ok(bound)
    }

    /// Waits for the result of the current listen cycle.
    ///
    /// Only one waiter receives the result; a second concurrent call, a call
    /// without a preceding `listen()`, or a cycle ended by [`stop`](Self::stop)
    /// all yield [`RedirectResult::Cancelled`].
    pub async fn wait(&self) -> RedirectResult {
        let rx = self.inner.lock().result_rx.take();
        match rx {
            Some(rx) => rx.await.unwrap_or(RedirectResult::Cancelled),
            None => RedirectResult::Cancelled,
        }
    }

    /// Closes the socket.  A pending waiter observes
    /// [`RedirectResult::Cancelled`].
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
            tracing::debug!(port = ?inner.port, "redirect listener stopped");
        }
        if inner.status == ListenerStatus::Listening {
            inner.status = ListenerStatus::Idle;
        }
        inner.port = None;
        // Dropping an undelivered receiver is fine; an active waiter holds
        // its own and sees the sender dropped.
        inner.result_rx = None;
    }
}

// ---------------------------------------------------------------------------
// Serve loop
// ---------------------------------------------------------------------------

async fn serve(
    listener: TcpListener,
    redirect_path: String,
    inner: Arc<Mutex<Inner>>,
    cancel: CancellationToken,
    tx: oneshot::Sender<RedirectResult>,
    generation: u64,
) {
    // Each connection is served on its own task so an idle one (a browser
    // preconnect) cannot hold up the redirect or stop().
    let connections = cancel.child_token();
    let (redirected_tx, mut redirected_rx) = mpsc::channel::<RedirectResult>(1);

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => break None,
            Some(result) = redirected_rx.recv() => break Some((ListenerStatus::Completed, result)),
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::trace!(%peer, "redirect listener accepted connection");
                    let redirect_path = redirect_path.clone();
                    let inner = Arc::clone(&inner);
                    let redirected = redirected_tx.clone();
                    let connections = connections.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = connections.cancelled() => {}
                            handled = handle_connection(stream, &redirect_path, &inner) => {
                                if let Some(result) = handled {
                                    // Only the first redirect of a cycle counts.
                                    let _ = redirected.try_send(result);
                                }
                            }
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "redirect listener accept failed");
                    break Some((
                        ListenerStatus::Failed,
                        RedirectResult::Error(format!("accept failed: {e}")),
                    ));
                }
            }
        }
    };

    // Refuse any further connection before anyone sees the result.
    connections.cancel();
    drop(listener);

    let Some((status, result)) = outcome else {
        return;
    };
    {
        let mut inner = inner.lock();
        if inner.generation == generation {
            inner.status = status;
            inner.port = None;
            inner.cancel = None;
        }
    }
    let _ = tx.send(result);
}

/// Serves one connection.  Returns the parsed result when it was the
/// redirect, even if the browser hung up before the page was written.
async fn handle_connection(
    mut stream: TcpStream,
    redirect_path: &str,
    inner: &Mutex<Inner>,
) -> Option<RedirectResult> {
    let head = match tokio::time::timeout(READ_TIMEOUT, read_request_head(&mut stream)).await {
        Ok(Ok(head)) => head,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "dropping redirect connection");
            return None;
        }
        Err(_) => {
            tracing::debug!("dropping redirect connection: request head timeout");
            return None;
        }
    };

    let Some((method, target)) = parse_request_line(&head) else {
        respond(&mut stream, "400 Bad Request", "text/plain", "bad request").await;
        return None;
    };

    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    if path != redirect_path {
        respond(&mut stream, "404 Not Found", "text/plain", "not found").await;
        return None;
    }
    if method != "GET" {
        respond(
            &mut stream,
            "405 Method Not Allowed",
            "text/plain",
            "method not allowed",
        )
        .await;
        return None;
    }

    let result = parse_redirect_query(query);
    let page = inner.lock().callback_html.clone();
    respond(&mut stream, "200 OK", "text/html; charset=utf-8", &page).await;
    Some(result)
}

async fn respond(stream: &mut TcpStream, status: &str, content_type: &str, body: &str) {
    if let Err(e) = write_response(stream, status, content_type, body).await {
        tracing::debug!(error = %e, %status, "failed to write redirect response");
    }
}

async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_REQUEST_HEAD {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn write_response(
    stream: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &str,
) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// `"GET /callback?code=x HTTP/1.1"` -> `("GET", "/callback?code=x")`
fn parse_request_line(head: &str) -> Option<(&str, &str)> {
    let mut parts = head.lines().next()?.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    Some((method, target))
}

fn parse_redirect_query(query: &str) -> RedirectResult {
    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        tracing::debug!(%error, description = ?description, "provider redirected with error");
        return RedirectResult::Error(error);
    }
    match code {
        Some(code) if !code.is_empty() => RedirectResult::Code { code, state },
        _ => RedirectResult::Error("malformed_response".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn browser() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    async fn visit(port: u16, path_and_query: &str) -> reqwest::Response {
        browser()
            .get(format!("http://127.0.0.1:{port}{path_and_query}"))
            .send()
            .await
            .unwrap()
    }

    #[test]
    fn test_parse_query_with_code_and_state() {
        assert_eq!(
            parse_redirect_query("code=ABC123&state=xyz"),
            RedirectResult::Code {
                code: "ABC123".to_string(),
                state: Some("xyz".to_string())
            }
        );
    }

    #[test]
    fn test_parse_query_decodes_percent_encoding() {
        assert_eq!(
            parse_redirect_query("code=4%2F0Ab%2Bc"),
            RedirectResult::Code {
                code: "4/0Ab+c".to_string(),
                state: None
            }
        );
    }

    #[test]
    fn test_parse_query_error_wins_over_code() {
        assert_eq!(
            parse_redirect_query("error=access_denied&code=ABC"),
            RedirectResult::Error("access_denied".to_string())
        );
    }

    #[test]
    fn test_parse_query_without_code_or_error_is_malformed() {
        let expected = RedirectResult::Error("malformed_response".to_string());
        assert_eq!(parse_redirect_query(""), expected);
        assert_eq!(parse_redirect_query("state=xyz"), expected);
        assert_eq!(parse_redirect_query("code="), expected);
    }

    #[test]
    fn test_parse_request_line() {
        assert_eq!(
            parse_request_line("GET /callback?code=1 HTTP/1.1\r\nHost: x\r\n\r\n"),
            Some(("GET", "/callback?code=1"))
        );
        assert_eq!(parse_request_line(""), None);
    }

    #[test]
    fn test_new_listener_is_idle_with_auto_close_page() {
        let listener = RedirectListener::new("callback");
        assert_eq!(listener.redirect_path(), "/callback");
        assert_eq!(listener.status(), ListenerStatus::Idle);
        assert_eq!(listener.port(), None);
        assert_eq!(listener.callback_text(), AUTO_CLOSE_PAGE);
    }

    #[test]
    fn test_empty_callback_text_selects_auto_close_page() {
        let listener = RedirectListener::new(DEFAULT_REDIRECT_PATH);
        listener.set_callback_text("Done.");
        assert_eq!(listener.callback_text(), "Done.");
        listener.set_callback_text("");
        assert_eq!(listener.callback_text(), AUTO_CLOSE_PAGE);
    }

    #[tokio::test]
    async fn test_listen_on_port_zero_reports_assigned_port() {
        let listener = RedirectListener::new(DEFAULT_REDIRECT_PATH);
        let port = listener.listen(0).await.unwrap();
        assert_ne!(port, 0);
        assert_eq!(listener.port(), Some(port));
        assert!(listener.is_listening());
        listener.stop();
    }

    #[tokio::test]
    async fn test_listen_twice_reuses_port() {
        let listener = RedirectListener::new(DEFAULT_REDIRECT_PATH);
        let first = listener.listen(0).await.unwrap();
        let second = listener.listen(0).await.unwrap();
        assert_eq!(first, second);
        listener.stop();
    }

    #[tokio::test]
    async fn test_listen_on_taken_port_is_bind_error() {
        let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let listener = RedirectListener::new(DEFAULT_REDIRECT_PATH);
        let err = listener.listen(port).await.unwrap_err();
        assert!(matches!(err, AuthError::Bind { port: p, .. } if p == port));
        assert_eq!(listener.status(), ListenerStatus::Idle);
    }

    #[tokio::test]
    async fn test_redirect_completes_cycle_and_serves_page() {
        let listener = RedirectListener::new(DEFAULT_REDIRECT_PATH);
        listener.set_callback_text("Authorization finished.");
        let port = listener.listen(0).await.unwrap();

        let waiter = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.wait().await })
        };
        let resp = visit(port, "/callback?code=ABC123&state=s1").await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "Authorization finished.");

        assert_eq!(
            waiter.await.unwrap(),
            RedirectResult::Code {
                code: "ABC123".to_string(),
                state: Some("s1".to_string())
            }
        );
        assert_eq!(listener.status(), ListenerStatus::Completed);
        assert_eq!(listener.port(), None);
    }

    #[tokio::test]
    async fn test_connection_after_completion_is_refused() {
        let listener = RedirectListener::new(DEFAULT_REDIRECT_PATH);
        let port = listener.listen(0).await.unwrap();
        visit(port, "/callback?code=ABC123").await;
        listener.wait().await;

        let second = browser()
            .get(format!("http://127.0.0.1:{port}/callback?code=AGAIN"))
            .send()
            .await;
        assert!(second.is_err(), "listener must not accept after completion");
    }

    #[tokio::test]
    async fn test_other_paths_get_404_and_keep_listening() {
        let listener = RedirectListener::new(DEFAULT_REDIRECT_PATH);
        let port = listener.listen(0).await.unwrap();

        let resp = visit(port, "/favicon.ico").await;
        assert_eq!(resp.status(), 404);
        assert!(listener.is_listening());

        visit(port, "/callback?error=access_denied").await;
        assert_eq!(
            listener.wait().await,
            RedirectResult::Error("access_denied".to_string())
        );
    }

    #[tokio::test]
    async fn test_idle_preconnect_does_not_delay_redirect() {
        let listener = RedirectListener::new(DEFAULT_REDIRECT_PATH);
        let port = listener.listen(0).await.unwrap();
        let _idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        let resp = tokio::time::timeout(
            Duration::from_secs(2),
            visit(port, "/callback?code=ABC123"),
        )
        .await
        .expect("redirect served while another connection is idle");
        assert_eq!(resp.status(), 200);
        assert!(matches!(listener.wait().await, RedirectResult::Code { .. }));
    }

    #[tokio::test]
    async fn test_stop_is_prompt_with_idle_connection_open() {
        let listener = RedirectListener::new(DEFAULT_REDIRECT_PATH);
        let port = listener.listen(0).await.unwrap();
        let _idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let waiter = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.wait().await })
        };
        listener.stop();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("stop takes effect without waiting for the idle client")
            .unwrap();
        assert_eq!(result, RedirectResult::Cancelled);
    }

    #[tokio::test]
    async fn test_redirect_counts_when_browser_hangs_up_early() {
        let listener = RedirectListener::new(DEFAULT_REDIRECT_PATH);
        let port = listener.listen(0).await.unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(b"GET /callback?code=ABC123&state=s1 HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        drop(stream);

        let result = tokio::time::timeout(Duration::from_secs(2), listener.wait())
            .await
            .expect("redirect delivered after hang-up");
        assert_eq!(
            result,
            RedirectResult::Code {
                code: "ABC123".to_string(),
                state: Some("s1".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_missing_code_yields_malformed_response() {
        let listener = RedirectListener::new(DEFAULT_REDIRECT_PATH);
        let port = listener.listen(0).await.unwrap();
        let resp = visit(port, "/callback?foo=bar").await;
        assert_eq!(resp.status(), 200);
        assert_eq!(
            listener.wait().await,
            RedirectResult::Error("malformed_response".to_string())
        );
    }

    #[tokio::test]
    async fn test_stop_releases_waiter_with_cancelled() {
        let listener = RedirectListener::new(DEFAULT_REDIRECT_PATH);
        listener.listen(0).await.unwrap();

        let waiter = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        listener.stop();

        let result = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter must not hang after stop")
            .unwrap();
        assert_eq!(result, RedirectResult::Cancelled);
        assert_eq!(listener.status(), ListenerStatus::Idle);
    }

    #[tokio::test]
    async fn test_wait_without_listen_is_cancelled() {
        let listener = RedirectListener::new(DEFAULT_REDIRECT_PATH);
        assert_eq!(listener.wait().await, RedirectResult::Cancelled);
    }

    #[tokio::test]
    async fn test_listener_can_restart_after_completion() {
        let listener = RedirectListener::new(DEFAULT_REDIRECT_PATH);
        let port = listener.listen(0).await.unwrap();
        visit(port, "/callback?code=first").await;
        listener.wait().await;

        let port = listener.listen(0).await.unwrap();
        visit(port, "/callback?code=second").await;
        assert_eq!(
            listener.wait().await,
            RedirectResult::Code {
                code: "second".to_string(),
                state: None
            }
        );
    }
}
