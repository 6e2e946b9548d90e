use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tiny_http::{Header, Method, Request, Response, Server};
use url::Url;

use crate::auth::error::AuthError;
use crate::auth::token_data::BearerToken;

/// How long shutdown may take once the callback has been handled.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(6);

const POLL_INTERVAL: Duration = Duration::from_millis(200);

type Outcome = Result<BearerToken, AuthError>;

/// One-shot HTTP listener for the authorization redirect.
///
/// Exactly one outcome is delivered per listener. The worker thread exits
/// after the first callback that hits the redirect path, whatever its result.
pub struct CallbackListener {
    server: Arc<Server>,
    shutdown_flag: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
    outcome_rx: Receiver<Outcome>,
    done_rx: Receiver<()>,
}

impl CallbackListener {
    /// Binds to the redirect URL's host and port and starts serving.
    ///
    /// `exchange` turns the authorization code into a token. It is only
    /// called when the callback's `state` equals `expected_state`.
    pub fn start<F>(redirect_url: &Url, expected_state: String, exchange: F) -> Result<Self, AuthError>
    where
        F: FnMut(&str) -> Result<BearerToken, AuthError> + Send + 'static,
    {
        let host = redirect_url
            .host_str()
            .ok_or_else(|| AuthError::Config(format!("redirect URL {redirect_url} has no host")))?;
        let port = redirect_url.port_or_known_default().unwrap_or(80);
        // Pin to IPv4 loopback so the bind doesn't land on ::1 only
        let host = if host == "localhost" { "127.0.0.1" } else { host };
        let addr = format!("{}:{}", host, port);

        let server = Server::http(&addr)
            .map_err(|e| AuthError::Listener(format!("failed to listen on {addr}: {e}")))?;
        let server = Arc::new(server);
        log::debug!("Callback listener bound to {}", addr);

        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let (outcome_tx, outcome_rx) = mpsc::sync_channel::<Outcome>(1);
        let (done_tx, done_rx) = mpsc::sync_channel::<()>(1);

        let server_clone = server.clone();
        let shutdown_flag_clone = shutdown_flag.clone();
        let callback_path = redirect_url.path().to_string();

        let worker = thread::Builder::new()
            .name("oauth-callback".into())
            .spawn(move || {
                serve(
                    &server_clone,
                    &shutdown_flag_clone,
                    &callback_path,
                    &expected_state,
                    exchange,
                    outcome_tx,
                );
                let _ = done_tx.send(());
            })
            .map_err(|e| AuthError::Listener(format!("failed to spawn listener thread: {e}")))?;

        Ok(Self {
            server,
            shutdown_flag,
            worker: Some(worker),
            outcome_rx,
            done_rx,
        })
    }

    /// Blocks until the callback has been handled.
    ///
    /// With no `timeout` this waits as long as the user needs. `cancel` is
    /// polled so an embedding program can abort the wait.
    pub fn wait(&self, timeout: Option<Duration>, cancel: Option<&AtomicBool>) -> Outcome {
        let started = Instant::now();

        loop {
            match self.outcome_rx.recv_timeout(POLL_INTERVAL) {
                Ok(outcome) => return outcome,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(AuthError::Listener(
                        "listener stopped before receiving a callback".into(),
                    ))
                }
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                        return Err(AuthError::Cancelled);
                    }
                    if let Some(limit) = timeout {
                        if started.elapsed() >= limit {
                            return Err(AuthError::UserTimeout(limit));
                        }
                    }
                }
            }
        }
    }

    /// Stops the listener, waiting at most `grace` for the worker to exit.
    pub fn shutdown(mut self, grace: Duration) {
        self.stop(grace);
    }

    fn stop(&mut self, grace: Duration) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        self.shutdown_flag.store(true, Ordering::SeqCst);
        self.server.unblock();

        match self.done_rx.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.join().is_err() {
                    log::error!("Callback listener thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Callback listener did not stop within {:?}, detaching it",
                    grace
                );
            }
        }
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.stop(SHUTDOWN_GRACE);
    }
}

fn serve<F>(
    server: &Server,
    shutdown_flag: &AtomicBool,
    callback_path: &str,
    expected_state: &str,
    mut exchange: F,
    outcome_tx: SyncSender<Outcome>,
) where
    F: FnMut(&str) -> Result<BearerToken, AuthError>,
{
    for request in server.incoming_requests() {
        if shutdown_flag.load(Ordering::SeqCst) {
            break;
        }

        if let Some(outcome) = handle_request(request, callback_path, expected_state, &mut exchange) {
            // Only the first outcome is ever observed
            let _ = outcome_tx.try_send(outcome);
            break;
        }
    }
}

/// Returns `None` for requests that are not the redirect, so the server keeps waiting.
fn handle_request<F>(
    request: Request,
    callback_path: &str,
    expected_state: &str,
    exchange: &mut F,
) -> Option<Outcome>
where
    F: FnMut(&str) -> Result<BearerToken, AuthError>,
{
    let full_url = format!("http://localhost{}", request.url());
    let parsed_url = match Url::parse(&full_url) {
        Ok(url) => url,
        Err(_) => {
            respond(request, 400, failure_page("Malformed request"));
            return None;
        }
    };

    if parsed_url.path() != callback_path {
        respond(request, 404, "Not Found".to_string());
        return None;
    }

    if *request.method() != Method::Get {
        respond(request, 405, "Method Not Allowed".to_string());
        return None;
    }

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;

    for (key, value) in parsed_url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.to_string()),
            "state" => state = Some(value.to_string()),
            "error" => error = Some(value.to_string()),
            "error_description" => error_description = Some(value.to_string()),
            _ => {}
        }
    }

    if let Some(error) = error {
        let message = match error_description {
            Some(description) => format!("{error}: {description}"),
            None => error,
        };
        log::error!("Authorization server returned an error: {}", message);
        respond(request, 400, failure_page(&message));
        return Some(Err(AuthError::Denied(message)));
    }

    if state.as_deref() != Some(expected_state) {
        log::error!("oauth state doesn't match");
        respond(request, 400, failure_page("Invalid state parameter"));
        return Some(Err(AuthError::StateMismatch));
    }

    let Some(code) = code else {
        respond(request, 400, failure_page("Missing authorization code"));
        return Some(Err(AuthError::Exchange(
            "callback did not include an authorization code".into(),
        )));
    };

    match exchange(&code) {
        Ok(token) => {
            respond(request, 200, success_page());
            Some(Ok(token))
        }
        Err(e) => {
            log::error!("Failed to exchange code for tokens: {}", e);
            respond(request, 400, failure_page(&e.to_string()));
            Some(Err(e))
        }
    }
}

fn respond(request: Request, status: u16, body: String) {
    let mut response: Response<Cursor<Vec<u8>>> =
        Response::from_string(body).with_status_code(status);
    if let Ok(header) = "Content-Type: text/html; charset=utf-8".parse::<Header>() {
        response = response.with_header(header);
    }
    if let Err(e) = request.respond(response) {
        log::warn!("Failed to write callback response: {}", e);
    }
}

fn failure_page(message: &str) -> String {
    format!(
        "<html><body><h1>Authentication Failed</h1><p>{}</p></body></html>",
        escape_html(message)
    )
}

fn success_page() -> String {
    r#"<html><body>
<div class="info"><p>Auth success, you may close this page.</p></div>
<div class="auto"></div>
<script>
let auto = document.querySelector('.auto');
var timeout = 5;
setTimeout(function() { window.close(); }, timeout * 1000);
var id = setInterval(function() {
    if (timeout < 1) {
        clearInterval(id);
        auto.innerHTML = "Unable to close page automatically";
        return;
    }
    timeout--;
    auto.innerHTML = "This page will close automatically in " + timeout + " seconds...";
}, 1000);
</script>
</body></html>"#
        .to_string()
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
