//! Sources of the authorization code.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use url::Url;

use super::loopback_redirect_uri;
use crate::error::AuthError;

/// Hands the user an authorization URL and returns the code the redirect carried.
#[async_trait]
pub trait AuthorizationCodeSource: Send + Sync {
    /// Redirect URI registered in the authorization request.
    fn redirect_uri(&self) -> String;

    /// Wait for the authorization code. `state` is the CSRF value the
    /// redirect must echo back.
    async fn obtain_code(&self, authorize_url: &Url, state: &str) -> Result<String, AuthError>;
}

/// Opens the authorization page somewhere the user can see it.
pub type UrlLauncher = Box<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// Local HTTP listener that receives the redirect on `127.0.0.1:<port>/callback`.
pub struct LoopbackCallback {
    port: u16,
    launcher: Option<UrlLauncher>,
}

impl LoopbackCallback {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            launcher: None,
        }
    }

    /// Launch the URL (typically in a browser) once the listener is bound.
    pub fn with_launcher(mut self, launcher: UrlLauncher) -> Self {
        self.launcher = Some(launcher);
        self
    }
}

impl std::fmt::Debug for LoopbackCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackCallback")
            .field("port", &self.port)
            .finish()
    }
}

enum CallbackOutcome {
    Code(String),
    Failed(AuthError),
    /// Not the callback (favicon, stray request); keep listening.
    Ignored,
}

fn inspect_request_line(line: &str, expected_state: &str) -> CallbackOutcome {
    let Some(target) = line.split_whitespace().nth(1) else {
        return CallbackOutcome::Ignored;
    };
    let Ok(url) = Url::parse(&format!("http://127.0.0.1{}", target)) else {
        return CallbackOutcome::Ignored;
    };
    if url.path() != "/callback" {
        return CallbackOutcome::Ignored;
    }

    match code_from_redirect(&url, expected_state) {
        Ok(code) => CallbackOutcome::Code(code),
        Err(e) => CallbackOutcome::Failed(e),
    }
}

/// Pull the code out of a redirect URL, checking the state.
fn code_from_redirect(url: &Url, expected_state: &str) -> Result<String, AuthError> {
    let mut code = None;
    let mut state = None;
    let mut error = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(err) = error {
        return Err(AuthError::OAuth {
            message: format!("authorization server returned error: {}", err),
        });
    }

    match state {
        Some(received) if received == expected_state => {}
        Some(_) => {
            return Err(AuthError::OAuth {
                message: "state parameter mismatch".to_string(),
            });
        }
        None => {
            return Err(AuthError::OAuth {
                message: "redirect carried no state parameter".to_string(),
            });
        }
    }

    code.filter(|c| !c.is_empty()).ok_or_else(|| AuthError::OAuth {
        message: "redirect carried no authorization code".to_string(),
    })
}

fn html_response(status: &str, title: &str, body: &str) -> Vec<u8> {
    let page = format!(
        "<html><body><h1>{}</h1><p>{}</p></body></html>",
        title, body
    );
    format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        page.len(),
        page
    )
    .into_bytes()
}

#[async_trait]
impl AuthorizationCodeSource for LoopbackCallback {
    fn redirect_uri(&self) -> String {
        loopback_redirect_uri(self.port)
    }

    async fn obtain_code(&self, authorize_url: &Url, state: &str) -> Result<String, AuthError> {
        let addr = format!("127.0.0.1:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AuthError::OAuth {
                message: format!("failed to bind to {}: {}", addr, e),
            })?;

        tracing::info!("Listening for OAuth callback on {}", addr);
        eprintln!("Open this URL to authorize:\n\n  {}\n", authorize_url);
        if let Some(launch) = &self.launcher {
            if let Err(e) = launch(authorize_url.as_str()) {
                tracing::warn!("Could not open a browser: {}", e);
            }
        }

        loop {
            let (mut socket, _) = listener.accept().await.map_err(|e| AuthError::OAuth {
                message: format!("failed to accept connection: {}", e),
            })?;

            let mut buffer = [0; 4096];
            let n = socket.read(&mut buffer).await.map_err(|e| AuthError::OAuth {
                message: format!("failed to read request: {}", e),
            })?;
            let request = String::from_utf8_lossy(&buffer[..n]);
            let line = request.lines().next().unwrap_or_default();

            match inspect_request_line(line, state) {
                CallbackOutcome::Code(code) => {
                    let response = html_response(
                        "200 OK",
                        "Authorization complete",
                        "You can close this window and return to the terminal.",
                    );
                    let _ = socket.write_all(&response).await;
                    return Ok(code);
                }
                CallbackOutcome::Failed(err) => {
                    let response =
                        html_response("400 Bad Request", "Authorization failed", &err.to_string());
                    let _ = socket.write_all(&response).await;
                    return Err(err);
                }
                CallbackOutcome::Ignored => {
                    let response = html_response("404 Not Found", "Not found", "");
                    let _ = socket.write_all(&response).await;
                }
            }
        }
    }
}

/// Prints the URL and reads the redirected URL (or the bare code) from stdin.
///
/// For machines where no browser can reach the loopback listener.
#[derive(Debug, Clone)]
pub struct PastedRedirect {
    port: u16,
}

impl PastedRedirect {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

/// Accept either the full redirected URL or just the code.
pub fn parse_pasted_code(input: &str, expected_state: &str) -> Result<String, AuthError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AuthError::OAuth {
            message: "no authorization code entered".to_string(),
        });
    }

    match Url::parse(input) {
        Ok(url) => code_from_redirect(&url, expected_state),
        Err(_) if !input.contains(char::is_whitespace) => Ok(input.to_string()),
        Err(e) => Err(AuthError::OAuth {
            message: format!("could not read the pasted redirect: {}", e),
        }),
    }
}

#[async_trait]
impl AuthorizationCodeSource for PastedRedirect {
    fn redirect_uri(&self) -> String {
        loopback_redirect_uri(self.port)
    }

    async fn obtain_code(&self, authorize_url: &Url, state: &str) -> Result<String, AuthError> {
        eprintln!(
            "Open this URL in a browser and authorize:\n\n  {}\n\n\
             Then paste the URL the browser was redirected to (or just the code):",
            authorize_url
        );

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| AuthError::OAuth {
                message: format!("failed to read from stdin: {}", e),
            })?;

        parse_pasted_code(&line, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_callback_request() {
        let outcome = inspect_request_line("GET /callback?code=abc&state=xyz HTTP/1.1", "xyz");
        assert!(matches!(outcome, CallbackOutcome::Code(c) if c == "abc"));

        let mismatch = inspect_request_line("GET /callback?code=abc&state=evil HTTP/1.1", "xyz");
        assert!(matches!(mismatch, CallbackOutcome::Failed(AuthError::OAuth { .. })));

        let stateless = inspect_request_line("GET /callback?code=abc HTTP/1.1", "xyz");
        assert!(matches!(stateless, CallbackOutcome::Failed(_)));

        let denied = inspect_request_line("GET /callback?error=access_denied HTTP/1.1", "xyz");
        assert!(matches!(denied, CallbackOutcome::Failed(_)));

        let favicon = inspect_request_line("GET /favicon.ico HTTP/1.1", "xyz");
        assert!(matches!(favicon, CallbackOutcome::Ignored));
    }

    #[test]
    fn test_parse_pasted_code() {
        assert_eq!(
            parse_pasted_code(
                "http://127.0.0.1:8765/callback?code=c-1&state=s-1\n",
                "s-1"
            )
            .unwrap(),
            "c-1"
        );
        assert_eq!(parse_pasted_code("  c-2  ", "s-1").unwrap(), "c-2");
        assert!(parse_pasted_code("", "s-1").is_err());
        assert!(
            parse_pasted_code("http://127.0.0.1:8765/callback?code=c&state=other", "s-1").is_err()
        );
    }

    #[tokio::test]
    async fn test_loopback_receives_code() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let source = LoopbackCallback::new(port);
        assert_eq!(
            source.redirect_uri(),
            format!("http://127.0.0.1:{}/callback", port)
        );
        let authorize_url = Url::parse("https://open.feishu.cn/open-apis/authen/v1/authorize").unwrap();

        let server = tokio::spawn(async move { source.obtain_code(&authorize_url, "st").await });

        // Retry until the listener is up.
        let mut stream = loop {
            match tokio::net::TcpStream::connect(("127.0.0.1", port)).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };
        stream
            .write_all(b"GET /callback?code=the-code&state=st HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();

        assert!(String::from_utf8_lossy(&reply).starts_with("HTTP/1.1 200 OK"));
        assert_eq!(server.await.unwrap().unwrap(), "the-code");
    }
}
