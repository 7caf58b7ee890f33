//! ngrok agent-backed tunnel provider.
//!
//! Runs the `ngrok` agent as a child process with JSON logging on stdout
//! and waits for the log line announcing the public URL. Closing the
//! handle kills the agent.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

use crate::config::NgrokConfig;
use crate::tunnel::provider::{TunnelError, TunnelHandle, TunnelOptions, TunnelProvider};

pub const DEFAULT_BINARY: &str = "ngrok";
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Error codes ngrok uses for missing or rejected credentials.
const AUTH_ERROR_CODES: [&str; 3] = ["ERR_NGROK_4018", "ERR_NGROK_105", "ERR_NGROK_107"];

/// One line of `--log-format json` output. Only the fields we read.
#[derive(Debug, Deserialize)]
struct AgentLogLine {
    #[serde(default)]
    lvl: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    err: Option<String>,
}

/// Launches the ngrok agent.
#[derive(Debug, Clone)]
pub struct NgrokAgent {
    binary: String,
    startup_timeout: Duration,
}

impl Default for NgrokAgent {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

impl NgrokAgent {
    pub fn new(binary: impl Into<String>, startup_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            startup_timeout,
        }
    }

    pub fn from_config(config: Option<&NgrokConfig>) -> Self {
        let mut agent = Self::default();
        if let Some(config) = config {
            if let Some(binary) = &config.binary {
                agent.binary = binary.clone();
            }
            if let Some(secs) = config.startup_timeout_secs {
                agent.startup_timeout = Duration::from_secs(secs);
            }
        }
        agent
    }

    fn command(&self, port: u16, options: &TunnelOptions) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("http")
            .arg(port.to_string())
            .args(["--log", "stdout", "--log-format", "json"]);

        if let Some(token) = &options.authtoken {
            cmd.arg("--authtoken").arg(token);
        }
        if let Some(domain) = &options.domain {
            cmd.arg("--domain").arg(domain);
        }
        if let Some(subdomain) = &options.subdomain {
            cmd.arg("--subdomain").arg(subdomain);
        }
        if let Some(region) = &options.region {
            cmd.arg("--region").arg(region);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TunnelProvider for NgrokAgent {
    async fn open(&self, port: u16, options: &TunnelOptions) -> Result<Box<dyn TunnelHandle>, TunnelError> {
        let mut child = self
            .command(port, options)
            .spawn()
            .map_err(|e| TunnelError::Provider(format!("failed to launch {}: {}", self.binary, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TunnelError::Provider("ngrok agent stdout unavailable".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let url = match tokio::time::timeout(self.startup_timeout, wait_for_url(&mut lines)).await {
            Ok(Ok(url)) => url,
            Ok(Err(e)) => {
                let _ = child.kill().await;
                return Err(e);
            }
            Err(_) => {
                let _ = child.kill().await;
                return Err(TunnelError::Provider(format!(
                    "ngrok agent did not report a URL within {}s",
                    self.startup_timeout.as_secs()
                )));
            }
        };

        tokio::spawn(drain_logs(lines));

        Ok(Box::new(NgrokSession { url, child }))
    }
}

async fn wait_for_url(lines: &mut Lines<BufReader<ChildStdout>>) -> Result<String, TunnelError> {
    let mut last_error: Option<String> = None;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| TunnelError::Provider(e.to_string()))?
    {
        let Ok(entry) = serde_json::from_str::<AgentLogLine>(&line) else {
            continue;
        };

        if let Some(url) = entry.url.filter(|u| u.starts_with("http")) {
            return Ok(url);
        }

        if entry.lvl == "eror" || entry.lvl == "crit" || entry.err.is_some() {
            let message = entry.err.unwrap_or(entry.msg);
            if is_auth_error(&message) {
                return Err(TunnelError::AuthRequired(message));
            }
            last_error = Some(message);
        }
    }

    Err(TunnelError::Provider(
        last_error.unwrap_or_else(|| "ngrok agent exited before reporting a URL".to_string()),
    ))
}

async fn drain_logs(mut lines: Lines<BufReader<ChildStdout>>) {
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::trace!(target: "liten_gateway::tunnel::agent", "{}", line);
    }
}

fn is_auth_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    AUTH_ERROR_CODES.iter().any(|code| message.contains(code))
        || lower.contains("authtoken")
        || lower.contains("authentication")
}

/// A running agent process.
struct NgrokSession {
    url: String,
    child: Child,
}

#[async_trait]
impl TunnelHandle for NgrokSession {
    fn url(&self) -> &str {
        &self.url
    }

    async fn close(&mut self) -> Result<(), TunnelError> {
        match self.child.kill().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(TunnelError::Provider(format!("failed to stop ngrok agent: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth_errors() {
        assert!(is_auth_error("authentication failed: ERR_NGROK_4018"));
        assert!(is_auth_error("The authtoken you specified is invalid"));
        assert!(!is_auth_error("failed to bind: address in use"));
    }

    #[test]
    fn parses_agent_log_lines() {
        let line = r#"{"addr":"http://localhost:8080","lvl":"info","msg":"started tunnel","name":"command_line","obj":"tunnels","url":"https://abc.ngrok-free.app"}"#;
        let entry: AgentLogLine = serde_json::from_str(line).unwrap();
        assert_eq!(entry.url.as_deref(), Some("https://abc.ngrok-free.app"));
        assert_eq!(entry.lvl, "info");
    }

    #[test]
    fn agent_settings_follow_config() {
        let config = NgrokConfig {
            binary: Some("/opt/ngrok".into()),
            startup_timeout_secs: Some(3),
            ..NgrokConfig::default()
        };
        let agent = NgrokAgent::from_config(Some(&config));
        assert_eq!(agent.binary, "/opt/ngrok");
        assert_eq!(agent.startup_timeout, Duration::from_secs(3));
        assert_eq!(NgrokAgent::from_config(None).binary, DEFAULT_BINARY);
    }

    #[tokio::test]
    async fn missing_binary_is_a_provider_error() {
        let agent = NgrokAgent::new("/nonexistent/ngrok-agent", Duration::from_secs(1));
        let err = agent.open(8080, &TunnelOptions::default()).await.err().unwrap();
        assert!(matches!(err, TunnelError::Provider(_)));
    }
}
