use serde::{Deserialize, Serialize};

/// Lifecycle notifications sent to the process that supervises the sidecar
///
/// Each event is written as one line. The JSON form is the primary contract;
/// the sentinel form keeps older supervisors that grep stdout working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SidecarEvent {
    Starting { version: String },
    Connecting { hostname: String },
    Connected { ips: Vec<String> },
    Listening { mode: String, addr: String },
    Ready { url: String },
    Error { message: String },
    Shutdown,
    AuthRequired {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        url: Option<String>,
    },
}

impl SidecarEvent {
    /// Sentinel word for this event, e.g. `@@SIDECAR:READY@@`
    pub fn sentinel(&self) -> &'static str {
        match self {
            SidecarEvent::Starting { .. } => "@@SIDECAR:STARTING@@",
            SidecarEvent::Connecting { .. } => "@@SIDECAR:CONNECTING@@",
            SidecarEvent::Connected { .. } => "@@SIDECAR:CONNECTED@@",
            SidecarEvent::Listening { .. } => "@@SIDECAR:LISTENING@@",
            SidecarEvent::Ready { .. } => "@@SIDECAR:READY@@",
            SidecarEvent::Error { .. } => "@@SIDECAR:ERROR@@",
            SidecarEvent::Shutdown => "@@SIDECAR:SHUTDOWN@@",
            SidecarEvent::AuthRequired { .. } => "@@SIDECAR:AUTH_REQUIRED@@",
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            SidecarEvent::Starting { version } => Some(version.clone()),
            SidecarEvent::Connecting { hostname } => Some(hostname.clone()),
            SidecarEvent::Connected { ips } => Some(format!("ips=[{}]", ips.join(" "))),
            SidecarEvent::Listening { mode, addr } => Some(format!("mode={} addr={}", mode, addr)),
            SidecarEvent::Ready { url } => Some(url.clone()),
            SidecarEvent::Error { message } => Some(message.clone()),
            SidecarEvent::Shutdown => None,
            SidecarEvent::AuthRequired { url } => url.clone(),
        }
    }

    /// Encode as a sentinel line without the trailing newline
    pub fn to_sentinel_line(&self) -> String {
        match self.detail() {
            Some(detail) => format!("{} {}", self.sentinel(), detail),
            None => self.sentinel().to_string(),
        }
    }

    /// Encode as a single-line JSON object without the trailing newline
    pub fn to_json_line(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_json() {
        let event = SidecarEvent::Ready {
            url: "http://127.0.0.1:8080".to_string(),
        };
        let json = event.to_json_line().unwrap();
        assert_eq!(json, r#"{"event":"ready","url":"http://127.0.0.1:8080"}"#);

        let parsed: SidecarEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_shutdown_json() {
        let json = SidecarEvent::Shutdown.to_json_line().unwrap();
        assert_eq!(json, r#"{"event":"shutdown"}"#);
    }

    #[test]
    fn test_auth_required_json() {
        let event = SidecarEvent::AuthRequired {
            url: Some("https://login.example.com/a/abc".to_string()),
        };
        let json = event.to_json_line().unwrap();
        assert!(json.contains(r#""event":"auth_required""#));

        let bare = SidecarEvent::AuthRequired { url: None };
        assert_eq!(bare.to_json_line().unwrap(), r#"{"event":"auth_required"}"#);
        let parsed: SidecarEvent = serde_json::from_str(r#"{"event":"auth_required"}"#).unwrap();
        assert_eq!(parsed, bare);
    }

    #[test]
    fn test_sentinel_lines() {
        let cases = vec![
            (
                SidecarEvent::Starting {
                    version: "0.3.0".to_string(),
                },
                "@@SIDECAR:STARTING@@ 0.3.0",
            ),
            (
                SidecarEvent::Connecting {
                    hostname: "ts-proxy".to_string(),
                },
                "@@SIDECAR:CONNECTING@@ ts-proxy",
            ),
            (
                SidecarEvent::Connected {
                    ips: vec!["100.64.0.1".to_string(), "fd7a:115c:a1e0::1".to_string()],
                },
                "@@SIDECAR:CONNECTED@@ ips=[100.64.0.1 fd7a:115c:a1e0::1]",
            ),
            (
                SidecarEvent::Listening {
                    mode: "socks5".to_string(),
                    addr: "127.0.0.1:1080".to_string(),
                },
                "@@SIDECAR:LISTENING@@ mode=socks5 addr=127.0.0.1:1080",
            ),
            (
                SidecarEvent::Ready {
                    url: "socks5://127.0.0.1:1080".to_string(),
                },
                "@@SIDECAR:READY@@ socks5://127.0.0.1:1080",
            ),
            (
                SidecarEvent::Error {
                    message: "tailnet connection failed".to_string(),
                },
                "@@SIDECAR:ERROR@@ tailnet connection failed",
            ),
            (SidecarEvent::Shutdown, "@@SIDECAR:SHUTDOWN@@"),
            (
                SidecarEvent::AuthRequired { url: None },
                "@@SIDECAR:AUTH_REQUIRED@@",
            ),
        ];

        for (event, want) in cases {
            assert_eq!(event.to_sentinel_line(), want);
        }
    }
}
