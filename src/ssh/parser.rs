use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static ACCEPTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Accepted\s+(\w+)\s+for\s+(\S+)\s+from\s+(\d+\.\d+\.\d+\.\d+)")
        .expect("valid regex")
});
static SESSION_OPENED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"session opened for user\s+(\S+)\s+.*from\s+(\d+\.\d+\.\d+\.\d+)")
        .expect("valid regex")
});
/// Group 1 is whatever follows the subsystem name, group 2 the remote address.
static SFTP_REQUEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"subsystem request for sftp(.*)from\s+(\d+\.\d+\.\d+\.\d+)")
        .expect("valid regex")
});
static SFTP_USER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"for\s+(\S+)\s+from").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Ssh,
    Sftp,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Ssh => f.write_str("SSH"),
            ConnectionKind::Sftp => f.write_str("SFTP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub kind: ConnectionKind,
    pub user: String,
    pub ip: String,
    /// Authentication method; not reported for SFTP sessions.
    pub auth: Option<String>,
}

/// Extracts a login event from one auth log line.
pub fn parse_line(line: &str) -> Option<Connection> {
    if let Some(caps) = ACCEPTED.captures(line) {
        return Some(Connection {
            kind: ConnectionKind::Ssh,
            user: caps[2].to_string(),
            ip: caps[3].to_string(),
            auth: Some(caps[1].to_string()),
        });
    }

    if let Some(caps) = SESSION_OPENED.captures(line) {
        return Some(Connection {
            kind: ConnectionKind::Ssh,
            user: caps[1].to_string(),
            ip: caps[2].to_string(),
            auth: Some("password".to_string()),
        });
    }

    if let Some(caps) = SFTP_REQUEST.captures(line) {
        // Only look past "request for sftp", or the subsystem name reads as the user.
        let rest = caps.get(1).map_or("", |m| &line[m.start()..]);
        let user = SFTP_USER
            .captures(rest)
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| "unknown".to_string());
        return Some(Connection {
            kind: ConnectionKind::Sftp,
            user,
            ip: caps[2].to_string(),
            auth: None,
        });
    }

    None
}

/// A `faillog -a` row with a non-zero failure count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedLogin {
    pub user: String,
    pub failures: u64,
}

/// Parses `faillog -a` output, skipping the header and rows without failures.
pub fn parse_faillog(output: &str) -> Vec<FailedLogin> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return None;
            }
            let failures: u64 = parts[1].parse().ok()?;
            (failures > 0).then(|| FailedLogin {
                user: parts[0].to_string(),
                failures,
            })
        })
        .collect()
}
