use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;

use crate::scheduler::{StoreKind, DEFAULT_FIELDS};
use crate::worker::{ScriptRunner, DEFAULT_SHELL};

/// Address used when none is configured. A bare `:port` binds all interfaces.
pub const DEFAULT_ADDR: &str = ":8457";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Shared secret expected in `Authorization: rtot <secret>`.
    pub secret: String,
    /// Field list applied when a request has no `fields` parameter.
    pub default_job_fields: String,
    pub store_kind: StoreKind,
    /// Interpreter for scripts without a `#!` line.
    pub shell: String,
    /// Where script artifacts are written. System temp dir when unset.
    pub artifact_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: parse_listen_addr(DEFAULT_ADDR).expect("default listen address is valid"),
            secret: String::new(),
            default_job_fields: DEFAULT_FIELDS.to_string(),
            store_kind: StoreKind::Memory,
            shell: DEFAULT_SHELL.to_string(),
            artifact_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr, secret: impl Into<String>) -> Self {
        Self {
            listen_addr,
            secret: secret.into(),
            ..Default::default()
        }
    }

    /// Generate a secret if none was supplied. Returns true when one was made.
    pub fn ensure_secret(&mut self) -> bool {
        if !self.secret.is_empty() {
            return false;
        }
        self.secret = generate_secret();
        true
    }

    pub fn runner(&self) -> ScriptRunner {
        let runner = ScriptRunner::new(self.shell.clone());
        match &self.artifact_dir {
            Some(dir) => runner.with_artifact_dir(dir.clone()),
            None => runner,
        }
    }
}

/// Parse `host:port`, or `:port` meaning every interface.
pub fn parse_listen_addr(addr: &str) -> Result<SocketAddr, AddrParseError> {
    match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port).parse(),
        None => addr.parse(),
    }
}

/// 128 random bits, hex encoded.
pub fn generate_secret() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_default() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:8457");
        assert!(cfg.secret.is_empty());
        assert_eq!(cfg.default_job_fields, "out,err,create,start,complete");
        assert_eq!(cfg.store_kind, StoreKind::Memory);
        assert_eq!(cfg.shell, "/bin/bash");
        assert!(cfg.artifact_dir.is_none());
    }

    #[test]
    fn server_config_new() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let cfg = ServerConfig::new(addr, "swordfish");
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.secret, "swordfish");
        assert_eq!(cfg.shell, "/bin/bash");
    }

    #[test]
    fn ensure_secret_keeps_supplied_value() {
        let mut cfg = ServerConfig::default();
        cfg.secret = "swordfish".to_string();
        assert!(!cfg.ensure_secret());
        assert_eq!(cfg.secret, "swordfish");
    }

    #[test]
    fn ensure_secret_generates_when_missing() {
        let mut cfg = ServerConfig::default();
        assert!(cfg.ensure_secret());
        assert_eq!(cfg.secret.len(), 32);
        assert!(cfg.secret.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_secrets_differ() {
        assert_ne!(generate_secret(), generate_secret());
    }

    #[test]
    fn parse_listen_addr_forms() {
        assert_eq!(
            parse_listen_addr(":8457").unwrap().to_string(),
            "0.0.0.0:8457"
        );
        assert_eq!(
            parse_listen_addr("127.0.0.1:13000").unwrap().to_string(),
            "127.0.0.1:13000"
        );
        assert!(parse_listen_addr("nope").is_err());
        assert!(parse_listen_addr(":").is_err());
    }

    #[test]
    fn runner_uses_configured_shell() {
        let cfg = ServerConfig {
            shell: "/bin/sh".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.runner().shell(), "/bin/sh");
    }
}
