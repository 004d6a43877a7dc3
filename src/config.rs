//! Runtime configuration.
//!
//! The host's `server.cfg` is a plain text file of `key value...` lines.
//! Only one option concerns the JIT; everything else is ignored.

use std::collections::HashMap;
use std::path::Path;

/// Options controlling code generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JitOptions {
    /// Size in bytes of a separately allocated stack for generated code.
    /// `0` runs generated code on the host stack.
    pub stack_size: usize,
}

impl JitOptions {
    pub fn from_server_cfg(cfg: &ServerConfig) -> Self {
        JitOptions {
            stack_size: cfg.get_usize("jit_stack").unwrap_or(0),
        }
    }
}

/// A parsed `server.cfg`.
#[derive(Debug, Default)]
pub struct ServerConfig {
    options: HashMap<String, String>,
}

impl ServerConfig {
    /// Read the file at `path`. A missing or unreadable file yields an
    /// empty configuration; the server runs fine on defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(_) => ServerConfig::default(),
        }
    }

    pub fn parse(text: &str) -> Self {
        let mut options = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once(char::is_whitespace) {
                options.insert(key.to_string(), value.trim().to_string());
            }
        }
        ServerConfig { options }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_lines() {
        let cfg = ServerConfig::parse("hostname my server\njit_stack 2097152\n\n# comment\n");
        assert_eq!(cfg.get("hostname"), Some("my server"));
        assert_eq!(cfg.get_usize("jit_stack"), Some(2097152));
        assert_eq!(cfg.get("missing"), None);
    }

    #[test]
    fn ignores_malformed_values() {
        let cfg = ServerConfig::parse("jit_stack lots\n");
        assert_eq!(cfg.get_usize("jit_stack"), None);
        assert_eq!(JitOptions::from_server_cfg(&cfg).stack_size, 0);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = ServerConfig::load("/nonexistent/server.cfg");
        assert_eq!(JitOptions::from_server_cfg(&cfg), JitOptions::default());
    }

    #[test]
    fn jit_stack_option_is_picked_up() {
        let cfg = ServerConfig::parse("jit_stack 65536");
        assert_eq!(JitOptions::from_server_cfg(&cfg).stack_size, 65536);
    }
}
