//! htpasswd file parser
//!
//! Parses `user:digest` lines. Only bcrypt digests are accepted.

use crate::error::TlsSocksError;
use std::collections::HashMap;
use std::path::Path;

const BCRYPT_PREFIXES: [&str; 4] = ["$2a$", "$2b$", "$2x$", "$2y$"];

/// Load an htpasswd file into a user -> digest map
pub fn load_htpasswd<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>, TlsSocksError> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        TlsSocksError::Credentials(format!("Failed to read {:?}: {}", path.as_ref(), e))
    })?;

    parse_htpasswd(&content)
}

/// Parse htpasswd content into a user -> digest map
pub fn parse_htpasswd(content: &str) -> Result<HashMap<String, String>, TlsSocksError> {
    let mut users = HashMap::new();

    for (line_num, line) in content.lines().enumerate() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (user, digest) = line.split_once(':').ok_or_else(|| {
            TlsSocksError::Credentials(format!("line {}: expected user:digest", line_num + 1))
        })?;

        if user.is_empty() {
            return Err(TlsSocksError::Credentials(format!(
                "line {}: empty username",
                line_num + 1
            )));
        }

        if !BCRYPT_PREFIXES.iter().any(|p| digest.starts_with(p)) {
            return Err(TlsSocksError::Credentials(format!(
                "line {}: unsupported digest for user {}, only bcrypt is accepted",
                line_num + 1,
                user
            )));
        }

        if users.insert(user.to_string(), digest.to_string()).is_some() {
            tracing::warn!(
                line = line_num + 1,
                user = %user,
                "Duplicate htpasswd entry, later one wins"
            );
        }
    }

    tracing::info!(count = users.len(), "Loaded htpasswd users");
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TEST_DIGEST: &str = "$2y$10$n0MZPvD3lqFlEGqbZzu7vuAvdIYn1qJJAriFmSpXq/HbOQZ1nup3a";

    #[test]
    fn test_parse_htpasswd() {
        let content = format!(
            "# users\n\nalice:{}\n  bob:{}  \n",
            TEST_DIGEST, "$2b$04$abcdefghijklmnopqrstuuabcdefghijklmnopqrstuvwxyz01234"
        );

        let users = parse_htpasswd(&content).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users["alice"], TEST_DIGEST);
        assert!(users["bob"].starts_with("$2b$04$"));
    }

    #[test]
    fn test_parse_htpasswd_rejects_non_bcrypt() {
        let err = parse_htpasswd("alice:{SHA}W6ph5Mm5Pz8GgiULbPgzG37mj9g=").unwrap_err();
        assert!(err.to_string().contains("line 1"));

        assert!(parse_htpasswd("alice:$apr1$salt$hash").is_err());
    }

    #[test]
    fn test_parse_htpasswd_rejects_malformed_lines() {
        assert!(parse_htpasswd("no-separator").is_err());
        assert!(parse_htpasswd(&format!(":{}", TEST_DIGEST)).is_err());
    }

    #[test]
    fn test_parse_htpasswd_duplicate_later_wins() {
        let content = format!("alice:$2a$04$first\nalice:{}\n", TEST_DIGEST);
        let users = parse_htpasswd(&content).unwrap();
        assert_eq!(users["alice"], TEST_DIGEST);
    }

    #[test]
    fn test_load_htpasswd() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "test:{}", TEST_DIGEST).unwrap();

        let users = load_htpasswd(file.path()).unwrap();
        assert_eq!(users["test"], TEST_DIGEST);

        assert!(load_htpasswd("/nonexistent/htpasswd").is_err());
    }
}
