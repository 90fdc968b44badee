//! Hub access token discovery

use std::path::Path;

use tracing::debug;
use tuner_core::{Error, Result};

/// Environment variable checked after an explicit token
pub const TOKEN_ENV: &str = "HF_TOKEN";

/// Token files below the home directory, in lookup order
const TOKEN_FILES: [&str; 2] = [".cache/huggingface/token", ".huggingface/token"];

/// Find a hub token
///
/// Lookup order: explicit token, `HF_TOKEN`, `~/.cache/huggingface/token`,
/// `~/.huggingface/token`. Blank values are skipped.
pub fn resolve_token(explicit: Option<&str>) -> Result<String> {
    let home = dirs::home_dir();
    resolve_token_from(explicit, std::env::var(TOKEN_ENV).ok(), home.as_deref())
}

/// [`resolve_token`] with the environment supplied by the caller
pub fn resolve_token_from(
    explicit: Option<&str>,
    env_token: Option<String>,
    home: Option<&Path>,
) -> Result<String> {
    let non_blank = |t: &str| {
        let t = t.trim();
        (!t.is_empty()).then(|| t.to_string())
    };

    if let Some(token) = explicit.and_then(non_blank) {
        debug!("Using hub token from configuration");
        return Ok(token);
    }
    if let Some(token) = env_token.as_deref().and_then(non_blank) {
        debug!(var = TOKEN_ENV, "Using hub token from environment");
        return Ok(token);
    }
    if let Some(home) = home {
        for relative in TOKEN_FILES {
            let path = home.join(relative);
            if let Some(token) = std::fs::read_to_string(&path)
                .ok()
                .as_deref()
                .and_then(non_blank)
            {
                debug!(path = %path.display(), "Using hub token from file");
                return Ok(token);
            }
        }
    }

    Err(Error::MissingToken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_token(home: &Path, relative: &str, token: &str) {
        let path = home.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, token).unwrap();
    }

    #[test]
    fn test_explicit_wins() {
        let home = tempdir().unwrap();
        write_token(home.path(), ".cache/huggingface/token", "hf_file");
        let token =
            resolve_token_from(Some("hf_cfg"), Some("hf_env".into()), Some(home.path())).unwrap();
        assert_eq!(token, "hf_cfg");
    }

    #[test]
    fn test_env_before_files() {
        let home = tempdir().unwrap();
        write_token(home.path(), ".cache/huggingface/token", "hf_file");
        let token = resolve_token_from(Some("  "), Some("hf_env".into()), Some(home.path())).unwrap();
        assert_eq!(token, "hf_env");
    }

    #[test]
    fn test_cache_file_before_legacy_file() {
        let home = tempdir().unwrap();
        write_token(home.path(), ".huggingface/token", "hf_legacy");
        assert_eq!(
            resolve_token_from(None, None, Some(home.path())).unwrap(),
            "hf_legacy"
        );

        write_token(home.path(), ".cache/huggingface/token", "hf_cached\n");
        assert_eq!(
            resolve_token_from(None, None, Some(home.path())).unwrap(),
            "hf_cached"
        );
    }

    #[test]
    fn test_missing_token() {
        let home = tempdir().unwrap();
        let result = resolve_token_from(None, Some(String::new()), Some(home.path()));
        assert!(matches!(result, Err(Error::MissingToken)));
        assert!(matches!(
            resolve_token_from(None, None, None),
            Err(Error::MissingToken)
        ));
    }
}
