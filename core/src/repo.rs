// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Repository reference normalization and existence validation.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{OrchestratorError, OrchestratorResult};

const GITHUB_PREFIX: &str = "https://github.com/";
const DEFAULT_VALIDATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Metadata returned by the code host for a validated repository.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoMeta {
    /// Whether the repository is private. Absent fields on the GitHub
    /// response default to `false` rather than failing validation.
    #[serde(default)]
    pub private: bool,
    /// The default branch name, when reported.
    pub default_branch: Option<String>,
}

/// Strip any number of leading `https://github.com/` prefixes and a
/// trailing `.git`, returning the canonical clone URL.
///
/// Idempotent: `canonicalize(canonicalize(x)) == canonicalize(x)`.
pub fn canonicalize(user_ref: &str) -> String {
    let mut rest = user_ref.trim();
    while let Some(stripped) = rest.strip_prefix(GITHUB_PREFIX) {
        rest = stripped;
    }
    let owner_name = rest.strip_suffix(".git").unwrap_or(rest);
    format!("{GITHUB_PREFIX}{owner_name}.git")
}

/// Split a canonical clone URL into `(owner, name)`.
fn owner_and_name(canonical: &str) -> Option<(&str, &str)> {
    let rest = canonical.strip_prefix(GITHUB_PREFIX)?;
    let rest = rest.strip_suffix(".git")?;
    rest.split_once('/')
}

/// Validates a user-supplied repository reference against GitHub,
/// returning the canonical clone URL and repository metadata.
pub struct RepositoryValidator {
    client: reqwest::Client,
}

impl RepositoryValidator {
    /// Build a validator with the given request timeout.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("fleet-orchestrator")
            .build()
            .expect("reqwest client configuration is static and always valid");
        Self { client }
    }

    /// Validate `user_ref`, confirming existence via the GitHub API.
    ///
    /// Normalization happens first regardless of network outcome, so a
    /// malformed reference (no `owner/name` shape) fails fast with
    /// `InvalidRepository` before any request is made.
    pub async fn validate(&self, user_ref: &str) -> OrchestratorResult<(String, RepoMeta)> {
        let canonical = canonicalize(user_ref);
        let (owner, name) = owner_and_name(&canonical)
            .ok_or_else(|| OrchestratorError::InvalidRepository(user_ref.to_string()))?;

        let url = format!("https://api.github.com/repos/{owner}/{name}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|_| OrchestratorError::InvalidRepository(user_ref.to_string()))?;

        if !response.status().is_success() {
            return Err(OrchestratorError::InvalidRepository(user_ref.to_string()));
        }

        let meta: RepoMeta = response
            .json()
            .await
            .map_err(|_| OrchestratorError::InvalidRepository(user_ref.to_string()))?;

        Ok((canonical, meta))
    }
}

impl Default for RepositoryValidator {
    fn default() -> Self {
        Self::new(DEFAULT_VALIDATE_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_strips_git_suffix() {
        assert_eq!(
            canonicalize("https://github.com/acme/app.git"),
            "https://github.com/acme/app.git"
        );
        assert_eq!(
            canonicalize("https://github.com/acme/app"),
            "https://github.com/acme/app.git"
        );
    }

    #[test]
    fn test_canonicalize_strips_repeated_prefixes() {
        let input = "https://github.com/https://github.com/acme/app.git";
        assert_eq!(canonicalize(input), "https://github.com/acme/app.git");
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let once = canonicalize("https://github.com/https://github.com/acme/app.git");
        let twice = canonicalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_owner_and_name_split() {
        let canonical = canonicalize("https://github.com/acme/app");
        assert_eq!(owner_and_name(&canonical), Some(("acme", "app")));
    }

    #[test]
    fn test_owner_and_name_rejects_malformed() {
        assert_eq!(owner_and_name("https://github.com/acme.git"), None);
    }
}
