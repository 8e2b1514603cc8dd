//! Application configuration loaded from environment variables.

use secrecy::SecretString;
use std::env;

/// Environment variable names consumed by [`Config::from_env`].
pub mod env_vars {
    pub const JENKINS_URL: &str = "JENKINS_URL";
    pub const JENKINS_API_URL: &str = "JENKINS_API_URL";
    pub const JENKINS_API_USERNAME: &str = "JENKINS_API_USERNAME";
    pub const JENKINS_API_PASSWORD: &str = "JENKINS_API_PASSWORD";
}

/// Development default values - NEVER use in production.
pub mod defaults {
    pub const DEV_JENKINS_URL: &str = "https://jenkins.localhost";
    pub const DEV_JENKINS_API_URL: &str = "http://jenkins-be.localhost:8080";
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(&'static str),
}

/// Jenkins collaborator configuration.
///
/// The public URL is what stored job runs carry; the API URL is the backend
/// address actually used for `api/json` requests. They differ in typical
/// deployments where the public frontend sits behind an SSO proxy.
#[derive(Debug, Clone)]
pub struct Config {
    /// Public Jenkins base URL (used in persisted record URLs).
    pub jenkins_url: String,
    /// Backend Jenkins API base URL (used for `api/json` fetches).
    pub jenkins_api_url: String,
    /// API username.
    pub username: String,
    /// API password or token.
    pub password: SecretString,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Reads a `.env` file first if one is present. URL variables fall back
    /// to development defaults; credentials are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let jenkins_url = env::var(env_vars::JENKINS_URL)
            .unwrap_or_else(|_| defaults::DEV_JENKINS_URL.to_string());
        let jenkins_api_url = env::var(env_vars::JENKINS_API_URL)
            .unwrap_or_else(|_| defaults::DEV_JENKINS_API_URL.to_string());

        let username = env::var(env_vars::JENKINS_API_USERNAME)
            .map_err(|_| ConfigError::MissingEnvVar(env_vars::JENKINS_API_USERNAME))?;
        let password = env::var(env_vars::JENKINS_API_PASSWORD)
            .map_err(|_| ConfigError::MissingEnvVar(env_vars::JENKINS_API_PASSWORD))?;

        let config = Config {
            jenkins_url,
            jenkins_api_url,
            username,
            password: SecretString::from(password),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.jenkins_url.starts_with("http") {
            return Err(ConfigError::InvalidValue(env_vars::JENKINS_URL));
        }
        if !self.jenkins_api_url.starts_with("http") {
            return Err(ConfigError::InvalidValue(env_vars::JENKINS_API_URL));
        }
        if self.username.is_empty() {
            return Err(ConfigError::InvalidValue(env_vars::JENKINS_API_USERNAME));
        }
        Ok(())
    }

    /// Rewrite a public Jenkins URL into its backend API equivalent.
    pub fn to_api_url(&self, url: &str) -> String {
        url.replace(
            self.jenkins_url.trim_end_matches('/'),
            self.jenkins_api_url.trim_end_matches('/'),
        )
    }

    /// Public URL of a job's landing page.
    pub fn job_url(&self, job_name: &str) -> String {
        format!("{}/job/{}/", self.jenkins_url.trim_end_matches('/'), job_name)
    }

    /// Backend API URL for a job.
    pub fn job_api_url(&self, job_name: &str) -> String {
        format!(
            "{}/job/{}/api/json",
            self.jenkins_api_url.trim_end_matches('/'),
            job_name
        )
    }

    /// Backend API URL for one build of a job.
    pub fn job_run_api_url(&self, job_name: &str, build_number: i64) -> String {
        format!(
            "{}/job/{}/{}/api/json",
            self.jenkins_api_url.trim_end_matches('/'),
            job_name,
            build_number
        )
    }

    /// Backend API URL for the aggregated test report of one build.
    pub fn test_report_api_url(&self, job_name: &str, build_number: i64) -> String {
        format!(
            "{}/job/{}/{}/testReport/api/json",
            self.jenkins_api_url.trim_end_matches('/'),
            job_name,
            build_number
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            jenkins_url: "https://jenkins.example.com".to_string(),
            jenkins_api_url: "http://jenkins-be.internal:8080".to_string(),
            username: "analyst".to_string(),
            password: SecretString::from("hunter2"),
        }
    }

    #[test]
    fn test_to_api_url_rewrites_public_prefix() {
        let config = test_config();
        assert_eq!(
            config.to_api_url("https://jenkins.example.com/job/24.04-Base-Oracle-Daily-Test/12/"),
            "http://jenkins-be.internal:8080/job/24.04-Base-Oracle-Daily-Test/12/"
        );
    }

    #[test]
    fn test_url_builders() {
        let config = test_config();
        assert_eq!(
            config.job_url("24.04-Base-Oracle-Daily-Test"),
            "https://jenkins.example.com/job/24.04-Base-Oracle-Daily-Test/"
        );
        assert_eq!(
            config.job_run_api_url("24.04-Base-Oracle-Daily-Test", 12),
            "http://jenkins-be.internal:8080/job/24.04-Base-Oracle-Daily-Test/12/api/json"
        );
        assert_eq!(
            config.test_report_api_url("24.04-Base-Oracle-Daily-Test", 12),
            "http://jenkins-be.internal:8080/job/24.04-Base-Oracle-Daily-Test/12/testReport/api/json"
        );
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let mut config = test_config();
        config.jenkins_url = "jenkins.example.com".to_string();
        assert!(config.validate().is_err());
    }
}
