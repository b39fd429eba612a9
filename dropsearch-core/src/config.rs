//! Configuration loaded once at startup from the environment

use crate::error::{DropsearchError, Result};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_DROPBOX_API_URL: &str = "https://api.dropboxapi.com";
pub const DEFAULT_DROPBOX_CONTENT_URL: &str = "https://content.dropboxapi.com";
pub const DEFAULT_DROPBOX_OAUTH_URL: &str = "https://api.dropbox.com";

/// Upper bound for every `*_SECS` setting (one year)
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Index name used when `ELASTIC_INDEX` is unset
pub const DEFAULT_INDEX_NAME: &str = "files";

/// Synonym rules (Solr format) applied at index and search time
pub const DEFAULT_SYNONYMS: &[&str] = &[
    "invoice, bill, receipt",
    "contract, agreement",
    "cv, resume, curriculum vitae",
    "report, summary",
    "photo, picture, image",
];

/// Dropbox app credentials and endpoints
#[derive(Debug, Clone)]
pub struct DropboxConfig {
    pub app_key: String,
    pub app_secret: String,
    pub access_token: Option<String>,
    pub refresh_token: String,
    /// Folder to sync; empty string is the app root
    pub folder: String,
    pub api_url: String,
    pub content_url: String,
    pub oauth_url: String,
    /// Assumed lifetime of a configured access token
    pub token_ttl_secs: u64,
    /// Refresh this many seconds before expiry
    pub token_buffer_secs: u64,
}

/// Elasticsearch connection settings
#[derive(Debug, Clone)]
pub struct ElasticConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub index: String,
    pub synonyms: Vec<String>,
}

/// Content extraction settings
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Program run for PDFs, receives the staged path as its last argument
    pub pdf_command: String,
    pub pdf_args: Vec<String>,
    /// Deadline for extracting one file, any format
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            pdf_command: "dropsearch-pdf".into(),
            pdf_args: Vec::new(),
            timeout_secs: 60,
        }
    }
}

/// Configuration for Dropsearch
#[derive(Debug, Clone)]
pub struct DropsearchConfig {
    pub dropbox: DropboxConfig,
    pub elastic: ElasticConfig,
    pub extraction: ExtractionConfig,

    /// Directory downloads are staged in before extraction
    pub staging_dir: PathBuf,

    /// Keep staged files after processing instead of deleting them
    pub keep_staged: bool,

    pub sync_interval_secs: u64,

    /// Maximum files processed concurrently within a pass
    pub sync_parallelism: usize,

    /// Upper bound on search results per request
    pub max_results: usize,
}

impl DropsearchConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let dropbox = DropboxConfig {
            app_key: env.required("DROPBOX_APP_KEY")?,
            app_secret: env.required("DROPBOX_APP_SECRET")?,
            access_token: env.optional("DROPBOX_ACCESS_TOKEN"),
            refresh_token: env.required("DROPBOX_REFRESH_TOKEN")?,
            folder: env.optional("DROPBOX_FOLDER").unwrap_or_default(),
            api_url: env.url_or("DROPBOX_API_URL", DEFAULT_DROPBOX_API_URL),
            content_url: env.url_or("DROPBOX_CONTENT_URL", DEFAULT_DROPBOX_CONTENT_URL),
            oauth_url: env.url_or("DROPBOX_OAUTH_URL", DEFAULT_DROPBOX_OAUTH_URL),
            token_ttl_secs: env.secs_or("DROPBOX_TOKEN_TTL_SECS", 4 * 60 * 60)?,
            token_buffer_secs: env.secs_or("DROPBOX_TOKEN_BUFFER_SECS", 300)?,
        };

        let synonyms = match env.optional("ELASTIC_SYNONYMS") {
            Some(raw) => raw
                .split(';')
                .map(str::trim)
                .filter(|rule| !rule.is_empty())
                .map(String::from)
                .collect(),
            None => DEFAULT_SYNONYMS.iter().map(|s| s.to_string()).collect(),
        };

        let elastic = ElasticConfig {
            url: env.required("ELASTICSEARCH_URL")?.trim_end_matches('/').to_string(),
            username: env.optional("ELASTIC_USERNAME"),
            password: env.optional("ELASTIC_PASSWORD"),
            index: env.optional("ELASTIC_INDEX").unwrap_or_else(|| DEFAULT_INDEX_NAME.into()),
            synonyms,
        };

        let defaults = ExtractionConfig::default();
        let extraction = ExtractionConfig {
            pdf_command: env.optional("DROPSEARCH_PDF_COMMAND").unwrap_or(defaults.pdf_command),
            pdf_args: Vec::new(),
            timeout_secs: env.secs_or("DROPSEARCH_EXTRACT_TIMEOUT_SECS", defaults.timeout_secs)?,
        };

        let staging_dir = env
            .optional("DOWNLOADS_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(default_staging_dir);

        let sync_parallelism: usize = env.parse_or("DROPSEARCH_SYNC_PARALLELISM", 4)?;
        let max_results: usize = env.parse_or("DROPSEARCH_MAX_RESULTS", 100)?;
        if sync_parallelism == 0 {
            return Err(DropsearchError::Config(
                "DROPSEARCH_SYNC_PARALLELISM must be at least 1".into(),
            ));
        }
        if max_results == 0 {
            return Err(DropsearchError::Config(
                "DROPSEARCH_MAX_RESULTS must be at least 1".into(),
            ));
        }

        Ok(Self {
            dropbox,
            elastic,
            extraction,
            staging_dir,
            keep_staged: env.parse_or("DROPSEARCH_KEEP_STAGED", false)?,
            sync_interval_secs: env.secs_or("SYNC_INTERVAL_SECS", 30 * 60)?,
            sync_parallelism,
            max_results,
        })
    }

    /// Human-readable settings with secrets masked
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        vec![
            ("dropbox.app_key", mask(&self.dropbox.app_key)),
            ("dropbox.folder", display_folder(&self.dropbox.folder)),
            ("dropbox.api_url", self.dropbox.api_url.clone()),
            ("elastic.url", self.elastic.url.clone()),
            ("elastic.index", self.elastic.index.clone()),
            (
                "elastic.username",
                self.elastic.username.clone().unwrap_or_else(|| "-".into()),
            ),
            ("elastic.synonyms", self.elastic.synonyms.len().to_string()),
            ("staging_dir", self.staging_dir.display().to_string()),
            ("keep_staged", self.keep_staged.to_string()),
            ("sync_interval_secs", self.sync_interval_secs.to_string()),
            ("sync_parallelism", self.sync_parallelism.to_string()),
            ("pdf_command", self.extraction.pdf_command.clone()),
            ("extract_timeout_secs", self.extraction.timeout_secs.to_string()),
            ("max_results", self.max_results.to_string()),
        ]
    }
}

/// Seconds as a signed chrono duration, `None` past chrono's range
pub(crate) fn chrono_secs(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}

fn default_staging_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "Dropsearch")
        .map(|d| d.data_dir().join("staging"))
        .unwrap_or_else(|| PathBuf::from(".dropsearch/staging"))
}

fn display_folder(folder: &str) -> String {
    if folder.is_empty() {
        "/".into()
    } else {
        folder.to_string()
    }
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{}***", visible)
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key).ok_or_else(|| {
            DropsearchError::Config(format!("Missing required environment variable: {}", key))
        })
    }

    fn url_or(&self, key: &str, default: &str) -> String {
        self.optional(key)
            .unwrap_or_else(|| default.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.optional(key) {
            Some(raw) => raw.trim().parse().map_err(|_| {
                DropsearchError::Config(format!("Invalid value for {}: {}", key, raw))
            }),
            None => Ok(default),
        }
    }

    fn secs_or(&self, key: &str, default: u64) -> Result<u64> {
        let secs = self.parse_or(key, default)?;
        if secs > MAX_DURATION_SECS {
            return Err(DropsearchError::Config(format!(
                "{} must be at most {} seconds",
                key, MAX_DURATION_SECS
            )));
        }
        Ok(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DROPBOX_APP_KEY", "key123"),
            ("DROPBOX_APP_SECRET", "secret"),
            ("DROPBOX_REFRESH_TOKEN", "refresh"),
            ("ELASTICSEARCH_URL", "http://localhost:9200/"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<DropsearchConfig> {
        DropsearchConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.sync_interval_secs, 1800);
        assert_eq!(config.max_results, 100);
        assert_eq!(config.elastic.index, "files");
        assert_eq!(config.elastic.url, "http://localhost:9200");
        assert_eq!(config.dropbox.token_buffer_secs, 300);
        assert_eq!(config.dropbox.api_url, DEFAULT_DROPBOX_API_URL);
        assert!(config.dropbox.access_token.is_none());
        assert_eq!(config.elastic.synonyms.len(), DEFAULT_SYNONYMS.len());
        assert!(!config.keep_staged);
    }

    #[test]
    fn test_missing_required_variable_is_named() {
        let mut env = base_env();
        env.remove("DROPBOX_REFRESH_TOKEN");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("DROPBOX_REFRESH_TOKEN"));
    }

    #[test]
    fn test_invalid_number_rejected() {
        let mut env = base_env();
        env.insert("SYNC_INTERVAL_SECS", "soon");
        assert!(matches!(load(&env), Err(DropsearchError::Config(_))));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        for key in ["DROPBOX_TOKEN_TTL_SECS", "SYNC_INTERVAL_SECS", "DROPSEARCH_EXTRACT_TIMEOUT_SECS"] {
            let mut env = base_env();
            env.insert(key, "10000000000000000");
            match load(&env) {
                Err(DropsearchError::Config(message)) => assert!(message.contains(key), "{}", message),
                other => panic!("expected config error for {}, got {:?}", key, other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_one_year_interval_accepted() {
        let mut env = base_env();
        env.insert("SYNC_INTERVAL_SECS", "31536000");
        assert_eq!(load(&env).unwrap().sync_interval_secs, MAX_DURATION_SECS);
    }

    #[test]
    fn test_chrono_secs_out_of_range() {
        assert_eq!(chrono_secs(60), Some(chrono::Duration::minutes(1)));
        assert!(chrono_secs(u64::MAX).is_none());
        assert!(chrono_secs(i64::MAX as u64).is_none());
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let mut env = base_env();
        env.insert("DROPSEARCH_SYNC_PARALLELISM", "0");
        assert!(load(&env).is_err());
    }

    #[test]
    fn test_synonyms_split_on_semicolon() {
        let mut env = base_env();
        env.insert("ELASTIC_SYNONYMS", "car, automobile; ;tv, television");
        let config = load(&env).unwrap();
        assert_eq!(config.elastic.synonyms, vec!["car, automobile", "tv, television"]);
    }

    #[test]
    fn test_describe_masks_secrets() {
        let config = load(&base_env()).unwrap();
        let described = config.describe();
        let key = described.iter().find(|(k, _)| *k == "dropbox.app_key").unwrap();
        assert_eq!(key.1, "key1***");
        assert!(!described.iter().any(|(_, v)| v.contains("secret")));
    }
}
