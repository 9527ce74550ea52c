use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf};
use tokio::sync::Semaphore;

pub const DEFAULT_DESC: &str = "Evaluating";
pub const DEFAULT_THREAD_NAME: &str = "ExecutorRunner";

/// Executor settings, fixed when the executor is built.
///
/// Can be loaded from JSON; every field is optional there:
///
/// ```json
/// { "desc": "Scoring ${DATASET}", "raise_exceptions": true, "max_concurrency": 16 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Caption shown by the progress display.
    pub desc: String,
    /// Keep the progress display visible after the run.
    pub keep_progress_bar: bool,
    /// Fail-fast when true: the first failing job aborts the batch.
    /// Fail-soft when false: failures are kept in place as sentinels.
    pub raise_exceptions: bool,
    /// Upper bound on jobs running at once. `None` means no bound.
    pub max_concurrency: Option<usize>,
    /// Name of the worker thread hosting the run.
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            desc: DEFAULT_DESC.to_string(),
            keep_progress_bar: true,
            raise_exceptions: false,
            max_concurrency: None,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl ExecutorConfig {
    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn with_keep_progress_bar(mut self, keep: bool) -> Self {
        self.keep_progress_bar = keep;
        self
    }

    pub fn with_raise_exceptions(mut self, raise: bool) -> Self {
        self.raise_exceptions = raise;
        self
    }

    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        match self.max_concurrency {
            Some(0) => bail!("max_concurrency must be at least 1 (omit it for no limit)"),
            Some(limit) if limit > Semaphore::MAX_PERMITS => {
                bail!("max_concurrency must not exceed {}", Semaphore::MAX_PERMITS)
            }
            _ => {}
        }
        if self.thread_name.is_empty() || self.thread_name.contains('\0') {
            bail!("thread_name must be non-empty and must not contain NUL bytes");
        }
        Ok(())
    }

    /// Parse a JSON document, expand `${VAR}` references and validate.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let cfg: ExecutorConfig = serde_json::from_str(raw).context("invalid executor config")?;
        let cfg = cfg.expanded();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    /// Load from the first config file found by [`resolve_config_path`], or
    /// fall back to defaults when there is none.
    pub fn load_default() -> Result<Self> {
        match resolve_config_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    fn expanded(mut self) -> Self {
        self.desc = expand_env_vars(&self.desc);
        self.thread_name = expand_env_vars(&self.thread_name);
        self
    }
}

/// `FANOUT_CONFIG`, then `$XDG_CONFIG_HOME/fanout/config.json`, then `./fanout.json`.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(p) = env::var("FANOUT_CONFIG") {
        return Some(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("fanout").join("config.json");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let candidate = PathBuf::from("fanout.json");
    if candidate.exists() {
        return Some(candidate);
    }

    None
}

/// Replace `${NAME}` with the value of the environment variable. Unknown
/// variables are left as written.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match env::var(name) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = ExecutorConfig::default();
        assert_eq!(cfg.desc, "Evaluating");
        assert!(cfg.keep_progress_bar);
        assert!(!cfg.raise_exceptions);
        assert_eq!(cfg.max_concurrency, None);
        assert_eq!(cfg.thread_name, "ExecutorRunner");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = ExecutorConfig::from_json_str(r#"{ "raise_exceptions": true }"#).unwrap();
        assert!(cfg.raise_exceptions);
        assert_eq!(cfg.desc, DEFAULT_DESC);
        assert!(cfg.keep_progress_bar);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = ExecutorConfig::from_json_str(r#"{ "max_concurrency": 0 }"#).unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn test_concurrency_above_semaphore_capacity_rejected() {
        let cfg = ExecutorConfig::default().with_max_concurrency(Some(usize::MAX));
        assert!(cfg.validate().is_err());

        let err = ExecutorConfig::from_json_str(r#"{ "max_concurrency": 18446744073709551615 }"#).unwrap_err();
        assert!(err.to_string().contains("must not exceed"));

        let at_limit = ExecutorConfig::default().with_max_concurrency(Some(Semaphore::MAX_PERMITS));
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_unknown_variables_are_kept() {
        assert_eq!(
            expand_env_vars("Scoring ${FANOUT_TEST_SURELY_UNSET_VAR}"),
            "Scoring ${FANOUT_TEST_SURELY_UNSET_VAR}"
        );
        assert_eq!(expand_env_vars("no vars"), "no vars");
        assert_eq!(expand_env_vars("dangling ${OPEN"), "dangling ${OPEN");
    }

    #[test]
    fn test_known_variable_expanded() {
        // PATH is set in any sane test environment.
        let path = env::var("PATH").unwrap();
        assert_eq!(expand_env_vars("[${PATH}]"), format!("[{}]", path));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "desc": "Scoring", "keep_progress_bar": false, "max_concurrency": 4 }}"#).unwrap();

        let cfg = ExecutorConfig::load(file.path()).unwrap();
        assert_eq!(cfg.desc, "Scoring");
        assert!(!cfg.keep_progress_bar);
        assert_eq!(cfg.max_concurrency, Some(4));
    }

    #[test]
    fn test_load_reports_path_on_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = ExecutorConfig::load(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("invalid executor config"));
    }
}
