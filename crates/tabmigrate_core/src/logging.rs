use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

const HTTP_TARGETS: [&str; 4] = ["reqwest", "hyper", "hyper_util", "rustls"];

/// Filter directives for the crate level plus a separate level for the HTTP stack.
pub fn filter_directives(level: &str, http_level: &str) -> String {
    let mut directives = vec![level.to_string()];
    directives.extend(
        HTTP_TARGETS
            .iter()
            .map(|target| format!("{target}={http_level}")),
    );
    directives.join(",")
}

pub fn build_filter(level: &str, http_level: &str) -> Result<EnvFilter> {
    for value in [level, http_level] {
        value
            .parse::<LevelFilter>()
            .map_err(|_| anyhow!("invalid log level {value:?}"))?;
    }
    let directives = filter_directives(level, http_level);
    EnvFilter::try_new(&directives)
        .with_context(|| format!("invalid log level in {directives:?}"))
}

/// Initialize tracing subscriber once for the process.
///
/// `RUST_LOG` wins when set. Logs go to stderr so command output on stdout
/// stays machine-readable.
pub fn init_tracing(level: &str, http_level: &str) {
    TRACING_INIT.get_or_init(|| {
        let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        let env_filter = select_filter(rust_log.as_deref(), level, http_level);

        let result = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init();
        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}

/// `RUST_LOG` directives when present and valid, else the configured levels,
/// else `info`.
fn select_filter(rust_log: Option<&str>, level: &str, http_level: &str) -> EnvFilter {
    if let Some(filter) = rust_log
        .map(str::trim)
        .filter(|directives| !directives.is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
    {
        return filter;
    }
    build_filter(level, http_level).unwrap_or_else(|err| {
        eprintln!("{err:#}; falling back to info");
        EnvFilter::new("info")
    })
}
