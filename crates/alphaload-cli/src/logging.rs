use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Targets that `--log-level` applies to when given as a bare level.
const WORKSPACE_TARGETS: &[&str] = &[
    "alphaload",
    "alphaload_clean",
    "alphaload_engine",
    "alphaload_writer",
];

/// Initialize structured logging on stderr, keeping stdout for `plan` output.
///
/// `RUST_LOG` wins when set. Otherwise a bare level such as `debug` is scoped
/// to the loader's own crates with dependencies held at `warn`; any other
/// value is used as a filter directive as-is.
pub fn init(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(log_level)));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn directives(log_level: &str) -> String {
    if log_level.parse::<LevelFilter>().is_err() {
        return log_level.to_owned();
    }
    std::iter::once("warn".to_owned())
        .chain(
            WORKSPACE_TARGETS
                .iter()
                .map(|target| format!("{target}={log_level}")),
        )
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_level_is_scoped_to_workspace_crates() {
        let d = directives("debug");
        assert!(d.starts_with("warn,"));
        assert!(d.contains("alphaload_writer=debug"));
        assert!(d.contains("alphaload=debug"));
        assert!(!d.contains("tokio_postgres"));
    }

    #[test]
    fn explicit_directives_pass_through() {
        assert_eq!(
            directives("alphaload_engine=trace,tokio_postgres=debug"),
            "alphaload_engine=trace,tokio_postgres=debug"
        );
    }
}
