//! Config for the defaults a DML session applies to every statement.

use std::num::NonZeroUsize;

use bulkdml_engine::SessionOptions;

/// CLI config for session defaults.
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct SessionConfig {
    /// Number of requests sent to the server in one envelope.
    ///
    /// A value of 1 sends every request on its own. Overridden per statement by a
    /// `BATCH_SIZE_<n>` hint.
    #[clap(
        long = "batch-size",
        env = "BULKDML_BATCH_SIZE",
        default_value = "100",
        action
    )]
    pub batch_size: NonZeroUsize,

    /// Maximum number of workers sending requests at the same time.
    ///
    /// The server's own recommendation caps this further. Overridden per statement by `MAXDOP`.
    #[clap(
        long = "max-dop",
        env = "BULKDML_MAX_DOP",
        default_value = "10",
        action
    )]
    pub max_dop: NonZeroUsize,

    /// Ask the server to skip custom plugins for every statement.
    #[clap(
        long = "bypass-custom-plugins",
        env = "BULKDML_BYPASS_CUSTOM_PLUGINS",
        action
    )]
    pub bypass_custom_plugins: bool,
}

impl SessionConfig {
    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            batch_size: self.batch_size,
            max_degree_of_parallelism: self.max_dop,
            bypass_custom_plugins: self.bypass_custom_plugins,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_the_engine() {
        let config = SessionConfig::try_parse_from(["server"]).unwrap();
        assert_eq!(config.options(), SessionOptions::default());
    }

    #[test]
    fn overrides() {
        let config = SessionConfig::try_parse_from([
            "server",
            "--batch-size",
            "1",
            "--max-dop",
            "4",
            "--bypass-custom-plugins",
        ])
        .unwrap();

        assert_eq!(
            config.options(),
            SessionOptions {
                batch_size: NonZeroUsize::MIN,
                max_degree_of_parallelism: NonZeroUsize::new(4).unwrap(),
                bypass_custom_plugins: true,
            }
        );
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(SessionConfig::try_parse_from(["server", "--batch-size", "0"]).is_err());
    }
}
