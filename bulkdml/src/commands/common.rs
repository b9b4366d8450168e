use std::{path::PathBuf, str::FromStr};

use bulkdml_clap_blocks::{connection::ConnectionTuningConfig, session::SessionConfig};
use bulkdml_engine::QueryHints;
use clap::Parser;
use secrecy::Secret;
use trogging::cli::LoggingConfig;
use url::Url;

#[derive(Debug, Parser)]
pub(crate) struct BulkDmlConfig {
    /// The host URL of the record service
    #[clap(
        short = 'H',
        long = "host",
        env = "BULKDML_HOST_URL",
        default_value = "http://127.0.0.1:8080"
    )]
    pub(crate) host_url: Url,

    /// The token for authentication with the record service
    #[clap(long = "token", env = "BULKDML_AUTH_TOKEN")]
    pub(crate) auth_token: Option<Secret<String>>,

    /// The name the record service is known by in messages
    #[clap(long = "data-source", env = "BULKDML_DATA_SOURCE", default_value = "default")]
    pub(crate) data_source: String,

    /// The logical name of the entity to change
    #[clap(short = 'e', long = "entity")]
    pub(crate) entity: String,

    /// CSV file to read the rows from, with the column names on the first line
    #[clap(short = 'f', long = "file")]
    pub(crate) file_path: PathBuf,

    /// Hints for this statement, e.g. `BATCH_SIZE_50,CONTINUE_ON_ERROR`
    #[clap(long = "hints")]
    pub(crate) hints: Option<SeparatedList<String>>,

    #[clap(flatten)]
    pub(crate) session: SessionConfig,

    #[clap(flatten)]
    pub(crate) tuning: ConnectionTuningConfig,

    #[clap(flatten)]
    pub(crate) logging_config: LoggingConfig,
}

impl BulkDmlConfig {
    pub(crate) fn query_hints(&self) -> QueryHints {
        self.hints
            .iter()
            .flat_map(|hints| hints.0.iter().map(String::as_str))
            .collect()
    }
}

/// A clap argument provided as a list of items separated by `SEPARATOR`, which by default is a ','
#[derive(Debug, Clone)]
pub(crate) struct SeparatedList<T, const SEPARATOR: char = ','>(pub(crate) Vec<T>);

impl<T, const SEPARATOR: char> FromStr for SeparatedList<T, SEPARATOR>
where
    T: FromStr<Err: Into<anyhow::Error>>,
{
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(
            s.split(SEPARATOR)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<T>().map_err(Into::into))
                .collect::<Result<Vec<T>, Self::Err>>()?,
        ))
    }
}

impl<T, const SEPARATOR: char> IntoIterator for SeparatedList<T, SEPARATOR> {
    type Item = T;

    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn separated_list() {
        let list: SeparatedList<String> = "BATCH_SIZE_50, CONTINUE_ON_ERROR,".parse().unwrap();
        assert_eq!(list.0, vec!["BATCH_SIZE_50", "CONTINUE_ON_ERROR"]);

        let list: SeparatedList<u32, ';'> = "1;2".parse().unwrap();
        assert_eq!(list.into_iter().collect::<Vec<_>>(), vec![1, 2]);

        assert!("1;x".parse::<SeparatedList<u32, ';'>>().is_err());
    }

    #[test]
    fn hints_are_passed_through() {
        let config = BulkDmlConfig::try_parse_from([
            "bulkdml",
            "--entity",
            "account",
            "--file",
            "accounts.csv",
            "--hints",
            "batch_size_5,CONTINUE_ON_ERROR",
        ])
        .unwrap();

        let hints = config.query_hints();
        assert!(hints.continue_on_error());
        assert_eq!(
            hints.batch_size().unwrap(),
            std::num::NonZeroUsize::new(5)
        );
        assert_eq!(config.host_url.as_str(), "http://127.0.0.1:8080/");
        assert_eq!(config.data_source, "default");
    }
}
