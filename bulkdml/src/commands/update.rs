use std::sync::Arc;

use bulkdml_engine::{ColumnMapping, Update};
use clap::Parser;

use super::{
    common::{BulkDmlConfig, SeparatedList},
    dml::{Result, Target},
};

#[derive(Debug, Parser)]
#[clap(visible_alias = "u")]
pub(crate) struct Config {
    /// Common bulkdml config
    #[clap(flatten)]
    pub(crate) common: BulkDmlConfig,

    /// Columns to write to the records, defaults to every column of the file other than the
    /// primary key
    #[clap(long = "columns")]
    columns: Option<SeparatedList<String>>,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let target = Target::connect(&config.common).await?;
    let columns = match config.columns {
        Some(columns) => columns.0,
        None => {
            let keys = &target.metadata().primary_key;
            target
                .columns()
                .into_iter()
                .filter(|c| !keys.contains(c))
                .collect()
        }
    };

    let result = target
        .execute(Arc::new(Update::new(
            &config.common.entity,
            ColumnMapping::identity(columns),
        )))
        .await?;

    println!("{}", result.message);

    Ok(())
}
