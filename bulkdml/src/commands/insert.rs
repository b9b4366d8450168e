use std::sync::Arc;

use bulkdml_engine::{ColumnMapping, DmlOperation, Insert};
use clap::Parser;

use super::{
    common::{BulkDmlConfig, SeparatedList},
    dml::{Result, Target},
};

#[derive(Debug, Parser)]
#[clap(visible_alias = "i")]
pub(crate) struct Config {
    /// Common bulkdml config
    #[clap(flatten)]
    pub(crate) common: BulkDmlConfig,

    /// Columns to copy into the new records, defaults to every column of the file
    #[clap(long = "columns")]
    columns: Option<SeparatedList<String>>,

    /// Print the id of each record created
    #[clap(long = "print-ids", action)]
    print_ids: bool,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let target = Target::connect(&config.common).await?;
    let columns = match config.columns {
        Some(columns) => columns.0,
        None => target.columns(),
    };

    let insert = Arc::new(Insert::new(
        &config.common.entity,
        ColumnMapping::identity(columns),
    ));
    let result = target
        .execute(Arc::clone(&insert) as Arc<dyn DmlOperation>)
        .await?;

    println!("{}", result.message);
    if config.print_ids {
        for id in insert.created_ids() {
            println!("{id}");
        }
    }

    Ok(())
}
