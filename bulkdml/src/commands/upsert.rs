use std::sync::Arc;

use bulkdml_engine::{ColumnMapping, DmlOperation, Upsert};
use clap::Parser;
use observability_deps::tracing::info;

use super::{
    common::{BulkDmlConfig, SeparatedList},
    dml::{Result, Target},
};

#[derive(Debug, Parser)]
pub(crate) struct Config {
    /// Common bulkdml config
    #[clap(flatten)]
    pub(crate) common: BulkDmlConfig,

    /// Columns to write to the records, defaults to every column of the file other than the key
    #[clap(long = "columns")]
    columns: Option<SeparatedList<String>>,

    /// Columns matching existing records, instead of the primary key
    #[clap(long = "alternate-key")]
    alternate_key: Option<SeparatedList<String>>,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let target = Target::connect(&config.common).await?;
    let keys = match &config.alternate_key {
        Some(columns) => columns.0.clone(),
        None => target.metadata().primary_key.clone(),
    };
    let columns = match config.columns {
        Some(columns) => columns.0,
        None => target
            .columns()
            .into_iter()
            .filter(|c| !keys.contains(c))
            .collect(),
    };

    let mut upsert = Upsert::new(&config.common.entity, ColumnMapping::identity(columns));
    if config.alternate_key.is_some() {
        upsert = upsert.with_alternate_key(keys);
    }
    let upsert = Arc::new(upsert);
    let result = target
        .execute(Arc::clone(&upsert) as Arc<dyn DmlOperation>)
        .await?;

    info!(
        created = upsert.created_count(),
        updated = upsert.updated_count(),
        "upsert finished"
    );
    println!(
        "{} ({} created, {} updated)",
        result.message,
        upsert.created_count(),
        upsert.updated_count()
    );

    Ok(())
}
