use std::sync::Arc;

use bulkdml_engine::Delete;
use clap::Parser;

use super::{
    common::BulkDmlConfig,
    dml::{Result, Target},
};

#[derive(Debug, Parser)]
#[clap(visible_alias = "d")]
pub(crate) struct Config {
    /// Common bulkdml config
    #[clap(flatten)]
    pub(crate) common: BulkDmlConfig,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let target = Target::connect(&config.common).await?;
    let result = target
        .execute(Arc::new(Delete::new(&config.common.entity)))
        .await?;

    println!("{}", result.message);

    Ok(())
}

#[cfg(test)]
mod tests {
    use bulkdml_engine::ExecutionError;
    use serde_json::json;

    use super::*;
    use crate::commands::dml::{Error, test_helpers::*};

    #[tokio::test]
    async fn delete_by_primary_key() {
        let mut service = RecordService::new().await;
        service
            .expect_envelope(
                json!([
                    {"kind": "delete", "entity": "account", "keys": {"accountid": 10}},
                    {"kind": "delete", "entity": "account", "keys": {"accountid": 11}},
                    {"kind": "delete", "entity": "account", "keys": {"accountid": 12}},
                ]),
                false,
                json!([]),
            )
            .await;
        let file = csv_file("name,accountid\nContoso,10\nFabrikam,11\nNorthwind,12\n");

        let url = service.url();
        let config = Config::try_parse_from(args("delete", &url, &file)).unwrap();
        command(config).await.unwrap();

        service.assert_requests().await;
    }

    #[tokio::test]
    async fn terminal_fault_fails_the_command() {
        let mut service = RecordService::new().await;
        service
            .expect_envelope(
                json!([{"kind": "delete", "entity": "account", "keys": {"accountid": 10}}]),
                false,
                json!([{"request_index": 0, "fault": {"code": -2147220891, "message": "denied"}}]),
            )
            .await;
        let file = csv_file("accountid\n10\n");

        let url = service.url();
        let config = Config::try_parse_from(args("delete", &url, &file)).unwrap();

        assert!(matches!(
            command(config).await,
            Err(Error::Execution(ExecutionError::Fault(_)))
        ));
    }

    #[tokio::test]
    async fn continue_on_error_completes() {
        let mut service = RecordService::new().await;
        service
            .expect_envelope(
                json!([
                    {"kind": "delete", "entity": "account", "keys": {"accountid": 10}},
                    {"kind": "delete", "entity": "account", "keys": {"accountid": 11}},
                ]),
                false,
                json!([{"request_index": 1, "fault": {"code": -2147220891, "message": "denied"}}]),
            )
            .await;
        let file = csv_file("accountid\n10\n11\n");

        let url = service.url();
        let mut args = args("delete", &url, &file);
        args.extend(["--hints", "CONTINUE_ON_ERROR"]);
        command(Config::try_parse_from(args).unwrap()).await.unwrap();

        service.assert_requests().await;
    }
}
