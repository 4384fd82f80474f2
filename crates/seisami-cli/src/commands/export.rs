use std::path::Path;

use crate::commands::common::open_store;
use crate::config::ClientConfig;
use crate::error::CliError;

pub async fn run_export(config: &ClientConfig, output_path: Option<&Path>) -> Result<(), CliError> {
    let store = open_store(&config.db_path).await?;
    let data = store.export_all().await?;
    let rendered = serde_json::to_string_pretty(&data)?;

    if let Some(path) = output_path {
        std::fs::write(path, rendered)?;
        println!("{}", path.display());
    } else {
        println!("{rendered}");
    }

    Ok(())
}
