use seisami_core::sync::bootstrap_cloud;

use crate::commands::common::{http_transport, open_store};
use crate::config::ClientConfig;
use crate::error::CliError;

pub async fn run_bootstrap(config: &ClientConfig, as_json: bool) -> Result<(), CliError> {
    let transport = http_transport(config)?;
    let store = open_store(&config.db_path).await?;
    let report = bootstrap_cloud(&store, &transport).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Bootstrap merged {} boards, {} columns, {} cards, {} transcriptions",
        report.boards, report.columns, report.cards, report.transcriptions
    );
    if report.failed > 0 {
        println!("{} entities failed to upload; run again to retry", report.failed);
    }
    Ok(())
}
