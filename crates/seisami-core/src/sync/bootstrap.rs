//! First upload of a device's boards when cloud sync is enabled

use std::collections::BTreeMap;

use serde::Serialize;

use super::transport::SyncTransport;
use crate::error::Result;
use crate::models::{ExportedData, TableName, Versioned};
use crate::services::LocalStore;

/// Counts of what a bootstrap merged and wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub boards: usize,
    pub columns: usize,
    pub cards: usize,
    pub transcriptions: usize,
    pub failed: usize,
}

/// Merge two entity lists by id; the cloud copy wins only when strictly newer.
pub fn merge_latest<T: Versioned>(local: Vec<T>, cloud: Vec<T>) -> Vec<T> {
    let mut merged: BTreeMap<String, T> = local
        .into_iter()
        .map(|entity| (entity.id().to_string(), entity))
        .collect();

    for entity in cloud {
        let newer = merged
            .get(entity.id())
            .is_none_or(|existing| entity.updated_at() > existing.updated_at());
        if newer {
            merged.insert(entity.id().to_string(), entity);
        }
    }

    merged.into_values().collect()
}

pub fn merge_exports(local: ExportedData, cloud: ExportedData) -> ExportedData {
    ExportedData {
        boards: merge_latest(local.boards, cloud.boards),
        columns: merge_latest(local.columns, cloud.columns),
        cards: merge_latest(local.cards, cloud.cards),
        transcriptions: merge_latest(local.transcriptions, cloud.transcriptions),
    }
}

/// Merge local and cloud entities, write the result to both sides, then
/// seed the cloud's sync state and copy it locally.
///
/// Failing to export either side aborts; single entity writes are logged and counted.
pub async fn bootstrap_cloud<T: SyncTransport>(
    local: &LocalStore,
    cloud: &T,
) -> Result<BootstrapReport> {
    let local_data = local.export_all().await?;
    let cloud_data = cloud.export_all().await?;
    tracing::info!(
        local = local_data.len(),
        cloud = cloud_data.len(),
        "Starting cloud bootstrap"
    );

    let merged = merge_exports(local_data, cloud_data);
    let mut report = BootstrapReport {
        boards: merged.boards.len(),
        columns: merged.columns.len(),
        cards: merged.cards.len(),
        transcriptions: merged.transcriptions.len(),
        failed: 0,
    };

    for board in &merged.boards {
        let remote = cloud.upsert_board(board).await.map_err(crate::Error::from);
        let stored = local.import_board(board).await;
        report.failed += count_failures("board", &board.id, [remote, stored]);
    }
    for column in &merged.columns {
        let remote = cloud.upsert_column(column).await.map_err(crate::Error::from);
        let stored = local.import_column(column).await;
        report.failed += count_failures("column", &column.id, [remote, stored]);
    }
    for card in &merged.cards {
        let remote = cloud.upsert_card(card).await.map_err(crate::Error::from);
        let stored = local.import_card(card).await;
        report.failed += count_failures("card", &card.id, [remote, stored]);
    }
    for transcription in &merged.transcriptions {
        let remote = cloud
            .upsert_transcription(transcription)
            .await
            .map_err(crate::Error::from);
        let stored = local.import_transcription(transcription).await;
        report.failed += count_failures("transcription", &transcription.id, [remote, stored]);
    }

    cloud.initialize_sync_state().await?;

    for table in TableName::ALL {
        match cloud.get_sync_state(table).await {
            Ok(Some(state)) => {
                if let Err(error) = local.put_sync_state(&state).await {
                    tracing::warn!(table = %table, %error, "Failed to store sync state locally");
                }
            }
            Ok(None) => tracing::warn!(table = %table, "Cloud returned no sync state"),
            Err(error) => tracing::warn!(table = %table, %error, "Failed to fetch sync state"),
        }
    }

    tracing::info!(
        boards = report.boards,
        columns = report.columns,
        cards = report.cards,
        transcriptions = report.transcriptions,
        failed = report.failed,
        "Cloud bootstrap finished"
    );
    Ok(report)
}

fn count_failures(kind: &str, id: &str, results: [Result<()>; 2]) -> usize {
    results
        .into_iter()
        .filter_map(std::result::Result::err)
        .inspect(|error| tracing::warn!(kind, id, %error, "Bootstrap write failed"))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Board, Timestamp};
    use crate::sync::StoreTransport;
    use pretty_assertions::assert_eq;

    fn board(id: &str, name: &str, updated_at: i64) -> Board {
        Board {
            id: id.to_string(),
            name: name.to_string(),
            created_at: Timestamp::from_millis(1),
            updated_at: Timestamp::from_millis(updated_at),
        }
    }

    #[test]
    fn newer_updated_at_wins_per_id() {
        let merged = merge_latest(
            vec![board("a", "local-a", 20), board("b", "local-b", 10)],
            vec![board("a", "cloud-a", 10), board("b", "cloud-b", 30), board("c", "cloud-c", 5)],
        );
        let names: Vec<_> = merged.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["local-a", "cloud-b", "cloud-c"]);
    }

    #[test]
    fn equal_updated_at_keeps_local() {
        let merged = merge_latest(vec![board("a", "local", 10)], vec![board("a", "cloud", 10)]);
        assert_eq!(merged[0].name, "local");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bootstrap_converges_entities_and_seeds_state() {
        let local = LocalStore::open_in_memory().await.unwrap();
        let cloud = LocalStore::open_in_memory().await.unwrap();
        local.import_board(&board("a", "local-a", 20)).await.unwrap();
        cloud.import_board(&board("a", "cloud-a", 10)).await.unwrap();
        cloud.import_board(&board("c", "cloud-c", 5)).await.unwrap();

        let report = bootstrap_cloud(&local, &StoreTransport::new(cloud.clone()))
            .await
            .unwrap();

        assert_eq!(report.boards, 2);
        assert_eq!(report.failed, 0);
        let local_boards = local.export_all().await.unwrap().boards;
        let cloud_boards = cloud.export_all().await.unwrap().boards;
        assert_eq!(local_boards, cloud_boards);
        assert_eq!(local_boards[0].name, "local-a");
        for table in TableName::ALL {
            assert_eq!(
                local.sync_state(table).await.unwrap(),
                Some(crate::models::SyncState::zeroed(table))
            );
        }
    }
}
