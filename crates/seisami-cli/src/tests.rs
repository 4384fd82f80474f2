use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use pretty_assertions::assert_eq;
use seisami_core::sync::{FetchMode, SyncReport};
use seisami_core::{Operation, OperationType, SyncState, TableName, Timestamp};

use crate::cli::{Cli, Commands, CompletionShell, OperationArg, TableArg};
use crate::commands::common::{
    fetch_mode, format_operation_lines, format_relative_time, format_report_line,
    format_state_line, format_sync_timestamp, newest_operations, open_store, operation_to_item,
    parse_payload,
};
use crate::commands::completions::render_completions;
use crate::commands::record::run_record;
use crate::config::{default_db_path, parse_interval, ClientConfig};
use crate::error::CliError;

fn config_from(map: &HashMap<&str, &str>) -> Result<ClientConfig, CliError> {
    ClientConfig::from_lookup(None, |key| map.get(key).map(|value| (*value).to_string()))
}

fn operation(record_id: &str, millis: i64) -> Operation {
    Operation::new(
        TableName::Cards,
        record_id,
        OperationType::Update,
        "device-a",
        "{}",
    )
    .at(Timestamp::from_millis(millis))
}

#[test]
fn client_config_defaults_without_remote() {
    let config = config_from(&HashMap::new()).unwrap();
    assert_eq!(config.api_url, None);
    assert_eq!(config.sync_interval, Duration::from_secs(300));
    assert_eq!(config.db_path, default_db_path());
    assert!(matches!(config.remote(), Err(CliError::SyncNotConfigured)));
}

#[test]
fn client_config_reads_remote_settings() {
    let map = HashMap::from([
        ("SEISAMI_API_URL", "https://sync.example.com/"),
        ("SEISAMI_ACCESS_TOKEN", " secret-token "),
        ("SEISAMI_SYNC_INTERVAL_SECS", "30"),
        ("SEISAMI_DB_PATH", "/tmp/boards.db"),
    ]);
    let config = config_from(&map).unwrap();

    assert_eq!(
        config.remote().unwrap(),
        ("https://sync.example.com", "secret-token")
    );
    assert_eq!(config.sync_interval, Duration::from_secs(30));
    assert_eq!(config.db_path, PathBuf::from("/tmp/boards.db"));
    assert!(!format!("{config:?}").contains("secret-token"));
}

#[test]
fn client_config_prefers_flag_db_path() {
    let map = HashMap::from([("SEISAMI_DB_PATH", "/tmp/env.db")]);
    let config = ClientConfig::from_lookup(Some(PathBuf::from("/tmp/flag.db")), |key| {
        map.get(key).map(|value| (*value).to_string())
    })
    .unwrap();
    assert_eq!(config.db_path, PathBuf::from("/tmp/flag.db"));
}

#[test]
fn client_config_rejects_bad_values() {
    let map = HashMap::from([("SEISAMI_API_URL", "sync.example.com")]);
    assert!(matches!(config_from(&map), Err(CliError::Config(_))));

    let map = HashMap::from([("SEISAMI_SYNC_INTERVAL_SECS", "soon")]);
    assert!(matches!(config_from(&map), Err(CliError::Config(_))));

    assert!(parse_interval(1).is_err());
    assert!(parse_interval(5).is_ok());
}

#[test]
fn cli_parses_sync_flags() {
    let cli = Cli::try_parse_from(["seisami", "sync", "--table", "cards", "--delta"]).unwrap();
    match cli.command {
        Commands::Sync { table, delta, json } => {
            assert_eq!(table, Some(TableArg::Cards));
            assert!(delta);
            assert!(!json);
        }
        _ => panic!("expected sync command"),
    }
}

#[test]
fn cli_parses_record_command() {
    let cli = Cli::try_parse_from([
        "seisami",
        "--db-path",
        "/tmp/x.db",
        "record",
        "cards",
        "card-1",
        "move",
        r#"{"card_id":"card-1","column_id":"col-2"}"#,
    ])
    .unwrap();
    assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/x.db")));
    match cli.command {
        Commands::Record {
            table,
            record_id,
            operation,
            payload,
        } => {
            assert_eq!(TableName::from(table), TableName::Cards);
            assert_eq!(record_id, "card-1");
            assert_eq!(OperationType::from(operation), OperationType::Move);
            assert!(payload.is_some());
        }
        _ => panic!("expected record command"),
    }
    assert_eq!(
        OperationType::from(OperationArg::Delete),
        OperationType::Delete
    );
}

#[test]
fn cli_rejects_unknown_tables() {
    assert!(Cli::try_parse_from(["seisami", "ops", "notes"]).is_err());
}

#[test]
fn completions_name_the_binary() {
    let script = String::from_utf8(render_completions(CompletionShell::Bash)).unwrap();
    assert!(script.contains("seisami"));
}

#[test]
fn fetch_mode_follows_flag() {
    assert_eq!(fetch_mode(true), FetchMode::Since);
    assert_eq!(fetch_mode(false), FetchMode::Full);
}

#[test]
fn payload_parsing_rules() {
    assert_eq!(
        parse_payload(OperationType::Delete, None).unwrap(),
        serde_json::json!({})
    );
    assert!(matches!(
        parse_payload(OperationType::Insert, Some("  ")),
        Err(CliError::InvalidPayload(_))
    ));
    assert!(matches!(
        parse_payload(OperationType::Update, Some("[1, 2]")),
        Err(CliError::InvalidPayload(_))
    ));
    assert_eq!(
        parse_payload(OperationType::Insert, Some(r#"{"name":"Todo"}"#)).unwrap(),
        serde_json::json!({"name": "Todo"})
    );
}

#[test]
fn relative_time_buckets() {
    let now = 10 * 7 * 24 * 3_600_000;
    assert_eq!(format_relative_time(now - 5_000, now), "just now");
    assert_eq!(format_relative_time(now - 5 * 60_000, now), "5m ago");
    assert_eq!(format_relative_time(now - 3 * 3_600_000, now), "3h ago");
    assert_eq!(format_relative_time(now - 2 * 86_400_000, now), "2d ago");
    assert_eq!(format_relative_time(0, now), "10w ago");
}

#[test]
fn sync_timestamp_is_utc() {
    assert_eq!(
        format_sync_timestamp(1_704_103_200_000),
        "2024-01-01 10:00:00 UTC"
    );
}

#[test]
fn newest_operations_are_listed_first() {
    let operations = vec![
        operation("card-1", 1_000),
        operation("card-2", 2_000),
        operation("card-3", 3_000),
    ];
    let newest = newest_operations(operations, 2);
    let ids: Vec<&str> = newest.iter().map(|op| op.record_id.as_str()).collect();
    assert_eq!(ids, vec!["card-3", "card-2"]);

    let lines = format_operation_lines(&newest, 3_000);
    assert!(lines[0].contains("update"));
    assert!(lines[0].contains("card-3"));
    assert!(lines[0].ends_with("just now"));

    let item = operation_to_item(&newest[1], 3_000);
    assert_eq!(item.created_at, 2_000);
    assert_eq!(item.created_at_iso, "1970-01-01 00:00:02 UTC");
}

#[test]
fn report_and_state_lines() {
    let idle = SyncReport {
        table: TableName::Boards,
        pushed: 0,
        pulled: 0,
        skipped: 0,
        unchanged: 3,
    };
    assert!(format_report_line(&idle).ends_with("up to date"));

    let busy = SyncReport {
        pushed: 2,
        pulled: 1,
        ..idle
    };
    assert!(format_report_line(&busy).contains("pushed 2, pulled 1"));

    assert!(format_state_line(&SyncState::zeroed(TableName::Cards)).ends_with("never synced"));
    let synced = SyncState::at_operation(&operation("card-1", 1_704_103_200_000));
    assert!(format_state_line(&synced).contains("2024-01-01 10:00:00 UTC"));
}

#[tokio::test(flavor = "multi_thread")]
async fn record_command_writes_the_local_log() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("seisami.db");
    let config = ClientConfig::from_lookup(Some(db_path.clone()), |_| None).unwrap();

    run_record(
        &config,
        TableName::Boards,
        "board-1",
        OperationType::Insert,
        Some(r#"{"name":"Roadmap"}"#),
    )
    .await
    .unwrap();

    let store = open_store(&db_path).await.unwrap();
    let operations = store.all_operations(TableName::Boards).await.unwrap();
    assert_eq!(operations.len(), 1);
    let exported = store.export_all().await.unwrap();
    assert_eq!(exported.boards[0].id, "board-1");
    assert_eq!(exported.boards[0].name, "Roadmap");
    let state = store.sync_state(TableName::Boards).await.unwrap().unwrap();
    assert_eq!(state.last_synced_operation_id, operations[0].id);

    let err = run_record(
        &config,
        TableName::Boards,
        " ",
        OperationType::Insert,
        Some("{}"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CliError::InvalidPayload(_)));
}
