//! Synchronized tables and operation kinds

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A table whose mutations are recorded in the operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum TableName {
    Boards,
    Columns,
    Cards,
    Transcriptions,
}

impl TableName {
    /// Every synchronized table, in reconciliation order.
    pub const ALL: [Self; 4] = [Self::Boards, Self::Columns, Self::Cards, Self::Transcriptions];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Boards => "boards",
            Self::Columns => "columns",
            Self::Cards => "cards",
            Self::Transcriptions => "transcriptions",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "boards" | "board" => Ok(Self::Boards),
            "columns" | "column" => Ok(Self::Columns),
            "cards" | "card" => Ok(Self::Cards),
            "transcriptions" | "transcription" => Ok(Self::Transcriptions),
            _ => Err(Error::UnsupportedTable(s.to_string())),
        }
    }
}

impl TryFrom<String> for TableName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The kind of mutation an operation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
    /// Re-parent a card into another column.
    Move,
}

impl OperationType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Move => "move",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" | "create" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "move" | "update-card-column" => Ok(Self::Move),
            _ => Err(Error::UnsupportedOperation(s.to_string())),
        }
    }
}

impl TryFrom<String> for OperationType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_round_trip_through_strings() {
        for table in TableName::ALL {
            assert_eq!(table.as_str().parse::<TableName>().unwrap(), table);
        }
        assert_eq!("Card".parse::<TableName>().unwrap(), TableName::Cards);
    }

    #[test]
    fn unknown_table_is_rejected() {
        assert!(matches!(
            "notes".parse::<TableName>(),
            Err(Error::UnsupportedTable(name)) if name == "notes"
        ));
        assert!(serde_json::from_str::<TableName>("\"notes\"").is_err());
    }

    #[test]
    fn legacy_card_column_alias_is_move() {
        assert_eq!(
            "update-card-column".parse::<OperationType>().unwrap(),
            OperationType::Move
        );
        assert_eq!(
            serde_json::to_string(&OperationType::Move).unwrap(),
            "\"move\""
        );
    }

    #[test]
    fn unknown_operation_is_rejected() {
        assert!(matches!(
            "upsert".parse::<OperationType>(),
            Err(Error::UnsupportedOperation(_))
        ));
    }
}
