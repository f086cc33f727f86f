//! Dataset model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use chrono::{DateTime, Utc};

/// Violation / event category of a dataset record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetType {
    RouteDeviation,
    PowerDisconnect,
    StoppageViolation,
    DeviceRemoved,
    SpeedViolation,
    NightDriving,
    HarshAcceleration,
    HarshBreaking,
    HarshTurn,
    // Stored spelling predates the API; clients depend on it.
    #[serde(rename = "continous_driving")]
    ContinuousDriving,
    CabinetOpen,
    DriverPanic,
}

impl DatasetType {
    pub const ALL: [DatasetType; 12] = [
        Self::RouteDeviation,
        Self::PowerDisconnect,
        Self::StoppageViolation,
        Self::DeviceRemoved,
        Self::SpeedViolation,
        Self::NightDriving,
        Self::HarshAcceleration,
        Self::HarshBreaking,
        Self::HarshTurn,
        Self::ContinuousDriving,
        Self::CabinetOpen,
        Self::DriverPanic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RouteDeviation => "route_deviation",
            Self::PowerDisconnect => "power_disconnect",
            Self::StoppageViolation => "stoppage_violation",
            Self::DeviceRemoved => "device_removed",
            Self::SpeedViolation => "speed_violation",
            Self::NightDriving => "night_driving",
            Self::HarshAcceleration => "harsh_acceleration",
            Self::HarshBreaking => "harsh_breaking",
            Self::HarshTurn => "harsh_turn",
            Self::ContinuousDriving => "continous_driving",
            Self::CabinetOpen => "cabinet_open",
            Self::DriverPanic => "driver_panic",
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Self::RouteDeviation => "Route Deviation",
            Self::PowerDisconnect => "Power Disconnect",
            Self::StoppageViolation => "Stoppage Violation",
            Self::DeviceRemoved => "Device Removed",
            Self::SpeedViolation => "Speed Violation",
            Self::NightDriving => "Night Driving",
            Self::HarshAcceleration => "Harsh Acceleration",
            Self::HarshBreaking => "Harsh Breaking",
            Self::HarshTurn => "Harsh Turn",
            Self::ContinuousDriving => "Continous Driving",
            Self::CabinetOpen => "Cabinet Open",
            Self::DriverPanic => "Driver Panic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("\"{0}\" is not a valid choice.")]
pub struct UnknownDatasetType(pub String);

impl FromStr for DatasetType {
    type Err = UnknownDatasetType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownDatasetType(s.to_string()))
    }
}

impl TryFrom<String> for DatasetType {
    type Error = UnknownDatasetType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored dataset record, joined with its modifier's username
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Dataset {
    pub id: i64,
    pub data: serde_json::Value,
    #[sqlx(try_from = "String")]
    pub dataset_type: DatasetType,
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    pub modified_by: Uuid,
    pub modified_by_username: String,
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from {}",
            self.dataset_type.label(),
            self.from_date.format("%Y-%m-%d %H:%M")
        )
    }
}

/// Fields required to create a record
#[derive(Debug, Clone, PartialEq)]
pub struct NewDataset {
    pub data: serde_json::Value,
    pub dataset_type: DatasetType,
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
}

/// Fields supplied by an update; `None` leaves the stored value untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetChanges {
    pub data: Option<serde_json::Value>,
    pub dataset_type: Option<DatasetType>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

impl From<NewDataset> for DatasetChanges {
    fn from(new: NewDataset) -> Self {
        Self {
            data: Some(new.data),
            dataset_type: Some(new.dataset_type),
            from_date: Some(new.from_date),
            to_date: Some(new.to_date),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DatasetOrdering {
    /// Model default: newest period first
    #[default]
    FromDateDesc,
    /// Listing default: most recently written first
    ModifiedOnDesc,
}

impl DatasetOrdering {
    fn sql(&self) -> &'static str {
        match self {
            Self::FromDateDesc => "d.from_date DESC, d.id DESC",
            Self::ModifiedOnDesc => "d.modified_on DESC, d.id DESC",
        }
    }
}

const SELECT_WITH_MODIFIER: &str = r#"
    SELECT d.*, u.username AS modified_by_username
    FROM datasets d
    JOIN users u ON u.id = d.modified_by
"#;

impl Dataset {
    pub async fn create(pool: &PgPool, data: NewDataset, modified_by: Uuid) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Dataset>(
            r#"
            WITH d AS (
                INSERT INTO datasets (data, dataset_type, from_date, to_date, modified_on, modified_by)
                VALUES ($1, $2, $3, $4, NOW(), $5)
                RETURNING *
            )
            SELECT d.*, u.username AS modified_by_username
            FROM d
            JOIN users u ON u.id = d.modified_by
            "#
        )
        .bind(&data.data)
        .bind(data.dataset_type.as_str())
        .bind(data.from_date)
        .bind(data.to_date)
        .bind(modified_by)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Dataset>(&format!("{SELECT_WITH_MODIFIER} WHERE d.id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool, ordering: DatasetOrdering) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Dataset>(&format!("{SELECT_WITH_MODIFIER} ORDER BY {}", ordering.sql()))
            .fetch_all(pool)
            .await
    }

    pub async fn update(
        pool: &PgPool,
        id: i64,
        changes: DatasetChanges,
        modified_by: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Dataset>(
            r#"
            WITH d AS (
                UPDATE datasets
                SET data = COALESCE($2, data),
                    dataset_type = COALESCE($3, dataset_type),
                    from_date = COALESCE($4, from_date),
                    to_date = COALESCE($5, to_date),
                    modified_on = NOW(),
                    modified_by = $6
                WHERE id = $1
                RETURNING *
            )
            SELECT d.*, u.username AS modified_by_username
            FROM d
            JOIN users u ON u.id = d.modified_by
            "#
        )
        .bind(id)
        .bind(&changes.data)
        .bind(changes.dataset_type.map(|t| t.as_str()))
        .bind(changes.from_date)
        .bind(changes.to_date)
        .bind(modified_by)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM datasets WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
