use std::{path::Path, str::FromStr};

use chrono::{DateTime, Utc};
use const_format::concatcp;
use field_trip_lib::{
    checkpoint::{Checkpoint, NewCheckpoint},
    trip::{EndTripRequest, StartTripRequest, Trip, TripFilter},
    user::User,
    visit::{NewVisit, Visit},
};
use sqlx::{
    query_as,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Executor, Pool, Sqlite, SqlitePool,
};

use crate::DataManagerError;

use super::constants::*;

const ACTIVE_LITERAL: &str = concatcp!("'", ACTIVE, "'");

#[derive(Clone)]
pub struct TripDatabase {
    pool: Pool<Sqlite>,
}

impl TripDatabase {
    pub async fn connect(path: &Path) -> Result<Self, DataManagerError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await
            .map_err(|e| DataManagerError::Database(format!("Failed to connect to database {:?}: {}", path, e)))?;

        let db = Self {
            pool
        };

        db.init().await?;

        Ok(db)
    }

    /// A private database living as long as the returned handle. Used by tests.
    pub async fn in_memory() -> Result<Self, DataManagerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DataManagerError::Database(format!("Invalid in-memory options: {}", e)))?
            .foreign_keys(true);

        // Every connection to :memory: is a separate database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options).await
            .map_err(|e| DataManagerError::Database(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self {
            pool
        };

        db.init().await?;

        Ok(db)
    }

    pub async fn init(&self) -> Result<(), DataManagerError> {
        self.pool.execute(concatcp!("
            CREATE TABLE IF NOT EXISTS ", USERS_TABLE_NAME, "(",
                USER_ID,    " INTEGER PRIMARY KEY AUTOINCREMENT,",
                USER_NAME,  " TEXT NOT NULL,",
                TOKEN_HASH, " TEXT NOT NULL UNIQUE,",
                JOIN_TIME,  " TIMESTAMP NOT NULL);

            CREATE TABLE IF NOT EXISTS ", TRIPS_TABLE_NAME, "(",
                TRIP_ID,          " INTEGER PRIMARY KEY AUTOINCREMENT,",
                USER_ID,          " INTEGER NOT NULL,",
                STATUS,           " TEXT NOT NULL,",
                PURPOSE,          " TEXT NOT NULL,",
                OBJECTIVE,        " TEXT,",
                VEHICLE_TYPE,     " TEXT,",
                ESTIMATED_KM,     " REAL,",
                START_TIME,       " TIMESTAMP NOT NULL,",
                START_LATITUDE,   " REAL NOT NULL,",
                START_LONGITUDE,  " REAL NOT NULL,",
                START_ADDRESS,    " TEXT,",
                END_TIME,         " TIMESTAMP,",
                END_LATITUDE,     " REAL,",
                END_LONGITUDE,    " REAL,",
                END_ADDRESS,      " TEXT,",
                NOTES,            " TEXT,",
                DISTANCE_KM,      " REAL,",
                DURATION_MINUTES, " REAL,
                FOREIGN KEY(", USER_ID, ") REFERENCES ", USERS_TABLE_NAME, "(", USER_ID, ")
            );

            CREATE UNIQUE INDEX IF NOT EXISTS ", ONE_ACTIVE_TRIP_INDEX, " ON ", TRIPS_TABLE_NAME, "(", USER_ID, ")
                WHERE ", STATUS, " = ", ACTIVE_LITERAL, ";

            CREATE TABLE IF NOT EXISTS ", CHECKPOINTS_TABLE_NAME, "(",
                CHECKPOINT_ID, " INTEGER PRIMARY KEY AUTOINCREMENT,",
                TRIP_ID,       " INTEGER NOT NULL,",
                SEQUENCE,      " INTEGER NOT NULL,",
                TIMESTAMP,     " TIMESTAMP NOT NULL,",
                LATITUDE,      " REAL NOT NULL,",
                LONGITUDE,     " REAL NOT NULL,",
                ACCURACY,      " REAL,",
                SPEED,         " REAL,",
                HEADING,       " REAL,
                UNIQUE(", TRIP_ID, ", ", SEQUENCE, "),
                FOREIGN KEY(", TRIP_ID, ") REFERENCES ", TRIPS_TABLE_NAME, "(", TRIP_ID, ")
            );

            CREATE TABLE IF NOT EXISTS ", VISITS_TABLE_NAME, "(",
                VISIT_ID,    " INTEGER PRIMARY KEY AUTOINCREMENT,",
                CUSTOMER_ID, " INTEGER NOT NULL,",
                TRIP_ID,     " INTEGER,",
                LATITUDE,    " REAL NOT NULL,",
                LONGITUDE,   " REAL NOT NULL,",
                TITLE,       " TEXT NOT NULL,",
                NOTES,       " TEXT,",
                PHOTO_REF,   " TEXT,",
                TIMESTAMP,   " TIMESTAMP NOT NULL,
                FOREIGN KEY(", TRIP_ID, ") REFERENCES ", TRIPS_TABLE_NAME, "(", TRIP_ID, ")
            )")).await
            .map_err(|e| DataManagerError::Database(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    pub async fn insert_user(&self, user_name: &str, token_hash: &str, join_time: DateTime<Utc>) -> Result<User, DataManagerError> {
        query_as::<_, User>(concatcp!("
            INSERT INTO ", USERS_TABLE_NAME, "(", USER_NAME, ", ", TOKEN_HASH, ", ", JOIN_TIME, ")
            VALUES (?1, ?2, ?3) RETURNING ", USER_ID, ", ", USER_NAME, ", ", JOIN_TIME))
                .bind(user_name)
                .bind(token_hash)
                .bind(join_time)
                .fetch_one(&self.pool).await
                .map_err(|e| match e {
                    sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
                        DataManagerError::Conflict("Token is already registered".to_string())
                    }
                    e => DataManagerError::Database(format!("Failed to insert user: {}", e)),
                })
    }

    pub async fn get_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>, DataManagerError> {
        query_as::<_, User>(concatcp!("SELECT ", USER_ID, ", ", USER_NAME, ", ", JOIN_TIME, " FROM ", USERS_TABLE_NAME, " WHERE ", TOKEN_HASH, " = ?1"))
            .bind(token_hash)
            .fetch_optional(&self.pool).await
            .map_err(|e| DataManagerError::Database(format!("Failed to get user: {}", e)))
    }

    /// Fails with `Conflict` when the user already has an active trip; the partial
    /// unique index decides when two inserts race.
    pub async fn insert_trip(&self, user_id: i64, request: &StartTripRequest, start_time: DateTime<Utc>) -> Result<Trip, DataManagerError> {
        query_as::<_, Trip>(concatcp!("
            INSERT INTO ", TRIPS_TABLE_NAME, "(",
            USER_ID, ", ", STATUS, ", ", PURPOSE, ", ", OBJECTIVE, ", ", VEHICLE_TYPE, ", ", ESTIMATED_KM, ", ",
            START_TIME, ", ", START_LATITUDE, ", ", START_LONGITUDE, ", ", START_ADDRESS, ")
            VALUES (?1, ", ACTIVE_LITERAL, ", ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) RETURNING *"))
                .bind(user_id)
                .bind(&request.purpose)
                .bind(&request.objective)
                .bind(&request.vehicle_type)
                .bind(request.estimated_km)
                .bind(start_time)
                .bind(request.latitude)
                .bind(request.longitude)
                .bind(&request.address)
                .fetch_one(&self.pool).await
                .map_err(|e| match e {
                    sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
                        DataManagerError::Conflict(format!("User {} already has an active trip", user_id))
                    }
                    e => DataManagerError::Database(format!("Failed to insert trip: {}", e)),
                })
    }

    /// Completes the trip if, and only if, it is still active. Returns `None` otherwise.
    pub async fn complete_trip(
        &self,
        trip_id: i64,
        request: &EndTripRequest,
        end_time: DateTime<Utc>,
        distance_km: f64,
        duration_minutes: f64,
    ) -> Result<Option<Trip>, DataManagerError> {
        query_as::<_, Trip>(concatcp!("
            UPDATE ", TRIPS_TABLE_NAME, " SET ",
                STATUS, " = '", COMPLETED, "', ",
                END_TIME, " = ?1, ",
                END_LATITUDE, " = ?2, ",
                END_LONGITUDE, " = ?3, ",
                END_ADDRESS, " = ?4, ",
                NOTES, " = ?5, ",
                DISTANCE_KM, " = ?6, ",
                DURATION_MINUTES, " = ?7
            WHERE ", TRIP_ID, " = ?8 AND ", STATUS, " = ", ACTIVE_LITERAL, " RETURNING *"))
                .bind(end_time)
                .bind(request.latitude)
                .bind(request.longitude)
                .bind(&request.address)
                .bind(&request.notes)
                .bind(distance_km)
                .bind(duration_minutes)
                .bind(trip_id)
                .fetch_optional(&self.pool).await
                .map_err(|e| DataManagerError::Database(format!("Failed to complete trip: {}", e)))
    }

    pub async fn get_trip(&self, trip_id: i64) -> Result<Option<Trip>, DataManagerError> {
        query_as::<_, Trip>(concatcp!("SELECT * FROM ", TRIPS_TABLE_NAME, " WHERE ", TRIP_ID, " = ?1"))
            .bind(trip_id)
            .fetch_optional(&self.pool).await
            .map_err(|e| DataManagerError::Database(format!("Failed to get trip: {}", e)))
    }

    pub async fn get_active_trip(&self, user_id: i64) -> Result<Option<Trip>, DataManagerError> {
        query_as::<_, Trip>(concatcp!("SELECT * FROM ", TRIPS_TABLE_NAME, " WHERE ", USER_ID, " = ?1 AND ", STATUS, " = ", ACTIVE_LITERAL))
            .bind(user_id)
            .fetch_optional(&self.pool).await
            .map_err(|e| DataManagerError::Database(format!("Failed to get active trip: {}", e)))
    }

    pub async fn get_trips(&self, user_id: i64, filter: &TripFilter) -> Result<Vec<Trip>, DataManagerError> {
        query_as::<_, Trip>(concatcp!("
            SELECT * FROM ", TRIPS_TABLE_NAME, "
            WHERE ", USER_ID, " = ?1
              AND (?2 IS NULL OR ", STATUS, " = ?2)
              AND (?3 IS NULL OR ", START_TIME, " >= ?3)
              AND (?4 IS NULL OR ", START_TIME, " <= ?4)
            ORDER BY ", START_TIME, " DESC, ", TRIP_ID, " DESC"))
                .bind(user_id)
                .bind(filter.status.map(|status| status.as_str()))
                .bind(filter.start_date)
                .bind(filter.end_date)
                .fetch_all(&self.pool).await
                .map_err(|e| DataManagerError::Database(format!("Failed to get trips: {}", e)))
    }

    /// Appends to an active trip owned by `user_id`, assigning the next sequence
    /// number and a timestamp never earlier than the previous checkpoint's.
    /// Returns `None` when no such active trip exists.
    pub async fn insert_checkpoint(&self, user_id: i64, checkpoint: &NewCheckpoint, received_at: DateTime<Utc>) -> Result<Option<Checkpoint>, DataManagerError> {
        query_as::<_, Checkpoint>(concatcp!("
            INSERT INTO ", CHECKPOINTS_TABLE_NAME, "(",
                TRIP_ID, ", ", SEQUENCE, ", ", TIMESTAMP, ", ", LATITUDE, ", ", LONGITUDE, ", ", ACCURACY, ", ", SPEED, ", ", HEADING, ")
            SELECT t.", TRIP_ID, ",
                COALESCE((SELECT MAX(c.", SEQUENCE, ") FROM ", CHECKPOINTS_TABLE_NAME, " c WHERE c.", TRIP_ID, " = t.", TRIP_ID, "), 0) + 1,
                MAX(?3, COALESCE((SELECT MAX(c.", TIMESTAMP, ") FROM ", CHECKPOINTS_TABLE_NAME, " c WHERE c.", TRIP_ID, " = t.", TRIP_ID, "), ?3)),
                ?4, ?5, ?6, ?7, ?8
            FROM ", TRIPS_TABLE_NAME, " t
            WHERE t.", TRIP_ID, " = ?1 AND t.", USER_ID, " = ?2 AND t.", STATUS, " = ", ACTIVE_LITERAL, "
            RETURNING *"))
                .bind(checkpoint.trip_id)
                .bind(user_id)
                .bind(received_at)
                .bind(checkpoint.latitude)
                .bind(checkpoint.longitude)
                .bind(checkpoint.accuracy)
                .bind(checkpoint.speed)
                .bind(checkpoint.heading)
                .fetch_optional(&self.pool).await
                .map_err(|e| DataManagerError::Database(format!("Failed to insert checkpoint: {}", e)))
    }

    pub async fn get_trip_checkpoints(&self, trip_id: i64) -> Result<Vec<Checkpoint>, DataManagerError> {
        query_as::<_, Checkpoint>(concatcp!("SELECT * FROM ", CHECKPOINTS_TABLE_NAME, " WHERE ", TRIP_ID, " = ?1 ORDER BY ", SEQUENCE))
            .bind(trip_id)
            .fetch_all(&self.pool).await
            .map_err(|e| DataManagerError::Database(format!("Failed to get checkpoints: {}", e)))
    }

    pub async fn insert_visit(&self, visit: &NewVisit, timestamp: DateTime<Utc>) -> Result<Visit, DataManagerError> {
        query_as::<_, Visit>(concatcp!("
            INSERT INTO ", VISITS_TABLE_NAME, "(",
            CUSTOMER_ID, ", ", TRIP_ID, ", ", LATITUDE, ", ", LONGITUDE, ", ", TITLE, ", ", NOTES, ", ", PHOTO_REF, ", ", TIMESTAMP, ")
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) RETURNING *"))
                .bind(visit.customer_id)
                .bind(visit.trip_id)
                .bind(visit.latitude)
                .bind(visit.longitude)
                .bind(&visit.title)
                .bind(&visit.notes)
                .bind(&visit.photo_ref)
                .bind(timestamp)
                .fetch_one(&self.pool).await
                .map_err(|e| DataManagerError::Database(format!("Failed to insert visit: {}", e)))
    }

    pub async fn get_trip_visits(&self, trip_id: i64) -> Result<Vec<Visit>, DataManagerError> {
        query_as::<_, Visit>(concatcp!("SELECT * FROM ", VISITS_TABLE_NAME, " WHERE ", TRIP_ID, " = ?1 ORDER BY ", TIMESTAMP, ", ", VISIT_ID))
            .bind(trip_id)
            .fetch_all(&self.pool).await
            .map_err(|e| DataManagerError::Database(format!("Failed to get visits: {}", e)))
    }

    pub async fn count_active_trips(&self, user_id: i64) -> Result<i64, DataManagerError> {
        query_as::<_, (i64,)>(concatcp!("SELECT COUNT(*) FROM ", TRIPS_TABLE_NAME, " WHERE ", USER_ID, " = ?1 AND ", STATUS, " = ", ACTIVE_LITERAL))
            .bind(user_id)
            .fetch_one(&self.pool).await
            .map_err(|e| DataManagerError::Database(format!("Failed to count active trips: {}", e)))
            .map(|row| row.0)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
