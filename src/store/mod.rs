//! Spatial store adapter.
//!
//! One SQLite table per asset class plus a measurement table keyed by
//! `<ue>-<poa>`. Spatial predicates run inside SQL through scalar functions
//! registered on the connection:
//!
//! - `st_distance(lon1, lat1, lon2, lat2)` geodesic metres
//! - `st_dwithin(lon1, lat1, lon2, lat2, radius)` inclusive within-distance test
//! - `st_length(path)` geodesic length of a GeoJSON line string
//! - `st_interpolate(path, fraction)` GeoJSON point along a line string

mod records;

pub use records::{
    Compute, ComputeData, Measurement, Poa, PoaData, PoaMatrixRow, Ue, UeData,
};

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::error::{Error, Result, StoreError, ValidationError};
use crate::geo::{self, LineString, Point};
use crate::types::{AssetId, PathMode, DEFAULT_PRIORITY};

const UE_COLUMNS: &str = "id, name, lon, lat, path, path_mode, path_velocity, path_length, \
     path_increment, path_fraction, poa, poa_distance, poa_in_range, poa_type_prio, connected";

const MEAS_COLUMNS: &str = "ue, poa, subtype, radius, distance, in_range, rssi, rsrp, rsrq";

/// Recompute path length and increment from the stored path and velocity.
/// Resets the traversal fraction.
const REFRESH_PATH_SQL: &str = "UPDATE ue SET
        path_length = st_length(path),
        path_increment = CASE WHEN st_length(path) > 0 THEN path_velocity / st_length(path) ELSE 0 END,
        path_fraction = 0
     WHERE name = ?1";

const POA_MATRIX_SQL: &str = "SELECT ue_name, prio, cur, poa_name, subtype, radius, dist,
        (radius = 0 OR dist < radius) AS in_range
     FROM (
        SELECT ue.name AS ue_name, ue.poa_type_prio AS prio, ue.poa AS cur,
               poa.name AS poa_name, poa.subtype AS subtype, poa.radius AS radius,
               st_distance(ue.lon, ue.lat, poa.lon, poa.lat) AS dist
        FROM ue CROSS JOIN poa
        WHERE ?1 IS NULL OR ue.name = ?1
     )
     ORDER BY ue_name, poa_name";

/// SQLite-backed store for asset geometry and measurements.
pub struct SpatialStore {
    db: Mutex<Connection>,
}

impl SpatialStore {
    /// Open (or create) a store at the given path.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(StoreError::from)?;
        info!("Opened spatial store at {}", db_path.as_ref().display());
        Self::from_connection(conn)
    }

    /// Create an in-memory store.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        register_functions(&conn)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ue (
                id TEXT NOT NULL,
                name TEXT PRIMARY KEY,
                lon REAL NOT NULL,
                lat REAL NOT NULL,
                path TEXT,
                path_mode TEXT NOT NULL DEFAULT 'LOOP',
                path_velocity REAL NOT NULL DEFAULT 0,
                path_length REAL NOT NULL DEFAULT 0,
                path_increment REAL NOT NULL DEFAULT 0,
                path_fraction REAL NOT NULL DEFAULT 0,
                poa TEXT NOT NULL DEFAULT '',
                poa_distance REAL NOT NULL DEFAULT 0,
                poa_in_range TEXT NOT NULL DEFAULT '',
                poa_type_prio TEXT NOT NULL DEFAULT 'wifi,5g,4g,other',
                connected INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS poa (
                id TEXT NOT NULL,
                name TEXT PRIMARY KEY,
                subtype TEXT NOT NULL,
                lon REAL NOT NULL,
                lat REAL NOT NULL,
                radius REAL NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS compute (
                id TEXT NOT NULL,
                name TEXT PRIMARY KEY,
                subtype TEXT NOT NULL,
                lon REAL NOT NULL,
                lat REAL NOT NULL,
                connected INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS measurement (
                id TEXT PRIMARY KEY,
                ue TEXT NOT NULL,
                poa TEXT NOT NULL,
                subtype TEXT NOT NULL,
                radius REAL NOT NULL,
                distance REAL NOT NULL,
                in_range INTEGER NOT NULL,
                rssi REAL NOT NULL DEFAULT 0,
                rsrp REAL NOT NULL DEFAULT 0,
                rsrq REAL NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_meas_ue ON measurement(ue);
            CREATE INDEX IF NOT EXISTS idx_meas_poa ON measurement(poa);
            "#,
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Terminals
    // ------------------------------------------------------------------

    /// Insert a terminal. Path length and increment are derived in SQL.
    pub fn create_ue(&self, id: &AssetId, name: &str, data: &UeData) -> Result<()> {
        let position = data
            .position
            .ok_or_else(|| ValidationError::MissingPosition(name.to_string()))?;
        let path = data.path.as_ref().map(LineString::to_json);
        let mode = data.mode.unwrap_or_default();
        let priority = data
            .priority
            .as_ref()
            .map_or_else(|| DEFAULT_PRIORITY.join(","), |p| p.join(","));

        let mut db = self.db.lock();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO ue (id, name, lon, lat, path, path_mode, path_velocity, poa_type_prio, connected)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id.as_str(),
                name,
                position.lon(),
                position.lat(),
                path,
                mode.as_str(),
                data.velocity.unwrap_or(0.0),
                priority,
                data.connected.unwrap_or(false),
            ],
        )?;
        tx.execute(REFRESH_PATH_SQL, params![name])?;
        tx.commit()?;

        debug!("Stored UE {}", name);
        Ok(())
    }

    /// Apply a partial update to a terminal.
    pub fn update_ue(&self, name: &str, data: &UeData) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        if !exists(&tx, "ue", name)? {
            return Err(Error::NotFound(format!("UE {name}")));
        }

        if let Some(p) = data.position {
            tx.execute(
                "UPDATE ue SET lon = ?2, lat = ?3 WHERE name = ?1",
                params![name, p.lon(), p.lat()],
            )?;
        }
        if let Some(ref path) = data.path {
            tx.execute(
                "UPDATE ue SET path = ?2 WHERE name = ?1",
                params![name, path.to_json()],
            )?;
        } else if data.clear_path {
            tx.execute("UPDATE ue SET path = NULL WHERE name = ?1", params![name])?;
        }
        if let Some(mode) = data.mode {
            tx.execute(
                "UPDATE ue SET path_mode = ?2 WHERE name = ?1",
                params![name, mode.as_str()],
            )?;
        }
        if let Some(velocity) = data.velocity {
            tx.execute(
                "UPDATE ue SET path_velocity = ?2 WHERE name = ?1",
                params![name, velocity],
            )?;
        }
        if let Some(ref priority) = data.priority {
            tx.execute(
                "UPDATE ue SET poa_type_prio = ?2 WHERE name = ?1",
                params![name, priority.join(",")],
            )?;
        }
        if let Some(connected) = data.connected {
            tx.execute(
                "UPDATE ue SET connected = ?2 WHERE name = ?1",
                params![name, connected],
            )?;
        }
        if data.touches_path() {
            tx.execute(REFRESH_PATH_SQL, params![name])?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Get a terminal with its in-range measurements.
    pub fn get_ue(&self, name: &str) -> Result<Ue> {
        let db = self.db.lock();
        let raw = db
            .query_row(
                &format!("SELECT {UE_COLUMNS} FROM ue WHERE name = ?1"),
                params![name],
                RawUe::from_row,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("UE {name}")))?;

        let mut ue = raw.into_ue()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {MEAS_COLUMNS} FROM measurement WHERE ue = ?1 AND in_range = 1"
        ))?;
        let rows = stmt.query_map(params![name], RawMeasurement::from_row)?;
        for raw in rows {
            let meas = raw?.into_measurement()?;
            ue.measurements.insert(meas.poa.clone(), meas);
        }
        Ok(ue)
    }

    /// Get all terminals keyed by name, with in-range measurements.
    pub fn get_all_ue(&self) -> Result<BTreeMap<String, Ue>> {
        let db = self.db.lock();
        let mut ues = BTreeMap::new();

        let mut stmt = db.prepare(&format!("SELECT {UE_COLUMNS} FROM ue"))?;
        let rows = stmt.query_map([], RawUe::from_row)?;
        for raw in rows {
            let ue = raw?.into_ue()?;
            ues.insert(ue.name.clone(), ue);
        }

        let mut stmt = db.prepare(&format!(
            "SELECT {MEAS_COLUMNS} FROM measurement WHERE in_range = 1"
        ))?;
        let rows = stmt.query_map([], RawMeasurement::from_row)?;
        for raw in rows {
            let meas = raw?.into_measurement()?;
            if let Some(ue) = ues.get_mut(&meas.ue) {
                ue.measurements.insert(meas.poa.clone(), meas);
            }
        }
        Ok(ues)
    }

    /// Names of all terminals, sorted.
    pub fn ue_names(&self) -> Result<Vec<String>> {
        let db = self.db.lock();
        let mut stmt = db.prepare("SELECT name FROM ue ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    pub fn delete_ue(&self, name: &str) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        tx.execute("DELETE FROM measurement WHERE ue = ?1", params![name])?;
        tx.execute("DELETE FROM ue WHERE name = ?1", params![name])?;
        tx.commit()?;
        debug!("Deleted UE {}", name);
        Ok(())
    }

    pub fn delete_all_ue(&self) -> Result<()> {
        let db = self.db.lock();
        db.execute_batch("DELETE FROM measurement; DELETE FROM ue;")
            .map_err(StoreError::from)?;
        Ok(())
    }

    /// Record the selection outcome for a terminal.
    pub fn set_ue_selection(
        &self,
        name: &str,
        poa: &str,
        distance: f64,
        in_range: &[String],
    ) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "UPDATE ue SET poa = ?2, poa_distance = ?3, poa_in_range = ?4 WHERE name = ?1",
            params![name, poa, distance, in_range.join(",")],
        )?;
        Ok(())
    }

    /// Disconnect every terminal.
    pub fn reset_all_ue_selection(&self) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "UPDATE ue SET poa = '', poa_distance = 0, poa_in_range = ''",
            [],
        )?;
        Ok(())
    }

    /// Run raw SQL against the connection.
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.db.lock().execute_batch(sql).map_err(StoreError::from)?;
        Ok(())
    }

    /// Point at `fraction` of the terminal's path, or `None` without a path.
    pub fn interpolate_path(&self, name: &str, fraction: f64) -> Result<Option<Point>> {
        let db = self.db.lock();
        let raw: Option<Option<String>> = db
            .query_row(
                "SELECT st_interpolate(path, ?2) FROM ue WHERE name = ?1",
                params![name, fraction],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            None => Err(Error::NotFound(format!("UE {name}"))),
            Some(None) => Ok(None),
            Some(Some(json)) => Ok(Some(Point::from_json(&json)?)),
        }
    }

    /// Move a terminal and persist its traversal fraction.
    pub fn set_ue_position(&self, name: &str, position: &Point, fraction: f64) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "UPDATE ue SET lon = ?2, lat = ?3, path_fraction = ?4 WHERE name = ?1",
            params![name, position.lon(), position.lat(), fraction],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Points of attachment
    // ------------------------------------------------------------------

    pub fn create_poa(&self, id: &AssetId, name: &str, data: &PoaData) -> Result<()> {
        let position = data
            .position
            .ok_or_else(|| ValidationError::MissingPosition(name.to_string()))?;
        let subtype = data.subtype.ok_or(ValidationError::MissingField("subtype"))?;

        let db = self.db.lock();
        db.execute(
            "INSERT INTO poa (id, name, subtype, lon, lat, radius) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.as_str(),
                name,
                subtype.as_str(),
                position.lon(),
                position.lat(),
                data.radius.unwrap_or(0.0),
            ],
        )?;
        debug!("Stored POA {} ({})", name, subtype);
        Ok(())
    }

    pub fn update_poa(&self, name: &str, data: &PoaData) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        if !exists(&tx, "poa", name)? {
            return Err(Error::NotFound(format!("POA {name}")));
        }
        if let Some(subtype) = data.subtype {
            tx.execute(
                "UPDATE poa SET subtype = ?2 WHERE name = ?1",
                params![name, subtype.as_str()],
            )?;
        }
        if let Some(p) = data.position {
            tx.execute(
                "UPDATE poa SET lon = ?2, lat = ?3 WHERE name = ?1",
                params![name, p.lon(), p.lat()],
            )?;
        }
        if let Some(radius) = data.radius {
            tx.execute(
                "UPDATE poa SET radius = ?2 WHERE name = ?1",
                params![name, radius],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_poa(&self, name: &str) -> Result<Poa> {
        let db = self.db.lock();
        db.query_row(
            "SELECT id, name, subtype, lon, lat, radius FROM poa WHERE name = ?1",
            params![name],
            RawPoa::from_row,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("POA {name}")))?
        .into_poa()
    }

    pub fn get_all_poa(&self) -> Result<BTreeMap<String, Poa>> {
        let db = self.db.lock();
        let mut stmt = db.prepare("SELECT id, name, subtype, lon, lat, radius FROM poa")?;
        let rows = stmt.query_map([], RawPoa::from_row)?;
        let mut poas = BTreeMap::new();
        for raw in rows {
            let poa = raw?.into_poa()?;
            poas.insert(poa.name.clone(), poa);
        }
        Ok(poas)
    }

    pub fn poa_count(&self) -> Result<usize> {
        let db = self.db.lock();
        let count: i64 = db.query_row("SELECT COUNT(*) FROM poa", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn delete_poa(&self, name: &str) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        tx.execute("DELETE FROM measurement WHERE poa = ?1", params![name])?;
        tx.execute("DELETE FROM poa WHERE name = ?1", params![name])?;
        tx.commit()?;
        debug!("Deleted POA {}", name);
        Ok(())
    }

    pub fn delete_all_poa(&self) -> Result<()> {
        let db = self.db.lock();
        db.execute_batch("DELETE FROM measurement; DELETE FROM poa;")
            .map_err(StoreError::from)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Compute nodes
    // ------------------------------------------------------------------

    pub fn create_compute(&self, id: &AssetId, name: &str, data: &ComputeData) -> Result<()> {
        let position = data
            .position
            .ok_or_else(|| ValidationError::MissingPosition(name.to_string()))?;
        let subtype = data.subtype.ok_or(ValidationError::MissingField("subtype"))?;

        let db = self.db.lock();
        db.execute(
            "INSERT INTO compute (id, name, subtype, lon, lat, connected) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.as_str(),
                name,
                subtype.as_str(),
                position.lon(),
                position.lat(),
                data.connected.unwrap_or(false),
            ],
        )?;
        debug!("Stored compute {} ({})", name, subtype);
        Ok(())
    }

    pub fn update_compute(&self, name: &str, data: &ComputeData) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        if !exists(&tx, "compute", name)? {
            return Err(Error::NotFound(format!("compute {name}")));
        }
        if let Some(subtype) = data.subtype {
            tx.execute(
                "UPDATE compute SET subtype = ?2 WHERE name = ?1",
                params![name, subtype.as_str()],
            )?;
        }
        if let Some(p) = data.position {
            tx.execute(
                "UPDATE compute SET lon = ?2, lat = ?3 WHERE name = ?1",
                params![name, p.lon(), p.lat()],
            )?;
        }
        if let Some(connected) = data.connected {
            tx.execute(
                "UPDATE compute SET connected = ?2 WHERE name = ?1",
                params![name, connected],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_compute(&self, name: &str) -> Result<Compute> {
        let db = self.db.lock();
        db.query_row(
            "SELECT id, name, subtype, lon, lat, connected FROM compute WHERE name = ?1",
            params![name],
            RawCompute::from_row,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("compute {name}")))?
        .into_compute()
    }

    pub fn get_all_compute(&self) -> Result<BTreeMap<String, Compute>> {
        let db = self.db.lock();
        let mut stmt = db.prepare("SELECT id, name, subtype, lon, lat, connected FROM compute")?;
        let rows = stmt.query_map([], RawCompute::from_row)?;
        let mut computes = BTreeMap::new();
        for raw in rows {
            let compute = raw?.into_compute()?;
            computes.insert(compute.name.clone(), compute);
        }
        Ok(computes)
    }

    pub fn delete_compute(&self, name: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute("DELETE FROM compute WHERE name = ?1", params![name])?;
        debug!("Deleted compute {}", name);
        Ok(())
    }

    pub fn delete_all_compute(&self) -> Result<()> {
        let db = self.db.lock();
        db.execute("DELETE FROM compute", [])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Measurements and spatial queries
    // ------------------------------------------------------------------

    /// Distance, in-range flag and selection inputs for every (terminal, POA)
    /// pair, or for one terminal when `ue` is given. Ordered by terminal then POA.
    pub fn poa_matrix(&self, ue: Option<&str>) -> Result<Vec<PoaMatrixRow>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(POA_MATRIX_SQL)?;
        let rows = stmt.query_map(params![ue], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, bool>(7)?,
            ))
        })?;

        let mut matrix = Vec::new();
        for row in rows {
            let (ue, prio, current_poa, poa, subtype, radius, distance, in_range) = row?;
            matrix.push(PoaMatrixRow {
                subtype: subtype.parse().map_err(|e: ValidationError| corrupt(&poa, e))?,
                poa_type_prio: crate::types::parse_priority_list(&prio),
                ue,
                current_poa,
                poa,
                radius,
                distance,
                in_range,
            });
        }
        Ok(matrix)
    }

    /// Upsert a batch of measurements in one transaction.
    pub fn upsert_measurements(&self, batch: &[Measurement]) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO measurement (id, ue, poa, subtype, radius, distance, in_range, rssi, rsrp, rsrq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                    subtype = excluded.subtype,
                    radius = excluded.radius,
                    distance = excluded.distance,
                    in_range = excluded.in_range,
                    rssi = excluded.rssi,
                    rsrp = excluded.rsrp,
                    rsrq = excluded.rsrq",
            )?;
            for m in batch {
                stmt.execute(params![
                    Measurement::key(&m.ue, &m.poa),
                    m.ue,
                    m.poa,
                    m.subtype.as_str(),
                    m.radius,
                    m.distance,
                    m.in_range,
                    m.rssi,
                    m.rsrp,
                    m.rsrq,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Geodesic distance computed by the store.
    pub fn distance(&self, a: &Point, b: &Point) -> Result<f64> {
        let db = self.db.lock();
        let d = db.query_row(
            "SELECT st_distance(?1, ?2, ?3, ?4)",
            params![a.lon(), a.lat(), b.lon(), b.lat()],
            |row| row.get(0),
        )?;
        Ok(d)
    }

    /// Inclusive within-distance test computed by the store.
    pub fn within(&self, a: &Point, b: &Point, radius: f64) -> Result<bool> {
        let db = self.db.lock();
        let within = db.query_row(
            "SELECT st_dwithin(?1, ?2, ?3, ?4, ?5)",
            params![a.lon(), a.lat(), b.lon(), b.lat(), radius],
            |row| row.get(0),
        )?;
        Ok(within)
    }

    /// POAs covering a point, nearest first.
    pub fn poas_covering(&self, point: &Point) -> Result<Vec<(Poa, f64)>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT id, name, subtype, lon, lat, radius, dist FROM (
                SELECT *, st_distance(lon, lat, ?1, ?2) AS dist FROM poa
             )
             WHERE radius = 0 OR dist < radius
             ORDER BY dist, name",
        )?;
        let rows = stmt.query_map(params![point.lon(), point.lat()], |row| {
            Ok((RawPoa::from_row(row)?, row.get::<_, f64>(6)?))
        })?;
        let mut covering = Vec::new();
        for row in rows {
            let (raw, dist) = row?;
            covering.push((raw.into_poa()?, dist));
        }
        Ok(covering)
    }
}

fn exists(conn: &Connection, table: &str, name: &str) -> Result<bool> {
    let found = conn
        .query_row(
            &format!("SELECT 1 FROM {table} WHERE name = ?1"),
            params![name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn corrupt(name: &str, reason: impl ToString) -> Error {
    Error::Store(StoreError::CorruptRow {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn user_err(e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(Box::new(e))
}

fn point_arg(ctx: &Context<'_>, lon: usize, lat: usize) -> rusqlite::Result<Point> {
    Ok(Point::new(ctx.get::<f64>(lon)?, ctx.get::<f64>(lat)?))
}

fn line_arg(ctx: &Context<'_>, idx: usize) -> rusqlite::Result<Option<LineString>> {
    match ctx.get::<Option<String>>(idx)? {
        Some(raw) => LineString::from_json(&raw).map(Some).map_err(user_err),
        None => Ok(None),
    }
}

fn register_functions(conn: &Connection) -> Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("st_distance", 4, flags, |ctx| {
        Ok(geo::distance(&point_arg(ctx, 0, 1)?, &point_arg(ctx, 2, 3)?))
    })
    .map_err(StoreError::from)?;

    conn.create_scalar_function("st_dwithin", 5, flags, |ctx| {
        let radius = ctx.get::<f64>(4)?;
        Ok(geo::within_distance(
            &point_arg(ctx, 0, 1)?,
            &point_arg(ctx, 2, 3)?,
            radius,
        ))
    })
    .map_err(StoreError::from)?;

    conn.create_scalar_function("st_length", 1, flags, |ctx| {
        Ok(line_arg(ctx, 0)?.map_or(0.0, |line| geo::line_length(&line)))
    })
    .map_err(StoreError::from)?;

    conn.create_scalar_function("st_interpolate", 2, flags, |ctx| {
        let fraction = ctx.get::<f64>(1)?;
        Ok(line_arg(ctx, 0)?
            .and_then(|line| geo::interpolate(&line, fraction))
            .map(|p| p.to_json()))
    })
    .map_err(StoreError::from)?;

    Ok(())
}

// Raw rows are decoded in two steps: column extraction inside the rusqlite
// callback, then parsing into domain types where our own errors apply.

struct RawUe {
    id: String,
    name: String,
    lon: f64,
    lat: f64,
    path: Option<String>,
    path_mode: String,
    path_velocity: f64,
    path_length: f64,
    path_increment: f64,
    path_fraction: f64,
    poa: String,
    poa_distance: f64,
    poa_in_range: String,
    poa_type_prio: String,
    connected: bool,
}

impl RawUe {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            lon: row.get(2)?,
            lat: row.get(3)?,
            path: row.get(4)?,
            path_mode: row.get(5)?,
            path_velocity: row.get(6)?,
            path_length: row.get(7)?,
            path_increment: row.get(8)?,
            path_fraction: row.get(9)?,
            poa: row.get(10)?,
            poa_distance: row.get(11)?,
            poa_in_range: row.get(12)?,
            poa_type_prio: row.get(13)?,
            connected: row.get(14)?,
        })
    }

    fn into_ue(self) -> Result<Ue> {
        let path = match self.path {
            Some(ref raw) => Some(LineString::from_json(raw).map_err(|e| corrupt(&self.name, e))?),
            None => None,
        };
        let path_mode: PathMode = self
            .path_mode
            .parse()
            .map_err(|e: ValidationError| corrupt(&self.name, e))?;
        Ok(Ue {
            id: AssetId(self.id),
            position: Point::new(self.lon, self.lat),
            path,
            path_mode,
            path_velocity: self.path_velocity,
            path_length: self.path_length,
            path_increment: self.path_increment,
            path_fraction: self.path_fraction,
            poa: self.poa,
            poa_distance: self.poa_distance,
            poa_in_range: split_list(&self.poa_in_range),
            poa_type_prio: split_list(&self.poa_type_prio),
            connected: self.connected,
            measurements: BTreeMap::new(),
            name: self.name,
        })
    }
}

struct RawPoa {
    id: String,
    name: String,
    subtype: String,
    lon: f64,
    lat: f64,
    radius: f64,
}

impl RawPoa {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            subtype: row.get(2)?,
            lon: row.get(3)?,
            lat: row.get(4)?,
            radius: row.get(5)?,
        })
    }

    fn into_poa(self) -> Result<Poa> {
        let subtype = self
            .subtype
            .parse()
            .map_err(|e: ValidationError| corrupt(&self.name, e))?;
        Ok(Poa {
            id: AssetId(self.id),
            name: self.name,
            subtype,
            position: Point::new(self.lon, self.lat),
            radius: self.radius,
        })
    }
}

struct RawCompute {
    id: String,
    name: String,
    subtype: String,
    lon: f64,
    lat: f64,
    connected: bool,
}

impl RawCompute {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            subtype: row.get(2)?,
            lon: row.get(3)?,
            lat: row.get(4)?,
            connected: row.get(5)?,
        })
    }

    fn into_compute(self) -> Result<Compute> {
        let subtype = self
            .subtype
            .parse()
            .map_err(|e: ValidationError| corrupt(&self.name, e))?;
        Ok(Compute {
            id: AssetId(self.id),
            name: self.name,
            subtype,
            position: Point::new(self.lon, self.lat),
            connected: self.connected,
        })
    }
}

struct RawMeasurement {
    ue: String,
    poa: String,
    subtype: String,
    radius: f64,
    distance: f64,
    in_range: bool,
    rssi: f64,
    rsrp: f64,
    rsrq: f64,
}

impl RawMeasurement {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            ue: row.get(0)?,
            poa: row.get(1)?,
            subtype: row.get(2)?,
            radius: row.get(3)?,
            distance: row.get(4)?,
            in_range: row.get(5)?,
            rssi: row.get(6)?,
            rsrp: row.get(7)?,
            rsrq: row.get(8)?,
        })
    }

    fn into_measurement(self) -> Result<Measurement> {
        let subtype = self
            .subtype
            .parse()
            .map_err(|e: ValidationError| corrupt(&self.poa, e))?;
        Ok(Measurement {
            ue: self.ue,
            poa: self.poa,
            subtype,
            radius: self.radius,
            distance: self.distance,
            in_range: self.in_range,
            rssi: self.rssi,
            rsrp: self.rsrp,
            rsrq: self.rsrq,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PoaSubtype;

    fn ue_data(lon: f64, lat: f64) -> UeData {
        UeData {
            position: Some(Point::new(lon, lat)),
            connected: Some(true),
            ..Default::default()
        }
    }

    #[test]
    fn test_schema_is_idempotent() {
        let store = SpatialStore::in_memory().unwrap();
        let db = store.db.lock();
        SpatialStore::init_schema(&db).unwrap();
    }

    #[test]
    fn test_create_ue_requires_position() {
        let store = SpatialStore::in_memory().unwrap();
        let err = store
            .create_ue(&"ue1-id".into(), "ue1", &UeData::default())
            .unwrap_err();
        assert!(err.is_validation());
        assert!(store.ue_names().unwrap().is_empty());
    }

    #[test]
    fn test_ue_path_derivation() {
        let store = SpatialStore::in_memory().unwrap();
        let path = LineString::new(&[
            Point::new(7.418522, 43.734198),
            Point::new(7.418536, 43.733866),
            Point::new(7.418578, 43.733701),
            Point::new(7.418711, 43.733306),
            Point::new(7.418522, 43.734198),
        ]);
        let data = UeData {
            path: Some(path),
            velocity: Some(5.0),
            ..ue_data(7.418522, 43.734198)
        };
        store.create_ue(&"ue1-id".into(), "ue1", &data).unwrap();

        let ue = store.get_ue("ue1").unwrap();
        assert!((ue.path_length - 200.994).abs() < 0.5);
        assert!((ue.path_increment - 0.024876).abs() < 1e-4);
        assert_eq!(ue.path_fraction, 0.0);
        assert_eq!(ue.path_mode, PathMode::Loop);
        assert_eq!(ue.poa_type_prio, DEFAULT_PRIORITY.to_vec());
        assert!(ue.is_mobile());
    }

    #[test]
    fn test_update_missing_ue() {
        let store = SpatialStore::in_memory().unwrap();
        let err = store.update_ue("ghost", &UeData::default()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_poa_crud() {
        let store = SpatialStore::in_memory().unwrap();
        let data = PoaData {
            subtype: Some(PoaSubtype::Cell4g),
            position: Some(Point::new(7.418494, 43.733449)),
            radius: Some(160.0),
        };
        store.create_poa(&"poa1-id".into(), "poa1", &data).unwrap();
        assert_eq!(store.poa_count().unwrap(), 1);

        store
            .update_poa("poa1", &PoaData { radius: Some(250.0), ..Default::default() })
            .unwrap();
        let poa = store.get_poa("poa1").unwrap();
        assert_eq!(poa.radius, 250.0);
        assert_eq!(poa.subtype, PoaSubtype::Cell4g);

        store.delete_poa("poa1").unwrap();
        assert!(store.get_poa("poa1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_poa_matrix_in_range() {
        let store = SpatialStore::in_memory().unwrap();
        store
            .create_ue(&"ue1-id".into(), "ue1", &ue_data(7.418522, 43.734198))
            .unwrap();
        for (name, radius) in [("poa1", 160.0), ("poa2", 50.0), ("poa3", 0.0)] {
            let data = PoaData {
                subtype: Some(PoaSubtype::Cell4g),
                position: Some(Point::new(7.418494, 43.733449)),
                radius: Some(radius),
            };
            store.create_poa(&AssetId::generate(), name, &data).unwrap();
        }

        let rows = store.poa_matrix(Some("ue1")).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].poa, "poa1");
        assert!(rows[0].in_range);
        assert!(!rows[1].in_range);
        // Unlimited radius
        assert!(rows[2].in_range);
        assert!((rows[0].distance - 83.25).abs() < 0.5);

        assert!(store.poa_matrix(Some("nobody")).unwrap().is_empty());
    }

    #[test]
    fn test_measurement_upsert_and_visibility() {
        let store = SpatialStore::in_memory().unwrap();
        store
            .create_ue(&"ue1-id".into(), "ue1", &ue_data(7.418522, 43.734198))
            .unwrap();

        let mut m = Measurement {
            ue: "ue1".into(),
            poa: "poa1".into(),
            subtype: PoaSubtype::Wifi,
            radius: 100.0,
            distance: 40.0,
            in_range: true,
            rssi: 50.0,
            rsrp: 0.0,
            rsrq: 0.0,
        };
        store.upsert_measurements(&[m.clone()]).unwrap();
        assert_eq!(store.get_ue("ue1").unwrap().measurements.len(), 1);

        m.in_range = false;
        store.upsert_measurements(&[m]).unwrap();
        assert!(store.get_ue("ue1").unwrap().measurements.is_empty());
    }

    #[test]
    fn test_spatial_functions() {
        let store = SpatialStore::in_memory().unwrap();
        let a = Point::new(7.418494, 43.733449);
        let b = Point::new(7.418522, 43.734198);
        let d = store.distance(&a, &b).unwrap();
        assert!((d - 83.25).abs() < 0.5);
        assert!(store.within(&a, &b, 100.0).unwrap());
        assert!(!store.within(&a, &b, 50.0).unwrap());
    }

    #[test]
    fn test_on_disk_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gis.db");
        {
            let store = SpatialStore::new(&path).unwrap();
            store
                .create_compute(
                    &"c1".into(),
                    "compute1",
                    &ComputeData {
                        subtype: Some(crate::types::ComputeSubtype::Edge),
                        position: Some(Point::new(7.418522, 43.734198)),
                        connected: Some(true),
                    },
                )
                .unwrap();
        }
        let store = SpatialStore::new(&path).unwrap();
        let compute = store.get_compute("compute1").unwrap();
        assert!(compute.connected);
        assert_eq!(store.get_all_compute().unwrap().len(), 1);
    }
}
