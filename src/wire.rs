use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::StartupHandler;
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;
use tracing::debug;

use crate::engine::{now_ms, Approval, Constraint, Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};

pub struct FleetBookHandler {
    engine: Arc<Engine>,
    query_parser: Arc<FleetBookQueryParser>,
}

impl FleetBookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(FleetBookQueryParser),
        }
    }

    async fn run(&self, sql: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        debug!(command = label, status, "statement executed");
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        let response = match cmd {
            Command::InsertVehicle { vehicle, returning } => {
                let v = engine.register_vehicle(vehicle).await.map_err(engine_err)?;
                written("INSERT", returning, vehicle_schema(), &v, encode_vehicle)
            }
            Command::UpdateVehicle { id, patch, returning } => {
                let current = engine.get_vehicle(id).await.map_err(engine_err)?;
                let v = engine
                    .update_vehicle(id, patch.apply_to(&current))
                    .await
                    .map_err(engine_err)?;
                written("UPDATE", returning, vehicle_schema(), &v, encode_vehicle)
            }
            Command::DeleteVehicle { id, returning } => {
                let v = engine.retire_vehicle(id).await.map_err(engine_err)?;
                written("DELETE", returning, vehicle_schema(), &v, encode_vehicle)
            }
            Command::InsertDriver { driver, returning } => {
                let d = engine.register_driver(driver).await.map_err(engine_err)?;
                let now = now_ms();
                written("INSERT", returning, driver_schema(), &d, |e, d| encode_driver(e, d, now))
            }
            Command::UpdateDriver { id, patch, returning } => {
                let current = engine.get_driver(id).await.map_err(engine_err)?;
                let d = engine
                    .update_driver(id, patch.apply_to(&current))
                    .await
                    .map_err(engine_err)?;
                let now = now_ms();
                written("UPDATE", returning, driver_schema(), &d, |e, d| encode_driver(e, d, now))
            }
            Command::DeleteDriver { id, returning } => {
                let d = engine.retire_driver(id).await.map_err(engine_err)?;
                let now = now_ms();
                written("DELETE", returning, driver_schema(), &d, |e, d| encode_driver(e, d, now))
            }
            Command::InsertBooking { booking, returning } => {
                let b = engine.create_booking(booking).await.map_err(engine_err)?;
                written("INSERT", returning, booking_schema(), &b, encode_booking)
            }
            Command::TransitionBooking {
                id,
                status,
                vehicle_id,
                driver_id,
                notes,
                returning,
            } => {
                if status != BookingStatus::Approved && (vehicle_id.is_some() || driver_id.is_some()) {
                    return Err(user_error(
                        "22023",
                        "vehicle_id and driver_id can only be set when approving".into(),
                    ));
                }
                let result = match status {
                    BookingStatus::Approved => {
                        let approval = Approval {
                            vehicle_id,
                            driver_id,
                            notes,
                        };
                        engine.approve_booking(id, approval).await
                    }
                    BookingStatus::Rejected => {
                        engine.reject_booking(id, notes.as_deref().unwrap_or_default()).await
                    }
                    BookingStatus::Cancelled => {
                        engine.cancel_booking(id, notes.as_deref().unwrap_or_default()).await
                    }
                    BookingStatus::InProgress => engine.start_trip(id).await,
                    BookingStatus::Completed => engine.complete_trip(id, notes.as_deref()).await,
                    BookingStatus::Pending => {
                        return Err(user_error(
                            "55000",
                            "a booking cannot be moved back to pending".into(),
                        ));
                    }
                };
                let b = result.map_err(engine_err)?;
                written("UPDATE", returning, booking_schema(), &b, encode_booking)
            }
            Command::SelectAvailableVehicles { category, start, end } => {
                let found = engine
                    .find_available_vehicles(category, start, end)
                    .await
                    .map_err(engine_err)?;
                rows(vehicle_schema(), &found, encode_vehicle)
            }
            Command::SelectAvailableDrivers {
                license_category,
                start,
                end,
            } => {
                let found = engine
                    .find_available_drivers(license_category, start, end)
                    .await
                    .map_err(engine_err)?;
                let now = now_ms();
                rows(driver_schema(), &found, |e, d| encode_driver(e, d, now))
            }
            Command::SelectVehicleCandidates { booking_id } => {
                let found = engine.vehicle_candidates(booking_id).await.map_err(engine_err)?;
                rows(vehicle_schema(), &found, encode_vehicle)
            }
            Command::SelectDriverCandidates { booking_id } => {
                let found = engine.driver_candidates(booking_id).await.map_err(engine_err)?;
                let now = now_ms();
                rows(driver_schema(), &found, |e, d| encode_driver(e, d, now))
            }
            Command::SelectBookings { id, protocol, filter } => {
                // Key lookups return at most one row and ignore the other filters.
                let found = match (id, protocol) {
                    (Some(id), _) => single(engine.get_booking(id).await)?,
                    (None, Some(p)) => single(engine.lookup_by_protocol(&p).await)?,
                    (None, None) => engine.list_bookings(&filter).await,
                };
                rows(booking_schema(), &found, encode_booking)
            }
            Command::SelectVehicles(filter) => {
                rows(vehicle_schema(), &engine.list_vehicles(&filter).await, encode_vehicle)
            }
            Command::SelectDrivers(filter) => {
                let now = now_ms();
                rows(driver_schema(), &engine.list_drivers(&filter).await, |e, d| {
                    encode_driver(e, d, now)
                })
            }
            Command::SelectFleetStats => {
                let stats = engine.fleet_stats(now_ms()).await;
                rows(stats_schema(), &stats_rows(&stats), encode_stat)
            }
            Command::SelectDriverAlerts => {
                rows(alert_schema(), &engine.driver_alerts(now_ms()).await, encode_alert)
            }
            Command::RefreshDrivers => {
                let changes = engine.refresh_driver_statuses().await.map_err(engine_err)?;
                Response::Execution(Tag::new("REFRESH").with_rows(changes.len()))
            }
        };
        Ok(vec![response])
    }
}

/// A missing key reads as an empty result set rather than an error.
fn single(found: Result<Booking, EngineError>) -> PgWireResult<Vec<Booking>> {
    match found {
        Ok(b) => Ok(vec![b]),
        Err(EngineError::NotFound { .. }) => Ok(vec![]),
        Err(e) => Err(engine_err(e)),
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("protocol"),
        text("status"),
        int8("departure_at"),
        int8("arrival_at"),
        text("requester_name"),
        int8("headcount"),
        text("destination"),
        text("description"),
        text("required_category"),
        boolean("needs_driver"),
        int8("created_at"),
        text("vehicle_id"),
        text("driver_id"),
        text("admin_notes"),
    ]
}

fn vehicle_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("plate"),
        text("model"),
        text("category"),
        int8("passenger_capacity"),
        text("status"),
        text("notes"),
    ]
}

fn driver_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("full_name"),
        text("license_number"),
        int8("license_expiry"),
        text("license_category"),
        text("phone"),
        int8("toxicology_exam_date"),
        text("status"),
        text("document_health"),
        text("notes"),
    ]
}

fn stats_schema() -> Vec<FieldInfo> {
    vec![text("metric"), text("key"), int8("count")]
}

fn alert_schema() -> Vec<FieldInfo> {
    vec![
        text("driver_id"),
        text("full_name"),
        text("license_number"),
        text("health"),
        int8("days_to_license_expiry"),
        int8("days_to_exam_expiry"),
    ]
}

fn encode_booking(e: &mut DataRowEncoder, b: &Booking) -> PgWireResult<()> {
    e.encode_field(&b.id.to_string())?;
    e.encode_field(&b.protocol)?;
    e.encode_field(&b.status.as_str())?;
    e.encode_field(&b.departure_at)?;
    e.encode_field(&b.arrival_at)?;
    e.encode_field(&b.requester_name)?;
    e.encode_field(&i64::from(b.headcount))?;
    e.encode_field(&b.destination)?;
    e.encode_field(&b.description)?;
    e.encode_field(&b.required_category.as_str())?;
    e.encode_field(&b.needs_driver)?;
    e.encode_field(&b.created_at)?;
    e.encode_field(&b.allocated_vehicle_id.map(|id| id.to_string()))?;
    e.encode_field(&b.allocated_driver_id.map(|id| id.to_string()))?;
    e.encode_field(&b.admin_notes)
}

fn encode_vehicle(e: &mut DataRowEncoder, v: &Vehicle) -> PgWireResult<()> {
    e.encode_field(&v.id.to_string())?;
    e.encode_field(&v.plate)?;
    e.encode_field(&v.model)?;
    e.encode_field(&v.category.as_str())?;
    e.encode_field(&i64::from(v.passenger_capacity))?;
    e.encode_field(&v.status.as_str())?;
    e.encode_field(&v.notes)
}

fn encode_driver(e: &mut DataRowEncoder, d: &Driver, now: Ms) -> PgWireResult<()> {
    e.encode_field(&d.id.to_string())?;
    e.encode_field(&d.full_name)?;
    e.encode_field(&d.license_number)?;
    e.encode_field(&d.license_expiry)?;
    e.encode_field(&d.license_category.as_str())?;
    e.encode_field(&d.phone)?;
    e.encode_field(&d.toxicology_exam_date)?;
    e.encode_field(&d.status.as_str())?;
    e.encode_field(&d.document_health(now).as_str())?;
    e.encode_field(&d.notes)
}

fn encode_alert(e: &mut DataRowEncoder, a: &DocumentAlert) -> PgWireResult<()> {
    e.encode_field(&a.driver_id.to_string())?;
    e.encode_field(&a.full_name)?;
    e.encode_field(&a.license_number)?;
    e.encode_field(&a.health.as_str())?;
    e.encode_field(&a.days_to_license_expiry)?;
    e.encode_field(&a.days_to_exam_expiry)
}

type StatRow = (&'static str, &'static str, i64);

fn encode_stat(e: &mut DataRowEncoder, (metric, key, count): &StatRow) -> PgWireResult<()> {
    e.encode_field(metric)?;
    e.encode_field(key)?;
    e.encode_field(count)
}

/// Flatten the dashboard counters into `(metric, key, count)` rows.
fn stats_rows(s: &FleetStats) -> Vec<StatRow> {
    let n = |v: usize| v as i64;
    let mut out = vec![("vehicles", "total", n(s.vehicles_total))];
    out.extend(s.vehicles_by_status.iter().map(|(k, c)| ("vehicles_by_status", k.as_str(), n(*c))));
    out.extend(
        s.vehicles_by_category
            .iter()
            .map(|(k, c)| ("vehicles_by_category", k.as_str(), n(*c))),
    );
    out.push(("drivers", "total", n(s.drivers_total)));
    out.extend(s.drivers_by_status.iter().map(|(k, c)| ("drivers_by_status", k.as_str(), n(*c))));
    out.extend(s.drivers_by_health.iter().map(|(k, c)| ("drivers_by_health", k.as_str(), n(*c))));
    out.extend(
        s.drivers_by_license
            .iter()
            .map(|(k, c)| ("drivers_by_license", k.as_str(), n(*c))),
    );
    out.extend([
        ("bookings", "pending", n(s.bookings_pending)),
        ("bookings", "approved", n(s.bookings_approved)),
        ("bookings", "rejected", n(s.bookings_rejected)),
        ("bookings", "departing_today", n(s.bookings_departing_today)),
    ]);
    out
}

fn rows<T>(
    schema: Vec<FieldInfo>,
    items: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let data: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(data)))
}

/// Write result: the affected row when RETURNING was given, else a command tag.
fn written<T>(
    tag: &str,
    returning: bool,
    schema: Vec<FieldInfo>,
    item: &T,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    if returning {
        rows(schema, std::slice::from_ref(item), encode)
    } else {
        Response::Execution(Tag::new(tag).with_rows(1))
    }
}

/// Result columns for a statement, from the table it reads or writes.
/// Statements without rows (plain writes, REFRESH) describe as empty.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';' || c == ',')
        .filter(|w| !w.is_empty())
        .collect();
    let reads = words.first() == Some(&"select");
    if !reads && !words.contains(&"returning") {
        return vec![];
    }
    let table = words
        .windows(2)
        .find(|w| matches!(w[0], "from" | "into" | "update"))
        .map(|w| w[1].trim_matches('"'));
    match table {
        Some("bookings") => booking_schema(),
        Some("vehicles" | "available_vehicles" | "vehicle_candidates") => vehicle_schema(),
        Some("drivers" | "available_drivers" | "driver_candidates") => driver_schema(),
        Some("fleet_stats") => stats_schema(),
        Some("driver_alerts") => alert_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for FleetBookHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct FleetBookQueryParser;

#[async_trait]
impl QueryParser for FleetBookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for FleetBookHandler {
    type Statement = String;
    type QueryParser = FleetBookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let mut responses = self.run(&sql).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    sql.split('$')
        .skip(1)
        .filter_map(|rest| {
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            digits.parse::<usize>().ok()
        })
        .max()
        .unwrap_or(0)
}

/// Inline bound text parameters as quoted literals, highest index first so
/// `$1` never clobbers `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

pub struct FleetBookFactory {
    handler: Arc<FleetBookHandler>,
    noop: Arc<NoopHandler>,
}

impl FleetBookFactory {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            handler: Arc::new(FleetBookHandler::new(engine)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for FleetBookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.noop.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<FleetBookFactory>,
) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, None, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation { .. } => "22023",
        EngineError::NoAvailability { .. } => "P0001",
        EngineError::InvalidState { .. } => "55000",
        EngineError::NotFound { .. } => "P0002",
        EngineError::ConflictViolation(Constraint::DoubleAllocation { .. }) => "23P01",
        EngineError::ConflictViolation(_) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    debug!(kind = e.kind(), "engine error: {e}");
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn engine_errors_map_to_sqlstates() {
        let span = Span::new(0, 1);
        assert_eq!(
            sqlstate(&EngineError::NoAvailability {
                category: VehicleCategory::Sedan,
                window: span,
            }),
            "P0001"
        );
        assert_eq!(
            sqlstate(&EngineError::ConflictViolation(Constraint::DoubleAllocation {
                resource: crate::engine::Entity::Vehicle,
                resource_id: Ulid::new(),
                conflicting_booking: Ulid::new(),
            })),
            "23P01"
        );
        assert_eq!(
            sqlstate(&EngineError::ConflictViolation(Constraint::DuplicatePlate(
                "ABC-1234".into()
            ))),
            "23505"
        );
        assert_eq!(sqlstate(&EngineError::WalError("disk".into())), "58030");
    }

    #[test]
    fn result_schema_follows_table() {
        assert_eq!(result_schema("SELECT * FROM bookings WHERE id = $1").len(), 15);
        assert_eq!(
            result_schema("select * from available_drivers where license_category = $1").len(),
            10
        );
        assert_eq!(
            result_schema("INSERT INTO vehicles (plate) VALUES ($1) RETURNING *").len(),
            7
        );
        assert!(result_schema("INSERT INTO vehicles (plate) VALUES ($1)").is_empty());
        assert!(result_schema("REFRESH DRIVERS").is_empty());
    }

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT 1"), 0);
        assert_eq!(count_params("UPDATE bookings SET status = $2 WHERE id = $1"), 2);
        assert_eq!(count_params("x = $10 AND y = $3"), 10);
    }

    #[test]
    fn stats_rows_cover_every_bucket() {
        let stats = FleetStats {
            vehicles_total: 2,
            vehicles_by_status: vec![(VehicleStatus::Available, 2)],
            bookings_pending: 1,
            ..FleetStats::default()
        };
        let rows = stats_rows(&stats);
        assert!(rows.contains(&("vehicles", "total", 2)));
        assert!(rows.contains(&("vehicles_by_status", "available", 2)));
        assert!(rows.contains(&("bookings", "pending", 1)));
        assert!(rows.contains(&("bookings", "departing_today", 0)));
    }
}
