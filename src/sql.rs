use chrono::{DateTime, NaiveDate};
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{DriverUpdate, NewBooking, NewDriver, NewVehicle, VehicleUpdate};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertVehicle {
        vehicle: NewVehicle,
        returning: bool,
    },
    UpdateVehicle {
        id: Ulid,
        patch: VehiclePatch,
        returning: bool,
    },
    DeleteVehicle {
        id: Ulid,
        returning: bool,
    },
    InsertDriver {
        driver: NewDriver,
        returning: bool,
    },
    UpdateDriver {
        id: Ulid,
        patch: DriverPatch,
        returning: bool,
    },
    DeleteDriver {
        id: Ulid,
        returning: bool,
    },
    InsertBooking {
        booking: NewBooking,
        returning: bool,
    },
    /// `UPDATE bookings SET status = …` drives the lifecycle.
    TransitionBooking {
        id: Ulid,
        status: BookingStatus,
        vehicle_id: Option<Ulid>,
        driver_id: Option<Ulid>,
        notes: Option<String>,
        returning: bool,
    },
    SelectAvailableVehicles {
        category: VehicleCategory,
        start: Ms,
        end: Ms,
    },
    SelectAvailableDrivers {
        license_category: LicenseCategory,
        start: Ms,
        end: Ms,
    },
    SelectVehicleCandidates {
        booking_id: Ulid,
    },
    SelectDriverCandidates {
        booking_id: Ulid,
    },
    SelectBookings {
        id: Option<Ulid>,
        protocol: Option<String>,
        filter: BookingFilter,
    },
    SelectVehicles(VehicleFilter),
    SelectDrivers(DriverFilter),
    SelectFleetStats,
    SelectDriverAlerts,
    RefreshDrivers,
}

/// Columns named in `UPDATE vehicles SET …`. Unnamed columns keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehiclePatch {
    pub plate: Option<String>,
    pub model: Option<String>,
    pub category: Option<VehicleCategory>,
    pub passenger_capacity: Option<u32>,
    pub status: Option<VehicleStatus>,
    pub notes: Option<Option<String>>,
}

impl VehiclePatch {
    pub fn apply_to(self, current: &Vehicle) -> VehicleUpdate {
        VehicleUpdate {
            plate: self.plate.unwrap_or_else(|| current.plate.clone()),
            model: self.model.unwrap_or_else(|| current.model.clone()),
            category: self.category.unwrap_or(current.category),
            passenger_capacity: self.passenger_capacity.unwrap_or(current.passenger_capacity),
            status: self.status.unwrap_or(current.status),
            notes: self.notes.unwrap_or_else(|| current.notes.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverPatch {
    pub full_name: Option<String>,
    pub license_number: Option<String>,
    pub license_expiry: Option<Ms>,
    pub license_category: Option<LicenseCategory>,
    pub phone: Option<String>,
    pub toxicology_exam_date: Option<Ms>,
    pub status: Option<DriverStatus>,
    pub notes: Option<Option<String>>,
}

impl DriverPatch {
    pub fn apply_to(self, current: &Driver) -> DriverUpdate {
        DriverUpdate {
            full_name: self.full_name.unwrap_or_else(|| current.full_name.clone()),
            license_number: self
                .license_number
                .unwrap_or_else(|| current.license_number.clone()),
            license_expiry: self.license_expiry.unwrap_or(current.license_expiry),
            license_category: self.license_category.unwrap_or(current.license_category),
            phone: self.phone.unwrap_or_else(|| current.phone.clone()),
            toxicology_exam_date: self
                .toxicology_exam_date
                .unwrap_or(current.toxicology_exam_date),
            status: self.status.unwrap_or(current.status),
            notes: self.notes.unwrap_or_else(|| current.notes.clone()),
        }
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    if sql.len() > crate::limits::MAX_SQL_LEN {
        return Err(SqlError::Unsupported("statement too long".into()));
    }
    let words: Vec<String> = sql
        .trim()
        .trim_end_matches(';')
        .split_whitespace()
        .map(str::to_uppercase)
        .collect();
    if words == ["REFRESH", "DRIVERS"] {
        return Ok(Command::RefreshDrivers);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            returning,
            ..
        } => parse_update(&table.relation, assignments, selection, returning.is_some()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by the INSERT column list.
struct Row {
    cells: Vec<(String, Expr)>,
}

impl Row {
    fn get(&self, col: &str) -> Option<&Expr> {
        self.cells.iter().find(|(c, _)| c == col).map(|(_, e)| e)
    }

    fn req(&self, col: &'static str) -> Result<&Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(col))
    }

    /// Missing and NULL both read as `None`.
    fn opt(&self, col: &str) -> Option<&Expr> {
        self.get(col).filter(|e| !is_null(e))
    }

    fn check_known(&self, table: &str, known: &[&str]) -> Result<(), SqlError> {
        match self.cells.iter().find(|(c, _)| !known.contains(&c.as_str())) {
            Some((c, _)) => Err(SqlError::UnknownColumn(format!("{table}.{c}"))),
            None => Ok(()),
        }
    }
}

fn insert_row(insert: &ast::Insert, table: &'static str) -> Result<Row, SqlError> {
    if insert.columns.is_empty() {
        return Err(SqlError::Parse(format!("INSERT INTO {table} needs a column list")));
    }
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let [values] = rows.as_slice() else {
        return Err(SqlError::Unsupported(format!(
            "{table}: one row per INSERT, got {}",
            rows.len()
        )));
    };
    if values.len() != insert.columns.len() {
        return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
    }
    Ok(Row {
        cells: insert
            .columns
            .iter()
            .map(|c| c.value.to_lowercase())
            .zip(values.iter().cloned())
            .collect(),
    })
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let returning = insert.returning.is_some();

    match table.as_str() {
        "vehicles" => {
            let row = insert_row(insert, "vehicles")?;
            row.check_known(
                "vehicles",
                &["plate", "model", "category", "passenger_capacity", "status", "notes"],
            )?;
            Ok(Command::InsertVehicle {
                vehicle: NewVehicle {
                    plate: parse_string(row.req("plate")?)?,
                    model: parse_string(row.req("model")?)?,
                    category: parse_enum(row.req("category")?)?,
                    passenger_capacity: parse_u32(row.req("passenger_capacity")?)?,
                    status: row.opt("status").map(parse_enum).transpose()?,
                    notes: row.opt("notes").map(parse_string).transpose()?,
                },
                returning,
            })
        }
        "drivers" => {
            let row = insert_row(insert, "drivers")?;
            row.check_known(
                "drivers",
                &[
                    "full_name",
                    "license_number",
                    "license_expiry",
                    "license_category",
                    "phone",
                    "toxicology_exam_date",
                    "notes",
                ],
            )?;
            Ok(Command::InsertDriver {
                driver: NewDriver {
                    full_name: parse_string(row.req("full_name")?)?,
                    license_number: parse_string(row.req("license_number")?)?,
                    license_expiry: parse_time(row.req("license_expiry")?)?,
                    license_category: parse_enum(row.req("license_category")?)?,
                    phone: parse_string(row.req("phone")?)?,
                    toxicology_exam_date: parse_time(row.req("toxicology_exam_date")?)?,
                    notes: row.opt("notes").map(parse_string).transpose()?,
                },
                returning,
            })
        }
        "bookings" => {
            let row = insert_row(insert, "bookings")?;
            row.check_known(
                "bookings",
                &[
                    "departure_at",
                    "arrival_at",
                    "requester_name",
                    "headcount",
                    "destination",
                    "description",
                    "required_category",
                    "needs_driver",
                ],
            )?;
            Ok(Command::InsertBooking {
                booking: NewBooking {
                    departure_at: parse_time(row.req("departure_at")?)?,
                    arrival_at: parse_time(row.req("arrival_at")?)?,
                    requester_name: parse_string(row.req("requester_name")?)?,
                    headcount: parse_u32(row.req("headcount")?)?,
                    destination: parse_string(row.req("destination")?)?,
                    description: row.opt("description").map(parse_string).transpose()?,
                    required_category: parse_enum(row.req("required_category")?)?,
                    needs_driver: row.opt("needs_driver").map(parse_bool).transpose()?.unwrap_or(false),
                },
                returning,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE / DELETE ───────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
    returning: bool,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;
    let mut set = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.push((col, a.value.clone()));
    }
    let row = Row { cells: set };

    match table.as_str() {
        "vehicles" => {
            row.check_known(
                "vehicles",
                &["plate", "model", "category", "passenger_capacity", "status", "notes"],
            )?;
            let patch = VehiclePatch {
                plate: row.get("plate").map(parse_string).transpose()?,
                model: row.get("model").map(parse_string).transpose()?,
                category: row.get("category").map(parse_enum).transpose()?,
                passenger_capacity: row.get("passenger_capacity").map(parse_u32).transpose()?,
                status: row.get("status").map(parse_enum).transpose()?,
                notes: row.get("notes").map(parse_string_or_null).transpose()?,
            };
            Ok(Command::UpdateVehicle { id, patch, returning })
        }
        "drivers" => {
            row.check_known(
                "drivers",
                &[
                    "full_name",
                    "license_number",
                    "license_expiry",
                    "license_category",
                    "phone",
                    "toxicology_exam_date",
                    "status",
                    "notes",
                ],
            )?;
            let patch = DriverPatch {
                full_name: row.get("full_name").map(parse_string).transpose()?,
                license_number: row.get("license_number").map(parse_string).transpose()?,
                license_expiry: row.get("license_expiry").map(parse_time).transpose()?,
                license_category: row.get("license_category").map(parse_enum).transpose()?,
                phone: row.get("phone").map(parse_string).transpose()?,
                toxicology_exam_date: row.get("toxicology_exam_date").map(parse_time).transpose()?,
                status: row.get("status").map(parse_enum).transpose()?,
                notes: row.get("notes").map(parse_string_or_null).transpose()?,
            };
            Ok(Command::UpdateDriver { id, patch, returning })
        }
        "bookings" => {
            row.check_known("bookings", &["status", "vehicle_id", "driver_id", "admin_notes"])?;
            Ok(Command::TransitionBooking {
                id,
                status: parse_enum(row.req("status")?)?,
                vehicle_id: row.opt("vehicle_id").map(parse_ulid).transpose()?,
                driver_id: row.opt("driver_id").map(parse_ulid).transpose()?,
                notes: row.opt("admin_notes").map(parse_string).transpose()?,
                returning,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;
    let returning = delete.returning.is_some();

    match table.as_str() {
        "vehicles" => Ok(Command::DeleteVehicle { id, returning }),
        "drivers" => Ok(Command::DeleteDriver { id, returning }),
        "bookings" => Err(SqlError::Unsupported(
            "bookings are never deleted; set status = 'cancelled'".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// `col <op> value` conjuncts of a WHERE clause.
struct Predicates(Vec<(String, BinaryOperator, Expr)>);

impl Predicates {
    fn collect(selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut out = Vec::new();
        if let Some(expr) = selection {
            Self::walk(expr, &mut out)?;
        }
        Ok(Self(out))
    }

    fn walk(expr: &Expr, out: &mut Vec<(String, BinaryOperator, Expr)>) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => Self::walk(inner, out),
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                Self::walk(left, out)?;
                Self::walk(right, out)
            }
            Expr::BinaryOp { left, op, right } => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("predicate {expr}")))?;
                out.push((col, op.clone(), (**right).clone()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("predicate {other}"))),
        }
    }

    fn find(&self, cols: &[&str], ops: &[BinaryOperator]) -> Option<&Expr> {
        self.0
            .iter()
            .find(|(c, op, _)| cols.contains(&c.as_str()) && ops.contains(op))
            .map(|(_, _, e)| e)
    }

    fn eq(&self, col: &str) -> Option<&Expr> {
        self.find(&[col], &[BinaryOperator::Eq])
    }

    fn window_start(&self) -> Option<&Expr> {
        self.find(
            &["start", "departure_at"],
            &[BinaryOperator::GtEq, BinaryOperator::Eq],
        )
    }

    fn window_end(&self) -> Option<&Expr> {
        self.find(
            &["end", "arrival_at"],
            &[BinaryOperator::LtEq, BinaryOperator::Eq],
        )
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let p = Predicates::collect(select.selection.as_ref())?;

    match table.as_str() {
        "available_vehicles" => Ok(Command::SelectAvailableVehicles {
            category: parse_enum(p.eq("category").ok_or(SqlError::MissingFilter("category"))?)?,
            start: parse_time(p.window_start().ok_or(SqlError::MissingFilter("start"))?)?,
            end: parse_time(p.window_end().ok_or(SqlError::MissingFilter("end"))?)?,
        }),
        "available_drivers" => Ok(Command::SelectAvailableDrivers {
            license_category: parse_enum(
                p.eq("license_category")
                    .ok_or(SqlError::MissingFilter("license_category"))?,
            )?,
            start: parse_time(p.window_start().ok_or(SqlError::MissingFilter("start"))?)?,
            end: parse_time(p.window_end().ok_or(SqlError::MissingFilter("end"))?)?,
        }),
        "vehicle_candidates" => Ok(Command::SelectVehicleCandidates {
            booking_id: parse_ulid(p.eq("booking_id").ok_or(SqlError::MissingFilter("booking_id"))?)?,
        }),
        "driver_candidates" => Ok(Command::SelectDriverCandidates {
            booking_id: parse_ulid(p.eq("booking_id").ok_or(SqlError::MissingFilter("booking_id"))?)?,
        }),
        "bookings" => Ok(Command::SelectBookings {
            id: p.eq("id").map(parse_ulid).transpose()?,
            protocol: p.eq("protocol").map(parse_string).transpose()?,
            filter: BookingFilter {
                status: p.eq("status").map(parse_enum).transpose()?,
                category: p.eq("required_category").map(parse_enum).transpose()?,
                departure_from: p
                    .find(&["departure_at"], &[BinaryOperator::GtEq])
                    .map(parse_time)
                    .transpose()?,
                departure_to: p
                    .find(&["departure_at"], &[BinaryOperator::Lt])
                    .map(parse_time)
                    .transpose()?,
                vehicle_id: p.eq("vehicle_id").map(parse_ulid).transpose()?,
                driver_id: p.eq("driver_id").map(parse_ulid).transpose()?,
            },
        }),
        "vehicles" => Ok(Command::SelectVehicles(VehicleFilter {
            category: p.eq("category").map(parse_enum).transpose()?,
            status: p.eq("status").map(parse_enum).transpose()?,
            text: p.eq("search").map(parse_string).transpose()?,
        })),
        "drivers" => Ok(Command::SelectDrivers(DriverFilter {
            license_category: p.eq("license_category").map(parse_enum).transpose()?,
            status: p.eq("status").map(parse_enum).transpose()?,
            text: p.eq("search").map(parse_string).transpose()?,
        })),
        "fleet_stats" => Ok(Command::SelectFleetStats),
        "driver_alerts" => Ok(Command::SelectDriverAlerts),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let p = Predicates::collect(selection.as_ref())?;
    match p.0.as_slice() {
        [(col, BinaryOperator::Eq, value)] if col == "id" => parse_ulid(value),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_string(expr).map(Some)
    }
}

fn parse_enum<T>(expr: &Expr) -> Result<T, SqlError>
where
    T: std::str::FromStr<Err = UnknownVariant>,
{
    parse_string(expr)?
        .parse()
        .map_err(|e: UnknownVariant| SqlError::Parse(e.to_string()))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(other) => Err(SqlError::Parse(format!("expected ULID string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
        Some(other) => Err(SqlError::Parse(format!("expected number, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

/// Unix milliseconds, a quoted RFC 3339 timestamp, or a quoted
/// `YYYY-MM-DD` read as midnight UTC.
fn parse_time(expr: &Expr) -> Result<Ms, SqlError> {
    let Some(Value::SingleQuotedString(s)) = extract_value(expr) else {
        return parse_i64(expr);
    };
    let s = s.trim();
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
        .ok_or_else(|| SqlError::Parse(format!("bad timestamp: {s:?}")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Ok(true),
            "false" | "f" | "0" | "no" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(other) => Err(SqlError::Parse(format!("expected bool, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
