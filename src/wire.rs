use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::warn;

use crate::auth::{AdminGate, CourtAuthSource};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::time;

pub struct CourtHandler {
    engine: Arc<Engine>,
    admin: AdminGate,
    query_parser: Arc<CourtQueryParser>,
}

impl CourtHandler {
    pub fn new(engine: Arc<Engine>, admin: AdminGate) -> Self {
        Self {
            engine,
            admin,
            query_parser: Arc::new(CourtQueryParser),
        }
    }

    /// Execute with RED metrics recorded per command.
    async fn run(&self, cmd: Command) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::SelectResources => {
                let schema = Arc::new(resources_schema());
                let rows: Vec<PgWireResult<DataRow>> = engine
                    .list_resources()
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&(r.position as i32))?;
                        encoder.encode_field(&r.name)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectSlots { resource, day } => {
                let view = engine.get_slots(&resource, day).await.map_err(engine_err)?;
                let schema = Arc::new(slots_schema());
                let mut rows: Vec<PgWireResult<DataRow>> = Vec::with_capacity(view.slots.len());
                for slot in &view.slots {
                    let durations: Vec<String> = slot.bookable_minutes.iter().map(u32::to_string).collect();
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&view.resource)?;
                    encoder.encode_field(&slot.local_start.format("%Y-%m-%dT%H:%M").to_string())?;
                    encoder.encode_field(&self.instant(slot.start)?)?;
                    encoder.encode_field(&slot.available())?;
                    encoder.encode_field(&durations.join(","))?;
                    rows.push(Ok(encoder.take_row()));
                }
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectAvailability { resource, day } => {
                let windows = engine.free_windows(&resource, day).await.map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let mut rows: Vec<PgWireResult<DataRow>> = Vec::with_capacity(windows.len());
                for window in windows {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&resource)?;
                    encoder.encode_field(&self.instant(window.start)?)?;
                    encoder.encode_field(&self.instant(window.end)?)?;
                    encoder.encode_field(&window.duration_minutes())?;
                    rows.push(Ok(encoder.take_row()));
                }
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectReservations { resource, day } => {
                let reservations = match day {
                    Some(day) => engine.reservations_overlapping_day(&resource, day).await,
                    None => engine.reservations_for(&resource).await,
                }
                .map_err(engine_err)?;
                self.reservation_rows(reservations, false)
            }
            Command::SelectAllReservations { admin_secret } => {
                let authorized = admin_secret.as_deref().is_some_and(|s| self.admin.verify(s));
                if !authorized {
                    metrics::counter!(observability::ADMIN_AUTH_FAILURES_TOTAL).increment(1);
                    warn!("rejected reservation export: bad or missing admin secret");
                    return Err(user_error("28P01", "admin secret required for all_reservations".into()));
                }
                let all = engine.list_all_reservations().await;
                self.reservation_rows(all, true)
            }
            Command::InsertReservation(req) => {
                let receipt = engine.book_reservation(req).await.map_err(engine_err)?;
                let schema = Arc::new(receipt_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&receipt.id.to_string())?;
                encoder.encode_field(&receipt.cancel_credential.to_string())?;
                encoder.encode_field(&self.instant(receipt.span.start)?)?;
                encoder.encode_field(&self.instant(receipt.span.end)?)?;
                let rows: Vec<PgWireResult<DataRow>> = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::DeleteReservation { id, credential } => {
                engine.cancel_reservation(id, &credential).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
        }
    }

    fn reservation_rows(&self, reservations: Vec<Reservation>, full: bool) -> PgWireResult<Response> {
        let schema = Arc::new(if full {
            all_reservations_schema()
        } else {
            reservations_schema()
        });
        let mut rows: Vec<PgWireResult<DataRow>> = Vec::with_capacity(reservations.len());
        for r in reservations {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.resource)?;
            encoder.encode_field(&self.instant(r.span.start)?)?;
            encoder.encode_field(&self.instant(r.span.end)?)?;
            encoder.encode_field(&r.span.duration_minutes())?;
            encoder.encode_field(&r.holder_name)?;
            if full {
                encoder.encode_field(&r.contact)?;
                encoder.encode_field(&r.note)?;
                encoder.encode_field(&self.instant(r.created_at)?)?;
            }
            rows.push(Ok(encoder.take_row()));
        }
        Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
    }

    fn instant(&self, ms: Ms) -> PgWireResult<String> {
        time::format_instant(ms, self.engine.schedule.zone).map_err(|e| engine_err(e.into()))
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn typed(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn resources_schema() -> Vec<FieldInfo> {
    vec![typed("position", Type::INT4), text("name")]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        text("resource"),
        text("local_start"),
        text("start"),
        typed("available", Type::BOOL),
        text("durations"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![text("resource"), text("start"), text("end"), typed("minutes", Type::INT8)]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("resource"),
        text("start"),
        text("end"),
        typed("minutes", Type::INT8),
        text("holder_name"),
    ]
}

fn all_reservations_schema() -> Vec<FieldInfo> {
    let mut schema = reservations_schema();
    schema.extend([text("contact"), text("note"), text("created_at")]);
    schema
}

fn receipt_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("cancel_credential"), text("start"), text("end")]
}

/// Result columns of a statement, judged from its target table.
/// Placeholders keep the full parser from running before parameters are bound.
fn describe_result(sql: &str) -> Vec<FieldInfo> {
    let tokens: Vec<String> = sql
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| c == ';' || c == '"').to_lowercase())
        .collect();
    let after = |keyword: &str| {
        tokens
            .iter()
            .position(|t| t == keyword)
            .and_then(|i| tokens.get(i + 1))
            .map(String::as_str)
    };
    match tokens.first().map(String::as_str) {
        Some("insert") => receipt_schema(),
        Some("select") => match after("from").map(|t| t.split('(').next().unwrap_or(t)) {
            Some("resources") => resources_schema(),
            Some("slots") => slots_schema(),
            Some("availability") => availability_schema(),
            Some("reservations") => reservations_schema(),
            Some("all_reservations") => all_reservations_schema(),
            _ => vec![],
        },
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for CourtHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.run(cmd).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CourtQueryParser;

#[async_trait]
impl QueryParser for CourtQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(describe_result(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CourtHandler {
    type Statement = String;
    type QueryParser = CourtQueryParser;

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
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(cmd).await
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
            describe_result(&target.statement),
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
        Ok(DescribePortalResponse::new(describe_result(&target.statement.statement)))
    }
}

/// A statement split at its `$N` placeholders. Quoted literals and
/// identifiers are kept as text, so a `$1` inside `'...'` is not a parameter.
#[derive(Debug, PartialEq, Eq)]
enum Piece<'a> {
    Text(&'a str),
    Param(usize),
}

fn split_placeholders(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut pieces = Vec::new();
    let mut quote: Option<u8> = None;
    let mut text_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote closes and reopens, which leaves us inside.
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let digits = bytes[i + 1..].iter().take_while(|d| d.is_ascii_digit()).count();
                if let Ok(n) = sql[i + 1..i + 1 + digits].parse::<usize>() {
                    if text_start < i {
                        pieces.push(Piece::Text(&sql[text_start..i]));
                    }
                    pieces.push(Piece::Param(n));
                    i += 1 + digits;
                    text_start = i;
                    continue;
                }
            }
            None => {}
        }
        i += 1;
    }
    if text_start < sql.len() {
        pieces.push(Piece::Text(&sql[text_start..]));
    }
    pieces
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    split_placeholders(sql)
        .iter()
        .filter_map(|p| match p {
            Piece::Param(n) => Some(*n),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    splice_params(&portal.statement.statement, &portal.parameters)
}

/// One pass over the original statement. Spliced values are never rescanned,
/// so a value containing `$1` stays as written. Unbound placeholders are left alone.
fn splice_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    for piece in split_placeholders(sql) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Param(n) => match n.checked_sub(1).and_then(|i| params.get(i)) {
                Some(Some(bytes)) => {
                    let text = String::from_utf8_lossy(bytes.as_ref());
                    out.push('\'');
                    out.push_str(&text.replace('\'', "''"));
                    out.push('\'');
                }
                Some(None) => out.push_str("NULL"),
                None => {
                    out.push('$');
                    out.push_str(&n.to_string());
                }
            },
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CourtFactory {
    handler: Arc<CourtHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<CourtAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CourtFactory {
    pub fn new(engine: Arc<Engine>, password: String, admin: AdminGate) -> Self {
        let auth_source = CourtAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CourtHandler::new(engine, admin)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CourtFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<CourtFactory>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE for each engine error kind. `CBxxx` codes are specific to this server.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::UnknownResource(_) => "CB001",
        EngineError::InvalidDuration { .. } => "CB002",
        EngineError::MalformedTime(_) => "CB003",
        EngineError::MisalignedStart { .. } => "CB004",
        EngineError::OutsideOpeningHours { .. } => "CB005",
        EngineError::InvalidHolderName => "CB006",
        EngineError::InvalidTime(_) => "CB007",
        EngineError::NotFound(_) => "CB008",
        EngineError::CredentialMismatch(_) => "CB009",
        EngineError::SlotConflict { .. } => "23P01",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::StorageUnavailable(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::BadValue(_) => "22023",
        _ => "42601",
    };
    user_error(code, e.to_string())
}
