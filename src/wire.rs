use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
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

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError, TaskFilter};

pub struct TaskshiftHandler {
    engine: Arc<Engine>,
    query_parser: Arc<TaskshiftQueryParser>,
}

impl TaskshiftHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(TaskshiftQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        debug!(command = label, status, "query executed");
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertEngineers { engineers } => {
                let count = engineers.len();
                for engineer in engineers {
                    engine.register_engineer(engineer).map_err(engine_err)?;
                }
                Ok(Response::Execution(Tag::new("INSERT").with_rows(count)))
            }
            Command::InsertTasks { tasks, returning } => {
                // Rows commit one at a time; the first failure stops the rest.
                let count = tasks.len();
                let mut touched = Vec::new();
                for task in tasks {
                    let id = task.id.clone();
                    match task.engineer_id.clone() {
                        Some(engineer_id) => {
                            let result = engine.insert(&engineer_id, task).await.map_err(engine_err)?;
                            touched.push(id);
                            touched.extend(result.shifted);
                        }
                        None => {
                            engine.put_unassigned(task).await.map_err(engine_err)?;
                            touched.push(id);
                        }
                    }
                }
                if !returning {
                    return Ok(Response::Execution(Tag::new("INSERT").with_rows(count)));
                }
                // Report the committed state, which later rows may have moved again.
                let mut seen = HashSet::new();
                let mut rows = Vec::new();
                for id in touched {
                    if seen.insert(id.clone())
                        && let Some(task) = engine.get_task(&id).await
                    {
                        rows.push(task);
                    }
                }
                task_rows(rows)
            }
            Command::Relocate { request, returning } => {
                let result = engine.relocate(request).await.map_err(engine_err)?;
                if !returning {
                    return Ok(Response::Execution(Tag::new("INSERT").with_rows(1)));
                }
                let mut rows = vec![result.task];
                rows.extend(result.shifted);
                task_rows(rows)
            }
            Command::DeleteTask { id } => {
                engine.remove_task(&id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectTasks { filter } => {
                let tasks = match filter {
                    TaskFilter::All => engine.all_tasks().await,
                    TaskFilter::Id(id) => engine.get_task(&id).await.into_iter().collect(),
                    TaskFilter::Engineer(id) => engine.tasks_for_engineer(&id).await.map_err(engine_err)?,
                    TaskFilter::Unassigned => engine.unassigned_tasks().await,
                };
                task_rows(tasks)
            }
            Command::SelectEngineers => {
                let schema = Arc::new(engineers_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_engineers()
                    .await
                    .into_iter()
                    .map(|e| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&e.id)?;
                        encoder.encode_field(&e.name)?;
                        encoder.encode_field(&e.specialization)?;
                        encoder.encode_field(&e.region)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectConflicts { engineer_id } => {
                let conflicts = engine.conflicts(&engineer_id).await.map_err(engine_err)?;
                let schema = Arc::new(conflicts_schema());
                let rows: Vec<PgWireResult<_>> = conflicts
                    .into_iter()
                    .map(|c| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        match c {
                            Conflict::Overlap { first, second } => {
                                encoder.encode_field(&"overlap")?;
                                encoder.encode_field(&first)?;
                                encoder.encode_field(&Some(second))?;
                                encoder.encode_field(&None::<String>)?;
                                encoder.encode_field(&None::<String>)?;
                            }
                            Conflict::Blackout { task_id, blackout } => {
                                encoder.encode_field(&"blackout")?;
                                encoder.encode_field(&task_id)?;
                                encoder.encode_field(&None::<String>)?;
                                encoder.encode_field(&Some(format_rfc3339(blackout.start)))?;
                                encoder.encode_field(&Some(format_rfc3339(blackout.end)))?;
                            }
                        }
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

fn task_rows(tasks: Vec<Task>) -> PgWireResult<Response> {
    let schema = Arc::new(tasks_schema());
    let rows: Vec<PgWireResult<_>> = tasks
        .into_iter()
        .map(|t| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&t.id)?;
            encoder.encode_field(&t.engineer_id)?;
            encoder.encode_field(&t.priority.to_string())?;
            encoder.encode_field(&format_rfc3339(t.span.start))?;
            encoder.encode_field(&format_rfc3339(t.span.end))?;
            encoder.encode_field(&t.status.as_str())?;
            encoder.encode_field(&t.title)?;
            encoder.encode_field(&t.customer_id)?;
            encoder.encode_field(&t.location_id)?;
            encoder.encode_field(&t.timezone)?;
            encoder.encode_field(&t.country)?;
            encoder.encode_field(&t.description)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn text_fields(names: &[&str]) -> Vec<FieldInfo> {
    names
        .iter()
        .map(|name| FieldInfo::new((*name).into(), None, None, Type::VARCHAR, FieldFormat::Text))
        .collect()
}

fn tasks_schema() -> Vec<FieldInfo> {
    text_fields(&[
        "id",
        "engineer_id",
        "priority",
        "start",
        "end",
        "status",
        "title",
        "customer_id",
        "location_id",
        "timezone",
        "country",
        "description",
    ])
}

fn engineers_schema() -> Vec<FieldInfo> {
    text_fields(&["id", "name", "specialization", "region"])
}

fn conflicts_schema() -> Vec<FieldInfo> {
    text_fields(&["kind", "task_id", "other_task_id", "blackout_start", "blackout_end"])
}

/// Row shape of a statement. Statements that still carry `$n` placeholders
/// may not parse, so those fall back to the table named after `FROM`.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::parse_sql(sql) {
        Ok(Command::SelectTasks { .. })
        | Ok(Command::InsertTasks { returning: true, .. })
        | Ok(Command::Relocate { returning: true, .. }) => tasks_schema(),
        Ok(Command::SelectEngineers) => engineers_schema(),
        Ok(Command::SelectConflicts { .. }) => conflicts_schema(),
        Ok(_) => vec![],
        Err(_) => schema_from_text(sql),
    }
}

fn schema_from_text(sql: &str) -> Vec<FieldInfo> {
    let mut words = sql.split_whitespace();
    let first = words.clone().next().unwrap_or_default();
    if words.clone().any(|w| w.eq_ignore_ascii_case("RETURNING")) {
        return tasks_schema();
    }
    if !first.eq_ignore_ascii_case("SELECT") {
        return vec![];
    }
    let table = words
        .find(|w| w.eq_ignore_ascii_case("FROM"))
        .and_then(|_| words.next())
        .map(|t| t.trim_matches(|c: char| c == '"' || c == ';').to_ascii_lowercase());
    match table.as_deref() {
        Some("engineers") => engineers_schema(),
        Some("conflicts") => conflicts_schema(),
        _ => tasks_schema(),
    }
}

#[async_trait]
impl SimpleQueryHandler for TaskshiftHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TaskshiftQueryParser;

#[async_trait]
impl QueryParser for TaskshiftQueryParser {
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
impl ExtendedQueryHandler for TaskshiftHandler {
    type Statement = String;
    type QueryParser = TaskshiftQueryParser;

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
        self.run(&sql).await
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

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();

    // Highest index first so `$1` never clobbers the prefix of `$10`.
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

/// No authentication: any startup message is accepted.
pub struct TaskshiftFactory {
    handler: Arc<TaskshiftHandler>,
    noop: Arc<NoopHandler>,
}

impl TaskshiftFactory {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            handler: Arc::new(TaskshiftHandler::new(engine)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TaskshiftFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, None, TaskshiftFactory::new(engine)).await
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
