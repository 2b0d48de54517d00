//! Shared fixture for batch integration tests.
//!
//! `FixtureDb` is a tiny in-memory store answering the commands built by
//! `FixtureLoader`. Every command is registered under its display text when it
//! is built, so the responder never has to parse SQL.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use ormbatch_core::driver::DriverError;
use ormbatch_core::{
    BatchConfig, CollectionLoader, Criteria, Dialect, EntityKey, EntityRef, Error, Loader,
    MemoryDriver, PendingCollection, PersistentCollection, Projection, QueryCache,
    QueryExpression, QueryParameters, QueryTranslator, ResultTransformer, ResultValue, Session,
    SessionFactory, Statement, StatisticsSink,
};
use ormbatch_proto::{FilterExpr, OrderDirection, OrderSpec, ResultSet, Row, SqlCommand, Value};
use parking_lot::Mutex;

/// Role of the eager subselect collection on `EntityEager`.
pub const SUBSELECT_ROLE: &str = "ChildrenListSubselect";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn id(table: u8, n: u8) -> [u8; 16] {
    let mut id = [0u8; 16];
    id[0] = table;
    id[15] = n;
    id
}

struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: vec![],
        }
    }

    fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    fn lookup<'a>(&self, row: &'a [Value], field: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|c| c == field)
            .and_then(|i| row.get(i))
    }
}

/// What a registered command selects.
#[derive(Clone)]
struct StoredCommand {
    table: String,
    filter: Option<FilterExpr>,
    order_by: Vec<OrderSpec>,
    projection: Option<Projection>,
    limit: Option<(usize, usize)>,
}

pub struct FixtureDb {
    tables: BTreeMap<String, Table>,
    commands: Mutex<HashMap<String, StoredCommand>>,
    fail_on: Mutex<Option<String>>,
    discovered: Mutex<Vec<Vec<String>>>,
}

impl FixtureDb {
    pub fn new() -> Arc<Self> {
        let mut tables = BTreeMap::new();

        let mut complex = Table::new(&["Id", "Name", "Version"]);
        for v in 0..4u8 {
            complex = complex.row(vec![
                Value::Uuid(id(1, v)),
                Value::from(format!("ComplexEntity{}", v)),
                Value::Int32(i32::from(v)),
            ]);
        }
        tables.insert("EntityComplex".to_string(), complex);

        tables.insert(
            "EntitySimpleChild".to_string(),
            Table::new(&["Id", "Name", "Order"])
                .row(vec![Value::Uuid(id(2, 0)), Value::from("Child1"), Value::Int32(1)])
                .row(vec![Value::Uuid(id(2, 1)), Value::from("Child2"), Value::Int32(2)])
                .row(vec![Value::Uuid(id(2, 2)), Value::from("Child3"), Value::Int32(3)]),
        );

        tables.insert(
            "EntityEager".to_string(),
            Table::new(&["Id", "Name"])
                .row(vec![Value::Uuid(id(3, 0)), Value::from("Eager1")])
                .row(vec![Value::Uuid(id(3, 1)), Value::from("Eager2")]),
        );

        let mut children = Table::new(&["Id", "Name", "Parent"]);
        for n in 0..4u8 {
            children = children.row(vec![
                Value::Uuid(id(4, n)),
                Value::from(format!("SubselectChild{}", n)),
                Value::Uuid(id(3, n / 2)),
            ]);
        }
        tables.insert("EntitySubselectChild".to_string(), children);

        tables.insert(
            "Cat".to_string(),
            Table::new(&["Id", "Name"])
                .row(vec![Value::Uuid(id(5, 0)), Value::from("Tom")])
                .row(vec![Value::Uuid(id(5, 1)), Value::from("Felix")]),
        );
        tables.insert(
            "Dog".to_string(),
            Table::new(&["Id", "Name"]).row(vec![Value::Uuid(id(6, 0)), Value::from("Rex")]),
        );

        Arc::new(Self {
            tables,
            commands: Mutex::new(HashMap::new()),
            fail_on: Mutex::new(None),
            discovered: Mutex::new(vec![]),
        })
    }

    /// Fail any request whose text contains `needle`.
    pub fn fail_on(&self, needle: &str) {
        *self.fail_on.lock() = Some(needle.to_string());
    }

    /// Column lists seen by type auto-discovery.
    pub fn discovered(&self) -> Vec<Vec<String>> {
        self.discovered.lock().clone()
    }

    fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    fn register(&self, command: &SqlCommand, stored: StoredCommand) {
        self.commands.lock().insert(command.to_string(), stored);
    }

    pub fn respond(&self, command: &SqlCommand) -> Result<ResultSet, DriverError> {
        if let Some(needle) = self.fail_on.lock().as_deref() {
            if command.sql.contains(needle) {
                return Err(DriverError::Execution(format!("injected failure on {}", needle)));
            }
        }
        let stored = self
            .commands
            .lock()
            .get(&command.to_string())
            .cloned()
            .ok_or_else(|| DriverError::Execution(format!("unknown command: {}", command)))?;
        let table = self
            .tables
            .get(&stored.table)
            .ok_or_else(|| DriverError::Execution(format!("no such table: {}", stored.table)))?;

        let mut rows: Vec<&Vec<Value>> = table
            .rows
            .iter()
            .filter(|row| {
                stored.filter
                    .as_ref()
                    .map_or(true, |f| f.matches(&|field: &str| table.lookup(row, field)))
            })
            .collect();

        for order in stored.order_by.iter().rev() {
            rows.sort_by(|a, b| {
                let ord = match (table.lookup(a, &order.field), table.lookup(b, &order.field)) {
                    (Some(x), Some(y)) => x.compare(y).unwrap_or(std::cmp::Ordering::Equal),
                    _ => std::cmp::Ordering::Equal,
                };
                match order.direction {
                    OrderDirection::Asc => ord,
                    OrderDirection::Desc => ord.reverse(),
                }
            });
        }

        if let Some((offset, limit)) = stored.limit {
            rows = rows.into_iter().skip(offset).take(limit).collect();
        }

        Ok(match &stored.projection {
            Some(Projection::RowCount) => ResultSet::scalar("count", rows.len() as i64),
            Some(Projection::Property(p)) => {
                let mut set = ResultSet::new(vec![p.clone()]);
                for row in rows {
                    set = set.with_row(vec![table.lookup(row, p).cloned().unwrap_or(Value::Null)]);
                }
                set
            }
            None => {
                let mut set = ResultSet::new(table.columns.clone());
                for row in rows {
                    set = set.with_row(row.clone());
                }
                set
            }
        })
    }
}

fn render_filter(filter: &FilterExpr) -> String {
    match filter {
        FilterExpr::Eq { field, .. } => format!("{} = ?", field),
        FilterExpr::Ne { field, .. } => format!("{} <> ?", field),
        FilterExpr::Lt { field, .. } => format!("{} < ?", field),
        FilterExpr::Le { field, .. } => format!("{} <= ?", field),
        FilterExpr::Gt { field, .. } => format!("{} > ?", field),
        FilterExpr::Ge { field, .. } => format!("{} >= ?", field),
        FilterExpr::In { field, values } => format!(
            "{} in ({})",
            field,
            vec!["?"; values.len()].join(", ")
        ),
        FilterExpr::IsNull { field } => format!("{} is null", field),
        FilterExpr::IsNotNull { field } => format!("{} is not null", field),
        FilterExpr::And(all) => all.iter().map(render_filter).collect::<Vec<_>>().join(" and "),
        FilterExpr::Or(any) => format!(
            "({})",
            any.iter().map(render_filter).collect::<Vec<_>>().join(" or ")
        ),
    }
}

/// Loads `EntityEager.ChildrenListSubselect`, through the registered
/// subselect when there is one.
pub struct FixtureCollectionLoader {
    db: Arc<FixtureDb>,
}

impl CollectionLoader for FixtureCollectionLoader {
    fn initialize(&self, owner: &EntityRef, role: &str, session: &Session) -> Result<(), Error> {
        let (owners, command) = match session.subselect_for(owner.key()) {
            Some(fetch) => {
                let command = SqlCommand::new(format!(
                    "select * from EntitySubselectChild where Parent in ({})",
                    fetch.command.sql
                ))
                .with_parameters(fetch.command.parameters.clone());
                (fetch.owner_keys.clone(), command)
            }
            None => (
                vec![owner.key().clone()],
                SqlCommand::new("select * from EntitySubselectChild where Parent = ?")
                    .with_parameter(owner.key().id_value()),
            ),
        };

        let ids: Vec<Value> = owners.iter().map(EntityKey::id_value).collect();
        self.db.register(
            &command,
            StoredCommand {
                table: "EntitySubselectChild".into(),
                filter: Some(FilterExpr::in_values("Parent", ids)),
                order_by: vec![OrderSpec::asc("Name")],
                projection: None,
                limit: None,
            },
        );

        let mut guard = session.execute_reader(&command, None)?;
        let mut by_parent: HashMap<[u8; 16], Vec<EntityRef>> = HashMap::new();
        {
            let cursor = guard.cursor();
            while cursor.read()? {
                let columns = cursor.columns().to_vec();
                let row = cursor.current()?;
                let (child, parent) = hydrate(&columns, row, "EntitySubselectChild", session)?;
                if let Some(Value::Uuid(parent)) = parent {
                    by_parent.entry(parent).or_default().push(child);
                }
            }
        }
        guard.close()?;

        for key in &owners {
            if let Some(entity) = session.get_entity(key) {
                let children = by_parent.remove(&key.id).unwrap_or_default();
                entity.set_collection(role, PersistentCollection::initialized(children));
            }
        }
        session.remove_subselects(&owners);
        Ok(())
    }
}

fn hydrate(
    columns: &[String],
    row: &Row,
    table: &str,
    session: &Session,
) -> Result<(EntityRef, Option<Value>), Error> {
    let mut id = None;
    let mut parent = None;
    let mut properties = BTreeMap::new();
    for (column, value) in columns.iter().zip(&row.values) {
        match column.as_str() {
            "Id" => id = value.as_uuid().copied(),
            "Parent" => {
                parent = Some(value.clone());
                properties.insert(column.clone(), value.clone());
            }
            _ => {
                properties.insert(column.clone(), value.clone());
            }
        }
    }
    let id = id.ok_or_else(|| Error::Conversion(format!("{} row without Id", table)))?;
    let (entity, _) = session.load_entity(EntityKey::new(table, id), properties);
    Ok((entity, parent))
}

pub struct FixtureLoader {
    db: Arc<FixtureDb>,
    collections: Arc<FixtureCollectionLoader>,
    table: String,
    filter: Option<FilterExpr>,
    order_by: Vec<OrderSpec>,
    projection: Option<Projection>,
    spaces: BTreeSet<String>,
}

impl Loader for FixtureLoader {
    fn name(&self) -> &str {
        &self.table
    }

    fn entity_span(&self) -> usize {
        if self.projection.is_none() {
            1
        } else {
            0
        }
    }

    fn query_spaces(&self) -> &BTreeSet<String> {
        &self.spaces
    }

    fn is_subselect_loading_enabled(&self) -> bool {
        self.projection.is_none() && self.table == "EntityEager"
    }

    fn create_command(
        &self,
        parameters: &QueryParameters,
        session: &Session,
    ) -> Result<SqlCommand, Error> {
        let mut sql = match &self.projection {
            None => format!("select * from {}", self.table),
            Some(Projection::RowCount) => format!("select count(*) from {}", self.table),
            Some(Projection::Property(p)) => format!("select {} from {}", p, self.table),
        };
        let mut values = vec![];
        if let Some(filter) = &self.filter {
            sql.push_str(" where ");
            sql.push_str(&render_filter(filter));
            values = filter.parameters();
        }
        if !self.order_by.is_empty() {
            let orders: Vec<String> = self
                .order_by
                .iter()
                .map(|o| match o.direction {
                    OrderDirection::Asc => format!("{} asc", o.field),
                    OrderDirection::Desc => format!("{} desc", o.field),
                })
                .collect();
            sql.push_str(" order by ");
            sql.push_str(&orders.join(", "));
        }

        let selection = parameters.selection;
        let mut limit = None;
        if self.use_limit(&selection, session.dialect()) {
            let offset = selection.first_row.unwrap_or(0);
            let max = selection.row_cap();
            sql.push_str(" limit ? offset ?");
            values.push(Value::Int64(max as i64));
            values.push(Value::Int64(offset as i64));
            limit = Some((offset, max));
        }

        let command = SqlCommand::new(sql).with_parameters(values);
        self.db.register(
            &command,
            StoredCommand {
                table: self.table.clone(),
                filter: self.filter.clone(),
                order_by: self.order_by.clone(),
                projection: self.projection.clone(),
                limit,
            },
        );
        Ok(command)
    }

    fn auto_discover_types(
        &self,
        columns: &[String],
        _parameters: &QueryParameters,
    ) -> Result<(), Error> {
        self.db.discovered.lock().push(columns.to_vec());
        Ok(())
    }

    fn read_row(
        &self,
        row: &Row,
        columns: &[String],
        session: &Session,
        _parameters: &QueryParameters,
        hydrated: &mut Vec<EntityRef>,
        keys: &mut [Option<EntityKey>],
    ) -> Result<ResultValue, Error> {
        if self.projection.is_some() {
            return Ok(ResultValue::Scalar(row.get(0).cloned().unwrap_or(Value::Null)));
        }

        let (entity, _) = hydrate(columns, row, &self.table, session)?;
        if self.table == "EntityEager" && entity.collection(SUBSELECT_ROLE).is_none() {
            entity.set_collection(SUBSELECT_ROLE, PersistentCollection::uninitialized());
            session.add_non_lazy_collection(PendingCollection {
                owner: entity.clone(),
                role: SUBSELECT_ROLE.to_string(),
                loader: self.collections.clone(),
            });
        }
        if let Some(slot) = keys.first_mut() {
            *slot = Some(entity.key().clone());
        }
        hydrated.push(entity.clone());
        Ok(ResultValue::Entity(entity))
    }
}

/// Parsed form of the fixture query language:
/// `[select count(*)|select P] from T [where F op :name|?|literal]`.
struct ParsedStatement {
    table: String,
    projection: Option<Projection>,
    filter: Option<FilterExpr>,
}

fn parse_statement(statement: &Statement) -> Result<ParsedStatement, Error> {
    let tokens: Vec<&str> = statement.text.split_whitespace().collect();
    let bad = || Error::PlanResolution(format!("cannot parse: {}", statement.text));

    let mut i = 0;
    let mut projection = None;
    if tokens.first() == Some(&"select") {
        projection = Some(match tokens.get(1) {
            Some(&"count(*)") => Projection::RowCount,
            Some(p) => Projection::Property(p.to_string()),
            None => return Err(bad()),
        });
        i = 2;
    }
    if tokens.get(i) != Some(&"from") {
        return Err(bad());
    }
    let table = tokens.get(i + 1).ok_or_else(bad)?.to_string();
    i += 2;

    let mut filter = None;
    if tokens.get(i) == Some(&"where") {
        let field = *tokens.get(i + 1).ok_or_else(bad)?;
        let op = *tokens.get(i + 2).ok_or_else(bad)?;
        let raw = *tokens.get(i + 3).ok_or_else(bad)?;
        let value = if let Some(name) = raw.strip_prefix(':') {
            statement.named.get(name).cloned().ok_or_else(bad)?
        } else if raw == "?" {
            statement.positional.first().cloned().ok_or_else(bad)?
        } else {
            Value::Int32(raw.parse().map_err(|_| bad())?)
        };
        filter = Some(match op {
            "=" => FilterExpr::eq(field, value),
            "<>" | "!=" => FilterExpr::ne(field, value),
            "<" => FilterExpr::lt(field, value),
            "<=" => FilterExpr::le(field, value),
            ">" => FilterExpr::gt(field, value),
            ">=" => FilterExpr::ge(field, value),
            _ => return Err(bad()),
        });
    }

    Ok(ParsedStatement {
        table,
        projection,
        filter,
    })
}

pub struct FixtureTranslator {
    db: Arc<FixtureDb>,
    collections: Arc<FixtureCollectionLoader>,
}

impl FixtureTranslator {
    pub fn new(db: Arc<FixtureDb>) -> Self {
        let collections = Arc::new(FixtureCollectionLoader { db: db.clone() });
        Self { db, collections }
    }

    fn loader(
        &self,
        table: &str,
        filter: Option<FilterExpr>,
        order_by: Vec<OrderSpec>,
        projection: Option<Projection>,
    ) -> Arc<dyn Loader> {
        let mut spaces = BTreeSet::new();
        spaces.insert(table.to_string());
        Arc::new(FixtureLoader {
            db: self.db.clone(),
            collections: self.collections.clone(),
            table: table.to_string(),
            filter,
            order_by,
            projection,
            spaces,
        })
    }
}

impl QueryTranslator for FixtureTranslator {
    fn implementors(&self, entity_name: &str) -> Vec<String> {
        match entity_name {
            "Animal" => vec!["Cat".to_string(), "Dog".to_string()],
            name if self.db.has_table(name) => vec![name.to_string()],
            _ => vec![],
        }
    }

    fn criteria_loader(
        &self,
        implementor: &str,
        criteria: &Criteria,
        _session: &Session,
    ) -> Result<Arc<dyn Loader>, Error> {
        Ok(self.loader(
            implementor,
            criteria.filter.clone(),
            criteria.order_by.clone(),
            criteria.projection.clone(),
        ))
    }

    fn statement_loaders(
        &self,
        statement: &Statement,
        _session: &Session,
    ) -> Result<Vec<Arc<dyn Loader>>, Error> {
        let parsed = parse_statement(statement)?;
        Ok(self
            .implementors(&parsed.table)
            .iter()
            .map(|t| self.loader(t, parsed.filter.clone(), vec![], parsed.projection.clone()))
            .collect())
    }

    fn expression_statement(
        &self,
        expression: &QueryExpression,
        _session: &Session,
    ) -> Result<Statement, Error> {
        let mut text = match &expression.projection {
            None => String::new(),
            Some(Projection::RowCount) => "select count(*) ".to_string(),
            Some(Projection::Property(p)) => format!("select {} ", p),
        };
        text.push_str(&format!("from {}", expression.entity));

        let mut binding = None;
        if let Some(filter) = &expression.filter {
            let (field, op, value) = match filter {
                FilterExpr::Eq { field, value } => (field, "=", value),
                FilterExpr::Ne { field, value } => (field, "<>", value),
                FilterExpr::Lt { field, value } => (field, "<", value),
                FilterExpr::Le { field, value } => (field, "<=", value),
                FilterExpr::Gt { field, value } => (field, ">", value),
                FilterExpr::Ge { field, value } => (field, ">=", value),
                other => {
                    return Err(Error::PlanResolution(format!(
                        "unsupported expression filter: {:?}",
                        other
                    )))
                }
            };
            text.push_str(&format!(" where {} {} :p0", field, op));
            binding = Some(value.clone());
        }

        let mut statement = Statement::new(text);
        if let Some(value) = binding {
            statement = statement.set_parameter("p0", value);
        }
        statement.selection = expression.selection;
        statement.cacheable = expression.cacheable;
        Ok(statement)
    }
}

/// Transformer replacing any result list with `[1, 2, 3, 4]`.
pub struct ListTransformerToInt;

impl ResultTransformer for ListTransformerToInt {
    fn name(&self) -> &str {
        "list_to_int"
    }

    fn transform_list(&self, _rows: Vec<ResultValue>) -> Result<Vec<ResultValue>, Error> {
        Ok((1..=4).map(|i| ResultValue::Scalar(Value::Int32(i))).collect())
    }
}

/// A wired-up test environment.
pub struct Fixture {
    pub db: Arc<FixtureDb>,
    pub driver: Arc<MemoryDriver>,
    pub factory: Arc<SessionFactory>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(BatchConfig::default(), Dialect::default(), true, None, None)
    }

    pub fn with_config(config: BatchConfig) -> Self {
        Self::build(config, Dialect::default(), true, None, None)
    }

    pub fn without_multiple_queries() -> Self {
        Self::build(BatchConfig::default(), Dialect::default(), false, None, None)
    }

    pub fn with_dialect(dialect: Dialect) -> Self {
        Self::build(BatchConfig::default(), dialect, true, None, None)
    }

    pub fn with_statistics(stats: Arc<dyn StatisticsSink>) -> Self {
        Self::build(
            BatchConfig::default().with_statistics(true),
            Dialect::default(),
            true,
            Some(stats),
            None,
        )
    }

    pub fn with_query_cache(cache: Arc<dyn QueryCache>) -> Self {
        Self::build(
            BatchConfig::default().with_query_cache(true),
            Dialect::default(),
            true,
            None,
            Some(cache),
        )
    }

    fn build(
        config: BatchConfig,
        dialect: Dialect,
        multiple: bool,
        stats: Option<Arc<dyn StatisticsSink>>,
        cache: Option<Arc<dyn QueryCache>>,
    ) -> Self {
        init_tracing();
        let db = FixtureDb::new();
        let responder_db = db.clone();
        let mut driver = MemoryDriver::new(move |cmd| responder_db.respond(cmd));
        if !multiple {
            driver = driver.without_multiple_queries();
        }
        let driver = Arc::new(driver);

        let mut builder = SessionFactory::builder()
            .with_driver(driver.clone())
            .with_translator(Arc::new(FixtureTranslator::new(db.clone())))
            .with_dialect(dialect)
            .with_config(config);
        if let Some(stats) = stats {
            builder = builder.with_statistics(stats);
        }
        if let Some(cache) = cache {
            builder = builder.with_query_cache(cache);
        }
        let factory = builder.build().expect("fixture factory");

        Self {
            db,
            driver,
            factory,
        }
    }

    pub fn session(&self) -> Arc<Session> {
        self.factory.open_session()
    }
}

/// `Version` of an `EntityComplex`.
pub fn version(entity: &EntityRef) -> i32 {
    entity
        .property("Version")
        .and_then(|v| v.as_i32())
        .expect("entity has a Version")
}
