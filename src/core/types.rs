//! Template data model: actions, entities, values, statements, execution records.
//!
//! Every type renders back to template text through `Display`, and every persisted type
//! derives Serialize/Deserialize for YAML/JSON roundtripping.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Actions and entities
// ============================================================================

/// Lifecycle operation named by an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    None,
    Create,
    Delete,
    Start,
    Stop,
    Update,
    Attach,
    Check,
    Detach,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Self::None,
        Self::Create,
        Self::Delete,
        Self::Start,
        Self::Stop,
        Self::Update,
        Self::Attach,
        Self::Check,
        Self::Detach,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Update => "update",
            Self::Attach => "attach",
            Self::Check => "check",
            Self::Detach => "detach",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|a| a.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown action '{}'", s))
    }
}

/// Cloud resource kind named by an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    None,
    Vpc,
    Subnet,
    Instance,
    Volume,
    Tag,
    User,
    Group,
    Role,
    Policy,
    Keypair,
    SecurityGroup,
    InternetGateway,
    RouteTable,
    Route,
    Bucket,
    StorageObject,
    Subscription,
    Topic,
    Queue,
    LoadBalancer,
    Listener,
}

impl Entity {
    pub const ALL: [Entity; 22] = [
        Self::None,
        Self::Vpc,
        Self::Subnet,
        Self::Instance,
        Self::Volume,
        Self::Tag,
        Self::User,
        Self::Group,
        Self::Role,
        Self::Policy,
        Self::Keypair,
        Self::SecurityGroup,
        Self::InternetGateway,
        Self::RouteTable,
        Self::Route,
        Self::Bucket,
        Self::StorageObject,
        Self::Subscription,
        Self::Topic,
        Self::Queue,
        Self::LoadBalancer,
        Self::Listener,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Vpc => "vpc",
            Self::Subnet => "subnet",
            Self::Instance => "instance",
            Self::Volume => "volume",
            Self::Tag => "tag",
            Self::User => "user",
            Self::Group => "group",
            Self::Role => "role",
            Self::Policy => "policy",
            Self::Keypair => "keypair",
            Self::SecurityGroup => "securitygroup",
            Self::InternetGateway => "internetgateway",
            Self::RouteTable => "routetable",
            Self::Route => "route",
            Self::Bucket => "bucket",
            Self::StorageObject => "storageobject",
            Self::Subscription => "subscription",
            Self::Topic => "topic",
            Self::Queue => "queue",
            Self::LoadBalancer => "loadbalancer",
            Self::Listener => "listener",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Entity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|e| e.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown entity '{}'", s))
    }
}

// ============================================================================
// Values
// ============================================================================

/// A parameter value. Exactly one variant applies to a literal, chosen by the
/// grammar's precedence order (CIDR, IP, CSV, IntRange, Int, sigils, String).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    String(String),
    Int(i64),
    IntRange(i64, i64),
    Cidr(String),
    Ip(String),
    Csv(Vec<String>),
    Reference(String),
    Alias(String),
    Hole(String),
}

impl Value {
    /// Literal values need no resolution before reaching a driver.
    pub fn is_literal(&self) -> bool {
        !matches!(self, Self::Reference(_) | Self::Alias(_) | Self::Hole(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::IntRange(..) => "int range",
            Self::Cidr(_) => "cidr",
            Self::Ip(_) => "ip",
            Self::Csv(_) => "csv",
            Self::Reference(_) => "reference",
            Self::Alias(_) => "alias",
            Self::Hole(_) => "hole",
        }
    }

    /// Borrow the text of a scalar string-like literal.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Cidr(s) | Self::Ip(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) | Self::Cidr(s) | Self::Ip(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{}", n),
            Self::IntRange(lo, hi) => write!(f, "{}-{}", lo, hi),
            Self::Csv(items) => f.write_str(&items.join(",")),
            Self::Reference(id) => write!(f, "${}", id),
            Self::Alias(name) => write!(f, "@{}", name),
            Self::Hole(id) => write!(f, "{{{}}}", id),
        }
    }
}

/// Ordered parameter mapping; keys are unique within one expression.
pub type Params = IndexMap<String, Value>;

// ============================================================================
// Statements and templates
// ============================================================================

/// An `action entity key=value...` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    pub action: Action,
    pub entity: Entity,
    #[serde(default)]
    pub params: Params,
}

impl Expression {
    pub fn new(action: Action, entity: Entity) -> Self {
        Self {
            action,
            entity,
            params: Params::new(),
        }
    }

    /// Builder-style parameter insertion.
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.entity)?;
        for (key, value) in &self.params {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

/// One line of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    /// `ident = action entity ...`: binds the expression's result.
    Declaration { ident: String, expr: Expression },
    /// Bare expression, result discarded.
    Expression { expr: Expression },
    /// Comment text including its `#` or `//` marker.
    Comment { text: String },
}

impl Statement {
    /// The expression this statement runs, if any.
    pub fn expression(&self) -> Option<&Expression> {
        match self {
            Self::Declaration { expr, .. } | Self::Expression { expr } => Some(expr),
            Self::Comment { .. } => None,
        }
    }

    pub fn declared_identifier(&self) -> Option<&str> {
        match self {
            Self::Declaration { ident, .. } => Some(ident),
            _ => None,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declaration { ident, expr } => write!(f, "{} = {}", ident, expr),
            Self::Expression { expr } => write!(f, "{}", expr),
            Self::Comment { text } => f.write_str(text),
        }
    }
}

/// Ordered sequence of statements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub statements: Vec<Statement>,
}

impl Template {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Statements that dispatch to a driver (comments excluded).
    pub fn expressions(&self) -> impl Iterator<Item = &Expression> {
        self.statements.iter().filter_map(Statement::expression)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, statement) in self.statements.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", statement)?;
        }
        Ok(())
    }
}

// ============================================================================
// Execution records
// ============================================================================

/// Outcome of one executed statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed { error: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "OK"),
            Self::Failed { error } => write!(f, "FAILED: {}", error),
        }
    }
}

/// One executed statement with the values it actually ran with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEntry {
    /// 1-based position of the statement in its template
    pub index: usize,

    pub statement: Statement,

    /// Fully resolved parameters passed to the driver
    #[serde(default)]
    pub resolved: Params,

    /// Driver result (usually a new resource identifier)
    #[serde(default)]
    pub result: Option<String>,

    pub outcome: Outcome,
}

/// Persisted trace of one template run, keyed by its revert id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// ULID: lexicographically time-sortable
    pub revert_id: String,

    pub started_at: String,

    #[serde(default)]
    pub completed_at: Option<String>,

    /// Rendered text of the template that ran
    pub template: String,

    pub entries: Vec<ExecutionEntry>,

    /// BLAKE3 digest over the entries, set when persisted
    #[serde(default)]
    pub digest: String,
}

impl ExecutionRecord {
    pub fn succeeded(&self) -> impl DoubleEndedIterator<Item = &ExecutionEntry> {
        self.entries.iter().filter(|e| e.outcome.is_success())
    }

    pub fn failed_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.outcome.is_success()).count()
    }
}

// ============================================================================
// Run events
// ============================================================================

/// Event written to the JSONL run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        revert_id: String,
        dry_run: bool,
        statements: usize,
    },
    StatementStarted {
        revert_id: String,
        index: usize,
        statement: String,
    },
    StatementSucceeded {
        revert_id: String,
        index: usize,
        result: Option<String>,
        duration_seconds: f64,
    },
    StatementFailed {
        revert_id: String,
        index: usize,
        error: String,
    },
    RunCompleted {
        revert_id: String,
        succeeded: u32,
        failed: u32,
        total_seconds: f64,
    },
    RevertSkipped {
        source_revert_id: String,
        index: usize,
        reason: String,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: RunEvent,
}

// ============================================================================
// Tests
// ============================================================================
