//! Sandbox platform: an in-process simulation of the cloud behind the drivers.
//!
//! State lives in `<state_dir>/sandbox.yaml` and is rewritten atomically after every
//! mutation. Every call validates first (existence, dependencies, state); in
//! [`Mode::Validate`] it then stops with the platform's `DryRunOperation` code instead
//! of mutating anything.

use super::catalog::{id_prefix, ASSOCIATION_PREFIX};
use crate::core::error::{DriverError, Error};
use crate::core::types::{Action, Entity, Params, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ACCOUNT: &str = "000000000000";
const MAX_INSTANCE_COUNT: i64 = 20;

/// Whether a call mutates the sandbox or only validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Apply,
    Validate,
}

/// One simulated resource, keyed by its identifier in [`SandboxState::resources`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub entity: Entity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub state: String,
    #[serde(default)]
    pub params: IndexMap<String, String>,
    /// Identifiers of resources this one depends on
    #[serde(default)]
    pub refs: Vec<String>,
}

/// Route table ↔ subnet association.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub table: String,
    pub subnet: String,
}

/// Persisted sandbox contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxState {
    #[serde(default)]
    pub serial: u64,
    #[serde(default)]
    pub resources: IndexMap<String, Resource>,
    #[serde(default)]
    pub associations: IndexMap<String, Association>,
}

/// Derive the sandbox file path within the state directory.
pub fn sandbox_path(state_dir: &Path) -> PathBuf {
    state_dir.join("sandbox.yaml")
}

/// Simulated platform.
#[derive(Debug, Default)]
pub struct Sandbox {
    path: Option<PathBuf>,
    state: SandboxState,
}

type CallResult = Result<Option<String>, DriverError>;

impl Sandbox {
    /// Sandbox that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the sandbox under `state_dir` (empty if it does not exist yet).
    pub fn open(state_dir: &Path) -> Result<Self, Error> {
        let path = sandbox_path(state_dir);
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| Error::Store(format!("cannot read {}: {}", path.display(), e)))?;
            serde_yaml_ng::from_str(&content)
                .map_err(|e| Error::Store(format!("invalid sandbox file {}: {}", path.display(), e)))?
        } else {
            SandboxState::default()
        };
        Ok(Self {
            path: Some(path),
            state,
        })
    }

    pub fn state(&self) -> &SandboxState {
        &self.state
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.state.resources.get(id)
    }

    /// Identifier of the first resource carrying `name`.
    pub fn find_by_name(&self, name: &str) -> Option<String> {
        self.state
            .resources
            .iter()
            .find(|(_, r)| r.name.as_deref() == Some(name))
            .map(|(id, _)| id.clone())
    }

    /// Perform one driver call.
    pub fn call(&mut self, action: Action, entity: Entity, params: &Params, mode: Mode) -> CallResult {
        tracing::debug!(%action, %entity, ?mode, "sandbox call");
        match (action, entity) {
            (Action::Create, _) => self.create(entity, params, mode),
            (Action::Delete, _) => self.delete(entity, params, mode),
            (Action::Start, Entity::Instance) => self.set_instance_state(params, "running", mode),
            (Action::Stop, Entity::Instance) => self.set_instance_state(params, "stopped", mode),
            (Action::Update, _) => self.update(entity, params, mode),
            (Action::Attach, _) => self.attach(entity, params, mode),
            (Action::Detach, _) => self.detach(entity, params, mode),
            _ => Err(unsupported(action, entity)),
        }
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    fn create(&mut self, entity: Entity, params: &Params, mode: Mode) -> CallResult {
        let mut refs = Vec::new();
        for (key, target) in foreign_keys(Action::Create, entity) {
            if let Some(value) = params.get(*key) {
                for ident in items(value) {
                    refs.push(self.require(*target, &ident)?);
                }
            }
        }
        if entity == Entity::Tag {
            let resource = text(params, "resource")?;
            if !self.state.resources.contains_key(&resource) {
                return Err(not_found(Entity::Tag, &resource));
            }
        }

        let name = params.get("name").map(|v| v.to_string());
        if let Some(name) = &name {
            if unique_names(entity) && self.find(entity, name).is_some() {
                return Err(DriverError::with_code(
                    format!("{}AlreadyExists", code_name(entity)),
                    format!("{} '{}' already exists", entity, name),
                ));
            }
        }
        if let Some(keys) = match_keys(entity) {
            if self.find_matching(entity, params, keys).is_some() {
                return Err(DriverError::with_code(
                    format!("{}AlreadyExists", code_name(entity)),
                    format!("{} already exists", entity),
                ));
            }
        }

        let count = match (entity, params.get("count")) {
            (Entity::Instance, Some(Value::Int(n))) if (1..=MAX_INSTANCE_COUNT).contains(n) => *n,
            (Entity::Instance, Some(v)) => {
                return Err(DriverError::with_code(
                    "InvalidParameterValue",
                    format!("count must be between 1 and {}, got {}", MAX_INSTANCE_COUNT, v),
                ))
            }
            _ => 1,
        };

        if mode == Mode::Validate {
            return Err(dry_run_ok());
        }

        let mut ids = Vec::new();
        for _ in 0..count {
            let id = self.allocate(entity, name.as_deref());
            self.state.resources.insert(
                id.clone(),
                Resource {
                    entity,
                    name: name.clone(),
                    state: initial_state(entity).to_string(),
                    params: flatten(params),
                    refs: refs.clone(),
                },
            );
            ids.push(id);
        }
        self.save()?;

        if match_keys(entity).is_some() {
            // Routes, tags and objects have no identifier of their own
            return Ok(None);
        }
        Ok(Some(ids.join(",")))
    }

    fn delete(&mut self, entity: Entity, params: &Params, mode: Mode) -> CallResult {
        let ids = match match_keys(entity) {
            Some(keys) => vec![self
                .find_matching(entity, params, keys)
                .ok_or_else(|| not_found(entity, &describe(params, keys)))?],
            None => {
                let key = identity_key(entity);
                let value = params
                    .get(key)
                    .ok_or_else(|| missing(key))?;
                items(value)
                    .iter()
                    .map(|ident| self.require(entity, ident))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        for id in &ids {
            self.check_no_dependents(id)?;
        }
        if mode == Mode::Validate {
            return Err(dry_run_ok());
        }
        for id in &ids {
            self.state.resources.shift_remove(id);
        }
        self.save()?;
        Ok(None)
    }

    fn update(&mut self, entity: Entity, params: &Params, mode: Mode) -> CallResult {
        let id = self.require(entity, &text(params, "id")?)?;
        let mut refs = Vec::new();
        for (key, target) in foreign_keys(Action::Update, entity) {
            if let Some(value) = params.get(*key) {
                for ident in items(value) {
                    refs.push(self.require(*target, &ident)?);
                }
            }
        }
        if mode == Mode::Validate {
            return Err(dry_run_ok());
        }
        if let Some(resource) = self.state.resources.get_mut(&id) {
            for (key, value) in flatten(params) {
                if key != "id" {
                    resource.params.insert(key, value);
                }
            }
            for r in refs {
                if !resource.refs.contains(&r) {
                    resource.refs.push(r);
                }
            }
        }
        self.save()?;
        Ok(None)
    }

    fn set_instance_state(&mut self, params: &Params, target: &str, mode: Mode) -> CallResult {
        let value = params.get("id").ok_or_else(|| missing("id"))?;
        let mut ids = Vec::new();
        for ident in items(value) {
            let id = self.require(Entity::Instance, &ident)?;
            if self.state.resources[&id].state == target {
                return Err(DriverError::with_code(
                    "IncorrectInstanceState",
                    format!("instance {} is already {}", id, target),
                ));
            }
            ids.push(id);
        }
        if mode == Mode::Validate {
            return Err(dry_run_ok());
        }
        for id in ids {
            if let Some(resource) = self.state.resources.get_mut(&id) {
                resource.state = target.to_string();
            }
        }
        self.save()?;
        Ok(None)
    }

    fn attach(&mut self, entity: Entity, params: &Params, mode: Mode) -> CallResult {
        match entity {
            Entity::InternetGateway => {
                let igw = self.require(entity, &text(params, "id")?)?;
                let vpc = self.require(Entity::Vpc, &text(params, "vpc")?)?;
                if !self.state.resources[&igw].refs.is_empty() {
                    return Err(DriverError::with_code(
                        "Resource.AlreadyAssociated",
                        format!("gateway {} is already attached", igw),
                    ));
                }
                self.link(&igw, &vpc, "attached", mode)?;
                Ok(None)
            }
            Entity::Volume => {
                let volume = self.require(entity, &text(params, "id")?)?;
                let instance = self.require(Entity::Instance, &text(params, "instance")?)?;
                if self.state.resources[&volume].state != "available" {
                    return Err(DriverError::with_code(
                        "VolumeInUse",
                        format!("volume {} is already attached", volume),
                    ));
                }
                self.link(&volume, &instance, "in-use", mode)?;
                Ok(Some(volume))
            }
            Entity::User => {
                let user = self.require(entity, &text(params, "name")?)?;
                let group = self.require(Entity::Group, &text(params, "group")?)?;
                if self.state.resources[&user].refs.contains(&group) {
                    return Err(DriverError::with_code(
                        "EntityAlreadyExists",
                        format!("user {} is already in group {}", user, group),
                    ));
                }
                self.link(&user, &group, "active", mode)?;
                Ok(None)
            }
            Entity::RouteTable => {
                let table = self.require(entity, &text(params, "id")?)?;
                let subnet = self.require(Entity::Subnet, &text(params, "subnet")?)?;
                if self.state.associations.values().any(|a| a.subnet == subnet) {
                    return Err(DriverError::with_code(
                        "Resource.AlreadyAssociated",
                        format!("subnet {} already has a route table", subnet),
                    ));
                }
                if mode == Mode::Validate {
                    return Err(dry_run_ok());
                }
                self.state.serial += 1;
                let id = format!("{}-{:08x}", ASSOCIATION_PREFIX, self.state.serial);
                self.state
                    .associations
                    .insert(id.clone(), Association { table, subnet });
                self.save()?;
                Ok(Some(id))
            }
            _ => Err(unsupported(Action::Attach, entity)),
        }
    }

    fn detach(&mut self, entity: Entity, params: &Params, mode: Mode) -> CallResult {
        match entity {
            Entity::InternetGateway => {
                let igw = self.require(entity, &text(params, "id")?)?;
                let vpc = self.require(Entity::Vpc, &text(params, "vpc")?)?;
                self.unlink(&igw, &vpc, "available", "Gateway.NotAttached", mode)?;
                Ok(None)
            }
            Entity::Volume => {
                let volume = self.require(entity, &text(params, "id")?)?;
                let instance = self.require(Entity::Instance, &text(params, "instance")?)?;
                self.unlink(&volume, &instance, "available", "IncorrectState", mode)?;
                Ok(None)
            }
            Entity::User => {
                let user = self.require(entity, &text(params, "name")?)?;
                let group = self.require(Entity::Group, &text(params, "group")?)?;
                self.unlink(&user, &group, "active", "NoSuchEntity", mode)?;
                Ok(None)
            }
            Entity::RouteTable => {
                let association = text(params, "association")?;
                if !self.state.associations.contains_key(&association) {
                    return Err(DriverError::with_code(
                        "InvalidAssociationID.NotFound",
                        format!("association {} does not exist", association),
                    ));
                }
                if mode == Mode::Validate {
                    return Err(dry_run_ok());
                }
                self.state.associations.shift_remove(&association);
                self.save()?;
                Ok(None)
            }
            _ => Err(unsupported(Action::Detach, entity)),
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn link(&mut self, owner: &str, target: &str, state: &str, mode: Mode) -> Result<(), DriverError> {
        if mode == Mode::Validate {
            return Err(dry_run_ok());
        }
        if let Some(resource) = self.state.resources.get_mut(owner) {
            resource.refs.push(target.to_string());
            resource.state = state.to_string();
        }
        self.save()
    }

    fn unlink(
        &mut self,
        owner: &str,
        target: &str,
        state: &str,
        code: &str,
        mode: Mode,
    ) -> Result<(), DriverError> {
        if !self.state.resources[owner].refs.iter().any(|r| r == target) {
            return Err(DriverError::with_code(
                code,
                format!("{} is not attached to {}", owner, target),
            ));
        }
        if mode == Mode::Validate {
            return Err(dry_run_ok());
        }
        if let Some(resource) = self.state.resources.get_mut(owner) {
            resource.refs.retain(|r| r != target);
            resource.state = state.to_string();
        }
        self.save()
    }

    fn find(&self, entity: Entity, ident: &str) -> Option<String> {
        self.state
            .resources
            .iter()
            .find(|(id, r)| r.entity == entity && (id.as_str() == ident || r.name.as_deref() == Some(ident)))
            .map(|(id, _)| id.clone())
    }

    fn require(&self, entity: Entity, ident: &str) -> Result<String, DriverError> {
        self.find(entity, ident)
            .ok_or_else(|| not_found(entity, ident))
    }

    fn find_matching(&self, entity: Entity, params: &Params, keys: &[&str]) -> Option<String> {
        let wanted = flatten(params);
        self.state
            .resources
            .iter()
            .find(|(_, r)| {
                r.entity == entity
                    && keys
                        .iter()
                        .all(|k| r.params.get(*k) == wanted.get(*k))
            })
            .map(|(id, _)| id.clone())
    }

    fn check_no_dependents(&self, id: &str) -> Result<(), DriverError> {
        let dependent = self
            .state
            .resources
            .iter()
            .find(|(other, r)| other.as_str() != id && r.refs.iter().any(|x| x == id))
            .map(|(other, _)| other.clone())
            .or_else(|| {
                self.state
                    .associations
                    .iter()
                    .find(|(_, a)| a.table == id || a.subnet == id)
                    .map(|(assoc, _)| assoc.clone())
            });
        match dependent {
            Some(other) => Err(DriverError::with_code(
                "DependencyViolation",
                format!("{} has a dependent object ({})", id, other),
            )),
            None => Ok(()),
        }
    }

    fn allocate(&mut self, entity: Entity, name: Option<&str>) -> String {
        self.state.serial += 1;
        let serial = self.state.serial;
        match entity {
            Entity::Queue => format!(
                "https://queue.sandbox.kumo/{}/{}",
                ACCOUNT,
                name.unwrap_or(id_prefix(entity))
            ),
            Entity::LoadBalancer | Entity::Listener | Entity::Topic | Entity::Subscription => {
                format!("arn:kumo:sandbox:{}:{}/{:08x}", ACCOUNT, entity, serial)
            }
            _ => format!("{}-{:08x}", id_prefix(entity), serial),
        }
    }

    fn save(&self) -> Result<(), DriverError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let internal = |msg: String| DriverError::with_code("InternalError", msg);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| internal(format!("cannot create dir {}: {}", parent.display(), e)))?;
        }
        let yaml = serde_yaml_ng::to_string(&self.state)
            .map_err(|e| internal(format!("serialize error: {}", e)))?;

        // Atomic write: temp file + rename
        let tmp_path = path.with_extension("yaml.tmp");
        std::fs::write(&tmp_path, &yaml)
            .map_err(|e| internal(format!("cannot write {}: {}", tmp_path.display(), e)))?;
        std::fs::rename(&tmp_path, path)
            .map_err(|e| internal(format!("cannot rename {}: {}", tmp_path.display(), e)))
    }
}

// ============================================================================
// Platform tables
// ============================================================================

/// Parameters that must name an existing resource.
fn foreign_keys(action: Action, entity: Entity) -> &'static [(&'static str, Entity)] {
    match (action, entity) {
        (Action::Create, Entity::Subnet) => &[("vpc", Entity::Vpc)],
        (Action::Create, Entity::Instance) => &[
            ("subnet", Entity::Subnet),
            ("group", Entity::SecurityGroup),
            ("key", Entity::Keypair),
        ],
        (Action::Create, Entity::SecurityGroup) => &[("vpc", Entity::Vpc)],
        (Action::Create, Entity::RouteTable) => &[("vpc", Entity::Vpc)],
        (Action::Create, Entity::Route) => &[
            ("table", Entity::RouteTable),
            ("gateway", Entity::InternetGateway),
        ],
        (Action::Create, Entity::LoadBalancer) => &[
            ("subnets", Entity::Subnet),
            ("groups", Entity::SecurityGroup),
        ],
        (Action::Create, Entity::Listener) => &[("loadbalancer", Entity::LoadBalancer)],
        (Action::Create, Entity::Subscription) => &[("topic", Entity::Topic)],
        (Action::Create, Entity::StorageObject) => &[("bucket", Entity::Bucket)],
        (Action::Update, Entity::Instance) => &[("group", Entity::SecurityGroup)],
        _ => &[],
    }
}

/// Entities without an identifier, matched on these parameters instead.
fn match_keys(entity: Entity) -> Option<&'static [&'static str]> {
    match entity {
        Entity::Route => Some(&["table", "cidr"]),
        Entity::Tag => Some(&["resource", "key", "value"]),
        Entity::StorageObject => Some(&["bucket", "key"]),
        _ => None,
    }
}

/// Parameter that identifies the resource on delete.
fn identity_key(entity: Entity) -> &'static str {
    match entity {
        Entity::LoadBalancer | Entity::Listener | Entity::Topic | Entity::Subscription => "arn",
        Entity::Queue => "url",
        Entity::User | Entity::Group | Entity::Bucket => "name",
        _ => "id",
    }
}

fn unique_names(entity: Entity) -> bool {
    matches!(
        entity,
        Entity::User
            | Entity::Group
            | Entity::Bucket
            | Entity::Queue
            | Entity::Topic
            | Entity::Keypair
            | Entity::LoadBalancer
    )
}

fn initial_state(entity: Entity) -> &'static str {
    match entity {
        Entity::Instance => "running",
        Entity::Volume | Entity::InternetGateway => "available",
        _ => "active",
    }
}

/// Entity name as it appears in platform error codes.
fn code_name(entity: Entity) -> &'static str {
    match entity {
        Entity::None => "None",
        Entity::Vpc => "Vpc",
        Entity::Subnet => "Subnet",
        Entity::Instance => "Instance",
        Entity::Volume => "Volume",
        Entity::Tag => "Tag",
        Entity::User => "User",
        Entity::Group => "Group",
        Entity::Role => "Role",
        Entity::Policy => "Policy",
        Entity::Keypair => "KeyPair",
        Entity::SecurityGroup => "SecurityGroup",
        Entity::InternetGateway => "InternetGateway",
        Entity::RouteTable => "RouteTable",
        Entity::Route => "Route",
        Entity::Bucket => "Bucket",
        Entity::StorageObject => "StorageObject",
        Entity::Subscription => "Subscription",
        Entity::Topic => "Topic",
        Entity::Queue => "Queue",
        Entity::LoadBalancer => "LoadBalancer",
        Entity::Listener => "Listener",
    }
}

fn not_found(entity: Entity, ident: &str) -> DriverError {
    DriverError::with_code(
        format!("Invalid{}ID.NotFound", code_name(entity)),
        format!("the {} '{}' does not exist", entity, ident),
    )
}

fn dry_run_ok() -> DriverError {
    DriverError::with_code(
        "DryRunOperation",
        "request would have succeeded, but the dry run flag is set",
    )
}

fn unsupported(action: Action, entity: Entity) -> DriverError {
    DriverError::with_code(
        "UnsupportedOperation",
        format!("{} {} is not supported by the sandbox", action, entity),
    )
}

fn missing(key: &str) -> DriverError {
    DriverError::with_code("MissingParameter", format!("parameter '{}' is required", key))
}

fn text(params: &Params, key: &str) -> Result<String, DriverError> {
    params
        .get(key)
        .map(|v| v.to_string())
        .ok_or_else(|| missing(key))
}

/// List parameters accept a CSV or a single scalar.
fn items(value: &Value) -> Vec<String> {
    match value {
        Value::Csv(items) => items.clone(),
        other => vec![other.to_string()],
    }
}

fn flatten(params: &Params) -> IndexMap<String, String> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), v.to_string()))
        .collect()
}

fn describe(params: &Params, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| params.get(*k).map(|v| format!("{}={}", k, v)))
        .collect::<Vec<_>>()
        .join(" ")
}
