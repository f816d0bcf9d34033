//! Driver registry: `(Entity, Action)` → typed handler, with a dry-run counterpart.
//!
//! Handlers are registered once at startup. Before a handler runs, the resolved
//! parameters are checked against the driver's [`DriverSpec`].

use super::error::{DriverError, Error};
use super::types::{Action, Entity, Params, Value};
use rustc_hash::FxHashMap;
use std::cell::Cell;
use std::fmt;

/// Error codes the platform reports from its validation path when a call would succeed.
const DRY_RUN_OK_CODE: &str = "DryRunOperation";
const NOT_FOUND_SUFFIX: &str = "NotFound";

/// Kind of literal a driver parameter expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Str,
    Int,
    Bool,
    Cidr,
    Ip,
    List,
    Range,
}

impl ParamKind {
    /// Whether a resolved value can be passed where this kind is expected.
    pub fn accepts(&self, value: &Value) -> bool {
        let scalar = matches!(
            value,
            Value::String(_) | Value::Int(_) | Value::IntRange(..) | Value::Cidr(_) | Value::Ip(_)
        );
        match self {
            Self::Str => scalar,
            Self::Int => matches!(value, Value::Int(_)),
            Self::Bool => matches!(value, Value::String(s) if s == "true" || s == "false"),
            Self::Cidr => matches!(value, Value::Cidr(_)),
            Self::Ip => matches!(value, Value::Ip(_)),
            Self::List => scalar || matches!(value, Value::Csv(_)),
            Self::Range => matches!(value, Value::IntRange(..) | Value::Int(_)),
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Str => "string",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Cidr => "cidr",
            Self::Ip => "ip",
            Self::List => "list",
            Self::Range => "range",
        };
        f.write_str(s)
    }
}

/// One declared driver parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub key: &'static str,
    pub kind: ParamKind,
}

/// Parameters a driver takes, and the prefix of the identifier it produces (if any).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverSpec {
    pub required: Vec<ParamSpec>,
    pub extra: Vec<ParamSpec>,
    /// Prefix for identifiers this driver returns; dry-run placeholders use it.
    pub result_prefix: Option<&'static str>,
}

impl DriverSpec {
    /// Check resolved parameters: missing required keys and kind mismatches are
    /// errors, unknown keys only warn.
    pub fn check(&self, action: Action, entity: Entity, params: &Params) -> Result<(), Error> {
        for spec in &self.required {
            let value = params.get(spec.key).ok_or_else(|| Error::MissingParam {
                action,
                entity,
                key: spec.key.to_string(),
            })?;
            check_kind(action, entity, spec, value)?;
        }
        for spec in &self.extra {
            if let Some(value) = params.get(spec.key) {
                check_kind(action, entity, spec, value)?;
            }
        }
        for key in params.keys() {
            if !self.declares(key) {
                tracing::warn!(%action, %entity, key = %key, "unknown parameter ignored by driver");
            }
        }
        Ok(())
    }

    pub fn declares(&self, key: &str) -> bool {
        self.required
            .iter()
            .chain(self.extra.iter())
            .any(|p| p.key == key)
    }
}

fn check_kind(action: Action, entity: Entity, spec: &ParamSpec, value: &Value) -> Result<(), Error> {
    if spec.kind.accepts(value) {
        Ok(())
    } else {
        Err(Error::ParamType {
            action,
            entity,
            key: spec.key.to_string(),
            expected: spec.kind,
            found: value.kind_name(),
        })
    }
}

/// Registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverKey {
    pub entity: Entity,
    pub action: Action,
}

/// A driver call: resolved parameters in, opaque result (or nothing) out.
pub type Handler = Box<dyn Fn(&Params) -> Result<Option<String>, DriverError>>;

struct Driver {
    spec: DriverSpec,
    run: Handler,
    dry_run: Option<Handler>,
}

/// Map from `(Entity, Action)` to registered drivers.
#[derive(Default)]
pub struct Registry {
    drivers: FxHashMap<DriverKey, Driver>,
    placeholders: Cell<u64>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver. A later registration for the same key replaces the earlier one.
    pub fn register(
        &mut self,
        entity: Entity,
        action: Action,
        spec: DriverSpec,
        run: Handler,
        dry_run: Option<Handler>,
    ) {
        self.drivers.insert(
            DriverKey { entity, action },
            Driver { spec, run, dry_run },
        );
    }

    pub fn contains(&self, action: Action, entity: Entity) -> bool {
        self.drivers.contains_key(&DriverKey { entity, action })
    }

    pub fn spec(&self, action: Action, entity: Entity) -> Option<&DriverSpec> {
        self.drivers
            .get(&DriverKey { entity, action })
            .map(|d| &d.spec)
    }

    /// Registered keys, sorted by entity then action name.
    pub fn keys(&self) -> Vec<DriverKey> {
        let mut keys: Vec<DriverKey> = self.drivers.keys().copied().collect();
        keys.sort_by_key(|k| (k.entity.as_str(), k.action.as_str()));
        keys
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Check parameters and run the real or dry-run handler for `(entity, action)`.
    ///
    /// In dry-run mode a platform error that means "would succeed" becomes a placeholder
    /// identifier `<prefix>-dryrun-<n>` (or no result for drivers that produce none).
    pub fn dispatch(
        &self,
        action: Action,
        entity: Entity,
        params: &Params,
        dry_run: bool,
    ) -> Result<Option<String>, Error> {
        let driver = self
            .drivers
            .get(&DriverKey { entity, action })
            .ok_or(Error::NoDriver { action, entity })?;
        driver.spec.check(action, entity, params)?;

        if !dry_run {
            return (driver.run)(params).map_err(|source| Error::Driver {
                action,
                entity,
                source,
            });
        }

        let handler = driver
            .dry_run
            .as_ref()
            .ok_or(Error::NoDriver { action, entity })?;
        match handler(params) {
            Ok(result) => Ok(result),
            Err(e) if would_succeed(&e) => {
                tracing::debug!(%action, %entity, code = ?e.code, "dry run would succeed");
                Ok(driver.spec.result_prefix.map(|p| self.placeholder(p)))
            }
            Err(source) => Err(Error::Driver {
                action,
                entity,
                source,
            }),
        }
    }

    fn placeholder(&self, prefix: &str) -> String {
        let n = self.placeholders.get() + 1;
        self.placeholders.set(n);
        format!("{}-dryrun-{}", prefix, n)
    }
}

/// Dry-run classification: the platform's dry-run code or any not-found code.
pub fn would_succeed(error: &DriverError) -> bool {
    match &error.code {
        Some(code) => code == DRY_RUN_OK_CODE || code.ends_with(NOT_FOUND_SUFFIX),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> DriverSpec {
        DriverSpec {
            required: vec![ParamSpec {
                key: "cidr",
                kind: ParamKind::Cidr,
            }],
            extra: vec![ParamSpec {
                key: "count",
                kind: ParamKind::Int,
            }],
            result_prefix: Some("vpc"),
        }
    }

    fn params(pairs: &[(&str, Value)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn registry_with(dry: Handler) -> Registry {
        let mut registry = Registry::new();
        registry.register(
            Entity::Vpc,
            Action::Create,
            spec(),
            Box::new(|_| Ok(Some("vpc-00000001".to_string()))),
            Some(dry),
        );
        registry
    }

    #[test]
    fn test_registry_kind_compatibility() {
        let s = Value::String("t2.micro".into());
        assert!(ParamKind::Str.accepts(&s));
        assert!(ParamKind::Str.accepts(&Value::Int(3)));
        assert!(!ParamKind::Str.accepts(&Value::Csv(vec!["a".into(), "b".into()])));
        assert!(ParamKind::List.accepts(&Value::Csv(vec!["a".into(), "b".into()])));
        assert!(ParamKind::List.accepts(&s));
        assert!(ParamKind::Range.accepts(&Value::Int(22)));
        assert!(ParamKind::Range.accepts(&Value::IntRange(22, 25)));
        assert!(ParamKind::Bool.accepts(&Value::String("true".into())));
        assert!(!ParamKind::Bool.accepts(&Value::String("yes".into())));
        assert!(!ParamKind::Int.accepts(&Value::String("3".into())));
        assert!(!ParamKind::Cidr.accepts(&Value::Ip("10.0.0.1".into())));
    }

    #[test]
    fn test_registry_check_missing_param() {
        let err = spec()
            .check(Action::Create, Entity::Vpc, &Params::new())
            .unwrap_err();
        assert!(matches!(err, Error::MissingParam { ref key, .. } if key == "cidr"));
    }

    #[test]
    fn test_registry_check_type_mismatch() {
        let p = params(&[("cidr", Value::Ip("10.0.0.1".into()))]);
        let err = spec().check(Action::Create, Entity::Vpc, &p).unwrap_err();
        match err {
            Error::ParamType {
                key,
                expected,
                found,
                ..
            } => {
                assert_eq!(key, "cidr");
                assert_eq!(expected, ParamKind::Cidr);
                assert_eq!(found, "ip");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_registry_check_unknown_key_is_not_error() {
        let p = params(&[
            ("cidr", Value::Cidr("10.0.0.0/16".into())),
            ("colour", Value::String("blue".into())),
        ]);
        assert!(spec().check(Action::Create, Entity::Vpc, &p).is_ok());
    }

    #[test]
    fn test_registry_dispatch_real() {
        let registry = registry_with(Box::new(|_| Ok(None)));
        let p = params(&[("cidr", Value::Cidr("10.0.0.0/16".into()))]);
        let result = registry
            .dispatch(Action::Create, Entity::Vpc, &p, false)
            .unwrap();
        assert_eq!(result.as_deref(), Some("vpc-00000001"));
    }

    #[test]
    fn test_registry_dispatch_no_driver() {
        let registry = Registry::new();
        let err = registry
            .dispatch(Action::Delete, Entity::Vpc, &Params::new(), false)
            .unwrap_err();
        assert!(matches!(err, Error::NoDriver { .. }));
    }

    #[test]
    fn test_registry_dry_run_placeholder() {
        let registry = registry_with(Box::new(|_| {
            Err(DriverError::with_code("DryRunOperation", "would have succeeded"))
        }));
        let p = params(&[("cidr", Value::Cidr("10.0.0.0/16".into()))]);
        let first = registry
            .dispatch(Action::Create, Entity::Vpc, &p, true)
            .unwrap();
        let second = registry
            .dispatch(Action::Create, Entity::Vpc, &p, true)
            .unwrap();
        assert_eq!(first.as_deref(), Some("vpc-dryrun-1"));
        assert_eq!(second.as_deref(), Some("vpc-dryrun-2"));
    }

    #[test]
    fn test_registry_dry_run_not_found_would_succeed() {
        let registry = registry_with(Box::new(|_| {
            Err(DriverError::with_code("InvalidVpcID.NotFound", "no such vpc"))
        }));
        let p = params(&[("cidr", Value::Cidr("10.0.0.0/16".into()))]);
        assert!(registry
            .dispatch(Action::Create, Entity::Vpc, &p, true)
            .is_ok());
    }

    #[test]
    fn test_registry_dry_run_real_failure_surfaces() {
        let registry = registry_with(Box::new(|_| {
            Err(DriverError::with_code("UnauthorizedOperation", "denied"))
        }));
        let p = params(&[("cidr", Value::Cidr("10.0.0.0/16".into()))]);
        let err = registry
            .dispatch(Action::Create, Entity::Vpc, &p, true)
            .unwrap_err();
        assert_eq!(err.to_string(), "create vpc: UnauthorizedOperation: denied");
    }

    #[test]
    fn test_registry_keys_sorted() {
        let mut registry = Registry::new();
        for (entity, action) in [
            (Entity::Vpc, Action::Delete),
            (Entity::Subnet, Action::Create),
            (Entity::Vpc, Action::Create),
        ] {
            registry.register(entity, action, DriverSpec::default(), Box::new(|_| Ok(None)), None);
        }
        let keys = registry.keys();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0].entity, Entity::Subnet);
        assert_eq!(keys[1].action, Action::Create);
        assert_eq!(keys[2].action, Action::Delete);
    }
}
