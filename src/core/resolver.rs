//! Resolution environment: declared bindings, references, aliases and holes.
//!
//! One [`Environment`] per template run. It owns the declared identifier → result
//! bindings, the hole-filler and alias collaborators, and the run's [`RunLog`].

use super::error::Error;
use super::parser::parse_value;
use super::types::{Params, Value};
use crate::journal::eventlog::RunLog;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, Write};

/// Supplies values for `{hole}` parameters.
///
/// `Ok(None)` means the filler declined; `Err` carries the filler's own failure.
pub trait HoleFiller {
    fn fill(&mut self, hole: &str) -> Result<Option<String>, String>;
}

/// Looks up `@alias` names.
pub trait AliasResolver {
    fn resolve(&self, name: &str) -> Option<String>;
}

/// Filler that always declines.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHoles;

impl HoleFiller for NoHoles {
    fn fill(&mut self, _hole: &str) -> Result<Option<String>, String> {
        Ok(None)
    }
}

/// Pre-supplied hole values.
#[derive(Debug, Default, Clone)]
pub struct FillMap(pub HashMap<String, String>);

impl HoleFiller for FillMap {
    fn fill(&mut self, hole: &str) -> Result<Option<String>, String> {
        Ok(self.0.get(hole).cloned())
    }
}

/// Interactive prompt: asks on `output`, reads one line from `input`.
/// An empty answer or end of input declines.
pub struct PromptFiller<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptFiller<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl PromptFiller<std::io::StdinLock<'static>, std::io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stderr())
    }
}

impl<R: BufRead, W: Write> HoleFiller for PromptFiller<R, W> {
    fn fill(&mut self, hole: &str) -> Result<Option<String>, String> {
        write!(self.output, "{}? ", hole).map_err(|e| e.to_string())?;
        self.output.flush().map_err(|e| e.to_string())?;
        let mut line = String::new();
        let n = self.input.read_line(&mut line).map_err(|e| e.to_string())?;
        let answer = line.trim();
        if n == 0 || answer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(answer.to_string()))
        }
    }
}

/// Tries each filler in order; the first that answers wins.
#[derive(Default)]
pub struct FillChain(Vec<Box<dyn HoleFiller>>);

impl FillChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, filler: impl HoleFiller + 'static) -> Self {
        self.0.push(Box::new(filler));
        self
    }
}

impl HoleFiller for FillChain {
    fn fill(&mut self, hole: &str) -> Result<Option<String>, String> {
        for filler in &mut self.0 {
            if let Some(v) = filler.fill(hole)? {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }
}

impl AliasResolver for HashMap<String, String> {
    fn resolve(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl AliasResolver for IndexMap<String, String> {
    fn resolve(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Tries each resolver in order.
#[derive(Default)]
pub struct AliasChain(Vec<Box<dyn AliasResolver>>);

impl AliasChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, resolver: impl AliasResolver + 'static) -> Self {
        self.0.push(Box::new(resolver));
        self
    }
}

impl AliasResolver for AliasChain {
    fn resolve(&self, name: &str) -> Option<String> {
        self.0.iter().find_map(|r| r.resolve(name))
    }
}

/// What happens when a template declares the same identifier twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedeclarationPolicy {
    /// Last write wins.
    #[default]
    Overwrite,
    /// The redeclaring statement fails before its driver runs.
    Reject,
}

/// Classify an opaque string (driver result, alias target) as a literal value,
/// falling back to a plain String.
pub fn classify(text: &str) -> Value {
    match parse_value(text) {
        Ok(v) if v.is_literal() => v,
        _ => Value::String(text.to_string()),
    }
}

/// Process-local state for one template run.
pub struct Environment {
    bindings: IndexMap<String, Value>,
    declared: HashSet<String>,
    filled: HashMap<String, Value>,
    holes: Box<dyn HoleFiller>,
    aliases: Box<dyn AliasResolver>,
    policy: RedeclarationPolicy,
    log: RunLog,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// No holes, no aliases, overwrite on redeclaration, tracing-only log.
    pub fn new() -> Self {
        Self {
            bindings: IndexMap::new(),
            declared: HashSet::new(),
            filled: HashMap::new(),
            holes: Box::new(NoHoles),
            aliases: Box::new(HashMap::<String, String>::new()),
            policy: RedeclarationPolicy::default(),
            log: RunLog::disabled(),
        }
    }

    pub fn with_holes(mut self, holes: impl HoleFiller + 'static) -> Self {
        self.holes = Box::new(holes);
        self
    }

    pub fn with_aliases(mut self, aliases: impl AliasResolver + 'static) -> Self {
        self.aliases = Box::new(aliases);
        self
    }

    pub fn with_policy(mut self, policy: RedeclarationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_log(mut self, log: RunLog) -> Self {
        self.log = log;
        self
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    pub fn policy(&self) -> RedeclarationPolicy {
        self.policy
    }

    /// Current binding for a declared identifier.
    pub fn lookup(&self, ident: &str) -> Option<&Value> {
        self.bindings.get(ident)
    }

    pub fn bindings(&self) -> &IndexMap<String, Value> {
        &self.bindings
    }

    /// Check a declaration against the redeclaration policy before it runs.
    pub fn ensure_declarable(&self, ident: &str) -> Result<(), Error> {
        if self.policy == RedeclarationPolicy::Reject && self.declared.contains(ident) {
            return Err(Error::Redeclared(ident.to_string()));
        }
        Ok(())
    }

    /// Bind a declaration's driver result. No result means no binding.
    pub fn bind(&mut self, ident: &str, result: Option<&str>) {
        self.declared.insert(ident.to_string());
        match result {
            Some(text) => {
                if self.bindings.contains_key(ident) {
                    tracing::debug!(%ident, "overwriting earlier binding");
                }
                self.bindings.insert(ident.to_string(), classify(text));
            }
            None => {
                self.bindings.shift_remove(ident);
                self.log.warn(&format!(
                    "declaration '{}' produced no result; nothing bound",
                    ident
                ));
            }
        }
    }

    /// Resolve every parameter to a concrete literal.
    pub fn resolve_params(&mut self, params: &Params) -> Result<Params, Error> {
        let mut resolved = Params::with_capacity(params.len());
        for (key, value) in params {
            resolved.insert(key.clone(), self.resolve_value(value)?);
        }
        Ok(resolved)
    }

    pub fn resolve_value(&mut self, value: &Value) -> Result<Value, Error> {
        match value {
            Value::Reference(id) => self
                .bindings
                .get(id)
                .cloned()
                .ok_or_else(|| Error::UnresolvedReference(id.clone())),
            Value::Alias(name) => self
                .aliases
                .resolve(name)
                .map(|target| classify(&target))
                .ok_or_else(|| Error::UnresolvedAlias(name.clone())),
            Value::Hole(id) => self.fill_hole(id),
            literal => Ok(literal.clone()),
        }
    }

    /// Each hole is asked at most once per run.
    fn fill_hole(&mut self, hole: &str) -> Result<Value, Error> {
        if let Some(v) = self.filled.get(hole) {
            return Ok(v.clone());
        }
        let answer = self
            .holes
            .fill(hole)
            .map_err(|reason| Error::UnresolvedHole {
                hole: hole.to_string(),
                reason,
            })?
            .ok_or_else(|| Error::UnresolvedHole {
                hole: hole.to_string(),
                reason: "no value supplied".to_string(),
            })?;

        let value = match parse_value(&answer) {
            Ok(v) if v.is_literal() => v,
            _ => {
                return Err(Error::UnresolvedHole {
                    hole: hole.to_string(),
                    reason: format!("'{}' is not a literal value", answer),
                })
            }
        };
        tracing::debug!(%hole, value = %value, "hole filled");
        self.filled.insert(hole.to_string(), value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::Cursor;
    use std::rc::Rc;

    fn fills(pairs: &[(&str, &str)]) -> FillMap {
        FillMap(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    struct CountingFiller {
        calls: Rc<Cell<u32>>,
    }

    impl HoleFiller for CountingFiller {
        fn fill(&mut self, _hole: &str) -> Result<Option<String>, String> {
            self.calls.set(self.calls.get() + 1);
            Ok(Some("eu-west-1a".to_string()))
        }
    }

    struct FailingFiller;

    impl HoleFiller for FailingFiller {
        fn fill(&mut self, _hole: &str) -> Result<Option<String>, String> {
            Err("terminal closed".to_string())
        }
    }

    #[test]
    fn test_resolver_literals_pass_through() {
        let mut env = Environment::new();
        let v = Value::Cidr("10.0.0.0/16".into());
        assert_eq!(env.resolve_value(&v).unwrap(), v);
    }

    #[test]
    fn test_resolver_reference_after_bind() {
        let mut env = Environment::new();
        env.bind("vpcid", Some("vpc-123"));
        let v = env
            .resolve_value(&Value::Reference("vpcid".into()))
            .unwrap();
        assert_eq!(v, Value::String("vpc-123".into()));
    }

    #[test]
    fn test_resolver_unresolved_reference() {
        let mut env = Environment::new();
        let err = env
            .resolve_value(&Value::Reference("vpcid".into()))
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference(id) if id == "vpcid"));
    }

    #[test]
    fn test_resolver_bind_without_result() {
        let mut env = Environment::new();
        env.bind("x", Some("vpc-1"));
        env.bind("x", None);
        assert!(env.lookup("x").is_none());
        assert!(env.resolve_value(&Value::Reference("x".into())).is_err());
    }

    #[test]
    fn test_resolver_bind_classifies_result() {
        let mut env = Environment::new();
        env.bind("ip", Some("10.0.0.5"));
        assert_eq!(env.lookup("ip"), Some(&Value::Ip("10.0.0.5".into())));
        env.bind("url", Some("https://queue.example/1 2"));
        assert_eq!(
            env.lookup("url"),
            Some(&Value::String("https://queue.example/1 2".into()))
        );
    }

    #[test]
    fn test_resolver_overwrite_policy() {
        let mut env = Environment::new();
        env.bind("a", Some("vpc-1"));
        assert!(env.ensure_declarable("a").is_ok());
        env.bind("a", Some("vpc-2"));
        assert_eq!(env.lookup("a"), Some(&Value::String("vpc-2".into())));
    }

    #[test]
    fn test_resolver_reject_policy() {
        let mut env = Environment::new().with_policy(RedeclarationPolicy::Reject);
        assert!(env.ensure_declarable("a").is_ok());
        env.bind("a", None);
        let err = env.ensure_declarable("a").unwrap_err();
        assert!(matches!(err, Error::Redeclared(id) if id == "a"));
    }

    #[test]
    fn test_resolver_alias_chain() {
        let first: HashMap<String, String> = [("prod".to_string(), "vpc-1".to_string())].into();
        let second: HashMap<String, String> = [
            ("prod".to_string(), "vpc-2".to_string()),
            ("office".to_string(), "10.1.0.0/16".to_string()),
        ]
        .into();
        let mut env = Environment::new().with_aliases(AliasChain::new().then(first).then(second));
        assert_eq!(
            env.resolve_value(&Value::Alias("prod".into())).unwrap(),
            Value::String("vpc-1".into())
        );
        assert_eq!(
            env.resolve_value(&Value::Alias("office".into())).unwrap(),
            Value::Cidr("10.1.0.0/16".into())
        );
        let err = env
            .resolve_value(&Value::Alias("missing".into()))
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvedAlias(_)));
    }

    #[test]
    fn test_resolver_hole_typed_from_fill() {
        let mut env = Environment::new().with_holes(fills(&[("cidr", "10.0.0.0/24"), ("n", "3")]));
        assert_eq!(
            env.resolve_value(&Value::Hole("cidr".into())).unwrap(),
            Value::Cidr("10.0.0.0/24".into())
        );
        assert_eq!(
            env.resolve_value(&Value::Hole("n".into())).unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn test_resolver_hole_declined() {
        let mut env = Environment::new();
        let err = env.resolve_value(&Value::Hole("zone".into())).unwrap_err();
        assert!(matches!(err, Error::UnresolvedHole { ref hole, .. } if hole == "zone"));
    }

    #[test]
    fn test_resolver_hole_filler_error() {
        let mut env = Environment::new().with_holes(FailingFiller);
        let err = env.resolve_value(&Value::Hole("zone".into())).unwrap_err();
        assert!(err.to_string().contains("terminal closed"));
    }

    #[test]
    fn test_resolver_hole_rejects_symbolic_fill() {
        let mut env = Environment::new().with_holes(fills(&[("vpc", "$other")]));
        assert!(env.resolve_value(&Value::Hole("vpc".into())).is_err());
    }

    #[test]
    fn test_resolver_hole_asked_once() {
        let calls = Rc::new(Cell::new(0));
        let mut env = Environment::new().with_holes(CountingFiller {
            calls: calls.clone(),
        });
        for _ in 0..3 {
            env.resolve_value(&Value::Hole("zone".into())).unwrap();
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_resolver_fill_chain_falls_through() {
        let mut chain = FillChain::new().then(fills(&[("a", "1")])).then(fills(&[("b", "2")]));
        assert_eq!(chain.fill("b").unwrap().as_deref(), Some("2"));
        assert_eq!(chain.fill("c").unwrap(), None);
    }

    #[test]
    fn test_resolver_prompt_filler() {
        let mut out = Vec::new();
        {
            let mut prompt = PromptFiller::new(Cursor::new("t2.micro\n\n"), &mut out);
            assert_eq!(prompt.fill("type").unwrap().as_deref(), Some("t2.micro"));
            assert_eq!(prompt.fill("key").unwrap(), None);
            assert_eq!(prompt.fill("more").unwrap(), None);
        }
        let shown = String::from_utf8(out).unwrap();
        assert!(shown.contains("type? "));
        assert!(shown.contains("key? "));
    }

    #[test]
    fn test_resolver_resolve_params_keeps_order() {
        let mut env = Environment::new();
        env.bind("vpcid", Some("vpc-9"));
        let mut params = Params::new();
        params.insert("vpc".into(), Value::Reference("vpcid".into()));
        params.insert("cidr".into(), Value::Cidr("10.0.1.0/24".into()));
        let resolved = env.resolve_params(&params).unwrap();
        let keys: Vec<&String> = resolved.keys().collect();
        assert_eq!(keys, vec!["vpc", "cidr"]);
        assert_eq!(resolved["vpc"], Value::String("vpc-9".into()));
    }
}
