//! Drivers: the catalogued `(Entity, Action)` handlers, backed by the sandbox platform.

pub mod catalog;
pub mod sandbox;

use crate::core::error::Error;
use crate::core::registry::{Handler, Registry};
use crate::core::resolver::AliasResolver;
use crate::core::types::Params;
use sandbox::{Mode, Sandbox};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

/// Register a real and a dry-run handler for every catalogued driver.
pub fn register_sandbox(registry: &mut Registry, sandbox: Rc<RefCell<Sandbox>>) {
    for (entity, action, spec) in catalog::catalog() {
        let real = Rc::clone(&sandbox);
        let run: Handler =
            Box::new(move |params: &Params| real.borrow_mut().call(action, entity, params, Mode::Apply));
        let dry = Rc::clone(&sandbox);
        let dry_run: Handler =
            Box::new(move |params: &Params| dry.borrow_mut().call(action, entity, params, Mode::Validate));
        registry.register(entity, action, spec, run, Some(dry_run));
    }
    tracing::debug!(drivers = registry.len(), "sandbox drivers registered");
}

/// Registry over the sandbox persisted under `state_dir`.
pub fn sandbox_registry(state_dir: &Path) -> Result<(Registry, Rc<RefCell<Sandbox>>), Error> {
    let sandbox = Rc::new(RefCell::new(Sandbox::open(state_dir)?));
    let mut registry = Registry::new();
    register_sandbox(&mut registry, Rc::clone(&sandbox));
    Ok((registry, sandbox))
}

/// Resolves `@name` to the identifier of the sandbox resource carrying that name.
pub struct SandboxAliases(pub Rc<RefCell<Sandbox>>);

impl AliasResolver for SandboxAliases {
    fn resolve(&self, name: &str) -> Option<String> {
        self.0.borrow().find_by_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::{run, run_reverted, RunConfig};
    use crate::core::history::{HistoryStore, MemoryHistory};
    use crate::core::parser::parse_template;
    use crate::core::resolver::{AliasChain, Environment};
    use crate::core::revert::revert;
    use crate::core::types::{Action, Entity, Value};
    use crate::journal::eventlog::RunLog;

    const NETWORK: &str = "\
vpc = create vpc cidr=10.0.0.0/16
sub = create subnet cidr=10.0.1.0/24 vpc=$vpc
rtb = create routetable vpc=$vpc
assoc = attach routetable id=$rtb subnet=$sub
";

    fn in_memory() -> (Registry, Rc<RefCell<Sandbox>>) {
        let sandbox = Rc::new(RefCell::new(Sandbox::in_memory()));
        let mut registry = Registry::new();
        register_sandbox(&mut registry, Rc::clone(&sandbox));
        (registry, sandbox)
    }

    #[test]
    fn test_drivers_every_catalog_entry_registered() {
        let (registry, _) = in_memory();
        assert_eq!(registry.len(), catalog::catalog().len());
        assert!(registry.contains(Action::Create, Entity::Vpc));
        assert!(!registry.contains(Action::Check, Entity::Vpc));
    }

    #[test]
    fn test_drivers_dry_run_uses_placeholders() {
        let (registry, sandbox) = in_memory();
        let template = parse_template(NETWORK).unwrap();
        let mut env = Environment::new();
        let cfg = RunConfig {
            registry: &registry,
            store: None,
            dry_run: true,
        };
        let report = run(&template, &mut env, &cfg).unwrap();
        assert!(report.succeeded(), "{:?}", report.failure);
        assert_eq!(
            env.lookup("vpc"),
            Some(&Value::String("vpc-dryrun-1".to_string()))
        );
        assert_eq!(
            env.lookup("assoc"),
            Some(&Value::String("rtbassoc-dryrun-4".to_string()))
        );
        assert!(sandbox.borrow().state().resources.is_empty());
    }

    #[test]
    fn test_drivers_run_then_revert_restores_sandbox() {
        let (registry, sandbox) = in_memory();
        let store = MemoryHistory::new();
        let cfg = RunConfig {
            registry: &registry,
            store: Some(&store),
            dry_run: false,
        };
        let template = parse_template(NETWORK).unwrap();
        let report = run(&template, &mut Environment::new(), &cfg).unwrap();
        assert!(report.succeeded(), "{:?}", report.failure);
        assert_eq!(sandbox.borrow().state().resources.len(), 3);
        assert_eq!(sandbox.borrow().state().associations.len(), 1);

        let record = store.get_template_execution(&report.record.revert_id).unwrap();
        let reverted = revert(&record, &RunLog::disabled()).unwrap();
        assert_eq!(
            reverted.template.to_string(),
            "detach routetable association=rtbassoc-00000004\n\
             delete routetable id=rtb-00000003\n\
             delete subnet id=subnet-00000002\n\
             delete vpc id=vpc-00000001"
        );
        let undo = run_reverted(&reverted, RunLog::disabled(), &cfg).unwrap();
        assert!(undo.succeeded(), "{:?}", undo.failure);
        assert!(sandbox.borrow().state().resources.is_empty());
        assert!(sandbox.borrow().state().associations.is_empty());
    }

    #[test]
    fn test_drivers_failure_stops_run() {
        let (registry, sandbox) = in_memory();
        let template = parse_template(
            "create vpc cidr=10.0.0.0/16\n\
             create subnet cidr=10.0.1.0/24 vpc=vpc-ffffffff\n\
             create vpc cidr=10.1.0.0/16\n",
        )
        .unwrap();
        let cfg = RunConfig {
            registry: &registry,
            store: None,
            dry_run: false,
        };
        let report = run(&template, &mut Environment::new(), &cfg).unwrap();
        assert!(!report.succeeded());
        assert_eq!(report.record.entries.len(), 2);
        assert_eq!(sandbox.borrow().state().resources.len(), 1);
    }

    #[test]
    fn test_drivers_sandbox_aliases() {
        let (registry, sandbox) = in_memory();
        let cfg = RunConfig {
            registry: &registry,
            store: None,
            dry_run: false,
        };
        let setup = parse_template("create user name=alice\ncreate group name=ops\n").unwrap();
        run(&setup, &mut Environment::new(), &cfg)
            .unwrap()
            .into_result()
            .unwrap();

        let aliases = AliasChain::new().then(SandboxAliases(Rc::clone(&sandbox)));
        let mut env = Environment::new().with_aliases(aliases);
        let template = parse_template("create tag resource=@ops key=team value=platform\n").unwrap();
        let report = run(&template, &mut env, &cfg).unwrap();
        assert!(report.succeeded(), "{:?}", report.failure);
        assert_eq!(
            report.record.entries[0].resolved["resource"],
            Value::String("group-00000002".to_string())
        );
    }

    #[test]
    fn test_drivers_registry_over_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (registry, _) = sandbox_registry(dir.path()).unwrap();
            registry
                .dispatch(
                    Action::Create,
                    Entity::Bucket,
                    &[("name".to_string(), Value::String("logs".to_string()))]
                        .into_iter()
                        .collect(),
                    false,
                )
                .unwrap();
        }
        let (_, sandbox) = sandbox_registry(dir.path()).unwrap();
        assert_eq!(sandbox.borrow().find_by_name("logs").as_deref(), Some("bucket-00000001"));
    }
}
