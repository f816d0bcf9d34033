//! Driver parameter catalogue: required and extra parameters per `(Entity, Action)`.

use crate::core::registry::{DriverSpec, ParamKind, ParamSpec};
use crate::core::types::{Action, Entity};

use crate::core::registry::ParamKind::{Bool, Cidr, Int, Ip, List, Str};

type Keys = &'static [(&'static str, ParamKind)];

/// One catalogue row.
struct Row {
    entity: Entity,
    action: Action,
    required: Keys,
    extra: Keys,
}

const fn row(entity: Entity, action: Action, required: Keys, extra: Keys) -> Row {
    Row {
        entity,
        action,
        required,
        extra,
    }
}

const ID: Keys = &[("id", Str)];
const IDS: Keys = &[("id", List)];
const ARN: Keys = &[("arn", Str)];
const NAME: Keys = &[("name", Str)];
const NONE: Keys = &[];

const CATALOG: &[Row] = &[
    row(Entity::Vpc, Action::Create, &[("cidr", Cidr)], NONE),
    row(Entity::Vpc, Action::Delete, ID, NONE),
    row(Entity::Subnet, Action::Create, &[("cidr", Cidr), ("vpc", Str)], &[("zone", Str)]),
    row(Entity::Subnet, Action::Update, ID, &[("public", Bool)]),
    row(Entity::Subnet, Action::Delete, ID, NONE),
    row(
        Entity::Instance,
        Action::Create,
        &[("image", Str), ("count", Int), ("type", Str), ("subnet", Str)],
        &[("key", Str), ("ip", Ip), ("userdata", Str), ("group", List), ("lock", Bool)],
    ),
    row(Entity::Instance, Action::Update, ID, &[("type", Str), ("group", List), ("lock", Bool)]),
    row(Entity::Instance, Action::Delete, IDS, NONE),
    row(Entity::Instance, Action::Start, IDS, NONE),
    row(Entity::Instance, Action::Stop, IDS, NONE),
    row(
        Entity::SecurityGroup,
        Action::Create,
        &[("name", Str), ("vpc", Str), ("description", Str)],
        NONE,
    ),
    row(Entity::SecurityGroup, Action::Delete, ID, NONE),
    row(Entity::Volume, Action::Create, &[("zone", Str), ("size", Int)], NONE),
    row(Entity::Volume, Action::Delete, ID, NONE),
    row(Entity::Volume, Action::Attach, &[("device", Str), ("id", Str), ("instance", Str)], NONE),
    row(Entity::Volume, Action::Detach, &[("device", Str), ("id", Str), ("instance", Str)], NONE),
    row(Entity::InternetGateway, Action::Create, NONE, NONE),
    row(Entity::InternetGateway, Action::Delete, ID, NONE),
    row(Entity::InternetGateway, Action::Attach, &[("id", Str), ("vpc", Str)], NONE),
    row(Entity::InternetGateway, Action::Detach, &[("id", Str), ("vpc", Str)], NONE),
    row(Entity::RouteTable, Action::Create, &[("vpc", Str)], NONE),
    row(Entity::RouteTable, Action::Delete, ID, NONE),
    row(Entity::RouteTable, Action::Attach, &[("id", Str), ("subnet", Str)], NONE),
    row(Entity::RouteTable, Action::Detach, &[("association", Str)], NONE),
    row(Entity::Route, Action::Create, &[("table", Str), ("cidr", Cidr), ("gateway", Str)], NONE),
    row(Entity::Route, Action::Delete, &[("table", Str), ("cidr", Cidr)], NONE),
    row(Entity::Keypair, Action::Create, NAME, &[("encrypted", Bool)]),
    row(Entity::Keypair, Action::Delete, ID, NONE),
    row(
        Entity::LoadBalancer,
        Action::Create,
        &[("name", Str), ("subnets", List)],
        &[("iptype", Str), ("scheme", Str), ("groups", List)],
    ),
    row(Entity::LoadBalancer, Action::Delete, ARN, NONE),
    row(
        Entity::Listener,
        Action::Create,
        &[
            ("actiontype", Str),
            ("target", Str),
            ("certificate", Str),
            ("loadbalancer", Str),
            ("port", Int),
            ("protocol", Str),
        ],
        &[("sslpolicy", Str)],
    ),
    row(Entity::Listener, Action::Delete, ARN, NONE),
    row(Entity::User, Action::Create, NAME, NONE),
    row(Entity::User, Action::Delete, NAME, NONE),
    row(Entity::User, Action::Attach, &[("group", Str), ("name", Str)], NONE),
    row(Entity::User, Action::Detach, &[("group", Str), ("name", Str)], NONE),
    row(Entity::Group, Action::Create, NAME, NONE),
    row(Entity::Group, Action::Delete, NAME, NONE),
    row(Entity::Bucket, Action::Create, NAME, NONE),
    row(Entity::Bucket, Action::Delete, NAME, NONE),
    row(Entity::StorageObject, Action::Create, &[("bucket", Str), ("key", Str)], NONE),
    row(Entity::StorageObject, Action::Delete, &[("bucket", Str), ("key", Str)], NONE),
    row(Entity::Topic, Action::Create, NAME, NONE),
    row(Entity::Topic, Action::Delete, ARN, NONE),
    row(
        Entity::Subscription,
        Action::Create,
        &[("topic", Str), ("endpoint", Str), ("protocol", Str)],
        NONE,
    ),
    row(Entity::Subscription, Action::Delete, ARN, NONE),
    row(Entity::Queue, Action::Create, NAME, &[("delay", Int), ("policy", Str)]),
    row(Entity::Queue, Action::Delete, &[("url", Str)], NONE),
    row(Entity::Tag, Action::Create, &[("resource", Str), ("key", Str), ("value", Str)], NONE),
    row(Entity::Tag, Action::Delete, &[("resource", Str), ("key", Str), ("value", Str)], NONE),
];

/// Prefix of identifiers minted for an entity.
pub fn id_prefix(entity: Entity) -> &'static str {
    match entity {
        Entity::None => "none",
        Entity::Vpc => "vpc",
        Entity::Subnet => "subnet",
        Entity::Instance => "i",
        Entity::Volume => "vol",
        Entity::Tag => "tag",
        Entity::User => "user",
        Entity::Group => "group",
        Entity::Role => "role",
        Entity::Policy => "policy",
        Entity::Keypair => "key",
        Entity::SecurityGroup => "sg",
        Entity::InternetGateway => "igw",
        Entity::RouteTable => "rtb",
        Entity::Route => "route",
        Entity::Bucket => "bucket",
        Entity::StorageObject => "obj",
        Entity::Subscription => "sub",
        Entity::Topic => "topic",
        Entity::Queue => "queue",
        Entity::LoadBalancer => "lb",
        Entity::Listener => "listener",
    }
}

/// Prefix of route-table association identifiers.
pub const ASSOCIATION_PREFIX: &str = "rtbassoc";

/// Prefix of the identifier a driver returns, if it returns one.
fn result_prefix(entity: Entity, action: Action) -> Option<&'static str> {
    match (action, entity) {
        (Action::Create, Entity::Route | Entity::Tag | Entity::StorageObject) => None,
        (Action::Create, e) => Some(id_prefix(e)),
        (Action::Attach, Entity::RouteTable) => Some(ASSOCIATION_PREFIX),
        (Action::Attach, Entity::Volume) => Some(id_prefix(Entity::Volume)),
        _ => None,
    }
}

fn to_specs(params: Keys) -> Vec<ParamSpec> {
    params
        .iter()
        .map(|&(key, kind)| ParamSpec { key, kind })
        .collect()
}

/// Every catalogued driver with its parameter spec.
pub fn catalog() -> Vec<(Entity, Action, DriverSpec)> {
    CATALOG
        .iter()
        .map(|r| {
            (
                r.entity,
                r.action,
                DriverSpec {
                    required: to_specs(r.required),
                    extra: to_specs(r.extra),
                    result_prefix: result_prefix(r.entity, r.action),
                },
            )
        })
        .collect()
}

/// Parameter spec for one `(Entity, Action)`, if catalogued.
pub fn spec_for(entity: Entity, action: Action) -> Option<DriverSpec> {
    catalog()
        .into_iter()
        .find(|(e, a, _)| *e == entity && *a == action)
        .map(|(_, _, spec)| spec)
}
