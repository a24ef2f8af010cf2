//! Dispatcher driving the built-in backends against the in-memory Chef server.

use std::sync::Arc;

use cm_backends::{register_builtin_backends, InMemoryChefServer};
use cmkit::{
    AuthData, BackendRecord, CmError, ConfigManager, CredentialEntry, InMemoryInfoBroker,
    InstanceData, NodeState, RegistryBuilder, ResolvedNodeDefinition, StaticCredentialStore,
};
use serde_json::{json, Value};

const ENDPOINT: &str = "https://chef.example.com";

struct Env {
    chef: InMemoryChefServer,
    broker: Arc<InMemoryInfoBroker>,
    cm: ConfigManager,
}

fn chef_record() -> BackendRecord {
    BackendRecord::from_value(json!({
        "type": "chef",
        "endpoint": ENDPOINT,
        "run_list": ["recipe[base]"],
    }))
    .unwrap()
}

fn setup_with(credentials: Vec<CredentialEntry>) -> Env {
    let chef = InMemoryChefServer::new();
    let mut builder = RegistryBuilder::new();
    register_builtin_backends(&mut builder, Some(Arc::new(chef.clone())));
    let registry = Arc::new(builder.build().unwrap());
    let broker = Arc::new(InMemoryInfoBroker::new());
    let cm = ConfigManager::new(
        registry,
        Arc::new(StaticCredentialStore::new(credentials)),
        broker.clone(),
    );
    Env { chef, broker, cm }
}

fn setup() -> Env {
    setup_with(vec![CredentialEntry::new(
        "chef",
        Some(ENDPOINT),
        AuthData(json!({"client_name": "occo", "client_key": "PEM"})),
    )])
}

fn web_node(node_id: &str) -> ResolvedNodeDefinition {
    ResolvedNodeDefinition::new(node_id, "infra-1", "web")
        .with_config_management(chef_record())
        .with_attribute("app.port", json!(8080))
        .with_attribute("app.name", json!("shop"))
}

#[test]
fn infrastructure_lifecycle() {
    let env = setup();
    env.broker.set_config_managers("infra-1", vec![chef_record()]);

    assert!(!env.cm.infrastructure_exists("infra-1").unwrap());
    env.cm.create_infrastructure("infra-1").unwrap();
    assert!(env.cm.infrastructure_exists("infra-1").unwrap());
    assert_eq!(env.chef.environments(), vec!["infra-1"]);

    env.cm.register_node(&web_node("n-1")).unwrap();
    assert_eq!(env.chef.roles(), vec!["infra-1_web"]);

    env.cm.drop_infrastructure("infra-1").unwrap();
    assert!(env.chef.roles().is_empty());
    assert!(env.chef.environments().is_empty());
    assert!(!env.cm.infrastructure_exists("infra-1").unwrap());

    assert_eq!(
        env.chef.connections()[0],
        (ENDPOINT.to_string(), "occo".to_string())
    );
}

#[test]
fn node_registration_and_state() {
    let env = setup();
    let def = web_node("n-1");
    let inst = InstanceData::new("i-1", def.clone());
    env.broker.add_instance(inst.clone());

    assert_eq!(env.cm.get_node_state(&inst).unwrap(), NodeState::Unknown);

    env.cm.register_node(&def).unwrap();
    let node = env.chef.node("n-1").unwrap();
    assert_eq!(node.chef_environment, "infra-1");
    assert_eq!(
        node.run_list,
        vec!["role[infra-1_web]", "recipe[connect]", "recipe[base]"]
    );
    assert_eq!(node.normal["app"], json!({"port": 8080, "name": "shop"}));
    assert_eq!(env.cm.get_node_state(&inst).unwrap(), NodeState::Pending);

    env.chef
        .converge("n-1", &[("ipaddress", json!("10.0.0.7")), ("app.port", json!(9090))])
        .unwrap();
    assert_eq!(env.cm.get_node_state(&inst).unwrap(), NodeState::Ready);

    assert_eq!(
        env.cm.get_node_attribute("n-1", "ipaddress").unwrap(),
        json!("10.0.0.7")
    );
    assert_eq!(
        env.cm.get_node_attribute("n-1", ["app", "port"]).unwrap(),
        json!(9090)
    );
    assert_eq!(
        env.cm.get_node_attribute("n-1", "app.name").unwrap(),
        json!("shop")
    );
    let err = env.cm.get_node_attribute("n-1", "app.missing").unwrap_err();
    assert!(matches!(err, CmError::AttributeNotFound { .. }));
}

#[test]
fn reregistering_keeps_reported_attributes() {
    let env = setup();
    let def = web_node("n-1");
    env.cm.register_node(&def).unwrap();
    env.chef.converge("n-1", &[]).unwrap();
    env.cm.register_node(&def).unwrap();

    let inst = InstanceData::new("i-1", def);
    assert_eq!(env.cm.get_node_state(&inst).unwrap(), NodeState::Ready);
    assert_eq!(env.chef.roles(), vec!["infra-1_web"]);
}

#[test]
fn drop_node_is_idempotent() {
    let env = setup();
    let def = web_node("n-1");
    let inst = InstanceData::new("i-1", def.clone());

    env.cm.register_node(&def).unwrap();
    env.cm.drop_node(&inst).unwrap();
    env.cm.drop_node(&inst).unwrap();
    assert!(env.chef.node("n-1").is_none());
    assert_eq!(env.cm.get_node_state(&inst).unwrap(), NodeState::Unknown);
}

#[test]
fn drop_infrastructure_keeps_other_infrastructures() {
    let env = setup();
    env.broker.set_config_managers("infra-1", vec![chef_record()]);
    env.broker.set_config_managers("infra-2", vec![chef_record()]);
    env.cm.create_infrastructure("infra-1").unwrap();
    env.cm.create_infrastructure("infra-2").unwrap();

    env.cm.register_node(&web_node("n-1")).unwrap();
    env.cm
        .register_node(
            &ResolvedNodeDefinition::new("n-2", "infra-2", "db")
                .with_config_management(chef_record()),
        )
        .unwrap();

    env.cm.drop_infrastructure("infra-1").unwrap();
    assert_eq!(env.chef.roles(), vec!["infra-2_db"]);
    assert_eq!(env.chef.environments(), vec!["infra-2"]);
}

#[test]
fn drop_infrastructure_ignores_server_failures() {
    let env = setup();
    env.broker.set_config_managers("infra-1", vec![chef_record()]);
    env.cm.create_infrastructure("infra-1").unwrap();
    env.cm.register_node(&web_node("n-1")).unwrap();

    env.chef.set_read_only(true);
    env.cm.drop_infrastructure("infra-1").unwrap();
    assert_eq!(env.chef.roles(), vec!["infra-1_web"]);

    let err = env.cm.create_infrastructure("infra-1").unwrap_err();
    assert!(matches!(err, CmError::Infrastructure { position: 0, .. }));
}

#[test]
fn mixed_backends_require_every_environment() {
    let env = setup();
    let solo = BackendRecord::from_value(json!({"type": "puppet_solo", "manifests": ["site.pp"]}))
        .unwrap();
    env.broker.set_config_managers(
        "infra-1",
        vec![BackendRecord::dummy(), solo, chef_record()],
    );

    assert!(!env.cm.infrastructure_exists("infra-1").unwrap());
    env.cm.create_infrastructure("infra-1").unwrap();
    assert!(env.cm.infrastructure_exists("infra-1").unwrap());
}

#[test]
fn puppet_record_without_endpoint_names_the_key() {
    let env = setup();
    let def = ResolvedNodeDefinition::new("n-1", "infra-1", "web").with_config_management(
        BackendRecord::from_value(json!({"type": "puppet", "manifests": ["site.pp"]})).unwrap(),
    );
    let err = env.cm.register_node(&def).unwrap_err();
    match &err {
        CmError::Schema(e) => assert_eq!(e.missing, vec!["endpoint".to_string()]),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("endpoint"));
}

#[test]
fn chef_without_credentials_is_rejected() {
    let env = setup_with(Vec::new());
    let err = env.cm.register_node(&web_node("n-1")).unwrap_err();
    assert!(matches!(err, CmError::CredentialsNotFound { ref endpoint, .. } if endpoint == ENDPOINT));
    assert!(env.chef.connections().is_empty());
}

#[test]
fn puppet_solo_resolves_attributes_through_dispatcher() {
    let env = setup();
    let def = ResolvedNodeDefinition::new("n-1", "infra-1", "web").with_config_management(
        BackendRecord::from_value(json!({
            "type": "puppet_solo",
            "manifests": ["site.pp"],
            "modules": ["ntp", "apache"],
        }))
        .unwrap(),
    );
    let attrs: Value = env.cm.resolve_attributes(&def).unwrap();
    assert_eq!(attrs["puppet"]["modules"], "ntp apache");
    assert_eq!(attrs["puppet"]["manifests"], "site.pp");
    assert_eq!(attrs["puppet"]["attributes"], "");

    let err = env.cm.resolve_attributes(&web_node("n-2")).unwrap_err();
    assert!(matches!(err, CmError::Unsupported { .. }));
}
