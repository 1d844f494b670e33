#![forbid(unsafe_code)]

use std::sync::Arc;

use keel_core::{Component, Configuration, ConfiguredComponent, KeelError, Trait, API_VERSION_ANNOTATION, KIND_ANNOTATION};
use keel_ops::mock::{MockFactory, MockInstaller, MockManifests, RecordingSink};
use keel_ops::{Adapter, Catalog};

struct Rig {
    adapter: Adapter,
    factory: MockFactory,
    installer: Arc<MockInstaller>,
    sink: Arc<RecordingSink>,
}

fn rig(factory: MockFactory) -> Rig {
    let installer = Arc::new(MockInstaller::new());
    let sink = Arc::new(RecordingSink::new());
    let adapter = Adapter::new(
        Catalog::default(),
        Arc::new(factory.clone()),
        installer.clone(),
        Arc::new(MockManifests::new()),
        sink.clone(),
    );
    Rig { adapter, factory, installer, sink }
}

fn generic(name: &str, api_version: Option<&str>, kind: Option<&str>) -> Component {
    let mut c = Component { name: name.into(), namespace: "default".into(), ..Default::default() };
    c.spec.component_type = "Generic".into();
    if let Some(av) = api_version { c.annotations.insert(API_VERSION_ANNOTATION.into(), av.into()); }
    if let Some(k) = kind { c.annotations.insert(KIND_ANNOTATION.into(), k.into()); }
    c
}

fn mesh(version: &str) -> Component {
    let mut c = Component { name: "consul".into(), namespace: "consul".into(), ..Default::default() };
    c.spec.component_type = "ConsulMesh".into();
    c.spec.version = version.into();
    c
}

fn targets(n: usize) -> Vec<String> { (0..n).map(|i| format!("cluster-{}", i)).collect() }

#[tokio::test]
async fn redis_pod_is_created_on_one_target() {
    let r = rig(MockFactory::new());
    let res = r.adapter.handle_components(&[generic("redis", Some("v1"), Some("Pod"))], false, &targets(1)).await;
    assert!(res.error.is_none(), "{:?}", res.error);
    assert_eq!(res.message, "created Pod \"redis\" in namespace \"default\"");

    let applied = r.factory.applied();
    assert_eq!(applied.len(), 1);
    assert!(applied[0].opts.update);
    assert!(!applied[0].opts.delete);
    assert!(applied[0].manifest.contains("kind: Pod"));

    let infos = r.sink.infos();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].summary, "Generic deployed successfully");
    assert_eq!(infos[0].details, "The Generic is now deployed.");
    assert!(r.sink.failures().is_empty());
}

#[tokio::test]
async fn delete_uses_removal_wording() {
    let r = rig(MockFactory::new());
    let res = r.adapter.handle_components(&[generic("redis", Some("v1"), Some("Pod"))], true, &targets(2)).await;
    assert_eq!(res.message, "deleted Pod config \"redis\" in namespace \"default\"");
    assert!(r.factory.applied().iter().all(|a| a.opts.delete));
    assert_eq!(r.sink.infos()[0].summary, "Generic removed successfully");
}

#[tokio::test]
async fn unresolvable_component_does_not_stop_the_loop() {
    let r = rig(MockFactory::new());
    let comps = vec![generic("broken", None, None), generic("web", Some("v1"), Some("Service"))];
    let res = r.adapter.handle_components(&comps, false, &targets(1)).await;

    let err = res.error.expect("aggregate failure");
    assert_eq!(err.to_string(), "failed to get API Version for: broken");
    assert_eq!(res.message, "created Service \"web\" in namespace \"default\"");
    assert_eq!(r.factory.applied().len(), 1);

    let failures = r.sink.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].summary, "Error while deploying Generic");
    assert!(failures[0].probable_cause.is_some());
    assert_eq!(r.sink.infos().len(), 1);
}

#[tokio::test]
async fn success_events_follow_component_order() {
    let r = rig(MockFactory::new());
    let comps = vec![
        generic("a", Some("v1"), Some("ConfigMap")),
        generic("b", None, Some("ConfigMap")),
        mesh("1.9.1"),
        generic("c", Some("v1"), Some("Secret")),
    ];
    let res = r.adapter.handle_components(&comps, false, &targets(1)).await;

    let lines: Vec<&str> = res.message.lines().collect();
    assert_eq!(
        lines,
        vec![
            "created ConfigMap \"a\" in namespace \"default\"",
            "consul: deployed",
            "created Secret \"c\" in namespace \"default\"",
        ]
    );
    let events = r.sink.events();
    assert_eq!(events.len(), comps.len());
    assert_eq!(r.sink.infos().len(), 3);
    assert_eq!(r.sink.failures().len(), 1);
    assert_eq!(events[2].summary, "consul ConsulMesh deployed successfully");
    assert_eq!(events[2].details, "The consul ConsulMesh is now deployed.");
    // every component event gets its own operation id
    let mut ids: Vec<_> = events.iter().map(|e| e.operation_id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
}

#[tokio::test]
async fn mesh_component_goes_to_installer_only() {
    let r = rig(MockFactory::new());
    let res = r.adapter.handle_components(&[mesh("1.9.1")], true, &targets(3)).await;
    assert!(res.error.is_none());
    assert_eq!(res.message, "consul: removed");
    let calls = r.installer.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].delete);
    assert_eq!(calls[0].targets, 3);
    assert_eq!(r.factory.connects(), 0);
}

#[tokio::test]
async fn one_bad_target_leaves_the_rest_applied() {
    let r = rig(MockFactory::new().fail_apply("cluster-1"));
    let res = r.adapter.handle_components(&[generic("redis", Some("v1"), Some("Pod"))], false, &targets(4)).await;
    assert_eq!(r.factory.applied().len(), 3);
    // a failed component contributes no success message
    assert_eq!(res.message, "");
    assert_eq!(r.sink.failures().len(), 1);
    assert!(r.sink.infos().is_empty());
    let err = res.error.expect("failure");
    assert!(err.to_string().contains("target #1: failed to apply manifest"), "{}", err);
}

#[tokio::test]
async fn client_construction_failures_are_merged() {
    let r = rig(MockFactory::new().fail_connect("cluster-0").fail_connect("cluster-2"));
    let res = r.adapter.handle_components(&[generic("redis", Some("v1"), Some("Pod"))], false, &targets(3)).await;
    assert_eq!(r.factory.applied().len(), 1);
    let text = res.error.expect("failure").to_string();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("target #0: failed to construct client"));
    assert!(lines[1].starts_with("target #2: failed to construct client"));
}

#[tokio::test]
async fn no_targets_still_succeeds() {
    let r = rig(MockFactory::new());
    let res = r.adapter.handle_components(&[generic("redis", Some("v1"), Some("Pod"))], false, &[]).await;
    assert!(res.error.is_none());
    assert_eq!(r.factory.connects(), 0);
}

#[tokio::test]
async fn mesh_without_version_fails_that_component() {
    let r = rig(MockFactory::new());
    let res = r.adapter.handle_components(&[mesh("")], false, &targets(1)).await;
    assert!(matches!(res.error, Some(KeelError::Aggregate(ref t)) if t.contains("empty version")));
    assert_eq!(res.message, "");
    assert!(r.installer.calls().is_empty());
}

#[test]
fn traits_are_only_recorded() {
    let r = rig(MockFactory::new());
    let config = Configuration {
        components: vec![
            ConfiguredComponent {
                component_name: "web".into(),
                traits: vec![Trait { name: "mTLS".into(), ..Default::default() }, Trait { name: "retries".into(), ..Default::default() }],
            },
            ConfiguredComponent { component_name: "db".into(), traits: vec![] },
            ConfiguredComponent { component_name: "cache".into(), traits: vec![Trait { name: "mTLS".into(), ..Default::default() }] },
        ],
    };
    let res = r.adapter.handle_application_configuration(&config);
    assert!(res.error.is_none());
    assert_eq!(
        res.message,
        "applied trait \"mTLS\" on service \"web\"\napplied trait \"retries\" on service \"web\"\napplied trait \"mTLS\" on service \"cache\""
    );
    assert!(r.sink.events().is_empty());
    assert_eq!(r.factory.connects(), 0);
}
