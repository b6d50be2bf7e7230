use super::*;
use kubert::index::IndexNamespacedResource;
use policy_agent_core::{ipcache::Identity, Source};

const HOST_IP: &str = "192.168.0.1";

fn mk_pod(
    ns: &str,
    name: &str,
    labels: impl IntoIterator<Item = (&'static str, &'static str)>,
    ip: Option<&str>,
) -> k8s::Pod {
    k8s::Pod {
        metadata: mk_meta(Some(ns), name, labels),
        status: Some(k8s::PodStatus {
            pod_ip: ip.map(Into::into),
            host_ip: Some(HOST_IP.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mk_namespace(
    name: &str,
    labels: impl IntoIterator<Item = (&'static str, &'static str)>,
) -> k8s::Namespace {
    k8s::Namespace {
        metadata: mk_meta(None, name, labels),
        ..Default::default()
    }
}

fn k8s_identity(id: NumericIdentity) -> Identity {
    Identity {
        id,
        source: Source::Kubernetes,
    }
}

#[test]
fn pod_without_ip_is_not_applicable() {
    let test = TestConfig::default();
    let pod = mk_pod("bar", "foo", Some(("app", "web")), None);
    assert!(test.index.read().missing(vec![pod]).is_empty());
}

#[test]
fn pod_without_cache_entry_needs_work() {
    let test = TestConfig::default();
    let pod = mk_pod("bar", "foo", Some(("app", "web")), Some("10.0.0.1"));
    assert_eq!(test.index.read().missing(vec![pod]).len(), 1);
}

#[test]
fn pod_without_endpoint_is_not_applicable() {
    let test = TestConfig::default();
    test.stores.ipcache.upsert(
        "10.0.0.1".parse().unwrap(),
        None,
        k8s_identity(NumericIdentity::INIT),
    );
    let pod = mk_pod("bar", "foo", Some(("app", "web")), Some("10.0.0.1"));
    assert!(test.index.read().missing(vec![pod]).is_empty());
}

#[test]
fn pod_with_stale_labels_needs_work() {
    let test = TestConfig::default();
    test.stores.ipcache.upsert(
        "10.0.0.1".parse().unwrap(),
        None,
        k8s_identity(NumericIdentity(1001)),
    );
    test.stores
        .endpoints
        .insert(mk_endpoint(1, "bar", "foo", &["k8s:app=db"]));

    let stale = mk_pod("bar", "foo", Some(("app", "web")), Some("10.0.0.1"));
    assert_eq!(test.index.read().missing(vec![stale]).len(), 1);

    let current = mk_pod("bar", "foo", Some(("app", "db")), Some("10.0.0.1"));
    assert!(test.index.read().missing(vec![current]).is_empty());
}

#[test]
fn apply_updates_endpoint_and_cache() {
    let test = TestConfig::default();
    test.stores
        .endpoints
        .insert(mk_endpoint(1, "bar", "foo", &["k8s:app=db"]));

    let pod = mk_pod("bar", "foo", [("app", "web"), ("tier", "1")], Some("10.0.0.1"));
    test.index.write().apply(pod.clone());

    assert_eq!(
        test.stores
            .endpoints
            .get(1)
            .unwrap()
            .labels
            .orchestration_identity,
        mk_labels(&["k8s:app=web", "k8s:tier=1"])
    );
    let entry = test
        .stores
        .ipcache
        .lookup_by_ip(&"10.0.0.1".parse().unwrap())
        .unwrap();
    assert_eq!(entry.identity, k8s_identity(NumericIdentity(1001)));
    assert_eq!(entry.host_ip, HOST_IP.parse().ok());

    assert!(test.index.read().missing(vec![pod]).is_empty());
}

#[test]
fn unmanaged_pod_gets_init_identity() {
    let test = TestConfig::default();
    test.index
        .write()
        .apply(mk_pod("bar", "foo", None, Some("10.0.0.2")));

    let entry = test
        .stores
        .ipcache
        .lookup_by_ip(&"10.0.0.2".parse().unwrap())
        .unwrap();
    assert_eq!(entry.identity, k8s_identity(NumericIdentity::INIT));
}

#[test]
fn namespace_labels_are_kept_until_known() {
    let test = TestConfig::default();
    test.stores.endpoints.insert(mk_endpoint(
        1,
        "bar",
        "foo",
        &["k8s:app=db", "k8s:io.cilium.k8s.namespace.labels.team=a"],
    ));

    test.index
        .write()
        .apply(mk_pod("bar", "foo", Some(("app", "web")), Some("10.0.0.1")));
    assert_eq!(
        test.stores
            .endpoints
            .get(1)
            .unwrap()
            .labels
            .orchestration_identity,
        mk_labels(&["k8s:app=web", "k8s:io.cilium.k8s.namespace.labels.team=a"])
    );

    // Once the namespace is known, its labels must match too.
    <Index as kubert::index::IndexClusterResource<_>>::apply(
        &mut test.index.write(),
        mk_namespace("bar", Some(("team", "b"))),
    );
    let pod = mk_pod("bar", "foo", Some(("app", "web")), Some("10.0.0.1"));
    assert!(test.index.read().missing(vec![pod.clone()]).is_empty());
    assert_eq!(
        test.stores
            .endpoints
            .get(1)
            .unwrap()
            .labels
            .orchestration_identity,
        mk_labels(&["k8s:app=web", "k8s:io.cilium.k8s.namespace.labels.team=b"])
    );

    test.stores
        .endpoints
        .update_labels(1, |_| mk_labels(&["k8s:app=web"]));
    assert_eq!(test.index.read().missing(vec![pod]).len(), 1);
}

#[test]
fn delete_removes_cache_entry() {
    let test = TestConfig::default();
    test.index
        .write()
        .apply(mk_pod("bar", "foo", None, Some("10.0.0.1")));
    assert_eq!(test.stores.ipcache.len(), 1);

    <Index as IndexNamespacedResource<k8s::Pod>>::delete(
        &mut test.index.write(),
        "bar".to_string(),
        "foo".to_string(),
    );
    assert!(test.stores.ipcache.is_empty());
}

#[test]
fn changed_ip_replaces_cache_entry() {
    let test = TestConfig::default();
    test.index
        .write()
        .apply(mk_pod("bar", "foo", None, Some("10.0.0.1")));
    test.index
        .write()
        .apply(mk_pod("bar", "foo", None, Some("10.0.0.9")));

    assert!(test
        .stores
        .ipcache
        .lookup_by_ip(&"10.0.0.1".parse().unwrap())
        .is_none());
    assert!(test
        .stores
        .ipcache
        .lookup_by_ip(&"10.0.0.9".parse().unwrap())
        .is_some());
}

#[test]
fn reset_only_touches_unreflected_pods() {
    let test = TestConfig::default();
    test.stores
        .endpoints
        .insert(mk_endpoint(1, "bar", "foo", &["k8s:app=web"]));
    test.stores
        .endpoints
        .insert(mk_endpoint(2, "bar", "baz", &["k8s:app=old"]));
    test.stores.ipcache.upsert(
        "10.0.0.1".parse().unwrap(),
        None,
        k8s_identity(NumericIdentity(1001)),
    );

    test.index.write().reset(
        vec![
            mk_pod("bar", "foo", Some(("app", "web")), Some("10.0.0.1")),
            mk_pod("bar", "baz", Some(("app", "new")), Some("10.0.0.2")),
        ],
        Default::default(),
    );

    // The reflected pod's entry keeps its host-less form.
    let entry = test
        .stores
        .ipcache
        .lookup_by_ip(&"10.0.0.1".parse().unwrap())
        .unwrap();
    assert_eq!(entry.host_ip, None);
    assert_eq!(
        test.stores
            .endpoints
            .get(2)
            .unwrap()
            .labels
            .orchestration_identity,
        mk_labels(&["k8s:app=new"])
    );
}
