//! Keel apply: server-side apply and delete of multi-document YAML manifests
//! against a single cluster.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use anyhow::{anyhow, Context, Result};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use keel_core::ApplyOptions;
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info};

fn max_yaml_bytes() -> usize {
    std::env::var("KEEL_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000) // 1 MiB default
}

fn max_yaml_nodes() -> usize {
    std::env::var("KEEL_MAX_YAML_NODES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100_000)
}

fn field_manager() -> String {
    std::env::var("KEEL_FIELD_MANAGER").unwrap_or_else(|_| "keel".to_string())
}

fn json_node_budget_exceeded(v: &Json, max: usize) -> bool {
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur >= max { return; }
        *cur += 1;
        match v {
            Json::Object(map) => {
                for (_k, vv) in map.iter() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            Json::Array(arr) => {
                for vv in arr.iter() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count >= max
}

/// Where a single manifest document goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocTarget {
    pub gvk: GroupVersionKind,
    pub name: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub deleted: usize,
    /// Deletes of objects that were already gone.
    pub missing: usize,
}

/// Split a YAML stream into JSON documents, skipping empty ones.
pub fn parse_documents(yaml: &str) -> Result<Vec<Json>> {
    if yaml.len() > max_yaml_bytes() {
        return Err(anyhow!("YAML payload too large (>{} bytes)", max_yaml_bytes()));
    }
    let mut docs = Vec::new();
    for (i, de) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
        let val = serde_yaml::Value::deserialize(de).with_context(|| format!("parsing YAML document #{}", i))?;
        if val.is_null() { continue; }
        let json = serde_json::to_value(val).context("converting YAML to JSON")?;
        if json_node_budget_exceeded(&json, max_yaml_nodes()) {
            return Err(anyhow!("YAML document #{} too complex (>{} nodes)", i, max_yaml_nodes()));
        }
        docs.push(json);
    }
    Ok(docs)
}

/// Extract GVK, name and namespace from a document.
pub fn doc_target(json: &Json) -> Result<DocTarget> {
    let api_version_s = json.get("apiVersion").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("YAML missing apiVersion"))?.to_string();
    let kind_s = json.get("kind").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("YAML missing kind"))?.to_string();
    let (group, version) = if let Some((g, v)) = api_version_s.split_once('/') { (g.to_string(), v.to_string()) } else { (String::new(), api_version_s) };
    let meta = json.get("metadata");
    let name = meta.and_then(|m| m.get("name")).and_then(|v| v.as_str()).ok_or_else(|| anyhow!("YAML missing metadata.name"))?.to_string();
    let namespace = meta.and_then(|m| m.get("namespace")).and_then(|v| v.as_str()).map(|s| s.to_string());
    Ok(DocTarget { gvk: GroupVersionKind { group, version, kind: kind_s }, name, namespace })
}

fn resolve_api_resource(discovery: &Discovery, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}

fn set_namespace(v: &mut Json, ns: &str) {
    if let Some(root) = v.as_object_mut() {
        let meta = root.entry("metadata").or_insert(Json::Object(serde_json::Map::new()));
        if let Some(obj) = meta.as_object_mut() {
            obj.insert("namespace".into(), Json::String(ns.to_string()));
        }
    }
}

/// Bare `Namespace` object used to create a missing namespace.
pub fn namespace_object(ns: &str) -> Namespace {
    Namespace { metadata: ObjectMeta { name: Some(ns.to_string()), ..Default::default() }, ..Default::default() }
}

/// Server-side apply the namespace so namespaced documents have somewhere to
/// land. Existing namespaces are left as they are.
async fn ensure_namespace(client: &Client, ns: &str) -> Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    let pp = PatchParams::apply(&field_manager());
    api.patch(ns, &pp, &Patch::Apply(&namespace_object(ns)))
        .await
        .map_err(|e| anyhow!("creating namespace {}: {}", ns, e))?;
    debug!(ns = %ns, "namespace ensured");
    Ok(())
}

/// Apply or delete every document in `yaml`. Documents are processed in order
/// and the first failure stops the manifest.
pub async fn apply_manifest(client: &Client, yaml: &str, opts: &ApplyOptions) -> Result<ApplyReport> {
    let t0 = std::time::Instant::now();
    counter!("manifest_apply_attempts", 1u64);
    let docs = parse_documents(yaml)?;
    let discovery = Discovery::new(client.clone()).run().await.context("running API discovery")?;
    let mut report = ApplyReport::default();
    let mut ensured: BTreeSet<String> = BTreeSet::new();
    for mut doc in docs {
        let target = doc_target(&doc)?;
        let (ar, namespaced) = resolve_api_resource(&discovery, &target.gvk)?;
        let api: Api<DynamicObject> = if namespaced {
            let ns = target.namespace.clone().unwrap_or_else(|| opts.namespace.clone());
            if ns.is_empty() {
                return Err(anyhow!("namespace required for namespaced kind {}", target.gvk.kind));
            }
            set_namespace(&mut doc, &ns);
            if !opts.delete && ensured.insert(ns.clone()) {
                ensure_namespace(client, &ns).await?;
            }
            Api::namespaced_with(client.clone(), &ns, &ar)
        } else {
            Api::all_with(client.clone(), &ar)
        };

        if opts.delete {
            match api.delete(&target.name, &DeleteParams::default()).await {
                Ok(_) => report.deleted += 1,
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    debug!(kind = %target.gvk.kind, name = %target.name, "delete: object already gone");
                    report.missing += 1;
                }
                Err(e) => {
                    counter!("manifest_apply_err", 1u64);
                    return Err(anyhow!("deleting {} {}: {}", target.gvk.kind, target.name, e));
                }
            }
            continue;
        }

        let res = if opts.update {
            let pp = PatchParams::apply(&field_manager()).force();
            api.patch(&target.name, &pp, &Patch::Apply(&doc)).await.map(|_| ())
        } else {
            let obj: DynamicObject = serde_json::from_value(doc).context("decoding manifest object")?;
            api.create(&PostParams::default(), &obj).await.map(|_| ())
        };
        if let Err(e) = res {
            counter!("manifest_apply_err", 1u64);
            return Err(anyhow!("applying {} {}: {}", target.gvk.kind, target.name, e));
        }
        report.applied += 1;
    }
    histogram!("manifest_apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    counter!("manifest_apply_ok", 1u64);
    info!(applied = report.applied, deleted = report.deleted, missing = report.missing, took_ms = %t0.elapsed().as_millis(), "manifest applied");
    Ok(report)
}
