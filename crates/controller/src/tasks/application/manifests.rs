/*
 * 5D Labs Deployment Platform - Controller Service
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Typed views over the embedded `{metadata, spec}` workload manifests

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Service, ServiceSpec};
use k8s_openapi::api::networking::v1::{Ingress, IngressSpec};
use kube::api::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::tasks::types::{Error, Result};

/// The two fields callers are allowed to set; `apiVersion`/`kind` are ignored.
#[derive(Deserialize)]
#[serde(bound(deserialize = "S: Deserialize<'de>"))]
struct Manifest<S> {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: Option<S>,
}

fn parse<S: DeserializeOwned>(
    kind: &'static str,
    manifest: &Value,
    default_name: &str,
    namespace: &str,
) -> Result<(ObjectMeta, Option<S>)> {
    let source = if manifest.is_null() {
        json!({})
    } else {
        manifest.clone()
    };

    let Manifest { mut metadata, spec } = serde_json::from_value::<Manifest<S>>(source)
        .map_err(|source| Error::InvalidManifest { kind, source })?;

    if metadata.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
        metadata.name = Some(default_name.to_string());
    }
    metadata.namespace = Some(namespace.to_string());
    // Server-owned fields would make create/replace fail.
    metadata.resource_version = None;
    metadata.uid = None;
    metadata.owner_references = None;

    Ok((metadata, spec))
}

pub fn parse_deployment(manifest: &Value, default_name: &str, namespace: &str) -> Result<Deployment> {
    let (metadata, spec) = parse::<DeploymentSpec>("Deployment", manifest, default_name, namespace)?;
    Ok(Deployment {
        metadata,
        spec,
        status: None,
    })
}

pub fn parse_service(manifest: &Value, default_name: &str, namespace: &str) -> Result<Service> {
    let (metadata, spec) = parse::<ServiceSpec>("Service", manifest, default_name, namespace)?;
    Ok(Service {
        metadata,
        spec,
        status: None,
    })
}

pub fn parse_ingress(manifest: &Value, default_name: &str, namespace: &str) -> Result<Ingress> {
    let (metadata, spec) = parse::<IngressSpec>("Ingress", manifest, default_name, namespace)?;
    Ok(Ingress {
        metadata,
        spec,
        status: None,
    })
}

/// Point the pod template's `imagePullSecrets` at exactly `secret_name`.
///
/// Missing intermediate objects are created. An empty name removes the list.
pub fn rewrite_image_pull_secrets(manifest: &mut Value, secret_name: &str) -> Result<()> {
    if manifest.is_null() {
        *manifest = Value::Object(Map::new());
    }

    let mut node = manifest;
    for key in ["spec", "template", "spec"] {
        let object = node.as_object_mut().ok_or_else(|| {
            Error::InvalidInput(format!(
                "deployment manifest: expected an object above '{key}'"
            ))
        })?;
        node = object
            .entry(key)
            .or_insert_with(|| Value::Object(Map::new()));
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
    }

    let pod_spec = node.as_object_mut().ok_or_else(|| {
        Error::InvalidInput("deployment manifest: spec.template.spec is not an object".to_string())
    })?;

    if secret_name.is_empty() {
        pod_spec.remove("imagePullSecrets");
    } else {
        pod_spec.insert(
            "imagePullSecrets".to_string(),
            json!([{ "name": secret_name }]),
        );
    }
    Ok(())
}
