//! Derives the owning workload and its container images from pods and scan
//! jobs.

use k8s_openapi::api::{
    batch::v1::Job,
    core::v1::{Pod, PodStatus},
};
use vulnwatch_model::{
    ContainerImages, WorkloadKind, WorkloadRef, labels::ANNOTATION_CONTAINER_IMAGES,
};

use crate::error::{Result, ScanError};

/// Immediate owner of `pod`: its controller when it has one (a Deployment's
/// pod resolves to the active ReplicaSet), otherwise the pod itself.
pub fn resolve_owner(pod: &Pod) -> WorkloadRef {
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let controller = pod
        .metadata
        .owner_references
        .iter()
        .flatten()
        .find(|owner| owner.controller == Some(true));

    match controller {
        Some(owner) => WorkloadRef::new(
            owner.kind.as_str(),
            namespace,
            owner.name.clone(),
        ),
        None => WorkloadRef::new(
            WorkloadKind::Pod,
            namespace,
            pod.metadata.name.clone().unwrap_or_default(),
        ),
    }
}

/// Container name to image digest, read from resolved image IDs. Empty
/// until the kubelet reports container statuses.
pub fn images_from_status(status: Option<&PodStatus>) -> ContainerImages {
    status
        .and_then(|status| status.container_statuses.as_ref())
        .into_iter()
        .flatten()
        .map(|container| (container.name.clone(), digest_of(&container.image_id)))
        .collect()
}

/// Images recorded on a scan job when it was created.
pub fn images_from_job(job: &Job) -> Result<ContainerImages> {
    let raw = job
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(ANNOTATION_CONTAINER_IMAGES))
        .ok_or_else(|| {
            ScanError::MissingAnnotation(ANNOTATION_CONTAINER_IMAGES.to_string())
        })?;

    ContainerImages::from_json(raw).map_err(|err| {
        ScanError::MalformedData(format!(
            "parsing job annotation {ANNOTATION_CONTAINER_IMAGES}: {err}"
        ))
    })
}

/// Owner triple recorded on a scan job's labels.
pub fn owner_from_job(job: &Job) -> Result<WorkloadRef> {
    let labels = job.metadata.labels.clone().unwrap_or_default();
    Ok(WorkloadRef::from_labels(&labels)?)
}

/// Digest portion of an image ID (`docker-pullable://repo@sha256:abc` -> `abc`).
fn digest_of(image_id: &str) -> String {
    image_id
        .rsplit(':')
        .next()
        .unwrap_or(image_id)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ContainerStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use std::collections::BTreeMap;

    fn pod_with_owner(owner: Option<OwnerReference>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("app-7".into()),
                namespace: Some("ns".into()),
                owner_references: owner.map(|owner| vec![owner]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn controlled_pod_resolves_to_controller() {
        let pod = pod_with_owner(Some(OwnerReference {
            api_version: "apps/v1".into(),
            kind: "ReplicaSet".into(),
            name: "app-rs".into(),
            uid: "uid-1".into(),
            controller: Some(true),
            ..Default::default()
        }));
        assert_eq!(
            resolve_owner(&pod),
            WorkloadRef::new(WorkloadKind::ReplicaSet, "ns", "app-rs")
        );
    }

    #[test]
    fn non_controller_owner_is_ignored() {
        let pod = pod_with_owner(Some(OwnerReference {
            kind: "ReplicaSet".into(),
            name: "app-rs".into(),
            controller: None,
            ..Default::default()
        }));
        assert_eq!(
            resolve_owner(&pod),
            WorkloadRef::new(WorkloadKind::Pod, "ns", "app-7")
        );
    }

    #[test]
    fn digest_is_taken_after_last_colon() {
        let status = PodStatus {
            container_statuses: Some(vec![ContainerStatus {
                name: "web".into(),
                image: "nginx:1.25".into(),
                image_id: "docker-pullable://nginx@sha256:aaa".into(),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let images = images_from_status(Some(&status));
        assert_eq!(images.get("web").map(String::as_str), Some("aaa"));
    }

    #[test]
    fn no_statuses_means_no_images() {
        assert!(images_from_status(None).is_empty());
        assert!(images_from_status(Some(&PodStatus::default())).is_empty());
    }

    #[test]
    fn job_annotation_errors_are_distinguished() {
        let mut job = Job::default();
        assert!(matches!(
            images_from_job(&job),
            Err(ScanError::MissingAnnotation(_))
        ));

        job.metadata.annotations = Some(BTreeMap::from([(
            ANNOTATION_CONTAINER_IMAGES.to_string(),
            "{not json".to_string(),
        )]));
        assert!(matches!(
            images_from_job(&job),
            Err(ScanError::MalformedData(_))
        ));
    }
}
