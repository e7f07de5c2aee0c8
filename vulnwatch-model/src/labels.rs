//! Label and annotation keys written by the operator. Stored objects carry
//! all of the correlation state; nothing is kept in process between
//! reconciliations.

/// Kind of the workload a scan job or report is attributed to.
pub const LABEL_RESOURCE_KIND: &str = "vulnwatch.resource.kind";
/// Name of the workload a scan job or report is attributed to.
pub const LABEL_RESOURCE_NAME: &str = "vulnwatch.resource.name";
/// Namespace of the workload a scan job or report is attributed to.
pub const LABEL_RESOURCE_NAMESPACE: &str = "vulnwatch.resource.namespace";
/// Container a vulnerability report was produced for.
pub const LABEL_CONTAINER_NAME: &str = "vulnwatch.container.name";

/// Serialized [`crate::ContainerImages`] carried by a scan job.
pub const ANNOTATION_CONTAINER_IMAGES: &str = "vulnwatch.container.images";
/// Image digest a vulnerability report was produced for.
pub const ANNOTATION_IMAGE_HASH: &str = "vulnwatch.container.imagehash";

pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_OPERATOR: &str = "vulnwatch-operator";

/// Selector labels the job controller stamps on pods it creates. The
/// unprefixed key is what older clusters use.
pub const LABEL_CONTROLLER_UID: &str = "controller-uid";
pub const LABEL_BATCH_CONTROLLER_UID: &str = "batch.kubernetes.io/controller-uid";
