//! HorizontalPodAutoscaler (autoscaling/v2) builder.

use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
    MetricSpec, MetricTarget, ResourceMetricSource,
};
use kube::api::ObjectMeta;

use crate::errors::Result;
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::resource::{Readiness, Resource};

impl Readiness for HorizontalPodAutoscaler {
    fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .map(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "AbleToScale" && c.status == "True")
            })
            .unwrap_or(false)
    }
}

/// Uncommitted HPA scaling a deployment on CPU utilisation
pub fn hpa(
    cluster: &ClusterClient,
    name: &str,
    deployment: &str,
    min_replicas: i32,
    max_replicas: i32,
    cpu_utilization: i32,
) -> Resource<HorizontalPodAutoscaler> {
    Resource::new(
        cluster,
        HorizontalPodAutoscaler {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(HorizontalPodAutoscalerSpec {
                scale_target_ref: CrossVersionObjectReference {
                    api_version: Some("apps/v1".to_string()),
                    kind: "Deployment".to_string(),
                    name: deployment.to_string(),
                },
                min_replicas: Some(min_replicas),
                max_replicas,
                metrics: Some(vec![MetricSpec {
                    type_: "Resource".to_string(),
                    resource: Some(ResourceMetricSource {
                        name: "cpu".to_string(),
                        target: MetricTarget {
                            type_: "Utilization".to_string(),
                            average_utilization: Some(cpu_utilization),
                            ..MetricTarget::default()
                        },
                    }),
                    ..MetricSpec::default()
                }]),
                ..HorizontalPodAutoscalerSpec::default()
            }),
            ..HorizontalPodAutoscaler::default()
        },
    )
}

impl Resource<HorizontalPodAutoscaler> {
    pub async fn current_replicas(&self) -> Option<i32> {
        self.read(|h| h.status.as_ref().and_then(|s| s.current_replicas))
            .await
    }

    pub async fn set_max_replicas(&self, max_replicas: i32) -> Result<()> {
        self.modify(|h| {
            if let Some(spec) = h.spec.as_mut() {
                spec.max_replicas = max_replicas;
            }
        })
        .await
    }
}
