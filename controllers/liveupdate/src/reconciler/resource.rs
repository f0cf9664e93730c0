//! Uniform read view over the two selector families.
//!
//! The reconciler doesn't care whether containers come from Kubernetes
//! discovery or a Compose service; it needs two operations: walk the
//! selected containers, and find the newest known build start for
//! garbage collection.

use apis::{
    Container, DockerComposeService, ImageMap, KubernetesApplyStatus, KubernetesDiscovery, Pod,
    POD_PHASE_RUNNING,
};
use chrono::{DateTime, Utc};

#[derive(Debug)]
pub(crate) enum LuResource {
    Kubernetes {
        discovery: KubernetesDiscovery,
        apply_status: Option<KubernetesApplyStatus>,
        image_map: Option<ImageMap>,
    },
    DockerCompose {
        service: DockerComposeService,
    },
}

impl LuResource {
    /// Invoke `visit` for each container matching the spec's image
    /// filter; stop early when `visit` returns true.
    pub fn visit_selected_containers(&self, mut visit: impl FnMut(&Pod, &Container) -> bool) {
        match self {
            LuResource::Kubernetes {
                discovery,
                image_map,
                ..
            } => {
                let Some(status) = &discovery.status else {
                    return;
                };
                for pod in &status.pods {
                    for container in &pod.containers {
                        if !image_selects(image_map.as_ref(), container) {
                            continue;
                        }
                        if visit(pod, container) {
                            return;
                        }
                    }
                }
            }
            LuResource::DockerCompose { service } => {
                let Some(status) = &service.status else {
                    return;
                };
                let container = Container {
                    name: status.container_name.clone(),
                    id: status.container_id.clone(),
                    image: String::new(),
                    ready: status
                        .container_state
                        .as_ref()
                        .is_some_and(|state| state.running.is_some()),
                    state: status.container_state.clone().unwrap_or_default(),
                };
                // Compose has no pod; synthesize one so callers see a
                // uniform shape.
                let pod = Pod {
                    phase: POD_PHASE_RUNNING.to_string(),
                    ..Default::default()
                };
                visit(&pod, &container);
            }
        }
    }

    /// Newest known build start, used as the GC watermark when a source
    /// has no image build time of its own. Preference order: image map
    /// build start, apply start, oldest selected pod.
    pub fn best_start_time(&self) -> Option<DateTime<Utc>> {
        match self {
            LuResource::Kubernetes {
                image_map,
                apply_status,
                ..
            } => {
                if let Some(time) = image_map
                    .as_ref()
                    .and_then(|im| im.status.as_ref())
                    .and_then(|status| status.build_start_time)
                {
                    return Some(time);
                }
                if let Some(time) = apply_status
                    .as_ref()
                    .and_then(|status| status.last_apply_start_time)
                {
                    return Some(time);
                }
                let mut oldest: Option<DateTime<Utc>> = None;
                self.visit_selected_containers(|pod, _| {
                    if let Some(created) = pod.created_at {
                        if oldest.map_or(true, |current| created < current) {
                            oldest = Some(created);
                        }
                    }
                    false
                });
                oldest
            }
            LuResource::DockerCompose { service } => {
                let status = service.status.as_ref()?;
                status.start_time.or_else(|| {
                    status
                        .container_state
                        .as_ref()
                        .and_then(|state| state.running.as_ref())
                        .and_then(|running| running.started_at)
                })
            }
        }
    }
}

/// With no image map every container is selected; otherwise the
/// container's image must name the same repository as the map's built
/// image.
fn image_selects(image_map: Option<&ImageMap>, container: &Container) -> bool {
    let Some(image) = image_map
        .and_then(|im| im.status.as_ref())
        .map(|status| status.image.as_str())
        .filter(|image| !image.is_empty())
    else {
        return true;
    };
    image_repository(&container.image) == image_repository(image)
}

/// Strip the tag/digest off an image reference, leaving the repository.
fn image_repository(image: &str) -> &str {
    let image = image.split('@').next().unwrap_or(image);
    match image.rsplit_once(':') {
        Some((repository, tag)) if !tag.contains('/') => repository,
        _ => image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_repository_strips_tag_and_digest() {
        assert_eq!(image_repository("gcr.io/app/api:v2"), "gcr.io/app/api");
        assert_eq!(
            image_repository("gcr.io/app/api@sha256:abcd"),
            "gcr.io/app/api"
        );
        assert_eq!(image_repository("localhost:5000/api"), "localhost:5000/api");
        assert_eq!(
            image_repository("localhost:5000/api:v2"),
            "localhost:5000/api"
        );
    }
}
