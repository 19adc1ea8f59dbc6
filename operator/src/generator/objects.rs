use k8s_openapi::{
    api::{
        core::v1::{
            Container, ContainerPort, EnvVar, Pod, PodSpec, Service, ServicePort, ServiceSpec,
            TypedLocalObjectReference,
        },
        networking::v1::{Ingress, IngressBackend, IngressSpec},
    },
    apimachinery::pkg::util::intstr::IntOrString,
    chrono::{DateTime, Utc},
};
use kube::api::ObjectMeta;

use crate::{
    generator::{CreationSpec, LoadGenerator, Phase, Resources},
    labels::instance_selector,
};

/// Ingress routing to the service of the same name.
pub fn ingress(metadata: ObjectMeta, name: &str) -> Ingress {
    Ingress {
        metadata,
        spec: Some(IngressSpec {
            default_backend: Some(IngressBackend {
                resource: Some(TypedLocalObjectReference {
                    kind: "Service".to_owned(),
                    name: name.to_owned(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Load balanced service exposing `port` of the generator's pod.
pub fn service(metadata: ObjectMeta, name: &str, port: i32) -> Service {
    Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_owned()),
            selector: Some(instance_selector(name)),
            ports: Some(vec![ServicePort {
                port,
                target_port: Some(IntOrString::Int(port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod running the caller's image once, with merged resources.
pub fn pod(
    metadata: ObjectMeta,
    name: &str,
    spec: CreationSpec,
    resources: Resources,
    port: i32,
) -> Pod {
    let env = spec
        .env
        .into_iter()
        .map(|var| EnvVar {
            name: var.name,
            value: Some(var.value),
            ..Default::default()
        })
        .collect();

    Pod {
        metadata,
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_owned()),
            containers: vec![Container {
                name: name.to_owned(),
                image: Some(spec.image),
                image_pull_policy: Some("Always".to_owned()),
                env: Some(env),
                command: (!spec.commands.is_empty()).then_some(spec.commands),
                resources: Some(resources.into()),
                ports: Some(vec![ContainerPort {
                    container_port: port,
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn phase(pod: &Pod) -> Phase {
    Phase::from(
        pod.status
            .as_ref()
            .and_then(|status| status.phase.as_deref()),
    )
}

pub fn created_at(pod: &Pod) -> Option<DateTime<Utc>> {
    pod.metadata.creation_timestamp.as_ref().map(|time| time.0)
}

/// First port declared by the pod's first container.
pub fn container_port(pod: &Pod) -> Option<i32> {
    pod.spec
        .as_ref()?
        .containers
        .first()?
        .ports
        .as_ref()?
        .first()
        .map(|port| port.container_port)
}

pub fn cluster_ip(service: &Service) -> Option<String> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.cluster_ip.clone())
        .filter(|ip| !ip.is_empty())
}

/// Address assigned by the load balancer, preferring an IP over a hostname.
pub fn external_ip(service: &Service) -> Option<String> {
    let ingress = service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .first()?;
    ingress
        .ip
        .clone()
        .or_else(|| ingress.hostname.clone())
        .filter(|address| !address.is_empty())
}

/// Combine a pod with its service, if any, into the read model.
pub fn load_generator(pod: &Pod, service: Option<&Service>) -> LoadGenerator {
    LoadGenerator {
        name: pod.metadata.name.clone().unwrap_or_default(),
        cluster_ip: service.and_then(cluster_ip),
        external_ip: service.and_then(external_ip),
        port: container_port(pod),
        status: phase(pod),
        created_at: created_at(pod),
    }
}
