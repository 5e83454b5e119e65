#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod ingress;
pub mod labels;
mod resource_id;

pub use self::{
    ingress::IngressClass,
    labels::{Labels, Selector},
    resource_id::{InvalidResourceId, ResourceId},
};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{
            ConfigMap, Container, ContainerPort, EndpointAddress, EndpointPort, EndpointSubset,
            Endpoints, Node, NodeAddress, NodeStatus, Pod, PodSpec, Secret, Service, ServicePort,
            ServiceSpec,
        },
        networking::v1::{
            HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend,
            IngressLoadBalancerIngress, IngressLoadBalancerStatus, IngressRule,
            IngressServiceBackend, IngressSpec, IngressStatus, IngressTLS, ServiceBackendPort,
        },
    },
    apimachinery::pkg::util::intstr::IntOrString,
    ByteString,
};
pub use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, ResourceExt},
    Client, Error, Resource,
};
