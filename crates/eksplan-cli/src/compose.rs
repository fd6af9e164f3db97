//! Compose every configured component into one deployment
//!
//! Components planned in the same pass are wired together directly: Karpenter
//! and IRSA roles for the planned cluster use its handle instead of a lookup,
//! and the builder mounts certificates from the certificate component.

use tracing::{debug, info};

use eksplan_buildkit::{compose_buildkit_builder, compose_buildkit_certs};
use eksplan_cluster::{compose_cluster, compose_irsa_role, compose_irsa_role_for, ClusterHandle};
use eksplan_common::{CloudLookup, Deployment};
use eksplan_karpenter::{compose_karpenter, compose_karpenter_for};

use crate::config::DeploymentConfig;
use crate::Result;

/// Compose the deployment described by `config`
pub fn compose(config: &DeploymentConfig) -> Result<Deployment> {
    let lookup = &config.environment;
    let env = lookup.environment()?;
    let mut deployment = Deployment::new();

    let mut cluster: Option<PlannedCluster> = None;
    if let Some(section) = &config.cluster {
        let plan = compose_cluster(&section.name, &section.args, lookup)?;
        cluster = Some(PlannedCluster {
            component: section.name.clone(),
            handle: plan.handle,
        });
        deployment.push(plan.component);
    }

    if let Some(section) = &config.karpenter {
        let plan = match planned_target(cluster.as_ref(), &section.args.cluster_name) {
            Some(target) => {
                debug!(component = %section.name, "karpenter targets the planned cluster");
                compose_karpenter_for(&section.name, &section.args, &target.handle, &env)?
            }
            None => compose_karpenter(&section.name, &section.args, lookup)?,
        };
        deployment.push(plan.component);
    }

    for section in &config.irsa_roles {
        let plan = match planned_target(cluster.as_ref(), &section.args.cluster_name) {
            Some(target) => {
                compose_irsa_role_for(&section.name, &section.args, &target.handle, &env)?
            }
            None => compose_irsa_role(&section.name, &section.args, lookup)?,
        };
        deployment.push(plan.component);
    }

    let mut server_tls = None;
    if let Some(section) = &config.buildkit_certs {
        let plan = compose_buildkit_certs(&section.name, &section.args)?;
        server_tls = Some(plan.server_tls());
        deployment.push(plan.component);
    }

    if let Some(section) = &config.buildkit_builder {
        let plan = compose_buildkit_builder(&section.name, &section.args, server_tls)?;
        deployment.push(plan.component);
    }

    deployment.validate()?;
    info!(
        components = deployment.components.len(),
        resources = deployment.resources().count(),
        "composed deployment"
    );
    Ok(deployment)
}

/// A cluster planned in this pass
struct PlannedCluster {
    component: String,
    handle: ClusterHandle,
}

/// The planned cluster, when a component refers to it
///
/// An empty cluster name means the planned cluster.
fn planned_target<'a>(
    cluster: Option<&'a PlannedCluster>,
    cluster_name: &str,
) -> Option<&'a PlannedCluster> {
    cluster.filter(|planned| {
        cluster_name.is_empty()
            || planned.handle.name.as_str() == cluster_name
            || planned.component == cluster_name
    })
}
