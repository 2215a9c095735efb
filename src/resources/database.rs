//! Manifests for the MySQL database backing a model registry.
//!
//! One Secret (credentials), one PersistentVolumeClaim (data directory),
//! one single-replica Deployment and one ClusterIP Service, all sharing the
//! bundle name.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ExecAction, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe,
    Secret, SecretKeySelector, SecretVolumeSource, Service, ServicePort, ServiceSpec,
    TCPSocketAction, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::fixtures::DatabaseConfig;
use crate::resources::common::{object_meta, pod_selector_labels};

/// Value of `app.kubernetes.io/component` on database objects.
pub const DB_COMPONENT: &str = "model-registry-db";

/// Secret keys holding the credentials.
pub const DATABASE_NAME_KEY: &str = "database-name";
pub const DATABASE_USER_KEY: &str = "database-user";
pub const DATABASE_PASSWORD_KEY: &str = "database-password";

const DATA_MOUNT_PATH: &str = "/var/lib/mysql";
const TLS_MOUNT_PATH: &str = "/etc/mysql/ssl";
const PORT_NAME: &str = "mysql";

/// Generate the credentials Secret.
pub fn generate_secret(
    config: &DatabaseConfig,
    name: &str,
    labels: &BTreeMap<String, String>,
) -> Secret {
    let mut string_data = BTreeMap::new();
    string_data.insert(
        DATABASE_NAME_KEY.to_string(),
        config.database_name().to_string(),
    );
    string_data.insert(
        DATABASE_USER_KEY.to_string(),
        config.database_user().to_string(),
    );
    string_data.insert(
        DATABASE_PASSWORD_KEY.to_string(),
        config.database_password().to_string(),
    );

    Secret {
        metadata: object_meta(
            name,
            Some(config.namespace()),
            labels.clone(),
            config.annotations(),
        ),
        string_data: Some(string_data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Generate the PersistentVolumeClaim for the data directory.
pub fn generate_pvc(
    config: &DatabaseConfig,
    name: &str,
    labels: &BTreeMap<String, String>,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: object_meta(
            name,
            Some(config.namespace()),
            labels.clone(),
            config.annotations(),
        ),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![config.access_mode().as_str().to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some({
                    let mut requests = BTreeMap::new();
                    requests.insert("storage".to_string(), config.storage_size().to_quantity());
                    requests
                }),
                ..Default::default()
            }),
            volume_mode: Some("Filesystem".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the single-replica MySQL Deployment.
///
/// `Recreate` so a new pod never mounts the volume while the old one still
/// holds it.
pub fn generate_deployment(
    config: &DatabaseConfig,
    name: &str,
    labels: &BTreeMap<String, String>,
) -> Deployment {
    Deployment {
        metadata: object_meta(
            name,
            Some(config.namespace()),
            labels.clone(),
            config.annotations(),
        ),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            revision_history_limit: Some(0),
            selector: LabelSelector {
                match_labels: Some(pod_selector_labels(name, DB_COMPONENT)),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![generate_mysql_container(config, name)],
                    volumes: Some(generate_volumes(config, name)),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the ClusterIP Service in front of the Deployment.
pub fn generate_service(
    config: &DatabaseConfig,
    name: &str,
    labels: &BTreeMap<String, String>,
) -> Service {
    Service {
        metadata: object_meta(
            name,
            Some(config.namespace()),
            labels.clone(),
            config.annotations(),
        ),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(pod_selector_labels(name, DB_COMPONENT)),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME.to_string()),
                port: config.port(),
                target_port: Some(IntOrString::String(PORT_NAME.to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_mysql_container(config: &DatabaseConfig, name: &str) -> Container {
    let mut volume_mounts = vec![VolumeMount {
        name: "data".to_string(),
        mount_path: DATA_MOUNT_PATH.to_string(),
        ..Default::default()
    }];
    if config.tls().is_some() {
        volume_mounts.push(VolumeMount {
            name: "tls".to_string(),
            mount_path: TLS_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    Container {
        name: "mysql".to_string(),
        image: Some(config.image().to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(mysql_args(config)),
        env: Some(generate_env_vars(name)),
        ports: Some(vec![ContainerPort {
            container_port: config.port(),
            name: Some(PORT_NAME.to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        readiness_probe: Some(generate_readiness_probe()),
        liveness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::String(PORT_NAME.to_string()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(30),
            period_seconds: Some(10),
            timeout_seconds: Some(5),
            failure_threshold: Some(3),
            ..Default::default()
        }),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    }
}

/// Server flags. The data directory lives one level below the mount point
/// because a fresh volume may contain `lost+found`.
fn mysql_args(config: &DatabaseConfig) -> Vec<String> {
    let mut args = vec![
        "--datadir".to_string(),
        format!("{DATA_MOUNT_PATH}/datadir"),
        "--default-authentication-plugin=mysql_native_password".to_string(),
    ];
    if config.port() != 3306 {
        args.push(format!("--port={}", config.port()));
    }
    if config.tls().is_some() {
        args.extend([
            format!("--ssl-ca={TLS_MOUNT_PATH}/ca.crt"),
            format!("--ssl-cert={TLS_MOUNT_PATH}/tls.crt"),
            format!("--ssl-key={TLS_MOUNT_PATH}/tls.key"),
            "--require-secure-transport=ON".to_string(),
        ]);
    }
    args
}

fn secret_env(var: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: var.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_env_vars(secret: &str) -> Vec<EnvVar> {
    vec![
        secret_env("MYSQL_USER", secret, DATABASE_USER_KEY),
        secret_env("MYSQL_PASSWORD", secret, DATABASE_PASSWORD_KEY),
        secret_env("MYSQL_ROOT_PASSWORD", secret, DATABASE_PASSWORD_KEY),
        secret_env("MYSQL_DATABASE", secret, DATABASE_NAME_KEY),
    ]
}

/// Ready once the application user can run a query against its database.
fn generate_readiness_probe() -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                "mysql -D \"$MYSQL_DATABASE\" -u\"$MYSQL_USER\" -p\"$MYSQL_PASSWORD\" -e 'SELECT 1'"
                    .to_string(),
            ]),
        }),
        initial_delay_seconds: Some(10),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        failure_threshold: Some(3),
        success_threshold: Some(1),
        ..Default::default()
    }
}

fn generate_volumes(config: &DatabaseConfig, name: &str) -> Vec<Volume> {
    let mut volumes = vec![Volume {
        name: "data".to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: name.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }];
    if let Some(tls) = config.tls() {
        volumes.push(Volume {
            name: "tls".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(tls.server_cert_secret().to_string()),
                default_mode: Some(0o440),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    volumes
}
