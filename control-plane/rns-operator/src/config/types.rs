use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    #[envconfig(from = "RNS_OPERATOR_PROFILE", default = "dev")]
    pub profile: String,

    #[envconfig(from = "HTTP_PORT", default = "8089")]
    pub http_port: u16,

    /// Restrict the watch to a single Kubernetes namespace; all namespaces
    /// when unset. Env: RNS_OPERATOR_WATCH_NAMESPACE
    #[envconfig(from = "RNS_OPERATOR_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Namespace the operator itself runs in (owns the CSI config map).
    #[envconfig(from = "RNS_OPERATOR_NAMESPACE", default = "rook-ceph")]
    pub operator_namespace: String,

    /// Image used for cleanup jobs launched on forced deletion.
    #[envconfig(
        from = "RNS_OPERATOR_IMAGE",
        default = "docker.io/rook/ceph:master"
    )]
    pub image: String,

    #[envconfig(nested = true)]
    pub features: FeaturesConfig,

    #[envconfig(nested = true)]
    pub requeue: RequeueConfig,

    #[envconfig(nested = true)]
    pub backend: BackendConfig,
}

#[derive(Envconfig, Clone, Debug, Default)]
pub struct FeaturesConfig {
    /// Register a ceph-csi-operator ClientProfile for every rados namespace.
    /// If Some, env explicitly set; otherwise, profile defaults apply.
    #[envconfig(from = "RNS_OPERATOR_FEATURES_CSI_OPERATOR")]
    pub csi_operator: Option<bool>,
    /// Global switch for the mirroring health monitor tasks.
    #[envconfig(from = "RNS_OPERATOR_FEATURES_MONITORING")]
    pub monitoring: Option<bool>,
}

#[derive(Envconfig, Clone, Debug)]
pub struct RequeueConfig {
    #[envconfig(from = "RNS_OPERATOR_CLUSTER_NOT_READY_SECS", default = "10")]
    pub cluster_not_ready_secs: u64,
    #[envconfig(from = "RNS_OPERATOR_FINALIZER_BLOCKED_SECS", default = "10")]
    pub finalizer_blocked_secs: u64,
    #[envconfig(
        from = "RNS_OPERATOR_NOT_INITIALIZED_SECS",
        default = "10"
    )]
    pub operator_not_initialized_secs: u64,
    #[envconfig(from = "RNS_OPERATOR_POOL_NOT_READY_SECS", default = "10")]
    pub pool_not_ready_secs: u64,
    #[envconfig(from = "RNS_OPERATOR_ERROR_BACKOFF_SECS", default = "60")]
    pub error_backoff_secs: u64,
    /// Poll interval used when the pool does not declare one.
    #[envconfig(from = "RNS_OPERATOR_MIRROR_INTERVAL_SECS", default = "60")]
    pub mirror_interval_secs: u64,
}

#[derive(Envconfig, Clone, Debug)]
pub struct BackendConfig {
    #[envconfig(from = "RNS_OPERATOR_RBD_BIN", default = "rbd")]
    pub rbd_bin: String,
    /// Directory holding `<namespace>/<namespace>.config` and keyrings.
    #[envconfig(from = "RNS_OPERATOR_CONFIG_DIR", default = "/var/lib/rook")]
    pub config_dir: String,
    #[envconfig(from = "RNS_OPERATOR_COMMAND_TIMEOUT_SECS", default = "15")]
    pub command_timeout_secs: u64,
    #[envconfig(
        from = "RNS_OPERATOR_CSI_CONFIG_MAP",
        default = "rook-ceph-csi-config"
    )]
    pub csi_config_map: String,
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            cluster_not_ready_secs: 10,
            finalizer_blocked_secs: 10,
            operator_not_initialized_secs: 10,
            pool_not_ready_secs: 10,
            error_backoff_secs: 60,
            mirror_interval_secs: 60,
        }
    }
}

impl RequeueConfig {
    pub fn cluster_not_ready(&self) -> Duration {
        Duration::from_secs(self.cluster_not_ready_secs)
    }
    pub fn finalizer_blocked(&self) -> Duration {
        Duration::from_secs(self.finalizer_blocked_secs)
    }
    pub fn operator_not_initialized(&self) -> Duration {
        Duration::from_secs(self.operator_not_initialized_secs)
    }
    pub fn pool_not_ready(&self) -> Duration {
        Duration::from_secs(self.pool_not_ready_secs)
    }
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
    pub fn mirror_interval(&self) -> Duration {
        Duration::from_secs(self.mirror_interval_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            rbd_bin: "rbd".into(),
            config_dir: "/var/lib/rook".into(),
            command_timeout_secs: 15,
            csi_config_map: "rook-ceph-csi-config".into(),
        }
    }
}

impl OperatorConfig {
    /// Apply profile → defaults mapping, while respecting explicit env overrides.
    ///
    /// Rules:
    /// - dev: csi_operator=false, monitoring=true
    /// - prod: csi_operator=true, monitoring=true
    pub fn apply_profile_defaults(mut self) -> Self {
        let (def_csi_op, def_monitoring) = match self.profile.as_str() {
            "full" | "prod" | "production" => (true, true),
            _ /* dev */ => (false, true),
        };

        if self.features.csi_operator.is_none() {
            self.features.csi_operator = Some(def_csi_op);
        }
        if self.features.monitoring.is_none() {
            self.features.monitoring = Some(def_monitoring);
        }

        self
    }

    pub fn csi_operator_enabled(&self) -> bool {
        self.features.csi_operator.unwrap_or(false)
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.features.monitoring.unwrap_or(true)
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            profile: "dev".into(),
            http_port: 8089,
            watch_namespace: None,
            operator_namespace: "rook-ceph".into(),
            image: "docker.io/rook/ceph:master".into(),
            features: FeaturesConfig::default(),
            requeue: RequeueConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}
