//! Download locations for control-plane and worker binaries
//!
//! The URL templates are configuration, not constants: air-gapped
//! deployments point these bases at an internal mirror.

/// Base URLs (and the runc pin) for every external download
#[derive(Debug, Clone)]
pub struct DownloadSources {
    /// Kubernetes release bucket base
    pub kubernetes_release_base: String,
    /// etcd GitHub releases base
    pub etcd_release_base: String,
    /// containerd GitHub releases base
    pub containerd_release_base: String,
    /// runc GitHub releases base
    pub runc_release_base: String,
    /// CNI plugins GitHub releases base
    pub cni_release_base: String,
    /// runc release tag installed on workers
    pub runc_version: String,
}

impl Default for DownloadSources {
    fn default() -> Self {
        Self {
            kubernetes_release_base: "https://storage.googleapis.com/kubernetes-release/release"
                .into(),
            etcd_release_base: "https://github.com/etcd-io/etcd/releases/download".into(),
            containerd_release_base: "https://github.com/containerd/containerd/releases/download"
                .into(),
            runc_release_base: "https://github.com/opencontainers/runc/releases/download".into(),
            cni_release_base: "https://github.com/containernetworking/plugins/releases/download"
                .into(),
            runc_version: "v1.1.7".into(),
        }
    }
}

impl DownloadSources {
    /// URL of the etcd release tarball for `version`
    pub fn etcd_tarball(&self, version: &str) -> String {
        format!(
            "{}/{version}/etcd-{version}-linux-amd64.tar.gz",
            self.etcd_release_base
        )
    }

    /// URL of a Kubernetes release binary (`kubectl`, `kubelet`, ...)
    pub fn kube_binary(&self, version: &str, name: &str) -> String {
        format!(
            "{}/{version}/bin/linux/amd64/{name}",
            self.kubernetes_release_base
        )
    }

    /// URL of the containerd release tarball for `version`
    pub fn containerd_tarball(&self, version: &str) -> String {
        format!(
            "{}/{version}/containerd-{version}-linux-amd64.tar.gz",
            self.containerd_release_base
        )
    }

    /// URL of the pinned runc binary
    pub fn runc_binary(&self) -> String {
        format!("{}/{}/runc.amd64", self.runc_release_base, self.runc_version)
    }

    /// URL of the CNI plugins tarball for `version`
    pub fn cni_tarball(&self, version: &str) -> String {
        format!(
            "{}/{version}/cni-plugins-linux-amd64-{version}.tgz",
            self.cni_release_base
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_urls_match_upstream_layouts() {
        let sources = DownloadSources::default();
        assert_eq!(
            sources.etcd_tarball("v3.5.9"),
            "https://github.com/etcd-io/etcd/releases/download/v3.5.9/etcd-v3.5.9-linux-amd64.tar.gz"
        );
        assert_eq!(
            sources.kube_binary("v1.26.0", "kube-apiserver"),
            "https://storage.googleapis.com/kubernetes-release/release/v1.26.0/bin/linux/amd64/kube-apiserver"
        );
        assert_eq!(
            sources.containerd_tarball("1.7.2"),
            "https://github.com/containerd/containerd/releases/download/1.7.2/containerd-1.7.2-linux-amd64.tar.gz"
        );
        assert_eq!(
            sources.runc_binary(),
            "https://github.com/opencontainers/runc/releases/download/v1.1.7/runc.amd64"
        );
        assert_eq!(
            sources.cni_tarball("v1.3.0"),
            "https://github.com/containernetworking/plugins/releases/download/v1.3.0/cni-plugins-linux-amd64-v1.3.0.tgz"
        );
    }

    #[test]
    fn bases_are_configurable_for_mirrors() {
        let sources = DownloadSources {
            etcd_release_base: "https://mirror.internal/etcd".into(),
            ..Default::default()
        };
        assert!(sources
            .etcd_tarball("v3.5.9")
            .starts_with("https://mirror.internal/etcd/"));
    }
}
