//! Pure artifact renderers
//!
//! Every function here is pure string formatting over the cluster config
//! and a few computed values: same inputs, byte-identical output. None of
//! them touch the filesystem or the network, so unit tests assert on the
//! rendered bytes directly.
//!
//! The single impure input, the encryption key, is isolated in
//! [`encryption_key`]; [`configs::encryption_config`] takes the key as an
//! argument and stays deterministic.

mod configs;
mod manifests;
mod sources;
mod units;

pub use configs::{
    bridge_conf, containerd_config, encryption_config, kube_proxy_config, kubeconfig,
    kubelet_config, loopback_conf,
};
pub use manifests::{coredns_manifest, test_app_manifest};
pub use sources::DownloadSources;
pub use units::{
    containerd_unit, etcd_unit, kube_apiserver_unit, kube_controller_manager_unit,
    kube_proxy_unit, kube_scheduler_unit, kubelet_unit,
};

use rand::RngCore;

/// Generate a fresh 32-byte secret for the encryption provider config
pub fn encryption_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encryption_keys_are_random_and_sized() {
        let a = encryption_key();
        let b = encryption_key();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
