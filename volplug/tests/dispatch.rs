//! Integration tests for backend selection and the pass-through operations.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use volplug::{
    BackendKind, BackendRegistry, Config, CreateRequest, MountRequest, RemoteDir, Volume,
    VolplugError, VolplugResult, VolumeBackend, VolumeDriver, VolumeStatus,
};
use volplug_test_utils::{MockBackend, block_and_network};

fn nfs_config() -> Config {
    Config::default()
        .with_remote_dir("nfs1", RemoteDir::new("nfs"))
        .with_default_label("nfs1")
}

fn create_test_driver(
    config: Config,
    block: MockBackend,
    network: MockBackend,
) -> (VolumeDriver, Arc<MockBackend>, Arc<MockBackend>) {
    let (block, network, registry) = block_and_network(block, network);
    let driver = VolumeDriver::new(config, registry).unwrap();
    (driver, block, network)
}

#[tokio::test]
async fn test_configured_label_dispatches_to_network() {
    let (driver, block, network) = create_test_driver(
        nfs_config(),
        MockBackend::new("/mnt/vmdk"),
        MockBackend::new("/mnt/nfs").with_volume("shared@nfs1"),
    );

    let mountpoint = driver
        .mount(&MountRequest::new("shared@nfs1", "c1"))
        .await
        .unwrap();

    assert_eq!(mountpoint, PathBuf::from("/mnt/nfs/shared@nfs1"));
    assert_eq!(network.calls().mount, 1);
    assert_eq!(block.calls().mount, 0);
    assert_eq!(driver.refcount("shared@nfs1"), 1);
}

#[tokio::test]
async fn test_backend_claimed_label_dispatches_to_network() {
    let (driver, _block, network) = create_test_driver(
        Config::default(),
        MockBackend::new("/mnt/vmdk"),
        MockBackend::new("/mnt/nfs").with_known_label("nfs2"),
    );

    let (kind, _) = driver.resolve_backend("v@nfs2", None).unwrap();
    assert_eq!(kind, BackendKind::Network);

    driver.mount(&MountRequest::new("v@nfs2", "c1")).await.unwrap();
    assert_eq!(network.calls().mount, 1);
}

#[tokio::test]
async fn test_unknown_label_defaults_to_block() {
    let (driver, _block, _network) = create_test_driver(
        nfs_config(),
        MockBackend::new("/mnt/vmdk"),
        MockBackend::new("/mnt/nfs"),
    );

    let (kind, _) = driver.resolve_backend("vol@datastore1", None).unwrap();
    assert_eq!(kind, BackendKind::Block);
    let (kind, _) = driver.resolve_backend("vol", None).unwrap();
    assert_eq!(kind, BackendKind::Block);
}

#[tokio::test]
async fn test_explicit_type_selects_backend() {
    let (driver, _block, _network) = create_test_driver(
        nfs_config(),
        MockBackend::new("/mnt/vmdk"),
        MockBackend::new("/mnt/nfs"),
    );

    let (kind, _) = driver
        .resolve_backend("vol@datastore1", Some(BackendKind::Network))
        .unwrap();
    assert_eq!(kind, BackendKind::Network);
}

#[tokio::test]
async fn test_mounted_volume_keeps_its_backend() {
    let (driver, _block, _network) = create_test_driver(
        nfs_config(),
        MockBackend::new("/mnt/vmdk"),
        MockBackend::new("/mnt/nfs").with_volume("shared@nfs1"),
    );

    driver
        .mount(&MountRequest::new("shared@nfs1", "c1"))
        .await
        .unwrap();

    let (kind, _) = driver
        .resolve_backend("shared@nfs1", Some(BackendKind::Block))
        .unwrap();
    assert_eq!(kind, BackendKind::Network);
}

#[tokio::test]
async fn test_create_with_file_type_uses_default_label() {
    let (driver, block, network) = create_test_driver(
        nfs_config(),
        MockBackend::new("/mnt/vmdk"),
        MockBackend::new("/mnt/nfs"),
    );

    driver
        .create(&CreateRequest::new("vol").with_opt("type", "file"))
        .await
        .unwrap();

    assert_eq!(network.volume_names(), vec!["vol@nfs1".to_string()]);
    assert_eq!(block.calls().create, 0);
}

#[tokio::test]
async fn test_create_network_without_default_label_fails() {
    let (driver, _block, network) = create_test_driver(
        Config::default().with_remote_dir("nfs1", RemoteDir::new("nfs")),
        MockBackend::new("/mnt/vmdk"),
        MockBackend::new("/mnt/nfs"),
    );

    let err = driver
        .create(&CreateRequest::new("vol").with_opt("type", "nfs"))
        .await
        .unwrap_err();

    assert!(matches!(err, VolplugError::Config(_)));
    assert_eq!(network.calls().create, 0);
}

#[tokio::test]
async fn test_create_with_datastore_option() {
    let (driver, block, network) = create_test_driver(
        nfs_config(),
        MockBackend::new("/mnt/vmdk"),
        MockBackend::new("/mnt/nfs").with_datastore("nfs1"),
    );

    driver
        .create(&CreateRequest::new("vol").with_opt("datastore", "nfs1"))
        .await
        .unwrap();

    assert_eq!(network.volume_names(), vec!["vol@nfs1".to_string()]);
    assert_eq!(block.calls().create, 0);
}

#[tokio::test]
async fn test_create_plain_name_goes_to_block() {
    let (driver, block, _network) = create_test_driver(
        nfs_config(),
        MockBackend::new("/mnt/vmdk"),
        MockBackend::new("/mnt/nfs"),
    );

    driver.create(&CreateRequest::new("data1")).await.unwrap();
    assert_eq!(block.volume_names(), vec!["data1".to_string()]);
}

#[tokio::test]
async fn test_create_with_bad_type_is_config_error() {
    let (driver, block, network) = create_test_driver(
        nfs_config(),
        MockBackend::new("/mnt/vmdk"),
        MockBackend::new("/mnt/nfs"),
    );

    let err = driver
        .create(&CreateRequest::new("vol").with_opt("type", "zfs"))
        .await
        .unwrap_err();

    assert!(matches!(err, VolplugError::Config(_)));
    assert_eq!(block.calls().create + network.calls().create, 0);
}

#[tokio::test]
async fn test_list_concatenates_in_registration_order() {
    let (driver, _block, _network) = create_test_driver(
        nfs_config(),
        MockBackend::new("/mnt/vmdk")
            .with_volume("b1")
            .with_volume("b2"),
        MockBackend::new("/mnt/nfs").with_volume("n1@nfs1"),
    );

    let names: Vec<String> = driver
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.name)
        .collect();

    assert_eq!(names, vec!["b1", "b2", "n1@nfs1"]);
}

#[tokio::test]
async fn test_get_and_path_delegate() {
    let (driver, _block, network) = create_test_driver(
        nfs_config(),
        MockBackend::new("/mnt/vmdk"),
        MockBackend::new("/mnt/nfs").with_volume("shared@nfs1"),
    );

    let volume = driver.get("shared@nfs1").await.unwrap();
    assert_eq!(volume.name, "shared@nfs1");
    assert_eq!(volume.status["datastore"], "nfs1");
    assert_eq!(volume.mountpoint, PathBuf::new());

    let path = driver.path("shared@nfs1").await.unwrap();
    assert_eq!(path, PathBuf::from("/mnt/nfs/shared@nfs1"));
    assert_eq!(network.calls().get, 1);
    assert_eq!(network.calls().path, 1);

    let err = driver.get("missing").await.unwrap_err();
    assert!(matches!(err, VolplugError::NotFound(_)));
}

#[tokio::test]
async fn test_bare_name_of_network_volume_resolves_for_get_path_remove() {
    let (driver, block, network) = create_test_driver(
        nfs_config(),
        MockBackend::new("/mnt/vmdk"),
        MockBackend::new("/mnt/nfs"),
    );
    driver
        .create(&CreateRequest::new("vol").with_opt("type", "nfs"))
        .await
        .unwrap();
    assert_eq!(network.volume_names(), vec!["vol@nfs1".to_string()]);

    let path = driver.path("vol").await.unwrap();
    assert_eq!(path, PathBuf::from("/mnt/nfs/vol@nfs1"));
    assert_eq!(network.calls().path, 1);
    assert_eq!(block.calls().path, 0);

    let volume = driver.get("vol").await.unwrap();
    assert_eq!(volume.name, "vol@nfs1");
    assert_eq!(block.calls().get, 0);

    driver.remove("vol").await.unwrap();
    assert_eq!(network.calls().remove, 1);
    assert_eq!(block.calls().remove, 0);
    assert!(network.volume_names().is_empty());
}

#[tokio::test]
async fn test_ambiguous_bare_name_is_rejected_before_dispatch() {
    let (driver, block, network) = create_test_driver(
        nfs_config(),
        MockBackend::new("/mnt/vmdk").with_volume("vol@datastore1"),
        MockBackend::new("/mnt/nfs").with_volume("vol@nfs1"),
    );

    let err = driver.path("vol").await.unwrap_err();
    assert!(matches!(err, VolplugError::AmbiguousVolumeName { .. }));
    let err = driver.remove("vol").await.unwrap_err();
    assert!(matches!(err, VolplugError::AmbiguousVolumeName { .. }));

    assert_eq!(block.calls().path + network.calls().path, 0);
    assert_eq!(block.calls().remove + network.calls().remove, 0);
}

#[tokio::test]
async fn test_capabilities_are_global() {
    let (driver, _block, _network) = create_test_driver(
        Config::default(),
        MockBackend::new("/mnt/vmdk"),
        MockBackend::new("/mnt/nfs"),
    );

    assert_eq!(driver.capabilities().scope, "global");
}

#[test]
fn test_driver_requires_block_backend() {
    let registry = BackendRegistry::new().with_backend(
        BackendKind::Network,
        Arc::new(MockBackend::new("/mnt/nfs")),
    );

    let err = VolumeDriver::new(Config::default(), registry).unwrap_err();
    assert!(matches!(err, VolplugError::Config(_)));
}

#[test]
fn test_driver_rejects_invalid_config() {
    let registry = BackendRegistry::new()
        .with_backend(BackendKind::Block, Arc::new(MockBackend::new("/mnt/vmdk")));
    let config = Config::default().with_default_label("missing");

    let err = VolumeDriver::new(config, registry).unwrap_err();
    assert!(matches!(err, VolplugError::Config(_)));
}

/// Backend that knows volumes by name but does not list them.
struct UnlistedBackend(MockBackend);

#[async_trait]
impl VolumeBackend for UnlistedBackend {
    async fn create(&self, req: &CreateRequest) -> VolplugResult<()> {
        self.0.create(req).await
    }

    async fn mount(&self, req: &MountRequest) -> VolplugResult<PathBuf> {
        self.0.mount(req).await
    }

    async fn unmount(&self, name: &str) -> VolplugResult<()> {
        self.0.unmount(name).await
    }

    async fn remove(&self, name: &str) -> VolplugResult<()> {
        self.0.remove(name).await
    }

    async fn path(&self, name: &str) -> VolplugResult<PathBuf> {
        self.0.path(name).await
    }

    async fn list(&self) -> VolplugResult<Vec<Volume>> {
        Ok(Vec::new())
    }

    async fn get(&self, name: &str) -> VolplugResult<VolumeStatus> {
        self.0.get(name).await
    }

    fn is_mounted(&self, name: &str) -> bool {
        self.0.is_mounted(name)
    }

    fn mount_point(&self, name: &str) -> PathBuf {
        self.0.mount_point(name)
    }

    fn is_known_datastore_label(&self, label: &str) -> bool {
        self.0.is_known_datastore_label(label)
    }
}

#[tokio::test]
async fn test_bare_name_uses_datastore_metadata() {
    let block = UnlistedBackend(
        MockBackend::new("/mnt/vmdk")
            .with_datastore("datastore1")
            .with_volume("vol"),
    );
    let registry = BackendRegistry::new().with_backend(BackendKind::Block, Arc::new(block));
    let driver = VolumeDriver::new(Config::default(), registry).unwrap();

    let mountpoint = driver.mount(&MountRequest::new("vol", "c1")).await.unwrap();

    assert_eq!(mountpoint, PathBuf::from("/mnt/vmdk/vol@datastore1"));
    assert_eq!(driver.refcount("vol@datastore1"), 1);
}
