//! Integration tests for module closure, firmware pruning and module-info
//!
//! Run against a fixture root laid out like a prepared installer tree.

mod common;

use common::{list_files, TestTree, VERSION};
use instree::core::config::BuildConfig;
use instree::core::firmware::FirmwareSelector;
use instree::core::moddep::{self, ModuleGraph};
use instree::core::module_info::ModuleListWriter;
use instree::core::resolver::{ClosureResolver, Seed};
use instree::core::tools::MetadataQuery;
use instree::error::{ConfigError, InstreeError, ToolError};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Module metadata keyed by module base name
#[derive(Default)]
struct FakeMetadata {
    firmware: HashMap<String, Vec<String>>,
    descriptions: HashMap<String, String>,
}

impl FakeMetadata {
    fn with_firmware(mut self, module: &str, blobs: &[&str]) -> Self {
        self.firmware.insert(
            module.to_string(),
            blobs.iter().map(|b| (*b).to_string()).collect(),
        );
        self
    }

    fn with_description(mut self, module: &str, text: &str) -> Self {
        self.descriptions.insert(module.to_string(), text.to_string());
        self
    }

    fn key(module: &Path) -> String {
        let name = module.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        moddep::module_file_stem(name).unwrap_or(name).to_string()
    }
}

impl MetadataQuery for FakeMetadata {
    fn firmware(&self, module: &Path) -> Result<Vec<String>, ToolError> {
        Ok(self.firmware.get(&Self::key(module)).cloned().unwrap_or_default())
    }

    fn description(&self, module: &Path) -> Result<String, ToolError> {
        Ok(self
            .descriptions
            .get(&Self::key(module))
            .cloned()
            .unwrap_or_default())
    }
}

fn resolve_default(tree: &TestTree) -> BTreeSet<String> {
    let moddir = tree.moddir(VERSION);
    let graph = ModuleGraph::load(&moddir).unwrap();
    ClosureResolver::new(&moddir)
        .resolve(&BuildConfig::default().seeds(), &graph)
        .unwrap()
        .modules
}

fn names(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

// ============================================
// Closure
// ============================================

#[test]
fn test_default_seeds_pull_in_transitive_dependencies() {
    let tree = TestTree::with_standard_modules();

    let modules = resolve_default(&tree);

    assert_eq!(
        modules,
        names(&[
            "e1000e", "floppy", "loop", "pps_core", "ptp", "scsi_mod", "sd_mod", "squashfs"
        ])
    );
    assert!(!modules.contains("btrfs"));
}

#[test]
fn test_listing_order_needs_more_passes() {
    // Dependencies listed before their dependents take one pass each
    let tree = TestTree::new();
    tree.write_module_dir(
        "1.0",
        "c.ko: d.ko\nb.ko: c.ko\na.ko: b.ko\nd.ko:\n",
    );
    let moddir = tree.moddir("1.0");
    let graph = ModuleGraph::load(&moddir).unwrap();

    let closure = ClosureResolver::new(&moddir)
        .resolve(&[Seed::Module("a".to_string())], &graph)
        .unwrap();

    assert_eq!(closure.modules, names(&["a", "b", "c", "d"]));
    assert_eq!(closure.passes, 4);
}

#[test]
fn test_missing_group_listing_is_config_error() {
    let tree = TestTree::with_standard_modules();
    let moddir = tree.moddir(VERSION);
    let graph = ModuleGraph::load(&moddir).unwrap();

    let err = ClosureResolver::new(&moddir)
        .resolve(&[Seed::Group("drm".to_string())], &graph)
        .unwrap_err();

    match err {
        ConfigError::MissingInput { path } => assert!(path.ends_with("modules.drm")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_malformed_dependency_line_is_rejected() {
    let tree = TestTree::new();
    tree.create_file("root/modules/1.0/modules.dep", "this is not a listing\n");

    let err = ModuleGraph::load(&tree.moddir("1.0")).unwrap_err();

    assert!(matches!(err, InstreeError::Module(_)));
}

// ============================================
// Firmware selection
// ============================================

#[test]
fn test_prune_removes_unwanted_modules_and_firmware() {
    let tree = TestTree::with_standard_modules();
    tree.add_firmware(&[
        "e1000e/fw.bin",
        "unused/blob.bin",
        "iwlwifi-3945-1.ucode",
        "zd1211/zd1211_uph",
    ]);
    let required = resolve_default(&tree);
    let metadata = FakeMetadata::default().with_firmware("e1000e", &["e1000e/fw.bin"]);

    let selection = FirmwareSelector::new(&metadata)
        .select(&required, &tree.moddir(VERSION), &tree.root().join("firmware"))
        .unwrap();

    assert_eq!(selection.removed_modules.len(), 1);
    assert!(selection.removed_modules[0].ends_with("btrfs.ko"));
    assert!(!tree.file_exists(&format!("root/modules/{VERSION}/kernel/fs/btrfs/btrfs.ko")));
    assert!(tree.file_exists(&format!("root/modules/{VERSION}/kernel/drivers/ptp/ptp.ko")));
    assert_eq!(selection.retained_modules, required);

    assert_eq!(
        list_files(&tree.root().join("firmware")),
        vec![
            "e1000e/fw.bin".to_string(),
            "iwlwifi-3945-1.ucode".to_string(),
            "zd1211/zd1211_uph".to_string(),
        ]
    );
    assert_eq!(selection.removed_firmware.len(), 1);
}

#[test]
fn test_firmware_kept_for_earlier_kernel_survives() {
    let tree = TestTree::with_standard_modules();
    tree.add_firmware(&["other/kernel.bin", "unused.bin"]);
    let required = resolve_default(&tree);
    let metadata = FakeMetadata::default();

    FirmwareSelector::new(&metadata)
        .with_extra_firmware(["other/kernel.bin"])
        .select(&required, &tree.moddir(VERSION), &tree.root().join("firmware"))
        .unwrap();

    assert!(tree.file_exists("root/firmware/other/kernel.bin"));
    assert!(!tree.file_exists("root/firmware/unused.bin"));
}

#[test]
fn test_missing_firmware_tree_is_fine() {
    let tree = TestTree::with_standard_modules();
    let required = resolve_default(&tree);
    let metadata = FakeMetadata::default();

    let selection = FirmwareSelector::new(&metadata)
        .select(&required, &tree.moddir(VERSION), &tree.root().join("firmware"))
        .unwrap();

    assert!(selection.removed_firmware.is_empty());
}

// ============================================
// module-info
// ============================================

#[test]
fn test_module_info_lists_block_and_network_drivers() {
    let tree = TestTree::with_standard_modules();
    let moddir = tree.moddir(VERSION);
    let metadata = FakeMetadata::default()
        .with_description("sd_mod", "SCSI disk (sd) driver\nsecond line")
        .with_description("e1000e", "Intel(R) PRO/1000 Network Driver");
    let files = moddep::module_files(&moddir).unwrap();
    let output = tree.root().join("modules/module-info");

    let count = ModuleListWriter::new(&metadata)
        .write(&moddir, &files, &output)
        .unwrap();

    // scsi_mod and floppy are never listed
    assert_eq!(count, 2);
    assert_eq!(
        tree.read_file("root/modules/module-info"),
        "Version 0\n\
         e1000e\n\teth\n\t\"Intel(R) PRO/1000 Network Driver\"\n\
         sd_mod\n\tscsi\n\t\"SCSI disk (sd) driver\"\n"
    );
}

#[test]
fn test_module_info_skips_pruned_modules_and_truncates() {
    let tree = TestTree::with_standard_modules();
    let moddir = tree.moddir(VERSION);
    std::fs::remove_file(moddir.join("kernel/drivers/net/e1000e/e1000e.ko")).unwrap();
    let long = "x".repeat(80);
    let metadata = FakeMetadata::default().with_description("sd_mod", &long);
    let files = moddep::module_files(&moddir).unwrap();

    let records = ModuleListWriter::new(&metadata).records(&moddir, &files).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records["sd_mod"].description.len(), 65);
}

#[test]
fn test_module_info_falls_back_to_name() {
    let tree = TestTree::with_standard_modules();
    let moddir = tree.moddir(VERSION);
    let metadata = FakeMetadata::default();
    let files = moddep::module_files(&moddir).unwrap();

    let records = ModuleListWriter::new(&metadata).records(&moddir, &files).unwrap();

    assert_eq!(records["e1000e"].description, "e1000e driver");
}
