//! Host tool checks
//!
//! Looks up every external program a build needs for the configured
//! layout and reports what is missing.

use serde::Serialize;
use std::path::PathBuf;

use crate::core::assemble::Layout;
use crate::core::config::BuildConfig;

/// Result of a single tool check
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// Role of the tool in the build
    pub name: String,
    /// Program name or path as configured
    pub program: String,
    /// Whether the program was found
    pub passed: bool,
    /// Resolved location
    pub path: Option<PathBuf>,
    /// Error message if check failed
    pub error: Option<String>,
    /// Whether the build cannot run without it
    pub required: bool,
}

impl CheckResult {
    /// Create a passing check result
    pub fn pass(name: &str, program: &str, path: PathBuf, required: bool) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            passed: true,
            path: Some(path),
            error: None,
            required,
        }
    }

    /// Create a failing check result
    pub fn fail(name: &str, program: &str, error: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            passed: false,
            path: None,
            error: Some(error.to_string()),
            required,
        }
    }
}

/// Overall doctor report
#[derive(Debug, Default, Serialize)]
pub struct DoctorReport {
    pub checks: Vec<CheckResult>,
    pub config_issues: Vec<String>,
}

impl DoctorReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_check(&mut self, result: CheckResult) {
        self.checks.push(result);
    }

    pub fn add_config_issue(&mut self, issue: String) {
        self.config_issues.push(issue);
    }

    /// Check if all required checks passed
    pub fn all_required_passed(&self) -> bool {
        self.checks.iter().filter(|c| c.required).all(|c| c.passed)
    }

    /// Check if all checks passed (including optional)
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed) && self.config_issues.is_empty()
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }

    /// Get all failed required checks
    pub fn failed_required(&self) -> Vec<&CheckResult> {
        self.checks
            .iter()
            .filter(|c| c.required && !c.passed)
            .collect()
    }
}

/// Look a program up on `PATH` (or check an explicit path)
pub fn check_tool(name: &str, program: &str, required: bool) -> CheckResult {
    match which::which(program) {
        Ok(path) => CheckResult::pass(name, program, path, required),
        Err(e) => CheckResult::fail(name, program, &format!("{program}: {e}"), required),
    }
}

/// Tools needed for `config`, as (role, program, required)
pub fn required_tools(config: &BuildConfig) -> Vec<(&'static str, String, bool)> {
    let tools = &config.tools;
    let layered = config.layout() == Layout::Layered;

    let mut list = vec![
        ("module metadata", tools.modinfo.clone(), true),
        ("module indexes", tools.depmod.clone(), true),
        ("module compression", tools.gzip.clone(), true),
        ("archiver", tools.cpio.clone(), true),
    ];
    if !layered {
        list.push(("image compression", config.image.compression.clone(), true));
    }
    for (name, program) in [
        ("rootfs formatter", &tools.mkfs_ext4),
        ("mount", &tools.mount),
        ("umount", &tools.umount),
        ("tree copy", &tools.cp),
        ("squashfs packer", &tools.mksquashfs),
        ("chroot", &tools.chroot),
    ] {
        list.push((name, program.clone(), layered));
    }
    list
}

/// Run all doctor checks
pub fn run_doctor(config: &BuildConfig) -> DoctorReport {
    let mut report = DoctorReport::new();

    for (name, program, required) in required_tools(config) {
        report.add_check(check_tool(name, &program, required));
    }

    if config.layout() == Layout::Layered && !config.dracut.hooks_dir.is_dir() {
        report.add_config_issue(format!(
            "dracut hooks directory {} does not exist",
            config.dracut.hooks_dir.display()
        ));
    }

    report
}
