//! CLI command for `instree doctor`
//!
//! Checks host tools and reports what is missing.

use anyhow::Result;

use crate::cli::output::{
    is_json, is_quiet, print_detail, print_info, print_success, print_warning, status,
};
use crate::core::config::BuildConfig;
use crate::core::doctor::run_doctor;

/// Execute the doctor command
pub fn execute(config: &BuildConfig) -> Result<()> {
    let report = run_doctor(config);

    if is_json() {
        let json_result = serde_json::json!({
            "status": if report.all_passed() { "success" } else if report.failed_required().is_empty() { "warning" } else { "error" },
            "checks": report.checks,
            "config_issues": report.config_issues,
            "passed_count": report.passed_count(),
            "total_count": report.checks.len()
        });
        println!("{}", serde_json::to_string_pretty(&json_result)?);

        if !report.failed_required().is_empty() {
            return Err(anyhow::anyhow!("Missing required tools"));
        }
        return Ok(());
    }

    if is_quiet() {
        let failed_required = report.failed_required();
        if !failed_required.is_empty() {
            for check in failed_required {
                eprintln!("{} Missing required: {} ({})", status::ERROR, check.name, check.program);
            }
            return Err(anyhow::anyhow!("Missing required tools"));
        }
        return Ok(());
    }

    print_info("Checking host tools...");
    println!();

    for check in &report.checks {
        let required_str = if check.required { "" } else { " [optional]" };
        match (&check.path, &check.error) {
            (Some(path), _) => println!(
                "  {} {}{required_str}: {}",
                status::SUCCESS,
                check.name,
                path.display()
            ),
            (None, error) => {
                println!("  {} {}{required_str}", status::ERROR, check.name);
                if let Some(error) = error {
                    print_detail(&format!("Error: {error}"));
                }
            }
        }
    }

    if !report.config_issues.is_empty() {
        println!();
        print_warning("Configuration issues:");
        for issue in &report.config_issues {
            print_detail(&format!("• {issue}"));
        }
    }

    println!();
    let passed = report.passed_count();
    let total = report.checks.len();
    let failed_required = report.failed_required();

    if report.all_passed() {
        print_success(&format!("All checks passed ({passed}/{total})"));
    } else if failed_required.is_empty() {
        print_warning(&format!("{passed}/{total} checks passed (optional tools missing)"));
    } else {
        println!("{} {passed}/{total} checks passed", status::ERROR);
        return Err(anyhow::anyhow!(
            "Missing required tools: {}",
            failed_required
                .iter()
                .map(|c| c.program.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    Ok(())
}
