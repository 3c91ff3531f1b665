use anyhow::Result;
use colored::Colorize;
use confkit::ValidationResult;
use confkit::compliance::{self, Severity, ValidationReport};

use crate::Context;
use crate::cli::ValidateArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &ValidateArgs) -> Result<u8> {
    let config = super::read_config_file(&args.config_file)?;
    let rules = compliance::load_rules(&args.rules)?;

    let report = ValidationReport::new(compliance::evaluate(&config, &rules));
    print_report(&report, ctx.quiet);

    Ok(u8::from(report.has_blocking_failures()))
}

/// Print validation counts followed by each failure and warning.
pub fn print_report(report: &ValidationReport, quiet: bool) {
    let passed = report.passed().count();
    let failed: Vec<_> = report.failed().collect();
    let warnings: Vec<_> = report.warnings().collect();

    if !quiet {
        ui::header("Compliance Validation");
        ui::kv("Passed", &passed.to_string().green().to_string());
        ui::kv("Failed", &failed.len().to_string().red().to_string());
        ui::kv("Warnings", &warnings.len().to_string().yellow().to_string());
    }

    if !failed.is_empty() {
        ui::section("Failed");
        for result in &failed {
            print_result(result);
        }
    }

    if !warnings.is_empty() && !quiet {
        ui::section("Warnings");
        for result in &warnings {
            print_result(result);
        }
    }

    if !quiet {
        println!();
        if report.has_blocking_failures() {
            ui::error("Configuration is not compliant");
        } else {
            ui::success("Configuration is compliant");
        }
    }
}

fn print_result(result: &ValidationResult) {
    let marker = match result.severity {
        Severity::Error => "✗".red(),
        Severity::Warning => "⚠".yellow(),
        Severity::Info => "ℹ".blue(),
    };
    println!(
        "  {} {} {}",
        marker,
        result.rule,
        format!("[{}]", result.severity).dimmed()
    );
    println!("      {} {}", "pattern:".dimmed(), result.pattern);
    if let Some(detail) = &result.detail {
        println!("      {} {}", "detail:".dimmed(), detail);
    }
}
