//! Compatibility table and upgrade summary rendering.
//!
//! Renders dependency checks as kubectl-style tables and prints the planned
//! or applied resource changes.

use colored::Colorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::upgrade::compat::{CompatibilityReport, DependencyCheck, DependencyStatus};
use crate::upgrade::mutator::ROLLING_UPGRADE_MODE;
use crate::upgrade::orchestrator::{Assessment, UpgradeOutcome, UpgradePlan};
use crate::upgrade::plan::UpgradeKind;

/// Row for the dependency compatibility table.
#[derive(Tabled)]
struct DependencyRow {
    #[tabled(rename = "DEPENDENCY")]
    dependency: String,
    #[tabled(rename = "CURRENT")]
    current: String,
    #[tabled(rename = "REQUIRED")]
    required: String,
    #[tabled(rename = "STATUS")]
    status: String,
}

pub fn status_label(status: DependencyStatus) -> &'static str {
    match status {
        DependencyStatus::Satisfied => "OK",
        DependencyStatus::TooLow => "Too Low",
        DependencyStatus::Unparsable => "Unparsable",
        DependencyStatus::Unknown => "Unknown",
    }
}

fn colored_status(status: DependencyStatus) -> String {
    let label = status_label(status);
    match status {
        DependencyStatus::Satisfied => label.green().to_string(),
        DependencyStatus::TooLow | DependencyStatus::Unparsable => label.red().to_string(),
        DependencyStatus::Unknown => label.yellow().to_string(),
    }
}

fn build_rows(checks: &[DependencyCheck]) -> Vec<DependencyRow> {
    checks
        .iter()
        .map(|c| DependencyRow {
            dependency: c.dependency.to_string(),
            current: c.probe.to_string(),
            required: format!(">= {}", c.required),
            status: colored_status(c.status),
        })
        .collect()
}

fn print_report(report: &CompatibilityReport) {
    let mut table = Table::new(build_rows(&report.checks));
    apply_table_style(&mut table);
    println!("{}", table);
}

/// Print the result of `check`.
pub fn print_assessment(assessment: &Assessment, instance: &str, namespace: &str, context: &str) {
    println!(
        "{} (context: {}, {} -> {}, {} {}, band {}):",
        format!("Milvus/{}/{}", namespace, instance).bold(),
        context,
        assessment.source,
        assessment.target,
        assessment.kind,
        assessment.direction,
        assessment.report.requirement.band()
    );
    print_report(&assessment.report);
    println!();

    let verdict = if assessment.report.is_compatible() {
        "Compatible".green().bold()
    } else if assessment.report.has_blocking() {
        "Incompatible".red().bold()
    } else {
        "Needs confirmation".yellow().bold()
    };
    println!("Result: {}", verdict);
}

/// Resource fields the upgrade writes, as `(path, value)` pairs.
pub fn planned_changes(plan: &UpgradePlan) -> Vec<(&'static str, String)> {
    let mut changes = vec![("spec.components.image", plan.image.clone())];
    if plan.kind == UpgradeKind::Major {
        changes.push(("spec.components.enableRollingUpdate", "true".to_string()));
        changes.push((
            "spec.components.imageUpdateMode",
            ROLLING_UPGRADE_MODE.to_string(),
        ));
    }
    changes
}

/// Print the plan and, for applied upgrades, the submitted result.
pub fn print_outcome(outcome: &UpgradeOutcome, instance: &str, namespace: &str) {
    let plan = &outcome.plan;
    let name = format!("{}/{}", namespace, instance);

    match &outcome.mutation {
        None => println!(
            "{} Would {} Milvus '{}' from {} to {} ({})",
            "[DRY RUN]".yellow(),
            plan.direction,
            name.bold(),
            plan.source,
            plan.target,
            plan.kind
        ),
        Some(mutation) => println!(
            "Submitted {} upgrade of Milvus '{}' from {} to {}",
            mutation.kind,
            name.bold(),
            plan.source,
            plan.target
        ),
    }

    if let Some(report) = &plan.compatibility {
        print_report(report);
    } else {
        println!("{}", "Dependency checks skipped".yellow());
    }

    let (previous, image) = match &outcome.mutation {
        Some(m) => (m.previous_image.as_deref(), m.image.as_str()),
        None => (plan.current_image.as_deref(), plan.image.as_str()),
    };
    println!("  image: {} -> {}", previous.unwrap_or("<unset>"), image);
    for (path, value) in planned_changes(plan).into_iter().skip(1) {
        println!("  {}: {}", path, value);
    }

    if let Some(mutation) = &outcome.mutation {
        println!(
            "  resourceVersion: {} (attempts: {})",
            mutation.resource_version.as_deref().unwrap_or("-"),
            mutation.attempts
        );
        println!("The Milvus operator will now roll out the new image.");
    }
}

fn apply_table_style(table: &mut Table) {
    use tabled::settings::object::Columns;
    use tabled::settings::themes::Theme;
    use tabled::settings::{Modify, Padding};

    let mut theme = Theme::from_style(Style::empty());
    theme.remove_horizontal_lines();
    table.with(theme);
    table.with(Modify::new(Columns::new(..)).with(Padding::new(0, 2, 0, 0)));
}
