//! JSON rendering of the `check` report for scripting.

use serde::Serialize;

use crate::upgrade::compat::DependencyProbe;
use crate::upgrade::orchestrator::Assessment;

use super::table::status_label;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentReport {
    pub instance: String,
    pub namespace: String,
    pub source_version: String,
    pub target_version: String,
    pub upgrade_kind: String,
    pub direction: String,
    pub band: String,
    pub compatible: bool,
    pub blocking: bool,
    pub dependencies: Vec<DependencyEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEntry {
    pub name: String,
    /// `None` when the version could not be read from the resource.
    pub current: Option<String>,
    pub required: String,
    pub status: &'static str,
}

impl AssessmentReport {
    pub fn new(assessment: &Assessment, instance: &str, namespace: &str) -> Self {
        let report = &assessment.report;
        let dependencies = report
            .checks
            .iter()
            .map(|c| DependencyEntry {
                name: c.dependency.to_string(),
                current: match &c.probe {
                    DependencyProbe::Known(v) => Some(v.clone()),
                    DependencyProbe::Unknown => None,
                },
                required: c.required.to_string(),
                status: status_label(c.status),
            })
            .collect();

        Self {
            instance: instance.to_string(),
            namespace: namespace.to_string(),
            source_version: assessment.source.to_string(),
            target_version: assessment.target.to_string(),
            upgrade_kind: assessment.kind.to_string(),
            direction: assessment.direction.to_string(),
            band: report.requirement.band(),
            compatible: report.is_compatible(),
            blocking: report.has_blocking(),
            dependencies,
        }
    }
}

pub fn print_assessment(
    assessment: &Assessment,
    instance: &str,
    namespace: &str,
) -> Result<(), serde_json::Error> {
    let report = AssessmentReport::new(assessment, instance, namespace);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
