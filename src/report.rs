//! SARIF rendering of archive reports.

use std::collections::BTreeSet;
use std::path::Path;

use serde_json::json;
use serde_sarif::sarif::{
    Artifact, ArtifactLocation, Invocation, Location, LogicalLocation, Message, Notification,
    ReportingDescriptor, Result as SarifResult, Run, SCHEMA_URL, Sarif, Tool, ToolComponent,
};

use crate::archive::ArchiveReport;
use crate::pipeline::Finding;

pub const TOOL_NAME: &str = "jarsweep";

/// Archive-level failure that aborted one input, e.g. an unreadable archive.
#[derive(Clone, Debug)]
pub struct InputFailure {
    pub archive: String,
    pub reason: String,
}

/// One run covering every processed archive. Findings become results and
/// per-module or per-archive failures become tool execution notifications.
pub fn build_sarif(reports: &[ArchiveReport], failures: &[InputFailure], arguments: Vec<String>) -> Sarif {
    let mut rule_ids = BTreeSet::new();
    let mut results = Vec::new();
    let mut notifications = Vec::new();
    let mut artifacts = Vec::new();

    for report in reports {
        let archive = path_to_uri(report.archive_path());
        artifacts.push(
            Artifact::builder()
                .location(ArtifactLocation::builder().uri(archive.clone()).build())
                .build(),
        );
        for finding in report.findings() {
            rule_ids.insert(finding.rule_id.clone());
            results.push(finding_result(&archive, finding));
        }
        for failure in report.failures() {
            notifications.push(notification(format!(
                "{archive}!/{}: {}",
                failure.entry, failure.reason
            )));
        }
    }
    for failure in failures {
        notifications.push(notification(format!("{}: {}", failure.archive, failure.reason)));
    }

    let invocation = build_invocation(arguments, failures.is_empty(), notifications);
    let rules: Vec<ReportingDescriptor> = rule_ids
        .into_iter()
        .map(|id| ReportingDescriptor::builder().id(id).build())
        .collect();
    let driver = ToolComponent::builder()
        .name(TOOL_NAME)
        .version(env!("CARGO_PKG_VERSION"))
        .rules(rules)
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}

fn build_invocation(arguments: Vec<String>, successful: bool, notifications: Vec<Notification>) -> Invocation {
    let command_line = arguments.join(" ");
    if notifications.is_empty() {
        Invocation::builder()
            .execution_successful(successful)
            .arguments(arguments)
            .command_line(command_line)
            .build()
    } else {
        Invocation::builder()
            .execution_successful(successful)
            .arguments(arguments)
            .command_line(command_line)
            .tool_execution_notifications(notifications)
            .build()
    }
}

fn finding_result(archive: &str, finding: &Finding) -> SarifResult {
    let module = LogicalLocation::builder()
        .name(format!("{}/{}", finding.module_name, finding.location))
        .fully_qualified_name(format!("{archive}!/{}/{}", finding.module_name, finding.location))
        .kind("member")
        .build();
    SarifResult::builder()
        .rule_id(finding.rule_id.clone())
        .message(message(finding.message.clone()))
        .locations(vec![Location::builder().logical_locations(vec![module]).build()])
        .build()
}

fn notification(text: String) -> Notification {
    Notification::builder().message(message(text)).build()
}

fn message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}

fn path_to_uri(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
