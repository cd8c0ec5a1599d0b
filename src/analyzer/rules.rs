//! Offline inference backend: an ordered table of regex rules.

use async_trait::async_trait;
use regex::Regex;

use super::inference::{Inference, InferenceRequest};
use super::ToolError;
use crate::model::{DiagnosticCommand, Issue, PartialAnalysis, Severity};

struct RuleDef {
    issue_type: &'static str,
    pattern: &'static str,
    severity: Severity,
    description: &'static str,
    explanation: &'static str,
    suggestion: &'static str,
    command: Option<(&'static str, &'static str)>,
}

const RULES: &[RuleDef] = &[
    RuleDef {
        issue_type: "connection_failure",
        pattern: r"(?i)connection refused",
        severity: Severity::Error,
        description: "Connection to a remote endpoint was refused",
        explanation: "A client attempted to connect to a service that was not accepting connections on the target address and port.",
        suggestion: "Verify the target service is running and listening on the expected host and port, and that no firewall rule rejects the connection.",
        command: Some(("ss -tlnp", "List listening TCP sockets and their owning processes")),
    },
    RuleDef {
        issue_type: "timeout",
        pattern: r"(?i)\b(timed out|timeout expired|deadline exceeded)\b",
        severity: Severity::Warning,
        description: "An operation exceeded its time limit",
        explanation: "Requests or operations did not complete within their configured deadline, which usually points at an overloaded or unreachable dependency.",
        suggestion: "Check latency and load on the dependency that timed out and review the configured timeout values.",
        command: Some(("ping -c 4 <host>", "Measure round-trip latency to the remote host")),
    },
    RuleDef {
        issue_type: "out_of_memory",
        pattern: r"(?i)(out of memory|OutOfMemoryError|oom-killer|OOMKilled)",
        severity: Severity::Error,
        description: "A process ran out of memory",
        explanation: "The process or the kernel reported memory exhaustion; the affected process was likely killed or failed an allocation.",
        suggestion: "Inspect memory usage, raise the memory limit or heap size, and look for leaks in the affected process.",
        command: Some(("dmesg -T | grep -i -E 'oom|killed process'", "Show kernel OOM killer activity")),
    },
    RuleDef {
        issue_type: "disk_full",
        pattern: r"(?i)no space left on device",
        severity: Severity::Error,
        description: "A filesystem ran out of space",
        explanation: "Writes failed because the target filesystem has no free blocks or inodes left.",
        suggestion: "Free disk space or extend the volume, and rotate or prune large log and data files.",
        command: Some(("df -h && df -i", "Show block and inode usage per filesystem")),
    },
    RuleDef {
        issue_type: "permission_denied",
        pattern: r"(?i)permission denied|access denied",
        severity: Severity::Error,
        description: "An operation was denied by file or resource permissions",
        explanation: "A process lacked the permissions needed to access a file, socket, or resource.",
        suggestion: "Check ownership and mode of the resource and the user the process runs as.",
        command: Some(("ls -l <path>", "Show ownership and permissions of the resource")),
    },
    RuleDef {
        issue_type: "authentication_failure",
        pattern: r"(?i)(failed password|authentication failure|invalid user)",
        severity: Severity::Warning,
        description: "Failed authentication attempts were recorded",
        explanation: "Login attempts failed, either from mistyped credentials or from automated guessing against the service.",
        suggestion: "Review the source addresses of failed logins and consider rate limiting or blocking repeated offenders.",
        command: Some(("lastb | head -n 20", "Show the most recent failed login attempts")),
    },
    RuleDef {
        issue_type: "hdfs_block_problem",
        pattern: r"(?i)(corrupt|missing|under.?replicated) blocks?|blk_-?\d+.*(exception|error)",
        severity: Severity::Error,
        description: "HDFS reported missing, corrupt, or failing blocks",
        explanation: "One or more HDFS blocks could not be read or replicated, which risks data loss if replicas are not restored.",
        suggestion: "Run a filesystem check and make sure enough DataNodes are live to restore the replication factor.",
        command: Some(("hdfs fsck / -list-corruptfileblocks", "List files with corrupt blocks")),
    },
    RuleDef {
        issue_type: "datanode_unavailable",
        pattern: r"(?i)datanode.*\b(dead|lost|unreachable|shutting down)\b",
        severity: Severity::Error,
        description: "A DataNode became unavailable",
        explanation: "The NameNode lost contact with a DataNode, reducing available replicas.",
        suggestion: "Check the DataNode process and host health, and its network path to the NameNode.",
        command: Some(("hdfs dfsadmin -report", "Show live and dead DataNodes")),
    },
    RuleDef {
        issue_type: "unhandled_exception",
        pattern: r"\b[A-Z][A-Za-z0-9]*(Exception|Error):|Traceback \(most recent call last\)|panicked at",
        severity: Severity::Error,
        description: "The application raised an unhandled exception",
        explanation: "An exception propagated out of application code, usually aborting the current request or task.",
        suggestion: "Locate the first stack frame in application code and handle or fix the failing condition.",
        command: None,
    },
    RuleDef {
        issue_type: "error_entries",
        pattern: r"\b(ERROR|FATAL|CRITICAL)\b",
        severity: Severity::Error,
        description: "The log contains error-level entries",
        explanation: "Entries were logged at ERROR level or above.",
        suggestion: "Review the error entries in order and address the earliest one first; later errors are often consequences.",
        command: Some(("grep -n -E 'ERROR|FATAL|CRITICAL' <logfile> | head", "Show the first error-level entries")),
    },
    RuleDef {
        issue_type: "warning_entries",
        pattern: r"\b(WARN|WARNING)\b",
        severity: Severity::Info,
        description: "The log contains warning-level entries",
        explanation: "Entries were logged at WARN level; they do not indicate failure on their own.",
        suggestion: "Check whether the warnings recur or precede errors.",
        command: None,
    },
];

struct Rule {
    def: &'static RuleDef,
    pattern: Regex,
}

/// Pattern-rule inference; needs no network access.
pub struct RuleInference {
    rules: Vec<Rule>,
}

impl RuleInference {
    pub fn builtin() -> Result<Self, regex::Error> {
        let rules = RULES
            .iter()
            .map(|def| {
                Ok(Rule {
                    def,
                    pattern: Regex::new(def.pattern)?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    pub fn analyze_text(&self, content: &str) -> PartialAnalysis {
        let mut partial = PartialAnalysis::default();

        for rule in self.rules.iter().filter(|r| r.pattern.is_match(content)) {
            let def = rule.def;
            partial
                .issues
                .push(Issue::new(def.issue_type, def.description, def.severity));
            partial.explanations.push(def.explanation.to_string());
            partial.suggestions.push(def.suggestion.to_string());
            if let Some((command, description)) = def.command {
                partial.diagnostic_commands.push(DiagnosticCommand {
                    command: command.to_string(),
                    description: description.to_string(),
                });
            }
        }

        if partial.issues.is_empty() {
            partial.explanations.push(format!(
                "No known failure patterns were found in the {} analyzed lines.",
                content.lines().count()
            ));
        }

        partial.is_error = Some(partial.issues.iter().any(|i| i.severity == Severity::Error));
        partial
    }
}

#[async_trait]
impl Inference for RuleInference {
    async fn infer(&self, request: &InferenceRequest) -> Result<PartialAnalysis, ToolError> {
        Ok(self.analyze_text(&request.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use std::sync::Arc;

    fn engine() -> RuleInference {
        RuleInference::builtin().unwrap()
    }

    #[test]
    fn test_all_rules_compile() {
        assert_eq!(engine().rules.len(), RULES.len());
    }

    #[test]
    fn test_connection_refused() {
        let partial = engine().analyze_text("12:00 db client: connect to 10.0.0.5:5432 failed: Connection refused\n");
        assert_eq!(partial.issues.len(), 1);
        assert_eq!(partial.issues[0].issue_type, "connection_failure");
        assert_eq!(partial.issues[0].severity, Severity::Error);
        assert_eq!(partial.is_error, Some(true));
        assert_eq!(partial.suggestions.len(), 1);
        assert_eq!(partial.diagnostic_commands[0].command, "ss -tlnp");
    }

    #[test]
    fn test_clean_log_has_explanation_only() {
        let partial = engine().analyze_text("INFO heartbeat ok\nINFO heartbeat ok\n");
        assert!(partial.issues.is_empty());
        assert_eq!(partial.explanations.len(), 1);
        assert!(partial.explanations[0].contains("2 analyzed lines"));
        assert_eq!(partial.is_error, Some(false));
    }

    #[test]
    fn test_warnings_are_not_errors() {
        let partial = engine().analyze_text("WARN disk usage at 71%\n");
        assert_eq!(partial.issues[0].issue_type, "warning_entries");
        assert_eq!(partial.is_error, Some(false));
    }

    #[test]
    fn test_multiple_rules_in_table_order() {
        let partial = engine().analyze_text(
            "ERROR write failed: No space left on device\njava.lang.OutOfMemoryError: Java heap space\n",
        );
        let types: Vec<&str> = partial.issues.iter().map(|i| i.issue_type.as_str()).collect();
        assert_eq!(
            types,
            vec!["out_of_memory", "disk_full", "unhandled_exception", "error_entries"]
        );
    }

    #[tokio::test]
    async fn test_infer_uses_request_content() {
        let request = InferenceRequest {
            prompt: "ignored".to_string(),
            content: Arc::from("sshd[1]: Failed password for root"),
            category: Category::Security,
        };
        let partial = engine().infer(&request).await.unwrap();
        assert_eq!(partial.issues[0].issue_type, "authentication_failure");
    }
}
