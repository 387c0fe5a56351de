//! Parsing of the external coverage agent's XML report.
//!
//! When code-coverage feedback is enabled, each `check` regenerates an XML
//! report (`<report><package name><sourcefile name><line nr ci .../>`) and
//! folds every line with covered instructions into the guider's
//! `covered_lines` set.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// How to regenerate and locate the agent's XML report.
#[derive(Debug, Clone)]
pub struct SourceCoverageConfig {
    /// Program and arguments that regenerate the XML report
    /// (e.g. `java -jar jacococli.jar report ... --xml <out>`).
    pub report_command: Vec<String>,
    /// Where the regenerated report lands.
    pub xml_path: PathBuf,
}

/// Root of the agent's XML report.
#[derive(Debug, Deserialize)]
pub struct Report {
    #[serde(rename = "package", default)]
    pub packages: Vec<Package>,
}

#[derive(Debug, Deserialize)]
pub struct Package {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "sourcefile", default)]
    pub sourcefiles: Vec<SourceFile>,
}

#[derive(Debug, Deserialize)]
pub struct SourceFile {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "line", default)]
    pub lines: Vec<Line>,
}

#[derive(Debug, Deserialize)]
pub struct Line {
    /// Line number.
    #[serde(rename = "@nr")]
    pub nr: u32,
    /// Missed instructions.
    #[serde(rename = "@mi", default)]
    pub mi: u32,
    /// Covered instructions.
    #[serde(rename = "@ci", default)]
    pub ci: u32,
    /// Missed branches.
    #[serde(rename = "@mb", default)]
    pub mb: u32,
    /// Covered branches.
    #[serde(rename = "@cb", default)]
    pub cb: u32,
}

/// Parse an XML coverage report.
pub fn parse_report(xml: &str) -> Result<Report, quick_xml::DeError> {
    quick_xml::de::from_str(xml)
}

/// Fold a report into `covered`, returning how many `(file, line)` pairs
/// were previously unseen. A line counts as covered when `ci > 0`.
pub fn update_coverage(
    report: &Report,
    covered: &mut HashMap<String, HashSet<u32>>,
) -> usize {
    let mut new_lines = 0;
    for package in &report.packages {
        for source in &package.sourcefiles {
            let path = format!("{}/{}", package.name, source.name);
            let lines = covered.entry(path).or_default();
            for line in &source.lines {
                if line.ci > 0 && lines.insert(line.nr) {
                    new_lines += 1;
                }
            }
        }
    }
    new_lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <report name="fuzz">
            <package name="raft/core">
                <sourcefile name="Log.java">
                    <line nr="10" mi="0" ci="3" mb="0" cb="0"/>
                    <line nr="11" mi="2" ci="0" mb="0" cb="0"/>
                    <line nr="12" mi="0" ci="1" mb="1" cb="1"/>
                </sourcefile>
                <sourcefile name="Node.java">
                    <line nr="5" mi="0" ci="7"/>
                </sourcefile>
            </package>
        </report>
    "#;

    #[test]
    fn parse_sample_report() {
        let report = parse_report(SAMPLE).unwrap();
        assert_eq!(report.packages.len(), 1);
        assert_eq!(report.packages[0].name, "raft/core");
        assert_eq!(report.packages[0].sourcefiles.len(), 2);
        assert_eq!(report.packages[0].sourcefiles[0].lines[0].ci, 3);
        assert_eq!(report.packages[0].sourcefiles[0].lines[1].ci, 0);
    }

    #[test]
    fn update_counts_only_covered_lines() {
        let report = parse_report(SAMPLE).unwrap();
        let mut covered = HashMap::new();

        let new_lines = update_coverage(&report, &mut covered);
        assert_eq!(new_lines, 3); // 10, 12 in Log.java + 5 in Node.java

        assert!(covered["raft/core/Log.java"].contains(&10));
        assert!(!covered["raft/core/Log.java"].contains(&11));
        assert!(covered["raft/core/Node.java"].contains(&5));
    }

    #[test]
    fn update_is_monotone() {
        let report = parse_report(SAMPLE).unwrap();
        let mut covered = HashMap::new();

        assert_eq!(update_coverage(&report, &mut covered), 3);
        // Same report again: nothing new.
        assert_eq!(update_coverage(&report, &mut covered), 0);
        let total: usize = covered.values().map(HashSet::len).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn empty_report_parses() {
        let report = parse_report(r#"<report name="empty"></report>"#).unwrap();
        assert!(report.packages.is_empty());
        let mut covered = HashMap::new();
        assert_eq!(update_coverage(&report, &mut covered), 0);
    }
}
