// Copyright (c) The flakewatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reading test results from JUnit XML reports.
//!
//! A report is flattened into class-level and case-level results:
//!
//! * every `<testcase>` yields a case result with identity `classname::name`
//!   (or just `name` without a classname)
//! * every distinct classname yields a class result, listed just before its
//!   cases, whose fail count is the sum of its cases' fail counts
//!
//! Class results are aggregated over every report of a build, so a class whose
//! cases are split across several files still gets a single result.

use crate::{
    errors::JunitReadError,
    test_result::{BuildResults, TestResult, TestStatus},
};
use camino::Utf8Path;
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};
use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
};
use tracing::{debug, warn};

/// The test cases read from one or more JUnit reports.
///
/// Class-level results are only computed when converting to
/// [`BuildResults`], after all of a build's reports have been merged.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct JunitReport {
    cases: Vec<PendingCase>,
}

impl JunitReport {
    /// Reads and parses the report at `path`.
    pub fn from_path(path: &Utf8Path) -> Result<Self, JunitReadError> {
        let input = std::fs::read_to_string(path).map_err(|error| JunitReadError::Read {
            path: path.to_owned(),
            error,
        })?;
        let report: Self = input.parse().map_err(|error: JunitReadError| error.with_path(path))?;
        debug!(%path, case_count = report.cases.len(), "read JUnit report");
        Ok(report)
    }

    /// Returns the number of test cases read.
    pub fn case_count(&self) -> usize {
        self.cases.len()
    }

    /// Adds the test cases from `other`, typically another report from the
    /// same build.
    pub fn merge(&mut self, other: JunitReport) {
        self.cases.extend(other.cases);
    }

    /// Flattens the cases into class- and case-level results.
    pub fn to_results(&self) -> BuildResults {
        self.clone().into_results()
    }

    /// Consumes self, flattening the cases into class- and case-level
    /// results.
    pub fn into_results(self) -> BuildResults {
        let mut builder = ResultsBuilder::default();
        for case in self.cases {
            builder.push(case);
        }
        builder.finish()
    }
}

impl FromStr for JunitReport {
    type Err = JunitReadError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut reader = Reader::from_str(input);
        reader.config_mut().trim_text(true);

        let mut cases = Vec::new();
        let mut root_seen = false;
        let mut current: Option<PendingCase> = None;

        loop {
            let event = reader.read_event().map_err(xml_error)?;
            match &event {
                Event::Start(start) | Event::Empty(start) => {
                    let is_empty = matches!(event, Event::Empty(_));
                    let local_name = start.local_name();
                    let element = local_name.as_ref();

                    if !root_seen {
                        if !matches!(element, b"testsuites" | b"testsuite") {
                            return Err(malformed(format!(
                                "expected a <testsuites> or <testsuite> root element, found <{}>",
                                String::from_utf8_lossy(element),
                            )));
                        }
                        root_seen = true;
                        continue;
                    }

                    match element {
                        b"testcase" => {
                            if current.is_some() {
                                return Err(malformed("nested <testcase> element"));
                            }
                            let case = PendingCase::new(start)?;
                            if is_empty {
                                cases.push(case);
                            } else {
                                current = Some(case);
                            }
                        }
                        b"failure" | b"error" => {
                            if let Some(case) = &mut current {
                                case.status = TestStatus::Failed { fail_count: 1 };
                            }
                        }
                        b"skipped" => {
                            if let Some(case) = &mut current {
                                // A failure takes precedence over a skip.
                                if !matches!(case.status, TestStatus::Failed { .. }) {
                                    case.status = TestStatus::Skipped;
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Event::End(end) => {
                    if end.local_name().as_ref() == b"testcase"
                        && let Some(case) = current.take()
                    {
                        cases.push(case);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !root_seen {
            return Err(malformed("no root element found"));
        }
        if current.is_some() {
            return Err(malformed("unterminated <testcase> element"));
        }

        Ok(Self { cases })
    }
}

/// Reads and merges every report for one build.
pub fn read_reports<'a>(
    paths: impl IntoIterator<Item = &'a Utf8Path>,
) -> Result<BuildResults, JunitReadError> {
    let mut report = JunitReport::default();
    for path in paths {
        report.merge(JunitReport::from_path(path)?);
    }
    Ok(report.into_results())
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct PendingCase {
    classname: Option<String>,
    name: String,
    status: TestStatus,
}

impl PendingCase {
    fn new(start: &BytesStart<'_>) -> Result<Self, JunitReadError> {
        let name = attribute(start, "name")?
            .ok_or_else(|| malformed("<testcase> is missing the `name` attribute"))?;
        let classname = attribute(start, "classname")?.filter(|classname| !classname.is_empty());
        Ok(Self {
            classname,
            name,
            status: TestStatus::Passed,
        })
    }

    fn into_result(self) -> TestResult {
        let id = match &self.classname {
            Some(classname) => format!("{classname}::{}", self.name),
            None => self.name,
        };
        TestResult::new(id.as_str(), self.status)
    }
}

#[derive(Debug)]
enum Entry {
    Class { name: String, cases: Vec<TestResult> },
    Case(TestResult),
}

#[derive(Debug, Default)]
struct ResultsBuilder {
    entries: Vec<Entry>,
    class_indexes: HashMap<String, usize>,
}

impl ResultsBuilder {
    fn push(&mut self, case: PendingCase) {
        let Some(classname) = case.classname.clone() else {
            self.entries.push(Entry::Case(case.into_result()));
            return;
        };

        let index = *self
            .class_indexes
            .entry(classname.clone())
            .or_insert_with(|| {
                self.entries.push(Entry::Class {
                    name: classname,
                    cases: Vec::new(),
                });
                self.entries.len() - 1
            });
        if let Entry::Class { cases, .. } = &mut self.entries[index] {
            cases.push(case.into_result());
        }
    }

    fn finish(self) -> BuildResults {
        let class_names: HashSet<_> = self.class_indexes.into_keys().collect();
        let mut results = BuildResults::new();
        for entry in self.entries {
            match entry {
                Entry::Class { name, cases } => {
                    results.push(TestResult::new(name.as_str(), class_status(&cases)));
                    for case in cases {
                        results.push(case);
                    }
                }
                // A case without a classname shares its identity with any class
                // of the same name. The class result is kept.
                Entry::Case(case) if class_names.contains(case.id.as_str()) => {
                    warn!(
                        "ignoring test case `{}`: its name is also used as a classname",
                        case.id,
                    );
                }
                Entry::Case(case) => results.push(case),
            }
        }
        results
    }
}

fn class_status(cases: &[TestResult]) -> TestStatus {
    let fail_count: usize = cases.iter().map(TestResult::fail_count).sum();
    if fail_count > 0 {
        TestStatus::Failed { fail_count }
    } else if cases.iter().all(|case| case.status == TestStatus::Skipped) {
        TestStatus::Skipped
    } else {
        TestStatus::Passed
    }
}

fn attribute(start: &BytesStart<'_>, name: &str) -> Result<Option<String>, JunitReadError> {
    let Some(attr) = start
        .try_get_attribute(name)
        .map_err(|error| xml_error(error.into()))?
    else {
        return Ok(None);
    };
    let value = attr.unescape_value().map_err(xml_error)?;
    Ok(Some(value.into_owned()))
}

fn xml_error(error: quick_xml::Error) -> JunitReadError {
    JunitReadError::Xml { path: None, error }
}

fn malformed(message: impl Into<String>) -> JunitReadError {
    JunitReadError::Malformed {
        path: None,
        message: message.into(),
    }
}
