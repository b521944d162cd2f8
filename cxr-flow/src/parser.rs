//! Splits report text into the four canonical sections.
//!
//! Sections are found by their bold markers (`**Findings:**` etc.) in the
//! fixed order Patient Information, Findings, Impression, Plan. A section
//! whose marker is missing is empty, never an error.

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::FlowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportSection {
    #[serde(rename = "Patient Information")]
    PatientInformation,
    Findings,
    Impression,
    Plan,
}

impl ReportSection {
    /// Canonical order.
    pub const ALL: [ReportSection; 4] = [
        ReportSection::PatientInformation,
        ReportSection::Findings,
        ReportSection::Impression,
        ReportSection::Plan,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ReportSection::PatientInformation => "Patient Information",
            ReportSection::Findings => "Findings",
            ReportSection::Impression => "Impression",
            ReportSection::Plan => "Plan",
        }
    }

    pub fn marker(&self) -> String {
        format!("**{}:**", self.name())
    }

    fn index(&self) -> usize {
        match self {
            ReportSection::PatientInformation => 0,
            ReportSection::Findings => 1,
            ReportSection::Impression => 2,
            ReportSection::Plan => 3,
        }
    }
}

impl fmt::Display for ReportSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReportSection {
    type Err = FlowError;

    /// Accepts the display name or its snake_case form, ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', " ");
        ReportSection::ALL
            .into_iter()
            .find(|section| section.name().to_lowercase() == normalized)
            .ok_or_else(|| FlowError::InvalidInput(format!("unknown report section: {}", s)))
    }
}

/// Report text split into the four sections, in canonical order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedReport {
    sections: [String; 4],
}

impl ParsedReport {
    pub fn get(&self, section: ReportSection) -> &str {
        &self.sections[section.index()]
    }

    pub fn set(&mut self, section: ReportSection, content: impl Into<String>) {
        self.sections[section.index()] = content.into();
    }

    pub fn iter(&self) -> impl Iterator<Item = (ReportSection, &str)> {
        ReportSection::ALL
            .into_iter()
            .map(move |section| (section, self.get(section)))
    }

    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|s| s.is_empty())
    }

    /// Editable form: `"{name}\n{content}"` blocks joined by blank lines.
    ///
    /// Lossy: the `**Name:**` markers are not restored, so parsing the result
    /// again yields an empty report.
    pub fn assemble(&self) -> String {
        self.iter()
            .map(|(section, content)| format!("{}\n{}", section.name(), content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Like [`assemble`](Self::assemble) but with the bold markers restored,
    /// so `parse(&report.to_markdown()) == report`.
    pub fn to_markdown(&self) -> String {
        self.iter()
            .map(|(section, content)| format!("{}\n{}", section.marker(), content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl Serialize for ParsedReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(ReportSection::ALL.len()))?;
        for (section, content) in self.iter() {
            map.serialize_entry(section.name(), content)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ParsedReport {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = HashMap::<String, String>::deserialize(deserializer)?;
        let mut report = ParsedReport::default();
        for (name, content) in raw {
            let section = name.parse::<ReportSection>().map_err(serde::de::Error::custom)?;
            report.set(section, content);
        }
        Ok(report)
    }
}

/// Parses `report` into its four sections.
pub fn parse(report: &str) -> ParsedReport {
    let mut parsed = ParsedReport::default();

    for (i, section) in ReportSection::ALL.iter().enumerate() {
        let marker = section.marker();
        let Some(position) = report.find(&marker) else {
            continue;
        };

        let rest = &report[position + marker.len()..];
        let end = match ReportSection::ALL.get(i + 1) {
            Some(next) => rest.find(&next.marker()).unwrap_or(rest.len()),
            None => rest.len(),
        };

        parsed.set(*section, rest[..end].trim());
    }

    parsed
}
