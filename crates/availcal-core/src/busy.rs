use std::collections::BTreeSet;
use std::collections::btree_set;

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// Calendar days occupied by at least one event.
///
/// Kept in a `BTreeSet` so iteration, string output and JSON output are
/// always in ascending order regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusyDaySet {
    days: BTreeSet<NaiveDate>,
}

impl BusyDaySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the day was not already present.
    pub fn insert(&mut self, day: NaiveDate) -> bool {
        self.days.insert(day)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.days.contains(&day)
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, NaiveDate> {
        self.days.iter()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.days
            .iter()
            .map(|day| day.format(DAY_FORMAT).to_string())
            .collect()
    }

    pub fn from_strings<I, S>(values: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Self::new();
        for value in values {
            out.insert(parse_day(value.as_ref())?);
        }
        Ok(out)
    }

    /// Pretty JSON with a four-space indent, the layout of the published
    /// `data.json` snapshots.
    pub fn to_json_pretty(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)
            .context("failed serializing busy days")?;
        String::from_utf8(buf).context("serialized busy days were not UTF-8")
    }
}

fn parse_day(raw: &str) -> anyhow::Result<NaiveDate> {
    let trimmed = raw.trim();
    // chrono accepts unpadded fields, the snapshot format does not
    if trimmed.len() != 10 {
        return Err(anyhow!("expected YYYY-MM-DD, got: {raw}"));
    }
    NaiveDate::parse_from_str(trimmed, DAY_FORMAT)
        .with_context(|| format!("expected YYYY-MM-DD, got: {raw}"))
}

impl Extend<NaiveDate> for BusyDaySet {
    fn extend<T: IntoIterator<Item = NaiveDate>>(&mut self, iter: T) {
        self.days.extend(iter);
    }
}

impl FromIterator<NaiveDate> for BusyDaySet {
    fn from_iter<T: IntoIterator<Item = NaiveDate>>(iter: T) -> Self {
        Self {
            days: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a BusyDaySet {
    type Item = &'a NaiveDate;
    type IntoIter = btree_set::Iter<'a, NaiveDate>;

    fn into_iter(self) -> Self::IntoIter {
        self.days.iter()
    }
}

impl Serialize for BusyDaySet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(
            self.days
                .iter()
                .map(|day| day.format(DAY_FORMAT).to_string()),
        )
    }
}

impl<'de> Deserialize<'de> for BusyDaySet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Vec::<String>::deserialize(deserializer)?;
        Self::from_strings(&raw).map_err(serde::de::Error::custom)
    }
}
