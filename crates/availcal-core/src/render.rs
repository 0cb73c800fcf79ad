use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;
use unicode_width::UnicodeWidthStr;

use crate::busy::BusyDaySet;
use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayStatus {
    pub date: NaiveDate,
    pub weekday: Weekday,
    pub available: bool,
}

/// Every day in `[from, from + days)` falling on one of `weekdays`,
/// labelled by busy-set membership.
pub fn weekend_days(
    busy: &BusyDaySet,
    from: NaiveDate,
    days: u32,
    weekdays: &[Weekday],
) -> Vec<DayStatus> {
    from.iter_days()
        .take(days as usize)
        .filter(|date| weekdays.contains(&date.weekday()))
        .map(|date| DayStatus {
            date,
            weekday: date.weekday(),
            available: !busy.contains(date),
        })
        .collect()
}

pub fn parse_weekdays<S: AsRef<str>>(names: &[S]) -> anyhow::Result<Vec<Weekday>> {
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref().trim();
        let day = name
            .parse::<Weekday>()
            .map_err(|_| anyhow!("unknown weekday: {name}"))?;
        if !out.contains(&day) {
            out.push(day);
        }
    }
    if out.is_empty() {
        return Err(anyhow!("at least one weekday is required"));
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color")?.unwrap_or(true);
        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, days))]
    pub fn print_days(&mut self, days: &[DayStatus]) -> anyhow::Result<()> {
        let color = self.color && io::stdout().is_terminal();
        let out = io::stdout().lock();
        write_days(out, days, color)
    }

    #[tracing::instrument(skip(self, days))]
    pub fn print_days_json(&mut self, days: &[DayStatus]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        serde_json::to_writer_pretty(&mut out, days)?;
        writeln!(out)?;
        Ok(())
    }
}

fn write_days<W: Write>(writer: W, days: &[DayStatus], color: bool) -> anyhow::Result<()> {
    let headers = vec!["Date".to_string(), "Day".to_string(), "Status".to_string()];

    let rows = days
        .iter()
        .map(|day| {
            let status = if day.available {
                paint("Available", "32", color)
            } else {
                paint("Unavailable", "31", color)
            };
            vec![
                day.date.format("%Y-%m-%d").to_string(),
                day.date.format("%A").to_string(),
                status,
            ]
        })
        .collect();

    write_table(writer, headers, rows)
}

fn paint(text: &str, code: &str, color: bool) -> String {
    if !color {
        return text.to_string();
    }
    format!("\x1b[{code}m{text}\x1b[0m")
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
