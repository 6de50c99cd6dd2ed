//! Table rendering of accepted reports.
//!
//! A report is formatted into a single buffer first and then written under
//! the output lock in one `write_all`, so blocks from concurrent connections
//! never interleave. Formatting is pure; the same report always produces the
//! same bytes.
//!
//! ```text
//! United States - 1.2.3.4
//! ------------------------
//! Hop  IP                 Sent   Loss %   Last     Avg      Best     Worst    StdDev
//! 1    10.0.0.1           5      0.0      1.2      1.1      0.9      1.5      0.2
//!
//! ```

use std::{
    fmt::Write as _,
    io::{self, Write},
    sync::{Mutex, PoisonError},
};

use console::style;

use super::report::{Location, Report};

const RULE: &str = "------------------------";

pub struct TableRenderer<W: Write + Send> {
    out: Mutex<W>,
    colored: bool,
}

impl TableRenderer<io::Stdout> {
    pub fn stdout(colored: bool) -> Self {
        Self::new(io::stdout(), colored)
    }
}

impl<W: Write + Send> TableRenderer<W> {
    pub fn new(out: W, colored: bool) -> Self {
        Self {
            out: Mutex::new(out),
            colored,
        }
    }

    /// Formats a report as a complete table block.
    pub fn format(&self, report: &Report) -> String {
        let fallback = Location::default();
        let location = report.location.as_ref().unwrap_or(&fallback);

        let mut block = String::with_capacity(128 + 84 * report.hosts.len());
        let name = style(&location.country_name)
            .white()
            .bold()
            .force_styling(self.colored);

        // Writing into a String cannot fail.
        let _ = writeln!(block, "{} - {}", name, location.ip);
        let _ = writeln!(block, "{RULE}");
        let _ = writeln!(
            block,
            "{:<4} {:<18} {:<6} {:<8} {:<8} {:<8} {:<8} {:<8} {:<8}",
            "Hop", "IP", "Sent", "Loss %", "Last", "Avg", "Best", "Worst", "StdDev"
        );
        for host in &report.hosts {
            let _ = writeln!(
                block,
                "{:<4} {:<18} {:<6} {:<8.1} {:<8.1} {:<8.1} {:<8.1} {:<8.1} {:<8.1}",
                host.hop,
                host.ip,
                host.sent,
                host.lost_percent,
                host.last,
                host.avg,
                host.best,
                host.worst,
                host.std_dev
            );
        }
        block.push('\n');
        block
    }

    /// Writes one report as an uninterrupted block.
    pub fn render(&self, report: &Report) -> io::Result<()> {
        let block = self.format(report);
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(block.as_bytes())?;
        out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::{decode, Host};

    const US_REPORT: &[u8] = br#"{"location":{"country_code":"US","country_name":"United States","ip":"1.2.3.4"},"hosts":[{"ip":"10.0.0.1","hop-number":1,"sent":5,"lost-percent":0.0,"last":1.2,"avg":1.1,"best":0.9,"worst":1.5,"standard-dev":0.2}]}"#;

    fn plain() -> TableRenderer<Vec<u8>> {
        TableRenderer::new(Vec::new(), false)
    }

    #[test]
    fn test_format_layout() {
        let report = decode(US_REPORT).unwrap();
        let block = plain().format(&report);
        let lines: Vec<&str> = block.split('\n').collect();

        assert_eq!(lines[0], "United States - 1.2.3.4");
        assert_eq!(lines[1], "------------------------");
        assert!(lines[2].starts_with("Hop  IP                 Sent   Loss %   Last"));
        assert_eq!(lines[2].len(), 84);
        assert_eq!(
            lines[3].split_whitespace().collect::<Vec<_>>(),
            vec!["1", "10.0.0.1", "5", "0.0", "1.2", "1.1", "0.9", "1.5", "0.2"]
        );
        assert!(lines[3].starts_with("1    10.0.0.1           5      0.0      "));
        assert_eq!(lines[3].len(), 84);
        assert_eq!(lines[4], "");
        assert_eq!(lines[5], "");
        assert_eq!(lines.len(), 6);
        assert!(block.ends_with("\n\n"));
    }

    #[test]
    fn test_rows_follow_host_order() {
        let report = Report {
            hosts: vec![
                Host {
                    hop: 2,
                    ip: "b".into(),
                    ..Default::default()
                },
                Host {
                    hop: 1,
                    ip: "a".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let block = plain().format(&report);
        let rows: Vec<&str> = block.lines().skip(3).filter(|l| !l.is_empty()).collect();
        assert!(rows[0].starts_with("2    b "));
        assert!(rows[1].starts_with("1    a "));
    }

    #[test]
    fn test_one_decimal_place() {
        let report = Report {
            hosts: vec![Host {
                hop: 1,
                lost_percent: 33.333,
                avg: 12.06,
                ..Default::default()
            }],
            ..Default::default()
        };
        let block = plain().format(&report);
        assert!(block.contains("33.3     "));
        assert!(block.contains("12.1     "));
    }

    #[test]
    fn test_render_is_idempotent() {
        let report = decode(US_REPORT).unwrap();
        let renderer = plain();
        renderer.render(&report).unwrap();
        renderer.render(&report).unwrap();

        let out = String::from_utf8(renderer.into_inner()).unwrap();
        let (first, second) = out.split_at(out.len() / 2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_colored_header() {
        let report = decode(US_REPORT).unwrap();
        let block = TableRenderer::new(Vec::new(), true).format(&report);
        let header = block.lines().next().unwrap();
        assert!(header.contains("\u{1b}["));
        assert!(header.contains("United States"));
        assert!(header.ends_with(" - 1.2.3.4"));
    }
}
