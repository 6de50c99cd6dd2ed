//! Country-of-origin filter.

use tracing::warn;

use super::report::Report;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// The report carries no country code.
    NoOrigin,
    /// The country code does not match the configured one.
    Filtered,
}

/// Accepts reports whose probe country matches the configured code.
///
/// The code is fixed at construction. An empty code accepts every report that
/// has an origin. Matching is exact and case-sensitive.
#[derive(Debug, Clone, Default)]
pub struct CountryFilter {
    country_code: String,
}

impl CountryFilter {
    pub fn new(country_code: impl Into<String>) -> Self {
        Self {
            country_code: country_code.into(),
        }
    }

    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Classifies a report. Logs a warning when the report has no origin.
    pub fn evaluate(&self, report: &Report) -> Verdict {
        let Some(origin) = report.origin() else {
            warn!("Discarding report with no country code");
            return Verdict::NoOrigin;
        };

        if !self.country_code.is_empty() && origin.country_code != self.country_code {
            return Verdict::Filtered;
        }
        Verdict::Accept
    }

    pub fn accepts(&self, report: &Report) -> bool {
        self.evaluate(report) == Verdict::Accept
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::core::report::Location;

    fn report(country_code: &str) -> Report {
        Report {
            location: Some(Location {
                country_code: country_code.into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_filter_accepts_any_origin() {
        let filter = CountryFilter::accept_all();
        for code in ["US", "FR", "de", "XX"] {
            assert_eq!(filter.evaluate(&report(code)), Verdict::Accept);
        }
    }

    #[test]
    fn test_matching_code_accepted() {
        assert!(CountryFilter::new("US").accepts(&report("US")));
    }

    #[test]
    #[traced_test]
    fn test_mismatch_is_silent() {
        let filter = CountryFilter::new("FR");
        assert_eq!(filter.evaluate(&report("US")), Verdict::Filtered);
        assert!(!logs_contain("no country code"));
    }

    #[test]
    fn test_match_is_case_sensitive() {
        assert_eq!(
            CountryFilter::new("us").evaluate(&report("US")),
            Verdict::Filtered
        );
    }

    #[test]
    #[traced_test]
    fn test_missing_origin_warns() {
        let filter = CountryFilter::accept_all();
        assert_eq!(filter.evaluate(&report("")), Verdict::NoOrigin);
        assert_eq!(filter.evaluate(&Report::default()), Verdict::NoOrigin);
        assert!(logs_contain("Discarding report with no country code"));
    }

    #[test]
    fn test_missing_origin_rejected_even_with_filter() {
        assert_eq!(
            CountryFilter::new("US").evaluate(&Report::default()),
            Verdict::NoOrigin
        );
    }
}
