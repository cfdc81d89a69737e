//! Common functionality.

use byte_unit::Byte;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

pub mod digest;
pub mod io;
pub mod s3;

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// Helper to print the current memory resident set size via `tracing`.
pub fn trace_rss_now() {
    let me = procfs::process::Process::myself().unwrap();
    let page_size = procfs::page_size();
    tracing::debug!(
        "RSS now: {}",
        Byte::from_u64(me.stat().unwrap().rss * page_size)
            .get_appropriate_unit(byte_unit::UnitType::Binary)
    );
}

/// The knowledge sources that the worker can transform and load.
#[derive(
    serde::Serialize,
    serde::Deserialize,
    clap::ValueEnum,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SourceName {
    /// Clinical Interpretation of Variants in Cancer.
    Civic,
    /// Molecular Oncology Almanac.
    Moa,
}

impl SourceName {
    /// Provide the source name with natural print casing.
    pub fn as_print_case(&self) -> &'static str {
        match self {
            SourceName::Civic => "CIViC",
            SourceName::Moa => "MOA",
        }
    }
}

/// Sanitize a concept name for use in an identifier local part.
///
/// Spaces become underscores; any character outside `[A-Za-z0-9.,_-]` is
/// dropped so the result stays CURIE-safe.
pub fn sanitize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ',' | '_' | '-'))
        .collect()
}

/// Return the version of the `metakb-worker` crate and `x.y.z` in tests.
pub fn worker_version() -> &'static str {
    if cfg!(test) {
        "x.y.z"
    } else {
        env!("CARGO_PKG_VERSION")
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    #[test]
    fn trace_rss_now_smoke() {
        super::trace_rss_now();
    }

    #[rstest::rstest]
    #[case(crate::common::SourceName::Civic, "civic", "CIViC")]
    #[case(crate::common::SourceName::Moa, "moa", "MOA")]
    fn source_name_display(
        #[case] source: super::SourceName,
        #[case] expected: &str,
        #[case] print_case: &str,
    ) {
        assert_eq!(expected, source.to_string());
        assert_eq!(print_case, source.as_print_case());
    }

    #[rstest::rstest]
    #[case("T-Cell Acute Lymphoid Leukemia", "T-Cell_Acute_Lymphoid_Leukemia")]
    #[case("Mito-CP", "Mito-CP")]
    #[case("5-Fluorouracil (5-FU)", "5-Fluorouracil_5-FU")]
    #[case("  BRAF ", "BRAF")]
    fn sanitize_name(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(expected, super::sanitize_name(name));
    }

    #[test]
    fn worker_version_in_tests() {
        assert_eq!("x.y.z", super::worker_version());
    }
}
