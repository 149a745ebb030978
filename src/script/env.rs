//! Which environment variables cross into the chroot.

use anyhow::{bail, Context, Result};
use regex::Regex;

/// Characters allowed in a keep-variable pattern.
///
/// The patterns are spliced into a `sed -E` program inside single quotes,
/// so anything that could close the quote or the `s///` expression is out.
fn allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_.*+?[]{},|()-".contains(c)
}

/// A set of variable-name patterns (extended regular expressions).
///
/// A name is kept when it matches one of the patterns as a whole.
#[derive(Debug, Clone)]
pub struct EnvFilter {
    patterns: Vec<String>,
    regex: Regex,
}

impl EnvFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns: Vec<String> = patterns
            .iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        for pattern in &patterns {
            if let Some(bad) = pattern.chars().find(|c| !allowed(*c)) {
                bail!(
                    "Pattern '{}' contains unsupported character {:?}",
                    pattern,
                    bad
                );
            }
        }

        let regex = Regex::new(&format!("^(?:{})$", patterns.join("|")))
            .with_context(|| format!("Invalid variable pattern list: {}", patterns.join(" ")))?;

        Ok(Self { patterns, regex })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether variable `name` is kept.
    pub fn matches(&self, name: &str) -> bool {
        !self.is_empty() && self.regex.is_match(name)
    }

    /// `sed -E` program turning `export -p` output into `export NAME=...`
    /// lines for the kept variables. Handles both the POSIX `export` form
    /// and bash's `declare -x`.
    pub fn sed_program(&self) -> String {
        format!(
            "s/^(export|declare -x) (({})=.*)$/export \\2/p",
            self.patterns.join("|")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;
    use std::process::{Command, Stdio};

    fn defaults() -> EnvFilter {
        EnvFilter::new(&["ARCH", "CI", "QEMU_EMULATOR", "TRAVIS_.*"]).unwrap()
    }

    #[test]
    fn test_whole_name_must_match() {
        let filter = defaults();
        assert!(filter.matches("ARCH"));
        assert!(filter.matches("TRAVIS_BUILD_DIR"));
        assert!(!filter.matches("ARCHIVE"));
        assert!(!filter.matches("MY_CI"));
        assert!(!filter.matches("TRAVIS"));
    }

    /// The shell filters with `sed_program`; it must keep exactly the
    /// names `matches` accepts.
    #[rstest]
    #[case(&["ARCH", "CI", "QEMU_EMULATOR", "TRAVIS_.*"])]
    #[case(&["GITHUB_(SHA|REF)", "X?Y+"])]
    #[case(&["[A-C]{2}", "LC_.*"])]
    fn test_sed_program_agrees_with_matches(#[case] patterns: &[&str]) {
        let filter = EnvFilter::new(patterns).unwrap();
        let names = [
            "ARCH", "ARCHIVE", "CI", "MY_CI", "QEMU_EMULATOR", "TRAVIS", "TRAVIS_OS_NAME",
            "GITHUB_SHA", "GITHUB_REF", "GITHUB_REFS", "Y", "XYY", "XXY", "AB", "ABC",
            "LC_ALL", "LC", "PATH",
        ];
        let input: String = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                // both the POSIX and the bash spelling of `export -p`
                let prefix = if i % 2 == 0 { "export" } else { "declare -x" };
                format!("{prefix} {name}='v'\n")
            })
            .collect();

        let mut sed = Command::new("sed")
            .arg("-En")
            .arg(filter.sed_program())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        sed.stdin
            .take()
            .unwrap()
            .write_all(input.as_bytes())
            .unwrap();
        let output = sed.wait_with_output().unwrap();
        assert!(output.status.success());

        let kept: Vec<String> = String::from_utf8(output.stdout)
            .unwrap()
            .lines()
            .map(|l| l.strip_prefix("export ").unwrap().trim_end_matches("='v'").to_string())
            .collect();
        let expected: Vec<String> = names
            .iter()
            .filter(|n| filter.matches(n))
            .map(|n| n.to_string())
            .collect();
        assert_eq!(kept, expected);
        assert!(!expected.is_empty());
    }

    #[test]
    fn test_empty_list_matches_nothing() {
        let filter = EnvFilter::new::<&str>(&[]).unwrap();
        assert!(filter.is_empty());
        assert!(!filter.matches(""));
        assert!(!filter.matches("CI"));
    }

    #[test]
    fn test_rejects_characters_that_break_the_sed_program() {
        assert!(EnvFilter::new(&["FOO/BAR"]).is_err());
        assert!(EnvFilter::new(&["FOO'"]).is_err());
        assert!(EnvFilter::new(&["A\\B"]).is_err());
        assert!(EnvFilter::new(&["^CI$"]).is_err());
    }

    #[test]
    fn test_rejects_invalid_regex() {
        assert!(EnvFilter::new(&["FOO("]).is_err());
    }

    #[test]
    fn test_sed_program() {
        assert_eq!(
            EnvFilter::new(&["CI", "TRAVIS_.*"]).unwrap().sed_program(),
            "s/^(export|declare -x) ((CI|TRAVIS_.*)=.*)$/export \\2/p"
        );
    }
}
