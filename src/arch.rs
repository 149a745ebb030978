//! Architecture names and the emulation decision.
//!
//! Alpine, the kernel and QEMU each spell some architectures differently
//! (`x86` vs `i686`, `armhf` vs `armv7l`). Names are normalized into one
//! family token before any comparison.

use std::fmt;
use std::path::PathBuf;

/// Map an architecture name to its canonical family token.
///
/// `x86` and `i386`..`i686` become `i386`; `armhf` and `armv4`..`armv9`
/// (with any suffix, e.g. `armv7l`) become `arm`. Other names pass through.
pub fn normalize_arch(arch: &str) -> &str {
    if arch == "x86" || is_i386_family(arch) {
        return "i386";
    }
    if arch == "armhf" || is_armv_family(arch) {
        return "arm";
    }
    arch
}

fn is_i386_family(arch: &str) -> bool {
    let bytes = arch.as_bytes();
    bytes.len() == 4
        && bytes[0] == b'i'
        && (b'3'..=b'6').contains(&bytes[1])
        && &bytes[2..] == b"86"
}

fn is_armv_family(arch: &str) -> bool {
    arch.strip_prefix("armv")
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| ('4'..='9').contains(&c))
}

/// Host path of the user-mode interpreter for a normalized architecture.
pub fn interpreter_path(normalized: &str) -> PathBuf {
    PathBuf::from(format!("/usr/bin/{}", interpreter_name(normalized)))
}

/// `qemu-<arch>-static`
pub fn interpreter_name(normalized: &str) -> String {
    format!("qemu-{}-static", normalized)
}

/// Outcome of comparing the requested and host architectures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmulationPlan {
    /// Target binaries run natively.
    Native,
    /// Target binaries need the QEMU user-mode interpreter for `arch`.
    Emulated {
        /// Normalized target architecture, as used in QEMU file names.
        arch: String,
    },
}

impl EmulationPlan {
    /// Decide once per run whether emulation is needed.
    pub fn decide(requested: Option<&str>, host: &str) -> Self {
        match requested.map(str::trim).filter(|a| !a.is_empty()) {
            Some(target) if normalize_arch(target) != normalize_arch(host) => {
                EmulationPlan::Emulated {
                    arch: normalize_arch(target).to_string(),
                }
            }
            _ => EmulationPlan::Native,
        }
    }

    /// Interpreter path inside the target tree, if any.
    pub fn interpreter(&self) -> Option<PathBuf> {
        match self {
            EmulationPlan::Native => None,
            EmulationPlan::Emulated { arch } => Some(interpreter_path(arch)),
        }
    }
}

impl fmt::Display for EmulationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulationPlan::Native => write!(f, "native"),
            EmulationPlan::Emulated { arch } => write!(f, "emulated ({})", arch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("x86", "i386")]
    #[case("i386", "i386")]
    #[case("i486", "i386")]
    #[case("i586", "i386")]
    #[case("i686", "i386")]
    #[case("armhf", "arm")]
    #[case("armv4", "arm")]
    #[case("armv7", "arm")]
    #[case("armv7l", "arm")]
    #[case("armv9", "arm")]
    #[case("x86_64", "x86_64")]
    #[case("aarch64", "aarch64")]
    #[case("ppc64le", "ppc64le")]
    #[case("armv3", "armv3")]
    #[case("i786", "i786")]
    #[case("i86", "i86")]
    fn test_normalize_arch(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_arch(input), expected);
    }

    #[rstest]
    #[case("x86")]
    #[case("i686")]
    #[case("armhf")]
    #[case("armv7l")]
    #[case("s390x")]
    #[case("riscv64")]
    fn test_normalize_is_idempotent(#[case] input: &str) {
        let once = normalize_arch(input);
        assert_eq!(normalize_arch(once), once);
    }

    #[test]
    fn test_synonyms_share_a_token() {
        assert_eq!(normalize_arch("x86"), normalize_arch("i686"));
        assert_eq!(normalize_arch("armhf"), normalize_arch("armv7l"));
    }

    #[test]
    fn test_no_arch_means_native() {
        assert_eq!(EmulationPlan::decide(None, "x86_64"), EmulationPlan::Native);
        assert_eq!(
            EmulationPlan::decide(Some(""), "x86_64"),
            EmulationPlan::Native
        );
    }

    #[test]
    fn test_synonym_of_host_means_native() {
        assert_eq!(
            EmulationPlan::decide(Some("x86"), "i686"),
            EmulationPlan::Native
        );
        assert_eq!(
            EmulationPlan::decide(Some("armhf"), "armv7l"),
            EmulationPlan::Native
        );
    }

    #[test]
    fn test_foreign_arch_is_emulated() {
        let plan = EmulationPlan::decide(Some("armhf"), "x86_64");
        assert_eq!(
            plan,
            EmulationPlan::Emulated {
                arch: "arm".to_string()
            }
        );
        assert_eq!(
            plan.interpreter(),
            Some(PathBuf::from("/usr/bin/qemu-arm-static"))
        );
    }
}
