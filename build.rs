use std::env;
use std::process::Command;

// CPU features the AVX2 micro-kernel needs. All must be present.
const REQUIRED: [Feature; 2] = [
    Feature {
        name: "avx2",
        sysctl_key: "hw.optional.avx2_0: 1",
    },
    Feature {
        name: "fma",
        sysctl_key: "hw.optional.fma: 1",
    },
];

struct Feature {
    name: &'static str,
    sysctl_key: &'static str,
}

// Feature detection trait to keep per-OS probing separate
trait CpuFeatureDetector {
    fn detect(&self, features: &[Feature]) -> bool;
    fn is_applicable(&self) -> bool;
}

// Linux CPU feature detector
struct LinuxDetector;
impl CpuFeatureDetector for LinuxDetector {
    fn detect(&self, features: &[Feature]) -> bool {
        match std::fs::read_to_string("/proc/cpuinfo") {
            Ok(cpuinfo) => {
                let flags: Vec<&str> = cpuinfo
                    .lines()
                    .find(|line| line.starts_with("flags"))
                    .map(|line| line.split_whitespace().collect())
                    .unwrap_or_default();
                features.iter().all(|feature| flags.contains(&feature.name))
            }
            Err(_) => false,
        }
    }

    fn is_applicable(&self) -> bool {
        cfg!(target_os = "linux")
    }
}

// macOS CPU feature detector
struct MacOSDetector;
impl CpuFeatureDetector for MacOSDetector {
    fn detect(&self, features: &[Feature]) -> bool {
        match Command::new("sysctl").args(["-a"]).output() {
            Ok(output) => {
                let contents = String::from_utf8_lossy(&output.stdout).to_lowercase();
                features
                    .iter()
                    .all(|feature| contents.contains(feature.sysctl_key))
            }
            Err(_) => false,
        }
    }

    fn is_applicable(&self) -> bool {
        cfg!(target_os = "macos")
    }
}

fn detectors() -> Vec<Box<dyn CpuFeatureDetector>> {
    vec![Box::new(LinuxDetector), Box::new(MacOSDetector)]
}

fn main() {
    println!("cargo::rustc-check-cfg=cfg(avx2)");
    println!("cargo::rustc-check-cfg=cfg(fallback)");
    println!("cargo:rerun-if-changed=build.rs");

    // Only probe the host when building for it
    let host = env::var("HOST").unwrap_or_default();
    let target = env::var("TARGET").unwrap_or_default();
    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();

    let has_avx2 = host == target
        && target_arch == "x86_64"
        && detectors()
            .iter()
            .find(|detector| detector.is_applicable())
            .is_some_and(|detector| detector.detect(&REQUIRED));

    let cfg_flag = if has_avx2 { "avx2" } else { "fallback" };
    println!("cargo:rustc-cfg={cfg_flag}");
}
