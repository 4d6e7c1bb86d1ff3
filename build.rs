use std::cmp::Ordering;
use std::env;
use std::fs;
use std::path::PathBuf;

// Lane backends the crate can compile its 4 x f32 register against
#[derive(PartialEq, Eq, Debug)]
struct CpuFeature {
    name: &'static str,
    target_arch: &'static str,
    cfg_flag: &'static str,
    detected: bool,
}

impl CpuFeature {
    // Define priority order between CPU Features (Lowest number == Highest Priority)
    fn priority(&self) -> usize {
        match self.name {
            "sse" => 0,
            "neon" => 1,
            _ => usize::MAX, // lowest priority by default
        }
    }

    fn features() -> Vec<CpuFeature> {
        vec![
            CpuFeature {
                name: "sse",
                target_arch: "x86_64",
                cfg_flag: "sse",
                detected: false,
            },
            CpuFeature {
                name: "neon",
                target_arch: "aarch64",
                cfg_flag: "neon",
                detected: false,
            },
        ]
    }
}

impl Ord for CpuFeature {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority().cmp(&other.priority())
    }
}

impl PartialOrd for CpuFeature {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct PlatformDetector;
impl PlatformDetector {
    // Cargo exposes the features enabled for the *target*, so cross builds
    // select the backend of the machine the code will run on.
    fn detect_cpu_features(features: &mut [CpuFeature]) {
        let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
        let enabled = env::var("CARGO_CFG_TARGET_FEATURE").unwrap_or_default();
        let enabled: Vec<&str> = enabled.split(',').collect();

        for feature in features.iter_mut() {
            feature.detected = feature.target_arch == arch && enabled.contains(&feature.name);
        }
    }

    fn apply(features: &mut [CpuFeature]) {
        features.sort();

        // if no feature is detected, use the portable implementation
        let cfg_flag = features
            .iter()
            .find(|cpu_feature| cpu_feature.detected)
            .map(|cpu_feature| cpu_feature.cfg_flag)
            .unwrap_or("fallback");

        println!("cargo:rustc-cfg={cfg_flag}");

        println!("cargo::rustc-check-cfg=cfg(sse)");
        println!("cargo::rustc-check-cfg=cfg(neon)");
        println!("cargo::rustc-check-cfg=cfg(fallback)");
    }
}

// Kernel image layout. Keep in sync with `src/coproc/image.rs` and
// `src/kernel.rs`.
const IMAGE_MAGIC: [u8; 4] = *b"\x7fVXI";
const IMAGE_VERSION: u16 = 1;
const HEADER_SIZE: usize = 16;
const SEGMENT_HEADER_SIZE: usize = 16;

const SEGMENT_TEXT: u8 = 1;
const SEGMENT_DATA: u8 = 2;
const SEGMENT_BSS: u8 = 3;

const ENTRY_SYMBOL: &str = "vecmath_main";
const TEXT_LSA: u32 = 0x0000;
const TEXT_SIZE: u32 = 32;
const PARAMS_LSA: u32 = 0x0080;
const JOB_LSA: u32 = 0x0100;
const JOB_SIZE: u32 = 128;
const DMA_TAG: u32 = 1;

struct Segment {
    kind: u8,
    lsa: u32,
    mem_size: u32,
    data: Vec<u8>,
}

fn kernel_image() -> Vec<u8> {
    let mut trampoline = ENTRY_SYMBOL.as_bytes().to_vec();
    trampoline.resize(TEXT_SIZE as usize, 0);

    let mut params = Vec::with_capacity(16);
    for word in [DMA_TAG, JOB_LSA, 0, 0] {
        params.extend_from_slice(&word.to_le_bytes());
    }

    let segments = [
        Segment {
            kind: SEGMENT_TEXT,
            lsa: TEXT_LSA,
            mem_size: TEXT_SIZE,
            data: trampoline,
        },
        Segment {
            kind: SEGMENT_DATA,
            lsa: PARAMS_LSA,
            mem_size: params.len() as u32,
            data: params,
        },
        Segment {
            kind: SEGMENT_BSS,
            lsa: JOB_LSA,
            mem_size: JOB_SIZE,
            data: Vec::new(),
        },
    ];

    let payload: usize = segments.iter().map(|s| s.data.len()).sum();
    let total = HEADER_SIZE + SEGMENT_HEADER_SIZE * segments.len() + payload;

    let mut image = Vec::with_capacity(total);
    image.extend_from_slice(&IMAGE_MAGIC);
    image.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
    image.extend_from_slice(&(segments.len() as u16).to_le_bytes());
    image.extend_from_slice(&TEXT_LSA.to_le_bytes());
    image.extend_from_slice(&(total as u32).to_le_bytes());

    for segment in &segments {
        image.push(segment.kind);
        image.extend_from_slice(&[0; 3]);
        image.extend_from_slice(&segment.lsa.to_le_bytes());
        image.extend_from_slice(&(segment.data.len() as u32).to_le_bytes());
        image.extend_from_slice(&segment.mem_size.to_le_bytes());
    }
    for segment in &segments {
        image.extend_from_slice(&segment.data);
    }

    image
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let mut features = CpuFeature::features();
    PlatformDetector::detect_cpu_features(&mut features);
    PlatformDetector::apply(&mut features);

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    fs::write(out_dir.join("vecmath.img"), kernel_image()).expect("Failed to write kernel image");
}
