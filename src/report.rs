//! Text rendering of offload results.

use std::fmt::Write;

use crate::coproc::GroupExit;
use crate::job::VecmathResult;
use crate::offload::OffloadStatus;

pub const PANEL_HEADER: &str = "--- Co-processor Vector Math ---";
pub const UNAVAILABLE: &str = "Co-processor: not available";

fn lanes(values: &[f32; 4]) -> String {
    format!(
        "({:.1}, {:.1}, {:.1}, {:.1})",
        values[0], values[1], values[2], values[3]
    )
}

/// The result panel: inputs, squares, dot product and magnitude, or the
/// unavailable line with its reason.
pub fn render_panel(status: &OffloadStatus) -> String {
    let mut out = String::new();
    match status {
        OffloadStatus::Available(result) => {
            let _ = writeln!(out, "{PANEL_HEADER}");
            let _ = writeln!(out, "Input:  {}", lanes(&result.input));
            let _ = writeln!(out, "Output: {}", lanes(&result.output));
            let _ = writeln!(out, "Dot product: {:.2}", result.dot_product);
            let _ = writeln!(out, "Magnitude:   {:.2}", result.magnitude);
        }
        OffloadStatus::Unavailable(reason) => {
            let _ = writeln!(out, "{UNAVAILABLE}");
            let _ = writeln!(out, "  ({reason})");
        }
    }
    out
}

/// The panel of one interactive frame.
pub fn render_frame(status: &OffloadStatus, frame: u64) -> String {
    format!("Frame: {frame}\n{}", render_panel(status))
}

pub fn render_exit(exit: &GroupExit) -> String {
    format!("Group exit: cause={}, status={}", exit.cause, exit.status)
}

/// Compares the co-processor's dot product with a host-side sum of squares.
pub fn render_verification(result: &VecmathResult) -> String {
    let expected: f32 = result.input.iter().map(|x| x * x).sum();
    let terms: Vec<String> = result.input.iter().map(|x| format!("{x:.1}^2")).collect();
    format!(
        "Verification: {} = {:.1} (expected: {:.1})",
        terms.join(" + "),
        result.dot_product,
        expected
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> VecmathResult {
        VecmathResult {
            input: [1.0, 2.0, 3.0, 4.0],
            output: [1.0, 4.0, 9.0, 16.0],
            dot_product: 30.0,
            magnitude: 5.4765,
        }
    }

    #[test]
    fn test_available_panel() {
        let panel = render_panel(&OffloadStatus::Available(reference()));
        let lines: Vec<&str> = panel.lines().collect();
        assert_eq!(
            lines,
            [
                PANEL_HEADER,
                "Input:  (1.0, 2.0, 3.0, 4.0)",
                "Output: (1.0, 4.0, 9.0, 16.0)",
                "Dot product: 30.00",
                "Magnitude:   5.48",
            ]
        );
    }

    #[test]
    fn test_unavailable_panel_has_no_values() {
        let panel = render_panel(&OffloadStatus::Unavailable("no free units".into()));
        assert!(panel.starts_with(UNAVAILABLE));
        assert!(panel.contains("no free units"));
        assert!(!panel.contains("Dot product"));
    }

    #[test]
    fn test_frame_and_verification() {
        let frame = render_frame(&OffloadStatus::Available(reference()), 3);
        assert!(frame.starts_with("Frame: 3\n"));
        assert_eq!(
            render_verification(&reference()),
            "Verification: 1.0^2 + 2.0^2 + 3.0^2 + 4.0^2 = 30.0 (expected: 30.0)"
        );
    }
}
