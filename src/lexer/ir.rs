//! IR lexer (spec §4.3).
//!
//! Tracks two independent line counters while scanning: the user's
//! source-line (updated only by `.loc ... inlined_at N M P` directives) and
//! the raw IR-line (set by a plain `.loc X Y Z` directive for the next
//! instruction, otherwise incremented once per non-directive, non-label
//! line). Everything that is not a kernel header, a location directive, or
//! a label becomes an instruction record -- including branches and the
//! atomic opcodes the detectors care about.

use indexmap::IndexMap;

/// A label definition in the IR: the user source-line and IR-line of the
/// first instruction following it.
#[derive(Debug, Clone)]
pub struct IrLabel {
    pub name: String,
    pub user_source_line: u32,
    pub ir_line: u32,
}

/// One non-directive, non-label IR line.
#[derive(Debug, Clone)]
pub struct IrInstruction {
    pub user_source_line: u32,
    pub ir_line: u32,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct KernelIr {
    pub instructions: Vec<IrInstruction>,
    pub labels: IndexMap<String, IrLabel>,
}

pub fn lex(text: &str) -> IndexMap<String, KernelIr> {
    let mut kernels: IndexMap<String, KernelIr> = IndexMap::new();
    let mut current_kernel: Option<String> = None;
    let mut user_line: u32 = 0;
    let mut ir_line: u32 = 0;
    let mut pending_labels: Vec<String> = Vec::new();

    for raw_line in text.lines() {
        if let Some(name) = parse_kernel_header(raw_line) {
            if name.is_empty() {
                log::debug!("skipping IR kernel header with empty name");
                current_kernel = None;
            } else {
                kernels.entry(name.clone()).or_default();
                current_kernel = Some(name);
            }
            user_line = 0;
            ir_line = 0;
            pending_labels.clear();
            continue;
        }

        if let Some(n) = parse_loc_inlined_at(raw_line) {
            user_line = n;
            continue;
        }

        if let Some(n) = parse_loc_plain(raw_line) {
            ir_line = n;
            continue;
        }

        if let Some(label_name) = parse_label(raw_line) {
            pending_labels.push(label_name);
            continue;
        }

        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed == "{" || trimmed == "}" {
            continue;
        }

        let Some(kernel_name) = current_kernel.as_ref() else {
            continue;
        };
        let kernel = kernels.entry(kernel_name.clone()).or_default();

        for label_name in pending_labels.drain(..) {
            kernel.labels.entry(label_name.clone()).or_insert(IrLabel {
                name: label_name,
                user_source_line: user_line,
                ir_line,
            });
        }

        kernel.instructions.push(IrInstruction {
            user_source_line: user_line,
            ir_line,
            text: trimmed.to_string(),
        });
        ir_line += 1;
    }

    kernels
}

/// `.visible .entry <name>` header. `.visible .entry ` is exactly 16
/// characters; the trailing brace is stripped (spec §4.3).
fn parse_kernel_header(line: &str) -> Option<String> {
    let idx = line.find(".visible .entry ")?;
    let rest = line[idx + 16..].trim_end_matches(['\n', '\r']);
    let name = rest.strip_suffix('{').unwrap_or(rest).trim();
    Some(name.to_string())
}

/// `.loc ... inlined_at N M P` -- the user's source-line is the third
/// whitespace-separated token of the segment after the comma.
fn parse_loc_inlined_at(line: &str) -> Option<u32> {
    if !line.contains(".loc") || !line.contains("inlined_at") {
        return None;
    }
    let comma = line.find(',')?;
    let after = &line[comma + 1..];
    let tokens: Vec<&str> = after.split_whitespace().collect();
    tokens.get(2)?.parse().ok()
}

/// `.loc X Y Z` with no `inlined_at` and no `.local` -- supplies the next
/// instruction's IR line (the second token after `.loc`).
fn parse_loc_plain(line: &str) -> Option<u32> {
    if !line.contains(".loc") || line.contains("inlined_at") || line.contains(".local") {
        return None;
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let pos = tokens.iter().position(|&t| t == ".loc")?;
    tokens.get(pos + 2)?.parse().ok()
}

fn parse_label(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.starts_with("$L__") && trimmed.ends_with(':') {
        Some(trimmed.trim_end_matches(':').to_string())
    } else {
        None
    }
}

/// `bra $L__...;` -- the target is the last whitespace-separated token,
/// with the trailing `;` stripped.
pub fn branch_target(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if !trimmed.contains("bra ") {
        return None;
    }
    let last = trimmed.split_whitespace().last()?;
    Some(last.trim_end_matches(';').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
.visible .entry _Z6kernelv{
.loc 1 42 5, inlined_at 1 17 3
atom.global.add.f32 [%rd1], %f1;
$L__BB0_1:
.loc 1 2 3
bra $L__BB0_1;
}
";

    #[test]
    fn parses_kernel_header() {
        assert_eq!(
            parse_kernel_header(".visible .entry _Z6kernelv{"),
            Some("_Z6kernelv".to_string())
        );
    }

    #[test]
    fn empty_kernel_name_is_skipped() {
        let kernels = lex(".visible .entry {\natom.global.add.f32 [%rd1], %f1;\n}\n");
        assert!(kernels.is_empty());
    }

    #[test]
    fn tracks_user_line_and_ir_line_independently() {
        let kernels = lex(SAMPLE);
        let kernel = kernels.get("_Z6kernelv").unwrap();
        assert_eq!(kernel.instructions.len(), 2);
        assert_eq!(kernel.instructions[0].user_source_line, 17);
        assert!(kernel.instructions[0].text.contains("atom.global.add"));

        let label = kernel.labels.get("$L__BB0_1").unwrap();
        assert_eq!(label.ir_line, kernel.instructions[1].ir_line);
    }

    #[test]
    fn extracts_branch_target() {
        assert_eq!(
            branch_target("bra $L__BB0_1;"),
            Some("$L__BB0_1".to_string())
        );
        assert_eq!(branch_target("atom.global.add.f32 [%rd1], %f1;"), None);
    }
}
