//! Disassembly lexer (spec §4.2).
//!
//! Recognizes five line shapes: a kernel header (`.section .text.<name>`),
//! a source-line cursor update (any line containing ` line `), a label
//! definition (`.L_x_<k>:`), an instruction line (a `/*pcoffset*/` marker
//! followed by mnemonic+operands terminated by `;`, with an optional
//! `// | g | p | u |` live-register annotation), and everything else, which
//! is skipped silently (spec: "the tool is forgiving because downstream
//! tools can produce minor format drift").

use indexmap::IndexMap;

use crate::instruction::{Instruction, Label, LiveRegisterCounts, PcOffset};

/// One kernel's disassembly: its instructions in file order, plus the
/// label table built while scanning it.
#[derive(Debug, Clone, Default)]
pub struct KernelDisassembly {
    pub instructions: Vec<Instruction>,
    pub labels: IndexMap<String, Label>,
}

/// Scans a disassembly stream into per-kernel entity tables (spec §4.2).
///
/// Empty-name kernel headers are skipped; later, well-named kernels in the
/// same stream are still processed (spec §9 Open Question (a)).
pub fn lex(text: &str) -> IndexMap<String, KernelDisassembly> {
    let mut kernels: IndexMap<String, KernelDisassembly> = IndexMap::new();
    let mut current_kernel: Option<String> = None;
    let mut current_line: u32 = 0;
    let mut pending_labels: Vec<String> = Vec::new();

    for raw_line in text.lines() {
        if let Some(name) = parse_kernel_header(raw_line) {
            if name.is_empty() {
                log::debug!("skipping disassembly kernel header with empty name");
                current_kernel = None;
            } else {
                kernels.entry(name.clone()).or_default();
                current_kernel = Some(name);
            }
            current_line = 0;
            pending_labels.clear();
            continue;
        }

        if raw_line.contains(" line ") {
            if let Some(n) = parse_source_line(raw_line) {
                current_line = n;
            }
            continue;
        }

        if let Some(label_name) = parse_label(raw_line) {
            pending_labels.push(label_name);
            continue;
        }

        let Some((pc_offset, mnemonic, raw_text, live_registers)) = parse_instruction(raw_line)
        else {
            continue;
        };

        let Some(kernel_name) = current_kernel.as_ref() else {
            continue;
        };
        let kernel = kernels.entry(kernel_name.clone()).or_default();

        for label_name in pending_labels.drain(..) {
            kernel.labels.entry(label_name.clone()).or_insert(Label {
                name: label_name,
                source_line: current_line,
                pc_offset,
            });
        }

        kernel
            .instructions
            .push(Instruction::new(pc_offset, current_line, mnemonic, raw_text, live_registers));
    }

    kernels
}

/// `.section .text.<name>` header. Spec §4.2: "Its operand after the fixed
/// prefix of 16 characters is the kernel name; a fixed suffix of 15
/// characters is stripped." The canonical line is a single leading tab
/// followed by `.section .text.<name>,"ax",@progbits` -- tab (1) +
/// `.section .text.` (15) = 16, and `,"ax",@progbits` is 15.
fn parse_kernel_header(line: &str) -> Option<String> {
    if !line.contains(".section .text.") {
        return None;
    }
    let line = line.trim_end_matches(['\n', '\r']);
    if line.len() < 16 + 15 {
        return None;
    }
    Some(line[16..line.len() - 15].to_string())
}

fn parse_source_line(line: &str) -> Option<u32> {
    let idx = line.find(" line ")?;
    let rest = &line[idx + " line ".len()..];
    let token: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    token.parse().ok()
}

fn parse_label(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.starts_with(".L_x_") && trimmed.ends_with(':') {
        Some(trimmed.trim_end_matches(':').to_string())
    } else {
        None
    }
}

fn parse_instruction(
    line: &str,
) -> Option<(PcOffset, String, String, Option<LiveRegisterCounts>)> {
    let start = line.find("/*")?;
    let rel_end = line[start + 2..].find("*/")?;
    let end = start + 2 + rel_end;
    let pc_offset = PcOffset::from_hex(&line[start + 2..end])?;

    let after = &line[end + 2..];
    let semicolon = after.find(';')?;
    let body = after[..semicolon].trim();
    if body.is_empty() {
        return None;
    }
    let mnemonic = body.split_whitespace().next()?.to_string();
    let live_registers = parse_live_registers(&after[semicolon..]);

    Some((pc_offset, mnemonic, body.to_string(), live_registers))
}

/// `// | g | p | u |` live-register annotation; a blank field is 0.
fn parse_live_registers(text: &str) -> Option<LiveRegisterCounts> {
    let idx = text.find("// |")?;
    let rest = &text[idx + "// |".len()..];
    let mut fields = rest.split('|');
    let field = |f: Option<&str>| -> u32 { f.and_then(|s| s.trim().parse().ok()).unwrap_or(0) };
    Some(LiveRegisterCounts {
        general: field(fields.next()),
        predicate: field(fields.next()),
        uniform_general: field(fields.next()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\t.section .text._Z6kernelv,\"ax\",@progbits\n\
        \t\t// line 12\n\
        \t\t/*0020*/                   IMAD R5, R3, 0x1, R7 ;\n\
        .L_x_3:\n\
        \t\t// line 15\n\
        \t\t/*00a0*/ @P0 BRA `(.L_x_3) ; // | 10 | 2 | 4 |\n";

    #[test]
    fn parses_kernel_header() {
        assert_eq!(
            parse_kernel_header("\t.section .text._Z6kernelv,\"ax\",@progbits"),
            Some("_Z6kernelv".to_string())
        );
    }

    #[test]
    fn empty_kernel_name_is_skipped() {
        let text = "\t.section .text.,\"ax\",@progbits\n\t\t/*0000*/ NOP ;\n";
        let kernels = lex(text);
        assert!(kernels.is_empty());
    }

    #[test]
    fn lexes_instructions_and_labels() {
        let kernels = lex(SAMPLE);
        let kernel = kernels.get("_Z6kernelv").expect("kernel present");
        assert_eq!(kernel.instructions.len(), 2);
        assert_eq!(kernel.instructions[0].source_line, 12);
        assert_eq!(kernel.instructions[0].mnemonic, "IMAD");
        assert_eq!(kernel.instructions[0].pc_offset.hex(), "0020");

        let label = kernel.labels.get(".L_x_3").expect("label present");
        assert_eq!(label.source_line, 15);
        assert_eq!(label.pc_offset.hex(), "00a0");

        let live = kernel.instructions[1].live_registers.expect("live regs");
        assert_eq!(live.general, 10);
        assert_eq!(live.predicate, 2);
        assert_eq!(live.uniform_general, 4);
    }

    #[test]
    fn instruction_with_no_preceding_line_marker_is_line_zero() {
        let text = "\t.section .text._Z3fooV,\"ax\",@progbits\n\t\t/*0000*/ NOP ;\n";
        let kernels = lex(text);
        let kernel = kernels.get("_Z3fooV").unwrap();
        assert_eq!(kernel.instructions[0].source_line, 0);
    }

    #[test]
    fn malformed_lines_are_skipped_silently() {
        let text = "\t.section .text._Z3fooV,\"ax\",@progbits\n\
            this line has no markers at all\n\
            \t\t/*0000*/ NOP ;\n";
        let kernels = lex(text);
        assert_eq!(kernels.get("_Z3fooV").unwrap().instructions.len(), 1);
    }
}
