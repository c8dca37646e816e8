//! Line-oriented scanners that turn a disassembly or IR text stream into
//! per-kernel entity tables (spec §4.2, §4.3).
//!
//! Both lexers are hand-written cursor scanners rather than a parser-
//! combinator pipeline: the input shapes are fixed line grammars (kernel
//! header, location directive, label, instruction), and each rule in the
//! spec names an exact substring or byte offset to key off. A combinator
//! parser would fight that as much as it would help.

pub mod disasm;
pub mod ir;
