//! Bytecode disassembler.
//!
//! Walks a function's chunk, printing one instruction per line with the
//! source line number shown only when it changes, then recurses into the
//! nested prototypes. The format is stable: the CLI `--dump` option and
//! tests rely on it.

use std::io::Write;

use crate::callable::Function;
use crate::chunk::{OpCode, Operand};

pub fn dump(function: &Function, out: &mut dyn Write) -> std::io::Result<()> {
    let name = function
        .name()
        .map_or_else(|| "<anonymous>".to_string(), |name| name.to_string());
    writeln!(
        out,
        "; {} in {} at {:p}",
        name,
        function.file(),
        function as *const Function
    )?;
    writeln!(
        out,
        "; {} parameter(s), {} non-local(s), {} constant(s), {} function(s)",
        function.arity(),
        function.num_nonlocals(),
        function.chunk().consts().len(),
        function.functions().len()
    )?;
    let chunk = function.chunk();
    let code = chunk.code();
    let mut i = 0;
    let mut count = 0;
    let mut last_line = None;
    while i < code.len() {
        let offset = i;
        let Ok(op) = OpCode::try_from(code[i]) else {
            writeln!(out, "  ????? {offset:5} <invalid opcode {:#04x}>", code[i])?;
            break;
        };
        i += 1;
        count += 1;
        let line = chunk.get_line(offset);
        if last_line != Some(line) {
            write!(out, "  {line:<5} {offset:5} ")?;
            last_line = Some(line);
        } else {
            write!(out, "        {offset:5} ")?;
        }
        match op.operand() {
            Operand::None => writeln!(out, "{}", op.name())?,
            Operand::Byte => {
                let operand = code[i];
                i += 1;
                writeln!(out, "{:<21} {:5}", op.name(), operand)?;
            }
            Operand::Word => {
                let operand = chunk.read_word(i);
                i += 2;
                writeln!(out, "{:<21} {:5}", op.name(), operand)?;
            }
        }
    }
    writeln!(out, "; {count} instruction(s)")?;
    writeln!(out)?;
    for child in function.functions() {
        dump(child, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler;

    fn dump_source(source: &str) -> String {
        let closure = compiler::compile("test.hk", source, &[]).unwrap();
        let mut buf = Vec::new();
        dump(&closure.function, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn header_reports_counts() {
        let text = dump_source("fn f() {}");
        assert!(text.contains("; main in test.hk at "));
        assert!(text.contains("; 1 parameter(s), 0 non-local(s), 0 constant(s), 1 function(s)"));
        assert!(text.contains("; f in test.hk at "));
    }

    #[test]
    fn empty_function_dumps_a_single_return_nil() {
        let text = dump_source("fn f() {}");
        let child = text
            .split("; f in test.hk")
            .nth(1)
            .expect("child function section");
        assert!(child.contains("ReturnNil"));
        assert!(child.contains("; 1 instruction(s)"));
    }

    #[test]
    fn line_numbers_print_once_per_line() {
        let text = dump_source("let x = 1;\nreturn x;");
        let first_column: Vec<&str> = text
            .lines()
            .filter(|line| line.starts_with("  1 ") || line.starts_with("  1\t"))
            .collect();
        // Only the first instruction of line 1 carries the line number.
        assert!(first_column.len() <= 1, "dump:\n{text}");
    }

    #[test]
    fn operands_are_printed() {
        let text = dump_source("return 300;");
        assert!(text.contains("Int"));
        assert!(text.contains("300"));
    }
}
