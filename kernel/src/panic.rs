//! Exception dispatch, stack unwinding, and the kernel's own panic path.
//!
//! Both roads lead here: a CPU exception arrives through
//! [`handle_exception`] with a full register image already saved by the
//! naked stubs in [`crate::arch::x86_64::idt`]; a Rust-level panic
//! arrives through [`panicf`]/the `#[panic_handler]`. Either way the
//! kernel prints what it can -- mnemonic, registers, a symbolicated
//! trace -- to both diagnostic sinks and halts. There is no recovery.

use core::fmt::Write as _;

use crate::arch::x86_64::registers::InterruptStack;
use crate::arch::x86_64::{halt, idt};
use crate::dwarf::{self, line::Selection};

const MAX_TRACE_FRAMES: usize = 10;

/// The classic `{saved_rbp, saved_rip}` frame-pointer chain. Requires the
/// caller (and everything it calls transitively) to have been compiled
/// with frame pointers retained, which this kernel's build does not
/// disable.
#[repr(C)]
struct StackFrame {
    saved_rbp: *const StackFrame,
    saved_rip: u64,
}

/// Walks the stack from `start_rbp`/`start_rip` (or the caller's own
/// frame, if both are zero) printing up to `max_frames` symbolicated
/// entries.
pub fn strace(max_frames: usize, start_rbp: u64, start_rip: u64) {
    let mut rbp = if start_rbp == 0 {
        let rbp: u64;
        // SAFETY: reads the current frame pointer; no side effects.
        unsafe { core::arch::asm!("mov {}, rbp", out(reg) rbp) };
        rbp
    } else {
        start_rbp
    };
    let mut rip = start_rip;

    for depth in 0..max_frames.min(MAX_TRACE_FRAMES) {
        if rbp == 0 {
            break;
        }
        let frame = rbp as *const StackFrame;
        // SAFETY: `rbp` is either the live frame pointer or a value taken
        // from a previous frame's `saved_rbp`, both of which name a valid
        // stack frame as long as frame pointers are preserved; a zero or
        // garbage value is caught by the `rbp == 0` check and by the
        // unmapped-page read simply faulting into a (already-fatal) nested
        // exception, which is an acceptable failure mode on a best-effort
        // diagnostic path.
        let (next_rbp, saved_rip) = unsafe { ((*frame).saved_rbp, (*frame).saved_rip) };

        let effective_pc = if depth == 0 && rip != 0 { rip } else { saved_rip };
        if effective_pc == 0 {
            break;
        }
        print_frame(effective_pc);

        rip = saved_rip;
        rbp = next_rbp as u64;
    }
}

fn print_frame(pc: u64) {
    let Some(ctx) = dwarf::context() else {
        tprintln!("  [{:#018x}] <no debug info loaded>", pc);
        return;
    };
    let name = ctx.query_func(pc).ok().flatten().map(|m| m.name).unwrap_or("<unknown>");
    match ctx.query_line(pc, Selection::PreviousLine) {
        Ok(Some(line)) => {
            tprintln!(
                "  [{:#018x}] at {} ({}/{}:{})",
                pc,
                name,
                line.directory_path,
                line.file_name,
                line.line
            );
        }
        _ => {
            tprintln!("  [{:#018x}] at {} (unknown location)", pc, name);
        }
    }
}

/// Renders the full diagnostic for a CPU exception and halts. Called
/// from the naked trampoline in [`idt`] with the register image it just
/// assembled.
pub fn handle_exception(stack: &InterruptStack) -> ! {
    tprintln!();
    tprintln!("==================== EXCEPTION ====================");
    tprintln!("{} (vector {})", idt::mnemonic(stack.vector), stack.vector);
    if stack.error_code != 0 {
        tprintln!("error code: {:#x}", stack.error_code);
    }
    tprintln!("{}", stack);
    tprintln!("---- stack trace ----");
    strace(MAX_TRACE_FRAMES, stack.rbp, stack.rip);
    tprintln!("====================================================");
    halt();
}

/// Formats `msg` with a `[PANIC]` prefix into a fixed stack buffer (no
/// heap dependency -- this path must work even if the allocator itself
/// is what's broken), writes it to both sinks, traces, and halts.
pub fn panicf(args: core::fmt::Arguments) -> ! {
    struct FixedWriter {
        buf: [u8; 256],
        len: usize,
    }
    impl core::fmt::Write for FixedWriter {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            let bytes = s.as_bytes();
            let space = self.buf.len() - self.len;
            let take = bytes.len().min(space);
            self.buf[self.len..self.len + take].copy_from_slice(&bytes[..take]);
            self.len += take;
            Ok(())
        }
    }

    let mut writer = FixedWriter { buf: [0; 256], len: 0 };
    let _ = write!(writer, "{}", args);
    // SAFETY: `writer.buf[..writer.len]` was written only from `write_str`,
    // which only ever copies from a `&str`'s valid UTF-8 bytes and may only
    // truncate at a byte it never partially consumes out of that slice;
    // truncation can still land mid-codepoint, so fall back to a lossy
    // message rather than assume validity.
    let message = core::str::from_utf8(&writer.buf[..writer.len]).unwrap_or("<unprintable panic message>");

    tprintln!();
    tprintln!("[PANIC] {}", message);
    strace(MAX_TRACE_FRAMES, 0, 0);
    panic();
}

pub fn panic() -> ! {
    halt();
}

#[cfg(not(test))]
#[panic_handler]
fn rust_panic_handler(info: &core::panic::PanicInfo) -> ! {
    panicf(format_args!("{}", info));
}
