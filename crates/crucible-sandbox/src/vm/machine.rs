//! Bytecode interpreter.
//!
//! Address space layout (all addresses are plain `i64` values in the program):
//!
//! ```text
//! 0x0000_0000 .. 0x0000_1000   unmapped, catches null dereferences
//! 0x0000_1000 ..               string literals, then globals
//! 0x1000_0000 ..               stack (alloca'd locals)
//! 0x4000_0000 ..               heap (malloc/calloc)
//! ```
//!
//! Memory is charged as static + stack + frame overhead + live heap bytes and
//! checked against the limit on every growth. CPU time is the interpreter's
//! run time on its dedicated thread, checked every [`CHECK_INTERVAL`] ops.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crucible_core::{LimitedResource, ResourceLimits};
use crucible_pipeline::ir::{GlobalInit, Width};
use crucible_pipeline::{Builtin, Op, Program};

use crate::runner::{ExitStatus, RunnerSample};

/// Instructions executed between control checks.
pub const CHECK_INTERVAL: u64 = 1024;

const STATIC_BASE: u64 = 0x1000;
const STACK_BASE: u64 = 0x1000_0000;
const HEAP_BASE: u64 = 0x4000_0000;

/// Bytes charged per call frame on top of its local slots.
const FRAME_OVERHEAD: u64 = 64;
const MAX_CALL_DEPTH: usize = 100_000;

/// Exit codes matching a shell's report of the corresponding signal.
pub const EXIT_ABORT: i32 = 134;
pub const EXIT_DIVIDE_BY_ZERO: i32 = 136;
pub const EXIT_SEGFAULT: i32 = 139;

const STDOUT: i64 = 1;
const STDERR: i64 = 2;

/// State shared between the interpreter thread and its controllers.
#[derive(Debug, Default)]
pub struct Control {
    stop: AtomicBool,
    cpu_millis: AtomicU64,
    memory_bytes: AtomicU64,
    peak_memory_bytes: AtomicU64,
}

impl Control {
    /// Ask the interpreter to stop at its next checkpoint.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn sample(&self) -> RunnerSample {
        RunnerSample {
            cpu_millis: self.cpu_millis.load(Ordering::Relaxed),
            memory_bytes: self.memory_bytes.load(Ordering::Relaxed),
            peak_memory_bytes: self.peak_memory_bytes.load(Ordering::Relaxed),
        }
    }

    fn publish_memory(&self, in_use: u64) {
        self.memory_bytes.store(in_use, Ordering::Relaxed);
        self.peak_memory_bytes.fetch_max(in_use, Ordering::Relaxed);
    }
}

/// Destination for program output.
pub trait OutputSink {
    fn stdout(&mut self, bytes: &[u8]);
    fn stderr(&mut self, bytes: &[u8]);
}

/// Why execution left the dispatch loop early.
#[derive(Debug)]
enum Trap {
    Exit(i32),
    /// Runtime library abort, with the message written to stderr.
    Abort(&'static str),
    Limit(LimitedResource),
    Stopped,
    Fault(String),
}

impl Trap {
    fn segfault() -> Self {
        Trap::Exit(EXIT_SEGFAULT)
    }

    fn into_status(self) -> ExitStatus {
        match self {
            Trap::Exit(code) => ExitStatus::Exited { code },
            Trap::Abort(_) => ExitStatus::Exited { code: EXIT_ABORT },
            Trap::Limit(resource) => ExitStatus::LimitExceeded { resource },
            Trap::Stopped => ExitStatus::Killed,
            Trap::Fault(message) => ExitStatus::Fault { message },
        }
    }
}

type Step<T> = std::result::Result<T, Trap>;

struct Frame {
    func: usize,
    pc: usize,
    locals: Vec<i64>,
    /// Operand stack height on entry.
    operand_base: usize,
    /// Stack segment top on entry; allocas above it are released on return.
    stack_mark: u64,
    charge: u64,
}

/// First-fit heap with coalescing free list. Offsets are relative to
/// `HEAP_BASE`.
#[derive(Default)]
struct Heap {
    bytes: Vec<u8>,
    live: BTreeMap<u64, u64>,
    free: BTreeMap<u64, u64>,
    in_use: u64,
}

impl Heap {
    fn alloc(&mut self, size: u64) -> u64 {
        let found = self
            .free
            .iter()
            .find(|(_, len)| **len >= size)
            .map(|(off, len)| (*off, *len));
        let offset = match found {
            Some((offset, len)) => {
                self.free.remove(&offset);
                if len > size {
                    self.free.insert(offset + size, len - size);
                }
                offset
            }
            None => {
                let offset = self.bytes.len() as u64;
                self.bytes.resize((offset + size) as usize, 0);
                offset
            }
        };
        self.live.insert(offset, size);
        self.in_use += size;
        offset
    }

    /// Release a live block. `false` when `offset` is not a block start.
    fn release(&mut self, offset: u64) -> bool {
        let Some(size) = self.live.remove(&offset) else {
            return false;
        };
        self.in_use -= size;
        let (mut start, mut len) = (offset, size);
        if let Some(next) = self.free.remove(&(offset + size)) {
            len += next;
        }
        let before = self.free.range(..offset).next_back().map(|(o, l)| (*o, *l));
        if let Some((prev, prev_len)) = before {
            if prev + prev_len == offset {
                self.free.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        self.free.insert(start, len);
        true
    }
}

fn align8(n: u64) -> u64 {
    n.div_ceil(8) * 8
}

/// Bytes the static segment of `program` occupies, or `None` on overflow.
fn static_size(program: &Program) -> Option<u64> {
    let strings = program
        .strings
        .iter()
        .try_fold(0u64, |total, bytes| total.checked_add(align8(bytes.len() as u64 + 1)))?;
    program
        .globals
        .iter()
        .try_fold(strings, |total, global| total.checked_add(align8(u64::from(global.size).max(1))))
}

/// Lay out string literals then globals, returning the segment and the
/// address of each.
fn build_statics(program: &Program) -> (Vec<u8>, Vec<u64>, Vec<u64>) {
    let mut statics = Vec::new();
    let mut string_addrs = Vec::with_capacity(program.strings.len());
    for bytes in &program.strings {
        string_addrs.push(STATIC_BASE + statics.len() as u64);
        statics.extend_from_slice(bytes);
        statics.push(0);
        statics.resize(align8(statics.len() as u64) as usize, 0);
    }
    let mut global_addrs = Vec::with_capacity(program.globals.len());
    for global in &program.globals {
        let offset = statics.len();
        global_addrs.push(STATIC_BASE + offset as u64);
        statics.resize(offset + align8(u64::from(global.size).max(1)) as usize, 0);
        let slot = &mut statics[offset..offset + global.size as usize];
        match &global.init {
            GlobalInit::Zero => {}
            GlobalInit::Value(value) => write_le(slot, global.width, *value),
            GlobalInit::Str(index) => {
                let addr = string_addrs.get(*index as usize).copied().unwrap_or(0);
                write_le(slot, Width::Quad, addr as i64);
            }
            GlobalInit::Bytes(bytes) => {
                let n = bytes.len().min(slot.len());
                slot[..n].copy_from_slice(&bytes[..n]);
            }
        }
    }
    (statics, string_addrs, global_addrs)
}

/// Interpreter for one execution of a [`Program`].
pub struct Machine<'p> {
    program: &'p Program,
    limits: ResourceLimits,
    control: Arc<Control>,
    statics: Vec<u8>,
    string_addrs: Vec<u64>,
    global_addrs: Vec<u64>,
    stack: Vec<u8>,
    heap: Heap,
    operands: Vec<i64>,
    frames: Vec<Frame>,
    frame_bytes: u64,
    executed: u64,
    started: Instant,
    /// The static segment would not fit the memory limit and was never built.
    statics_oversized: bool,
}

impl<'p> Machine<'p> {
    pub fn new(program: &'p Program, limits: ResourceLimits, control: Arc<Control>) -> Self {
        let fits = static_size(program)
            .is_some_and(|size| size <= limits.memory_bytes && size <= STACK_BASE - STATIC_BASE);
        let (statics, string_addrs, global_addrs) = if fits {
            build_statics(program)
        } else {
            Default::default()
        };
        Self {
            program,
            limits,
            control,
            statics,
            string_addrs,
            global_addrs,
            stack: Vec::new(),
            heap: Heap::default(),
            operands: Vec::new(),
            frames: Vec::new(),
            frame_bytes: 0,
            executed: 0,
            started: Instant::now(),
            statics_oversized: !fits,
        }
    }

    /// Run to completion and report how execution ended.
    pub fn run(&mut self, out: &mut dyn OutputSink) -> ExitStatus {
        self.started = Instant::now();
        let status = match self.execute(out) {
            Ok(code) => ExitStatus::Exited { code },
            Err(Trap::Abort(message)) => {
                out.stderr(message.as_bytes());
                ExitStatus::Exited { code: EXIT_ABORT }
            }
            Err(trap) => trap.into_status(),
        };
        self.publish_cpu();
        status
    }

    fn in_use(&self) -> u64 {
        self.statics.len() as u64 + self.stack.len() as u64 + self.frame_bytes + self.heap.in_use
    }

    /// Fail if growing by `bytes` would exceed the memory limit.
    fn reserve(&self, bytes: u64) -> Step<()> {
        match self.in_use().checked_add(bytes) {
            Some(total) if total <= self.limits.memory_bytes => Ok(()),
            _ => Err(Trap::Limit(LimitedResource::Memory)),
        }
    }

    fn publish_cpu(&self) -> u64 {
        let cpu = self.started.elapsed().as_millis() as u64;
        self.control.cpu_millis.store(cpu, Ordering::Relaxed);
        cpu
    }

    fn checkpoint(&self) -> Step<()> {
        if self.control.stop_requested() {
            return Err(Trap::Stopped);
        }
        if self.publish_cpu() > self.limits.cpu_millis {
            return Err(Trap::Limit(LimitedResource::Cpu));
        }
        Ok(())
    }

    fn execute(&mut self, out: &mut dyn OutputSink) -> Step<i32> {
        if self.statics_oversized {
            return Err(Trap::Limit(LimitedResource::Memory));
        }
        self.reserve(0)?;
        self.control.publish_memory(self.in_use());
        let program = self.program;
        let entry = program
            .entry_function()
            .zip(program.entry)
            .ok_or_else(|| Trap::Fault("program has no entry point".into()))?;
        self.enter(entry.1 as usize, vec![0; entry.0.params as usize])?;

        loop {
            self.executed += 1;
            if self.executed % CHECK_INTERVAL == 0 {
                self.checkpoint()?;
            }
            let frame = self.frames.last_mut().ok_or_else(|| Trap::Fault("empty call stack".into()))?;
            let op = program.functions[frame.func]
                .code
                .get(frame.pc)
                .copied()
                .ok_or_else(|| Trap::Fault("execution fell off the end of a function".into()))?;
            frame.pc += 1;

            match op {
                Op::Const(value) => self.push(value),
                Op::Str(index) => {
                    let addr = self.string_addrs.get(index as usize).copied().ok_or_else(|| bad_index("string", index))?;
                    self.push(addr as i64);
                }
                Op::LoadLocal(slot) => {
                    let value = self.frame()?.locals.get(slot as usize).copied().ok_or_else(|| bad_index("local", slot))?;
                    self.push(value);
                }
                Op::StoreLocal(slot) => {
                    let value = self.peek()?;
                    let local = self
                        .frame_mut()?
                        .locals
                        .get_mut(slot as usize)
                        .ok_or_else(|| bad_index("local", slot))?;
                    *local = value;
                }
                Op::GlobalAddr(index) => {
                    let addr = self.global_addrs.get(index as usize).copied().ok_or_else(|| bad_index("global", index))?;
                    self.push(addr as i64);
                }
                Op::Load(width) => {
                    let addr = self.pop()?;
                    let value = read_le(self.region(addr, width.bytes())?, width);
                    self.push(value);
                }
                Op::Store(width) => {
                    let value = self.pop()?;
                    let addr = self.pop()?;
                    write_le(self.region_mut(addr, width.bytes())?, width, value);
                    self.push(value);
                }
                Op::Binary(op) => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let value = op.eval(a, b).ok_or(Trap::Exit(EXIT_DIVIDE_BY_ZERO))?;
                    self.push(value);
                }
                Op::Unary(op) => {
                    let a = self.pop()?;
                    self.push(op.eval(a));
                }
                Op::Pop => {
                    self.pop()?;
                }
                Op::Dup => {
                    let value = self.peek()?;
                    self.push(value);
                }
                Op::Swap => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(b);
                    self.push(a);
                }
                Op::Jump(target) => self.jump(target)?,
                Op::JumpIfZero(target) => {
                    if self.pop()? == 0 {
                        self.jump(target)?;
                    }
                }
                Op::JumpIfNotZero(target) => {
                    if self.pop()? != 0 {
                        self.jump(target)?;
                    }
                }
                Op::Call { func, argc } => {
                    let args = self.take_args(argc)?;
                    self.enter(func as usize, args)?;
                }
                Op::CallBuiltin { builtin, argc } => {
                    let args = self.take_args(argc)?;
                    let value = self.builtin(builtin, &args, out)?;
                    self.push(value);
                }
                Op::Alloca(size) => {
                    let addr = self.alloca(u64::from(size))?;
                    self.push(addr as i64);
                }
                Op::Ret => {
                    let value = self.pop()?;
                    if let Some(code) = self.leave(value)? {
                        return Ok(code);
                    }
                }
                Op::RetVoid => {
                    if let Some(code) = self.leave(0)? {
                        return Ok(code);
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Operand stack and frames
    // -----------------------------------------------------------------------

    fn push(&mut self, value: i64) {
        self.operands.push(value);
    }

    fn pop(&mut self) -> Step<i64> {
        self.operands.pop().ok_or_else(|| Trap::Fault("operand stack underflow".into()))
    }

    fn peek(&self) -> Step<i64> {
        self.operands.last().copied().ok_or_else(|| Trap::Fault("operand stack underflow".into()))
    }

    fn frame(&self) -> Step<&Frame> {
        self.frames.last().ok_or_else(|| Trap::Fault("empty call stack".into()))
    }

    fn frame_mut(&mut self) -> Step<&mut Frame> {
        self.frames.last_mut().ok_or_else(|| Trap::Fault("empty call stack".into()))
    }

    fn jump(&mut self, target: u32) -> Step<()> {
        self.frame_mut()?.pc = target as usize;
        Ok(())
    }

    fn take_args(&mut self, argc: u32) -> Step<Vec<i64>> {
        let at = self
            .operands
            .len()
            .checked_sub(argc as usize)
            .ok_or_else(|| Trap::Fault("operand stack underflow".into()))?;
        Ok(self.operands.split_off(at))
    }

    fn enter(&mut self, func: usize, args: Vec<i64>) -> Step<()> {
        let function = self
            .program
            .functions
            .get(func)
            .ok_or_else(|| bad_index("function", func as u32))?;
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(Trap::segfault());
        }
        let slots = function.locals.max(function.params).max(args.len() as u32) as usize;
        let charge = FRAME_OVERHEAD + 8 * slots as u64;
        self.reserve(charge)?;

        let mut locals = args;
        locals.resize(slots, 0);
        self.frames.push(Frame {
            func,
            pc: 0,
            locals,
            operand_base: self.operands.len(),
            stack_mark: self.stack.len() as u64,
            charge,
        });
        self.frame_bytes += charge;
        self.control.publish_memory(self.in_use());
        Ok(())
    }

    /// Pop a frame. Returns the exit code once the entry function returns.
    fn leave(&mut self, value: i64) -> Step<Option<i32>> {
        let frame = self.frames.pop().ok_or_else(|| Trap::Fault("empty call stack".into()))?;
        self.operands.truncate(frame.operand_base);
        self.stack.truncate(frame.stack_mark as usize);
        self.frame_bytes -= frame.charge;
        if self.frames.is_empty() {
            return Ok(Some((value & 0xff) as i32));
        }
        self.push(value);
        Ok(None)
    }

    fn alloca(&mut self, size: u64) -> Step<u64> {
        let size = align8(size.max(1));
        self.reserve(size)?;
        let offset = self.stack.len() as u64;
        self.stack.resize((offset + size) as usize, 0);
        self.control.publish_memory(self.in_use());
        Ok(STACK_BASE + offset)
    }

    // -----------------------------------------------------------------------
    // Memory
    // -----------------------------------------------------------------------

    /// Segment and in-segment offset for `len` bytes at `addr`.
    fn locate(&self, addr: i64, len: u64) -> Step<(Segment, usize)> {
        let addr = u64::try_from(addr).map_err(|_| Trap::segfault())?;
        let end = addr.checked_add(len).ok_or_else(Trap::segfault)?;
        let segments = [
            (Segment::Static, STATIC_BASE, self.statics.len() as u64),
            (Segment::Stack, STACK_BASE, self.stack.len() as u64),
            (Segment::Heap, HEAP_BASE, self.heap.bytes.len() as u64),
        ];
        segments
            .into_iter()
            .find(|(_, base, size)| addr >= *base && end <= base + size)
            .map(|(segment, base, _)| (segment, (addr - base) as usize))
            .ok_or_else(Trap::segfault)
    }

    fn segment(&self, segment: Segment) -> &[u8] {
        match segment {
            Segment::Static => &self.statics,
            Segment::Stack => &self.stack,
            Segment::Heap => &self.heap.bytes,
        }
    }

    fn region(&self, addr: i64, len: u64) -> Step<&[u8]> {
        let (segment, offset) = self.locate(addr, len)?;
        Ok(&self.segment(segment)[offset..offset + len as usize])
    }

    fn region_mut(&mut self, addr: i64, len: u64) -> Step<&mut [u8]> {
        let (segment, offset) = self.locate(addr, len)?;
        let bytes = match segment {
            Segment::Static => &mut self.statics,
            Segment::Stack => &mut self.stack,
            Segment::Heap => &mut self.heap.bytes,
        };
        Ok(&mut bytes[offset..offset + len as usize])
    }

    /// NUL-terminated bytes at `addr`, without the terminator.
    fn c_string(&self, addr: i64) -> Step<Vec<u8>> {
        let (segment, offset) = self.locate(addr, 1)?;
        let tail = &self.segment(segment)[offset..];
        let len = tail.iter().position(|b| *b == 0).ok_or_else(Trap::segfault)?;
        Ok(tail[..len].to_vec())
    }

    fn malloc(&mut self, size: i64, zeroed: bool) -> Step<i64> {
        let Ok(size) = u64::try_from(size) else {
            return Ok(0);
        };
        let size = align8(size.max(1));
        self.reserve(size)?;
        let offset = self.heap.alloc(size);
        if zeroed {
            let start = offset as usize;
            self.heap.bytes[start..start + size as usize].fill(0);
        }
        self.control.publish_memory(self.in_use());
        Ok((HEAP_BASE + offset) as i64)
    }

    fn free(&mut self, addr: i64) -> Step<()> {
        if addr == 0 {
            return Ok(());
        }
        let released = u64::try_from(addr)
            .ok()
            .and_then(|a| a.checked_sub(HEAP_BASE))
            .is_some_and(|offset| self.heap.release(offset));
        if !released {
            return Err(Trap::Abort("free(): invalid pointer\n"));
        }
        self.control.publish_memory(self.in_use());
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Library
    // -----------------------------------------------------------------------

    fn builtin(&mut self, builtin: Builtin, args: &[i64], out: &mut dyn OutputSink) -> Step<i64> {
        let arg = |i: usize| args.get(i).copied().unwrap_or(0);
        match builtin {
            Builtin::Printf => {
                let text = self.format(arg(0), args.get(1..).unwrap_or_default())?;
                out.stdout(&text);
                Ok(text.len() as i64)
            }
            Builtin::Fprintf => {
                let text = self.format(arg(1), args.get(2..).unwrap_or_default())?;
                match arg(0) {
                    STDOUT => out.stdout(&text),
                    STDERR => out.stderr(&text),
                    _ => return Ok(-1),
                }
                Ok(text.len() as i64)
            }
            Builtin::Puts => {
                let mut text = self.c_string(arg(0))?;
                text.push(b'\n');
                out.stdout(&text);
                Ok(text.len() as i64)
            }
            Builtin::Putchar => {
                let byte = arg(0) as u8;
                out.stdout(&[byte]);
                Ok(i64::from(byte))
            }
            Builtin::Malloc => self.malloc(arg(0), false),
            Builtin::Calloc => match arg(0).checked_mul(arg(1)) {
                Some(size) => self.malloc(size, true),
                None => Ok(0),
            },
            Builtin::Free => {
                self.free(arg(0))?;
                Ok(0)
            }
            Builtin::Exit => Err(Trap::Exit((arg(0) & 0xff) as i32)),
            Builtin::Abs => Ok(i64::from((arg(0) as i32).wrapping_abs())),
            Builtin::Strlen => Ok(self.c_string(arg(0))?.len() as i64),
            Builtin::Memset => {
                let len = u64::try_from(arg(2)).map_err(|_| Trap::segfault())?;
                if len > 0 {
                    self.region_mut(arg(0), len)?.fill(arg(1) as u8);
                }
                Ok(arg(0))
            }
        }
    }

    /// `printf`-style formatting: flags `-0+ `, width, length modifiers and
    /// the `d i u x X o c s p %` conversions.
    fn format(&self, fmt: i64, args: &[i64]) -> Step<Vec<u8>> {
        let fmt = self.c_string(fmt)?;
        let mut args = args.iter().copied();
        let mut out = Vec::with_capacity(fmt.len());
        let mut i = 0;
        while i < fmt.len() {
            let c = fmt[i];
            i += 1;
            if c != b'%' {
                out.push(c);
                continue;
            }
            let mut spec = FormatSpec::default();
            while let Some(flag) = fmt.get(i).copied().filter(|b| b"-0+ ".contains(b)) {
                match flag {
                    b'-' => spec.left = true,
                    b'0' => spec.zero = true,
                    b'+' => spec.plus = true,
                    _ => spec.space = true,
                }
                i += 1;
            }
            while let Some(digit) = fmt.get(i).filter(|b| b.is_ascii_digit()) {
                spec.width = spec.width * 10 + usize::from(digit - b'0');
                i += 1;
            }
            while let Some(modifier) = fmt.get(i).copied().filter(|b| b"lhz".contains(b)) {
                spec.long |= modifier != b'h';
                i += 1;
            }
            let Some(&conv) = fmt.get(i) else {
                out.push(b'%');
                break;
            };
            i += 1;

            let mut next = || args.next().unwrap_or(0);
            let body = match conv {
                b'%' => {
                    out.push(b'%');
                    continue;
                }
                b'd' | b'i' => {
                    let value = spec.signed(next());
                    let mut text = value.to_string();
                    if value >= 0 && spec.plus {
                        text.insert(0, '+');
                    } else if value >= 0 && spec.space {
                        text.insert(0, ' ');
                    }
                    text.into_bytes()
                }
                b'u' => spec.unsigned(next()).to_string().into_bytes(),
                b'x' => format!("{:x}", spec.unsigned(next())).into_bytes(),
                b'X' => format!("{:X}", spec.unsigned(next())).into_bytes(),
                b'o' => format!("{:o}", spec.unsigned(next())).into_bytes(),
                b'c' => vec![next() as u8],
                b's' => self.c_string(next())?,
                b'p' => format!("0x{:x}", next() as u64).into_bytes(),
                other => {
                    out.push(b'%');
                    out.push(other);
                    continue;
                }
            };
            spec.pad(&mut out, body, conv != b's' && conv != b'c');
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy)]
enum Segment {
    Static,
    Stack,
    Heap,
}

#[derive(Default)]
struct FormatSpec {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    width: usize,
    long: bool,
}

impl FormatSpec {
    fn signed(&self, value: i64) -> i64 {
        if self.long {
            value
        } else {
            i64::from(value as i32)
        }
    }

    fn unsigned(&self, value: i64) -> u64 {
        if self.long {
            value as u64
        } else {
            u64::from(value as u32)
        }
    }

    fn pad(&self, out: &mut Vec<u8>, body: Vec<u8>, numeric: bool) {
        let fill = self.width.saturating_sub(body.len());
        if self.left {
            out.extend_from_slice(&body);
            out.resize(out.len() + fill, b' ');
        } else if self.zero && numeric {
            let sign = usize::from(matches!(body.first(), Some(b'-' | b'+' | b' ')));
            out.extend_from_slice(&body[..sign]);
            out.resize(out.len() + fill, b'0');
            out.extend_from_slice(&body[sign..]);
        } else {
            out.resize(out.len() + fill, b' ');
            out.extend_from_slice(&body);
        }
    }
}

fn bad_index(what: &str, index: u32) -> Trap {
    Trap::Fault(format!("{what} index {index} out of range"))
}

fn read_le(bytes: &[u8], width: Width) -> i64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    let raw = i64::from_le_bytes(buf);
    match width {
        Width::Byte => i64::from(raw as i8),
        Width::Word => i64::from(raw as i32),
        Width::Quad => raw,
    }
}

fn write_le(slot: &mut [u8], width: Width, value: i64) {
    let n = (width.bytes() as usize).min(slot.len());
    slot[..n].copy_from_slice(&value.to_le_bytes()[..n]);
}

/// Run `program` on the current thread without external control.
pub fn run_program(program: &Program, limits: ResourceLimits, out: &mut dyn OutputSink) -> (ExitStatus, RunnerSample) {
    let control = Arc::new(Control::default());
    let status = Machine::new(program, limits, Arc::clone(&control)).run(out);
    (status, control.sample())
}
