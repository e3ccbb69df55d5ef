use crate::{Heap, Thread, ThreadState, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    PushFixnum(i64),
    Add,
    Mul,
    /// cooperative suspension point, execution resumes with the next op
    Block,
    /// pops a fixnum and adds it to the given cell
    AddToCell(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub closure: Value,
    pub pc: usize,
}

impl Frame {
    pub fn new(closure: Value) -> Self {
        Self { closure, pc: 0 }
    }
}

/// The execution state of a lightweight thread. A detached stack is the
/// continuation of whatever was running on it.
#[derive(Debug, Default, Clone)]
pub struct Stack {
    pub frames: Vec<Frame>,
    pub data: Vec<Value>,
}

impl Stack {
    pub fn is_finished(&self) -> bool {
        self.frames.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Finished,
    Blocked,
    Panic(String),
}

enum Step {
    Continue,
    Done(ExecutionResult),
}

pub struct Interpreter {
    heap: Heap,
}

impl Interpreter {
    pub fn new(heap: Heap) -> Self {
        Self { heap }
    }

    /// Runs `thread` until its stack is empty or it reaches a `Block`.
    pub fn run(&self, thread: &mut Thread) -> ExecutionResult {
        thread.set_state(ThreadState::Running);
        let result = loop {
            if let Step::Done(result) = self.step(thread.stack()) {
                break result;
            }
        };
        thread.set_state(match result {
            ExecutionResult::Blocked => ThreadState::Blocked,
            ExecutionResult::Finished | ExecutionResult::Panic(_) => ThreadState::Finished,
        });
        result
    }

    fn step(&self, stack: Value) -> Step {
        let Some(top) = self.heap.with_stack(stack, |s| s.frames.last().copied()) else {
            return Step::Done(ExecutionResult::Panic(format!("{stack:?} is not a stack")));
        };
        let Some(frame) = top else {
            return Step::Done(ExecutionResult::Finished);
        };
        let Some(code) = self.heap.closure_code(frame.closure) else {
            return Step::Done(ExecutionResult::Panic(format!(
                "{:?} is not a closure",
                frame.closure
            )));
        };

        let Some(&op) = code.get(frame.pc) else {
            // return from the closure
            self.heap.with_stack_mut(stack, |s| s.frames.pop());
            return Step::Continue;
        };

        let outcome = self.heap.with_stack_mut(stack, |s| -> Result<Option<(Value, i64)>, String> {
            if let Some(f) = s.frames.last_mut() {
                f.pc += 1;
            }
            match op {
                Op::PushFixnum(n) => {
                    s.data.push(Value::from_fixnum(n));
                    Ok(None)
                }
                Op::Add | Op::Mul => {
                    let b = pop_fixnum(s)?;
                    let a = pop_fixnum(s)?;
                    let r = if op == Op::Add {
                        a.wrapping_add(b)
                    } else {
                        a.wrapping_mul(b)
                    };
                    s.data.push(Value::from_fixnum(r));
                    Ok(None)
                }
                Op::Block => Ok(None),
                Op::AddToCell(cell) => Ok(Some((cell, pop_fixnum(s)?))),
            }
        });

        match outcome {
            Some(Ok(Some((cell, delta)))) => {
                if self.heap.add_to_cell(cell, delta) {
                    Step::Continue
                } else {
                    Step::Done(ExecutionResult::Panic(format!("{cell:?} is not a cell")))
                }
            }
            Some(Ok(None)) if op == Op::Block => Step::Done(ExecutionResult::Blocked),
            Some(Ok(None)) => Step::Continue,
            Some(Err(msg)) => Step::Done(ExecutionResult::Panic(msg)),
            None => Step::Done(ExecutionResult::Panic(format!("{stack:?} is not a stack"))),
        }
    }
}

fn pop_fixnum(stack: &mut Stack) -> Result<i64, String> {
    match stack.data.pop() {
        Some(v) => v.as_fixnum().ok_or_else(|| format!("expected fixnum, got {v:?}")),
        None => Err("stack underflow".to_string()),
    }
}
