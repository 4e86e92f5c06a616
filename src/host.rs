//! Host side: the native functions scripts can call, logging setup, and
//! the event loop that drives `@Setup` and `@Main`.

use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

use crate::bytecode::NativeFn;
use crate::ops;
use crate::value::Value;
use crate::vm::{Machine, RuntimeError};

/// A host function exposed to scripts under `name`.
#[derive(Clone, Copy)]
pub struct HostNative {
    pub name: &'static str,
    pub arity: usize,
    pub func: NativeFn,
}

pub static NATIVES: &[HostNative] = &[
    HostNative { name: "print", arity: 1, func: print },
    HostNative { name: "min", arity: 2, func: min },
    HostNative { name: "max", arity: 2, func: max },
    HostNative { name: "to_string", arity: 1, func: to_string },
    HostNative { name: "random", arity: 1, func: random },
];

fn print(_machine: &mut Machine, args: &[Value]) -> Value {
    println!("{}", args[0]);
    Value::null()
}

fn pick(machine: &mut Machine, args: &[Value], keep_first: std::cmp::Ordering) -> Value {
    match ops::ordering(&args[0], &args[1]) {
        Ok(order) if order == keep_first || order.is_eq() => args[0].clone(),
        Ok(_) => args[1].clone(),
        Err(e) => {
            machine.fail(e);
            Value::null()
        }
    }
}

fn min(machine: &mut Machine, args: &[Value]) -> Value {
    pick(machine, args, std::cmp::Ordering::Less)
}

fn max(machine: &mut Machine, args: &[Value]) -> Value {
    pick(machine, args, std::cmp::Ordering::Greater)
}

fn to_string(machine: &mut Machine, args: &[Value]) -> Value {
    Value::string(machine.types(), &args[0].to_string())
}

/// Uniform in `[0, n)`.
fn random(machine: &mut Machine, args: &[Value]) -> Value {
    let n = args[0].as_number();
    Value::number(machine.types(), fastrand::f64() * n)
}

/// Installs the `tracing` subscriber; `RUST_LOG` overrides the default
/// `warn` filter.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Settings for [`run_events`].
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// `@Main` calls per second; 0 runs frames back to back.
    pub fps: u32,
    /// Stop after this many `@Main` calls.
    pub frames: Option<u64>,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig { fps: 60, frames: None }
    }
}

/// Runs the top level, then `@Setup` once, then `@Main` once per frame
/// until the script stops or the frame limit is reached. Returns the
/// number of `@Main` calls made.
pub fn run_events(machine: &mut Machine, config: &HostConfig) -> Result<u64, RuntimeError> {
    machine.run()?;
    if machine.has_event("Setup") {
        machine.call("Setup")?;
    }
    if !machine.has_event("Main") {
        return Ok(0);
    }

    let tick = (config.fps > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(config.fps)));
    let mut frame = 0;
    while !machine.is_stopped() && config.frames.is_none_or(|limit| frame < limit) {
        machine.call("Main")?;
        frame += 1;
        if let Some(tick) = tick {
            std::thread::sleep(tick);
        }
    }
    tracing::debug!(frames = frame, stopped = machine.is_stopped(), "event loop finished");
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    fn machine(source: &str) -> Machine {
        Machine::new(compile(source, NATIVES).unwrap())
    }

    fn fast(frames: u64) -> HostConfig {
        HostConfig { fps: 0, frames: Some(frames) }
    }

    #[test]
    fn min_and_max_pick_by_order() {
        let mut m = machine("let a = min(3, 1); let b = max(\"ab\", \"b\"); let c = to_string(42) ~ \"!\";");
        m.run().unwrap();
        assert_eq!(m.global("a").unwrap().as_number(), 1.0);
        assert_eq!(m.global("b").unwrap().to_string(), "b");
        assert_eq!(m.global("c").unwrap().to_string(), "42!");
    }

    #[test]
    fn min_of_mixed_types_fails() {
        let mut m = machine("let a = min(1, \"x\");");
        let err = m.run().unwrap_err();
        assert!(matches!(err.error, crate::vm::VmError::TypeMismatch { .. }));
    }

    #[test]
    fn random_stays_in_range() {
        let mut m = machine("let ok = true; loop(100) { let r = random(5); if (r < 0 || r >= 5) { ok = false; } }");
        m.run().unwrap();
        assert!(m.global("ok").unwrap().as_bool());
    }

    #[test]
    fn setup_runs_once_then_main_per_frame() {
        let mut m = machine("let s = 0; let f = 0; @Setup { s += 1; } @Main { f += 1; }");
        let frames = run_events(&mut m, &fast(5)).unwrap();
        assert_eq!(frames, 5);
        assert_eq!(m.global("s").unwrap().as_number(), 1.0);
        assert_eq!(m.global("f").unwrap().as_number(), 5.0);
    }

    #[test]
    fn exit_ends_the_event_loop() {
        let mut m = machine("let f = 0; @Main { f += 1; if (f == 3) { exit; } }");
        let frames = run_events(&mut m, &fast(100)).unwrap();
        assert_eq!(frames, 3);
        assert!(m.is_stopped());
    }

    #[test]
    fn scripts_without_main_run_once() {
        let mut m = machine("let x = 1;");
        assert_eq!(run_events(&mut m, &fast(10)).unwrap(), 0);
        assert_eq!(m.global("x").unwrap().as_number(), 1.0);
    }

    #[test]
    fn errors_stop_the_event_loop() {
        let mut m = machine("let f = 0; @Main { f += 1; if (f == 2) { assert(false, \"boom\"); } }");
        let err = run_events(&mut m, &fast(10)).unwrap_err();
        assert_eq!(err.error, crate::vm::VmError::Assertion("boom".into()));
        assert_eq!(m.global("f").unwrap().as_number(), 2.0);
    }
}
