//! In-memory stand-in for the system tools, used by unit tests.
//!
//! `FakeSystem` records every invocation and keeps just enough loop,
//! device-mapper and mount state for the drive lifecycle to be exercised
//! end to end without root.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use crate::error::Result;
use crate::executor::{CommandRunner, ToolOutput, command_line};

#[derive(Default)]
struct State {
    calls: Vec<String>,
    /// Loop device path to backing file.
    loops: BTreeMap<String, String>,
    /// Mapping name to mapped device.
    mappings: BTreeMap<String, String>,
    /// Device and mount point, in mount order.
    mounts: Vec<(String, String)>,
    /// Forced exit codes keyed by program and first argument.
    failures: HashMap<(String, String), i32>,
    headers: String,
}

#[derive(Default)]
pub(crate) struct FakeSystem {
    state: RefCell<State>,
}

impl FakeSystem {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes `program <first_arg> ...` exit with `code`.
    pub(crate) fn fail(&self, program: &str, first_arg: &str, code: i32) {
        self.state
            .borrow_mut()
            .failures
            .insert((program.to_string(), first_arg.to_string()), code);
    }

    pub(crate) fn set_headers(&self, headers: &str) {
        self.state.borrow_mut().headers = headers.to_string();
    }

    pub(crate) fn bind_loop(&self, device: &str, file: &str) {
        self.state
            .borrow_mut()
            .loops
            .insert(device.to_string(), file.to_string());
    }

    pub(crate) fn add_mapping(&self, name: &str, device: &str) {
        self.state
            .borrow_mut()
            .mappings
            .insert(name.to_string(), device.to_string());
    }

    pub(crate) fn add_mount(&self, device: &str, mount_point: &str) {
        self.state
            .borrow_mut()
            .mounts
            .push((device.to_string(), mount_point.to_string()));
    }

    /// Every command line run so far.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    /// Command lines run so far for one program.
    pub(crate) fn calls_to(&self, program: &str) -> Vec<String> {
        let prefix = format!("{} ", program);
        self.calls()
            .into_iter()
            .filter(|call| call == program || call.starts_with(&prefix))
            .collect()
    }

    pub(crate) fn is_mapped(&self, name: &str) -> bool {
        self.state.borrow().mappings.contains_key(name)
    }

    pub(crate) fn bound_loops(&self) -> usize {
        self.state.borrow().loops.len()
    }

    pub(crate) fn mount_count(&self) -> usize {
        self.state.borrow().mounts.len()
    }

    fn respond(&self, program: &str, args: &[&str]) -> ToolOutput {
        let mut state = self.state.borrow_mut();
        state.calls.push(command_line(program, args));

        let key = (
            program.to_string(),
            args.first().copied().unwrap_or_default().to_string(),
        );
        if let Some(code) = state.failures.get(&key) {
            return exit(*code);
        }

        match (program, args) {
            ("losetup", ["-j", file]) => {
                let stdout = state
                    .loops
                    .iter()
                    .filter(|(_, backing)| backing.as_str() == *file)
                    .map(|(device, backing)| format!("{}: [fd05]:49178 ({})\n", device, backing))
                    .collect::<String>();
                stdout_of(stdout)
            }
            ("losetup", ["-f"]) => {
                let free = (0..)
                    .map(|n| format!("/dev/loop{}", n))
                    .find(|device| !state.loops.contains_key(device))
                    .unwrap_or_default();
                stdout_of(format!("{}\n", free))
            }
            ("losetup", ["-d", device]) => match state.loops.remove(*device) {
                Some(_) => exit(0),
                None => exit(1),
            },
            ("losetup", [device, file]) => {
                state.loops.insert(device.to_string(), file.to_string());
                exit(0)
            }
            ("dd", _) => {
                if let Some(file) = args.iter().find_map(|arg| arg.strip_prefix("of=")) {
                    let _ = std::fs::write(file, b"");
                }
                exit(0)
            }
            ("cryptsetup", ["status", name]) => {
                exit(if state.mappings.contains_key(*name) { 0 } else { 4 })
            }
            ("cryptsetup", ["-d", _, "create", name, device])
            | ("cryptsetup", ["luksOpen", device, name]) => {
                if state.mappings.contains_key(*name) {
                    exit(5)
                } else {
                    state.mappings.insert(name.to_string(), device.to_string());
                    exit(0)
                }
            }
            ("cryptsetup", ["remove", name]) | ("cryptsetup", ["luksClose", name]) => {
                match state.mappings.remove(*name) {
                    Some(_) => exit(0),
                    None => exit(4),
                }
            }
            ("mount", [device, mount_point]) => {
                state
                    .mounts
                    .push((device.to_string(), mount_point.to_string()));
                exit(0)
            }
            ("umount", [mount_point]) => {
                let before = state.mounts.len();
                state.mounts.retain(|(_, path)| path.as_str() != *mount_point);
                exit(if state.mounts.len() < before { 0 } else { 32 })
            }
            ("df", _) => {
                let mut stdout = String::from(
                    "Filesystem     1K-blocks      Used Available Use% Mounted on\n",
                );
                for (device, mount_point) in &state.mounts {
                    stdout.push_str(&format!(
                        "{}  10239252  178224  9521176  2% {}\n",
                        device, mount_point
                    ));
                }
                stdout_of(stdout)
            }
            ("dumpe2fs", _) => stdout_of(state.headers.clone()),
            _ => exit(0),
        }
    }
}

fn exit(code: i32) -> ToolOutput {
    ToolOutput {
        code,
        ..ToolOutput::default()
    }
}

fn stdout_of(stdout: String) -> ToolOutput {
    ToolOutput {
        stdout,
        ..ToolOutput::default()
    }
}

impl CommandRunner for FakeSystem {
    fn output(&self, program: &str, args: &[&str]) -> Result<ToolOutput> {
        Ok(self.respond(program, args))
    }

    fn interactive(&self, program: &str, args: &[&str]) -> Result<ToolOutput> {
        Ok(self.respond(program, args))
    }
}
